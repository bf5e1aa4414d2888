//! Searching, saved searches and result navigation.

use crate::cache::{CaseHandle, lock};
use crate::cli::registry::{ArgKind, ArgSpec, BoundArgs, CommandDescriptor, Registry};
use crate::cli::render;
use crate::cli::session::{CommandContext, Output};
use crate::config::save_config_to;
use crate::error::{Error, Result};
use crate::model::CaseId;
use crate::query::SHORTCUTS;
use colored::Colorize;
use std::fmt::Write as _;
use tracing::info;

pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        CommandDescriptor::new("search", "Find cases matching a filter", search)
            .arg(ArgSpec::required("filter", ArgKind::FreeText))
            .description(
                "Filter terms: field=value, field:value or field~text, combined with AND, OR, \
                 NOT and parentheses; bare words match the title. Add sort:field or \
                 sort:-field to order results. Fields: id, title, status, assignee, project, \
                 area, openedby, tag, parent. `@me` is the logged-on user. Saved search \
                 names and shortcuts such as `my open cases` are accepted too.",
            ),
    )?;
    registry.register(CommandDescriptor::new(
        "mycases",
        "List open cases assigned to you",
        mycases,
    ))?;
    registry.register(
        CommandDescriptor::new("savesearch", "Save a filter under a name", savesearch)
            .arg(ArgSpec::required("name", ArgKind::Text))
            .arg(ArgSpec::required("filter", ArgKind::FreeText))
            .description("The filter is checked before saving. Run it later with `search <name>`."),
    )?;
    registry.register(CommandDescriptor::new(
        "searches",
        "List saved searches and shortcuts",
        searches,
    ))?;
    registry.register(CommandDescriptor::new(
        "results",
        "List the last search results",
        results,
    ))?;
    registry.register(CommandDescriptor::new(
        "next",
        "Show the next search result",
        next,
    ))?;
    registry.register(CommandDescriptor::new(
        "prev",
        "Show the previous search result",
        prev,
    ))?;
    Ok(())
}

fn list(handles: &[CaseHandle]) -> String {
    let mut out = String::new();
    for handle in handles {
        let _ = writeln!(out, "{}", render::case_line(&lock(handle)));
    }
    let noun = if handles.len() == 1 { "case" } else { "cases" };
    let _ = writeln!(out, "{} {noun}", handles.len());
    out
}

fn run_filter(ctx: &mut CommandContext, filter: &str) -> Result<Output> {
    let handles = ctx.queries.run(filter, &ctx.query_context())?;
    let ids: Vec<CaseId> = handles.iter().map(|h| lock(h).id()).collect();
    ctx.session.set_results(ids);
    Ok(Output::Text(list(&handles)))
}

fn search(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    run_filter(ctx, args.text("filter").unwrap_or_default())
}

fn mycases(_: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    run_filter(ctx, "my open cases")
}

fn savesearch(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let name = args.text("name").unwrap_or_default().trim().to_string();
    let filter = args.text("filter").unwrap_or_default().to_string();
    if name.is_empty() {
        return Err(Error::Argument {
            command: "savesearch".to_string(),
            argument: "name".to_string(),
            expected: ArgKind::Text.expected().to_string(),
        });
    }

    // `@me` is bound at run time, so only the syntax is checked here
    crate::query::parse(&crate::query::QueryEngine::expand(
        &filter,
        &ctx.config.saved_searches,
    ))?;

    let replaced = ctx
        .config
        .saved_searches
        .insert(name.clone(), filter.clone())
        .is_some();
    if let Some(path) = &ctx.config_path {
        save_config_to(path, &ctx.config)?;
    }
    info!(%name, %filter, replaced, "Saved search");

    let verb = if replaced { "Updated" } else { "Saved" };
    Ok(Output::Text(format!("{verb} search '{name}': {filter}")))
}

fn searches(_: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let mut out = String::new();
    if ctx.config.saved_searches.is_empty() {
        out.push_str("No saved searches\n");
    } else {
        let _ = writeln!(out, "{}", "Saved searches:".bold());
        for (name, filter) in &ctx.config.saved_searches {
            let _ = writeln!(out, "  {name:<20} {filter}");
        }
    }
    let _ = writeln!(out, "{}", "Shortcuts:".bold());
    for (name, expansion) in SHORTCUTS {
        let _ = writeln!(out, "  {name:<20} {expansion}");
    }
    Ok(Output::Text(out))
}

fn results(_: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let ids = ctx.session.results().to_vec();
    if ids.is_empty() {
        return Ok(Output::Text("No search results".to_string()));
    }
    let handles = ids
        .into_iter()
        .map(|id| ctx.case(id))
        .collect::<Result<Vec<_>>>()?;
    Ok(Output::Text(list(&handles)))
}

fn navigate(ctx: &mut CommandContext, step: isize) -> Result<Output> {
    let id = ctx.session.advance(step)?;
    let handle = ctx.case(id)?;
    ctx.session.set_current(id);
    let permalink = ctx.client.permalink(id);
    Ok(Output::Text(render::case_detail(
        &lock(&handle),
        permalink.as_deref(),
    )))
}

fn next(_: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    navigate(ctx, 1)
}

fn prev(_: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    navigate(ctx, -1)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Shell, text};
    use crate::config::{Config, load_config_from};
    use crate::error::Error;
    use crate::model::{CaseId, CaseSnapshot};

    fn with_alice() -> Shell {
        colored::control::set_override(false);
        let mut shell = Shell::new();
        shell.client.accept_user("alice");
        shell.ctx.session.user = Some(crate::model::Person {
            id: 1,
            full_name: "alice".to_string(),
            email: "alice@example.com".to_string(),
        });
        for (id, title) in [(5, "Crash"), (9, "Typo"), (12, "Slow")] {
            let mut snapshot = CaseSnapshot::new(CaseId(id), title);
            snapshot.assignee = Some("alice".to_string());
            shell.client.put(snapshot);
        }
        shell.client.script_pages(vec![vec![5, 9, 12]]);
        shell
    }

    #[test]
    fn test_mycases_binds_user_and_keeps_order() {
        let mut shell = with_alice();
        let out = text(shell.run("mycases"));
        assert!(out.ends_with("3 cases\n"));

        let queries = shell.client.queries();
        assert_eq!(queries[0].to_string(), "assignee=\"alice\" AND status=\"open\"");
        assert_eq!(
            shell.ctx.session.results(),
            &[CaseId(5), CaseId(9), CaseId(12)]
        );
        assert_eq!(shell.ctx.cache.len(), 3);
    }

    #[test]
    fn test_next_and_prev_walk_results() {
        let mut shell = with_alice();
        shell.run("search my open cases").unwrap();
        let fetches = shell.client.fetch_calls();

        assert!(text(shell.run("next")).contains("[5] Crash"));
        assert!(text(shell.run("next")).contains("[9] Typo"));
        assert!(text(shell.run("prev")).contains("[5] Crash"));
        assert_eq!(shell.ctx.session.current(), Some(CaseId(5)));
        // served from the search results in the cache
        assert_eq!(shell.client.fetch_calls(), fetches);
    }

    #[test]
    fn test_results_lists_last_search() {
        let mut shell = with_alice();
        assert_eq!(text(shell.run("results")), "No search results");
        shell.run("search assignee=@me").unwrap();
        let out = text(shell.run("results"));
        assert!(out.contains("Typo"));
        assert!(out.contains("3 cases"));
    }

    #[test]
    fn test_search_syntax_error_makes_no_call() {
        let mut shell = with_alice();
        assert!(matches!(
            shell.run("search status=open AND (title~x"),
            Err(Error::QuerySyntax { .. })
        ));
        assert_eq!(shell.client.search_calls(), 0);
    }

    #[test]
    fn test_savesearch_persists_and_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut shell = with_alice();
        shell.ctx.config_path = Some(path.clone());

        let out = text(shell.run("savesearch mine-open assignee=@me status=open"));
        assert!(out.starts_with("Saved search 'mine-open'"));
        let saved: Config = load_config_from(&path).unwrap();
        assert_eq!(
            saved.saved_searches.get("mine-open").map(String::as_str),
            Some("assignee=@me status=open")
        );

        shell.run("search mine-open").unwrap();
        assert_eq!(
            shell.client.queries()[0].to_string(),
            "assignee=\"alice\" AND status=\"open\""
        );
        assert!(text(shell.run("searches")).contains("mine-open"));
    }

    #[test]
    fn test_savesearch_rejects_bad_filter() {
        let mut shell = with_alice();
        assert!(matches!(
            shell.run("savesearch broken colour=red"),
            Err(Error::QuerySyntax { .. })
        ));
        assert!(shell.ctx.config.saved_searches.is_empty());
    }

    #[test]
    fn test_full_result_set_stays_cached_with_defaults() {
        let mut shell = Shell::new();
        let ids: Vec<u64> = (1..=300).collect();
        for id in &ids {
            shell.client.put_case(*id, "case");
        }
        shell
            .client
            .script_pages(ids.chunks(100).map(<[u64]>::to_vec).collect());

        let out = text(shell.run("search status=open"));
        assert!(out.ends_with("300 cases\n"));
        assert_eq!(shell.ctx.cache.len(), 300);
        assert_eq!(shell.ctx.session.results().len(), 300);

        assert!(text(shell.run("next")).contains("[1]"));
        text(shell.run("results"));
        assert_eq!(shell.client.fetch_calls(), 0);
    }

    #[test]
    fn test_cancelled_search_keeps_previous_results() {
        let mut shell = with_alice();
        shell.run("search assignee=@me").unwrap();
        shell.run("next").unwrap();

        shell.client.fail_next_search(Error::Cancelled {
            operation: "search".into(),
        });
        assert!(matches!(
            shell.run("search status=open"),
            Err(Error::Cancelled { .. })
        ));
        assert_eq!(
            shell.ctx.session.results(),
            &[CaseId(5), CaseId(9), CaseId(12)]
        );
        assert_eq!(shell.ctx.session.cursor(), Some(0));
        assert!(text(shell.run("next")).contains("[9] Typo"));
    }

    #[test]
    fn test_cancelled_show_keeps_current_case() {
        let mut shell = with_alice();
        shell.run("show 5").unwrap();
        shell.client.fail_next_fetch(Error::Cancelled {
            operation: "fetch".into(),
        });

        assert!(matches!(shell.run("show 9"), Err(Error::Cancelled { .. })));
        assert_eq!(shell.ctx.session.current(), Some(CaseId(5)));
        assert!(shell.ctx.cache.peek(CaseId(9)).is_none());
        assert!(text(shell.run("show 9")).contains("[9] Typo"));
    }

    #[test]
    fn test_too_many_results_caches_nothing() {
        let mut config = Config::default();
        config.query.max_results = 2;
        let mut shell = Shell::with_config(config);
        for id in [1, 2, 3] {
            shell.client.put_case(id, "x");
        }
        shell.client.script_pages(vec![vec![1, 2, 3]]);

        assert!(matches!(
            shell.run("search status=open"),
            Err(Error::TooManyResults { .. })
        ));
        assert!(shell.ctx.cache.is_empty());
        assert!(shell.ctx.session.results().is_empty());
    }
}
