//! Commands acting on a single case.

use crate::cache::lock;
use crate::cli::registry::{ArgKind, ArgSpec, BoundArgs, CommandDescriptor, Registry};
use crate::cli::render;
use crate::cli::session::{CommandContext, Output};
use crate::error::{Error, Result};
use crate::model::{CaseId, CaseStatus, Field, FieldValue, NewCase};
use std::fmt::Write as _;
use std::io;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

const CASE: ArgSpec = ArgSpec::optional("case", ArgKind::CaseRef);

pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        CommandDescriptor::new("show", "Show a case and make it current", show)
            .arg(CASE)
            .description("Without an argument, shows the current case again. A bare case number at the prompt does the same as `show <case>`."),
    )?;
    registry.register(
        CommandDescriptor::new("refresh", "Fetch a case again from the server", refresh)
            .arg(CASE)
            .description("Refused while the case has unflushed changes."),
    )?;
    registry.register(
        CommandDescriptor::new("resolve", "Stage resolving a case", resolve).arg(CASE),
    )?;
    registry.register(
        CommandDescriptor::new("reopen", "Stage reopening a closed case", reopen).arg(CASE),
    )?;
    registry.register(
        CommandDescriptor::new("close", "Stage closing a case", close).arg(CASE),
    )?;
    registry.register(
        CommandDescriptor::new("reactivate", "Stage reactivating a resolved case", reactivate)
            .arg(CASE),
    )?;
    registry.register(
        CommandDescriptor::new("assign", "Stage a new assignee for the current case", assign)
            .arg(ArgSpec::required("person", ArgKind::FreeText)),
    )?;
    registry.register(
        CommandDescriptor::new("set", "Stage a field change on the current case", set)
            .arg(ArgSpec::required("field", ArgKind::Text))
            .arg(ArgSpec::required("value", ArgKind::FreeText))
            .description("Fields: title, status, assignee, project, area. Changes are sent by `flush`."),
    )?;
    registry.register(
        CommandDescriptor::new("comment", "Add a comment to the current case", comment)
            .arg(ArgSpec::optional("text", ArgKind::FreeText))
            .description("Without text, opens $EDITOR. Comments are sent immediately."),
    )?;
    registry.register(
        CommandDescriptor::new("flush", "Send staged changes to the server", flush)
            .arg(CASE)
            .description("Without a case and with no current case, flushes every case with staged changes."),
    )?;
    registry.register(
        CommandDescriptor::new("discard", "Drop staged changes", discard).arg(CASE),
    )?;
    registry.register(CommandDescriptor::new(
        "pending",
        "List cases with unflushed changes",
        pending,
    ))?;
    registry.register(
        CommandDescriptor::new("new", "Create a case", new_case).description(
            "Opens $EDITOR on a form. Fill in the headers; the text after the first blank \
             line becomes the description. An empty file aborts.",
        ),
    )?;
    registry.register(
        CommandDescriptor::new("browse", "Open a case in the web browser", browse)
            .alias("b")
            .arg(CASE),
    )?;
    Ok(())
}

fn target(args: &BoundArgs, ctx: &CommandContext) -> Result<CaseId> {
    ctx.target(args, "case")
}

fn detail(ctx: &mut CommandContext, id: CaseId) -> Result<Output> {
    let handle = ctx.case(id)?;
    ctx.session.set_current(id);
    let permalink = ctx.client.permalink(id);
    let text = render::case_detail(&lock(&handle), permalink.as_deref());
    Ok(Output::Text(text))
}

fn show(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let id = target(args, ctx)?;
    detail(ctx, id)
}

fn refresh(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let id = target(args, ctx)?;
    ctx.cache.refresh(id)?;
    detail(ctx, id)
}

fn stage_status(args: &BoundArgs, ctx: &mut CommandContext, status: CaseStatus) -> Result<Output> {
    let id = target(args, ctx)?;
    let handle = ctx.case(id)?;
    let mut case = lock(&handle);

    if case.effective(Field::Status) == Some(FieldValue::Status(status)) {
        return Ok(Output::Text(format!("Case {id} is already {status}")));
    }
    case.stage(Field::Status, FieldValue::Status(status));
    let staged = case.staged().contains_key(&Field::Status);
    drop(case);

    ctx.session.set_current(id);
    if staged {
        Ok(Output::Text(format!(
            "Case {id} will be {status} on the next `flush`"
        )))
    } else {
        Ok(Output::Text(format!(
            "Dropped the staged status change; case {id} stays {status}"
        )))
    }
}

fn resolve(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    stage_status(args, ctx, CaseStatus::Resolved)
}

fn reopen(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    stage_status(args, ctx, CaseStatus::Open)
}

fn close(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    stage_status(args, ctx, CaseStatus::Closed)
}

fn reactivate(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    stage_status(args, ctx, CaseStatus::Open)
}

fn stage_field(ctx: &mut CommandContext, field: &str, value: &str) -> Result<Output> {
    let id = ctx.session.require_current()?;
    let handle = ctx.case(id)?;
    let mut case = lock(&handle);
    case.apply(field, value)?;
    if case.is_dirty() {
        Ok(Output::Text(render::staged_changes(&case)))
    } else {
        Ok(Output::Text(format!("No staged changes on case {id}")))
    }
}

fn assign(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let person = args.text("person").unwrap_or_default();
    stage_field(ctx, Field::Assignee.as_str(), person)
}

fn set(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let field = args.text("field").unwrap_or_default();
    let value = args.text("value").unwrap_or_default();
    stage_field(ctx, field, value)
}

fn comment(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let id = ctx.session.require_current()?;
    let text = match args.text("text") {
        Some(text) => text.to_string(),
        None => {
            let handle = ctx.case(id)?;
            let title = lock(&handle).snapshot().title.clone();
            ctx.composer
                .compose(&format!("\n# Comment on case {id}: {title}\n"))?
        }
    };

    ctx.cache.comment(id, &text)?;
    Ok(Output::Text(format!("Comment added to case {id}")))
}

fn flush(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let ids = match args.case("case") {
        Some(id) => vec![id],
        None => ctx.cache.dirty_cases(),
    };
    if ids.is_empty() {
        return Ok(Output::Text("Nothing to flush".to_string()));
    }

    let total = ids.len();
    let mut out = String::new();
    let mut failures = Vec::new();
    for id in ids {
        match ctx.cache.flush(id) {
            // the flushed copy is invalidated; this fetches the server's view
            Ok(true) => match ctx.case(id) {
                Ok(handle) => {
                    let status = lock(&handle).snapshot().status;
                    let _ = writeln!(out, "Flushed case {id} ({status})");
                }
                Err(e) => {
                    warn!(%id, error = %e, "Refetch after flush failed");
                    let _ = writeln!(out, "Flushed case {id}; could not fetch it again: {e}");
                }
            },
            Ok(false) => {
                let _ = writeln!(out, "Nothing to flush for case {id}");
            }
            Err(e) => {
                let _ = writeln!(out, "Case {id} not flushed: {e}");
                failures.push((id, e));
            }
        }
    }

    if failures.is_empty() {
        return Ok(Output::Text(out));
    }
    if total == 1 {
        if let Some((_, e)) = failures.pop() {
            return Err(e);
        }
    }
    Err(Error::PartialFlush {
        report: out.trim_end().to_string(),
        failed: failures.into_iter().map(|(id, _)| id).collect(),
        total,
    })
}

fn new_case(_: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let form = NewCase::form(ctx.session.user_name());
    let text = ctx.composer.compose(&form)?;
    let case = NewCase::from_form(&text)?;

    let snapshot = ctx
        .client
        .create(&case)
        .map_err(|e| e.into_create_error(&case.title))?;
    let id = snapshot.id;
    let handle = ctx.cache.insert(snapshot);
    ctx.session.set_current(id);

    let permalink = ctx.client.permalink(id);
    let detail = render::case_detail(&lock(&handle), permalink.as_deref());
    Ok(Output::Text(format!("Created case {id}\n{detail}")))
}

fn discard(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let id = target(args, ctx)?;
    let dropped = ctx.cache.discard(id);
    if dropped.is_empty() {
        return Ok(Output::Text(format!("No staged changes on case {id}")));
    }
    let fields: Vec<&str> = dropped.keys().map(Field::as_str).collect();
    info!(%id, fields = ?fields, "Discarded staged changes");
    Ok(Output::Text(format!(
        "Discarded changes to {} on case {id}",
        fields.join(", ")
    )))
}

fn pending(_: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let dirty = ctx.cache.dirty_cases();
    if dirty.is_empty() {
        return Ok(Output::Text("No unflushed changes".to_string()));
    }

    let mut out = String::new();
    for id in dirty {
        if let Some(handle) = ctx.cache.peek(id) {
            let case = lock(&handle);
            let _ = writeln!(out, "{}", render::case_line(&case));
            out.push_str(&render::staged_changes(&case));
        }
    }
    Ok(Output::Text(out))
}

fn browse(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let id = target(args, ctx)?;
    let url = ctx
        .client
        .permalink(id)
        .ok_or_else(|| Error::Other(format!("No web link is known for case {id}")))?;
    (ctx.opener)(&url)?;
    Ok(Output::Text(format!("Opened {url}")))
}

/// Open `url` with `$BROWSER`, falling back to the platform opener.
pub fn open_in_browser(url: &str) -> io::Result<()> {
    if let Some(browser) = std::env::var("BROWSER").ok().filter(|b| !b.trim().is_empty()) {
        let mut words = browser.split_whitespace();
        if let Some(program) = words.next() {
            debug!(%program, %url, "Opening with $BROWSER");
            let status = Command::new(program).args(words).arg(url).status()?;
            if status.success() {
                return Ok(());
            }
            return Err(io::Error::other(format!("{browser} exited with {status}")));
        }
    }

    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        Command::new("xdg-open")
    };
    command
        .arg(url)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(drop)
}
