//! Terminal rendering of cases, lists and errors.

use super::registry::{CommandDescriptor, Registry};
use crate::error::Error;
use crate::model::{Case, CaseId, CaseSnapshot, CaseStatus, Field};
use colored::{ColoredString, Colorize};
use std::fmt::Write as _;

const WIDTH: usize = 80;

fn rule(ch: char) -> String {
    ch.to_string().repeat(WIDTH)
}

/// `[id]` in the case-id color.
#[must_use]
pub fn case_id(id: CaseId) -> ColoredString {
    format!("[{id}]").bold().cyan()
}

/// Status label colored by status: open green, resolved cyan, closed dim.
#[must_use]
pub fn status(snapshot: &CaseSnapshot) -> ColoredString {
    let label = if snapshot.status_label.is_empty() {
        snapshot.status.as_str()
    } else {
        snapshot.status_label.as_str()
    };
    match snapshot.status {
        CaseStatus::Open => label.green(),
        CaseStatus::Resolved => label.cyan(),
        CaseStatus::Closed => label.bright_black(),
    }
}

fn ids(list: &[CaseId]) -> String {
    list.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

/// Full case view: header, relations, link, staged changes, then events.
#[must_use]
pub fn case_detail(case: &Case, permalink: Option<&str>) -> String {
    let s = case.snapshot();
    let mut out = String::new();

    let _ = writeln!(out, "{}", rule('=').yellow().bold());
    let _ = writeln!(out, "{} {}", case_id(s.id), s.title.blue());
    let _ = writeln!(
        out,
        "{} - Opened by {} - Assigned to {}",
        status(s),
        s.opened_by.as_deref().unwrap_or("?").yellow(),
        s.assignee.as_deref().unwrap_or("nobody").red()
    );

    let mut location = Vec::new();
    if let Some(project) = &s.project {
        location.push(format!("Project {project}"));
    }
    if let Some(area) = &s.area {
        location.push(format!("Area {area}"));
    }
    if !s.tags.is_empty() {
        location.push(s.tags.iter().map(|t| format!("|{t}|")).collect::<Vec<_>>().join(" "));
    }
    if !location.is_empty() {
        let _ = writeln!(out, "{}", location.join(" - "));
    }

    let mut relations = Vec::new();
    if let Some(parent) = s.parent {
        relations.push(format!("Parent {parent}"));
    }
    if !s.children.is_empty() {
        relations.push(format!("Children {}", ids(&s.children)));
    }
    if !s.related.is_empty() {
        relations.push(format!("See also {}", ids(&s.related)));
    }
    if !s.duplicates.is_empty() {
        relations.push(format!("Duplicates {}", ids(&s.duplicates)));
    }
    if !relations.is_empty() {
        let _ = writeln!(out, "{}", relations.join(" "));
    }

    if let Some(link) = permalink {
        let _ = writeln!(out, "{}", link.white());
    }
    let _ = writeln!(out, "{}", rule('=').yellow().bold());

    if case.is_dirty() {
        let _ = writeln!(out, "{}", "Unflushed changes:".magenta().bold());
        out.push_str(&staged_changes(case));
    }

    for comment in &s.comments {
        let _ = writeln!(out, "{}", rule('-').yellow());
        let when = comment
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let _ = writeln!(out, "{} {}", when.bright_black(), comment.description.bold());
        if !comment.body.trim().is_empty() {
            let _ = writeln!(out, "{}", comment.body.trim_end());
        }
    }

    out
}

/// One line per staged change: `  field: old -> new`.
#[must_use]
pub fn staged_changes(case: &Case) -> String {
    let mut out = String::new();
    for (field, value) in case.staged() {
        let old = case
            .snapshot()
            .value(*field)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let _ = writeln!(out, "  {:<9} {} -> {}", format!("{field}:"), old.bright_black(), value.to_string().green());
    }
    out
}

/// Compact single line for lists. `*` marks unflushed changes.
#[must_use]
pub fn case_line(case: &Case) -> String {
    let s = case.snapshot();
    let marker = if case.is_dirty() { "*" } else { " " };
    let assignee = case
        .effective(Field::Assignee)
        .map(|v| v.to_string())
        .unwrap_or_default();
    format!(
        "{marker}{:>9} {:<10} {:<20} {}",
        case_id(s.id),
        status(s),
        truncate(&assignee, 20),
        truncate(&s.title, 60)
    )
}

/// One line for an error, plus a hint line when one exists.
#[must_use]
pub fn error(err: &Error) -> String {
    match err.hint() {
        Some(hint) => format!("{} {err}\n  {} {hint}", "Error:".red().bold(), "Hint:".yellow()),
        None => format!("{} {err}", "Error:".red().bold()),
    }
}

/// `help` with no topic: every command with its summary.
#[must_use]
pub fn help_index(registry: &Registry) -> String {
    let mut out = String::new();
    let width = registry.iter().map(|d| d.name.len()).max().unwrap_or(0);
    for descriptor in registry.iter() {
        let _ = writeln!(
            out,
            "  {:<width$}  {}",
            descriptor.name.bold(),
            descriptor.summary
        );
    }
    out.push_str("\nA bare case number shows that case. Commands may be abbreviated.\n");
    out
}

/// `help <command>`: usage, aliases and description.
#[must_use]
pub fn help_command(descriptor: &CommandDescriptor) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", "Usage:".bold(), descriptor.usage());
    if !descriptor.aliases.is_empty() {
        let _ = writeln!(out, "{} {}", "Aliases:".bold(), descriptor.aliases.join(", "));
    }
    let _ = writeln!(out, "\n{}", descriptor.summary);
    if !descriptor.description.is_empty() {
        let _ = writeln!(out, "\n{}", descriptor.description);
    }
    out
}
