//! Query execution: saved searches, shortcuts, paging and result caching.

use super::{Query, QueryField, parse};
use crate::cache::{CaseCache, CaseHandle};
use crate::client::{CaseClient, PageCursor, RetryPolicy};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Placeholder for the logged-on user inside filters.
pub const ME: &str = "@me";

/// Named shortcuts and the filters they expand to.
pub const SHORTCUTS: &[(&str, &str)] = &[
    ("my open cases", "assignee=@me AND status=open"),
    ("my cases", "assignee=@me"),
    ("mine", "assignee=@me"),
    ("open cases", "status=open"),
    ("resolved cases", "status=resolved"),
    ("opened by me", "openedby=@me"),
];

/// Search tuning, loaded from the `query` section of the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Cases requested per page.
    pub page_size: usize,
    /// More matches than this is an error rather than a truncated list.
    pub max_results: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_results: 500,
        }
    }
}

/// Per-invocation inputs that live in the session, not the engine.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    /// Full name of the logged-on user, substituted for `@me`.
    pub user: Option<&'a str>,
    pub saved: &'a BTreeMap<String, String>,
}

pub struct QueryEngine {
    client: Arc<dyn CaseClient>,
    cache: Arc<CaseCache>,
    settings: QuerySettings,
    retry: RetryPolicy,
}

impl QueryEngine {
    pub fn new(
        client: Arc<dyn CaseClient>,
        cache: Arc<CaseCache>,
        settings: QuerySettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            cache,
            settings,
            retry,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    /// Resolve a saved search name or shortcut to filter text.
    ///
    /// Saved searches win over shortcuts of the same name.
    #[must_use]
    pub fn expand(filter_text: &str, saved: &BTreeMap<String, String>) -> String {
        let trimmed = filter_text.trim();
        let text = saved.get(trimmed).map_or(trimmed, String::as_str);

        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        SHORTCUTS
            .iter()
            .find(|(name, _)| *name == normalized)
            .map_or_else(|| text.to_string(), |(_, expansion)| (*expansion).to_string())
    }

    /// Expand, parse and bind `@me` without touching the service.
    pub fn compile(&self, filter_text: &str, context: &QueryContext<'_>) -> Result<Query> {
        let text = Self::expand(filter_text, context.saved);
        let mut query = parse(&text)?;

        let uses_me = query
            .filter
            .predicates()
            .iter()
            .any(|p| p.value.eq_ignore_ascii_case(ME));
        if uses_me {
            let user = context.user.ok_or(Error::NotLoggedIn)?;
            query.filter.substitute(ME, user);
        }

        Ok(query)
    }

    /// Run a filter and return cached handles in result order.
    ///
    /// Pages are fetched until the cursor is exhausted. Exceeding
    /// `max_results` fails without caching anything.
    pub fn run(&self, filter_text: &str, context: &QueryContext<'_>) -> Result<Vec<CaseHandle>> {
        let query = self.compile(filter_text, context)?;
        let limit = self.settings.max_results;
        debug!(query = %query, limit, "Running search");

        let mut seen = HashSet::new();
        let mut snapshots = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        let mut pages = 0usize;

        loop {
            let page = self.retry.read("search", || {
                self.client
                    .search(&query, cursor.as_ref(), self.settings.page_size)
            })?;
            pages += 1;

            if let Some(total) = page.total.filter(|total| *total > limit) {
                return Err(too_many(&query, total, limit));
            }

            for snapshot in page.cases {
                if seen.insert(snapshot.id) {
                    snapshots.push(snapshot);
                }
            }
            if snapshots.len() > limit {
                return Err(too_many(&query, snapshots.len(), limit));
            }

            match page.next_cursor {
                Some(next) if cursor.as_ref() == Some(&next) => {
                    warn!(cursor = %next.0, "Service repeated a page cursor; stopping");
                    break;
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        query.apply_sort(&mut snapshots);
        info!(count = snapshots.len(), pages, "Search complete");

        Ok(snapshots
            .into_iter()
            .map(|snapshot| self.cache.insert(snapshot))
            .collect())
    }
}

fn too_many(query: &Query, count: usize, limit: usize) -> Error {
    let narrower = if !query.constrains(QueryField::Status) {
        format!("{query} AND status=open")
    } else if !query.constrains(QueryField::Assignee) {
        format!("{query} AND assignee=@me")
    } else if !query.constrains(QueryField::Project) {
        format!("{query} AND project=<name>")
    } else {
        format!("{query} AND title~<word>")
    };
    Error::TooManyResults {
        count,
        limit,
        suggestion: format!("Narrow the filter, e.g. `search {narrower}`"),
    }
}
