//! Per-session state threaded through every command.

use super::editor::{Compose, ExternalEditor};
use super::registry::BoundArgs;
use crate::cache::{CaseCache, CaseHandle};
use crate::client::CaseClient;
use crate::config::{Config, Credentials, Prompter};
use crate::error::{Error, Result};
use crate::model::{CaseId, Person};
use crate::query::{QueryContext, QueryEngine};
use std::path::PathBuf;
use std::sync::Arc;

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    None,
    Text(String),
    /// Rendered by the dispatcher from registry metadata.
    Help(Option<String>),
    Quit,
}

/// Logged-on user, current case and last result set.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub user: Option<Person>,
    pub credentials: Option<Credentials>,
    current: Option<CaseId>,
    results: Vec<CaseId>,
    cursor: Option<usize>,
}

impl SessionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn current(&self) -> Option<CaseId> {
        self.current
    }

    pub fn require_current(&self) -> Result<CaseId> {
        self.current.ok_or(Error::NoCurrentCase)
    }

    pub fn set_current(&mut self, id: CaseId) {
        self.current = Some(id);
        if let Some(pos) = self.results.iter().position(|r| *r == id) {
            self.cursor = Some(pos);
        }
    }

    #[must_use]
    pub fn user_name(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.full_name.as_str())
    }

    #[must_use]
    pub fn results(&self) -> &[CaseId] {
        &self.results
    }

    #[must_use]
    pub const fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Replace the result set; navigation restarts before the first result.
    pub fn set_results(&mut self, ids: Vec<CaseId>) {
        self.results = ids;
        self.cursor = None;
    }

    /// Move through the result set by `step` and return the case there.
    pub fn advance(&mut self, step: isize) -> Result<CaseId> {
        if self.results.is_empty() {
            return Err(Error::Other("No search results; run `search` first".to_string()));
        }
        let last = self.results.len() - 1;
        let next = match (self.cursor, step.is_negative()) {
            (None, false) => 0,
            (None, true) => last,
            (Some(pos), false) if pos < last => pos + 1,
            (Some(pos), true) if pos > 0 => pos - 1,
            (Some(_), false) => return Err(Error::Other("Already at the last result".to_string())),
            (Some(_), true) => return Err(Error::Other("Already at the first result".to_string())),
        };
        self.cursor = Some(next);
        Ok(self.results[next])
    }

    /// Forget the user, current case and results. Credentials are kept so
    /// `logon` can start a new session.
    pub fn reset(&mut self) {
        let credentials = self.credentials.take();
        *self = Self {
            credentials,
            ..Self::default()
        };
    }

    #[must_use]
    pub fn prompt(&self) -> String {
        match self.current {
            Some(id) => format!("[{id}] >>> "),
            None => ">>> ".to_string(),
        }
    }
}

/// Everything a handler may touch.
pub struct CommandContext {
    pub session: SessionContext,
    pub client: Arc<dyn CaseClient>,
    pub cache: Arc<CaseCache>,
    pub queries: QueryEngine,
    pub config: Config,
    /// Where `savesearch` persists the config; `None` keeps changes in memory.
    pub config_path: Option<PathBuf>,
    pub prompter: Option<Box<dyn Prompter>>,
    pub composer: Box<dyn Compose>,
    pub opener: fn(&str) -> std::io::Result<()>,
}

impl CommandContext {
    /// Build the cache and query engine from `config`.
    pub fn new(client: Arc<dyn CaseClient>, config: Config) -> Self {
        let cache = Arc::new(CaseCache::new(
            Arc::clone(&client),
            config.cache_settings(),
            config.retry,
        ));
        let queries = QueryEngine::new(
            Arc::clone(&client),
            Arc::clone(&cache),
            config.query,
            config.retry,
        );
        Self {
            session: SessionContext::new(),
            client,
            cache,
            queries,
            config,
            config_path: None,
            prompter: None,
            composer: Box::new(ExternalEditor::from_env()),
            opener: super::commands::case::open_in_browser,
        }
    }

    #[must_use]
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    #[must_use]
    pub fn with_prompter(mut self, prompter: Option<Box<dyn Prompter>>) -> Self {
        self.prompter = prompter;
        self
    }

    #[must_use]
    pub fn with_composer(mut self, composer: Box<dyn Compose>) -> Self {
        self.composer = composer;
        self
    }

    #[must_use]
    pub fn with_opener(mut self, opener: fn(&str) -> std::io::Result<()>) -> Self {
        self.opener = opener;
        self
    }

    #[must_use]
    pub fn query_context(&self) -> QueryContext<'_> {
        QueryContext {
            user: self.session.user_name(),
            saved: &self.config.saved_searches,
        }
    }

    /// The case named by argument `name`, or the current case.
    pub fn target(&self, args: &BoundArgs, name: &str) -> Result<CaseId> {
        match args.case(name) {
            Some(id) => Ok(id),
            None => self.session.require_current(),
        }
    }

    pub fn case(&self, id: CaseId) -> Result<CaseHandle> {
        self.cache.get(id)
    }
}
