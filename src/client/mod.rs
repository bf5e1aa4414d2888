//! Remote case service boundary.
//!
//! The shell core talks to the service only through [`CaseClient`]. The
//! HTTP implementation lives in [`http`]; tests use a scripted client.
//!
//! # Submodules
//!
//! - [`http`] - JSON API client over reqwest
//! - [`retry`] - Bounded retry with backoff for idempotent reads

pub mod http;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpClient;
pub use retry::RetryPolicy;

use crate::config::Credentials;
use crate::error::Result;
use crate::model::{CaseId, CaseSnapshot, FieldChanges, NewCase, Person, Revision};
use crate::query::Query;

/// Opaque continuation token for paged searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor(pub String);

/// One page of search results, in the service's native order.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub cases: Vec<CaseSnapshot>,
    pub next_cursor: Option<PageCursor>,
    /// Total match count, when the service reports it.
    pub total: Option<usize>,
}

/// An authenticated session with the service.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: Person,
}

/// Capability to read and write cases on the remote service.
///
/// Every call may fail with `Error::Transient` for network faults.
/// Implementations must not retry writes (`create`, `update`, `comment`).
pub trait CaseClient: Send + Sync {
    /// Log on and remember the session for subsequent calls.
    fn authenticate(&self, credentials: &Credentials) -> Result<AuthSession>;

    /// End the session. Token-based sessions have nothing to end.
    fn logoff(&self) -> Result<()> {
        Ok(())
    }

    /// Fetch a single case; `Error::NotFound` if it does not exist.
    fn fetch(&self, id: CaseId) -> Result<CaseSnapshot>;

    /// Fetch one page of cases matching `query`.
    fn search(
        &self,
        query: &Query,
        cursor: Option<&PageCursor>,
        page_size: usize,
    ) -> Result<SearchPage>;

    /// Apply `changes` to a case last seen at `revision`.
    ///
    /// Returns the authoritative snapshot, or `Error::Conflict` when the
    /// case was modified since `revision`.
    fn update(&self, id: CaseId, revision: &Revision, changes: &FieldChanges)
    -> Result<CaseSnapshot>;

    /// Append a comment to a case.
    fn comment(&self, id: CaseId, text: &str) -> Result<()>;

    /// Create a case and return its first snapshot.
    fn create(&self, case: &NewCase) -> Result<CaseSnapshot>;

    /// Browser URL for a case, if the client knows one.
    fn permalink(&self, _id: CaseId) -> Option<String> {
        None
    }
}
