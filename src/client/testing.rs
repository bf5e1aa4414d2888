//! Scripted in-memory `CaseClient` for unit tests.

use super::{AuthSession, CaseClient, PageCursor, SearchPage};
use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::model::{
    CaseId, CaseSnapshot, Field, FieldChanges, FieldValue, NewCase, Person, Revision,
};
use crate::query::Query;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MockClient {
    cases: Mutex<HashMap<CaseId, CaseSnapshot>>,
    pages: Mutex<Vec<Vec<CaseId>>>,
    queries: Mutex<Vec<Query>>,
    updates: Mutex<Vec<(CaseId, Revision, FieldChanges)>>,
    comments: Mutex<Vec<(CaseId, String)>>,
    created: Mutex<Vec<NewCase>>,
    fetch_failures: Mutex<VecDeque<Error>>,
    search_failure: Mutex<Option<Error>>,
    update_failure: Mutex<Option<Error>>,
    create_failure: Mutex<Option<Error>>,
    comment_failure: Mutex<Option<Error>>,
    fetch_delay: Mutex<Duration>,
    user: Mutex<Option<Person>>,
    fetches: Mutex<HashMap<CaseId, usize>>,
    fetch_calls: AtomicUsize,
    search_calls: AtomicUsize,
    update_calls: AtomicUsize,
    comment_calls: AtomicUsize,
    create_calls: AtomicUsize,
    auth_calls: AtomicUsize,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a case on the "server".
    pub fn put(&self, snapshot: CaseSnapshot) {
        self.cases.lock().unwrap().insert(snapshot.id, snapshot);
    }

    /// Store a case with a title only.
    pub fn put_case(&self, id: u64, title: &str) {
        self.put(CaseSnapshot::new(CaseId(id), title));
    }

    /// Script search results as pages of ids (all must be stored).
    pub fn script_pages(&self, pages: Vec<Vec<u64>>) {
        *self.pages.lock().unwrap() = pages
            .into_iter()
            .map(|p| p.into_iter().map(CaseId).collect())
            .collect();
    }

    pub fn accept_user(&self, full_name: &str) {
        *self.user.lock().unwrap() = Some(Person {
            id: 1,
            full_name: full_name.to_string(),
            email: format!("{}@example.com", full_name.to_lowercase()),
        });
    }

    pub fn fail_next_fetch(&self, error: Error) {
        self.fetch_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_next_search(&self, error: Error) {
        *self.search_failure.lock().unwrap() = Some(error);
    }

    pub fn fail_next_create(&self, error: Error) {
        *self.create_failure.lock().unwrap() = Some(error);
    }

    pub fn fail_next_update(&self, error: Error) {
        *self.update_failure.lock().unwrap() = Some(error);
    }

    pub fn fail_next_comment(&self, error: Error) {
        *self.comment_failure.lock().unwrap() = Some(error);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn fetch_count(&self, id: u64) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(&CaseId(id))
            .copied()
            .unwrap_or(0)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn comment_calls(&self) -> usize {
        self.comment_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.fetch_calls()
            + self.search_calls()
            + self.update_calls()
            + self.comment_calls()
            + self.create_calls.load(Ordering::SeqCst)
            + self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(CaseId, Revision, FieldChanges)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn comments(&self) -> Vec<(CaseId, String)> {
        self.comments.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<NewCase> {
        self.created.lock().unwrap().clone()
    }
}

impl CaseClient for MockClient {
    fn authenticate(&self, _credentials: &Credentials) -> Result<AuthSession> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        self.user
            .lock()
            .unwrap()
            .clone()
            .map(|user| AuthSession { user })
            .ok_or_else(|| Error::Auth("invalid credentials".into()))
    }

    fn fetch(&self, id: CaseId) -> Result<CaseSnapshot> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        *self.fetches.lock().unwrap().entry(id).or_default() += 1;

        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if let Some(error) = self.fetch_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        self.cases
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound { id })
    }

    fn search(
        &self,
        query: &Query,
        cursor: Option<&PageCursor>,
        _page_size: usize,
    ) -> Result<SearchPage> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.search_failure.lock().unwrap().take() {
            return Err(error);
        }
        self.queries.lock().unwrap().push(query.clone());

        let pages = self.pages.lock().unwrap().clone();
        let index = cursor.map_or(0, |c| c.0.parse::<usize>().unwrap());
        let Some(ids) = pages.get(index) else {
            return Ok(SearchPage::default());
        };

        let cases = self.cases.lock().unwrap();
        let snapshots = ids
            .iter()
            .map(|id| cases.get(id).cloned().ok_or(Error::NotFound { id: *id }))
            .collect::<Result<Vec<_>>>()?;

        Ok(SearchPage {
            cases: snapshots,
            next_cursor: (index + 1 < pages.len()).then(|| PageCursor((index + 1).to_string())),
            total: None,
        })
    }

    fn update(
        &self,
        id: CaseId,
        revision: &Revision,
        changes: &FieldChanges,
    ) -> Result<CaseSnapshot> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.updates
            .lock()
            .unwrap()
            .push((id, revision.clone(), changes.clone()));

        if let Some(error) = self.update_failure.lock().unwrap().take() {
            return Err(error);
        }

        let mut cases = self.cases.lock().unwrap();
        let stored = cases.get_mut(&id).ok_or(Error::NotFound { id })?;
        for (field, value) in changes {
            match (field, value) {
                (Field::Status, FieldValue::Status(s)) => stored.status = *s,
                (Field::Title, v) => stored.title = v.to_string(),
                (Field::Assignee, v) => stored.assignee = Some(v.to_string()),
                (Field::Project, v) => stored.project = Some(v.to_string()),
                (Field::Area, v) => stored.area = Some(v.to_string()),
                (Field::Status, FieldValue::Text(_)) => {}
            }
        }
        let next = stored.revision.0.parse::<u64>().unwrap_or(0) + 1;
        stored.revision = Revision(next.to_string());
        Ok(stored.clone())
    }

    fn comment(&self, id: CaseId, text: &str) -> Result<()> {
        self.comment_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.comment_failure.lock().unwrap().take() {
            return Err(error);
        }
        self.comments.lock().unwrap().push((id, text.to_string()));
        Ok(())
    }

    fn create(&self, case: &NewCase) -> Result<CaseSnapshot> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.create_failure.lock().unwrap().take() {
            return Err(error);
        }
        self.created.lock().unwrap().push(case.clone());

        let mut cases = self.cases.lock().unwrap();
        let id = CaseId(cases.keys().map(|id| id.0).max().unwrap_or(0) + 1);
        let mut snapshot = CaseSnapshot::new(id, case.title.clone());
        snapshot.project.clone_from(&case.project);
        snapshot.area.clone_from(&case.area);
        snapshot.assignee.clone_from(&case.assignee);
        snapshot.revision = Revision("1".to_string());
        cases.insert(id, snapshot.clone());
        Ok(snapshot)
    }

    fn permalink(&self, id: CaseId) -> Option<String> {
        Some(format!("https://fb.test/f/cases/{id}"))
    }
}
