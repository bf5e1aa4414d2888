//! `CaseClient` over the service's JSON API.
//!
//! Every call is a POST of `{"cmd": ..., "token": ..., ...}` to
//! `{endpoint}f/api/0/jsonapi`. Requests run on a private current-thread
//! tokio runtime and race against Ctrl-C, so an interrupt returns
//! `Error::Cancelled` instead of killing the shell.
//!
//! Searches are two-phase: the first call lists matching ids only, later
//! calls fetch details for one page of those ids. The cursor carries the
//! ids still to fetch.

use super::{AuthSession, CaseClient, PageCursor, SearchPage};
use crate::config::{Credentials, Secret};
use crate::error::{Error, Result};
use crate::model::{
    CaseId, CaseSnapshot, CaseStatus, Comment, Field, FieldChanges, FieldValue, NewCase, Person,
    Revision,
};
use crate::query::{Expr, MatchOp, Query, QueryField};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

/// Columns requested for full case details.
const CASE_COLUMNS: &[&str] = &[
    "ixBug",
    "sTitle",
    "sStatus",
    "sPersonAssignedTo",
    "sProject",
    "sArea",
    "ixPersonOpenedBy",
    "ixBugParent",
    "ixBugChildren",
    "ixRelatedBugs",
    "ixBugDuplicates",
    "tags",
    "ixBugEventLatest",
    "dtLastUpdated",
];

/// Service error code for an expired or missing session.
const NOT_LOGGED_ON: &str = "3";

struct Session {
    token: String,
    credentials: Credentials,
}

pub struct HttpClient {
    http: reqwest::Client,
    runtime: Runtime,
    base_url: String,
    api_url: String,
    session: Mutex<Option<Session>>,
    people: Mutex<HashMap<u64, String>>,
}

impl HttpClient {
    /// Build a client for `endpoint` (a base URL ending in `/`).
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fbcli/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Could not build HTTP client: {e}")))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            http,
            runtime,
            base_url: endpoint.to_string(),
            api_url: format!("{endpoint}f/api/0/jsonapi"),
            session: Mutex::new(None),
            people: Mutex::new(HashMap::new()),
        })
    }

    fn token(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.token.clone())
    }

    /// Run `future` to completion unless the user presses Ctrl-C first.
    fn block_on<T>(&self, operation: &str, future: impl Future<Output = Result<T>>) -> Result<T> {
        self.runtime.block_on(async {
            tokio::select! {
                result = future => result,
                _ = tokio::signal::ctrl_c() => {
                    warn!(operation, "Interrupted");
                    Err(Error::Cancelled { operation: operation.to_string() })
                }
            }
        })
    }

    async fn post(&self, operation: &str, body: Value) -> Result<Value> {
        let response = self
            .http
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(operation, &e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::transient(operation, format!("server returned {status}")));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| transport_error(operation, &e))?;
        envelope.into_data(operation)
    }

    /// Issue `cmd` with the session token, logging on again once if the
    /// session expired.
    fn call(&self, operation: &str, cmd: &str, params: Map<String, Value>) -> Result<Value> {
        let attempt = |token: Option<String>| {
            let mut body = params.clone();
            body.insert("cmd".to_string(), json!(cmd));
            if let Some(token) = token {
                body.insert("token".to_string(), json!(token));
            }
            self.block_on(operation, self.post(operation, Value::Object(body)))
        };

        match attempt(self.token()) {
            Err(Error::NotLoggedIn) => {
                let credentials = self
                    .session
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .map(|s| s.credentials.clone())
                    .ok_or(Error::NotLoggedIn)?;
                if credentials.secret.is_token() {
                    return Err(Error::Auth("API token was rejected".to_string()));
                }
                warn!(operation, "Session expired, logging on again");
                self.logon(&credentials)?;
                attempt(self.token())
            }
            other => other,
        }
    }

    fn logon(&self, credentials: &Credentials) -> Result<String> {
        let token = match &credentials.secret {
            Secret::Token(token) => token.clone(),
            Secret::Password(password) => {
                let body = json!({
                    "cmd": "logon",
                    "email": credentials.username,
                    "password": password,
                });
                let data = self
                    .block_on("logon", self.post("logon", body))
                    .map_err(|e| match e {
                        Error::Other(message) => Error::Auth(message),
                        Error::NotLoggedIn => Error::Auth("logon was rejected".to_string()),
                        other => other,
                    })?;
                data.get("token")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .ok_or_else(|| Error::Auth("logon returned no token".to_string()))?
            }
        };

        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(Session {
            token: token.clone(),
            credentials: credentials.clone(),
        });
        Ok(token)
    }

    fn view_person(&self, id: Option<u64>) -> Result<Person> {
        let mut params = Map::new();
        if let Some(id) = id {
            params.insert("ixPerson".to_string(), json!(id));
        }
        let data = self.call("viewPerson", "viewPerson", params)?;
        let raw: RawPerson = serde_json::from_value(data.get("person").cloned().unwrap_or_default())?;
        Ok(raw.into())
    }

    /// Full name for a person id, cached for the process lifetime.
    fn person_name(&self, id: u64) -> Option<String> {
        if let Some(name) = self.people.lock().unwrap_or_else(PoisonError::into_inner).get(&id) {
            return Some(name.clone());
        }
        match self.view_person(Some(id)) {
            Ok(person) => {
                self.people
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id, person.full_name.clone());
                Some(person.full_name)
            }
            Err(e) => {
                debug!(id, error = %e, "Could not look up person");
                None
            }
        }
    }

    fn search_raw(&self, q: &str, columns: &[&str]) -> Result<Vec<RawCase>> {
        let mut params = Map::new();
        params.insert("q".to_string(), json!(q));
        params.insert("cols".to_string(), json!(columns));
        let data = self.call("search", "search", params)?;
        let cases = data.get("cases").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(cases)?)
    }

    /// Fetch details for `ids`, returned in the order given.
    fn details(&self, ids: &[CaseId]) -> Result<Vec<CaseSnapshot>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let q = ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        let mut by_id: HashMap<CaseId, CaseSnapshot> = self
            .search_raw(&q, CASE_COLUMNS)?
            .into_iter()
            .filter_map(RawCase::into_snapshot)
            .map(|s| (s.id, s))
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}

impl CaseClient for HttpClient {
    fn authenticate(&self, credentials: &Credentials) -> Result<AuthSession> {
        self.logon(credentials)?;
        let user = self.view_person(None).map_err(|e| match e {
            Error::NotLoggedIn => Error::Auth("credentials were rejected".to_string()),
            other => other,
        })?;
        info!(user = %user.full_name, endpoint = %credentials.endpoint, "Logged on");
        Ok(AuthSession { user })
    }

    fn logoff(&self) -> Result<()> {
        let uses_password = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.credentials.secret.is_token());
        if uses_password {
            self.call("logoff", "logoff", Map::new())?;
        }
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn fetch(&self, id: CaseId) -> Result<CaseSnapshot> {
        let mut columns = CASE_COLUMNS.to_vec();
        columns.push("events");
        let raw = self
            .search_raw(&id.to_string(), &columns)?
            .into_iter()
            .find(|c| c.ix_bug == Some(id.0))
            .ok_or(Error::NotFound { id })?;

        let opened_by = raw.ix_person_opened_by.filter(|p| *p > 0);
        let mut snapshot = raw.into_snapshot().ok_or(Error::NotFound { id })?;
        snapshot.opened_by = opened_by.and_then(|p| self.person_name(p));
        Ok(snapshot)
    }

    fn search(
        &self,
        query: &Query,
        cursor: Option<&PageCursor>,
        page_size: usize,
    ) -> Result<SearchPage> {
        let ids: Vec<CaseId> = match cursor {
            Some(cursor) => parse_id_list(&cursor.0),
            None => self
                .search_raw(&remote_query(query), &["ixBug"])?
                .into_iter()
                .filter_map(|c| c.ix_bug.map(CaseId))
                .collect(),
        };
        let total = cursor.is_none().then_some(ids.len());

        let split = page_size.max(1).min(ids.len());
        let (page, rest) = ids.split_at(split);
        let cases = self.details(page)?;
        let next_cursor = (!rest.is_empty()).then(|| PageCursor(join_ids(rest)));

        debug!(fetched = cases.len(), remaining = rest.len(), "Search page");
        Ok(SearchPage {
            cases,
            next_cursor,
            total,
        })
    }

    fn update(&self, id: CaseId, revision: &Revision, changes: &FieldChanges) -> Result<CaseSnapshot> {
        let current = self.fetch(id)?;
        if &current.revision != revision {
            return Err(Error::Conflict {
                id,
                revision: current.revision.0,
            });
        }

        let target = match changes.get(&Field::Status) {
            Some(FieldValue::Status(status)) => Some(*status),
            _ => None,
        };
        let commands = status_commands(current.status, target);

        run_plan(id, &commands, |step, command| {
            let mut params = Map::new();
            params.insert("ixBug".to_string(), json!(id.0));
            if step == 0 {
                let latest = revision.0.parse::<u64>().map_or_else(|_| json!(revision.0), |n| json!(n));
                params.insert("ixBugEventLatest".to_string(), latest);
                params.extend(edit_params(changes));
            }
            self.call("update", command, params).map(drop)
        })?;

        self.fetch(id)
    }

    fn comment(&self, id: CaseId, text: &str) -> Result<()> {
        let mut params = Map::new();
        params.insert("ixBug".to_string(), json!(id.0));
        params.insert("sEvent".to_string(), json!(text));
        self.call("comment", "edit", params)?;
        Ok(())
    }

    fn create(&self, case: &NewCase) -> Result<CaseSnapshot> {
        let mut params = Map::new();
        params.insert("sTitle".to_string(), json!(case.title));
        let optional = [
            ("sProject", &case.project),
            ("sArea", &case.area),
            ("sPersonAssignedTo", &case.assignee),
            ("sPriority", &case.priority),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                params.insert(key.to_string(), json!(value));
            }
        }
        if !case.description.is_empty() {
            params.insert("sEvent".to_string(), json!(case.description));
        }
        params.insert("cols".to_string(), json!(["ixBug"]));

        let data = self.call("new", "new", params)?;
        let raw: RawCase = serde_json::from_value(data.get("case").cloned().unwrap_or_default())?;
        let id = raw
            .ix_bug
            .filter(|n| *n > 0)
            .map(CaseId)
            .ok_or_else(|| Error::Other("new: the service returned no case id".to_string()))?;
        info!(%id, title = %case.title, "Created case");
        self.fetch(id)
    }

    fn permalink(&self, id: CaseId) -> Option<String> {
        Some(format!("{}f/cases/{id}", self.base_url))
    }
}

// ── Wire types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Value,
}

impl Envelope {
    fn into_data(self, operation: &str) -> Result<Value> {
        let Some(first) = self.errors.into_iter().next() else {
            return Ok(self.data);
        };
        let code = match &first.code {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if code == NOT_LOGGED_ON {
            return Err(Error::NotLoggedIn);
        }
        debug!(operation, code = %code, message = %first.message, "Service error");
        Err(Error::Other(first.message))
    }
}

/// Number that the service sometimes sends as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Loose {
    Number(u64),
    Text(String),
}

impl Loose {
    fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_string(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// Id list sent either as an array or as `"1,2,3"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdList {
    Array(Vec<Loose>),
    Text(String),
}

impl IdList {
    fn ids(&self) -> Vec<CaseId> {
        match self {
            Self::Array(items) => items
                .iter()
                .filter_map(Loose::as_u64)
                .filter(|n| *n > 0)
                .map(CaseId)
                .collect(),
            Self::Text(s) => parse_id_list(s),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "sPerson", default)]
    person: String,
    #[serde(rename = "dt", default)]
    timestamp: Option<String>,
    #[serde(rename = "evtDescription", default)]
    description: String,
    #[serde(rename = "s", default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCase {
    #[serde(rename = "ixBug", default, deserialize_with = "loose_u64")]
    ix_bug: Option<u64>,
    #[serde(rename = "sTitle", default)]
    title: Option<String>,
    #[serde(rename = "sStatus", default)]
    status: Option<String>,
    #[serde(rename = "sPersonAssignedTo", default)]
    assignee: Option<String>,
    #[serde(rename = "sProject", default)]
    project: Option<String>,
    #[serde(rename = "sArea", default)]
    area: Option<String>,
    #[serde(rename = "ixPersonOpenedBy", default, deserialize_with = "loose_u64")]
    ix_person_opened_by: Option<u64>,
    #[serde(rename = "ixBugParent", default, deserialize_with = "loose_u64")]
    parent: Option<u64>,
    #[serde(rename = "ixBugChildren", default)]
    children: Option<IdList>,
    #[serde(rename = "ixRelatedBugs", default)]
    related: Option<IdList>,
    #[serde(rename = "ixBugDuplicates", default)]
    duplicates: Option<IdList>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(rename = "ixBugEventLatest", default)]
    latest_event: Option<Loose>,
    #[serde(rename = "dtLastUpdated", default)]
    last_updated: Option<String>,
    #[serde(default)]
    events: Vec<RawEvent>,
}

fn loose_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Loose>::deserialize(deserializer)?.and_then(|l| l.as_u64()))
}

fn parse_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl RawCase {
    fn into_snapshot(self) -> Option<CaseSnapshot> {
        let id = CaseId(self.ix_bug.filter(|n| *n > 0)?);
        let mut snapshot = CaseSnapshot::new(id, self.title.unwrap_or_default());

        if let Some(label) = self.status {
            snapshot.status = CaseStatus::from_remote(&label);
            snapshot.status_label = label;
        }
        snapshot.revision = Revision(self.latest_event.map(|l| l.as_string()).unwrap_or_default());
        snapshot.assignee = non_empty(self.assignee);
        snapshot.project = non_empty(self.project);
        snapshot.area = non_empty(self.area);
        snapshot.parent = self.parent.filter(|n| *n > 0).map(CaseId);
        snapshot.children = self.children.map(|l| l.ids()).unwrap_or_default();
        snapshot.related = self.related.map(|l| l.ids()).unwrap_or_default();
        snapshot.duplicates = self.duplicates.map(|l| l.ids()).unwrap_or_default();
        snapshot.tags = self.tags;
        snapshot.last_modified = parse_time(self.last_updated.as_deref());
        snapshot.comments = self
            .events
            .into_iter()
            .map(|e| Comment {
                author: e.person,
                timestamp: parse_time(e.timestamp.as_deref()),
                description: e.description,
                body: e.body.unwrap_or_default(),
            })
            .collect();
        Some(snapshot)
    }
}

#[derive(Debug, Deserialize)]
struct RawPerson {
    #[serde(rename = "ixPerson", default, deserialize_with = "loose_u64")]
    id: Option<u64>,
    #[serde(rename = "sFullName", default)]
    full_name: String,
    #[serde(rename = "sEmail", default)]
    email: String,
}

impl From<RawPerson> for Person {
    fn from(raw: RawPerson) -> Self {
        Self {
            id: raw.id.unwrap_or_default(),
            full_name: raw.full_name,
            email: raw.email,
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────

fn transport_error(operation: &str, e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::transient(operation, "request timed out")
    } else if e.is_decode() {
        Error::Other(format!("{operation}: unreadable response: {e}"))
    } else {
        Error::transient(operation, e)
    }
}

/// A rejected edit on a case that changed underneath us is a conflict.
fn conflict_or(error: Error, id: CaseId) -> Error {
    match error {
        Error::Other(message) if is_conflict_message(&message) => Error::Conflict {
            id,
            revision: "newer".to_string(),
        },
        other => other,
    }
}

/// Send each step of a status plan in order.
///
/// A failure after the first step leaves the case partly changed on the
/// server, so it is reported as `StatusUnknown`.
fn run_plan(
    id: CaseId,
    commands: &[&str],
    mut send: impl FnMut(usize, &str) -> Result<()>,
) -> Result<()> {
    for (step, command) in commands.iter().enumerate() {
        send(step, command).map_err(|e| {
            if step == 0 {
                conflict_or(e, id)
            } else {
                warn!(%id, command, error = %e, "Status change applied in part");
                Error::StatusUnknown {
                    operation: "update".to_string(),
                    id,
                }
            }
        })?;
        debug!(%id, command, "Applied");
    }
    Ok(())
}

fn is_conflict_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["has been edited", "has changed", "modified since", "ixbugeventlatest"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn parse_id_list(raw: &str) -> Vec<CaseId> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
        .map(CaseId)
        .collect()
}

fn join_ids(ids: &[CaseId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

/// Commands needed to move a case from `from` to `to`. Plain edits use `edit`.
fn status_commands(from: CaseStatus, to: Option<CaseStatus>) -> Vec<&'static str> {
    use CaseStatus::{Closed, Open, Resolved};
    match (from, to) {
        (Open, Some(Resolved)) => vec!["resolve"],
        (Open, Some(Closed)) => vec!["resolve", "close"],
        (Resolved, Some(Closed)) => vec!["close"],
        (Resolved, Some(Open)) => vec!["reactivate"],
        (Closed, Some(Open)) => vec!["reopen"],
        (Closed, Some(Resolved)) => vec!["reopen", "resolve"],
        _ => vec!["edit"],
    }
}

fn edit_params(changes: &FieldChanges) -> Map<String, Value> {
    let mut params = Map::new();
    for (field, value) in changes {
        let key = match field {
            Field::Title => "sTitle",
            Field::Assignee => "sPersonAssignedTo",
            Field::Project => "sProject",
            Field::Area => "sArea",
            Field::Status => continue,
        };
        params.insert(key.to_string(), json!(value.to_string()));
    }
    params
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', ""))
}

/// Translate a parsed query into the service's search syntax.
///
/// Sorting is applied locally and is not sent.
fn remote_query(query: &Query) -> String {
    remote_expr(&query.filter)
}

fn remote_expr(expr: &Expr) -> String {
    match expr {
        Expr::Text(text) => quote(text),
        Expr::Match(p) => {
            let axis = match p.field {
                QueryField::Id => "ixbug",
                QueryField::Title => "title",
                QueryField::Status => "status",
                QueryField::Assignee => "assignedto",
                QueryField::Project => "project",
                QueryField::Area => "area",
                QueryField::OpenedBy => "openedby",
                QueryField::Tag => "tag",
                QueryField::Parent => "parent",
            };
            match (p.field, p.op) {
                (QueryField::Id | QueryField::Parent, _) => format!("{axis}:{}", p.value),
                (_, MatchOp::Equals | MatchOp::Contains) => format!("{axis}:{}", quote(&p.value)),
            }
        }
        Expr::Not(inner) => format!("-({})", remote_expr(inner)),
        Expr::And(items) => items
            .iter()
            .map(|item| match item {
                Expr::Or(_) => format!("({})", remote_expr(item)),
                other => remote_expr(other),
            })
            .collect::<Vec<_>>()
            .join(" "),
        Expr::Or(items) => items.iter().map(remote_expr).collect::<Vec<_>>().join(" OR "),
    }
}
