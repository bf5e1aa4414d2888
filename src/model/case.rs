//! Case model.
//!
//! A `Case` pairs the last snapshot received from the service with the
//! field changes staged locally. Staged changes only reach the service
//! through [`Case::flush`]; comments are sent immediately.

use crate::client::CaseClient;
use crate::error::{Error, Result};
use crate::validate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Identifier of a case. Positive and stable for the record's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub u64);

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CaseId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('#');
        match trimmed.parse::<u64>() {
            Ok(n) if n > 0 => Ok(Self(n)),
            _ => Err(Error::InvalidValue {
                field: "case id".to_string(),
                value: s.to_string(),
                suggestion: None,
            }),
        }
    }
}

/// Server-supplied marker used to detect concurrent modification.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub String);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Case status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Open,
    Resolved,
    Closed,
}

impl CaseStatus {
    /// Get the canonical string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// Parse a status, accepting synonyms such as `active` or `fixed`.
    pub fn parse(input: &str) -> Result<Self> {
        let canonical = validate::normalize_status(input).map_err(|(value, suggestion)| {
            Error::InvalidValue {
                field: "status".to_string(),
                value,
                suggestion,
            }
        })?;
        Ok(Self::from_canonical(&canonical))
    }

    /// Map the service's status label (`Resolved (Fixed)`, ...) to a status.
    #[must_use]
    pub fn from_remote(label: &str) -> Self {
        Self::from_canonical(validate::status_from_remote(label))
    }

    fn from_canonical(s: &str) -> Self {
        match s {
            "resolved" => Self::Resolved,
            "closed" => Self::Closed,
            _ => Self::Open,
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields that may be staged and flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Title,
    Status,
    Assignee,
    Project,
    Area,
}

impl Field {
    pub const ALL: [Self; 5] = [
        Self::Title,
        Self::Status,
        Self::Assignee,
        Self::Project,
        Self::Area,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Status => "status",
            Self::Assignee => "assignee",
            Self::Project => "project",
            Self::Area => "area",
        }
    }

    /// Validate a raw value against this field's type.
    pub fn parse_value(self, raw: &str) -> Result<FieldValue> {
        if self == Self::Status {
            return CaseStatus::parse(raw).map(FieldValue::Status);
        }

        let value = raw.trim();
        if value.is_empty() {
            return Err(Error::InvalidValue {
                field: self.as_str().to_string(),
                value: raw.to_string(),
                suggestion: None,
            });
        }
        Ok(FieldValue::Text(value.to_string()))
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let canonical = validate::normalize_field(s)
            .map_err(|(field, suggestion)| Error::InvalidField { field, suggestion })?;
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == canonical)
            .ok_or_else(|| Error::InvalidField {
                field: s.to_string(),
                suggestion: None,
            })
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated value for a [`Field`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Status(CaseStatus),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(s) => f.write_str(s.as_str()),
            Self::Text(t) => f.write_str(t),
        }
    }
}

/// Staged field changes, ordered by field for deterministic updates.
pub type FieldChanges = BTreeMap<Field, FieldValue>;

/// A comment entry on a case. Entries are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Event description from the service, e.g. "Resolved by Jane".
    pub description: String,
    pub body: String,
}

/// A user of the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: u64,
    pub full_name: String,
    pub email: String,
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.full_name, self.email)
    }
}

/// The state of a case as last reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSnapshot {
    pub id: CaseId,
    pub revision: Revision,
    pub title: String,
    pub status: CaseStatus,
    /// Raw status label from the service, e.g. "Resolved (Fixed)"
    pub status_label: String,
    pub assignee: Option<String>,
    pub project: Option<String>,
    pub area: Option<String>,
    pub opened_by: Option<String>,
    pub parent: Option<CaseId>,
    pub children: Vec<CaseId>,
    pub related: Vec<CaseId>,
    pub duplicates: Vec<CaseId>,
    pub tags: Vec<String>,
    pub comments: Vec<Comment>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl CaseSnapshot {
    /// Create a minimal open snapshot.
    pub fn new(id: CaseId, title: impl Into<String>) -> Self {
        Self {
            id,
            revision: Revision::default(),
            title: title.into(),
            status: CaseStatus::Open,
            status_label: "Active".to_string(),
            assignee: None,
            project: None,
            area: None,
            opened_by: None,
            parent: None,
            children: Vec::new(),
            related: Vec::new(),
            duplicates: Vec::new(),
            tags: Vec::new(),
            comments: Vec::new(),
            last_modified: None,
        }
    }

    /// Current value of an editable field.
    #[must_use]
    pub fn value(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::Title => Some(FieldValue::Text(self.title.clone())),
            Field::Status => Some(FieldValue::Status(self.status)),
            Field::Assignee => self.assignee.clone().map(FieldValue::Text),
            Field::Project => self.project.clone().map(FieldValue::Text),
            Field::Area => self.area.clone().map(FieldValue::Text),
        }
    }
}

/// Fields for a case that does not exist on the server yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCase {
    pub title: String,
    pub project: Option<String>,
    pub area: Option<String>,
    pub assignee: Option<String>,
    pub priority: Option<String>,
    pub description: String,
}

impl NewCase {
    /// Editor form: header lines, a blank line, then the description.
    #[must_use]
    pub fn form(assignee: Option<&str>) -> String {
        format!(
            "Title: \nProject: \nArea: \nAssign to: {}\nPriority: \n\n",
            assignee.unwrap_or_default()
        )
    }

    /// Parse a filled-in [`form`](Self::form). Headers end at the first blank line.
    pub fn from_form(text: &str) -> Result<Self> {
        let mut case = Self::default();
        let mut lines = text.lines();

        for line in lines.by_ref() {
            if line.trim().is_empty() {
                break;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(bad_header(line));
            };
            let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            match key.trim().to_lowercase().as_str() {
                "title" => case.title = value.unwrap_or_default(),
                "project" => case.project = value,
                "area" => case.area = value,
                "assign to" | "assignee" => case.assignee = value,
                "priority" => case.priority = value,
                _ => return Err(bad_header(line)),
            }
        }

        case.description = lines.collect::<Vec<_>>().join("\n").trim().to_string();
        if case.title.is_empty() {
            return Err(Error::InvalidValue {
                field: "title".to_string(),
                value: String::new(),
                suggestion: None,
            });
        }
        Ok(case)
    }
}

fn bad_header(line: &str) -> Error {
    Error::Argument {
        command: "new".to_string(),
        argument: line.trim().to_string(),
        expected: "Title, Project, Area, Assign to or Priority before the first blank line"
            .to_string(),
    }
}

/// A tracked case: server snapshot plus locally staged changes.
#[derive(Debug, Clone)]
pub struct Case {
    snapshot: CaseSnapshot,
    staged: FieldChanges,
}

impl Case {
    #[must_use]
    pub fn new(snapshot: CaseSnapshot) -> Self {
        Self {
            snapshot,
            staged: FieldChanges::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> CaseId {
        self.snapshot.id
    }

    #[must_use]
    pub fn snapshot(&self) -> &CaseSnapshot {
        &self.snapshot
    }

    #[must_use]
    pub fn staged(&self) -> &FieldChanges {
        &self.staged
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Value of `field` as it will be after a flush.
    #[must_use]
    pub fn effective(&self, field: Field) -> Option<FieldValue> {
        self.staged
            .get(&field)
            .cloned()
            .or_else(|| self.snapshot.value(field))
    }

    /// Validate and stage a change given as raw text.
    ///
    /// Does not contact the service.
    pub fn apply(&mut self, field: &str, value: &str) -> Result<()> {
        let field: Field = field.parse()?;
        let value = field.parse_value(value)?;
        self.stage(field, value);
        Ok(())
    }

    /// Stage an already-validated change.
    ///
    /// A value equal to the server's drops any change staged for `field`.
    pub fn stage(&mut self, field: Field, value: FieldValue) {
        if self.snapshot.value(field).as_ref() == Some(&value) {
            if self.staged.remove(&field).is_some() {
                debug!(id = %self.id(), %field, "Change reverted to server value");
            }
            return;
        }
        debug!(id = %self.id(), %field, %value, "Staging change");
        self.staged.insert(field, value);
    }

    /// Drop all staged changes, returning them.
    pub fn discard(&mut self) -> FieldChanges {
        std::mem::take(&mut self.staged)
    }

    /// Replace the snapshot with a newer one from the service.
    ///
    /// Refused while changes are staged: the staged changes were made
    /// against the current revision and must be flushed or discarded first.
    pub fn refresh(&mut self, snapshot: CaseSnapshot) -> Result<()> {
        if self.is_dirty() {
            return Err(Error::UnflushedChanges { id: self.id() });
        }
        debug_assert_eq!(snapshot.id, self.snapshot.id);
        self.snapshot = snapshot;
        Ok(())
    }

    /// Send all staged changes as one update.
    ///
    /// Returns `false` when nothing was staged. On any error the staged
    /// changes are kept; a timeout or interruption is reported as
    /// `StatusUnknown` because the server may have applied the update.
    pub fn flush(&mut self, client: &dyn CaseClient) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }

        let id = self.id();
        let updated = client
            .update(id, &self.snapshot.revision, &self.staged)
            .map_err(|e| e.into_write_error("update", id))?;

        info!(%id, changes = self.staged.len(), revision = %updated.revision, "Flushed case");
        self.staged.clear();
        self.snapshot = updated;
        Ok(true)
    }

    /// Append a comment. Sent immediately; comments are never staged.
    pub fn add_comment(&self, client: &dyn CaseClient, text: &str) -> Result<()> {
        let id = self.id();
        client
            .comment(id, text)
            .map_err(|e| e.into_write_error("comment", id))?;
        info!(%id, "Comment added");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::MockClient;

    fn case_101() -> Case {
        let mut snapshot = CaseSnapshot::new(CaseId(101), "Build fails");
        snapshot.revision = Revision("7".into());
        Case::new(snapshot)
    }

    #[test]
    fn test_case_id_parsing() {
        assert_eq!("101".parse::<CaseId>().unwrap(), CaseId(101));
        assert_eq!("#42".parse::<CaseId>().unwrap(), CaseId(42));
        assert!("0".parse::<CaseId>().is_err());
        assert!("abc".parse::<CaseId>().is_err());
        assert!("-3".parse::<CaseId>().is_err());
    }

    #[test]
    fn test_apply_stages_without_network() {
        let client = MockClient::new();
        let mut case = case_101();

        case.apply("status", "fixed").unwrap();
        case.apply("assignedto", "Jane Doe").unwrap();

        assert!(case.is_dirty());
        assert_eq!(
            case.staged().get(&Field::Status),
            Some(&FieldValue::Status(CaseStatus::Resolved))
        );
        assert_eq!(
            case.effective(Field::Assignee),
            Some(FieldValue::Text("Jane Doe".into()))
        );
        assert_eq!(client.total_calls(), 0);
    }

    #[test]
    fn test_apply_rejects_unknown_field_and_bad_value() {
        let mut case = case_101();

        let err = case.apply("id", "5").unwrap_err();
        assert!(matches!(err, Error::InvalidField { .. }));

        let err = case.apply("status", "sideways").unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));

        let err = case.apply("title", "   ").unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));

        assert!(!case.is_dirty());
    }

    #[test]
    fn test_flush_sends_exactly_staged_changes() {
        let client = MockClient::new();
        client.put(CaseSnapshot::new(CaseId(101), "Build fails"));
        let mut case = case_101();

        case.apply("status", "resolved").unwrap();
        case.apply("title", "Build fails on ARM").unwrap();
        assert!(case.flush(&client).unwrap());

        let updates = client.updates();
        assert_eq!(updates.len(), 1);
        let (id, revision, changes) = &updates[0];
        assert_eq!(*id, CaseId(101));
        assert_eq!(revision, &Revision("7".into()));
        assert_eq!(changes.len(), 2);
        assert_eq!(
            changes.get(&Field::Status),
            Some(&FieldValue::Status(CaseStatus::Resolved))
        );
        assert_eq!(
            changes.get(&Field::Title),
            Some(&FieldValue::Text("Build fails on ARM".into()))
        );

        assert!(!case.is_dirty());
        assert_eq!(case.snapshot().status, CaseStatus::Resolved);
        assert_eq!(case.snapshot().title, "Build fails on ARM");
    }

    #[test]
    fn test_flush_without_changes_is_noop() {
        let client = MockClient::new();
        let mut case = case_101();
        assert!(!case.flush(&client).unwrap());
        assert_eq!(client.total_calls(), 0);
    }

    #[test]
    fn test_conflict_keeps_staged_changes() {
        let client = MockClient::new();
        client.fail_next_update(Error::Conflict {
            id: CaseId(101),
            revision: "7".into(),
        });
        let mut case = case_101();
        case.apply("status", "resolved").unwrap();

        let err = case.flush(&client).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert!(case.is_dirty());
        assert_eq!(case.staged().len(), 1);
        assert_eq!(case.snapshot().status, CaseStatus::Open);
    }

    #[test]
    fn test_timed_out_flush_reports_status_unknown_once() {
        let client = MockClient::new();
        client.fail_next_update(Error::transient("update", "operation timed out"));
        let mut case = case_101();
        case.apply("status", "resolved").unwrap();

        let err = case.flush(&client).unwrap_err();
        assert!(matches!(err, Error::StatusUnknown { .. }));
        assert!(err.to_string().contains("status unknown"));
        assert_eq!(client.update_calls(), 1);
        assert!(case.is_dirty());
    }

    #[test]
    fn test_refresh_refused_while_dirty() {
        let mut case = case_101();
        case.apply("area", "Backend").unwrap();

        let err = case
            .refresh(CaseSnapshot::new(CaseId(101), "changed"))
            .unwrap_err();
        assert!(matches!(err, Error::UnflushedChanges { .. }));

        let staged = case.discard();
        assert_eq!(staged.len(), 1);
        case.refresh(CaseSnapshot::new(CaseId(101), "changed")).unwrap();
        assert_eq!(case.snapshot().title, "changed");
    }

    #[test]
    fn test_staging_server_value_unstages_field() {
        let client = MockClient::new();
        let mut case = case_101();

        case.apply("status", "resolved").unwrap();
        case.apply("status", "open").unwrap();
        assert!(!case.is_dirty());

        case.apply("title", "Build fails").unwrap();
        assert!(!case.is_dirty());

        case.apply("title", "Build fails on ARM").unwrap();
        case.apply("area", "Backend").unwrap();
        case.apply("title", "Build fails").unwrap();
        assert_eq!(case.staged().keys().collect::<Vec<_>>(), vec![&Field::Area]);

        case.discard();
        assert!(!case.flush(&client).unwrap());
        assert_eq!(client.update_calls(), 0);
    }

    #[test]
    fn test_new_case_form_round_trip() {
        let form = NewCase::form(Some("Jane Doe"));
        let filled = form.replace("Title: ", "Title: Crash on save").replace("Project: ", "Project: Web")
            + "Steps:\n1. open a file\n2. save";

        let case = NewCase::from_form(&filled).unwrap();
        assert_eq!(case.title, "Crash on save");
        assert_eq!(case.project.as_deref(), Some("Web"));
        assert_eq!(case.area, None);
        assert_eq!(case.assignee.as_deref(), Some("Jane Doe"));
        assert_eq!(case.priority, None);
        assert_eq!(case.description, "Steps:\n1. open a file\n2. save");
    }

    #[test]
    fn test_new_case_form_needs_title_and_known_headers() {
        let err = NewCase::from_form(&NewCase::form(None)).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { ref field, .. } if field == "title"));

        let err = NewCase::from_form("Title: Crash\nSeverity: high\n\nbody").unwrap_err();
        assert!(matches!(err, Error::Argument { .. }));

        let case = NewCase::from_form("Title: Crash: on save").unwrap();
        assert_eq!(case.title, "Crash: on save");
        assert!(case.description.is_empty());
    }

    #[test]
    fn test_comment_is_immediate_and_not_retried() {
        let client = MockClient::new();
        let case = case_101();
        case.add_comment(&client, "looking into it").unwrap();
        assert_eq!(client.comments(), vec![(CaseId(101), "looking into it".to_string())]);

        client.fail_next_comment(Error::transient("comment", "timed out"));
        let err = case.add_comment(&client, "again").unwrap_err();
        assert!(matches!(err, Error::StatusUnknown { .. }));
        assert_eq!(client.comment_calls(), 2);
    }
}
