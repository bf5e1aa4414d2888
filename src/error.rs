//! Error types for the fb shell.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=auth, 3=not_found, 4=input, etc.)
//! - Retryability flags (only transient read failures are retried)
//! - Context-aware recovery hints shown under the one-line message

use crate::model::CaseId;
use thiserror::Error;

/// Result type alias for fb operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Authentication (exit 2)
    AuthConfigError,
    AuthError,
    NotLoggedIn,

    // Not Found (exit 3)
    CaseNotFound,
    NoCurrentCase,

    // Input (exit 4)
    QuerySyntax,
    InvalidArgument,
    InvalidField,
    InvalidValue,
    UnknownCommand,
    AmbiguousCommand,
    TooManyResults,
    Aborted,

    // Remote state (exit 5)
    Conflict,
    UnflushedChanges,
    PartialFlush,
    CommandExists,

    // Network (exit 6)
    TransientError,
    StatusUnknown,
    Cancelled,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::AuthConfigError => "AUTH_CONFIG_ERROR",
            Self::AuthError => "AUTH_ERROR",
            Self::NotLoggedIn => "NOT_LOGGED_IN",
            Self::CaseNotFound => "CASE_NOT_FOUND",
            Self::NoCurrentCase => "NO_CURRENT_CASE",
            Self::QuerySyntax => "QUERY_SYNTAX",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::InvalidField => "INVALID_FIELD",
            Self::InvalidValue => "INVALID_VALUE",
            Self::UnknownCommand => "UNKNOWN_COMMAND",
            Self::AmbiguousCommand => "AMBIGUOUS_COMMAND",
            Self::TooManyResults => "TOO_MANY_RESULTS",
            Self::Aborted => "ABORTED",
            Self::Conflict => "CONFLICT",
            Self::UnflushedChanges => "UNFLUSHED_CHANGES",
            Self::PartialFlush => "PARTIAL_FLUSH",
            Self::CommandExists => "COMMAND_EXISTS",
            Self::TransientError => "TRANSIENT_ERROR",
            Self::StatusUnknown => "STATUS_UNKNOWN",
            Self::Cancelled => "CANCELLED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::AuthConfigError | Self::AuthError | Self::NotLoggedIn => 2,
            Self::CaseNotFound | Self::NoCurrentCase => 3,
            Self::QuerySyntax
            | Self::InvalidArgument
            | Self::InvalidField
            | Self::InvalidValue
            | Self::UnknownCommand
            | Self::AmbiguousCommand
            | Self::TooManyResults
            | Self::Aborted => 4,
            Self::Conflict | Self::UnflushedChanges | Self::PartialFlush | Self::CommandExists => {
                5
            }
            Self::TransientError | Self::StatusUnknown | Self::Cancelled => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether the remote client may retry the failed call automatically.
    ///
    /// Only transient network faults qualify, and callers must still
    /// restrict retries to idempotent reads.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientError)
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in fb operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication is not configured: {0}")]
    AuthConfig(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Case not found: {id}")]
    NotFound { id: CaseId },

    #[error("No current case")]
    NoCurrentCase,

    #[error("Case {id} changed on the server since it was fetched (revision {revision})")]
    Conflict { id: CaseId, revision: String },

    #[error("Case {id} has unflushed changes")]
    UnflushedChanges { id: CaseId },

    #[error("{} of {total} cases not flushed:\n{report}", .failed.len())]
    PartialFlush {
        report: String,
        failed: Vec<CaseId>,
        total: usize,
    },

    #[error("{operation} failed: {message}")]
    Transient { operation: String, message: String },

    #[error("{operation} on case {id} did not complete: status unknown")]
    StatusUnknown { operation: String, id: CaseId },

    #[error("Creating case '{title}' did not complete: status unknown")]
    CreateUnknown { title: String },

    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("Query syntax error at position {position} near '{token}': {message}")]
    QuerySyntax {
        token: String,
        position: usize,
        message: String,
    },

    #[error("Query matched {count} cases, more than the limit of {limit}")]
    TooManyResults {
        count: usize,
        limit: usize,
        suggestion: String,
    },

    #[error("Invalid argument '{argument}' for '{command}': expected {expected}")]
    Argument {
        command: String,
        argument: String,
        expected: String,
    },

    #[error("Unknown command: {name}")]
    UnknownCommand { name: String, similar: Vec<String> },

    #[error("Ambiguous command '{input}': could be {}", .candidates.join(", "))]
    AmbiguousCommand {
        input: String,
        candidates: Vec<String>,
    },

    #[error("Command already registered: {name}")]
    CommandExists { name: String },

    #[error("Unknown field: {field}")]
    InvalidField {
        field: String,
        suggestion: Option<String>,
    },

    #[error("Invalid value '{value}' for {field}")]
    InvalidValue {
        field: String,
        value: String,
        suggestion: Option<String>,
    },

    #[error("Aborted")]
    Aborted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::AuthConfig(_) => ErrorCode::AuthConfigError,
            Self::Auth(_) => ErrorCode::AuthError,
            Self::NotLoggedIn => ErrorCode::NotLoggedIn,
            Self::NotFound { .. } => ErrorCode::CaseNotFound,
            Self::NoCurrentCase => ErrorCode::NoCurrentCase,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::UnflushedChanges { .. } => ErrorCode::UnflushedChanges,
            Self::PartialFlush { .. } => ErrorCode::PartialFlush,
            Self::Transient { .. } => ErrorCode::TransientError,
            Self::StatusUnknown { .. } | Self::CreateUnknown { .. } => ErrorCode::StatusUnknown,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
            Self::QuerySyntax { .. } => ErrorCode::QuerySyntax,
            Self::TooManyResults { .. } => ErrorCode::TooManyResults,
            Self::Argument { .. } => ErrorCode::InvalidArgument,
            Self::UnknownCommand { .. } => ErrorCode::UnknownCommand,
            Self::AmbiguousCommand { .. } => ErrorCode::AmbiguousCommand,
            Self::CommandExists { .. } => ErrorCode::CommandExists,
            Self::InvalidField { .. } => ErrorCode::InvalidField,
            Self::InvalidValue { .. } => ErrorCode::InvalidValue,
            Self::Aborted => ErrorCode::Aborted,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Shorthand for a transient network failure.
    pub fn transient(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Rewrite a network failure on a write into `StatusUnknown`.
    ///
    /// A write that timed out or was interrupted may still have been
    /// applied by the server, so it must not be reported as failed.
    #[must_use]
    pub fn into_write_error(self, operation: &str, id: CaseId) -> Self {
        match self {
            Self::Transient { .. } | Self::Cancelled { .. } => Self::StatusUnknown {
                operation: operation.to_string(),
                id,
            },
            other => other,
        }
    }

    /// Rewrite a network failure while creating a case into `CreateUnknown`.
    #[must_use]
    pub fn into_create_error(self, title: &str) -> Self {
        match self {
            Self::Transient { .. } | Self::Cancelled { .. } => Self::CreateUnknown {
                title: title.to_string(),
            },
            other => other,
        }
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::AuthConfig(_) => Some(
                "Set $FBURL and $FBUSER, plus $FBTOKEN (required for 2-factor accounts) \
                 or $FBPASS"
                    .to_string(),
            ),
            Self::Auth(_) | Self::NotLoggedIn => {
                Some("Run `logon` to enter credentials again".to_string())
            }
            Self::NotFound { id } => Some(format!(
                "No case {id} is visible to you. Use `search` to find cases."
            )),
            Self::NoCurrentCase => Some("Pick a case first: `show <id>` or `search`".to_string()),
            Self::Conflict { id, .. } => Some(format!(
                "Run `refresh {id}` after `discard {id}`, then re-apply your changes"
            )),
            Self::UnflushedChanges { id } => {
                Some(format!("Run `flush {id}` or `discard {id}` first"))
            }
            Self::PartialFlush { failed, .. } => {
                let ids: Vec<String> = failed.iter().map(ToString::to_string).collect();
                Some(format!(
                    "Changes to case {} are still staged; see `pending`",
                    ids.join(", ")
                ))
            }
            Self::CreateUnknown { title } => Some(format!(
                "The case may exist already. Run `search title~\"{title}\"` before trying again."
            )),
            Self::StatusUnknown { id, .. } => Some(format!(
                "The server may or may not have applied it. Run `discard {id}` then \
                 `refresh {id}` to check."
            )),
            Self::TooManyResults { suggestion, .. } => Some(suggestion.clone()),
            Self::UnknownCommand { similar, .. } => {
                if similar.is_empty() {
                    Some("Type `help` for the list of commands".to_string())
                } else {
                    Some(format!("Did you mean: {}?", similar.join(", ")))
                }
            }
            Self::InvalidField { suggestion, .. } => Some(match suggestion {
                Some(s) => format!("Did you mean '{s}'? Editable: title, status, assignee, project, area"),
                None => "Editable fields: title, status, assignee, project, area".to_string(),
            }),
            Self::InvalidValue {
                field, suggestion, ..
            } => {
                if let Some(s) = suggestion {
                    Some(format!("Did you mean '{s}'?"))
                } else if field == "status" {
                    Some(
                        "Valid statuses: open, resolved, closed. \
                         Synonyms: active→open, fixed→resolved, done→closed"
                            .to_string(),
                    )
                } else {
                    None
                }
            }
            Self::QuerySyntax { .. } => Some(
                "Filters look like: status=open assignee:\"Jane Doe\" OR title~crash sort:-id"
                    .to_string(),
            ),
            Self::Argument { command, .. } => Some(format!("See `help {command}`")),
            Self::CommandExists { .. }
            | Self::AmbiguousCommand { .. }
            | Self::Transient { .. }
            | Self::Cancelled { .. }
            | Self::Aborted
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => None,
        }
    }
}
