//! Composing longer text in the user's `$EDITOR`.

use crate::error::{Error, Result};
use std::io::Write;
use std::process::Command;
use tracing::debug;

const COMMENT_CHAR: char = '#';

/// Footer appended to every template.
pub const FOOTER: &str = "# Lines starting with \"#\" will be ignored.\n\
                          # Leave this file empty to abort.\n";

/// Source of composed text.
pub trait Compose {
    /// Let the user edit `template`; `Error::Aborted` when nothing is left.
    fn compose(&self, template: &str) -> Result<String>;
}

/// Runs `$VISUAL`, `$EDITOR` or `vi` on a temporary file.
pub struct ExternalEditor {
    command: String,
}

impl ExternalEditor {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        let command = ["VISUAL", "EDITOR"]
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| "vi".to_string());
        Self::new(command)
    }
}

impl Compose for ExternalEditor {
    fn compose(&self, template: &str) -> Result<String> {
        let mut file = tempfile::Builder::new()
            .prefix("fb-")
            .suffix(".txt")
            .tempfile()?;
        file.write_all(template.as_bytes())?;
        file.write_all(FOOTER.as_bytes())?;
        file.flush()?;

        let mut words = self.command.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| Error::Config("Editor command is empty".to_string()))?;
        debug!(editor = %self.command, path = %file.path().display(), "Launching editor");

        let status = Command::new(program).args(words).arg(file.path()).status()?;
        if !status.success() {
            return Err(Error::Other(format!("Editor exited with {status}")));
        }

        let text = std::fs::read_to_string(file.path())?;
        non_empty(strip_comments(&text))
    }
}

/// Drop comment lines and surrounding blank lines.
#[must_use]
pub fn strip_comments(text: &str) -> String {
    text.lines()
        .filter(|line| !line.starts_with(COMMENT_CHAR))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn non_empty(text: String) -> Result<String> {
    if text.is_empty() { Err(Error::Aborted) } else { Ok(text) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments() {
        let text = "\n# header\nFixed in r12.\n\nSee logs.\n# Lines starting with...\n";
        assert_eq!(strip_comments(text), "Fixed in r12.\n\nSee logs.");
    }

    #[test]
    fn test_only_comments_aborts() {
        assert!(matches!(non_empty(strip_comments(FOOTER)), Err(Error::Aborted)));
    }

    #[cfg(unix)]
    #[test]
    fn test_editor_that_writes_nothing_aborts() {
        // `true` leaves the template untouched: only comments remain
        let editor = ExternalEditor::new("true");
        assert!(matches!(editor.compose("# Comment on case 1\n"), Err(Error::Aborted)));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_editor_is_error() {
        let editor = ExternalEditor::new("false");
        assert!(matches!(editor.compose(""), Err(Error::Other(_))));
    }
}
