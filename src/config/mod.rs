//! Configuration management.
//!
//! Settings live in `~/.fbcli/config.json` (or `$FBCLI_HOME/config.json`).
//! Credentials are resolved at startup from, in order:
//! 1. Environment: `FBURL`, `FBUSER`, `FBTOKEN`, `FBPASS`, `FB2FA`
//! 2. The config file (`endpoint`, `username`, `two_factor`)
//! 3. Interactive prompts, only when stdin is a terminal
//!
//! Secrets are never written to the config file.

use crate::cache::CacheSettings;
use crate::client::RetryPolicy;
use crate::error::{Error, Result};
use crate::query::QuerySettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Persistent settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service base URL, e.g. `https://example.fogbugz.com/`.
    pub endpoint: Option<String>,
    pub username: Option<String>,
    /// The account uses 2-factor authentication and must log on with a token.
    pub two_factor: bool,
    pub request_timeout_secs: u64,
    pub cache: CacheSettings,
    pub query: QuerySettings,
    pub retry: RetryPolicy,
    pub saved_searches: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            username: None,
            two_factor: false,
            request_timeout_secs: 30,
            cache: CacheSettings::default(),
            query: QuerySettings::default(),
            retry: RetryPolicy::default(),
            saved_searches: BTreeMap::new(),
        }
    }
}

impl Config {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Cache settings with room for a full result set.
    ///
    /// Search results are inserted into the cache, so a capacity below
    /// `query.max_results` is raised to it.
    #[must_use]
    pub fn cache_settings(&self) -> CacheSettings {
        let mut settings = self.cache;
        if settings.capacity < self.query.max_results {
            warn!(
                capacity = settings.capacity,
                max_results = self.query.max_results,
                "Cache capacity is below the search result limit; raising it"
            );
            settings.capacity = self.query.max_results;
        }
        settings
    }
}

/// Directory holding the config file and line-editor history.
///
/// `$FBCLI_HOME` overrides the default `~/.fbcli`.
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("FBCLI_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    directories::BaseDirs::new().map(|b| b.home_dir().join(".fbcli"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.json"))
}

#[must_use]
pub fn history_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("history"))
}

/// Load settings from the default location; a missing file yields defaults.
pub fn load_config() -> Result<Config> {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => Ok(Config::default()),
    }
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Write settings atomically: temp file with owner-only permissions, then rename.
pub fn save_config_to(path: &Path, config: &Config) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    let temp_path = path.with_extension("json.tmp");

    {
        let mut opts = fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        opts.mode(0o600);
        let mut file = opts.open(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
    }
    fs::rename(&temp_path, path)?;
    debug!(path = %path.display(), "Saved config");
    Ok(())
}

// ── Credentials ──────────────────────────────────────────────

/// Password or API token. `Debug` never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    Token(String),
    Password(String),
}

impl Secret {
    #[must_use]
    pub const fn is_token(&self) -> bool {
        matches!(self, Self::Token(_))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(***)"),
            Self::Password(_) => f.write_str("Password(***)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Base URL, always ending in `/`.
    pub endpoint: String,
    pub username: String,
    pub secret: Secret,
}

/// Source of interactively entered values.
pub trait Prompter {
    fn ask(&self, question: &str) -> Result<String>;
    fn ask_secret(&self, question: &str) -> Result<String>;
}

/// `dialoguer`-backed prompts on the controlling terminal.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&self, question: &str) -> Result<String> {
        dialoguer::Input::<String>::new()
            .with_prompt(question)
            .interact_text()
            .map_err(|e| Error::AuthConfig(format!("Could not read {question}: {e}")))
    }

    fn ask_secret(&self, question: &str) -> Result<String> {
        dialoguer::Password::new()
            .with_prompt(question)
            .interact()
            .map_err(|e| Error::AuthConfig(format!("Could not read {question}: {e}")))
    }
}

/// Prompter for the controlling terminal, or `None` when stdin is not one.
#[must_use]
pub fn terminal_prompter() -> Option<TerminalPrompter> {
    std::io::IsTerminal::is_terminal(&std::io::stdin()).then_some(TerminalPrompter)
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Validate and normalize a service URL.
pub fn normalize_endpoint(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(Error::AuthConfig(format!(
            "Service URL must start with http:// or https:// (got '{trimmed}')"
        )));
    }
    if trimmed.ends_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/"))
    }
}

impl Credentials {
    /// Resolve credentials from `env`, then `config`, then `prompter`.
    ///
    /// Fails with `AuthConfig` when a value is missing and cannot be asked
    /// for, or when a 2-factor account has no API token.
    pub fn resolve(
        config: &Config,
        env: impl Fn(&str) -> Option<String>,
        prompter: Option<&dyn Prompter>,
    ) -> Result<Self> {
        let endpoint = match env("FBURL").or_else(|| config.endpoint.clone()) {
            Some(url) => url,
            None => ask(prompter, "Service URL", "FBURL")?,
        };
        let endpoint = normalize_endpoint(&endpoint)?;

        let username = match env("FBUSER").or_else(|| config.username.clone()) {
            Some(user) => user,
            None => ask(prompter, "Username", "FBUSER")?,
        };

        let secret = Self::resolve_secret(config, &env, prompter)?;

        Ok(Self {
            endpoint,
            username,
            secret,
        })
    }

    fn resolve_secret(
        config: &Config,
        env: &impl Fn(&str) -> Option<String>,
        prompter: Option<&dyn Prompter>,
    ) -> Result<Secret> {
        if let Some(token) = env("FBTOKEN") {
            return Ok(Secret::Token(token));
        }

        let two_factor = env("FB2FA").map_or(config.two_factor, |v| is_truthy(&v));
        if two_factor {
            return Err(Error::AuthConfig(
                "2-factor accounts must log on with an API token; set $FBTOKEN".to_string(),
            ));
        }

        if let Some(password) = env("FBPASS") {
            return Ok(Secret::Password(password));
        }
        let Some(prompter) = prompter else {
            return Err(Error::AuthConfig(
                "No password or API token; set $FBTOKEN or $FBPASS".to_string(),
            ));
        };
        prompter.ask_secret("Password").map(Secret::Password)
    }

    /// Same endpoint, different user and secret, as entered by `logon`.
    pub fn for_user(&self, username: &str, prompter: &dyn Prompter) -> Result<Self> {
        let secret = prompter.ask_secret(&format!("Password for {username}"))?;
        Ok(Self {
            endpoint: self.endpoint.clone(),
            username: username.to_string(),
            secret: Secret::Password(secret),
        })
    }
}

fn ask(prompter: Option<&dyn Prompter>, question: &str, variable: &str) -> Result<String> {
    let Some(prompter) = prompter else {
        return Err(Error::AuthConfig(format!(
            "{question} not configured; set ${variable}"
        )));
    };
    eprintln!("You can skip this question by setting ${variable}");
    let answer = prompter.ask(question)?;
    if answer.trim().is_empty() {
        return Err(Error::AuthConfig(format!("{question} is required")));
    }
    Ok(answer.trim().to_string())
}
