//! CLI definitions using clap, plus the interactive shell.
//!
//! # Submodules
//!
//! - [`registry`] - Command descriptors and name resolution
//! - [`dispatch`] - Tokenizing, argument binding and execution
//! - [`session`] - Session state and the command context
//! - [`commands`] - Built-in commands
//! - [`render`] - Colored terminal output
//! - [`editor`] - `$EDITOR` composition
//! - [`repl`] - The interactive loop

use clap::{Parser, ValueEnum};

pub mod commands;
pub mod dispatch;
pub mod editor;
pub mod registry;
pub mod render;
pub mod repl;
pub mod session;

/// fb - an interactive shell for FogBugz cases
#[derive(Parser, Debug)]
#[command(name = "fb", author, version, about, long_about = None)]
#[command(after_help = "Credentials come from $FBURL, $FBUSER and $FBTOKEN or $FBPASS \
                        (set $FB2FA=1 for 2-factor accounts), then ~/.fbcli/config.json, \
                        then prompts.")]
pub struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (no logging)
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Print a completion script for SHELL and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,

    /// Run one shell command and exit, e.g. `fb search status=open`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// The trailing command as one shell line, if given.
    #[must_use]
    pub fn command_line(&self) -> Option<String> {
        if self.command.is_empty() {
            return None;
        }
        let words: Vec<String> = self
            .command
            .iter()
            .map(|word| {
                if word.contains(char::is_whitespace) {
                    format!("\"{}\"", word.replace('"', "\\\""))
                } else {
                    word.clone()
                }
            })
            .collect();
        Some(words.join(" "))
    }
}

/// Supported shells for completions.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}
