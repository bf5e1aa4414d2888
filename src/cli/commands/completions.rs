//! Shell completions for the `fb` binary.

use crate::cli::{Cli, Shell};
use clap::CommandFactory;
use clap_complete::{generate, shells};
use std::io::Write;

/// Write the completion script for `shell` to `out`.
pub fn generate_to(shell: Shell, out: &mut dyn Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    match shell {
        Shell::Bash => generate(shells::Bash, &mut cmd, name, out),
        Shell::Zsh => generate(shells::Zsh, &mut cmd, name, out),
        Shell::Fish => generate(shells::Fish, &mut cmd, name, out),
        Shell::PowerShell => generate(shells::PowerShell, &mut cmd, name, out),
        Shell::Elvish => generate(shells::Elvish, &mut cmd, name, out),
    }
}
