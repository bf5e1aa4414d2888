//! Help, logon/logoff and leaving the shell.

use crate::cli::registry::{ArgKind, ArgSpec, BoundArgs, CommandDescriptor, Registry};
use crate::cli::session::{CommandContext, Output};
use crate::error::{Error, Result};
use tracing::{info, warn};

pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        CommandDescriptor::new("help", "List commands, or describe one", help)
            .alias("?")
            .arg(ArgSpec::optional("command", ArgKind::Text)),
    )?;
    registry.register(
        CommandDescriptor::new("logon", "Log on again, optionally as another user", logon)
            .alias("login")
            .arg(ArgSpec::optional("username", ArgKind::Text))
            .description("Without a username, repeats the logon made at startup. Switching users asks for a password."),
    )?;
    registry.register(
        CommandDescriptor::new("logoff", "End the session with the server", logoff)
            .alias("logout"),
    )?;
    registry.register(CommandDescriptor::new(
        "whoami",
        "Show the logged-on user",
        whoami,
    ))?;
    registry.register(
        CommandDescriptor::new("quit", "Leave the shell", quit)
            .alias("exit")
            .alias("bye")
            .arg(ArgSpec::optional("flush", ArgKind::Text))
            .description("`quit flush` sends all staged changes first and stays if any of them fails."),
    )?;
    Ok(())
}

fn help(args: &BoundArgs, _: &mut CommandContext) -> Result<Output> {
    Ok(Output::Help(args.text("command").map(str::to_string)))
}

fn logon(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    let current = ctx.session.credentials.clone().ok_or_else(|| {
        Error::AuthConfig("No service URL is known for this session".to_string())
    })?;

    let credentials = match args.text("username") {
        Some(username) => {
            let prompter = ctx.prompter.as_deref().ok_or_else(|| {
                Error::AuthConfig("Cannot ask for a password without a terminal".to_string())
            })?;
            current.for_user(username, prompter)?
        }
        None => current,
    };

    let session = ctx.client.authenticate(&credentials)?;
    info!(user = %session.user.full_name, "Logged on");
    let message = format!("Logged on as {}", session.user.full_name);
    ctx.session.user = Some(session.user);
    ctx.session.credentials = Some(credentials);
    Ok(Output::Text(message))
}

fn logoff(_: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    if ctx.session.user.is_none() {
        return Err(Error::NotLoggedIn);
    }
    ctx.client.logoff()?;
    ctx.session.reset();
    Ok(Output::Text("Logged off".to_string()))
}

fn whoami(_: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    ctx.session
        .user
        .as_ref()
        .map(|user| Output::Text(user.to_string()))
        .ok_or(Error::NotLoggedIn)
}

fn quit(args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
    match args.text("flush") {
        None => return Ok(Output::Quit),
        Some(word) if word.eq_ignore_ascii_case("flush") => {}
        Some(word) => {
            return Err(Error::Argument {
                command: "quit".to_string(),
                argument: word.to_string(),
                expected: "'flush' or nothing".to_string(),
            });
        }
    }

    let mut failed = Vec::new();
    for id in ctx.cache.dirty_cases() {
        if let Err(e) = ctx.cache.flush(id) {
            warn!(%id, error = %e, "Flush before quit failed");
            failed.push(format!("{id} ({e})"));
        }
    }
    if failed.is_empty() {
        Ok(Output::Quit)
    } else {
        Err(Error::Other(format!(
            "Not quitting; could not flush case {}",
            failed.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Shell, text};
    use crate::cli::session::Output;
    use crate::config::{Credentials, Prompter, Secret};
    use crate::error::{Error, Result};
    use crate::model::CaseId;

    struct Password;

    impl Prompter for Password {
        fn ask(&self, _question: &str) -> Result<String> {
            Ok(String::new())
        }

        fn ask_secret(&self, _question: &str) -> Result<String> {
            Ok("hunter2".to_string())
        }
    }

    fn logged_on() -> Shell {
        let mut shell = Shell::new();
        shell.client.accept_user("Jane Doe");
        shell.ctx.session.credentials = Some(Credentials {
            endpoint: "https://fb.test/".to_string(),
            username: "jane".to_string(),
            secret: Secret::Token("t0ken".to_string()),
        });
        shell.run("logon").unwrap();
        shell
    }

    #[test]
    fn test_logon_whoami_logoff() {
        let mut shell = logged_on();
        assert_eq!(text(shell.run("whoami")), "Jane Doe <jane doe@example.com>");
        assert_eq!(text(shell.run("logout")), "Logged off");
        assert!(matches!(shell.run("whoami"), Err(Error::NotLoggedIn)));
        assert!(shell.ctx.session.credentials.is_some());
        assert!(text(shell.run("login")).contains("Jane Doe"));
    }

    #[test]
    fn test_logon_as_other_user_prompts_for_password() {
        let mut shell = logged_on();
        shell.ctx.prompter = Some(Box::new(Password));
        shell.run("logon bob").unwrap();
        let credentials = shell.ctx.session.credentials.as_ref().unwrap();
        assert_eq!(credentials.username, "bob");
        assert_eq!(credentials.secret, Secret::Password("hunter2".to_string()));
    }

    #[test]
    fn test_logon_as_other_user_needs_terminal() {
        let mut shell = logged_on();
        assert!(matches!(shell.run("logon bob"), Err(Error::AuthConfig(_))));
    }

    #[test]
    fn test_help_alias() {
        colored::control::set_override(false);
        let mut shell = Shell::new();
        let out = text(shell.run("?"));
        assert!(out.contains("savesearch"));
        let out = text(shell.run("help resolve"));
        assert!(out.contains("Usage: resolve [case]"));
    }

    #[test]
    fn test_quit_flush_refuses_on_failure() {
        let mut shell = Shell::new();
        shell.client.put_case(5, "Crash");
        shell.run("resolve 5").unwrap();
        shell.client.fail_next_update(Error::Conflict {
            id: CaseId(5),
            revision: "3".into(),
        });

        assert!(matches!(shell.run("quit flush"), Err(Error::Other(_))));
        assert_eq!(shell.ctx.cache.dirty_cases(), vec![CaseId(5)]);

        assert_eq!(shell.run("bye flush").unwrap(), Output::Quit);
        assert!(shell.ctx.cache.dirty_cases().is_empty());
    }

    #[test]
    fn test_plain_quit_keeps_dirty_cases() {
        let mut shell = Shell::new();
        shell.client.put_case(5, "Crash");
        shell.run("close 5").unwrap();
        assert_eq!(shell.run("exit").unwrap(), Output::Quit);
        assert_eq!(shell.client.update_calls(), 0);
    }
}
