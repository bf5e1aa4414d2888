//! fb CLI entry point.

use clap::Parser;
use fb::cli::commands::{builtin_registry, completions};
use fb::cli::dispatch::Dispatcher;
use fb::cli::repl::{self, Terminal};
use fb::cli::session::CommandContext;
use fb::cli::{Cli, render};
use fb::client::{CaseClient, HttpClient};
use fb::config::{
    Credentials, Prompter, config_path, history_path, load_config, terminal_prompter,
};
use fb::error::Result;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    if let Some(shell) = cli.completions {
        completions::generate_to(shell, &mut std::io::stdout());
        return ExitCode::SUCCESS;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", render::error(&e));
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,reqwest=info,hyper_util=info,rustyline=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config()?;

    let prompter: Option<Box<dyn Prompter>> =
        terminal_prompter().map(|p| Box::new(p) as Box<dyn Prompter>);
    let credentials = Credentials::resolve(&config, env_var, prompter.as_deref())?;

    let client: Arc<dyn CaseClient> =
        Arc::new(HttpClient::new(&credentials.endpoint, config.request_timeout())?);
    let session = client.authenticate(&credentials)?;
    info!(user = %session.user.full_name, endpoint = %credentials.endpoint, "Logged on");

    let dispatcher = Dispatcher::new(builtin_registry()?);
    let mut ctx = CommandContext::new(Arc::clone(&client), config)
        .with_config_path(config_path())
        .with_prompter(prompter);
    ctx.session.user = Some(session.user);
    ctx.session.credentials = Some(credentials);

    let mut stdout = std::io::stdout();
    if let Some(line) = cli.command_line() {
        return repl::run_once(&line, &dispatcher, &mut ctx, &mut stdout);
    }

    let words = dispatcher.registry().words().map(str::to_string).collect();
    let mut terminal = Terminal::new(words, history_path())?;
    let result = repl::run(&mut terminal, &dispatcher, &mut ctx, &mut stdout);
    terminal.save_history();

    if ctx.session.user.is_some() {
        if let Err(e) = client.logoff() {
            debug!(error = %e, "Logoff failed");
        }
    }
    result
}
