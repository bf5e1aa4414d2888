//! The interactive read-dispatch-render loop.

use super::dispatch::Dispatcher;
use super::render;
use super::session::{CommandContext, Output};
use crate::error::{Error, Result};
use colored::Colorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, warn};

/// One read from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Line(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    /// Ctrl-D or end of piped input.
    Eof,
}

/// Where input lines come from.
pub trait LineSource {
    fn read(&mut self, prompt: &str) -> Result<Input>;

    /// Record a non-empty line in history.
    fn remember(&mut self, _line: &str) {}
}

/// Completes and hints command names.
struct CommandHelper {
    words: Vec<String>,
}

impl CommandHelper {
    fn matches<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.words.iter().filter(move |w| w.starts_with(prefix))
    }
}

impl Helper for CommandHelper {}

impl Completer for CommandHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line = &line[..pos];
        // only the command word is completed
        if line.contains(char::is_whitespace) {
            return Ok((pos, Vec::new()));
        }
        let candidates = self
            .matches(line)
            .map(|word| Pair {
                display: word.clone(),
                replacement: format!("{word} "),
            })
            .collect();
        Ok((0, candidates))
    }
}

impl Hinter for CommandHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let line = &line[..pos];
        if line.is_empty() || line.contains(char::is_whitespace) {
            return None;
        }
        let mut found = self.matches(line);
        match (found.next(), found.next()) {
            (Some(only), None) if only.len() > line.len() => Some(only[line.len()..].to_string()),
            _ => None,
        }
    }
}

impl Highlighter for CommandHelper {}

impl Validator for CommandHelper {}

/// `rustyline` editor with persistent history.
pub struct Terminal {
    editor: Editor<CommandHelper, DefaultHistory>,
    history: Option<PathBuf>,
}

fn terminal_error(e: ReadlineError) -> Error {
    match e {
        ReadlineError::Io(io) => Error::Io(io),
        other => Error::Other(format!("Terminal error: {other}")),
    }
}

impl Terminal {
    /// Editor completing `words`, with history loaded from `history`.
    pub fn new(words: Vec<String>, history: Option<PathBuf>) -> Result<Self> {
        let mut editor = Editor::new().map_err(terminal_error)?;
        editor.set_helper(Some(CommandHelper { words }));
        if let Some(path) = &history {
            if let Err(e) = editor.load_history(path) {
                debug!(path = %path.display(), error = %e, "No history loaded");
            }
        }
        Ok(Self { editor, history })
    }

    pub fn save_history(&mut self) {
        let Some(path) = &self.history else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = self.editor.save_history(path) {
            warn!(path = %path.display(), error = %e, "Could not save history");
        }
    }
}

impl LineSource for Terminal {
    fn read(&mut self, prompt: &str) -> Result<Input> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Input::Line(line)),
            Err(ReadlineError::Interrupted) => Ok(Input::Interrupted),
            Err(ReadlineError::Eof) => Ok(Input::Eof),
            Err(e) => Err(terminal_error(e)),
        }
    }

    fn remember(&mut self, line: &str) {
        let _ = self.editor.add_history_entry(line);
    }
}

fn show(output: Output, out: &mut dyn Write) -> Result<bool> {
    match output {
        Output::Quit => return Ok(false),
        Output::Text(text) if !text.is_empty() => {
            out.write_all(text.as_bytes())?;
            if !text.ends_with('\n') {
                writeln!(out)?;
            }
        }
        Output::Text(_) | Output::None | Output::Help(_) => {}
    }
    Ok(true)
}

fn show_warnings(ctx: &CommandContext, out: &mut dyn Write) -> Result<()> {
    for warning in ctx.cache.take_warnings() {
        writeln!(out, "{} {warning}", "Warning:".yellow().bold())?;
    }
    Ok(())
}

fn report_unflushed(ctx: &CommandContext, out: &mut dyn Write) -> Result<()> {
    let dirty = ctx.cache.dirty_cases();
    if dirty.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = dirty.iter().map(ToString::to_string).collect();
    writeln!(
        out,
        "{} unflushed changes on case {} were not sent",
        "Warning:".yellow().bold(),
        ids.join(", ")
    )?;
    Ok(())
}

/// Read and run lines until `quit` or end of input.
///
/// Command errors are rendered and the loop continues.
pub fn run(
    source: &mut dyn LineSource,
    dispatcher: &Dispatcher,
    ctx: &mut CommandContext,
    out: &mut dyn Write,
) -> Result<()> {
    loop {
        show_warnings(ctx, out)?;
        let line = match source.read(&ctx.session.prompt())? {
            Input::Line(line) => line,
            Input::Interrupted => continue,
            Input::Eof => break,
        };
        if !line.trim().is_empty() {
            source.remember(&line);
        }

        match dispatcher.dispatch(&line, ctx) {
            Ok(output) => {
                if !show(output, out)? {
                    break;
                }
            }
            Err(e) => {
                debug!(code = e.error_code().as_str(), "Command failed");
                writeln!(out, "{}", render::error(&e))?;
            }
        }
    }
    report_unflushed(ctx, out)
}

/// Run a single command line non-interactively.
pub fn run_once(
    line: &str,
    dispatcher: &Dispatcher,
    ctx: &mut CommandContext,
    out: &mut dyn Write,
) -> Result<()> {
    let output = dispatcher.dispatch(line, ctx)?;
    show(output, out)?;
    show_warnings(ctx, out)?;
    report_unflushed(ctx, out)
}
