//! Line dispatch: resolve the command word, bind arguments, run the handler.

use super::registry::{ArgKind, ArgSpec, ArgValue, BoundArgs, CommandDescriptor, Registry};
use super::render;
use super::session::{CommandContext, Output};
use crate::error::{Error, Result};
use crate::model::CaseId;
use tracing::debug;

/// A word of input and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    text: String,
    start: usize,
    /// False for a quoted word missing its closing quote.
    closed: bool,
}

pub struct Dispatcher {
    registry: Registry,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(registry: Registry) -> Self {
        Self { registry }
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Run one line of input.
    ///
    /// An empty line does nothing; a bare case number shows that case.
    pub fn dispatch(&self, line: &str, ctx: &mut CommandContext) -> Result<Output> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Output::None);
        }

        let (word, rest) = split_word(line);
        let (descriptor, rest) = if word.parse::<CaseId>().is_ok() && rest.is_empty() {
            (self.registry.resolve("show")?, word)
        } else {
            (self.registry.resolve(word)?, rest)
        };

        let args = bind(descriptor, rest, ctx)?;
        debug!(command = descriptor.name, "Dispatching");
        match descriptor.handler.execute(&args, ctx)? {
            Output::Help(topic) => self.help(topic.as_deref()).map(Output::Text),
            output => Ok(output),
        }
    }

    fn help(&self, topic: Option<&str>) -> Result<String> {
        match topic {
            None => Ok(render::help_index(&self.registry)),
            Some(name) => self.registry.resolve(name).map(render::help_command),
        }
    }
}

fn split_word(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (line, ""),
    }
}

/// Split on whitespace; `"..."` groups words and `\"` escapes a quote.
///
/// An unterminated quote is only an error if a word argument consumes it:
/// free text takes the raw line.
fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut text = String::new();
        let mut closed = true;
        if c == '"' {
            chars.next();
            closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            text.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => text.push(c),
                }
            }
        } else {
            while let Some(&(_, c)) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                text.push(c);
                chars.next();
            }
        }
        tokens.push(Token {
            text,
            start,
            closed,
        });
    }
    tokens
}

fn argument_error(descriptor: &CommandDescriptor, argument: &str, expected: &str) -> Error {
    Error::Argument {
        command: descriptor.name.to_string(),
        argument: argument.to_string(),
        expected: expected.to_string(),
    }
}

fn coerce(
    descriptor: &CommandDescriptor,
    spec: &ArgSpec,
    raw: &str,
    ctx: &CommandContext,
) -> Result<ArgValue> {
    let invalid = || argument_error(descriptor, raw, spec.kind.expected());
    match spec.kind {
        ArgKind::Integer => raw.parse().map(ArgValue::Integer).map_err(|_| invalid()),
        ArgKind::Text | ArgKind::FreeText => Ok(ArgValue::Text(raw.to_string())),
        ArgKind::CaseRef => {
            if raw == "." || raw.eq_ignore_ascii_case("current") {
                ctx.session.require_current().map(ArgValue::Case)
            } else {
                raw.parse().map(ArgValue::Case).map_err(|_| invalid())
            }
        }
    }
}

/// Match raw argument text against the descriptor's declared arguments.
fn bind(descriptor: &CommandDescriptor, rest: &str, ctx: &CommandContext) -> Result<BoundArgs> {
    let tokens = tokenize(rest);
    let unterminated =
        |token: &Token| argument_error(descriptor, &rest[token.start..], "a closing quote");
    let mut bound = BoundArgs::default();
    let mut next = 0;

    for spec in &descriptor.args {
        if spec.kind == ArgKind::FreeText {
            if let Some(token) = tokens.get(next) {
                let text = rest[token.start..].trim();
                bound.insert(spec.name, ArgValue::Text(text.to_string()));
                next = tokens.len();
                continue;
            }
        } else if let Some(token) = tokens.get(next) {
            if !token.closed {
                return Err(unterminated(token));
            }
            bound.insert(spec.name, coerce(descriptor, spec, &token.text, ctx)?);
            next += 1;
            continue;
        }

        if spec.required {
            return Err(argument_error(descriptor, spec.name, spec.kind.expected()));
        }
        if spec.kind == ArgKind::CaseRef {
            if let Some(current) = ctx.session.current() {
                bound.insert(spec.name, ArgValue::Case(current));
            }
        }
    }

    if let Some(extra) = tokens.get(next) {
        if !extra.closed {
            return Err(unterminated(extra));
        }
        return Err(argument_error(descriptor, &extra.text, "no further arguments"));
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::MockClient;
    use crate::config::Config;
    use std::sync::Arc;

    fn echo(args: &BoundArgs, _: &mut CommandContext) -> Result<Output> {
        let mut parts = Vec::new();
        if let Some(id) = args.case("case") {
            parts.push(format!("case={id}"));
        }
        if let Some(n) = args.integer("count") {
            parts.push(format!("count={n}"));
        }
        if let Some(t) = args.text("field") {
            parts.push(format!("field={t}"));
        }
        if let Some(t) = args.text("text") {
            parts.push(format!("text={t}"));
        }
        Ok(Output::Text(parts.join(" ")))
    }

    fn help(args: &BoundArgs, _: &mut CommandContext) -> Result<Output> {
        Ok(Output::Help(args.text("field").map(str::to_string)))
    }

    fn dispatcher() -> Dispatcher {
        let mut registry = Registry::new();
        registry
            .register(
                CommandDescriptor::new("show", "Show a case", echo)
                    .arg(ArgSpec::optional("case", ArgKind::CaseRef)),
            )
            .unwrap();
        registry
            .register(
                CommandDescriptor::new("set", "Stage a change", echo)
                    .arg(ArgSpec::required("field", ArgKind::Text))
                    .arg(ArgSpec::required("text", ArgKind::FreeText)),
            )
            .unwrap();
        registry
            .register(
                CommandDescriptor::new("take", "Take n", echo)
                    .arg(ArgSpec::required("count", ArgKind::Integer)),
            )
            .unwrap();
        registry
            .register(
                CommandDescriptor::new("help", "Help", help)
                    .arg(ArgSpec::optional("field", ArgKind::Text)),
            )
            .unwrap();
        Dispatcher::new(registry)
    }

    fn context() -> CommandContext {
        CommandContext::new(Arc::new(MockClient::new()), Config::default())
    }

    fn text(output: Output) -> String {
        match output {
            Output::Text(text) => text,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_line_does_nothing() {
        let mut ctx = context();
        assert_eq!(dispatcher().dispatch("   ", &mut ctx).unwrap(), Output::None);
    }

    #[test]
    fn test_bare_number_shows_case() {
        let mut ctx = context();
        let out = dispatcher().dispatch("123", &mut ctx).unwrap();
        assert_eq!(text(out), "case=123");
    }

    #[test]
    fn test_case_ref_forms() {
        let d = dispatcher();
        let mut ctx = context();
        assert_eq!(text(d.dispatch("show #42", &mut ctx).unwrap()), "case=42");
        assert!(matches!(d.dispatch("show .", &mut ctx), Err(Error::NoCurrentCase)));
        assert_eq!(text(d.dispatch("show", &mut ctx).unwrap()), "");

        ctx.session.set_current(CaseId(7));
        assert_eq!(text(d.dispatch("show current", &mut ctx).unwrap()), "case=7");
        assert_eq!(text(d.dispatch("sh", &mut ctx).unwrap()), "case=7");
    }

    #[test]
    fn test_free_text_takes_rest_of_line() {
        let mut ctx = context();
        let out = dispatcher()
            .dispatch("set title  Crash on \"save\"  ", &mut ctx)
            .unwrap();
        assert_eq!(text(out), "field=title text=Crash on \"save\"");
    }

    #[test]
    fn test_quoted_text_argument() {
        let mut ctx = context();
        let out = dispatcher()
            .dispatch(r#"set "assigned to" Jane"#, &mut ctx)
            .unwrap();
        assert_eq!(text(out), "field=assigned to text=Jane");
    }

    #[test]
    fn test_missing_required_argument() {
        let mut ctx = context();
        match dispatcher().dispatch("set title", &mut ctx) {
            Err(Error::Argument {
                command, argument, ..
            }) => {
                assert_eq!(command, "set");
                assert_eq!(argument, "text");
            }
            other => panic!("expected argument error, got {other:?}"),
        }
    }

    #[test]
    fn test_integer_coercion() {
        let d = dispatcher();
        let mut ctx = context();
        assert_eq!(text(d.dispatch("take 3", &mut ctx).unwrap()), "count=3");
        match d.dispatch("take three", &mut ctx) {
            Err(Error::Argument { argument, expected, .. }) => {
                assert_eq!(argument, "three");
                assert_eq!(expected, "an integer");
            }
            other => panic!("expected argument error, got {other:?}"),
        }
    }

    #[test]
    fn test_extra_arguments_rejected() {
        let mut ctx = context();
        assert!(matches!(
            dispatcher().dispatch("take 1 2", &mut ctx),
            Err(Error::Argument { .. })
        ));
    }

    #[test]
    fn test_unterminated_quote() {
        let mut ctx = context();
        match dispatcher().dispatch("set \"title", &mut ctx) {
            Err(Error::Argument { expected, .. }) => assert_eq!(expected, "a closing quote"),
            other => panic!("expected argument error, got {other:?}"),
        }
    }

    #[test]
    fn test_unbalanced_quote_in_free_text_is_kept() {
        let mut ctx = context();
        let out = dispatcher().dispatch("set title 12\" monitor", &mut ctx).unwrap();
        assert_eq!(text(out), "field=title text=12\" monitor");
    }

    #[test]
    fn test_help_is_rendered_from_registry() {
        colored::control::set_override(false);
        let d = dispatcher();
        let mut ctx = context();
        let index = text(d.dispatch("help", &mut ctx).unwrap());
        assert!(index.contains("show"));
        assert!(index.contains("Stage a change"));

        let topic = text(d.dispatch("help set", &mut ctx).unwrap());
        assert!(topic.contains("set <field> <text…>"));

        assert!(matches!(
            d.dispatch("help nothing", &mut ctx),
            Err(Error::UnknownCommand { .. })
        ));
    }

    #[test]
    fn test_unknown_command() {
        let mut ctx = context();
        assert!(matches!(
            dispatcher().dispatch("frobnicate", &mut ctx),
            Err(Error::UnknownCommand { .. })
        ));
    }
}
