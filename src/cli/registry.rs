//! Command registry.
//!
//! Commands are described by [`CommandDescriptor`]s holding their name,
//! aliases, argument shapes and a [`Handler`]. Lookup accepts the exact
//! name, an alias, or any prefix that matches exactly one command name.

use super::session::{CommandContext, Output};
use crate::error::{Error, Result};
use crate::model::CaseId;
use crate::validate::find_similar;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

/// How raw argument text is coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Integer,
    /// One word or one double-quoted string.
    Text,
    /// Case id, `.` or `current`; defaults to the current case when optional.
    CaseRef,
    /// The rest of the line, verbatim.
    FreeText,
}

impl ArgKind {
    /// Shape shown in binding errors.
    #[must_use]
    pub const fn expected(&self) -> &'static str {
        match self {
            Self::Integer => "an integer",
            Self::Text => "a word or \"quoted text\"",
            Self::CaseRef => "a case number, '.' or 'current'",
            Self::FreeText => "some text",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
}

impl ArgSpec {
    #[must_use]
    pub const fn required(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    #[must_use]
    pub const fn optional(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }

    fn usage(&self) -> String {
        let ellipsis = if self.kind == ArgKind::FreeText { "…" } else { "" };
        if self.required {
            format!("<{}{ellipsis}>", self.name)
        } else {
            format!("[{}{ellipsis}]", self.name)
        }
    }
}

/// A coerced argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Integer(i64),
    Text(String),
    Case(CaseId),
}

/// Arguments after binding, looked up by declared name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundArgs {
    values: HashMap<&'static str, ArgValue>,
}

impl BoundArgs {
    pub fn insert(&mut self, name: &'static str, value: ArgValue) {
        self.values.insert(name, value);
    }

    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ArgValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ArgValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn case(&self, name: &str) -> Option<CaseId> {
        match self.values.get(name) {
            Some(ArgValue::Case(id)) => Some(*id),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Executes one command.
pub trait Handler: Send + Sync {
    fn execute(&self, args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output>;
}

impl<F> Handler for F
where
    F: Fn(&BoundArgs, &mut CommandContext) -> Result<Output> + Send + Sync,
{
    fn execute(&self, args: &BoundArgs, ctx: &mut CommandContext) -> Result<Output> {
        self(args, ctx)
    }
}

#[derive(Clone)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub aliases: Vec<&'static str>,
    /// One line, shown by `help`.
    pub summary: &'static str,
    /// Longer text, shown by `help <command>`.
    pub description: &'static str,
    pub args: Vec<ArgSpec>,
    pub handler: Arc<dyn Handler>,
}

impl CommandDescriptor {
    pub fn new(name: &'static str, summary: &'static str, handler: impl Handler + 'static) -> Self {
        Self {
            name,
            aliases: Vec::new(),
            summary,
            description: "",
            args: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    #[must_use]
    pub fn alias(mut self, alias: &'static str) -> Self {
        self.aliases.push(alias);
        self
    }

    #[must_use]
    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.args.push(spec);
        self
    }

    #[must_use]
    pub const fn description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// `name <required> [optional]`.
    #[must_use]
    pub fn usage(&self) -> String {
        let mut usage = self.name.to_string();
        for spec in &self.args {
            let _ = write!(usage, " {}", spec.usage());
        }
        usage
    }
}

impl std::fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Registered commands keyed by name, plus an alias index.
#[derive(Default)]
pub struct Registry {
    commands: BTreeMap<&'static str, CommandDescriptor>,
    aliases: BTreeMap<&'static str, &'static str>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_taken(&self, word: &str) -> bool {
        self.commands.contains_key(word) || self.aliases.contains_key(word)
    }

    /// Add a command. Fails if its name or an alias is already in use.
    pub fn register(&mut self, descriptor: CommandDescriptor) -> Result<()> {
        let words = std::iter::once(descriptor.name).chain(descriptor.aliases.iter().copied());
        for word in words {
            if self.is_taken(word) {
                return Err(Error::CommandExists {
                    name: word.to_string(),
                });
            }
        }
        self.insert(descriptor);
        Ok(())
    }

    /// Add a command, replacing any command of the same name.
    pub fn replace(&mut self, descriptor: CommandDescriptor) {
        if let Some(old) = self.commands.remove(descriptor.name) {
            for alias in old.aliases {
                self.aliases.remove(alias);
            }
        }
        for alias in &descriptor.aliases {
            self.aliases.remove(alias);
        }
        self.insert(descriptor);
    }

    fn insert(&mut self, descriptor: CommandDescriptor) {
        debug!(name = descriptor.name, "Registered command");
        for alias in &descriptor.aliases {
            self.aliases.insert(*alias, descriptor.name);
        }
        self.commands.insert(descriptor.name, descriptor);
    }

    /// Find a command by name, alias or unambiguous name prefix.
    pub fn resolve(&self, input: &str) -> Result<&CommandDescriptor> {
        let word = input.to_lowercase();

        if let Some(descriptor) = self.commands.get(word.as_str()) {
            return Ok(descriptor);
        }
        if let Some(descriptor) = self
            .aliases
            .get(word.as_str())
            .and_then(|name| self.commands.get(name))
        {
            return Ok(descriptor);
        }

        let matches: Vec<&CommandDescriptor> = self
            .commands
            .values()
            .filter(|d| d.name.starts_with(&word))
            .collect();
        match matches.as_slice() {
            [only] => Ok(*only),
            [] => Err(Error::UnknownCommand {
                name: input.to_string(),
                similar: find_similar(&word, self.words(), 3),
            }),
            many => Err(Error::AmbiguousCommand {
                input: input.to_string(),
                candidates: many.iter().map(|d| d.name.to_string()).collect(),
            }),
        }
    }

    /// Commands in name order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands.values()
    }

    /// Every name and alias, for completion.
    pub fn words(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().chain(self.aliases.keys()).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
