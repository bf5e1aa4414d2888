//! Built-in command implementations.
//!
//! Each submodule registers its commands with [`register`] style functions;
//! [`builtin_registry`] collects them all.

pub mod case;
pub mod completions;
pub mod search;
pub mod session;

use crate::cli::registry::Registry;
use crate::error::Result;

/// Registry holding every built-in command.
pub fn builtin_registry() -> Result<Registry> {
    let mut registry = Registry::new();
    session::register(&mut registry)?;
    case::register(&mut registry)?;
    search::register(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::builtin_registry;
    use crate::cli::dispatch::Dispatcher;
    use crate::cli::editor::Compose;
    use crate::cli::session::{CommandContext, Output};
    use crate::client::CaseClient;
    use crate::client::testing::MockClient;
    use crate::config::Config;
    use crate::error::{Error, Result};
    use std::sync::Arc;

    /// Returns fixed text, or aborts when empty.
    pub struct Canned(pub String);

    impl Compose for Canned {
        fn compose(&self, _template: &str) -> Result<String> {
            if self.0.is_empty() {
                Err(Error::Aborted)
            } else {
                Ok(self.0.clone())
            }
        }
    }

    fn no_browser(_: &str) -> std::io::Result<()> {
        Ok(())
    }

    /// Built-in commands over a mock service.
    pub struct Shell {
        pub client: Arc<MockClient>,
        pub dispatcher: Dispatcher,
        pub ctx: CommandContext,
    }

    impl Shell {
        pub fn new() -> Self {
            Self::with_config(Config::default())
        }

        pub fn with_config(config: Config) -> Self {
            colored::control::set_override(false);
            let client = Arc::new(MockClient::new());
            let ctx = CommandContext::new(Arc::clone(&client) as Arc<dyn CaseClient>, config)
                .with_composer(Box::new(Canned(String::new())))
                .with_opener(no_browser);
            Self {
                client,
                dispatcher: Dispatcher::new(builtin_registry().unwrap()),
                ctx,
            }
        }

        pub fn composing(mut self, text: &str) -> Self {
            self.ctx.composer = Box::new(Canned(text.to_string()));
            self
        }

        pub fn run(&mut self, line: &str) -> Result<Output> {
            self.dispatcher.dispatch(line, &mut self.ctx)
        }
    }

    pub fn text(output: Result<Output>) -> String {
        match output {
            Ok(Output::Text(text)) => text,
            other => panic!("expected text output, got {other:?}"),
        }
    }

    #[test]
    fn test_builtins_register_without_collisions() {
        let registry = builtin_registry().unwrap();
        for name in [
            "help", "logon", "logoff", "whoami", "show", "refresh", "resolve", "reopen", "close",
            "reactivate", "assign", "set", "comment", "flush", "discard", "pending", "search",
            "mycases", "savesearch", "searches", "results", "next", "prev", "browse", "new", "quit",
        ] {
            assert_eq!(registry.resolve(name).unwrap().name, name);
        }
        for (alias, name) in [
            ("?", "help"),
            ("login", "logon"),
            ("logout", "logoff"),
            ("b", "browse"),
            ("exit", "quit"),
            ("bye", "quit"),
        ] {
            assert_eq!(registry.resolve(alias).unwrap().name, name);
        }
    }
}
