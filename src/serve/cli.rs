//! Command-line subsystem.
//!
//! Modules contribute clap subcommands. When the subsystem is given
//! arguments it runs the matching command once and finishes; with no
//! arguments it has nothing to do.

use std::future::Future;
use std::sync::Arc;

use clap::{error::ErrorKind, ArgMatches, Command};
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::registry::{Capability, Module};
use crate::serve::{ServeError, Subsystem};
use crate::BoxError;

type CommandFn = Arc<dyn Fn(ArgMatches) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// The external handle CLI modules register their subcommands on.
pub struct CommandRegistry {
    name: String,
    commands: Vec<(Command, CommandFn)>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"))
    }
}

impl CommandRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
        }
    }

    /// Register a subcommand and its handler.
    pub fn command<F, Fut>(&mut self, command: Command, handler: F) -> &mut Self
    where
        F: Fn(ArgMatches) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.commands.push((
            command,
            Arc::new(move |matches| Box::pin(handler(matches)) as BoxFuture<'static, _>),
        ));
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The root command with every registered subcommand attached.
    pub fn root(&self) -> Command {
        self.commands
            .iter()
            .fold(Command::new(self.name.clone()).subcommand_required(true), |root, (cmd, _)| {
                root.subcommand(cmd.clone())
            })
    }

    /// Parse `args` (without the program name) and run the matching handler.
    pub async fn execute<I, T>(&self, args: I) -> Result<(), ServeError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let argv = std::iter::once(self.name.clone()).chain(args.into_iter().map(Into::into));
        let matches = match self.root().try_get_matches_from(argv) {
            Ok(matches) => matches,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                let _ = e.print();
                return Ok(());
            }
            Err(e) => return Err(ServeError::Usage(e.to_string())),
        };

        let Some((name, sub_matches)) = matches.subcommand() else {
            return Err(ServeError::Usage("no command given".into()));
        };
        let Some((_, handler)) = self.commands.iter().find(|(cmd, _)| cmd.get_name() == name) else {
            return Err(ServeError::Usage(format!("unknown command {name:?}")));
        };

        tracing::debug!(command = name, "Running command");
        handler(sub_matches.clone())
            .await
            .map_err(|source| ServeError::Command {
                command: name.to_string(),
                source,
            })
    }
}

/// Runs one command contributed by a module implementing
/// [`ServesCli`](crate::registry::ServesCli).
pub struct CliSubsystem {
    commands: CommandRegistry,
    args: Vec<String>,
    bindings: usize,
}

impl CliSubsystem {
    /// `args` excludes the program name; empty means nothing to run.
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            commands: CommandRegistry::new(name),
            args,
            bindings: 0,
        }
    }
}

impl Subsystem for CliSubsystem {
    fn capability(&self) -> Capability {
        Capability::Cli
    }

    fn bind(&mut self, module: &dyn Module) {
        if let Some(cli) = module.as_cli() {
            cli.serve_cli(&mut self.commands);
            self.bindings += 1;
        }
    }

    fn bindings(&self) -> usize {
        self.bindings
    }

    fn serve(self: Box<Self>, shutdown: CancellationToken) -> BoxFuture<'static, Result<(), ServeError>> {
        let this = *self;
        Box::pin(async move {
            if this.args.is_empty() {
                return Ok(());
            }
            tokio::select! {
                result = this.commands.execute(this.args.clone()) => result,
                _ = shutdown.cancelled() => {
                    tracing::warn!("Command interrupted by shutdown");
                    Ok(())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Arg;
    use parking_lot::Mutex;

    fn registry(seen: Arc<Mutex<Vec<String>>>) -> CommandRegistry {
        let mut registry = CommandRegistry::new("app");
        registry.command(
            Command::new("greet").arg(Arg::new("who").required(true)),
            move |matches| {
                let seen = seen.clone();
                async move {
                    let who = matches.get_one::<String>("who").cloned().unwrap_or_default();
                    seen.lock().push(who);
                    Ok(())
                }
            },
        );
        registry.command(Command::new("fail"), |_| async { Err("boom".into()) });
        registry
    }

    #[tokio::test]
    async fn test_execute_runs_matching_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(seen.clone());

        registry.execute(["greet", "world"]).await.unwrap();
        assert_eq!(*seen.lock(), vec!["world".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_reports_errors() {
        let registry = registry(Arc::new(Mutex::new(Vec::new())));

        let err = registry.execute(["fail"]).await.unwrap_err();
        assert!(matches!(err, ServeError::Command { ref command, .. } if command == "fail"));

        let err = registry.execute(["nope"]).await.unwrap_err();
        assert!(matches!(err, ServeError::Usage(_)));
    }

    #[tokio::test]
    async fn test_subsystem_without_args_finishes() {
        let subsystem = Box::new(CliSubsystem::new("app", Vec::new()));
        assert!(subsystem.serve(CancellationToken::new()).await.is_ok());
    }
}
