//! Command framework for the `strata` CLI.
//!
//! Every subcommand implements [`ManagementCommand`] and is registered in a
//! [`CommandRegistry`], which builds the clap interface and dispatches parsed
//! arguments to the matching command.
//!
//! ## Defining a Custom Command
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use strata_cli::command::{CommandContext, ManagementCommand};
//! use strata_migrations::MigrationResult;
//!
//! struct PingCommand;
//!
//! #[async_trait]
//! impl ManagementCommand for PingCommand {
//!     fn name(&self) -> &'static str { "ping" }
//!     fn help(&self) -> &'static str { "Check the database connection" }
//!
//!     async fn handle(
//!         &self,
//!         _matches: &clap::ArgMatches,
//!         ctx: &CommandContext,
//!     ) -> MigrationResult<String> {
//!         ctx.db.execute("SELECT 1", &[]).await?;
//!         Ok("pong\n".to_string())
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use strata_core::{Settings, StrataError};
use strata_db::DatabaseContext;
use strata_migrations::MigrationResult;
use tokio_util::sync::CancellationToken;

/// What a command runs against.
pub struct CommandContext {
    pub settings: Settings,
    pub db: Arc<dyn DatabaseContext>,
    /// Cancelled when the user interrupts the process.
    pub cancel: CancellationToken,
}

/// A subcommand of the `strata` CLI.
#[async_trait]
pub trait ManagementCommand: Send + Sync {
    /// The name the command is invoked by.
    fn name(&self) -> &'static str;

    /// A short help description.
    fn help(&self) -> &'static str;

    /// Adds the command's arguments. The default adds none.
    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd
    }

    /// Runs the command and returns the text to print.
    async fn handle(
        &self,
        matches: &clap::ArgMatches,
        ctx: &CommandContext,
    ) -> MigrationResult<String>;
}

/// The registered commands, keyed by name.
pub struct CommandRegistry {
    commands: HashMap<&'static str, Box<dyn ManagementCommand>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Registers a command, replacing one with the same name.
    pub fn register(&mut self, command: Box<dyn ManagementCommand>) {
        self.commands.insert(command.name(), command);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ManagementCommand> {
        self.commands.get(name).map(AsRef::as_ref)
    }

    /// Registered command names, sorted.
    pub fn list_commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Builds the top-level clap command with every registered subcommand.
    pub fn build_cli(&self) -> clap::Command {
        let mut app = clap::Command::new("strata")
            .about("Versioned schema and data migrations")
            .version(env!("CARGO_PKG_VERSION"))
            .subcommand_required(true)
            .arg(
                clap::Arg::new("settings")
                    .long("settings")
                    .global(true)
                    .value_parser(clap::value_parser!(std::path::PathBuf))
                    .help("Settings file (TOML or JSON)"),
            );
        for name in self.list_commands() {
            if let Some(cmd) = self.get(name) {
                let subcmd = clap::Command::new(cmd.name()).about(cmd.help());
                app = app.subcommand(cmd.add_arguments(subcmd));
            }
        }
        app
    }

    /// Dispatches `matches` to the selected subcommand.
    ///
    /// # Errors
    ///
    /// Fails when no known subcommand was selected, or with the command's
    /// own error.
    pub async fn execute(
        &self,
        matches: &clap::ArgMatches,
        ctx: &CommandContext,
    ) -> MigrationResult<String> {
        let (name, sub_matches) = matches.subcommand().ok_or_else(|| {
            StrataError::ConfigurationError("No subcommand specified".to_string())
        })?;
        let cmd = self.get(name).ok_or_else(|| {
            StrataError::ConfigurationError(format!("Unknown command: {name}"))
        })?;
        tracing::debug!(command = name, "Running command");
        cmd.handle(sub_matches, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_test::RecordingContext;

    struct EchoCommand;

    #[async_trait]
    impl ManagementCommand for EchoCommand {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn help(&self) -> &'static str {
            "Echo a word"
        }

        fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
            cmd.arg(clap::Arg::new("word").required(true))
        }

        async fn handle(
            &self,
            matches: &clap::ArgMatches,
            _ctx: &CommandContext,
        ) -> MigrationResult<String> {
            Ok(matches
                .get_one::<String>("word")
                .cloned()
                .unwrap_or_default())
        }
    }

    fn ctx() -> CommandContext {
        CommandContext {
            settings: Settings::default(),
            db: Arc::new(RecordingContext::new("shop")),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_registry_register_and_list() {
        let mut registry = CommandRegistry::new();
        assert!(registry.is_empty());
        registry.register(Box::new(EchoCommand));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_commands(), vec!["echo"]);
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(EchoCommand));
        let matches = registry
            .build_cli()
            .try_get_matches_from(["strata", "echo", "hello"])
            .unwrap();
        assert_eq!(registry.execute(&matches, &ctx()).await.unwrap(), "hello");
    }

    #[test]
    fn test_settings_is_global() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(EchoCommand));
        let matches = registry
            .build_cli()
            .try_get_matches_from(["strata", "--settings", "strata.toml", "echo", "hi"])
            .unwrap();
        assert_eq!(
            matches
                .get_one::<std::path::PathBuf>("settings")
                .map(|p| p.display().to_string()),
            Some("strata.toml".to_string())
        );
    }
}
