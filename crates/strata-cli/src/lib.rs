//! # strata-cli
//!
//! The `strata` command-line interface.
//!
//! - [`command`] - The [`ManagementCommand`] trait and [`CommandRegistry`]
//! - [`commands`] - `migrate`, `showroadmap`, and `showhistory`
//! - [`bootstrap`] - Settings loading and database connection
//!
//! ```rust
//! use strata_cli::command::CommandRegistry;
//! use strata_cli::commands::register_builtin_commands;
//!
//! let mut registry = CommandRegistry::new();
//! register_builtin_commands(&mut registry);
//! assert!(registry.list_commands().contains(&"migrate"));
//! ```

// These clippy lints are intentionally allowed:
// - result_large_err: MigrationError is the error type of every command
// - doc_markdown: backtick requirements for documentation items are too strict
// - unused_async: command handlers keep a consistent async signature
#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]

pub mod bootstrap;
pub mod command;
pub mod commands;

pub use bootstrap::{connect, load_settings};
pub use command::{CommandContext, CommandRegistry, ManagementCommand};
