//! The `migrate` command.
//!
//! Resolves the configured roadmaps against the database and migrates it to
//! the target version, or to the latest one.

use std::fmt::Write as _;

use async_trait::async_trait;
use strata_migrations::{MigrationReport, MigrationResult, PhaseVersion};

use super::migration_context;
use crate::command::{CommandContext, ManagementCommand};

/// Migrates the database.
///
/// `--plan` prints what would happen without touching the database.
pub struct MigrateCommand;

#[async_trait]
impl ManagementCommand for MigrateCommand {
    fn name(&self) -> &'static str {
        "migrate"
    }

    fn help(&self) -> &'static str {
        "Migrate the database to a roadmap version"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("target")
                .long("target")
                .value_name("VERSION")
                .help("Core roadmap version to migrate to (default: latest)"),
        )
        .arg(
            clap::Arg::new("plan")
                .long("plan")
                .action(clap::ArgAction::SetTrue)
                .help("Show the migration plan without running it"),
        )
    }

    async fn handle(
        &self,
        matches: &clap::ArgMatches,
        ctx: &CommandContext,
    ) -> MigrationResult<String> {
        let target = matches
            .get_one::<String>("target")
            .map(|t| t.parse::<PhaseVersion>())
            .transpose()?;
        let mut migration = migration_context(ctx);
        let mut out = migration.initialize(target, &ctx.cancel).await?.to_string();
        if matches.get_flag("plan") {
            return Ok(out);
        }
        let report = migration.migrate(&ctx.cancel).await?;
        out.push_str(&render_report(&report));
        Ok(out)
    }
}

/// The closing lines printed after a migration.
pub fn render_report(report: &MigrationReport) -> String {
    if report.up_to_date {
        return "Database is up to date.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "Migrated to {}.", report.info.core.target_version);
    if let Some(backup) = &report.backup_database {
        let transfer = &report.transfer;
        let _ = writeln!(
            out,
            "Copied {} rows ({} tables, {} transfers). Previous data kept in {backup}.",
            transfer.rows, transfer.tables, transfer.transfers
        );
    }
    out
}
