//! The `showhistory` command.
//!
//! Prints the rows of the schema history table, oldest first.

use std::fmt::Write as _;

use async_trait::async_trait;
use strata_migrations::{HistoryRecorder, HistoryTable, MigrationResult, SchemaPhase};

use crate::command::{CommandContext, ManagementCommand};

/// Shows the recorded schema history.
pub struct ShowhistoryCommand;

#[async_trait]
impl ManagementCommand for ShowhistoryCommand {
    fn name(&self) -> &'static str {
        "showhistory"
    }

    fn help(&self) -> &'static str {
        "Show the schema history of the database"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("package")
                .long("package")
                .help("Only show rows of this module (\"core\" for the core roadmap)"),
        )
        .arg(
            clap::Arg::new("summary")
                .long("summary")
                .action(clap::ArgAction::SetTrue)
                .help("Include the schema change summary of each row"),
        )
    }

    async fn handle(
        &self,
        matches: &clap::ArgMatches,
        ctx: &CommandContext,
    ) -> MigrationResult<String> {
        let history = HistoryTable::from_settings(&ctx.settings.migrations);
        let rows = HistoryRecorder::new(ctx.db.as_ref(), &history).list().await?;
        let package = matches.get_one::<String>("package").map(String::as_str);
        let rows: Vec<SchemaPhase> = rows
            .into_iter()
            .filter(|row| package.map_or(true, |p| package_label(row) == p))
            .collect();
        Ok(render_history(&rows, matches.get_flag("summary")))
    }
}

fn package_label(row: &SchemaPhase) -> &str {
    row.package.as_deref().unwrap_or("core")
}

/// History rows, one per line.
pub fn render_history(rows: &[SchemaPhase], with_summary: bool) -> String {
    if rows.is_empty() {
        return "No schema history.\n".to_string();
    }
    let mut out = String::new();
    for row in rows {
        let _ = writeln!(
            out,
            "{:>4}  {}@{}  {}  {}",
            row.id,
            package_label(row),
            row.version,
            row.applied.format("%Y-%m-%d %H:%M:%S"),
            row.title
        );
        if with_summary {
            for line in row.summary.lines() {
                let _ = writeln!(out, "      {line}");
            }
        }
    }
    out
}
