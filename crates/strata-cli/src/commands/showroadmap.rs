//! The `showroadmap` command.
//!
//! Lists the phases of the core roadmap and of every module, marking the
//! ones the database has already reached.

use std::fmt::Write as _;

use async_trait::async_trait;
use strata_migrations::{
    HistoryRecorder, HistoryTable, MigrationPhase, MigrationResult, PhaseVersion,
};

use super::roadmap_providers;
use crate::command::{CommandContext, ManagementCommand};

/// Shows every roadmap phase and whether it is applied.
pub struct ShowroadmapCommand;

#[async_trait]
impl ManagementCommand for ShowroadmapCommand {
    fn name(&self) -> &'static str {
        "showroadmap"
    }

    fn help(&self) -> &'static str {
        "List roadmap phases and their status"
    }

    async fn handle(
        &self,
        _matches: &clap::ArgMatches,
        ctx: &CommandContext,
    ) -> MigrationResult<String> {
        let history = HistoryTable::from_settings(&ctx.settings.migrations);
        let current = HistoryRecorder::new(ctx.db.as_ref(), &history)
            .current_versions()
            .await?;

        let mut out = String::new();
        for (index, (name, provider)) in roadmap_providers(ctx).into_iter().enumerate() {
            let reached = if index == 0 {
                current.core.as_ref()
            } else {
                current.module(&name)
            };
            let phases = provider.load_all(&ctx.cancel)?;
            out.push_str(&render_roadmap(&name, &phases, reached));
        }
        Ok(out)
    }
}

/// One roadmap as a block of `[X]`/`[ ]` lines.
pub fn render_roadmap(
    name: &str,
    phases: &[MigrationPhase],
    current: Option<&PhaseVersion>,
) -> String {
    let mut out = format!("{name}\n");
    for phase in phases {
        let mark = if current.is_some_and(|c| phase.version <= *c) {
            'X'
        } else {
            ' '
        };
        let _ = writeln!(out, " [{mark}] {} {}", phase.version, phase.title);
    }
    out
}
