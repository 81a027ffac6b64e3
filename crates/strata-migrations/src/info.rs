//! Summaries of a planned migration.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::roadmap::Roadmap;
use crate::version::PhaseVersion;

/// What one roadmap will do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationRoadmapInfo {
    pub current_version: Option<PhaseVersion>,
    pub target_version: PhaseVersion,
    pub latest_version: PhaseVersion,
    /// Title of the last phase at or below the target.
    pub title: String,
    pub description: Option<String>,
    /// The roadmap's rule-map summary.
    pub schema_changes: String,
}

impl MigrationRoadmapInfo {
    pub fn from_roadmap(roadmap: &Roadmap) -> Self {
        let last = roadmap.last_phase();
        Self {
            current_version: roadmap.current.clone(),
            target_version: roadmap.target.clone(),
            latest_version: roadmap.latest.clone(),
            title: last.map(|p| p.title.clone()).unwrap_or_default(),
            description: last.and_then(|p| p.description.clone()),
            schema_changes: roadmap.map.summary(),
        }
    }

    /// Returns `true` when the database is already at the target.
    pub fn is_up_to_date(&self) -> bool {
        self.current_version.as_ref() == Some(&self.target_version)
    }
}

impl fmt::Display for MigrationRoadmapInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.current_version {
            Some(current) => write!(f, "{current} -> {}", self.target_version)?,
            None => write!(f, "(new) -> {}", self.target_version)?,
        }
        if self.target_version != self.latest_version {
            write!(f, " (latest {})", self.latest_version)?;
        }
        if !self.title.is_empty() {
            write!(f, ": {}", self.title)?;
        }
        Ok(())
    }
}

/// What a whole migration run will do: the core roadmap plus every module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationOperationInfo {
    pub core: MigrationRoadmapInfo,
    pub modules: IndexMap<String, MigrationRoadmapInfo>,
    /// Summary of the merged rule map the migration executes.
    pub schema_changes: String,
}

impl MigrationOperationInfo {
    /// Returns `true` when the core roadmap and every module are at their targets.
    pub fn is_up_to_date(&self) -> bool {
        self.core.is_up_to_date() && self.modules.values().all(MigrationRoadmapInfo::is_up_to_date)
    }
}

impl fmt::Display for MigrationOperationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "core {}", self.core)?;
        for (name, module) in &self.modules {
            writeln!(f, "module {name} {module}")?;
        }
        write!(f, "{}", self.schema_changes)
    }
}
