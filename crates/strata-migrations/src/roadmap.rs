//! Loading roadmaps and building their rule maps.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{MigrationError, MigrationResult};
use crate::phase::MigrationPhase;
use crate::resources::ResourceLoader;
use crate::transaction_map::DataTransactionMap;
use crate::version::PhaseVersion;

const PHASE_EXTENSION: &str = ".json";
const SCRIPT_EXTENSION: &str = ".sql";

/// A DDL script resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlScript {
    /// The resource name.
    pub name: String,
    /// The version parsed from the name.
    pub version: PhaseVersion,
    pub sql: String,
}

/// Loads and validates the phases and scripts of one roadmap.
#[derive(Clone)]
pub struct RoadmapProvider {
    loader: Arc<dyn ResourceLoader>,
}

impl std::fmt::Debug for RoadmapProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoadmapProvider")
            .field("source", &self.loader.describe())
            .finish()
    }
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> MigrationResult<()> {
    if cancel.is_cancelled() {
        Err(MigrationError::Cancelled)
    } else {
        Ok(())
    }
}

impl RoadmapProvider {
    pub fn new(loader: Arc<dyn ResourceLoader>) -> Self {
        Self { loader }
    }

    /// Where the roadmap resources come from.
    pub fn describe(&self) -> String {
        self.loader.describe()
    }

    /// Loads every phase, ascending by version.
    ///
    /// # Errors
    ///
    /// Fails when the resources are unavailable, contain no phases, or a
    /// phase does not parse and validate.
    pub fn load_all(&self, cancel: &CancellationToken) -> MigrationResult<Vec<MigrationPhase>> {
        let mut phases = Vec::new();
        for name in self.loader.list()? {
            if !name.ends_with(PHASE_EXTENSION) {
                continue;
            }
            check_cancelled(cancel)?;
            let text = self.loader.read(&name)?;
            let phase = MigrationPhase::from_json(&name, &text)?;
            debug!(resource = %name, version = %phase.version, "Loaded phase");
            phases.push(phase);
        }
        if phases.is_empty() {
            return Err(MigrationError::EmptyRoadmap);
        }
        phases.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(phases)
    }

    /// Loads the phases up to and including `target`, or all of them.
    ///
    /// # Errors
    ///
    /// See [`RoadmapProvider::load_all`].
    pub fn load_phases(
        &self,
        target: Option<&PhaseVersion>,
        cancel: &CancellationToken,
    ) -> MigrationResult<Vec<MigrationPhase>> {
        let mut phases = self.load_all(cancel)?;
        if let Some(target) = target {
            phases.retain(|phase| phase.version <= *target);
        }
        Ok(phases)
    }

    /// Loads the DDL scripts up to and including `target`, ascending.
    ///
    /// Scripts sharing a version run in name order.
    ///
    /// # Errors
    ///
    /// Fails when the resources are unavailable or a script name does not
    /// start with a version.
    pub fn load_scripts(
        &self,
        target: Option<&PhaseVersion>,
        cancel: &CancellationToken,
    ) -> MigrationResult<Vec<DdlScript>> {
        let mut scripts = Vec::new();
        for name in self.loader.list()? {
            let Some(stem) = name.strip_suffix(SCRIPT_EXTENSION) else {
                continue;
            };
            check_cancelled(cancel)?;
            let prefix = stem.split_once('_').map_or(stem, |(version, _)| version);
            let version: PhaseVersion =
                prefix.parse().map_err(|_| MigrationError::InvalidPhase {
                    resource: name.clone(),
                    reason: "script names must start with a version".to_string(),
                })?;
            if target.is_some_and(|t| version > *t) {
                continue;
            }
            let sql = self.loader.read(&name)?;
            scripts.push(DdlScript { name, version, sql });
        }
        scripts.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.name.cmp(&b.name)));
        Ok(scripts)
    }
}

/// A validated roadmap resolved against a database's current version.
#[derive(Debug, Clone)]
pub struct Roadmap {
    /// The phases up to the effective target, ascending.
    pub phases: Vec<MigrationPhase>,
    /// The accumulated rules for carrying data to the target.
    pub map: DataTransactionMap,
    /// The version the database is at, if any.
    pub current: Option<PhaseVersion>,
    /// The effective target version.
    pub target: PhaseVersion,
    /// The newest version in the roadmap.
    pub latest: PhaseVersion,
}

impl Roadmap {
    /// The last phase at or below the target.
    pub fn last_phase(&self) -> Option<&MigrationPhase> {
        self.phases.last()
    }

    /// Returns `true` when the database is already at the target.
    pub fn is_up_to_date(&self) -> bool {
        self.current.as_ref() == Some(&self.target)
    }
}

/// Resolves a provider's phases into a [`Roadmap`].
#[derive(Debug)]
pub struct RoadmapBuilder<'a> {
    provider: &'a RoadmapProvider,
}

impl<'a> RoadmapBuilder<'a> {
    pub const fn new(provider: &'a RoadmapProvider) -> Self {
        Self { provider }
    }

    /// Builds the roadmap from `current` to `target` (the latest when absent).
    ///
    /// # Errors
    ///
    /// Fails when the target is older than `current`, versions repeat, or
    /// the phases do not produce a valid rule map.
    pub fn build(
        &self,
        current: Option<&PhaseVersion>,
        target: Option<&PhaseVersion>,
        cancel: &CancellationToken,
    ) -> MigrationResult<Roadmap> {
        let all = self.provider.load_all(cancel)?;
        for pair in all.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(MigrationError::DuplicateVersion {
                    version: pair[1].version.clone(),
                });
            }
        }
        let latest = all
            .last()
            .map(|phase| phase.version.clone())
            .ok_or(MigrationError::EmptyRoadmap)?;
        let target = target.cloned().unwrap_or_else(|| latest.clone());
        if let Some(current) = current {
            if target < *current {
                return Err(MigrationError::TargetBehindCurrent {
                    target,
                    current: current.clone(),
                });
            }
        }

        let phases: Vec<MigrationPhase> = all
            .into_iter()
            .filter(|phase| phase.version <= target)
            .collect();
        let map = DataTransactionMap::from_phases(&phases, current)?;
        info!(
            source = %self.provider.describe(),
            current = current.map(ToString::to_string).as_deref().unwrap_or("none"),
            target = %target,
            phases = phases.len(),
            "Built roadmap"
        );
        Ok(Roadmap {
            phases,
            map,
            current: current.cloned(),
            target,
            latest,
        })
    }
}
