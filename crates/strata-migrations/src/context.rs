//! The migration state machine.
//!
//! A [`MigrationContext`] is initialized against a database, which resolves
//! the core roadmap and every module roadmap into one merged rule map, and
//! then migrated. A database with no recorded version is built in place.
//! A database with a recorded version is swapped: it is renamed to a backup,
//! rebuilt empty, and its data copied across. Any failure during a swap runs
//! the compensating rollback before the error is returned.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use strata_core::logging::migration_span;
use strata_core::MigrationSettings;
use strata_db::{DatabaseContext, SchemaBuilder, TypeMapper};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::error::{MigrationError, MigrationResult};
use crate::history::{CurrentVersions, HistoryRecorder, HistoryTable, NewSchemaPhase};
use crate::info::{MigrationOperationInfo, MigrationRoadmapInfo};
use crate::merger::{full_merge, safe_merge};
use crate::roadmap::{check_cancelled, DdlScript, Roadmap, RoadmapBuilder, RoadmapProvider};
use crate::transaction::MigrationTransactionManager;
use crate::transaction_map::DataTransactionMap;
use crate::transfer::{DataTransferEngine, TransferStats};
use crate::version::PhaseVersion;

/// PostgreSQL truncates identifiers longer than this.
const MAX_IDENTIFIER_BYTES: usize = 63;

/// Where a [`MigrationContext`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Uninitialized,
    Initialized,
    Migrating,
    Completed,
    RolledBack,
    Failed,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Migrating => "migrating",
            Self::Completed => "completed",
            Self::RolledBack => "rolled back",
            Self::Failed => "failed",
        })
    }
}

/// Names used while migrating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    pub history_table: HistoryTable,
    /// Prefix of the staging tables created during data transfer.
    pub staging_prefix: String,
    /// Inserted into backup database names.
    pub backup_suffix: String,
}

impl MigrationOptions {
    pub fn from_settings(settings: &MigrationSettings) -> Self {
        Self {
            history_table: HistoryTable::from_settings(settings),
            staging_prefix: settings.staging_prefix.clone(),
            backup_suffix: settings.backup_suffix.clone(),
        }
    }
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self::from_settings(&MigrationSettings::default())
    }
}

/// A named module roadmap migrated alongside the core roadmap.
#[derive(Debug, Clone)]
pub struct ModuleRoadmap {
    pub name: String,
    pub provider: RoadmapProvider,
}

/// The outcome of [`MigrationContext::migrate`].
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    pub info: MigrationOperationInfo,
    /// The database was already at its targets and nothing ran.
    pub up_to_date: bool,
    /// The database the previous data was moved to, for swapped migrations.
    pub backup_database: Option<String>,
    pub transfer: TransferStats,
    /// Ids of the history rows written, core first. Roadmaps already at
    /// their target get no row.
    pub history_ids: Vec<i64>,
}

#[derive(Debug)]
struct MigrationPlan {
    info: MigrationOperationInfo,
    map: DataTransactionMap,
    current: CurrentVersions,
    core: Roadmap,
    modules: Vec<(String, Roadmap)>,
}

/// Plans and runs a migration of one database.
pub struct MigrationContext {
    db: Arc<dyn DatabaseContext>,
    schema: Arc<dyn SchemaBuilder>,
    types: Arc<dyn TypeMapper>,
    core: RoadmapProvider,
    modules: Vec<ModuleRoadmap>,
    options: MigrationOptions,
    state: MigrationState,
    plan: Option<MigrationPlan>,
}

impl MigrationContext {
    pub fn new(
        db: Arc<dyn DatabaseContext>,
        schema: Arc<dyn SchemaBuilder>,
        types: Arc<dyn TypeMapper>,
        core: RoadmapProvider,
        options: MigrationOptions,
    ) -> Self {
        Self {
            db,
            schema,
            types,
            core,
            modules: Vec::new(),
            options,
            state: MigrationState::Uninitialized,
            plan: None,
        }
    }

    /// Adds a module roadmap. Modules migrate in the order they are added.
    #[must_use]
    pub fn with_module(mut self, name: impl Into<String>, provider: RoadmapProvider) -> Self {
        self.modules.push(ModuleRoadmap {
            name: name.into(),
            provider,
        });
        self
    }

    pub const fn state(&self) -> MigrationState {
        self.state
    }

    /// The plan computed by the last successful [`initialize`](Self::initialize).
    pub fn info(&self) -> Option<&MigrationOperationInfo> {
        self.plan.as_ref().map(|plan| &plan.info)
    }

    /// The merged rule map computed by the last successful initialize.
    pub fn map(&self) -> Option<&DataTransactionMap> {
        self.plan.as_ref().map(|plan| &plan.map)
    }

    fn require_admin(&self) -> MigrationResult<String> {
        self.db
            .admin_database()
            .ok_or_else(|| MigrationError::NoAdminDatabase {
                vendor: self.db.vendor().to_string(),
            })
    }

    fn invalid_state(&self, operation: &'static str) -> MigrationError {
        MigrationError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    /// Resolves every roadmap against the database and computes the plan.
    ///
    /// `target` limits the core roadmap; modules always go to their latest
    /// version.
    ///
    /// # Errors
    ///
    /// Fails without an administrative database, while a migration runs,
    /// and on any roadmap validation error. A failed initialize keeps no plan.
    pub async fn initialize(
        &mut self,
        target: Option<PhaseVersion>,
        cancel: &CancellationToken,
    ) -> MigrationResult<&MigrationOperationInfo> {
        if self.state == MigrationState::Migrating {
            return Err(self.invalid_state("initialize"));
        }
        self.plan = None;
        self.state = MigrationState::Uninitialized;
        self.require_admin()?;
        check_cancelled(cancel)?;

        let current = HistoryRecorder::new(self.db.as_ref(), &self.options.history_table)
            .current_versions()
            .await?;
        let core = RoadmapBuilder::new(&self.core).build(
            current.core.as_ref(),
            target.as_ref(),
            cancel,
        )?;
        let modules = self.build_module_roadmaps(&current, cancel).await?;

        let mut module_maps: Vec<DataTransactionMap> =
            modules.iter().map(|(_, roadmap)| roadmap.map.clone()).collect();
        if current.core.is_some() {
            let history = self.options.history_table.phase(self.types.as_ref());
            module_maps.push(DataTransactionMap::from_phases(
                &[history],
                current.core.as_ref(),
            )?);
        }
        let merged = safe_merge(module_maps, None)?;
        let map = full_merge(&core.map, merged)?;

        let info = MigrationOperationInfo {
            core: MigrationRoadmapInfo::from_roadmap(&core),
            modules: modules
                .iter()
                .map(|(name, roadmap)| (name.clone(), MigrationRoadmapInfo::from_roadmap(roadmap)))
                .collect::<IndexMap<_, _>>(),
            schema_changes: map.summary(),
        };
        info!(
            database = %self.db.database_name(),
            core = %info.core,
            modules = info.modules.len(),
            tables = map.tables().len(),
            transfers = map.transfers().len(),
            "Migration initialized"
        );
        debug!(summary = %info.schema_changes, "Planned schema changes");

        self.state = MigrationState::Initialized;
        let plan = self.plan.insert(MigrationPlan {
            info,
            map,
            current,
            core,
            modules,
        });
        Ok(&plan.info)
    }

    /// Builds one roadmap per module, each on its own blocking task.
    async fn build_module_roadmaps(
        &self,
        current: &CurrentVersions,
        cancel: &CancellationToken,
    ) -> MigrationResult<Vec<(String, Roadmap)>> {
        let mut tasks = JoinSet::new();
        for (index, module) in self.modules.iter().enumerate() {
            let provider = module.provider.clone();
            let name = module.name.clone();
            let current = current.module(&name).cloned();
            let cancel = cancel.clone();
            tasks.spawn_blocking(move || {
                let roadmap = RoadmapBuilder::new(&provider).build(current.as_ref(), None, &cancel);
                (index, name, roadmap)
            });
        }
        let mut built = Vec::with_capacity(self.modules.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, name, roadmap) =
                joined.map_err(|e| MigrationError::TaskFailed(e.to_string()))?;
            let roadmap = roadmap?;
            built.push((index, name, roadmap));
        }
        built.sort_by_key(|(index, _, _)| *index);
        Ok(built
            .into_iter()
            .map(|(_, name, roadmap)| (name, roadmap))
            .collect())
    }

    /// Runs the planned migration.
    ///
    /// # Errors
    ///
    /// Fails unless initialized, without an administrative database, and on
    /// any execution error. Errors during a swap are returned after the
    /// rollback has run.
    pub async fn migrate(&mut self, cancel: &CancellationToken) -> MigrationResult<MigrationReport> {
        if self.state != MigrationState::Initialized {
            return Err(self.invalid_state("migrate"));
        }
        self.require_admin()?;
        check_cancelled(cancel)?;
        let plan = self
            .plan
            .take()
            .ok_or_else(|| self.invalid_state("migrate"))?;

        let database = self.db.database_name();
        let target = plan.core.target.to_string();
        let span = migration_span(&database, Some(&target));

        if plan.info.is_up_to_date() {
            span.in_scope(|| info!("Database is up to date"));
            self.state = MigrationState::Completed;
            return Ok(MigrationReport {
                info: plan.info,
                up_to_date: true,
                backup_database: None,
                transfer: TransferStats::default(),
                history_ids: Vec::new(),
            });
        }

        self.state = MigrationState::Migrating;
        let outcome = match plan.current.core.clone() {
            Some(current) => {
                let result = self
                    .migrate_swap(&plan, &database, &current, cancel)
                    .instrument(span)
                    .await;
                result.map_err(|e| (e, MigrationState::RolledBack))
            }
            None => {
                let result = self.migrate_fresh(&plan, cancel).instrument(span).await;
                result.map_err(|e| (e, MigrationState::Failed))
            }
        };
        match outcome {
            Ok(report) => {
                self.state = MigrationState::Completed;
                info!(database = %database, target = %target, "Migration completed");
                Ok(report)
            }
            Err((e, state)) => {
                self.state = state;
                Err(e)
            }
        }
    }

    async fn migrate_fresh(
        &self,
        plan: &MigrationPlan,
        cancel: &CancellationToken,
    ) -> MigrationResult<MigrationReport> {
        info!("Building schema in an empty database");
        self.db.begin_transaction().await?;
        let result = async {
            self.run_scripts(plan, cancel).await?;
            self.ensure_history_table().await?;
            self.record_history(plan).await
        }
        .await;
        match result {
            Ok(history_ids) => {
                self.db.commit().await?;
                Ok(MigrationReport {
                    info: plan.info.clone(),
                    up_to_date: false,
                    backup_database: None,
                    transfer: TransferStats::default(),
                    history_ids,
                })
            }
            Err(e) => {
                self.abandon_transaction().await;
                Err(e)
            }
        }
    }

    async fn migrate_swap(
        &self,
        plan: &MigrationPlan,
        database: &str,
        current: &PhaseVersion,
        cancel: &CancellationToken,
    ) -> MigrationResult<MigrationReport> {
        let backup = backup_name(database, &self.options.backup_suffix, current, Utc::now());
        let mut manager = MigrationTransactionManager::new(self.db.as_ref(), self.schema.as_ref());
        match self
            .swap_and_migrate(&mut manager, plan, database, &backup, cancel)
            .await
        {
            Ok((transfer, history_ids)) => Ok(MigrationReport {
                info: plan.info.clone(),
                up_to_date: false,
                backup_database: Some(backup),
                transfer,
                history_ids,
            }),
            Err(e) => {
                warn!(error = %e, "Migration failed, rolling back");
                self.abandon_transaction().await;
                manager.rollback_migration(database, &backup).await;
                Err(e.after_rollback())
            }
        }
    }

    async fn swap_and_migrate(
        &self,
        manager: &mut MigrationTransactionManager<'_>,
        plan: &MigrationPlan,
        database: &str,
        backup: &str,
        cancel: &CancellationToken,
    ) -> MigrationResult<(TransferStats, Vec<i64>)> {
        manager
            .prepare_database_for_migration(database, backup)
            .await?;

        self.db.begin_transaction().await?;
        self.run_scripts(plan, cancel).await?;
        self.ensure_history_table().await?;
        self.db.commit().await?;

        let source = self.db.connect_to(backup).await?;
        let engine = DataTransferEngine::new(
            source.as_ref(),
            self.db.as_ref(),
            self.schema.as_ref(),
            &self.options.staging_prefix,
        );
        let transfer = engine.run(&plan.map, cancel).await?;
        drop(source);

        self.db.begin_transaction().await?;
        let history_ids = self.record_history(plan).await?;
        self.db.commit().await?;
        Ok((transfer, history_ids))
    }

    /// Rolls back an open transaction, if any, ignoring the outcome.
    async fn abandon_transaction(&self) {
        if let Err(e) = self.db.rollback().await {
            debug!(error = %e, "No transaction to roll back");
        }
    }

    /// The DDL scripts of the core roadmap, then of each module, up to
    /// their targets.
    fn scripts(
        &self,
        plan: &MigrationPlan,
        cancel: &CancellationToken,
    ) -> MigrationResult<Vec<DdlScript>> {
        let mut scripts = self
            .core
            .load_scripts(Some(&plan.core.target), cancel)?;
        for (name, roadmap) in &plan.modules {
            if let Some(module) = self.modules.iter().find(|m| &m.name == name) {
                scripts.extend(module.provider.load_scripts(Some(&roadmap.target), cancel)?);
            }
        }
        Ok(scripts)
    }

    async fn run_scripts(
        &self,
        plan: &MigrationPlan,
        cancel: &CancellationToken,
    ) -> MigrationResult<()> {
        for script in self.scripts(plan, cancel)? {
            check_cancelled(cancel)?;
            info!(script = %script.name, version = %script.version, "Running DDL script");
            self.db
                .execute_batch(&script.sql)
                .await
                .map_err(|source| MigrationError::Script {
                    script: script.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn ensure_history_table(&self) -> MigrationResult<()> {
        let history = &self.options.history_table;
        if HistoryRecorder::new(self.db.as_ref(), history).exists().await? {
            return Ok(());
        }
        let sql = self
            .schema
            .create_table(&history.definition(self.types.as_ref()), self.db.enclosure());
        debug!(%sql, "Creating history table");
        self.db.execute_batch(&sql).await?;
        Ok(())
    }

    /// Writes one history row per roadmap that moved. Module rows point at
    /// the core row of this run, or at the existing core row when only
    /// modules moved.
    async fn record_history(&self, plan: &MigrationPlan) -> MigrationResult<Vec<i64>> {
        let recorder = HistoryRecorder::new(self.db.as_ref(), &self.options.history_table);
        let core = &plan.info.core;
        let mut ids = Vec::new();
        let core_id = if core.is_up_to_date() {
            recorder.find_id(None, &core.target_version).await?
        } else {
            let id = recorder
                .insert(&NewSchemaPhase {
                    version: core.target_version.clone(),
                    package: None,
                    parent: None,
                    title: core.title.clone(),
                    description: core.description.clone(),
                    summary: plan.info.schema_changes.clone(),
                })
                .await?;
            ids.push(id);
            Some(id)
        };
        for (name, module) in &plan.info.modules {
            if module.is_up_to_date() {
                continue;
            }
            let id = recorder
                .insert(&NewSchemaPhase {
                    version: module.target_version.clone(),
                    package: Some(name.clone()),
                    parent: core_id,
                    title: module.title.clone(),
                    description: module.description.clone(),
                    summary: module.schema_changes.clone(),
                })
                .await?;
            ids.push(id);
        }
        Ok(ids)
    }
}

/// The name a database is moved to before it is rebuilt.
///
/// `<database>_<suffix>_<version with underscores>_<UTC timestamp>`.
/// The database part is shortened to fit the provider's identifier limit, so
/// the suffix, version and timestamp always survive.
pub fn backup_name(
    database: &str,
    suffix: &str,
    version: &PhaseVersion,
    at: DateTime<Utc>,
) -> String {
    let tail = format!(
        "_{suffix}_{}_{}",
        version.underscored(),
        at.format("%Y%m%d%H%M%S")
    );
    let room = MAX_IDENTIFIER_BYTES.saturating_sub(tail.len());
    let mut name = format!("{}{tail}", truncate_on_char_boundary(database, room));
    if name.len() > MAX_IDENTIFIER_BYTES {
        name = truncate_on_char_boundary(&name, MAX_IDENTIFIER_BYTES).to_string();
    }
    name
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
