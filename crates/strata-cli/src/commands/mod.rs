//! Built-in commands.
//!
//! Each command implements [`ManagementCommand`](crate::command::ManagementCommand)
//! and reads its roadmap layout from the migration settings.

pub mod migrate;
pub mod showhistory;
pub mod showroadmap;

use std::path::Path;
use std::sync::Arc;

pub use migrate::MigrateCommand;
pub use showhistory::ShowhistoryCommand;
pub use showroadmap::ShowroadmapCommand;

use strata_db::{PostgresSchemaBuilder, PostgresTypeMapper};
use strata_migrations::{
    DirectoryResourceLoader, MigrationContext, MigrationOptions, RoadmapProvider,
};

use crate::command::{CommandContext, CommandRegistry};

/// Registers all built-in commands into the given registry.
pub fn register_builtin_commands(registry: &mut CommandRegistry) {
    registry.register(Box::new(MigrateCommand));
    registry.register(Box::new(ShowroadmapCommand));
    registry.register(Box::new(ShowhistoryCommand));
}

/// A roadmap read from a directory of phase and script files.
pub fn roadmap_provider(dir: &Path) -> RoadmapProvider {
    RoadmapProvider::new(Arc::new(DirectoryResourceLoader::new(dir)))
}

/// Every configured roadmap as `(name, provider)`, core first.
pub fn roadmap_providers(ctx: &CommandContext) -> Vec<(String, RoadmapProvider)> {
    let migrations = &ctx.settings.migrations;
    std::iter::once(("core".to_string(), roadmap_provider(&migrations.roadmap_dir)))
        .chain(
            migrations
                .modules
                .iter()
                .map(|module| (module.name.clone(), roadmap_provider(&module.roadmap_dir))),
        )
        .collect()
}

/// A migration context over the configured database and roadmaps.
pub fn migration_context(ctx: &CommandContext) -> MigrationContext {
    let migrations = &ctx.settings.migrations;
    migrations.modules.iter().fold(
        MigrationContext::new(
            Arc::clone(&ctx.db),
            Arc::new(PostgresSchemaBuilder),
            Arc::new(PostgresTypeMapper),
            roadmap_provider(&migrations.roadmap_dir),
            MigrationOptions::from_settings(migrations),
        ),
        |context, module| context.with_module(&module.name, roadmap_provider(&module.roadmap_dir)),
    )
}
