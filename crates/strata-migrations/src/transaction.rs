//! The database swap and its compensating rollback.
//!
//! A migration never rewrites the live database in place. The database is
//! renamed to a backup, an empty database is created under the original
//! name, and data is copied across. Each forward step that succeeds pushes
//! the step that undoes it; rollback runs those compensations in reverse,
//! each one guarded so a failing step does not stop the rest.

use strata_db::{DatabaseContext, SchemaBuilder};
use tracing::{info, warn};

use crate::error::{MigrationError, MigrationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compensation {
    RenameBack,
    Drop,
}

/// Performs the swap on one connection and remembers how to undo it.
pub struct MigrationTransactionManager<'a> {
    db: &'a dyn DatabaseContext,
    schema: &'a dyn SchemaBuilder,
    compensations: Vec<Compensation>,
}

impl<'a> MigrationTransactionManager<'a> {
    pub fn new(db: &'a dyn DatabaseContext, schema: &'a dyn SchemaBuilder) -> Self {
        Self {
            db,
            schema,
            compensations: Vec::new(),
        }
    }

    /// Returns `true` once the original database has been renamed.
    pub fn renamed(&self) -> bool {
        self.compensations
            .iter()
            .any(|c| *c == Compensation::RenameBack)
    }

    /// Returns `true` once the replacement database has been created.
    pub fn created(&self) -> bool {
        self.compensations
            .iter()
            .any(|c| *c == Compensation::Drop)
    }

    fn admin_database(&self) -> MigrationResult<String> {
        self.db
            .admin_database()
            .ok_or_else(|| MigrationError::NoAdminDatabase {
                vendor: self.db.vendor().to_string(),
            })
    }

    /// Moves `name` aside as `backup` and leaves the connection on a new,
    /// empty `name`.
    ///
    /// # Errors
    ///
    /// Fails without an administrative database or when any step fails.
    /// Completed steps stay recorded for [`rollback_migration`].
    ///
    /// [`rollback_migration`]: MigrationTransactionManager::rollback_migration
    pub async fn prepare_database_for_migration(
        &mut self,
        name: &str,
        backup: &str,
    ) -> MigrationResult<()> {
        let admin = self.admin_database()?;
        let enclosure = self.db.enclosure();
        self.db.change_database(&admin).await?;
        self.db.terminate_connections(name).await?;

        info!(database = name, backup, "Renaming database to backup");
        self.db
            .execute_batch(&self.schema.rename_database(name, backup, enclosure))
            .await?;
        self.compensations.push(Compensation::RenameBack);

        info!(database = name, "Creating empty database");
        self.db
            .execute_batch(&self.schema.create_database(name, enclosure))
            .await?;
        self.compensations.push(Compensation::Drop);

        self.db.change_database(name).await?;
        Ok(())
    }

    /// Undoes whatever [`prepare_database_for_migration`] completed.
    ///
    /// Never fails; each step that fails is logged and skipped.
    ///
    /// [`prepare_database_for_migration`]: MigrationTransactionManager::prepare_database_for_migration
    pub async fn rollback_migration(&mut self, name: &str, backup: &str) {
        let enclosure = self.db.enclosure();
        match self.admin_database() {
            Ok(admin) if self.db.database_name() != admin => {
                if let Err(e) = self.db.change_database(&admin).await {
                    warn!(error = %e, "Rollback could not switch to the administrative database");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Rollback has no administrative database"),
        }
        if let Err(e) = self.db.terminate_connections(name).await {
            warn!(database = name, error = %e, "Rollback could not terminate connections");
        }

        while let Some(step) = self.compensations.pop() {
            match step {
                Compensation::Drop => {
                    info!(database = name, "Dropping partially migrated database");
                    if let Err(e) = self
                        .db
                        .execute_batch(&self.schema.drop_database(name, enclosure))
                        .await
                    {
                        warn!(database = name, error = %e, "Rollback could not drop database");
                    }
                }
                Compensation::RenameBack => {
                    if let Err(e) = self.db.terminate_connections(backup).await {
                        warn!(database = backup, error = %e, "Rollback could not terminate connections");
                    }
                    info!(database = name, backup, "Restoring database from backup");
                    if let Err(e) = self
                        .db
                        .execute_batch(&self.schema.rename_database(backup, name, enclosure))
                        .await
                    {
                        warn!(database = name, backup, error = %e, "Rollback could not restore backup");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db::PostgresSchemaBuilder;
    use strata_test::{assert_not_executed, assert_statements_in_order, RecordingContext};

    #[tokio::test]
    async fn test_prepare_swaps_databases() {
        let db = RecordingContext::new("shop");
        let mut tm = MigrationTransactionManager::new(&db, &PostgresSchemaBuilder);
        tm.prepare_database_for_migration("shop", "shop_backup")
            .await
            .unwrap();
        assert!(tm.renamed() && tm.created());
        assert_statements_in_order(
            &db,
            &[
                "CONNECT postgres",
                "TERMINATE shop",
                "ALTER DATABASE \"shop\" RENAME TO \"shop_backup\"",
                "CREATE DATABASE \"shop\"",
                "CONNECT shop",
            ],
        );
        assert_eq!(db.database_name(), "shop");
    }

    #[tokio::test]
    async fn test_prepare_requires_admin_database() {
        let db = RecordingContext::new("shop").without_admin();
        let mut tm = MigrationTransactionManager::new(&db, &PostgresSchemaBuilder);
        let err = tm
            .prepare_database_for_migration("shop", "shop_backup")
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::NoAdminDatabase { .. }));
        assert!(db.sql().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_after_rename_without_create() {
        let db = RecordingContext::new("shop");
        db.fail_on("CREATE DATABASE");
        let mut tm = MigrationTransactionManager::new(&db, &PostgresSchemaBuilder);
        assert!(tm
            .prepare_database_for_migration("shop", "shop_backup")
            .await
            .is_err());
        assert!(tm.renamed());
        assert!(!tm.created());

        db.reset();
        tm.rollback_migration("shop", "shop_backup").await;
        assert_statements_in_order(
            &db,
            &[
                "TERMINATE shop",
                "TERMINATE shop_backup",
                "ALTER DATABASE \"shop_backup\" RENAME TO \"shop\"",
            ],
        );
        assert_not_executed(&db, "DROP DATABASE");
        assert!(!tm.renamed());
    }

    #[tokio::test]
    async fn test_rollback_drops_then_restores() {
        let db = RecordingContext::new("shop");
        let mut tm = MigrationTransactionManager::new(&db, &PostgresSchemaBuilder);
        tm.prepare_database_for_migration("shop", "shop_backup")
            .await
            .unwrap();
        db.reset();
        tm.rollback_migration("shop", "shop_backup").await;
        assert_statements_in_order(
            &db,
            &[
                "CONNECT postgres",
                "TERMINATE shop",
                "DROP DATABASE IF EXISTS \"shop\"",
                "TERMINATE shop_backup",
                "RENAME TO \"shop\"",
            ],
        );
    }

    #[tokio::test]
    async fn test_rollback_steps_are_independent() {
        let db = RecordingContext::new("shop");
        let mut tm = MigrationTransactionManager::new(&db, &PostgresSchemaBuilder);
        tm.prepare_database_for_migration("shop", "shop_backup")
            .await
            .unwrap();
        db.fail_on("DROP DATABASE");
        db.fail_on("TERMINATE");
        tm.rollback_migration("shop", "shop_backup").await;
        assert!(db.executed("ALTER DATABASE \"shop_backup\" RENAME TO \"shop\""));
    }

    #[tokio::test]
    async fn test_rollback_with_nothing_to_undo() {
        let db = RecordingContext::new("postgres");
        let mut tm = MigrationTransactionManager::new(&db, &PostgresSchemaBuilder);
        tm.rollback_migration("shop", "shop_backup").await;
        assert_eq!(db.sql(), vec!["TERMINATE shop"]);
    }
}
