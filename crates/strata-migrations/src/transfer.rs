//! Bulk data transfer from the backup database into the new schema.
//!
//! Each table with carried columns goes through a staging table in the new
//! database: rows are streamed from the backup over the binary copy channel
//! into the staging table, then moved into the destination with a single
//! `INSERT ... SELECT` that applies renames and pending cast expressions.
//! Columns without a binary codec, and enum columns, are staged as text and
//! cast back on the way out.

use strata_db::{
    ColumnCodec, ColumnSpec, CopyColumn, DatabaseContext, Enclosure, SchemaBuilder,
    SequenceRef, TableDefinition, TableName,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MigrationError, MigrationResult};
use crate::phase::DataTransferDefinition;
use crate::roadmap::check_cancelled;
use crate::rule::{DataTransactionRule, PLACEHOLDER};
use crate::transaction_map::{DataTransactionMap, TableRules};

/// Counts of what a transfer run moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Tables copied through column rules.
    pub tables: usize,
    /// Tables filled by transfer definitions.
    pub transfers: usize,
    pub rows: u64,
}

#[derive(Debug)]
struct StagedColumn {
    name: String,
    codec: ColumnCodec,
}

impl StagedColumn {
    fn for_rule(name: &str, rule: &DataTransactionRule) -> Self {
        let codec = if rule.is_enum {
            ColumnCodec::Fallback
        } else {
            ColumnCodec::resolve(&rule.current_type)
        };
        Self {
            name: name.to_string(),
            codec,
        }
    }

    fn staging_type(&self) -> &'static str {
        self.codec.staging_type()
    }

    fn select_expr(&self, enclosure: Enclosure) -> String {
        format!(
            "CAST({} AS {})",
            enclosure.quote(&self.name),
            self.staging_type()
        )
    }

    fn copy_column(&self) -> CopyColumn {
        CopyColumn::new(self.name.as_str(), self.codec)
    }
}

/// Copies rows from a backup database into a freshly created schema.
pub struct DataTransferEngine<'a> {
    source: &'a dyn DatabaseContext,
    target: &'a dyn DatabaseContext,
    schema: &'a dyn SchemaBuilder,
    staging_prefix: &'a str,
}

impl<'a> DataTransferEngine<'a> {
    /// `source` reads the backup; `target` writes the new database.
    pub fn new(
        source: &'a dyn DatabaseContext,
        target: &'a dyn DatabaseContext,
        schema: &'a dyn SchemaBuilder,
        staging_prefix: &'a str,
    ) -> Self {
        Self {
            source,
            target,
            schema,
            staging_prefix,
        }
    }

    /// Copies every table in map order, then runs every transfer definition.
    ///
    /// Tables that have a transfer definition are filled only by it.
    ///
    /// # Errors
    ///
    /// Stops at the first failing table.
    pub async fn run(
        &self,
        map: &DataTransactionMap,
        cancel: &CancellationToken,
    ) -> MigrationResult<TransferStats> {
        let mut stats = TransferStats::default();
        for (table, rules) in map.tables() {
            if map.transfer(table).is_some() {
                continue;
            }
            let rows = self.transfer_table(table, rules, cancel).await?;
            stats.tables += 1;
            stats.rows += rows;
        }
        for (table, definition) in map.transfers() {
            let rows = self
                .transfer_definition(table, definition, map.table(table), cancel)
                .await?;
            stats.transfers += 1;
            stats.rows += rows;
        }
        info!(
            tables = stats.tables,
            transfers = stats.transfers,
            rows = stats.rows,
            "Data transfer finished"
        );
        Ok(stats)
    }

    /// Copies one table through its column rules and returns the row count.
    ///
    /// # Errors
    ///
    /// Fails with table, column and row context when a value cannot be
    /// copied, and with [`MigrationError::SequenceRepair`] when a sequence
    /// cannot be advanced.
    pub async fn transfer_table(
        &self,
        table: &str,
        rules: &TableRules,
        cancel: &CancellationToken,
    ) -> MigrationResult<u64> {
        check_cancelled(cancel)?;
        let staged: Vec<StagedColumn> = rules
            .carried_columns()
            .map(|(name, rule)| StagedColumn::for_rule(name, rule))
            .collect();
        if staged.is_empty() {
            debug!(table, "No existing columns to copy");
            return Ok(0);
        }

        let enclosure = self.target.enclosure();
        let destination = TableName::parse(table);
        let staging = destination.with_prefix(self.staging_prefix);
        self.create_staging(&staging, &staged).await?;

        let select = format!(
            "SELECT {} FROM {}",
            staged
                .iter()
                .map(|c| c.select_expr(enclosure))
                .collect::<Vec<_>>()
                .join(", "),
            enclosure.quote_table(&destination)
        );
        let columns: Vec<CopyColumn> = staged.iter().map(StagedColumn::copy_column).collect();
        let rows = self.stream(table, &select, &columns, &staging).await?;

        let insert = Self::insert_from_staging(&destination, &staging, rules, enclosure);
        self.in_transaction(async {
            debug!(sql = %insert, "Moving staged rows");
            self.target.execute(&insert, &[]).await?;
            self.repair_sequences(&destination, rules, |_, rule| !rule.is_new)
                .await
        })
        .await?;

        self.target
            .execute_batch(&self.schema.drop_table(&staging, true, enclosure))
            .await?;
        info!(table, rows, "Copied table");
        Ok(rows)
    }

    /// Fills one table from a transfer definition's script.
    ///
    /// The script runs against the backup. Its result columns must carry
    /// the definition's column names.
    ///
    /// # Errors
    ///
    /// Fails like [`DataTransferEngine::transfer_table`].
    pub async fn transfer_definition(
        &self,
        table: &str,
        definition: &DataTransferDefinition,
        rules: Option<&TableRules>,
        cancel: &CancellationToken,
    ) -> MigrationResult<u64> {
        check_cancelled(cancel)?;
        let enclosure = self.target.enclosure();
        let destination = TableName::parse(table);
        let staged: Vec<StagedColumn> = definition
            .columns
            .iter()
            .map(|(name, type_name)| StagedColumn {
                name: name.clone(),
                codec: ColumnCodec::resolve(type_name),
            })
            .collect();
        let script = definition.script.trim().trim_end_matches(';');
        let select = format!(
            "SELECT {} FROM ({script}) AS {}",
            staged
                .iter()
                .map(|c| c.select_expr(enclosure))
                .collect::<Vec<_>>()
                .join(", "),
            enclosure.quote("transfer_source")
        );
        let columns: Vec<CopyColumn> = staged.iter().map(StagedColumn::copy_column).collect();

        let rows = if staged.iter().all(|c| c.codec.is_binary()) {
            self.stream(table, &select, &columns, &destination).await?
        } else {
            let staging = destination.with_prefix(self.staging_prefix);
            self.create_staging(&staging, &staged).await?;
            let rows = self.stream(table, &select, &columns, &staging).await?;
            let targets: Vec<String> = staged.iter().map(|c| enclosure.quote(&c.name)).collect();
            let exprs: Vec<String> = definition
                .columns
                .iter()
                .zip(&staged)
                .map(|((name, type_name), column)| {
                    if column.codec.is_binary() {
                        enclosure.quote(name)
                    } else {
                        format!("CAST({} AS {type_name})", enclosure.quote(name))
                    }
                })
                .collect();
            let insert = format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                enclosure.quote_table(&destination),
                targets.join(", "),
                exprs.join(", "),
                enclosure.quote_table(&staging)
            );
            self.target.execute(&insert, &[]).await?;
            self.target
                .execute_batch(&self.schema.drop_table(&staging, true, enclosure))
                .await?;
            rows
        };

        if let Some(rules) = rules {
            self.repair_sequences(&destination, rules, |name, rule| {
                definition.columns.contains_key(rule.target_name(name))
            })
            .await?;
        }
        info!(table, rows, "Ran transfer definition");
        Ok(rows)
    }

    async fn create_staging(
        &self,
        staging: &TableName,
        columns: &[StagedColumn],
    ) -> MigrationResult<()> {
        let enclosure = self.target.enclosure();
        let definition = columns.iter().fold(
            TableDefinition::new(staging.clone()),
            |definition, column| {
                definition.column(ColumnSpec::new(column.name.as_str(), column.staging_type()).nullable())
            },
        );
        self.target
            .execute_batch(&self.schema.drop_table(staging, true, enclosure))
            .await?;
        self.target
            .execute_batch(&self.schema.create_table(&definition, enclosure))
            .await?;
        Ok(())
    }

    /// Streams `query` from the backup into `into`, encoding every value
    /// with its column codec.
    async fn stream(
        &self,
        table: &str,
        query: &str,
        columns: &[CopyColumn],
        into: &TableName,
    ) -> MigrationResult<u64> {
        debug!(%query, into = %into, "Streaming rows");
        let mut source = self.source.copy_out(query, columns).await?;
        let mut sink = self.target.copy_in(into, columns).await?;
        let mut row = 0_u64;
        while let Some(values) = source.next_row().await? {
            row += 1;
            let mut encoded = Vec::with_capacity(columns.len());
            for (value, column) in values.into_iter().zip(columns) {
                let value = column
                    .codec
                    .encode(value)
                    .map_err(|reason| MigrationError::CopyFailed {
                        table: table.to_string(),
                        column: column.name.clone(),
                        row,
                        reason,
                    })?;
                encoded.push(value);
            }
            sink.write_row(&encoded)
                .await
                .map_err(|source| MigrationError::RowWriteFailed {
                    table: table.to_string(),
                    row,
                    source,
                })?;
        }
        Ok(sink.finish().await?)
    }

    fn insert_from_staging(
        destination: &TableName,
        staging: &TableName,
        rules: &TableRules,
        enclosure: Enclosure,
    ) -> String {
        let mut targets = Vec::new();
        let mut exprs = Vec::new();
        for (name, rule) in &rules.columns {
            let expr = if rule.is_new {
                // New columns have no staged data; only constant values apply.
                match rule.value.as_deref() {
                    Some(value) if !value.contains(PLACEHOLDER) => value.to_string(),
                    _ => continue,
                }
            } else {
                let staged = enclosure.quote(name);
                let reference = if rule.is_enum {
                    format!("CAST({staged} AS {})", rule.type_name)
                } else if ColumnCodec::resolve(&rule.current_type).is_binary() {
                    staged
                } else {
                    format!("CAST({staged} AS {})", rule.current_type)
                };
                match rule.value.as_deref() {
                    Some(value) => value.replace(PLACEHOLDER, &reference),
                    None => reference,
                }
            };
            targets.push(enclosure.quote(rule.target_name(name)));
            exprs.push(expr);
        }
        let mut sql = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            enclosure.quote_table(destination),
            targets.join(", "),
            exprs.join(", "),
            enclosure.quote_table(staging)
        );
        if let Some(condition) = &rules.condition {
            sql.push_str(" WHERE ");
            sql.push_str(condition);
        }
        sql
    }

    async fn repair_sequences<F>(
        &self,
        destination: &TableName,
        rules: &TableRules,
        include: F,
    ) -> MigrationResult<()>
    where
        F: Fn(&str, &DataTransactionRule) -> bool,
    {
        let enclosure = self.target.enclosure();
        for (name, rule) in &rules.columns {
            if !rule.is_sequence || !include(name, rule) {
                continue;
            }
            let column = rule.target_name(name);
            let owner = rule.inherits.as_deref().map(TableName::parse);
            let sequence = match rule.sequence_name.as_deref() {
                Some(sequence) => SequenceRef::Named(sequence),
                None => SequenceRef::Owned {
                    table: owner.as_ref().unwrap_or(destination),
                    column,
                },
            };
            let sql = self
                .schema
                .reset_sequence(destination, column, sequence, enclosure);
            debug!(%sql, "Repairing sequence");
            self.target
                .query(&sql, &[])
                .await
                .map_err(|source| MigrationError::SequenceRepair {
                    table: destination.to_string(),
                    column: column.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn in_transaction<F>(&self, work: F) -> MigrationResult<()>
    where
        F: std::future::Future<Output = MigrationResult<()>>,
    {
        self.target.begin_transaction().await?;
        match work.await {
            Ok(()) => {
                self.target.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.target.rollback().await {
                    warn!(error = %rollback, "Could not roll back table copy");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::ColumnsDefinition;
    use indexmap::IndexMap;
    use serde_json::json;
    use strata_db::{PostgresSchemaBuilder, Value};
    use strata_test::{assert_executed, assert_not_executed, assert_statements_in_order, RecordingContext};

    fn rules(columns: serde_json::Value, performed: bool) -> TableRules {
        let definition: ColumnsDefinition =
            serde_json::from_value(json!({ "columns": columns })).unwrap();
        let mut map = DataTransactionMap::new();
        map.create("Users", &definition, performed).unwrap();
        map.table("Users").unwrap().clone()
    }

    #[tokio::test]
    async fn test_transfer_table_stages_and_inserts() {
        let target = RecordingContext::new("shop");
        let source = target.sibling("shop_backup");
        source.on_copy_out("FROM \"Users\"", vec![
            vec![Value::Int(1), Value::from("ann")],
            vec![Value::Int(2), Value::Null],
        ]);
        let mut table = rules(json!({ "Id": { "type": "int", "is_sequence": true }, "Name": { "type": "text" } }), true);
        table.columns["Name"].column_name = Some("FullName".into());
        table.columns["Name"].value = Some("upper({column})".into());

        let engine = DataTransferEngine::new(&source, &target, &PostgresSchemaBuilder, "_staging_");
        let rows = engine
            .transfer_table("Users", &table, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rows, 2);
        assert_eq!(target.copied_rows("_staging_Users").len(), 2);
        assert_statements_in_order(
            &target,
            &[
                "DROP TABLE IF EXISTS \"_staging_Users\"",
                "CREATE TABLE \"_staging_Users\" (\"Id\" integer, \"Name\" text)",
                "COPY OUT SELECT CAST(\"Id\" AS integer), CAST(\"Name\" AS text) FROM \"Users\"",
                "COPY IN _staging_Users (Id, Name)",
                "BEGIN",
                "INSERT INTO \"Users\" (\"Id\", \"FullName\") SELECT \"Id\", upper(\"Name\") FROM \"_staging_Users\"",
                "SELECT setval(pg_get_serial_sequence('\"Users\"', 'Id')",
                "COMMIT",
                "DROP TABLE IF EXISTS \"_staging_Users\"",
            ],
        );
    }

    #[tokio::test]
    async fn test_new_columns_are_skipped() {
        let target = RecordingContext::new("shop");
        let source = target.sibling("shop_backup");
        let mut table = rules(json!({ "Id": { "type": "int" } }), true);
        let pending = rules(json!({ "Age": { "type": "int", "value": "0" }, "Nick": { "type": "text" } }), false);
        table.columns.extend(pending.columns);

        let engine = DataTransferEngine::new(&source, &target, &PostgresSchemaBuilder, "_staging_");
        engine
            .transfer_table("Users", &table, &CancellationToken::new())
            .await
            .unwrap();
        assert_executed(&target, "CREATE TABLE \"_staging_Users\" (\"Id\" integer)");
        assert_executed(&target, "INSERT INTO \"Users\" (\"Id\", \"Age\") SELECT \"Id\", 0 FROM");
        assert_not_executed(&target, "\"Nick\"");
    }

    #[tokio::test]
    async fn test_table_with_only_new_columns_is_skipped() {
        let target = RecordingContext::new("shop");
        let source = target.sibling("shop_backup");
        let table = rules(json!({ "Id": { "type": "int" } }), false);
        let engine = DataTransferEngine::new(&source, &target, &PostgresSchemaBuilder, "_staging_");
        let rows = engine
            .transfer_table("Users", &table, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert!(target.sql().is_empty());
    }

    #[tokio::test]
    async fn test_enum_and_fallback_columns_travel_as_text() {
        let target = RecordingContext::new("shop");
        let source = target.sibling("shop_backup");
        let table = rules(
            json!({
                "State": { "type": "order_state", "is_enum": true },
                "Total": { "type": "numeric(10,2)" },
                "Flags": { "type": "BIT(8)" },
            }),
            true,
        );
        let engine = DataTransferEngine::new(&source, &target, &PostgresSchemaBuilder, "_staging_");
        engine
            .transfer_table("Users", &table, &CancellationToken::new())
            .await
            .unwrap();
        assert_executed(&target, "(\"State\" text, \"Total\" text, \"Flags\" text)");
        assert_executed(
            &target,
            "SELECT CAST(\"State\" AS order_state), CAST(\"Total\" AS numeric(10,2)), CAST(\"Flags\" AS bit(8)) FROM \"_staging_Users\"",
        );
    }

    #[tokio::test]
    async fn test_condition_and_schema_qualified_names() {
        let target = RecordingContext::new("shop");
        let source = target.sibling("shop_backup");
        let definition: ColumnsDefinition = serde_json::from_value(json!({
            "condition": "\"Id\" > 10",
            "columns": { "Id": { "type": "bigint" } }
        }))
        .unwrap();
        let mut map = DataTransactionMap::new();
        map.create("sales.Orders", &definition, true).unwrap();

        let engine = DataTransferEngine::new(&source, &target, &PostgresSchemaBuilder, "_staging_");
        engine
            .transfer_table("sales.Orders", map.table("sales.Orders").unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_executed(
            &target,
            "INSERT INTO \"sales\".\"Orders\" (\"Id\") SELECT \"Id\" FROM \"sales\".\"_staging_Orders\" WHERE \"Id\" > 10",
        );
    }

    #[tokio::test]
    async fn test_copy_failure_reports_row_and_column() {
        let target = RecordingContext::new("shop");
        let source = target.sibling("shop_backup");
        source.on_copy_out("FROM \"Users\"", vec![
            vec![Value::Int(1)],
            vec![Value::from("not a number")],
        ]);
        let table = rules(json!({ "Id": { "type": "int" } }), true);
        let engine = DataTransferEngine::new(&source, &target, &PostgresSchemaBuilder, "_staging_");
        let err = engine
            .transfer_table("Users", &table, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            MigrationError::CopyFailed { table, column, row, .. } => {
                assert_eq!((table.as_str(), column.as_str(), row), ("Users", "Id", 2));
            }
            other => panic!("expected CopyFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sequence_repair_failure_rolls_back() {
        let target = RecordingContext::new("shop");
        let source = target.sibling("shop_backup");
        target.fail_on("setval");
        let table = rules(
            json!({ "Id": { "type": "bigint", "is_sequence": true, "sequence_name": "public.users_seq" } }),
            true,
        );
        let engine = DataTransferEngine::new(&source, &target, &PostgresSchemaBuilder, "_staging_");
        let err = engine
            .transfer_table("Users", &table, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::SequenceRepair { .. }));
        assert_executed(&target, "setval('\"public\".\"users_seq\"'");
        assert_executed(&target, "ROLLBACK");
        assert_not_executed(&target, "COMMIT");
    }

    #[tokio::test]
    async fn test_inherited_sequence_owner() {
        let target = RecordingContext::new("shop");
        let source = target.sibling("shop_backup");
        let table = rules(
            json!({ "Id": { "type": "bigint", "is_sequence": true, "inherits": "Accounts" } }),
            true,
        );
        let engine = DataTransferEngine::new(&source, &target, &PostgresSchemaBuilder, "_staging_");
        engine
            .transfer_table("Users", &table, &CancellationToken::new())
            .await
            .unwrap();
        assert_executed(&target, "pg_get_serial_sequence('\"Accounts\"', 'Id')");
    }

    #[tokio::test]
    async fn test_transfer_definition_streams_into_destination() {
        let target = RecordingContext::new("shop");
        let source = target.sibling("shop_backup");
        source.on_copy_out("FROM (SELECT", vec![vec![Value::Int(5), Value::from("x")]]);
        let definition = DataTransferDefinition {
            script: "SELECT id AS \"Id\", label AS \"Label\" FROM legacy;".into(),
            columns: IndexMap::from([
                ("Id".to_string(), "bigint".to_string()),
                ("Label".to_string(), "text".to_string()),
            ]),
        };
        let engine = DataTransferEngine::new(&source, &target, &PostgresSchemaBuilder, "_staging_");
        let rows = engine
            .transfer_definition("Totals", &definition, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(target.copied_rows("Totals"), vec![vec![Value::Int(5), Value::from("x")]]);
        let copy_out = &source.sql_on("shop_backup")[0];
        assert!(copy_out.contains("FROM (SELECT id AS \"Id\", label AS \"Label\" FROM legacy) AS \"transfer_source\""));
    }

    #[tokio::test]
    async fn test_transfer_definition_with_fallback_columns_uses_staging() {
        let target = RecordingContext::new("shop");
        let source = target.sibling("shop_backup");
        let definition = DataTransferDefinition {
            script: "SELECT 1 AS \"Id\", 2.5 AS \"Amount\"".into(),
            columns: IndexMap::from([
                ("Id".to_string(), "int".to_string()),
                ("Amount".to_string(), "numeric(8,2)".to_string()),
            ]),
        };
        let engine = DataTransferEngine::new(&source, &target, &PostgresSchemaBuilder, "_staging_");
        engine
            .transfer_definition("Totals", &definition, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_statements_in_order(
            &target,
            &[
                "CREATE TABLE \"_staging_Totals\"",
                "COPY IN _staging_Totals (Id, Amount)",
                "INSERT INTO \"Totals\" (\"Id\", \"Amount\") SELECT \"Id\", CAST(\"Amount\" AS numeric(8,2)) FROM \"_staging_Totals\"",
                "DROP TABLE IF EXISTS \"_staging_Totals\"",
            ],
        );
    }

    #[tokio::test]
    async fn test_run_skips_tables_with_transfer_definitions() {
        let target = RecordingContext::new("shop");
        let source = target.sibling("shop_backup");
        let phases: Vec<crate::phase::MigrationPhase> = vec![
            serde_json::from_value(json!({
                "version": "1", "title": "Init",
                "guidelines": { "create": {
                    "Users": { "columns": { "Id": { "type": "int" } } },
                    "Totals": { "columns": { "Id": { "type": "int" } } }
                } }
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "version": "2", "title": "Rebuild",
                "guidelines": { "transfer": { "Totals": { "script": "SELECT 1 AS \"Id\"", "columns": { "Id": "int" } } } }
            }))
            .unwrap(),
            serde_json::from_value(json!({ "version": "3", "title": "Latest" })).unwrap(),
        ];
        let map = DataTransactionMap::from_phases(&phases, Some(&"1".parse().unwrap())).unwrap();
        let engine = DataTransferEngine::new(&source, &target, &PostgresSchemaBuilder, "_staging_");
        let stats = engine.run(&map, &CancellationToken::new()).await.unwrap();
        assert_eq!((stats.tables, stats.transfers), (1, 1));
        assert_not_executed(&target, "_staging_Totals");
        assert_executed(&target, "COPY IN Totals (Id)");
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled() {
        let target = RecordingContext::new("shop");
        let source = target.sibling("shop_backup");
        let mut map = DataTransactionMap::new();
        let definition: ColumnsDefinition =
            serde_json::from_value(json!({ "columns": { "Id": { "type": "int" } } })).unwrap();
        map.create("Users", &definition, true).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = DataTransferEngine::new(&source, &target, &PostgresSchemaBuilder, "_staging_");
        assert!(matches!(
            engine.run(&map, &cancel).await,
            Err(MigrationError::Cancelled)
        ));
        assert!(target.sql().is_empty());
    }
}
