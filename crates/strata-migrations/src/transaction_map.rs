//! The transaction rule map.
//!
//! A [`DataTransactionMap`] accumulates, phase by phase, how every tracked
//! column's data moves from the database being migrated into the schema at
//! the target version. Phases that are already applied advance the tracked
//! names and types; phases that are still pending leave the keys on the
//! current names and record renames and cast expressions as pending work.
//!
//! Table order is schema application order: data is copied table by table
//! in the order the map holds them.

use std::fmt::Write as _;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{MigrationError, MigrationResult};
use crate::phase::{non_blank, ColumnUpdate, ColumnsDefinition, DataTransferDefinition, MigrationPhase};
use crate::rule::DataTransactionRule;
use crate::version::PhaseVersion;

/// The rules of one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRules {
    /// Row filter applied when the table's rows are copied.
    pub condition: Option<String>,
    /// Column rules keyed by the column's current name.
    pub columns: IndexMap<String, DataTransactionRule>,
}

impl TableRules {
    /// Finds the key of a column by its current name or its pending rename.
    pub fn resolve_key(&self, name: &str) -> Option<String> {
        if self.columns.contains_key(name) {
            return Some(name.to_string());
        }
        self.columns
            .iter()
            .find(|(_, rule)| rule.column_name.as_deref() == Some(name))
            .map(|(key, _)| key.clone())
    }

    /// Columns that already exist in the database being migrated.
    pub fn carried_columns(&self) -> impl Iterator<Item = (&String, &DataTransactionRule)> {
        self.columns.iter().filter(|(_, rule)| !rule.is_new)
    }
}

/// Ordered table rules plus custom transfer definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTransactionMap {
    tables: IndexMap<String, TableRules>,
    transfers: IndexMap<String, DataTransferDefinition>,
}

impl DataTransactionMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map for a roadmap relative to the database's current version.
    ///
    /// Phases are applied in ascending version order. A phase counts as
    /// performed when `current` is at or past its version. Transfer
    /// definitions are kept only for pending phases other than the latest.
    ///
    /// # Errors
    ///
    /// Fails on an empty phase list, on duplicate versions, and on any
    /// guideline that does not apply to the accumulated map.
    pub fn from_phases(
        phases: &[MigrationPhase],
        current: Option<&PhaseVersion>,
    ) -> MigrationResult<Self> {
        let mut ordered: Vec<&MigrationPhase> = phases.iter().collect();
        ordered.sort_by(|a, b| a.version.cmp(&b.version));
        for pair in ordered.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(MigrationError::DuplicateVersion {
                    version: pair[1].version.clone(),
                });
            }
        }
        let latest = ordered
            .last()
            .map(|phase| phase.version.clone())
            .ok_or(MigrationError::EmptyRoadmap)?;

        let mut map = Self::new();
        for phase in ordered {
            let performed = current.is_some_and(|c| *c >= phase.version);
            let keep_transfers =
                current.is_some_and(|c| *c < phase.version) && phase.version != latest;
            debug!(
                version = %phase.version,
                performed,
                keep_transfers,
                "Merging phase into rule map"
            );
            map.merge_phase(phase, performed, keep_transfers)?;
        }
        Ok(map)
    }

    /// Applies one phase's guidelines: create, update, delete, then transfer.
    ///
    /// # Errors
    ///
    /// Fails when a guideline does not apply to the accumulated map.
    pub fn merge_phase(
        &mut self,
        phase: &MigrationPhase,
        performed: bool,
        keep_transfers: bool,
    ) -> MigrationResult<()> {
        let guidelines = &phase.guidelines;
        for (table, definition) in &guidelines.create {
            self.create(table, definition, performed)?;
        }
        for (table, rules) in &guidelines.update {
            self.update(table, rules, performed)?;
        }
        for (table, columns) in &guidelines.delete {
            self.delete(table, columns.as_deref())?;
        }
        if keep_transfers {
            for (table, definition) in &guidelines.transfer {
                if !self.tables.contains_key(table) {
                    return Err(MigrationError::UnknownTable {
                        table: table.clone(),
                    });
                }
                self.transfers.insert(table.clone(), definition.clone());
            }
        }
        Ok(())
    }

    /// Registers a table or extends it with new columns.
    ///
    /// # Errors
    ///
    /// Fails on an unknown `before` table, a column without a type, or a
    /// column the table already tracks.
    pub fn create(
        &mut self,
        table: &str,
        definition: &ColumnsDefinition,
        performed: bool,
    ) -> MigrationResult<()> {
        if let Some(rules) = self.tables.get_mut(table) {
            match definition.condition.as_deref() {
                Some(condition) if condition.trim().is_empty() => rules.condition = None,
                Some(condition) => rules.condition = Some(condition.trim().to_string()),
                None => {}
            }
        } else {
            let rules = TableRules {
                condition: non_blank(definition.condition.as_deref()),
                columns: IndexMap::new(),
            };
            match non_blank(definition.before.as_deref()) {
                Some(before) => {
                    let index = self.tables.get_index_of(&before).ok_or_else(|| {
                        MigrationError::UnknownBeforeTable {
                            table: table.to_string(),
                            before: before.clone(),
                        }
                    })?;
                    self.tables.shift_insert(index, table.to_string(), rules);
                }
                None => {
                    self.tables.insert(table.to_string(), rules);
                }
            }
        }

        let rules = self
            .tables
            .get_mut(table)
            .ok_or_else(|| MigrationError::UnknownTable {
                table: table.to_string(),
            })?;
        for (column, definition) in &definition.columns {
            let type_name = non_blank(definition.type_name.as_deref())
                .map(|t| t.to_lowercase())
                .ok_or_else(|| MigrationError::MissingType {
                    table: table.to_string(),
                    column: column.clone(),
                })?;
            if rules.resolve_key(column).is_some() {
                return Err(MigrationError::DuplicateColumn {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
            let rule = DataTransactionRule {
                current_type: type_name.clone(),
                type_name,
                column_name: None,
                value: if performed {
                    None
                } else {
                    non_blank(definition.value.as_deref())
                },
                is_new: !performed,
                is_enum: definition.is_enum,
                is_sequence: definition.is_sequence,
                sequence_name: non_blank(definition.sequence_name.as_deref()),
                inherits: non_blank(definition.inherits.as_deref()),
            };
            rules.columns.insert(column.clone(), rule);
        }
        Ok(())
    }

    /// Changes tracked columns: type, name, pending value and flags.
    ///
    /// # Errors
    ///
    /// Fails on an unknown table or column, or when an applied rename
    /// collides with another tracked column.
    pub fn update(
        &mut self,
        table: &str,
        updates: &IndexMap<String, ColumnUpdate>,
        performed: bool,
    ) -> MigrationResult<()> {
        for (column, update) in updates {
            let rules = self
                .tables
                .get_mut(table)
                .ok_or_else(|| MigrationError::UnknownTable {
                    table: table.to_string(),
                })?;
            let key = rules
                .resolve_key(column)
                .ok_or_else(|| MigrationError::UnknownColumn {
                    table: table.to_string(),
                    column: column.clone(),
                })?;
            let existing = rules.columns[&key].clone();
            let type_name = non_blank(update.type_name.as_deref())
                .map(|t| t.to_lowercase())
                .unwrap_or_else(|| existing.type_name.clone());
            let column_name =
                non_blank(update.column_name.as_deref()).or_else(|| existing.column_name.clone());
            // Blank clears, absent inherits.
            let inherits = match update.inherits.as_deref() {
                Some(owner) if owner.trim().is_empty() => None,
                Some(owner) => Some(owner.trim().to_string()),
                None => existing.inherits.clone(),
            };
            let is_enum = update.is_enum.unwrap_or(existing.is_enum);
            let is_sequence = update.is_sequence.unwrap_or(existing.is_sequence);
            let sequence_name = non_blank(update.sequence_name.as_deref())
                .or_else(|| existing.sequence_name.clone());

            let old_target = existing.target_name(&key).to_string();
            let new_target;

            if performed {
                let new_key = column_name.unwrap_or_else(|| key.clone());
                if new_key != key && rules.columns.contains_key(&new_key) {
                    return Err(MigrationError::DuplicateColumn {
                        table: table.to_string(),
                        column: new_key,
                    });
                }
                let rule = DataTransactionRule {
                    current_type: type_name.clone(),
                    type_name,
                    column_name: None,
                    value: existing.value.clone(),
                    is_new: existing.is_new,
                    is_enum,
                    is_sequence,
                    sequence_name,
                    inherits,
                };
                let (index, _, _) = rules.columns.shift_remove_full(&key).ok_or_else(|| {
                    MigrationError::UnknownColumn {
                        table: table.to_string(),
                        column: key.clone(),
                    }
                })?;
                rules.columns.shift_insert(index, new_key.clone(), rule);
                new_target = new_key;
            } else {
                let value = DataTransactionRule::compose_value(
                    existing.value.as_deref(),
                    non_blank(update.value.as_deref()).as_deref(),
                );
                let rule = DataTransactionRule {
                    type_name,
                    current_type: existing.current_type.clone(),
                    column_name,
                    value,
                    is_new: existing.is_new,
                    is_enum,
                    is_sequence,
                    sequence_name,
                    inherits,
                };
                new_target = rule.target_name(&key).to_string();
                rules.columns.insert(key.clone(), rule);
            }

            if new_target != old_target {
                self.rename_transfer_column(table, &old_target, &new_target);
            }
        }
        Ok(())
    }

    /// Removes columns, or the whole table when no columns are listed.
    ///
    /// # Errors
    ///
    /// Fails on an unknown table or column, or when a column is written by
    /// the table's transfer definition.
    pub fn delete(&mut self, table: &str, columns: Option<&[String]>) -> MigrationResult<()> {
        if !self.tables.contains_key(table) {
            return Err(MigrationError::UnknownTable {
                table: table.to_string(),
            });
        }
        let columns = match columns {
            Some(columns) if !columns.is_empty() => columns,
            _ => {
                self.tables.shift_remove(table);
                self.transfers.shift_remove(table);
                return Ok(());
            }
        };
        for column in columns {
            let rules = &self.tables[table];
            let key = rules
                .resolve_key(column)
                .ok_or_else(|| MigrationError::UnknownColumn {
                    table: table.to_string(),
                    column: column.clone(),
                })?;
            let target = rules.columns[&key].target_name(&key).to_string();
            if let Some(transfer) = self.transfers.get(table) {
                if [column.as_str(), key.as_str(), target.as_str()]
                    .iter()
                    .any(|name| transfer.columns.contains_key(*name))
                {
                    return Err(MigrationError::ColumnInUse {
                        table: table.to_string(),
                        column: column.clone(),
                    });
                }
            }
            if let Some(rules) = self.tables.get_mut(table) {
                rules.columns.shift_remove(&key);
            }
        }
        Ok(())
    }

    /// Renames a destination column of a table's transfer definition in place.
    pub(crate) fn rename_transfer_column(&mut self, table: &str, from: &str, to: &str) {
        if let Some(transfer) = self.transfers.get_mut(table) {
            if let Some((index, _, column_type)) = transfer.columns.shift_remove_full(from) {
                transfer.columns.shift_insert(index, to.to_string(), column_type);
            }
        }
    }

    /// The table rules in schema application order.
    pub fn tables(&self) -> &IndexMap<String, TableRules> {
        &self.tables
    }

    pub(crate) fn tables_mut(&mut self) -> &mut IndexMap<String, TableRules> {
        &mut self.tables
    }

    /// The rules of one table.
    pub fn table(&self, name: &str) -> Option<&TableRules> {
        self.tables.get(name)
    }

    /// The custom transfer definitions.
    pub fn transfers(&self) -> &IndexMap<String, DataTransferDefinition> {
        &self.transfers
    }

    pub(crate) fn transfers_mut(&mut self) -> &mut IndexMap<String, DataTransferDefinition> {
        &mut self.transfers
    }

    /// The transfer definition of one table.
    pub fn transfer(&self, table: &str) -> Option<&DataTransferDefinition> {
        self.transfers.get(table)
    }

    /// Returns `true` when the map tracks no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// A deterministic description of every table rule and transfer.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if self.tables.is_empty() {
            out.push_str("No tables.\n");
        } else {
            out.push_str("Tables:\n");
        }
        for (table, rules) in &self.tables {
            let _ = write!(out, "  {table}");
            if let Some(condition) = &rules.condition {
                let _ = write!(out, " where {condition}");
            }
            out.push('\n');
            for (column, rule) in &rules.columns {
                let _ = writeln!(out, "    {column}: {rule}");
            }
        }
        if !self.transfers.is_empty() {
            out.push_str("Transfers:\n");
            for (table, transfer) in &self.transfers {
                let _ = writeln!(out, "  {table}");
                for (column, column_type) in &transfer.columns {
                    let _ = writeln!(out, "    {column}: {column_type}");
                }
            }
        }
        out
    }
}
