//! Merging rule maps across the core roadmap and its modules.

use indexmap::IndexMap;

use crate::error::{MigrationError, MigrationResult};
use crate::rule::DataTransactionRule;
use crate::transaction_map::{DataTransactionMap, TableRules};

/// Decides the rule for a `(table, column)` that two merged maps both define.
///
/// Called with the table, the column, the rule merged so far, and the
/// incoming rule.
pub type ConflictResolver<'a> = dyn Fn(&str, &str, &DataTransactionRule, &DataTransactionRule) -> MigrationResult<DataTransactionRule>
    + Send
    + Sync
    + 'a;

/// Folds independent maps into one, refusing silent overlaps.
///
/// Transfer definitions for the same table always conflict. Column rules
/// that collide go to `resolver`, or fail when there is none.
///
/// # Errors
///
/// Returns [`MigrationError::TransferConflict`] or
/// [`MigrationError::RuleConflict`], or the resolver's error.
pub fn safe_merge<I>(maps: I, resolver: Option<&ConflictResolver<'_>>) -> MigrationResult<DataTransactionMap>
where
    I: IntoIterator<Item = DataTransactionMap>,
{
    let mut merged = DataTransactionMap::new();
    for map in maps {
        for (table, transfer) in map.transfers() {
            if merged.transfers().contains_key(table) {
                return Err(MigrationError::TransferConflict {
                    table: table.clone(),
                });
            }
            merged.transfers_mut().insert(table.clone(), transfer.clone());
        }
        for (table, incoming) in map.tables() {
            let rules = merged
                .tables_mut()
                .entry(table.clone())
                .or_insert_with(|| TableRules {
                    condition: incoming.condition.clone(),
                    columns: IndexMap::new(),
                });
            if rules.condition.is_none() {
                rules.condition.clone_from(&incoming.condition);
            }
            for (column, rule) in &incoming.columns {
                let resolved = match rules.columns.get(column) {
                    None => rule.clone(),
                    Some(existing) => match resolver {
                        Some(resolve) => resolve(table, column, existing, rule)?,
                        None => {
                            return Err(MigrationError::RuleConflict {
                                table: table.clone(),
                                column: column.clone(),
                            })
                        }
                    },
                };
                rules.columns.insert(column.clone(), resolved);
            }
        }
    }
    Ok(merged)
}

/// Merges `source` into `target` with the incoming side always winning.
///
/// Transfer definitions go first: tables `target` has no transfer for take
/// the source's, and transfers `target` keeps have their column keys
/// rewritten by renames pending in `source`. Rules then overwrite column by
/// column. The result lists the source tables first, in source order,
/// followed by the tables only `target` tracks.
///
/// # Errors
///
/// Currently infallible; the signature leaves room for validation.
pub fn full_merge(
    source: &DataTransactionMap,
    mut target: DataTransactionMap,
) -> MigrationResult<DataTransactionMap> {
    let kept: Vec<String> = target.transfers().keys().cloned().collect();
    for (table, transfer) in source.transfers() {
        if !target.transfers().contains_key(table) {
            target.transfers_mut().insert(table.clone(), transfer.clone());
        }
    }
    for table in &kept {
        let Some(rules) = source.table(table) else {
            continue;
        };
        for (column, rule) in &rules.columns {
            if let Some(renamed) = &rule.column_name {
                target.rename_transfer_column(table, column, renamed);
            }
        }
    }

    let mut remaining = std::mem::take(target.tables_mut());
    let mut ordered = IndexMap::with_capacity(remaining.len() + source.tables().len());
    for (table, incoming) in source.tables() {
        let mut rules = remaining.shift_remove(table).unwrap_or_default();
        if incoming.condition.is_some() {
            rules.condition.clone_from(&incoming.condition);
        }
        for (column, rule) in &incoming.columns {
            rules.columns.insert(column.clone(), rule.clone());
        }
        ordered.insert(table.clone(), rules);
    }
    ordered.extend(remaining);
    *target.tables_mut() = ordered;
    Ok(target)
}
