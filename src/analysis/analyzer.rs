//! Schema Analyzer
//!
//! Compares the old and new column sets of each table and classifies every
//! difference as safe, transformable or breaking.

use super::changes::SchemaChange;
use super::compatibility::is_column_compatible;
use super::similarity::best_match;
use crate::introspection::{Column, SchemaSnapshot};
use std::collections::HashSet;
use tracing::debug;

/// Stateless comparison engine
pub struct SchemaAnalyzer;

impl SchemaAnalyzer {
    /// Compare two snapshots whose tables are keyed by the old table names.
    ///
    /// Changes come out in old-table order, then column order.
    pub fn compare(
        old: &SchemaSnapshot,
        new: &SchemaSnapshot,
        similarity_threshold: f64,
    ) -> Vec<SchemaChange> {
        let mut changes = Vec::new();

        for old_table in &old.tables {
            match new.table(&old_table.name) {
                Some(new_table) => {
                    let table_changes = Self::compare_table(
                        &old_table.name,
                        &old_table.columns,
                        &new_table.columns,
                        similarity_threshold,
                    );
                    debug!(
                        "Table '{}': {} change(s)",
                        old_table.name,
                        table_changes.len()
                    );
                    changes.extend(table_changes);
                }
                None => changes.push(SchemaChange::table_missing(&old_table.name)),
            }
        }

        changes
    }

    /// Compare one table's columns
    pub fn compare_table(
        table: &str,
        old_columns: &[Column],
        new_columns: &[Column],
        similarity_threshold: f64,
    ) -> Vec<SchemaChange> {
        let mut changes = Vec::new();

        let old_names: HashSet<&str> = old_columns.iter().map(|c| c.name.as_str()).collect();
        let mut claimed: HashSet<&str> = HashSet::new();

        for old_col in old_columns {
            if let Some(new_col) = new_columns.iter().find(|c| c.name == old_col.name) {
                if let Some(change) = Self::compare_column(table, old_col, new_col) {
                    changes.push(change);
                }
                continue;
            }

            let candidates = new_columns
                .iter()
                .map(|c| c.name.as_str())
                .filter(|name| !old_names.contains(name) && !claimed.contains(name));

            match best_match(&old_col.name, candidates, similarity_threshold) {
                Some(renamed_to) => {
                    claimed.insert(renamed_to);
                    changes.push(SchemaChange::renamed(table, &old_col.name, renamed_to));
                }
                None => changes.push(SchemaChange::column_removed(table, &old_col.name)),
            }
        }

        for new_col in new_columns {
            let name = new_col.name.as_str();
            if old_names.contains(name) || claimed.contains(name) {
                continue;
            }

            let change = if new_col.nullable {
                SchemaChange::nullable_column_added(table, name)
            } else {
                SchemaChange::required_column_added(table, name, new_col.default.as_deref())
            };
            changes.push(change);
        }

        changes
    }

    /// Compare a column present on both sides; `None` when type and bound match
    fn compare_column(table: &str, old: &Column, new: &Column) -> Option<SchemaChange> {
        let old_type = old.declared_type();
        let new_type = new.declared_type();

        if old_type.eq_ignore_ascii_case(&new_type) {
            return None;
        }

        Some(SchemaChange::type_mismatch(
            table,
            &old.name,
            &old_type,
            &new_type,
            is_column_compatible(old, new),
        ))
    }
}
