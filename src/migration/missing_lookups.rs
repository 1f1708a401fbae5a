//! SQL for missing lookup values
//!
//! Reads the structured unresolved values of a migration result and emits
//! INSERT statements that add the missing keys to their lookup tables.

use super::lookup::value_key;
use super::result::MigrationRunResult;
use super::transformer::ValueSource;
use crate::db::queries::SqlBuilder;
use chrono::Local;
use std::collections::{BTreeMap, BTreeSet};

/// Lookup table and key column a missing value belongs to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LookupTarget {
    pub schema: Option<String>,
    pub table: String,
    pub key_column: String,
}

impl LookupTarget {
    fn qualified_table(&self) -> String {
        SqlBuilder::qualified_table(self.schema.as_deref().unwrap_or_default(), &self.table)
    }

    fn label(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{} ({})", schema, self.table, self.key_column),
            None => format!("{} ({})", self.table, self.key_column),
        }
    }
}

/// Missing key values per lookup target, sorted
pub type MissingValues = BTreeMap<LookupTarget, BTreeSet<String>>;

/// Collect the unresolved lookup values of a run
pub fn collect_missing(result: &MigrationRunResult) -> MissingValues {
    let mut missing = MissingValues::new();

    for value in result.unresolved_values() {
        if value.kind != ValueSource::Lookup {
            continue;
        }
        let (Some(spec), Some(key)) = (&value.lookup, value_key(&value.value)) else {
            continue;
        };
        missing
            .entry(LookupTarget {
                schema: spec.schema.clone(),
                table: spec.table.clone(),
                key_column: spec.key_column.clone(),
            })
            .or_default()
            .insert(key);
    }

    missing
}

/// Total number of distinct missing values
pub fn total_missing(missing: &MissingValues) -> usize {
    missing.values().map(BTreeSet::len).sum()
}

/// Render INSERT statements. With `batch_size` set, values are grouped into
/// multi-row INSERTs of at most that many rows.
pub fn generate_inserts(missing: &MissingValues, batch_size: Option<usize>) -> String {
    let mut sql = vec![
        format!(
            "-- Auto-generated SQL to insert missing lookup table values{}",
            if batch_size.is_some() { " (batched)" } else { "" }
        ),
        format!("-- Generated at: {}", Local::now().to_rfc3339()),
        String::new(),
    ];

    for (target, values) in missing {
        let table = target.qualified_table();
        let column = SqlBuilder::quote_ident(&target.key_column);

        sql.push(format!("-- Missing values for table: {}", target.label()));
        sql.push(format!("-- Total missing: {}", values.len()));
        sql.push(String::new());

        let literals: Vec<String> = values.iter().map(|v| SqlBuilder::quote_literal(v)).collect();

        match batch_size {
            Some(size) => {
                for chunk in literals.chunks(size.max(1)) {
                    let rows: Vec<String> = chunk.iter().map(|l| format!("({})", l)).collect();
                    sql.push(format!("INSERT INTO {} ({}) VALUES", table, column));
                    sql.push(format!("  {};", rows.join(", ")));
                    sql.push(String::new());
                }
            }
            None => {
                for literal in &literals {
                    sql.push(format!(
                        "INSERT INTO {} ({}) VALUES ({});",
                        table, column, literal
                    ));
                }
                sql.push(String::new());
            }
        }
    }

    sql.join("\n")
}
