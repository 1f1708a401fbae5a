//! Migration results
//!
//! Per-table outcomes, the aggregated run statistics, and the result file
//! written after every run.

use super::transformer::UnresolvableValue;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal state of one table migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Done,
    Failed,
}

/// Outcome of migrating one table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableResult {
    pub table: String,
    pub rows_migrated: u64,
    pub rows_failed: u64,
    /// Inserted rows lost when the open transaction was rolled back
    #[serde(default)]
    pub rows_rolled_back: u64,
    pub errors: Vec<String>,
    pub status: TableStatus,
    #[serde(default)]
    pub unresolved_values: Vec<UnresolvableValue>,
    /// Inserted but not yet committed
    #[serde(skip)]
    rows_pending: u64,
}

impl TableResult {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            rows_migrated: 0,
            rows_failed: 0,
            rows_rolled_back: 0,
            errors: Vec::new(),
            status: TableStatus::Done,
            unresolved_values: Vec::new(),
            rows_pending: 0,
        }
    }

    /// A row written inside the open transaction
    pub fn record_pending_row(&mut self) {
        self.rows_pending += 1;
    }

    /// The open transaction committed: its rows count as migrated
    pub fn confirm_pending(&mut self) {
        self.rows_migrated += self.rows_pending;
        self.rows_pending = 0;
    }

    /// Record a row-level failure; `index` is 0-based over the table
    pub fn record_row_error(&mut self, index: u64, message: impl std::fmt::Display) {
        self.rows_failed += 1;
        self.errors.push(format!("Row {}: {}", index, message));
    }

    /// Mark the whole table failed
    pub fn fail(&mut self, message: impl std::fmt::Display) {
        self.rows_rolled_back += self.rows_pending;
        self.rows_pending = 0;
        self.status = TableStatus::Failed;
        self.errors.push(format!("Table migration failed: {}", message));
    }
}

/// Totals across all tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationStats {
    pub tables_processed: usize,
    pub rows_migrated: u64,
    pub rows_failed: u64,
    #[serde(default)]
    pub rows_rolled_back: u64,
    pub errors: Vec<String>,
}

impl MigrationStats {
    pub fn absorb(&mut self, result: &TableResult) {
        self.tables_processed += 1;
        self.rows_migrated += result.rows_migrated;
        self.rows_failed += result.rows_failed;
        self.rows_rolled_back += result.rows_rolled_back;
        self.errors.extend(result.errors.iter().cloned());
    }
}

/// Everything written to the result file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRunResult {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub stats: MigrationStats,
    pub results: Vec<TableResult>,
    /// Seconds
    pub duration: f64,
}

impl MigrationRunResult {
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            dry_run,
            started_at: Utc::now(),
            stats: MigrationStats::default(),
            results: Vec::new(),
            duration: 0.0,
        }
    }

    pub fn push(&mut self, result: TableResult) {
        self.stats.absorb(&result);
        self.results.push(result);
    }

    /// `{prefix}migration_result_{dryrun|live}_{YYYYmmdd_HHMMSS}.json`
    pub fn file_name(&self, prefix: &str) -> String {
        let mode = if self.dry_run { "dryrun" } else { "live" };
        let stamp = self.started_at.with_timezone(&Local).format("%Y%m%d_%H%M%S");
        format!("{}migration_result_{}_{}.json", prefix, mode, stamp)
    }

    /// Every structured unresolved value across tables
    pub fn unresolved_values(&self) -> impl Iterator<Item = &UnresolvableValue> {
        self.results.iter().flat_map(|r| r.unresolved_values.iter())
    }
}
