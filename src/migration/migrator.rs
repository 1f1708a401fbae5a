//! Data migrator
//!
//! Streams each table's rows from the old database in batches, transforms
//! them and writes them to the new database. Row failures are recorded and
//! skipped; connection-level failures end the table, never the run.

use super::lookup::{LookupCaches, LookupSource};
use super::postgres::{PgLookupSource, PgRowSink, PgRowSource};
use super::result::{MigrationRunResult, TableResult};
use super::transformer::{Row, RowTransformer, TransformError};
use crate::analysis::SchemaChange;
use crate::config::{MigrationConfig, Settings};
use crate::db::{DatabasePools, Side};
use crate::error::{not_found_error, AppError};
use crate::introspection::PostgresIntrospector;
use crate::resolution::ResolutionSet;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Batched reader over the old table
#[async_trait]
pub trait RowSource: Send {
    async fn count(&mut self) -> Result<i64, AppError>;

    /// Up to `size` rows; empty once the table is exhausted
    async fn next_batch(&mut self, size: usize) -> Result<Vec<Row>, AppError>;
}

/// Why an insert did not land
#[derive(Error, Debug)]
pub enum InsertError {
    /// The database refused this row; the open transaction is still usable
    #[error(transparent)]
    Rejected(AppError),

    /// The session itself failed; no further row can be written
    #[error(transparent)]
    Session(AppError),
}

/// Transactional writer into the new table
#[async_trait]
pub trait RowSink: Send {
    /// Insert one row inside the open transaction
    async fn insert(&mut self, row: &Row) -> Result<(), InsertError>;

    async fn commit(&mut self) -> Result<(), AppError>;

    /// Discard uncommitted work after a table-level failure
    async fn rollback(&mut self) -> Result<(), AppError>;
}

/// The batch loop for a single table
#[derive(Debug, Clone)]
pub struct TableMigrator {
    batch_size: usize,
    error_display_limit: usize,
}

impl TableMigrator {
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            error_display_limit: config.error_display_limit,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Migrate one table. Never fails: errors end up in the result.
    pub async fn run(
        &self,
        table: &str,
        transformer: &RowTransformer<'_>,
        source: &mut dyn RowSource,
        sink: &mut dyn RowSink,
        lookup_source: &dyn LookupSource,
        dry_run: bool,
    ) -> TableResult {
        let mut result = TableResult::new(table);
        let mut lookups = LookupCaches::new();

        let streamed = self
            .stream(
                transformer,
                source,
                sink,
                lookup_source,
                &mut lookups,
                dry_run,
                &mut result,
            )
            .await;

        if let Err(e) = streamed {
            if !dry_run {
                if let Err(rollback_err) = sink.rollback().await {
                    warn!("Rollback after failure on '{}' failed: {}", table, rollback_err);
                }
            }
            error!("Table '{}' failed: {}", table, e);
            result.fail(&e);
        }

        info!(
            "Table '{}' processed: {}, success: {}, failed: {}, rolled back: {}",
            table,
            result.rows_migrated + result.rows_failed + result.rows_rolled_back,
            result.rows_migrated,
            result.rows_failed,
            result.rows_rolled_back
        );

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream(
        &self,
        transformer: &RowTransformer<'_>,
        source: &mut dyn RowSource,
        sink: &mut dyn RowSink,
        lookup_source: &dyn LookupSource,
        lookups: &mut LookupCaches,
        dry_run: bool,
        result: &mut TableResult,
    ) -> Result<(), AppError> {
        let total = source.count().await?;
        info!("Total rows to migrate: {}", total);

        let batch_size = self.batch_size as u64;
        let mut processed: u64 = 0;

        loop {
            let batch = source.next_batch(self.batch_size).await?;
            if batch.is_empty() {
                break;
            }

            for row in &batch {
                let outcome = match transformer.transform(row, lookups, lookup_source).await {
                    Ok(new_row) if dry_run => {
                        debug!("Would insert {} column(s)", new_row.len());
                        Ok(())
                    }
                    Ok(new_row) => match sink.insert(&new_row).await {
                        Ok(()) => Ok(()),
                        Err(InsertError::Rejected(e)) => Err(e.to_string()),
                        Err(InsertError::Session(e)) => return Err(e),
                    },
                    Err(TransformError::Unresolvable(value)) => {
                        let message = value.to_string();
                        result.unresolved_values.push(value);
                        Err(message)
                    }
                    Err(TransformError::Lookup(e)) => return Err(e),
                };

                match outcome {
                    Ok(()) if dry_run => result.rows_migrated += 1,
                    Ok(()) => result.record_pending_row(),
                    Err(message) => {
                        if result.errors.len() < self.error_display_limit {
                            warn!("Error on row {}: {}", processed, message);
                        }
                        result.record_row_error(processed, message);
                    }
                }
                processed += 1;
            }

            if !dry_run && processed % batch_size == 0 {
                sink.commit().await?;
                result.confirm_pending();
                info!("Committed {}/{} rows", processed, total);
            }
        }

        if !dry_run && processed % batch_size != 0 {
            sink.commit().await?;
            result.confirm_pending();
            debug!("Committed final {} rows", processed % batch_size);
        }

        Ok(())
    }
}

/// Decide which tables to migrate and in what order.
///
/// Configured tables come first in their configured order (foreign-key
/// order), then the remaining candidates sorted by name. Candidates are the
/// configured tables, tables named in the change list and, when no tables are
/// configured, every old table. Dropped tables and tables missing from the
/// new database are excluded.
pub fn plan_tables(
    configured: Option<&[String]>,
    changes: &[SchemaChange],
    dropped: &BTreeSet<String>,
    old_tables: &[String],
) -> Vec<String> {
    let missing: HashSet<&str> = changes
        .iter()
        .filter(|c| c.is_table_missing())
        .map(|c| c.table.as_str())
        .collect();

    let mut candidates: BTreeSet<&str> = changes.iter().map(|c| c.table.as_str()).collect();
    match configured {
        Some(tables) => candidates.extend(tables.iter().map(String::as_str)),
        None => candidates.extend(old_tables.iter().map(String::as_str)),
    }
    candidates.retain(|t| !dropped.contains(*t) && !missing.contains(t));

    let mut ordered: Vec<String> = Vec::with_capacity(candidates.len());
    for table in configured.unwrap_or_default() {
        if candidates.remove(table.as_str()) {
            ordered.push(table.clone());
        }
    }
    ordered.extend(candidates.into_iter().map(str::to_string));

    ordered
}

/// Runs the migration for every planned table against live databases
pub struct DataMigrator<'a> {
    settings: &'a Settings,
    pools: &'a DatabasePools,
    changes: &'a [SchemaChange],
    resolutions: &'a ResolutionSet,
    table_migrator: TableMigrator,
}

impl<'a> DataMigrator<'a> {
    pub fn new(
        settings: &'a Settings,
        pools: &'a DatabasePools,
        changes: &'a [SchemaChange],
        resolutions: &'a ResolutionSet,
    ) -> Self {
        Self {
            settings,
            pools,
            changes,
            resolutions,
            table_migrator: TableMigrator::new(&settings.migration),
        }
    }

    /// Tables to migrate, in order
    pub async fn tables_to_migrate(&self) -> Result<Vec<String>, AppError> {
        let configured = self.settings.tables.as_deref();
        let old_tables = match configured {
            Some(_) => Vec::new(),
            None => {
                let client = self.pools.pool(Side::Old).get().await?;
                PostgresIntrospector::list_tables(&client, &self.settings.old_database.schema)
                    .await?
            }
        };

        Ok(plan_tables(
            configured,
            self.changes,
            &self.resolutions.dropped_tables(),
            &old_tables,
        ))
    }

    /// Migrate every planned table, one at a time
    pub async fn migrate_all(&self, dry_run: bool) -> Result<MigrationRunResult, AppError> {
        let mut run = MigrationRunResult::new(dry_run);
        let started = Instant::now();

        if dry_run {
            info!("Running in DRY RUN mode - no data will be written");
        }

        let tables = self.tables_to_migrate().await?;
        info!("Tables to migrate: {}", tables.len());
        info!("Batch size: {}", self.table_migrator.batch_size());

        for table in &tables {
            info!("{}Migrating table: {}", if dry_run { "[DRY RUN] " } else { "" }, table);
            let result = match self.migrate_table(table, dry_run).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Table '{}' failed: {}", table, e);
                    let mut result = TableResult::new(table);
                    result.fail(&e);
                    result
                }
            };
            run.push(result);
        }

        run.duration = started.elapsed().as_secs_f64();

        info!(
            "Migration finished: {} table(s), {} row(s) migrated, {} row(s) failed, \
             {} row(s) rolled back in {:.2}s",
            run.stats.tables_processed,
            run.stats.rows_migrated,
            run.stats.rows_failed,
            run.stats.rows_rolled_back,
            run.duration
        );

        Ok(run)
    }

    /// Set up one table session: a client from each pool, column metadata
    /// and the transformation plan
    async fn migrate_table(&self, table: &str, dry_run: bool) -> Result<TableResult, AppError> {
        let old_schema = &self.settings.old_database.schema;
        let new_schema = &self.settings.new_database.schema;
        let new_table = self.settings.new_table_name(table);

        let mut old_client = self.pools.pool(Side::Old).get().await?;
        let new_client = self.pools.pool(Side::New).get().await?;

        let old_columns = PostgresIntrospector::get_columns(&old_client, old_schema, table).await?;
        if old_columns.is_empty() {
            return Err(not_found_error(format!(
                "Table '{}' not found in old schema '{}'",
                table, old_schema
            )));
        }
        let new_columns =
            PostgresIntrospector::get_columns(&new_client, new_schema, new_table).await?;
        if new_columns.is_empty() {
            return Err(not_found_error(format!(
                "Table '{}' not found in new schema '{}'",
                new_table, new_schema
            )));
        }
        info!(
            "Old columns: {}, New columns: {}",
            old_columns.len(),
            new_columns.len()
        );

        let transformer = RowTransformer::new(table, self.resolutions, self.changes, &new_columns);
        if !transformer.mapping().is_empty() {
            debug!("Column mapping for '{}': {} entries", table, transformer.mapping().len());
        }

        let mut source = PgRowSource::open(&mut old_client, old_schema, table, &old_columns).await?;
        let mut sink = PgRowSink::new(&new_client, new_schema, new_table, &new_columns);
        let lookup_source = PgLookupSource::new(self.pools.pool(Side::New), new_schema);

        Ok(self
            .table_migrator
            .run(
                table,
                &transformer,
                &mut source,
                &mut sink,
                &lookup_source,
                dry_run,
            )
            .await)
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{MemorySink, MemorySource};
    use super::*;
    use crate::introspection::fixtures::column;
    use crate::introspection::Column;
    use crate::migration::lookup::fakes::MemoryLookups;
    use crate::migration::result::TableStatus;
    use crate::migration::transformer::ValueSource;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn migrator(batch_size: usize) -> TableMigrator {
        TableMigrator::new(&MigrationConfig {
            batch_size,
            ..MigrationConfig::default()
        })
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| match json!({"id": i, "name": format!("row {}", i)}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect()
    }

    fn columns() -> Vec<Column> {
        vec![column("id", "integer", false), column("name", "text", true)]
    }

    async fn run(
        migrator: &TableMigrator,
        transformer: &RowTransformer<'_>,
        source: &mut MemorySource,
        sink: &mut MemorySink,
        dry_run: bool,
    ) -> TableResult {
        migrator
            .run("items", transformer, source, sink, &MemoryLookups::default(), dry_run)
            .await
    }

    #[tokio::test]
    async fn test_commit_count_is_ceiling_of_rows_over_batch() {
        let new_columns = columns();
        let set = ResolutionSet::default();
        let transformer = RowTransformer::new("items", &set, &[], &new_columns);

        let cases = [(0, 3, 0), (1, 3, 1), (3, 3, 1), (7, 3, 3), (9, 3, 3), (10, 1000, 1)];
        for (n, b, expected) in cases {
            let mut source = MemorySource::new(rows(n));
            let mut sink = MemorySink::default();
            let result = run(&migrator(b), &transformer, &mut source, &mut sink, false).await;

            assert_eq!(sink.commits, expected, "N={} B={}", n, b);
            assert_eq!(result.rows_migrated, n as u64);
            assert_eq!(sink.committed.len(), n);
        }
    }

    #[tokio::test]
    async fn test_dry_run_matches_live_counts() {
        let new_columns = vec![column("id", "integer", false), column("name", "integer", true)];
        let set = ResolutionSet::from_json_str(
            r#"{"resolutions": {"items": [{"action": "transform", "old_column": "name",
                "value_mapping": {"row 1": 1, "row 2": 2}}]}}"#,
        )
        .unwrap();
        let transformer = RowTransformer::new("items", &set, &[], &new_columns);

        let mut dry_sink = MemorySink::default();
        let dry = run(
            &migrator(2),
            &transformer,
            &mut MemorySource::new(rows(5)),
            &mut dry_sink,
            true,
        )
        .await;

        let mut live_sink = MemorySink::default();
        let live = run(
            &migrator(2),
            &transformer,
            &mut MemorySource::new(rows(5)),
            &mut live_sink,
            false,
        )
        .await;

        assert_eq!(dry.rows_migrated, 2);
        assert_eq!(dry.rows_failed, 3);
        assert_eq!(dry.rows_migrated, live.rows_migrated);
        assert_eq!(dry.rows_failed, live.rows_failed);
        assert_eq!(dry_sink.commits, 0);
        assert!(dry_sink.committed.is_empty());
        assert_eq!(live_sink.committed.len(), 2);
    }

    #[tokio::test]
    async fn test_row_failures_are_recorded_and_skipped() {
        let new_columns = columns();
        let set = ResolutionSet::default();
        let transformer = RowTransformer::new("items", &set, &[], &new_columns);
        let mut sink = MemorySink {
            reject_ids: vec![1, 3],
            ..MemorySink::default()
        };

        let result = run(
            &migrator(2),
            &transformer,
            &mut MemorySource::new(rows(4)),
            &mut sink,
            false,
        )
        .await;

        assert_eq!(result.rows_migrated, 2);
        assert_eq!(result.rows_failed, 2);
        assert_eq!(result.status, TableStatus::Done);
        assert_eq!(
            result.errors,
            vec![
                "Row 1: Validation error: duplicate key value violates unique constraint",
                "Row 3: Validation error: duplicate key value violates unique constraint",
            ]
        );
        assert_eq!(sink.commits, 2);
    }

    #[tokio::test]
    async fn test_unresolved_values_are_kept_structurally() {
        let new_columns = vec![
            column("id", "integer", false),
            column("category_id", "integer", false),
        ];
        let changes = vec![SchemaChange::renamed("items", "name", "category_id")];
        let set = ResolutionSet::from_json_str(
            r#"{"resolutions": {"items": [{"action": "transform", "old_column": "name",
                "lookup_table": {"table": "categories", "key_column": "name",
                                 "value_column": "id"}}]}}"#,
        )
        .unwrap();
        let lookups = MemoryLookups::default().with_table("categories", &[("row 0", json!(5))]);
        let transformer = RowTransformer::new("items", &set, &changes, &new_columns);
        let mut sink = MemorySink::default();

        let result = migrator(10)
            .run("items", &transformer, &mut MemorySource::new(rows(2)), &mut sink, &lookups, false)
            .await;

        assert_eq!(result.rows_migrated, 1);
        assert_eq!(result.rows_failed, 1);
        assert_eq!(sink.committed[0]["category_id"], json!(5));
        assert_eq!(result.unresolved_values.len(), 1);
        assert_eq!(result.unresolved_values[0].kind, ValueSource::Lookup);
        assert_eq!(result.unresolved_values[0].value, json!("row 1"));
        assert_eq!(
            result.errors[0],
            "Row 1: Value 'row 1' not found in lookup table for column 'name' -> 'category_id'"
        );
        assert_eq!(lookups.load_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_fails_table() {
        let new_columns = columns();
        let set = ResolutionSet::default();
        let transformer = RowTransformer::new("items", &set, &[], &new_columns);
        let mut source = MemorySource::new(rows(5));
        source.fail_after = Some(2);
        let mut sink = MemorySink::default();

        let result = run(&migrator(2), &transformer, &mut source, &mut sink, false).await;

        assert_eq!(result.status, TableStatus::Failed);
        assert_eq!(result.rows_migrated, 2);
        assert_eq!(sink.commits, 1);
        assert_eq!(sink.rollbacks, 1);
        assert_eq!(
            result.errors.last().unwrap(),
            "Table migration failed: Connection failed: server closed the connection"
        );
    }

    #[tokio::test]
    async fn test_lookup_load_failure_fails_table() {
        let new_columns = columns();
        let set = ResolutionSet::from_json_str(
            r#"{"resolutions": {"items": [{"action": "transform", "old_column": "name",
                "lookup_table": {"table": "nowhere", "key_column": "k", "value_column": "v"}}]}}"#,
        )
        .unwrap();
        let transformer = RowTransformer::new("items", &set, &[], &new_columns);
        let mut sink = MemorySink::default();

        let result = run(
            &migrator(10),
            &transformer,
            &mut MemorySource::new(rows(3)),
            &mut sink,
            false,
        )
        .await;

        assert_eq!(result.status, TableStatus::Failed);
        assert_eq!(result.rows_failed, 0);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_rolled_back_rows_are_not_counted_as_migrated() {
        let new_columns = vec![column("id", "integer", false), column("name", "integer", true)];
        let set = ResolutionSet::from_json_str(
            r#"{"resolutions": {"items": [{"action": "transform", "old_column": "name",
                "lookup_table": {"table": "nowhere", "key_column": "k", "value_column": "v"},
                "default_value": 0}]}}"#,
        )
        .unwrap();
        let transformer = RowTransformer::new("items", &set, &[], &new_columns);
        let source_rows: Vec<Row> = [
            json!({"id": 0, "name": null}),
            json!({"id": 1, "name": null}),
            json!({"id": 2, "name": "x"}),
        ]
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();
        let mut sink = MemorySink::default();

        // two null names skip the lookup and are written; the third loads it and fails
        let result = run(
            &migrator(10),
            &transformer,
            &mut MemorySource::new(source_rows),
            &mut sink,
            false,
        )
        .await;

        assert_eq!(result.status, TableStatus::Failed);
        assert_eq!(result.rows_migrated, 0);
        assert_eq!(result.rows_rolled_back, 2);
        assert_eq!(sink.commits, 0);
        assert_eq!(sink.rollbacks, 1);
        assert!(sink.committed.is_empty());
    }

    #[tokio::test]
    async fn test_lost_session_fails_table_once() {
        let new_columns = columns();
        let set = ResolutionSet::default();
        let transformer = RowTransformer::new("items", &set, &[], &new_columns);
        let mut sink = MemorySink {
            disconnected: true,
            ..MemorySink::default()
        };

        let result = run(
            &migrator(2),
            &transformer,
            &mut MemorySource::new(rows(5)),
            &mut sink,
            false,
        )
        .await;

        assert_eq!(result.status, TableStatus::Failed);
        assert_eq!(result.rows_migrated, 0);
        assert_eq!(result.rows_failed, 0);
        assert_eq!(
            result.errors,
            vec!["Table migration failed: Connection failed: connection closed"]
        );
        assert_eq!(sink.rollbacks, 1);
    }

    #[test]
    fn test_plan_tables_configured_order_first() {
        let configured = vec!["users".to_string(), "orders".to_string(), "ghost".to_string()];
        let changes = vec![
            SchemaChange::nullable_column_added("zeta", "x"),
            SchemaChange::nullable_column_added("alpha", "x"),
            SchemaChange::table_missing("ghost"),
            SchemaChange::column_removed("legacy", "y"),
        ];
        let dropped: BTreeSet<String> = ["legacy".to_string()].into_iter().collect();

        let plan = plan_tables(Some(&configured), &changes, &dropped, &[]);
        assert_eq!(plan, vec!["users", "orders", "alpha", "zeta"]);
    }

    #[test]
    fn test_plan_tables_without_configuration_uses_all_old_tables() {
        let old_tables = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        let changes = vec![SchemaChange::table_missing("c")];

        let plan = plan_tables(None, &changes, &BTreeSet::new(), &old_tables);
        assert_eq!(plan, vec!["a", "b"]);
    }
}
