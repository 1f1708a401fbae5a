//! PostgreSQL row source, row sink and lookup source

use super::lookup::LookupSource;
use super::migrator::{InsertError, RowSink, RowSource};
use super::transformer::Row;
use crate::db::queries::SqlBuilder;
use crate::error::AppError;
use crate::introspection::Column;
use crate::resolution::LookupSpec;
use async_trait::async_trait;
use deadpool_postgres::{Client, Pool, Transaction};
use serde_json::Value;
use std::collections::HashMap;
use tokio_postgres::types::ToSql;
use tokio_postgres::Portal;

const ROW_SAVEPOINT: &str = "migrate_row";

/// Streams an old table through a server-side portal inside a read transaction
pub struct PgRowSource<'a> {
    tx: Transaction<'a>,
    portal: Portal,
    count_sql: String,
    columns: Vec<String>,
}

impl<'a> PgRowSource<'a> {
    pub async fn open(
        client: &'a mut Client,
        schema: &str,
        table: &str,
        columns: &[Column],
    ) -> Result<Self, AppError> {
        let tx = client.transaction().await?;
        let select = SqlBuilder::select_rows_as_json(schema, table);
        let portal = tx.bind(select.as_str(), &[]).await?;

        Ok(Self {
            tx,
            portal,
            count_sql: SqlBuilder::count_rows(schema, table),
            columns: columns.iter().map(|c| c.name.clone()).collect(),
        })
    }

    /// Rebuild the field map in old-column order
    fn ordered(&self, document: Value) -> Result<Row, AppError> {
        let Value::Object(mut fields) = document else {
            return Err(AppError::SchemaExtraction(
                "Row was not returned as a JSON object".to_string(),
            ));
        };

        let mut row = Row::with_capacity(self.columns.len());
        for name in &self.columns {
            let value = fields.remove(name).unwrap_or(Value::Null);
            row.insert(name.clone(), value);
        }
        Ok(row)
    }
}

#[async_trait]
impl RowSource for PgRowSource<'_> {
    async fn count(&mut self) -> Result<i64, AppError> {
        let row = self.tx.query_one(self.count_sql.as_str(), &[]).await?;
        Ok(row.get(0))
    }

    async fn next_batch(&mut self, size: usize) -> Result<Vec<Row>, AppError> {
        let max_rows = i32::try_from(size).unwrap_or(i32::MAX);
        let rows = self.tx.query_portal(&self.portal, max_rows).await?;

        rows.iter()
            .map(|row| {
                let document: Value = row.try_get(0)?;
                self.ordered(document)
            })
            .collect()
    }
}

/// Writes rows into a new table. Each insert runs under a savepoint so one
/// bad row does not abort the batch transaction.
pub struct PgRowSink<'a> {
    client: &'a Client,
    schema: String,
    table: String,
    columns: HashMap<String, &'a Column>,
    in_transaction: bool,
}

impl<'a> PgRowSink<'a> {
    pub fn new(client: &'a Client, schema: &str, table: &str, columns: &'a [Column]) -> Self {
        Self {
            client,
            schema: schema.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| (c.name.clone(), c)).collect(),
            in_transaction: false,
        }
    }

    /// Run a transaction-control statement; any failure ends the session
    async fn session(&self, sql: &str) -> Result<(), InsertError> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| InsertError::Session(e.into()))
    }

    async fn try_insert(&self, row: &Row) -> Result<(), AppError> {
        let mut targets = Vec::with_capacity(row.len());
        let mut params: Vec<Option<String>> = Vec::with_capacity(row.len());

        for (name, value) in row {
            let column = self.columns.get(name).ok_or_else(|| {
                AppError::Validation(format!(
                    "Column '{}' does not exist in {}.{}",
                    name, self.schema, self.table
                ))
            })?;
            targets.push((
                name.as_str(),
                (column.udt_schema.as_str(), column.udt_name.as_str()),
            ));
            params.push(bind_text(value, column));
        }

        let sql = SqlBuilder::insert_row(&self.schema, &self.table, &targets);
        let statement = self.client.prepare_cached(&sql).await?;
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        self.client.execute(&statement, &refs).await?;

        Ok(())
    }
}

#[async_trait]
impl RowSink for PgRowSink<'_> {
    async fn insert(&mut self, row: &Row) -> Result<(), InsertError> {
        if !self.in_transaction {
            self.session("BEGIN").await?;
            self.in_transaction = true;
        }

        self.session(&format!("SAVEPOINT {}", ROW_SAVEPOINT)).await?;

        match self.try_insert(row).await {
            Ok(()) => {
                self.session(&format!("RELEASE SAVEPOINT {}", ROW_SAVEPOINT))
                    .await
            }
            Err(e) => match classify_insert_error(e) {
                InsertError::Rejected(e) => {
                    self.session(&format!("ROLLBACK TO SAVEPOINT {}", ROW_SAVEPOINT))
                        .await?;
                    Err(InsertError::Rejected(e))
                }
                session => Err(session),
            },
        }
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        if self.in_transaction {
            self.client.batch_execute("COMMIT").await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.client.batch_execute("ROLLBACK").await?;
        }
        Ok(())
    }
}

/// A server-side rejection of the row (constraint, cast, unknown column) only
/// fails the row; anything else means the connection is unusable.
fn classify_insert_error(error: AppError) -> InsertError {
    match &error {
        AppError::Validation(_) => InsertError::Rejected(error),
        AppError::Database(e) if e.as_db_error().is_some() && !e.is_closed() => {
            InsertError::Rejected(error)
        }
        _ => InsertError::Session(error),
    }
}

/// Text parameter for a value; the statement casts it to the column type
fn bind_text(value: &Value, column: &Column) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) if column.udt_name.starts_with('_') => Some(array_literal(items)),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// PostgreSQL array literal, e.g. `{1,"a b",NULL}`
fn array_literal(items: &[Value]) -> String {
    let elements: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::Null => "NULL".to_string(),
            Value::Array(nested) => array_literal(nested),
            Value::String(s) => quote_array_element(s),
            other => quote_array_element(&other.to_string()),
        })
        .collect();
    format!("{{{}}}", elements.join(","))
}

fn quote_array_element(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Loads lookup tables from the new database
pub struct PgLookupSource<'a> {
    pool: &'a Pool,
    default_schema: String,
}

impl<'a> PgLookupSource<'a> {
    pub fn new(pool: &'a Pool, default_schema: &str) -> Self {
        Self {
            pool,
            default_schema: default_schema.to_string(),
        }
    }
}

#[async_trait]
impl LookupSource for PgLookupSource<'_> {
    async fn load_lookup(&self, spec: &LookupSpec) -> Result<HashMap<String, Value>, AppError> {
        let schema = spec.schema.as_deref().unwrap_or(&self.default_schema);
        let sql =
            SqlBuilder::select_lookup(schema, &spec.table, &spec.key_column, &spec.value_column);

        let client = self.pool.get().await?;
        let rows = client.query(sql.as_str(), &[]).await?;

        let mut entries = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: Option<String> = row.try_get(0)?;
            let value: Option<Value> = row.try_get(1)?;
            if let Some(key) = key {
                entries.insert(key, value.unwrap_or(Value::Null));
            }
        }
        Ok(entries)
    }
}
