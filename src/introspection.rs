//! Schema Introspection Module
//!
//! Extracts column metadata for a set of tables from a live PostgreSQL schema.

use crate::db::queries::{GET_COLUMNS, LIST_TABLES};
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Column metadata captured at extraction time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// `information_schema.columns.data_type`, e.g. `character varying`
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_maximum_length: Option<i32>,
    pub primary_key: bool,
    pub ordinal_position: i32,
    /// Underlying type, used to cast bound parameters on insert
    pub udt_schema: String,
    pub udt_name: String,
}

impl Column {
    /// Declared type including its character bound, e.g. `character varying(50)`
    pub fn declared_type(&self) -> String {
        match self.character_maximum_length {
            Some(len) => format!("{}({})", self.data_type, len),
            None => self.data_type.clone(),
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.data_type.to_lowercase().as_str(), "json" | "jsonb")
    }
}

/// Table representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub schema: String,
    pub columns: Vec<Column>,
}

/// Ordered set of tables extracted from one schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub schema: String,
    pub tables: Vec<Table>,
}

impl SchemaSnapshot {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Schema introspector for PostgreSQL
pub struct PostgresIntrospector;

impl PostgresIntrospector {
    /// Extract the given tables (or every base table when `tables` is `None`).
    /// Requested tables that do not exist are skipped with a warning.
    pub async fn extract(
        client: &deadpool_postgres::Client,
        schema: &str,
        tables: Option<&[String]>,
    ) -> Result<SchemaSnapshot, AppError> {
        let table_names = match tables {
            Some(names) => names.to_vec(),
            None => {
                let names = Self::list_tables(client, schema).await?;
                debug!("Found {} tables in schema '{}'", names.len(), schema);
                names
            }
        };

        let mut snapshot = SchemaSnapshot {
            schema: schema.to_string(),
            tables: Vec::with_capacity(table_names.len()),
        };

        for name in table_names {
            let columns = Self::get_columns(client, schema, &name).await?;
            if columns.is_empty() {
                warn!("Table '{}' not found in schema '{}'", name, schema);
                continue;
            }
            snapshot.tables.push(Table {
                name,
                schema: schema.to_string(),
                columns,
            });
        }

        debug!(
            "Introspected {} tables from schema '{}'",
            snapshot.tables.len(),
            schema
        );

        Ok(snapshot)
    }

    /// Get all base table names in a schema, sorted by name
    pub async fn list_tables(
        client: &deadpool_postgres::Client,
        schema: &str,
    ) -> Result<Vec<String>, AppError> {
        let rows = client.query(LIST_TABLES, &[&schema]).await?;
        Ok(rows.iter().map(|row| row.get("table_name")).collect())
    }

    /// Get columns for a table in ordinal order. Empty when the table does not exist.
    pub async fn get_columns(
        client: &deadpool_postgres::Client,
        schema: &str,
        table: &str,
    ) -> Result<Vec<Column>, AppError> {
        let rows = client.query(GET_COLUMNS, &[&schema, &table]).await?;

        let columns = rows
            .iter()
            .map(|row| Column {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                nullable: row.get("nullable"),
                default: row.get("column_default"),
                character_maximum_length: row.get("character_maximum_length"),
                primary_key: row.get("is_primary_key"),
                ordinal_position: row.get("ordinal_position"),
                udt_schema: row.get("udt_schema"),
                udt_name: row.get("udt_name"),
            })
            .collect();

        Ok(columns)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_declared_type_includes_bound() {
        let mut col = column("email", "character varying", true);
        assert_eq!(col.declared_type(), "character varying");
        col.character_maximum_length = Some(255);
        assert_eq!(col.declared_type(), "character varying(255)");
    }

    #[test]
    fn test_json_columns() {
        assert!(column("payload", "jsonb", true).is_json());
        assert!(column("payload", "json", true).is_json());
        assert!(!column("payload", "text", true).is_json());
    }

    #[test]
    fn test_column_serializes_type_key() {
        let value = serde_json::to_value(column("id", "integer", false)).unwrap();
        assert_eq!(value["type"], "integer");
        assert!(value.get("default").is_none());
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = SchemaSnapshot {
            schema: "public".to_string(),
            tables: vec![table("users", vec![column("id", "integer", false)])],
        };
        assert!(snapshot.table("users").is_some());
        assert!(snapshot.table("orders").is_none());
        assert_eq!(snapshot.table("users").unwrap().columns[0].ordinal_position, 1);
    }
}
