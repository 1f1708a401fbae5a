//! SQL query constants and builders
//!
//! Contains all SQL used against the old and new databases.

/// List all base tables in a schema
pub const LIST_TABLES: &str = r#"
    SELECT table_name
    FROM information_schema.tables
    WHERE table_schema = $1
        AND table_type = 'BASE TABLE'
    ORDER BY table_name
"#;

/// Get column information for a table, in ordinal order
pub const GET_COLUMNS: &str = r#"
    SELECT
        c.column_name,
        c.data_type,
        c.is_nullable = 'YES' AS nullable,
        c.column_default,
        c.character_maximum_length,
        c.ordinal_position,
        c.udt_schema,
        c.udt_name,
        COALESCE(pk.is_pk, false) AS is_primary_key
    FROM information_schema.columns c
    LEFT JOIN (
        SELECT kcu.column_name, true AS is_pk
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        WHERE tc.constraint_type = 'PRIMARY KEY'
            AND tc.table_schema = $1
            AND tc.table_name = $2
    ) pk ON c.column_name = pk.column_name
    WHERE c.table_schema = $1
        AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

/// Server version, used as a connectivity probe
pub const SERVER_VERSION: &str = "SELECT version()";

/// SQL builder for safe identifier quoting and per-table statements
pub struct SqlBuilder;

impl SqlBuilder {
    /// Quote an identifier (table/column name) safely
    pub fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Quote a string literal
    pub fn quote_literal(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// `"schema"."table"`, or just `"table"` when the schema is empty
    pub fn qualified_table(schema: &str, table: &str) -> String {
        if schema.is_empty() {
            Self::quote_ident(table)
        } else {
            format!("{}.{}", Self::quote_ident(schema), Self::quote_ident(table))
        }
    }

    /// Build the row count query for a table
    pub fn count_rows(schema: &str, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", Self::qualified_table(schema, table))
    }

    /// Build a query returning every row of a table as one jsonb document
    pub fn select_rows_as_json(schema: &str, table: &str) -> String {
        format!(
            "SELECT to_jsonb(t) FROM {} AS t",
            Self::qualified_table(schema, table)
        )
    }

    /// Build an INSERT whose parameters are bound as text and cast to each
    /// column's underlying type. `columns` pairs a column name with its
    /// `(udt_schema, udt_name)`.
    pub fn insert_row(schema: &str, table: &str, columns: &[(&str, (&str, &str))]) -> String {
        if columns.is_empty() {
            return format!(
                "INSERT INTO {} DEFAULT VALUES",
                Self::qualified_table(schema, table)
            );
        }

        let names: Vec<String> = columns
            .iter()
            .map(|(name, _)| Self::quote_ident(name))
            .collect();
        let placeholders: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, (_, (udt_schema, udt_name)))| {
                format!(
                    "${}::text::{}",
                    i + 1,
                    Self::qualified_table(udt_schema, udt_name)
                )
            })
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            Self::qualified_table(schema, table),
            names.join(", "),
            placeholders.join(", ")
        )
    }

    /// Build the query that loads a lookup table as `(key text, value jsonb)` pairs
    pub fn select_lookup(
        schema: &str,
        table: &str,
        key_column: &str,
        value_column: &str,
    ) -> String {
        format!(
            "SELECT {}::text, to_jsonb({}) FROM {}",
            Self::quote_ident(key_column),
            Self::quote_ident(value_column),
            Self::qualified_table(schema, table)
        )
    }
}
