//! Row transformer
//!
//! Turns one old row into one new row: column renames and drops, value
//! mappings, lookups, JSON coercion and default filling.

use super::lookup::{value_key, LookupCaches, LookupSource};
use crate::analysis::SchemaChange;
use crate::error::AppError;
use crate::introspection::Column;
use crate::resolution::{ColumnMapping, LookupSpec, ResolutionSet, TransformDirective};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// A row as a field map, in column order
pub type Row = Map<String, Value>;

/// Where a value failed to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Mapping,
    Lookup,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Mapping => write!(f, "mapping"),
            ValueSource::Lookup => write!(f, "lookup table"),
        }
    }
}

/// A source value with no mapping or lookup entry and no fallback default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvableValue {
    pub table: String,
    pub value: Value,
    pub source_column: String,
    pub target_column: String,
    #[serde(rename = "source")]
    pub kind: ValueSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupSpec>,
}

impl fmt::Display for UnresolvableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = value_key(&self.value).unwrap_or_else(|| "null".to_string());
        write!(
            f,
            "Value '{}' not found in {} for column '{}' -> '{}'",
            value, self.kind, self.source_column, self.target_column
        )
    }
}

impl std::error::Error for UnresolvableValue {}

#[derive(Error, Debug)]
pub enum TransformError {
    /// Fails the row
    #[error(transparent)]
    Unresolvable(#[from] UnresolvableValue),

    /// Fails the table: no row can be resolved against an unloadable lookup
    #[error("Failed to load lookup table: {0}")]
    Lookup(#[from] AppError),
}

/// Per-table transformation plan
pub struct RowTransformer<'a> {
    table: String,
    mapping: ColumnMapping,
    rules: HashMap<String, TransformDirective>,
    defaults: HashMap<String, Value>,
    new_columns: &'a [Column],
}

impl<'a> RowTransformer<'a> {
    /// Build the plan for `table` (old name) against the new table's columns
    pub fn new(
        table: &str,
        resolutions: &ResolutionSet,
        changes: &[SchemaChange],
        new_columns: &'a [Column],
    ) -> Self {
        Self {
            table: table.to_string(),
            mapping: resolutions.column_mapping(table, changes),
            rules: resolutions.transform_rules(table),
            defaults: resolutions.default_values(table),
            new_columns,
        }
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    /// Transform one old row into a new row
    pub async fn transform(
        &self,
        row: &Row,
        lookups: &mut LookupCaches,
        lookup_source: &dyn LookupSource,
    ) -> Result<Row, TransformError> {
        let mut new_row = Row::new();

        for (old_col, value) in row {
            let Some(new_col) = self.mapping.target(old_col) else {
                continue;
            };
            let Some(column) = self.new_columns.iter().find(|c| c.name == new_col) else {
                continue;
            };

            let value = match self.rules.get(old_col.as_str()) {
                Some(rule) => {
                    self.apply_rule(value, old_col, new_col, rule, lookups, lookup_source)
                        .await?
                }
                None => value.clone(),
            };

            new_row.insert(new_col.to_string(), coerce_for_column(value, column));
        }

        for column in self.new_columns {
            if new_row.contains_key(&column.name) {
                continue;
            }
            if let Some(default) = self.defaults.get(&column.name) {
                new_row.insert(column.name.clone(), coerce_for_column(default.clone(), column));
            } else if column.nullable {
                new_row.insert(column.name.clone(), Value::Null);
            }
            // otherwise omitted: the database applies its default, or the
            // insert fails and the row is recorded as failed
        }

        Ok(new_row)
    }

    /// Apply one transform rule: value mapping, then lookup, then SQL pass-through
    async fn apply_rule(
        &self,
        value: &Value,
        old_col: &str,
        new_col: &str,
        rule: &TransformDirective,
        lookups: &mut LookupCaches,
        lookup_source: &dyn LookupSource,
    ) -> Result<Value, TransformError> {
        if let Some(mapping) = rule.value_mapping.as_ref().filter(|m| !m.is_empty()) {
            let hit = value_key(value).and_then(|key| mapping.get(&key).cloned());
            return self.hit_or_default(hit, value, old_col, new_col, rule, ValueSource::Mapping);
        }

        if let Some(spec) = &rule.lookup_table {
            let hit = match value_key(value) {
                Some(key) => lookups.resolve(lookup_source, spec, &key).await?,
                None => None,
            };
            return self.hit_or_default(hit, value, old_col, new_col, rule, ValueSource::Lookup);
        }

        if rule.transform_sql.is_some() {
            warn!(
                "SQL transform specified for '{}' -> '{}' but not executed, using original value",
                old_col, new_col
            );
        }

        Ok(value.clone())
    }

    fn hit_or_default(
        &self,
        hit: Option<Value>,
        value: &Value,
        old_col: &str,
        new_col: &str,
        rule: &TransformDirective,
        kind: ValueSource,
    ) -> Result<Value, TransformError> {
        if let Some(resolved) = hit {
            return Ok(resolved);
        }
        if let Some(default) = &rule.default_value {
            return Ok(default.clone());
        }
        Err(UnresolvableValue {
            table: self.table.clone(),
            value: value.clone(),
            source_column: old_col.to_string(),
            target_column: new_col.to_string(),
            kind,
            lookup: match kind {
                ValueSource::Lookup => rule.lookup_table.clone(),
                ValueSource::Mapping => None,
            },
        }
        .into())
    }
}

/// Shape a value for its target column.
///
/// JSON columns receive JSON text (strings pass through as already-encoded
/// JSON). Other columns receive structured values as serialized text.
pub fn coerce_for_column(value: Value, column: &Column) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(_) => value,
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        Value::Number(_) | Value::Bool(_) if column.is_json() => Value::String(value.to_string()),
        scalar => scalar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::fixtures::column;
    use crate::migration::lookup::fakes::MemoryLookups;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn transform_once(
        transformer: &RowTransformer<'_>,
        input: Value,
    ) -> Result<Row, TransformError> {
        transformer
            .transform(&row(input), &mut LookupCaches::new(), &MemoryLookups::default())
            .await
    }

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test rows are objects"),
        }
    }

    fn resolutions(json: &str) -> ResolutionSet {
        ResolutionSet::from_json_str(json).unwrap()
    }

    fn users_new() -> Vec<Column> {
        let mut status = column("status_id", "integer", false);
        status.default = Some("0".to_string());
        vec![
            column("id", "integer", false),
            column("full_name", "character varying", true),
            status,
        ]
    }

    #[tokio::test]
    async fn test_users_end_to_end_row() {
        let new_columns = users_new();
        let changes = vec![
            SchemaChange::renamed("users", "full_nm", "full_name"),
            SchemaChange::required_column_added("users", "status_id", Some("0")),
        ];
        let set = resolutions(
            r#"{"resolutions": {"users": [
                {"action": "rename", "old_column": "full_nm", "new_column": "full_name"},
                {"action": "default", "new_column": "status_id", "default_value": 0}
            ]}}"#,
        );
        let transformer = RowTransformer::new("users", &set, &changes, &new_columns);

        let out = transformer
            .transform(
                &row(json!({"id": 1, "full_nm": "Alice"})),
                &mut LookupCaches::new(),
                &MemoryLookups::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            Value::Object(out),
            json!({"id": 1, "full_name": "Alice", "status_id": 0})
        );
    }

    #[tokio::test]
    async fn test_ignored_column_never_appears() {
        let new_columns = vec![column("id", "integer", false), column("fax", "text", true)];
        let set = resolutions(
            r#"{"resolutions": {"t": [{"action": "ignore", "old_column": "fax"}]}}"#,
        );
        let transformer = RowTransformer::new("t", &set, &[], &new_columns);

        let out = transformer
            .transform(
                &row(json!({"id": 7, "fax": "555-0100"})),
                &mut LookupCaches::new(),
                &MemoryLookups::default(),
            )
            .await
            .unwrap();

        // nullable target is filled with NULL, never with the ignored value
        assert_eq!(out.get("fax"), Some(&Value::Null));
        assert_eq!(out.get("id"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn test_value_mapping_miss() {
        let new_columns = vec![column("status_id", "integer", false)];
        let changes = vec![SchemaChange::renamed("t", "status_code", "status_id")];
        let strict = resolutions(
            r#"{"resolutions": {"t": [{"action": "transform", "old_column": "status_code",
                "value_mapping": {"ACTIVE": 1}}]}}"#,
        );
        let lenient = resolutions(
            r#"{"resolutions": {"t": [{"action": "transform", "old_column": "status_code",
                "value_mapping": {"ACTIVE": 1}, "default_value": 0}]}}"#,
        );
        let lookups = MemoryLookups::default();
        let input = row(json!({"status_code": "GONE"}));

        let err = RowTransformer::new("t", &strict, &changes, &new_columns)
            .transform(&input, &mut LookupCaches::new(), &lookups)
            .await
            .unwrap_err();
        match err {
            TransformError::Unresolvable(u) => {
                assert_eq!(u.kind, ValueSource::Mapping);
                assert_eq!(
                    u.to_string(),
                    "Value 'GONE' not found in mapping for column 'status_code' -> 'status_id'"
                );
            }
            other => panic!("unexpected error: {other}"),
        }

        let out = RowTransformer::new("t", &lenient, &changes, &new_columns)
            .transform(&input, &mut LookupCaches::new(), &lookups)
            .await
            .unwrap();
        assert_eq!(out["status_id"], json!(0));

        let hit = RowTransformer::new("t", &lenient, &changes, &new_columns)
            .transform(&row(json!({"status_code": "ACTIVE"})), &mut LookupCaches::new(), &lookups)
            .await
            .unwrap();
        assert_eq!(hit["status_id"], json!(1));
    }

    #[tokio::test]
    async fn test_numeric_values_match_text_keys() {
        let new_columns = vec![column("grade", "text", true)];
        let set = resolutions(
            r#"{"resolutions": {"t": [{"action": "transform", "old_column": "grade",
                "value_mapping": {"1": "A", "2": "B"}}]}}"#,
        );
        let transformer = RowTransformer::new("t", &set, &[], &new_columns);
        let out = transform_once(&transformer, json!({"grade": 2})).await.unwrap();
        assert_eq!(out["grade"], json!("B"));
    }

    #[tokio::test]
    async fn test_categories_lookup() {
        let new_columns = vec![column("category_id", "integer", false)];
        let changes = vec![SchemaChange::renamed("products", "category_name", "category_id")];
        let set = resolutions(
            r#"{"resolutions": {"products": [{"action": "transform", "old_column": "category_name",
                "new_column": "category_id",
                "lookup_table": {"table": "categories", "key_column": "name",
                                 "value_column": "id"}}]}}"#,
        );
        let source =
            MemoryLookups::default().with_table("categories", &[("electronics", json!(5))]);
        let transformer = RowTransformer::new("products", &set, &changes, &new_columns);
        let mut caches = LookupCaches::new();

        let out = transformer
            .transform(&row(json!({"category_name": "electronics"})), &mut caches, &source)
            .await
            .unwrap();
        assert_eq!(out["category_id"], json!(5));

        let err = transformer
            .transform(&row(json!({"category_name": "unknown"})), &mut caches, &source)
            .await
            .unwrap_err();
        let TransformError::Unresolvable(u) = err else {
            panic!("expected an unresolvable value");
        };
        assert_eq!(u.kind, ValueSource::Lookup);
        assert_eq!(u.lookup.as_ref().unwrap().table, "categories");
        assert_eq!(
            u.to_string(),
            "Value 'unknown' not found in lookup table for column 'category_name' -> 'category_id'"
        );
        assert_eq!(source.load_count(), 1);
    }

    #[tokio::test]
    async fn test_lookup_load_failure_is_not_a_row_error() {
        let new_columns = vec![column("category_id", "integer", false)];
        let set = resolutions(
            r#"{"resolutions": {"products": [{"action": "transform", "old_column": "category_id",
                "lookup_table": {"table": "missing", "key_column": "name",
                                 "value_column": "id"}}]}}"#,
        );
        let transformer = RowTransformer::new("products", &set, &[], &new_columns);
        let err = transform_once(&transformer, json!({"category_id": "x"})).await.unwrap_err();
        assert!(matches!(err, TransformError::Lookup(_)));
    }

    #[tokio::test]
    async fn test_sql_transform_passes_value_through() {
        let new_columns = vec![column("amount", "numeric", true)];
        let set = resolutions(
            r#"{"resolutions": {"t": [{"action": "transform", "old_column": "amount",
                "transform_sql": "CAST(amount AS numeric)"}]}}"#,
        );
        let transformer = RowTransformer::new("t", &set, &[], &new_columns);
        let out = transform_once(&transformer, json!({"amount": "12.50"})).await.unwrap();
        assert_eq!(out["amount"], json!("12.50"));
    }

    #[tokio::test]
    async fn test_missing_columns_fill_order() {
        let mut with_schema_default = column("created_at", "timestamp with time zone", false);
        with_schema_default.default = Some("now()".to_string());
        let new_columns = vec![
            column("id", "integer", false),
            column("bio", "text", true),
            with_schema_default,
            column("tenant_id", "integer", false),
            column("region", "text", false),
        ];
        let set = resolutions(
            r#"{"resolutions": {"t": [{"action": "default", "new_column": "region",
                "default_value": "eu"}]}}"#,
        );

        let transformer = RowTransformer::new("t", &set, &[], &new_columns);
        let out = transform_once(&transformer, json!({"id": 1, "legacy": "x"})).await.unwrap();

        assert_eq!(
            Value::Object(out),
            json!({"id": 1, "bio": null, "region": "eu"})
        );
    }

    #[test]
    fn test_json_coercion() {
        let jsonb = column("payload", "jsonb", true);
        let text = column("notes", "text", true);

        assert_eq!(coerce_for_column(json!({"a": 1}), &jsonb), json!("{\"a\":1}"));
        assert_eq!(coerce_for_column(json!([1, 2]), &jsonb), json!("[1,2]"));
        assert_eq!(coerce_for_column(json!("{\"a\":1}"), &jsonb), json!("{\"a\":1}"));
        assert_eq!(coerce_for_column(Value::Null, &jsonb), Value::Null);
        assert_eq!(coerce_for_column(json!(5), &jsonb), json!("5"));
        assert_eq!(coerce_for_column(json!(true), &jsonb), json!("true"));

        assert_eq!(coerce_for_column(json!({"a": 1}), &text), json!("{\"a\":1}"));
        assert_eq!(coerce_for_column(json!(5), &text), json!(5));
    }

    #[test]
    fn test_unresolvable_serializes_source_kind() {
        let value = UnresolvableValue {
            table: "products".to_string(),
            value: json!("unknown"),
            source_column: "category_name".to_string(),
            target_column: "category_id".to_string(),
            kind: ValueSource::Lookup,
            lookup: None,
        };
        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded["source"], "lookup");
        assert!(encoded.get("lookup").is_none());
    }
}
