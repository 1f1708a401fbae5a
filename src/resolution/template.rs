//! Resolution template generation and validation
//!
//! The template holds one directive per breaking change, pre-filled with a
//! suggested action. Anything the operator still has to decide is left as a
//! placeholder that `validate` reports.

use super::models::{ResolutionDirective, ResolutionSet, USE_SCHEMA_DEFAULT};
use crate::analysis::{ChangeTarget, SchemaChange};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const SPECIFY_ACTION: &str = "SPECIFY_ACTION";
pub const SPECIFY_NEW_COLUMN_NAME: &str = "SPECIFY_NEW_COLUMN_NAME";
pub const SPECIFY_DEFAULT_VALUE: &str = "SPECIFY_DEFAULT_VALUE";

const SCHEMA_DEFAULT_MARKER: &str = "with default:";

/// Build the resolution template for the breaking changes in `changes`.
/// Returns `None` when nothing needs resolving.
pub fn generate_template(changes: &[SchemaChange]) -> Option<Value> {
    let breaking: Vec<&SchemaChange> = changes.iter().filter(|c| c.is_breaking()).collect();
    if breaking.is_empty() {
        return None;
    }

    let mut resolutions: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for change in breaking {
        resolutions
            .entry(change.table.clone())
            .or_default()
            .push(suggest(change));
    }

    Some(json!({
        "_instructions": instructions(),
        "resolutions": resolutions,
    }))
}

/// Suggested directive for one breaking change
fn suggest(change: &SchemaChange) -> Value {
    let mut entry = Map::new();
    entry.insert("description".into(), json!(change.description));
    if let Some(old) = &change.old_column {
        entry.insert("old_column".into(), json!(old));
    }
    if let Some(new) = &change.new_column {
        entry.insert("new_column".into(), json!(new));
    }

    let (action, suggestion) = match change.target() {
        ChangeTarget::Table => ("drop_table", "Confirm table should not be migrated".to_string()),
        ChangeTarget::OldColumn(_) => ("ignore", "Confirm data loss is acceptable".to_string()),
        ChangeTarget::Both { old, new } if old != new => {
            ("rename", "Specify correct new_column name".to_string())
        }
        ChangeTarget::Both { old, .. } => {
            let new_type = change
                .description
                .rsplit_once("new(")
                .map(|(_, rest)| rest.trim_end_matches(')'))
                .unwrap_or("new_type");
            entry.insert(
                "transform_sql".into(),
                json!(format!("CAST({} AS {})", old, new_type)),
            );
            (
                "transform",
                "Provide value_mapping or lookup_table to convert data (transform_sql is not evaluated)"
                    .to_string(),
            )
        }
        ChangeTarget::NewColumn(_) => match schema_default(&change.description) {
            Some(default) => {
                entry.insert("default_value".into(), json!(USE_SCHEMA_DEFAULT));
                entry.insert("schema_default".into(), json!(default));
                (
                    "default",
                    format!(
                        "Schema has default: {}. Set 'default_value' to use a custom value, \
                         or keep USE_SCHEMA_DEFAULT to let the database apply it",
                        default
                    ),
                )
            }
            None => {
                entry.insert("default_value".into(), json!(SPECIFY_DEFAULT_VALUE));
                (
                    "default",
                    "REQUIRED: Provide default value for NOT NULL column without schema default"
                        .to_string(),
                )
            }
        },
    };

    entry.insert("action".into(), json!(action));
    entry.insert("_suggestion".into(), json!(suggestion));
    Value::Object(entry)
}

fn schema_default(description: &str) -> Option<&str> {
    description
        .split_once(SCHEMA_DEFAULT_MARKER)
        .map(|(_, default)| default.trim())
}

fn instructions() -> Value {
    json!({
        "description": "Specify how to resolve each breaking change",
        "actions": {
            "rename": "Map old column to new column name",
            "transform": "Apply custom transformation to data",
            "default": "Use a default value for new required columns",
            "ignore": "Skip this column (data will be lost)",
            "drop_table": "Confirm table should not be migrated"
        },
        "transform_options": {
            "value_mapping": "Direct value mapping (e.g., 'ABC' -> 1)",
            "lookup_table": "Lookup from reference table in new DB",
            "default_value": "Fallback value if mapping/lookup fails"
        },
        "examples": {
            "value_mapping": {
                "old_column": "status_code",
                "new_column": "status_id",
                "action": "transform",
                "value_mapping": {"ACTIVE": 1, "INACTIVE": 2, "PENDING": 3},
                "default_value": 0
            },
            "lookup_table": {
                "old_column": "category_name",
                "new_column": "category_id",
                "action": "transform",
                "lookup_table": {
                    "table": "categories",
                    "key_column": "name",
                    "value_column": "id",
                    "schema": "public"
                },
                "default_value": -1
            }
        }
    })
}

/// Findings from checking a resolution file against a change list
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub breaking_changes: usize,
    pub resolutions_provided: usize,
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check a raw resolution document: placeholders, malformed directives and
/// breaking changes left without a directive.
pub fn validate(document: &Value, changes: &[SchemaChange]) -> ValidationReport {
    let mut report = ValidationReport {
        breaking_changes: changes.iter().filter(|c| c.is_breaking()).count(),
        ..ValidationReport::default()
    };

    let mut parsed = ResolutionSet::default();
    let tables = document
        .get("resolutions")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    for (table, entries) in &tables {
        let entries = entries.as_array().map(Vec::as_slice).unwrap_or_default();
        report.resolutions_provided += entries.len();

        for entry in entries {
            if let Some(issue) = placeholder_issue(table, entry) {
                report.issues.push(issue);
                continue;
            }

            match serde_json::from_value::<ResolutionDirective>(entry.clone()) {
                Ok(directive) => match directive.validate() {
                    Ok(()) => parsed
                        .resolutions
                        .entry(table.clone())
                        .or_default()
                        .push(directive),
                    Err(msg) => report.issues.push(format!("{}: {}", table, msg)),
                },
                Err(e) => report
                    .issues
                    .push(format!("{}: Malformed directive: {}", table, e)),
            }
        }
    }

    for change in parsed.unresolved_breaking(changes) {
        report.issues.push(format!(
            "{}: No resolution for: {}",
            change.table, change.description
        ));
    }

    report
}

fn placeholder_issue(table: &str, entry: &Value) -> Option<String> {
    let field = |key: &str| entry.get(key).and_then(Value::as_str);

    match field("action") {
        Some(SPECIFY_ACTION) => Some(format!(
            "{}: {}",
            table,
            field("description").unwrap_or("Unknown")
        )),
        Some("rename") if field("new_column") == Some(SPECIFY_NEW_COLUMN_NAME) => {
            Some(format!("{}: Need to specify new_column for rename", table))
        }
        Some("default") if field("default_value") == Some(SPECIFY_DEFAULT_VALUE) => {
            Some(format!("{}: Need to specify default_value", table))
        }
        _ => None,
    }
}
