//! Schema change records
//!
//! The change list is the hand-off between analysis and migration: it is
//! written to `migration_changes.json`, edited around by operators, and read
//! back by the migrator.

use serde::{Deserialize, Serialize};

/// Classification of a schema difference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// No data loss or failure risk
    Safe,
    /// Has an automatic remedy (rename, widening cast)
    Transformable,
    /// Needs an operator resolution before migrating
    Breaking,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Safe => write!(f, "safe"),
            ChangeType::Transformable => write!(f, "transformable"),
            ChangeType::Breaking => write!(f, "breaking"),
        }
    }
}

/// One classified difference between the old and new schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub table: String,
    pub description: String,
    #[serde(default)]
    pub old_column: Option<String>,
    #[serde(default)]
    pub new_column: Option<String>,
    #[serde(default)]
    pub auto_action: Option<String>,
    #[serde(default)]
    pub requires_manual: bool,
}

/// Shape of a change, derived from which columns it names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeTarget<'a> {
    /// The whole table is missing from the new database
    Table,
    /// An old column with no home in the new schema
    OldColumn(&'a str),
    /// A new column with no source in the old schema
    NewColumn(&'a str),
    /// A column present on both sides (type change or rename)
    Both { old: &'a str, new: &'a str },
}

impl SchemaChange {
    fn new(change_type: ChangeType, table: &str, description: String) -> Self {
        Self {
            change_type,
            table: table.to_string(),
            description,
            old_column: None,
            new_column: None,
            auto_action: None,
            requires_manual: change_type == ChangeType::Breaking,
        }
    }

    pub fn table_missing(table: &str) -> Self {
        Self::new(
            ChangeType::Breaking,
            table,
            format!("Table '{}' exists in current DB but not in new DB", table),
        )
    }

    pub fn renamed(table: &str, old_column: &str, new_column: &str) -> Self {
        Self {
            old_column: Some(old_column.to_string()),
            new_column: Some(new_column.to_string()),
            auto_action: Some("Rename column".to_string()),
            ..Self::new(
                ChangeType::Transformable,
                table,
                format!(
                    "Column '{}' likely renamed to '{}' in new DB",
                    old_column, new_column
                ),
            )
        }
    }

    pub fn column_removed(table: &str, old_column: &str) -> Self {
        Self {
            old_column: Some(old_column.to_string()),
            ..Self::new(
                ChangeType::Breaking,
                table,
                format!("Column '{}' exists in current DB but not in new DB", old_column),
            )
        }
    }

    /// Type (or character bound) change on a column present on both sides
    pub fn type_mismatch(
        table: &str,
        column: &str,
        old_type: &str,
        new_type: &str,
        compatible: bool,
    ) -> Self {
        let change_type = if compatible {
            ChangeType::Transformable
        } else {
            ChangeType::Breaking
        };
        Self {
            old_column: Some(column.to_string()),
            new_column: Some(column.to_string()),
            auto_action: compatible.then(|| format!("CAST to {}", new_type)),
            ..Self::new(
                change_type,
                table,
                format!(
                    "Column '{}' type mismatch: current({}) vs new({})",
                    column, old_type, new_type
                ),
            )
        }
    }

    pub fn nullable_column_added(table: &str, new_column: &str) -> Self {
        Self {
            new_column: Some(new_column.to_string()),
            auto_action: Some("Will be NULL during migration".to_string()),
            ..Self::new(
                ChangeType::Safe,
                table,
                format!("Column '{}' only exists in new DB (nullable)", new_column),
            )
        }
    }

    pub fn required_column_added(table: &str, new_column: &str, default: Option<&str>) -> Self {
        match default {
            Some(default) => Self {
                new_column: Some(new_column.to_string()),
                auto_action: Some(format!("Schema default: {}", default)),
                ..Self::new(
                    ChangeType::Breaking,
                    table,
                    format!(
                        "Column '{}' is NOT NULL in new DB, not in old DB, with default: {}",
                        new_column, default
                    ),
                )
            },
            None => Self {
                new_column: Some(new_column.to_string()),
                ..Self::new(
                    ChangeType::Breaking,
                    table,
                    format!(
                        "Column '{}' is NOT NULL in new DB without default, not in old DB",
                        new_column
                    ),
                )
            },
        }
    }

    pub fn is_breaking(&self) -> bool {
        self.requires_manual
    }

    /// A table-level change with no column names: the table is missing in the new database
    pub fn is_table_missing(&self) -> bool {
        self.target() == ChangeTarget::Table
    }

    pub fn target(&self) -> ChangeTarget<'_> {
        match (self.old_column.as_deref(), self.new_column.as_deref()) {
            (None, None) => ChangeTarget::Table,
            (Some(old), None) => ChangeTarget::OldColumn(old),
            (None, Some(new)) => ChangeTarget::NewColumn(new),
            (Some(old), Some(new)) => ChangeTarget::Both { old, new },
        }
    }
}

/// Counts per change type, used for report headers and logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub total: usize,
    pub safe: usize,
    pub transformable: usize,
    pub breaking: usize,
}

impl ChangeSummary {
    pub fn from_changes(changes: &[SchemaChange]) -> Self {
        let mut summary = Self {
            total: changes.len(),
            ..Self::default()
        };
        for change in changes {
            match change.change_type {
                ChangeType::Safe => summary.safe += 1,
                ChangeType::Transformable => summary.transformable += 1,
                ChangeType::Breaking => summary.breaking += 1,
            }
        }
        summary
    }
}

/// True when no change needs a manual resolution
pub fn can_auto_migrate(changes: &[SchemaChange]) -> bool {
    !changes.iter().any(SchemaChange::is_breaking)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_serialized_shape() {
        let change = SchemaChange::renamed("users", "full_nm", "full_name");
        assert_eq!(
            serde_json::to_value(&change).unwrap(),
            json!({
                "type": "transformable",
                "table": "users",
                "description": "Column 'full_nm' likely renamed to 'full_name' in new DB",
                "old_column": "full_nm",
                "new_column": "full_name",
                "auto_action": "Rename column",
                "requires_manual": false
            })
        );
    }

    #[test]
    fn test_requires_manual_tracks_breaking() {
        assert!(SchemaChange::table_missing("audit").requires_manual);
        assert!(SchemaChange::column_removed("users", "fax").requires_manual);
        assert!(!SchemaChange::nullable_column_added("users", "bio").requires_manual);
        assert!(SchemaChange::type_mismatch("t", "c", "text", "bigint", false).requires_manual);
        assert!(!SchemaChange::type_mismatch("t", "c", "bigint", "text", true).requires_manual);
    }

    #[test]
    fn test_required_column_descriptions() {
        let with_default =
            SchemaChange::required_column_added("users", "created_at", Some("now()"));
        assert_eq!(
            with_default.description,
            "Column 'created_at' is NOT NULL in new DB, not in old DB, with default: now()"
        );
        assert_eq!(with_default.auto_action.as_deref(), Some("Schema default: now()"));

        let without = SchemaChange::required_column_added("users", "tenant_id", None);
        assert_eq!(
            without.description,
            "Column 'tenant_id' is NOT NULL in new DB without default, not in old DB"
        );
        assert!(without.auto_action.is_none());
    }

    #[test]
    fn test_targets() {
        assert!(SchemaChange::table_missing("audit").is_table_missing());
        assert_eq!(
            SchemaChange::renamed("t", "a", "b").target(),
            ChangeTarget::Both { old: "a", new: "b" }
        );
        assert_eq!(
            SchemaChange::type_mismatch("t", "a", "integer", "text", true).target(),
            ChangeTarget::Both { old: "a", new: "a" }
        );
        assert_eq!(
            SchemaChange::column_removed("t", "fax").target(),
            ChangeTarget::OldColumn("fax")
        );
    }

    #[test]
    fn test_deserialize_with_missing_optionals() {
        let change: SchemaChange = serde_json::from_value(json!({
            "type": "breaking",
            "table": "audit",
            "description": "Table 'audit' exists in current DB but not in new DB",
            "requires_manual": true
        }))
        .unwrap();
        assert!(change.is_table_missing());
    }

    #[test]
    fn test_summary_and_auto_migrate() {
        let changes = vec![
            SchemaChange::nullable_column_added("users", "bio"),
            SchemaChange::renamed("users", "full_nm", "full_name"),
        ];
        let summary = ChangeSummary::from_changes(&changes);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.safe, 1);
        assert_eq!(summary.transformable, 1);
        assert!(can_auto_migrate(&changes));

        let mut changes = changes;
        changes.push(SchemaChange::column_removed("users", "fax"));
        assert!(!can_auto_migrate(&changes));
    }
}
