//! Manual resolution directives
//!
//! Operators answer each breaking change with a directive in the resolution
//! file: `{"resolutions": {"<table>": [<directive>, ...]}}`.

use crate::analysis::{ChangeTarget, SchemaChange};
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Sentinel default meaning "let the database apply its own default"
pub const USE_SCHEMA_DEFAULT: &str = "USE_SCHEMA_DEFAULT";

/// Reference table used to translate old values into new ones
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LookupSpec {
    pub table: String,
    pub key_column: String,
    pub value_column: String,
    /// Defaults to the new database's schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl LookupSpec {
    /// Cache key: one cache per (lookup table, key column)
    pub fn cache_key(&self) -> (String, String) {
        (self.table.clone(), self.key_column.clone())
    }
}

/// Value transformation for one old column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformDirective {
    pub old_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_column: Option<String>,
    /// Accepted but never evaluated; the value passes through unchanged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_sql: Option<String>,
    /// Old value (as text) -> new value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_mapping: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_table: Option<LookupSpec>,
    /// Fallback when the mapping or lookup has no entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl TransformDirective {
    fn has_rule(&self) -> bool {
        self.value_mapping.is_some()
            || self.lookup_table.is_some()
            || self.transform_sql.is_some()
            || self.default_value.is_some()
    }
}

/// One operator instruction, tagged by `action`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolutionDirective {
    Rename {
        old_column: String,
        new_column: String,
    },
    Transform(TransformDirective),
    Default {
        new_column: String,
        default_value: Value,
    },
    Ignore {
        old_column: String,
    },
    DropTable,
}

impl ResolutionDirective {
    pub fn old_column(&self) -> Option<&str> {
        match self {
            ResolutionDirective::Rename { old_column, .. }
            | ResolutionDirective::Ignore { old_column } => Some(old_column),
            ResolutionDirective::Transform(t) => Some(&t.old_column),
            ResolutionDirective::Default { .. } | ResolutionDirective::DropTable => None,
        }
    }

    /// Field-level checks serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ResolutionDirective::Transform(t) if !t.has_rule() => Err(format!(
                "transform for column '{}' needs value_mapping, lookup_table, transform_sql or default_value",
                t.old_column
            )),
            ResolutionDirective::Rename {
                old_column,
                new_column,
            } if old_column.is_empty() || new_column.is_empty() => {
                Err("rename needs non-empty old_column and new_column".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Old column -> new column (`None` drops the column)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMapping {
    entries: HashMap<String, Option<String>>,
}

impl ColumnMapping {
    /// Where an old column's value goes; unmapped columns keep their name
    pub fn target<'a>(&'a self, old_column: &'a str) -> Option<&'a str> {
        match self.entries.get(old_column) {
            Some(target) => target.as_deref(),
            None => Some(old_column),
        }
    }

    fn insert_if_absent(&mut self, old_column: &str, target: Option<&str>) {
        self.entries
            .entry(old_column.to_string())
            .or_insert_with(|| target.map(str::to_string));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lookups sharing a cache key within a table must read the same column of the same table
fn check_lookup_keys(directives: &[ResolutionDirective]) -> Result<(), String> {
    let mut seen: HashMap<(String, String), &LookupSpec> = HashMap::new();
    for directive in directives {
        let ResolutionDirective::Transform(TransformDirective {
            lookup_table: Some(spec),
            ..
        }) = directive
        else {
            continue;
        };
        match seen.get(&spec.cache_key()) {
            Some(first)
                if first.value_column != spec.value_column || first.schema != spec.schema =>
            {
                return Err(format!(
                    "lookups on '{}'.'{}' disagree on value_column or schema ('{}' vs '{}')",
                    spec.table, spec.key_column, first.value_column, spec.value_column
                ));
            }
            Some(_) => {}
            None => {
                seen.insert(spec.cache_key(), spec);
            }
        }
    }
    Ok(())
}

/// Every directive from a resolution file, by table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionSet {
    #[serde(default)]
    pub resolutions: BTreeMap<String, Vec<ResolutionDirective>>,
}

impl ResolutionSet {
    /// Parse and validate a resolution file's contents
    pub fn from_json_str(contents: &str) -> Result<Self, AppError> {
        let set: ResolutionSet = serde_json::from_str(contents)
            .map_err(|e| AppError::Validation(format!("Invalid resolutions file: {}", e)))?;

        for (table, directives) in &set.resolutions {
            for directive in directives {
                directive
                    .validate()
                    .map_err(|msg| AppError::Validation(format!("[{}] {}", table, msg)))?;
            }
            check_lookup_keys(directives)
                .map_err(|msg| AppError::Validation(format!("[{}] {}", table, msg)))?;
        }

        Ok(set)
    }

    pub fn directives_for(&self, table: &str) -> &[ResolutionDirective] {
        self.resolutions
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Build the column mapping for a table.
    ///
    /// Manual `rename`/`ignore` come first, then transform targets, then the
    /// automatic rename and type-change pairs from the change list. The first
    /// entry for a column wins.
    pub fn column_mapping(&self, table: &str, changes: &[SchemaChange]) -> ColumnMapping {
        let mut mapping = ColumnMapping::default();
        let directives = self.directives_for(table);

        for directive in directives {
            match directive {
                ResolutionDirective::Rename {
                    old_column,
                    new_column,
                } => mapping.insert_if_absent(old_column, Some(new_column)),
                ResolutionDirective::Ignore { old_column } => {
                    mapping.insert_if_absent(old_column, None)
                }
                _ => {}
            }
        }

        for directive in directives {
            if let ResolutionDirective::Transform(TransformDirective {
                old_column,
                new_column: Some(new_column),
                ..
            }) = directive
            {
                mapping.insert_if_absent(old_column, Some(new_column));
            }
        }

        for change in changes.iter().filter(|c| c.table == table) {
            if let ChangeTarget::Both { old, new } = change.target() {
                mapping.insert_if_absent(old, Some(new));
            }
        }

        mapping
    }

    /// Transform directives keyed by old column (first one wins)
    pub fn transform_rules(&self, table: &str) -> HashMap<String, TransformDirective> {
        let mut rules = HashMap::new();
        for directive in self.directives_for(table) {
            if let ResolutionDirective::Transform(t) = directive {
                rules
                    .entry(t.old_column.clone())
                    .or_insert_with(|| t.clone());
            }
        }
        rules
    }

    /// Manual defaults keyed by new column, excluding `USE_SCHEMA_DEFAULT`
    pub fn default_values(&self, table: &str) -> HashMap<String, Value> {
        let mut defaults = HashMap::new();
        for directive in self.directives_for(table) {
            if let ResolutionDirective::Default {
                new_column,
                default_value,
            } = directive
            {
                if default_value.is_null() || default_value.as_str() == Some(USE_SCHEMA_DEFAULT) {
                    continue;
                }
                defaults
                    .entry(new_column.clone())
                    .or_insert_with(|| default_value.clone());
            }
        }
        defaults
    }

    /// Tables the operator chose not to migrate
    pub fn dropped_tables(&self) -> BTreeSet<String> {
        self.resolutions
            .iter()
            .filter(|(_, directives)| {
                directives
                    .iter()
                    .any(|d| matches!(d, ResolutionDirective::DropTable))
            })
            .map(|(table, _)| table.clone())
            .collect()
    }

    /// Breaking changes no directive answers
    pub fn unresolved_breaking<'c>(&self, changes: &'c [SchemaChange]) -> Vec<&'c SchemaChange> {
        changes
            .iter()
            .filter(|c| c.is_breaking() && !self.resolves(c))
            .collect()
    }

    fn resolves(&self, change: &SchemaChange) -> bool {
        let directives = self.directives_for(&change.table);
        if directives
            .iter()
            .any(|d| matches!(d, ResolutionDirective::DropTable))
        {
            return true;
        }

        match change.target() {
            ChangeTarget::Table => false,
            ChangeTarget::OldColumn(old) | ChangeTarget::Both { old, .. } => directives
                .iter()
                .any(|d| {
                    !matches!(d, ResolutionDirective::Default { .. }) && d.old_column() == Some(old)
                }),
            ChangeTarget::NewColumn(new) => directives.iter().any(|d| match d {
                ResolutionDirective::Default { new_column, .. }
                | ResolutionDirective::Rename { new_column, .. } => new_column == new,
                ResolutionDirective::Transform(t) => t.new_column.as_deref() == Some(new),
                _ => false,
            }),
        }
    }
}
