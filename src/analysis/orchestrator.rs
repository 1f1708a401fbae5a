//! Analysis orchestrator
//!
//! Extracts both schemas, runs the analyzer across every table and renders
//! the human-readable report.

use super::analyzer::SchemaAnalyzer;
use super::changes::{can_auto_migrate, ChangeSummary, ChangeType, SchemaChange};
use crate::config::Settings;
use crate::db::{DatabasePools, Side};
use crate::error::AppError;
use crate::introspection::{PostgresIntrospector, SchemaSnapshot};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

const RULE_WIDTH: usize = 80;

/// Outcome of a schema analysis run
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub changes: Vec<SchemaChange>,
    pub can_auto_migrate: bool,
}

/// Drives extraction and comparison for all configured tables
pub struct MigrationOrchestrator<'a> {
    settings: &'a Settings,
}

impl<'a> MigrationOrchestrator<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Extract old and new schemas and classify their differences
    pub async fn analyze(&self, pools: &DatabasePools) -> Result<AnalysisOutcome, AppError> {
        let old_config = &self.settings.old_database;
        let new_config = &self.settings.new_database;
        let tables = self.settings.tables.as_deref();

        if tables.is_none() {
            info!(
                "No specific tables provided, scanning all tables in schema '{}'",
                old_config.schema
            );
        }

        let old_client = pools.pool(Side::Old).get().await?;
        let old_schema =
            PostgresIntrospector::extract(&old_client, &old_config.schema, tables).await?;
        info!("Extracted schema for {} tables from OLD database", old_schema.tables.len());

        let new_tables: Option<Vec<String>> = tables.map(|names| {
            names
                .iter()
                .map(|t| self.settings.new_table_name(t).to_string())
                .collect()
        });
        let new_client = pools.pool(Side::New).get().await?;
        let new_schema =
            PostgresIntrospector::extract(&new_client, &new_config.schema, new_tables.as_deref())
                .await?;
        info!("Extracted schema for {} tables from NEW database", new_schema.tables.len());

        let new_schema = remap_to_old_names(new_schema, &self.settings.table_mapping);

        info!("Analyzing differences...");
        let changes = SchemaAnalyzer::compare(
            &old_schema,
            &new_schema,
            self.settings.migration.similarity_threshold,
        );
        let can_auto_migrate = can_auto_migrate(&changes);

        Ok(AnalysisOutcome {
            changes,
            can_auto_migrate,
        })
    }

    /// Render the analysis report
    pub fn generate_report(&self, changes: &[SchemaChange]) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let thin_rule = "-".repeat(RULE_WIDTH);
        let mut report = vec![
            rule.clone(),
            "DATABASE MIGRATION ANALYSIS REPORT".to_string(),
            rule.clone(),
            format!("Old Database: {}", self.settings.old_database.display_name()),
            format!("New Database: {}", self.settings.new_database.display_name()),
        ];

        match &self.settings.tables {
            Some(tables) if !tables.is_empty() => {
                report.push(format!("Tables Analyzed: {}", tables.join(", ")))
            }
            _ => report.push("Tables Analyzed: ALL tables in schema".to_string()),
        }

        if !self.settings.table_mapping.is_empty() {
            report.push(format!(
                "Table Mappings: {} table(s) renamed",
                self.settings.table_mapping.len()
            ));
            for (old_name, new_name) in &self.settings.table_mapping {
                report.push(format!("  - {} -> {}", old_name, new_name));
            }
        }
        report.push(String::new());

        let summary = ChangeSummary::from_changes(changes);
        report.push(format!("Total Changes: {}", summary.total));
        report.push(format!("  - Safe (auto-handled): {}", summary.safe));
        report.push(format!(
            "  - Transformable (auto-converted): {}",
            summary.transformable
        ));
        report.push(format!("  - Breaking (manual required): {}", summary.breaking));
        report.push(String::new());

        let sections = [
            (ChangeType::Safe, "SAFE CHANGES (Can be handled automatically):"),
            (
                ChangeType::Transformable,
                "TRANSFORMABLE CHANGES (Can be converted automatically):",
            ),
            (
                ChangeType::Breaking,
                "BREAKING CHANGES (MANUAL INTERVENTION REQUIRED):",
            ),
        ];

        for (change_type, heading) in sections {
            let section: Vec<&SchemaChange> = changes
                .iter()
                .filter(|c| c.change_type == change_type)
                .collect();
            if section.is_empty() {
                continue;
            }

            report.push(heading.to_string());
            report.push(thin_rule.clone());
            for change in section {
                report.push(format!("  [{}] {}", change.table, change.description));
                if change_type == ChangeType::Breaking {
                    report.push("    ! Manual action required".to_string());
                } else if let Some(action) = &change.auto_action {
                    report.push(format!("    -> Action: {}", action));
                }
            }
            report.push(String::new());
        }

        report.push(rule.clone());
        if can_auto_migrate(changes) {
            report.push("MIGRATION CAN PROCEED AUTOMATICALLY".to_string());
        } else {
            report.push("MIGRATION CANNOT PROCEED AUTOMATICALLY".to_string());
            report.push("Please resolve the breaking changes above.".to_string());
        }
        report.push(rule);

        report.join("\n")
    }
}

/// Rename new-database tables back to their old names so both snapshots
/// share keys
pub fn remap_to_old_names(
    mut snapshot: SchemaSnapshot,
    table_mapping: &BTreeMap<String, String>,
) -> SchemaSnapshot {
    if table_mapping.is_empty() {
        return snapshot;
    }

    let reverse: HashMap<&str, &str> = table_mapping
        .iter()
        .map(|(old, new)| (new.as_str(), old.as_str()))
        .collect();

    for table in &mut snapshot.tables {
        if let Some(old_name) = reverse.get(table.name.as_str()) {
            table.name = old_name.to_string();
        }
    }

    snapshot
}
