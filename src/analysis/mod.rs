//! Schema Analysis Module
//!
//! Detects what differs between the old and new database:
//! - Column rename detection by name similarity
//! - Type-change classification against a compatibility matrix
//! - New-column and missing-table detection
//! - The analysis report

pub mod analyzer;
pub mod changes;
pub mod compatibility;
pub mod orchestrator;
pub mod similarity;

pub use changes::{ChangeTarget, SchemaChange};
pub use orchestrator::MigrationOrchestrator;
