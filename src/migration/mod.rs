//! Data Migration Module
//!
//! Moves rows from the old database into the new one:
//! - Row transformation (renames, value mappings, lookups, defaults)
//! - Batched streaming with per-batch commits
//! - Per-table results and the run result file
//! - SQL generation for lookup values that were missing

pub mod lookup;
pub mod migrator;
pub mod missing_lookups;
pub mod postgres;
pub mod result;
pub mod transformer;

pub use migrator::DataMigrator;
pub use result::MigrationRunResult;
