//! Manual Resolutions
//!
//! Operator answers to breaking changes, plus the template generator and the
//! validator for resolution files.

pub mod models;
pub mod template;

pub use models::{ColumnMapping, LookupSpec, ResolutionSet, TransformDirective};
pub use template::{generate_template, validate};
