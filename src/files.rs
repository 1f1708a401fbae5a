//! JSON and text file helpers for reports, change lists, resolutions and results

use crate::error::{not_found_error, AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read and parse a JSON file; `what` names the file in diagnostics
pub fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> AppResult<T> {
    let contents = read_text(path, what)?;
    serde_json::from_str(&contents).map_err(|e| {
        AppError::Validation(format!("Invalid JSON in {} '{}': {}", what, path.display(), e))
    })
}

/// Read a whole text file; a missing file is a `NotFound` error
pub fn read_text(path: &Path, what: &str) -> AppResult<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            not_found_error(format!("{} '{}' not found", what, path.display()))
        }
        _ => AppError::Io(e),
    })
}

/// Write pretty-printed JSON, creating parent directories
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    let text = serde_json::to_string_pretty(value)?;
    write_text(path, &text)
}

/// Write a text file, creating parent directories
pub fn write_text(path: &Path, contents: &str) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

/// Output file locations for one prefix
#[derive(Debug, Clone)]
pub struct OutputPaths {
    dir: PathBuf,
    prefix: String,
}

impl OutputPaths {
    /// `prefix` is joined with `_` when non-empty, e.g. `prod` -> `prod_migration_report.txt`
    pub fn new(dir: impl Into<PathBuf>, prefix: Option<&str>) -> Self {
        let prefix = match prefix {
            Some(p) if !p.is_empty() => format!("{}_", p),
            _ => String::new(),
        };
        Self {
            dir: dir.into(),
            prefix,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn report(&self) -> PathBuf {
        self.file("migration_report.txt")
    }

    pub fn changes(&self) -> PathBuf {
        self.file("migration_changes.json")
    }

    pub fn resolutions(&self) -> PathBuf {
        self.file("manual_resolutions.json")
    }

    /// A file in the output directory, prefix already applied to `name`
    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.prefix, name))
    }
}
