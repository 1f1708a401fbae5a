//! Lookup caches
//!
//! Reference tables in the new database are loaded once per table migration
//! and kept for the whole session.

use crate::error::AppError;
use crate::resolution::LookupSpec;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

/// Loads a lookup table as `key text -> value`
#[async_trait]
pub trait LookupSource: Send + Sync {
    async fn load_lookup(&self, spec: &LookupSpec) -> Result<HashMap<String, Value>, AppError>;
}

/// Text form used to match a row value against mapping and lookup keys.
/// `null` never matches.
pub fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Per-session lookup caches, keyed by (lookup table, key column)
#[derive(Debug, Default)]
pub struct LookupCaches {
    caches: HashMap<(String, String), HashMap<String, Value>>,
}

impl LookupCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `key` through the lookup table, loading it on first use
    pub async fn resolve(
        &mut self,
        source: &dyn LookupSource,
        spec: &LookupSpec,
        key: &str,
    ) -> Result<Option<Value>, AppError> {
        let cache_key = spec.cache_key();
        if !self.caches.contains_key(&cache_key) {
            let entries = source.load_lookup(spec).await?;
            info!(
                "Loaded {} entries from lookup table {}",
                entries.len(),
                spec.table
            );
            self.caches.insert(cache_key.clone(), entries);
        }

        Ok(self
            .caches
            .get(&cache_key)
            .and_then(|cache| cache.get(key))
            .cloned())
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::MemoryLookups;
    use super::*;
    use serde_json::json;

    fn categories() -> LookupSpec {
        LookupSpec {
            table: "categories".to_string(),
            key_column: "name".to_string(),
            value_column: "id".to_string(),
            schema: None,
        }
    }

    #[test]
    fn test_value_key() {
        assert_eq!(value_key(&json!("abc")), Some("abc".to_string()));
        assert_eq!(value_key(&json!(5)), Some("5".to_string()));
        assert_eq!(value_key(&json!(true)), Some("true".to_string()));
        assert_eq!(value_key(&Value::Null), None);
    }

    #[tokio::test]
    async fn test_cache_loads_once_per_session() {
        let source =
            MemoryLookups::default().with_table("categories", &[("electronics", json!(5))]);
        let mut caches = LookupCaches::new();

        let hit = caches.resolve(&source, &categories(), "electronics").await.unwrap();
        let miss = caches.resolve(&source, &categories(), "unknown").await.unwrap();

        assert_eq!(hit, Some(json!(5)));
        assert_eq!(miss, None);
        assert_eq!(source.load_count(), 1);
    }

    #[tokio::test]
    async fn test_load_failure_propagates() {
        let source = MemoryLookups::default();
        let mut caches = LookupCaches::new();
        assert!(caches.resolve(&source, &categories(), "x").await.is_err());
        // nothing cached, so the next resolve tries again
        assert!(caches.resolve(&source, &categories(), "x").await.is_err());
        assert_eq!(source.load_count(), 2);
    }
}
