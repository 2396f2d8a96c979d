use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tax_core::{AssetCategory, FundType};
use tracing::warn;

/// One persisted classification decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredClassification {
    pub category: AssetCategory,
    pub fund_type: FundType,
    #[serde(default)]
    pub notes: String,
}

/// Persistent classification-key → decision store.
///
/// A JSON object keyed by [`Asset::classification_key`]; entries are
/// parsed lazily per key so one malformed entry only forces
/// re-classification of that single instrument. Load/save failures are
/// logged and the store degrades to in-memory for the run.
///
/// [`Asset::classification_key`]: tax_core::Asset::classification_key
pub struct ClassificationStore {
    path: Option<PathBuf>,
    entries: HashMap<String, serde_json::Value>,
    dirty: bool,
}

impl ClassificationStore {
    pub fn load(path: PathBuf) -> Self {
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, serde_json::Value>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(file = %path.display(), "classification cache unreadable, starting empty: {e}");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(file = %path.display(), "classification cache load failed, starting empty: {e}");
                HashMap::new()
            }
        };

        Self {
            path: Some(path),
            entries,
            dirty: false,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: HashMap::new(),
            dirty: false,
        }
    }

    /// Cached decision for a key, or `None` when absent or malformed
    /// (malformed entries are discarded with a diagnostic and the caller
    /// re-classifies).
    pub fn get(&mut self, key: &str) -> Option<StoredClassification> {
        let value = self.entries.get(key)?;
        match serde_json::from_value::<StoredClassification>(value.clone()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("discarding malformed classification cache entry for {key:?}: {e}");
                self.entries.remove(key);
                self.dirty = true;
                None
            }
        }
    }

    pub fn insert(&mut self, key: &str, category: AssetCategory, fund_type: FundType, notes: &str) {
        let entry = StoredClassification {
            category,
            fund_type,
            notes: notes.to_string(),
        };
        // serde_json::to_value on a plain enum struct cannot fail
        if let Ok(value) = serde_json::to_value(&entry) {
            self.entries.insert(key.to_string(), value);
            self.dirty = true;
        }
    }

    /// Flush to disk. Called once after each classification pass.
    pub fn save(&mut self) {
        let Some(path) = &self.path else {
            return;
        };
        if !self.dirty {
            return;
        }
        match serde_json::to_string_pretty(&self.entries) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(file = %path.display(), "classification cache save failed: {e}");
                } else {
                    self.dirty = false;
                }
            }
            Err(e) => warn!("classification cache serialization failed: {e}"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
