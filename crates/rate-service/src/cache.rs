use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::warn;

/// Marker stored for dates the source explicitly had no rate for.
const FAILURE_MARKER: &str = "FAIL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedRate {
    Rate(Decimal),
    /// The source was asked and had nothing; do not ask again.
    Failure,
}

/// File-backed (date, currency) → rate store.
///
/// A plain JSON map of `"{date}:{CUR}"` keys to decimal strings or an
/// explicit failure marker. Loaded once at construction, flushed on
/// [`save`](RateCache::save) at phase boundaries. I/O problems are
/// logged and the cache degrades to in-memory for the run.
pub struct RateCache {
    path: Option<PathBuf>,
    entries: HashMap<String, String>,
    dirty: bool,
}

impl RateCache {
    pub fn load(path: PathBuf) -> Self {
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(file = %path.display(), "rate cache unreadable, starting empty: {e}");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(file = %path.display(), "rate cache load failed, starting empty: {e}");
                HashMap::new()
            }
        };

        Self {
            path: Some(path),
            entries,
            dirty: false,
        }
    }

    /// In-memory cache for tests and offline runs without persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: HashMap::new(),
            dirty: false,
        }
    }

    fn key(date: NaiveDate, currency: &str) -> String {
        format!("{date}:{}", currency.to_uppercase())
    }

    pub fn get(&self, date: NaiveDate, currency: &str) -> Option<CachedRate> {
        let key = Self::key(date, currency);
        let raw = self.entries.get(&key)?;
        if raw == FAILURE_MARKER {
            return Some(CachedRate::Failure);
        }
        match Decimal::from_str(raw) {
            Ok(rate) => Some(CachedRate::Rate(rate)),
            Err(_) => {
                warn!("discarding malformed rate cache entry {key} = {raw:?}");
                None
            }
        }
    }

    pub fn insert_rate(&mut self, date: NaiveDate, currency: &str, rate: Decimal) {
        self.entries.insert(Self::key(date, currency), rate.to_string());
        self.dirty = true;
    }

    pub fn insert_failure(&mut self, date: NaiveDate, currency: &str) {
        self.entries
            .insert(Self::key(date, currency), FAILURE_MARKER.to_string());
        self.dirty = true;
    }

    /// Flush to disk. Called at phase boundaries, never per lookup.
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
                    warn!(file = %path.display(), "rate cache save failed: {e}");
                } else {
                    self.dirty = false;
                }
            }
            Err(e) => warn!("rate cache serialization failed: {e}"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
