//! Typed repositories over `StorageService`.
//!
//! Each store loads its record once and writes the whole record back after every
//! mutation. Write failures are logged and otherwise ignored: in-memory state stays
//! authoritative for the session.

use std::sync::Arc;

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use guidepost_util::StorageService;
use indexmap::{IndexMap, IndexSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Storage key of the per-walkthrough metadata records.
pub const METADATA_KEY: &str = "workbench.welcomePage.walkthroughMetadata";
/// Storage key of the per-step progress records.
pub const PROGRESS_KEY: &str = "gettingStarted.stepProgress";
/// Storage key of the hidden walkthrough ids.
pub const HIDDEN_KEY: &str = "welcomePage.hiddenCategories";

fn load_record<T: DeserializeOwned + Default>(storage: &dyn StorageService, key: &str) -> T {
    match storage.get(key) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|error| {
            warn!(key, error = %error, "Discarding unreadable stored record");
            T::default()
        }),
        Ok(None) => T::default(),
        Err(error) => {
            warn!(key, error = %error, "Failed to read stored record");
            T::default()
        }
    }
}

fn save_record<T: Serialize>(storage: &dyn StorageService, key: &str, value: &T) {
    let serialized = match serde_json::to_string(value) {
        Ok(serialized) => serialized,
        Err(error) => {
            warn!(key, error = %error, "Failed to serialize record");
            return;
        }
    };
    if let Err(error) = storage.store(key, serialized) {
        warn!(key, error = %error, "Failed to persist record");
    }
}

fn remove_record(storage: &dyn StorageService, key: &str) {
    if let Err(error) = storage.remove(key) {
        warn!(key, error = %error, "Failed to remove record");
    }
}

/// What the engine remembers about a walkthrough across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkthroughMetadata {
    #[serde(with = "ts_milliseconds")]
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub manually_opened: bool,
    /// Step ids as of the last time the walkthrough was viewed.
    #[serde(default)]
    pub step_ids: Option<Vec<String>>,
}

impl WalkthroughMetadata {
    pub fn first_seen_at(now: DateTime<Utc>, step_ids: Vec<String>) -> Self {
        Self {
            first_seen: now,
            manually_opened: false,
            step_ids: Some(step_ids),
        }
    }
}

/// Metadata records persisted as an ordered array of `[id, record]` pairs.
pub struct MetadataStore {
    storage: Arc<dyn StorageService>,
    records: IndexMap<String, WalkthroughMetadata>,
}

impl MetadataStore {
    pub fn load(storage: Arc<dyn StorageService>) -> Self {
        let pairs: Vec<(String, WalkthroughMetadata)> = load_record(storage.as_ref(), METADATA_KEY);
        Self {
            storage,
            records: pairs.into_iter().collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&WalkthroughMetadata> {
        self.records.get(id)
    }

    /// Creates the record for `id` when none exists. Returns whether a record was created.
    pub fn ensure(&mut self, id: &str, now: DateTime<Utc>, step_ids: Vec<String>) -> bool {
        if self.records.contains_key(id) {
            return false;
        }
        self.records.insert(id.to_string(), WalkthroughMetadata::first_seen_at(now, step_ids));
        self.save();
        true
    }

    /// Flags the walkthrough as opened and records `step_ids` as last viewed.
    pub fn mark_opened(&mut self, id: &str, now: DateTime<Utc>, step_ids: Vec<String>) {
        let record = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| WalkthroughMetadata::first_seen_at(now, Vec::new()));
        record.manually_opened = true;
        record.step_ids = Some(step_ids);
        self.save();
    }

    pub fn clear(&mut self) {
        self.records.clear();
        remove_record(self.storage.as_ref(), METADATA_KEY);
    }

    fn save(&self) {
        let pairs: Vec<(&String, &WalkthroughMetadata)> = self.records.iter().collect();
        save_record(self.storage.as_ref(), METADATA_KEY, &pairs);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StepProgress {
    done: bool,
}

/// Per-step completion records persisted as `{ stepId: { done } }`.
pub struct ProgressStore {
    storage: Arc<dyn StorageService>,
    records: IndexMap<String, StepProgress>,
}

impl ProgressStore {
    pub fn load(storage: Arc<dyn StorageService>) -> Self {
        let records = load_record(storage.as_ref(), PROGRESS_KEY);
        Self { storage, records }
    }

    pub fn is_done(&self, step_id: &str) -> bool {
        self.records.get(step_id).is_some_and(|progress| progress.done)
    }

    /// Sets the done flag. Not-done steps keep no record. Returns whether the value changed.
    pub fn set_done(&mut self, step_id: &str, done: bool) -> bool {
        if self.is_done(step_id) == done {
            return false;
        }
        if done {
            self.records.insert(step_id.to_string(), StepProgress { done });
        } else {
            self.records.shift_remove(step_id);
        }
        self.save();
        true
    }

    /// Step ids currently marked done.
    pub fn done_steps(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, progress)| progress.done)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        remove_record(self.storage.as_ref(), PROGRESS_KEY);
    }

    fn save(&self) {
        save_record(self.storage.as_ref(), PROGRESS_KEY, &self.records);
    }
}

/// Walkthrough ids the user dismissed, persisted as a JSON array.
pub struct HiddenWalkthroughs {
    storage: Arc<dyn StorageService>,
    ids: IndexSet<String>,
}

impl HiddenWalkthroughs {
    pub fn load(storage: Arc<dyn StorageService>) -> Self {
        let ids = load_record(storage.as_ref(), HIDDEN_KEY);
        Self { storage, ids }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn hide(&mut self, id: &str) -> bool {
        let inserted = self.ids.insert(id.to_string());
        if inserted {
            self.save();
        }
        inserted
    }

    pub fn unhide(&mut self, id: &str) -> bool {
        let removed = self.ids.shift_remove(id);
        if removed {
            self.save();
        }
        removed
    }

    pub fn ids(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        remove_record(self.storage.as_ref(), HIDDEN_KEY);
    }

    fn save(&self) {
        save_record(self.storage.as_ref(), HIDDEN_KEY, &self.ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use guidepost_util::InMemoryStorage;

    fn storage() -> Arc<dyn StorageService> {
        Arc::new(InMemoryStorage::default())
    }

    #[test]
    fn metadata_is_stored_as_id_record_pairs() {
        let storage = storage();
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let mut store = MetadataStore::load(storage.clone());
        assert!(store.ensure("setup", now, vec!["a".into()]));
        assert!(!store.ensure("setup", now, vec!["b".into()]));

        let raw = storage.get(METADATA_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            value,
            serde_json::json!([["setup", {"firstSeen": 1_700_000_000_123_i64, "manuallyOpened": false, "stepIds": ["a"]}]])
        );

        let reloaded = MetadataStore::load(storage);
        assert_eq!(reloaded.get("setup").unwrap().first_seen, now);
    }

    #[test]
    fn progress_round_trips_and_reports_changes() {
        let storage = storage();
        let mut store = ProgressStore::load(storage.clone());
        assert!(store.set_done("s1", true));
        assert!(!store.set_done("s1", true));
        assert_eq!(storage.get(PROGRESS_KEY).unwrap().unwrap(), r#"{"s1":{"done":true}}"#);

        let mut reloaded = ProgressStore::load(storage.clone());
        assert!(reloaded.is_done("s1"));
        assert!(!reloaded.is_done("s2"));

        assert!(reloaded.set_done("s1", false));
        assert_eq!(storage.get(PROGRESS_KEY).unwrap().unwrap(), "{}");
        assert!(ProgressStore::load(storage).records.is_empty());
    }

    #[test]
    fn corrupt_records_load_empty() {
        let storage = storage();
        storage.store(HIDDEN_KEY, "{ nope".into()).unwrap();
        let hidden = HiddenWalkthroughs::load(storage);
        assert!(hidden.ids().is_empty());
    }

    #[test]
    fn clear_removes_the_record() {
        let storage = storage();
        let mut hidden = HiddenWalkthroughs::load(storage.clone());
        hidden.hide("a");
        hidden.clear();
        assert!(storage.get(HIDDEN_KEY).unwrap().is_none());
    }
}
