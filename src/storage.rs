//! Settings and saved-prayer persistence.
//!
//! A small key-value store: each key is one JSON document at
//! `<data_dir>/<key>.json`, always rewritten whole. Saved prayers are
//! upserted on (calendar day, service type, style, audience, length)
//! rather than on their id.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::prayer::{document_title, Audience, PrayerRequest, ServiceType, Style};

pub const SETTINGS_KEY: &str = "prayerSettings";
pub const PRAYERS_KEY: &str = "savedPrayers";

const DEFAULT_MODEL: &str = "gpt-4.1";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode or decode {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub fn user_message(&self) -> &'static str {
        "기도문 저장 중 오류가 발생했습니다."
    }
}

/// JSON documents keyed by name inside one directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let path = self.path(key);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StorageError::Io {
                    key: key.into(),
                    source,
                })
            }
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StorageError::Json {
                key: key.into(),
                source,
            })
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            key: key.into(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;

        let json = serde_json::to_string_pretty(value).map_err(|source| StorageError::Json {
            key: key.into(),
            source,
        })?;

        // Write-then-rename so a crash never leaves half a document behind.
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPrayer {
    pub id: String,
    /// RFC 3339 timestamp of when the prayer was saved.
    pub date: String,
    pub service_type: ServiceType,
    pub style: Style,
    pub audience: Audience,
    pub length: u8,
    pub content: String,
}

impl SavedPrayer {
    pub fn new(request: &PrayerRequest, content: impl Into<String>) -> Self {
        Self::at(Utc::now(), request, content)
    }

    pub fn at(now: DateTime<Utc>, request: &PrayerRequest, content: impl Into<String>) -> Self {
        Self {
            id: now.timestamp_millis().to_string(),
            date: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            service_type: request.service_type,
            style: request.style,
            audience: request.audience,
            length: request.length(),
            content: content.into(),
        }
    }

    /// Local calendar day of `date`, e.g. `2024-03-10`.
    pub fn day(&self) -> String {
        match DateTime::parse_from_rfc3339(&self.date) {
            Ok(dt) => dt.with_timezone(&Local).format("%Y-%m-%d").to_string(),
            Err(_) => self.date.chars().take(10).collect(),
        }
    }

    pub fn title(&self) -> String {
        document_title(
            &self.day(),
            self.service_type,
            self.style,
            self.audience,
            self.length,
        )
    }

    fn same_slot(&self, other: &SavedPrayer) -> bool {
        self.service_type == other.service_type
            && self.style == other.style
            && self.audience == other.audience
            && self.length == other.length
            && self.day() == other.day()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted { id: String },
    Updated { id: String },
}

pub fn find_match<'a>(prayers: &'a [SavedPrayer], prayer: &SavedPrayer) -> Option<&'a SavedPrayer> {
    prayers.iter().find(|p| p.same_slot(prayer))
}

/// Overwrite the content of the record in the same slot, or append.
pub fn upsert(prayers: &mut Vec<SavedPrayer>, mut prayer: SavedPrayer) -> SaveOutcome {
    if let Some(existing) = prayers.iter_mut().find(|p| p.same_slot(&prayer)) {
        existing.content = prayer.content;
        return SaveOutcome::Updated {
            id: existing.id.clone(),
        };
    }

    // Two saves within the same millisecond would otherwise share an id.
    while prayers.iter().any(|p| p.id == prayer.id) {
        prayer.id = match prayer.id.parse::<i64>() {
            Ok(n) => (n + 1).to_string(),
            Err(_) => format!("{}-1", prayer.id),
        };
    }
    let id = prayer.id.clone();
    prayers.push(prayer);
    SaveOutcome::Inserted { id }
}

/// Saved prayers and settings on top of a `JsonStore`.
#[derive(Debug, Clone)]
pub struct PrayerStore {
    store: JsonStore,
}

impl PrayerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(dir),
        }
    }

    pub fn dir(&self) -> &Path {
        self.store.dir()
    }

    /// Stored settings, or defaults when missing or unreadable.
    pub fn load_settings(&self) -> Settings {
        match self.store.get(SETTINGS_KEY) {
            Ok(Some(settings)) => settings,
            Ok(None) => Settings::default(),
            Err(e) => {
                warn!("Failed to load settings: {e}");
                Settings::default()
            }
        }
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        self.store.set(SETTINGS_KEY, settings)?;
        info!("Settings saved (model: {})", settings.model);
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<SavedPrayer>, StorageError> {
        Ok(self.store.get(PRAYERS_KEY)?.unwrap_or_default())
    }

    /// Newest first, for display.
    pub fn load_sorted(&self) -> Result<Vec<SavedPrayer>, StorageError> {
        let mut prayers = self.load()?;
        prayers.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(prayers)
    }

    pub fn get(&self, id: &str) -> Result<Option<SavedPrayer>, StorageError> {
        Ok(self.load()?.into_iter().find(|p| p.id == id))
    }

    pub fn find_match(&self, prayer: &SavedPrayer) -> Result<Option<SavedPrayer>, StorageError> {
        Ok(find_match(&self.load()?, prayer).cloned())
    }

    pub fn save(&self, prayer: SavedPrayer) -> Result<SaveOutcome, StorageError> {
        let mut prayers = self.load()?;
        let outcome = upsert(&mut prayers, prayer);
        self.store.set(PRAYERS_KEY, &prayers)?;
        debug!("Saved prayer: {outcome:?}");
        Ok(outcome)
    }

    /// Remove the prayer with `id`. Returns whether anything was removed.
    pub fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let mut prayers = self.load()?;
        let before = prayers.len();
        prayers.retain(|p| p.id != id);
        if prayers.len() == before {
            debug!("No prayer with id {id}");
            return Ok(false);
        }
        self.store.set(PRAYERS_KEY, &prayers)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(length: u8) -> PrayerRequest {
        PrayerRequest::new(ServiceType::Sunday, Style::Traditional, Audience::Believer, length, "gpt-4.1")
            .unwrap()
    }

    fn noon(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn store() -> (tempfile::TempDir, PrayerStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PrayerStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_settings_default_and_roundtrip() {
        let (_dir, store) = store();
        assert_eq!(store.load_settings(), Settings::default());
        assert_eq!(store.load_settings().model, "gpt-4.1");

        let settings = Settings {
            api_key: "sk-test".into(),
            model: "gpt-4o".into(),
        };
        store.save_settings(&settings).unwrap();
        assert_eq!(store.load_settings(), settings);

        let raw = fs::read_to_string(store.dir().join("prayerSettings.json")).unwrap();
        assert!(raw.contains("\"apiKey\""));
    }

    #[test]
    fn test_corrupt_settings_fall_back_to_default() {
        let (_dir, store) = store();
        fs::write(store.dir().join("prayerSettings.json"), "{not json").unwrap();
        assert_eq!(store.load_settings(), Settings::default());
    }

    #[test]
    fn test_same_slot_merges_and_keeps_id() {
        let (_dir, store) = store();
        let first = SavedPrayer::at(noon(10), &request(4), "첫 번째 기도");
        let first_id = first.id.clone();
        assert_eq!(
            store.save(first).unwrap(),
            SaveOutcome::Inserted { id: first_id.clone() }
        );

        let later = noon(10) + chrono::Duration::minutes(5);
        let second = SavedPrayer::at(later, &request(4), "고친 기도");
        assert_eq!(
            store.save(second).unwrap(),
            SaveOutcome::Updated { id: first_id.clone() }
        );

        let prayers = store.load().unwrap();
        assert_eq!(prayers.len(), 1);
        assert_eq!(prayers[0].id, first_id);
        assert_eq!(prayers[0].content, "고친 기도");
        assert_eq!(prayers[0].date, noon(10).to_rfc3339_opts(SecondsFormat::Millis, true));
    }

    #[test]
    fn test_different_length_not_merged() {
        let (_dir, store) = store();
        store.save(SavedPrayer::at(noon(10), &request(3), "삼분")).unwrap();
        let outcome = store
            .save(SavedPrayer::at(noon(10), &request(4), "사분"))
            .unwrap();
        assert!(matches!(outcome, SaveOutcome::Inserted { .. }));

        let prayers = store.load().unwrap();
        assert_eq!(prayers.len(), 2);
        assert_ne!(prayers[0].id, prayers[1].id);
        assert_eq!(prayers[0].content, "삼분");
    }

    #[test]
    fn test_different_day_not_merged() {
        let (_dir, store) = store();
        store.save(SavedPrayer::at(noon(10), &request(4), "a")).unwrap();
        store.save(SavedPrayer::at(noon(12), &request(4), "b")).unwrap();
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn test_delete() {
        let (_dir, store) = store();
        store.save(SavedPrayer::at(noon(10), &request(3), "a")).unwrap();
        store.save(SavedPrayer::at(noon(11), &request(3), "b")).unwrap();

        assert!(!store.delete("missing").unwrap());
        assert_eq!(store.load().unwrap().len(), 2);

        let id = noon(10).timestamp_millis().to_string();
        assert!(store.delete(&id).unwrap());
        let remaining = store.load().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "b");
    }

    #[test]
    fn test_load_sorted_newest_first() {
        let (_dir, store) = store();
        store.save(SavedPrayer::at(noon(10), &request(3), "old")).unwrap();
        store.save(SavedPrayer::at(noon(14), &request(3), "new")).unwrap();
        store.save(SavedPrayer::at(noon(12), &request(3), "mid")).unwrap();
        let contents: Vec<_> = store
            .load_sorted()
            .unwrap()
            .into_iter()
            .map(|p| p.content)
            .collect();
        assert_eq!(contents, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_upsert_assigns_fresh_id_on_collision() {
        let mut prayers = vec![SavedPrayer::at(noon(10), &request(3), "a")];
        let clash = SavedPrayer::at(noon(10), &request(5), "b");
        let outcome = upsert(&mut prayers, clash);
        let expected = (noon(10).timestamp_millis() + 1).to_string();
        assert_eq!(outcome, SaveOutcome::Inserted { id: expected });
        assert_eq!(prayers.len(), 2);
    }

    #[test]
    fn test_stored_format_uses_slot_keys() {
        let (_dir, store) = store();
        store.save(SavedPrayer::at(noon(10), &request(3), "a")).unwrap();
        let raw = fs::read_to_string(store.dir().join("savedPrayers.json")).unwrap();
        assert!(raw.contains("\"serviceType\": \"sunday\""));
        assert!(raw.contains("\"length\": 3"));
        assert!(raw.contains("\"date\": \"2024-03-10T12:00:00.000Z\""));
    }

    #[test]
    fn test_find_match_and_get() {
        let (_dir, store) = store();
        let saved = SavedPrayer::at(noon(10), &request(3), "a");
        let id = saved.id.clone();
        store.save(saved.clone()).unwrap();

        let probe = SavedPrayer::at(noon(10), &request(3), "other");
        assert_eq!(store.find_match(&probe).unwrap().unwrap().id, id);
        assert_eq!(store.get(&id).unwrap().unwrap().content, "a");
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_day_fallback_for_unparseable_date() {
        let mut prayer = SavedPrayer::at(noon(10), &request(3), "a");
        prayer.date = "2024-03-10 garbage".into();
        assert_eq!(prayer.day(), "2024-03-10");
    }
}
