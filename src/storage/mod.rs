//! Persistent key-value storage for submission counters
//!
//! Stores data in:
//! - Linux: ~/.local/share/contact-form/
//! - macOS: ~/Library/Application Support/contact-form/
//! - Windows: %APPDATA%/contact-form/
//!
//! `CONTACT_FORM_DATA_DIR` overrides the location.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

const STORE_FILE: &str = "counters.json";

/// Every entry in a store, keyed by name.
pub type Entries = BTreeMap<String, String>;

/// String key-value store with the semantics of browser local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Read-modify-write over all entries as one step. If `change` fails,
    /// or the result cannot be saved, the store is left as it was.
    fn update(&self, change: &mut dyn FnMut(&mut Entries) -> Result<()>) -> Result<()>;
}

/// File-backed store: one JSON object per data directory.
pub struct LocalStorage {
    data_dir: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl LocalStorage {
    /// Initialize local storage, creating directories if needed
    pub fn new() -> Result<Self> {
        let data_dir = match std::env::var("CONTACT_FORM_DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
            _ => ProjectDirs::from("com", "contactform", "contact-form")
                .context("Could not determine project directories")?
                .data_dir()
                .to_path_buf(),
        };
        Self::at(data_dir)
    }

    pub fn at(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Self {
            data_dir,
            lock: Mutex::new(()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }

    fn read_all(&self) -> Result<Entries> {
        let path = self.store_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Entries::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read store at {}", path.display()))
            }
        };

        if content.trim().is_empty() {
            return Ok(Entries::new());
        }

        match serde_json::from_str(&content) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                // Keep the damaged file around for inspection and start fresh.
                tracing::warn!(path = %path.display(), error = %err, "counter store is corrupt; quarantining");
                let _ = fs::rename(&path, path.with_extension("invalid"));
                Ok(Entries::new())
            }
        }
    }

    fn write_all(&self, entries: &Entries) -> Result<()> {
        let path = self.store_path();
        let json =
            serde_json::to_string_pretty(entries).context("Failed to serialize counter store")?;

        // Write to a sibling temp file and rename so readers never see a partial file.
        let tmp_path = self
            .data_dir
            .join(format!(".{STORE_FILE}.{}.tmp", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        file.sync_all().ok();
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err).with_context(|| format!("Failed to replace {}", path.display()));
        }

        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for LocalStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.guard();
        Ok(self.read_all()?.remove(key))
    }

    fn update(&self, change: &mut dyn FnMut(&mut Entries) -> Result<()>) -> Result<()> {
        let _guard = self.guard();
        let mut entries = self.read_all()?;
        let before = entries.clone();
        change(&mut entries)?;
        if entries != before {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// In-process store; nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn update(&self, change: &mut dyn FnMut(&mut Entries) -> Result<()>) -> Result<()> {
        let mut entries = self.entries();
        let mut staged = entries.clone();
        change(&mut staged)?;
        *entries = staged;
        Ok(())
    }
}

pub fn init_storage() -> Result<LocalStorage> {
    LocalStorage::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn put(store: &impl KeyValueStore, key: &str, value: &str) {
        store
            .update(&mut |entries| {
                entries.insert(key.to_string(), value.to_string());
                Ok(())
            })
            .unwrap();
    }

    fn keys(store: &impl KeyValueStore) -> Vec<String> {
        let mut keys = Vec::new();
        store
            .update(&mut |entries| {
                keys = entries.keys().cloned().collect();
                Ok(())
            })
            .unwrap();
        keys
    }

    #[test]
    fn test_update_and_get_roundtrip_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::at(temp_dir.path()).unwrap();

        assert_eq!(storage.get("formSubmissionsTotal").unwrap(), None);
        put(&storage, "formSubmissionsTotal", "3");
        put(&storage, "formSubmissions_2024-03-09", "1");

        let reopened = LocalStorage::at(temp_dir.path()).unwrap();
        assert_eq!(
            reopened.get("formSubmissionsTotal").unwrap().as_deref(),
            Some("3")
        );
        assert_eq!(keys(&reopened).len(), 2);

        reopened
            .update(&mut |entries| {
                entries.remove("formSubmissionsTotal");
                Ok(())
            })
            .unwrap();
        assert_eq!(storage.get("formSubmissionsTotal").unwrap(), None);
        assert_eq!(keys(&storage), vec!["formSubmissions_2024-03-09".to_string()]);
    }

    #[test]
    fn test_failed_update_changes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::at(temp_dir.path()).unwrap();
        let memory = MemoryStore::new();
        put(&storage, "a", "1");
        put(&memory, "a", "1");

        for store in [&storage as &dyn KeyValueStore, &memory] {
            let result = store.update(&mut |entries| {
                entries.insert("a".to_string(), "2".to_string());
                entries.insert("b".to_string(), "1".to_string());
                anyhow::bail!("second write refused")
            });
            assert!(result.is_err());
            assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
            assert_eq!(store.get("b").unwrap(), None);
        }
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::at(temp_dir.path()).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        storage
                            .update(&mut |entries| {
                                let next = entries
                                    .get("n")
                                    .and_then(|v| v.parse::<u64>().ok())
                                    .unwrap_or(0)
                                    + 1;
                                entries.insert("n".to_string(), next.to_string());
                                Ok(())
                            })
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(storage.get("n").unwrap().as_deref(), Some("40"));
    }

    #[test]
    fn test_corrupt_store_is_quarantined() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::at(temp_dir.path()).unwrap();
        fs::write(storage.data_dir().join(STORE_FILE), "{not json").unwrap();

        assert_eq!(storage.get("formSubmissionsTotal").unwrap(), None);
        assert!(storage.data_dir().join("counters.invalid").exists());

        put(&storage, "formSubmissionsTotal", "1");
        assert_eq!(
            storage.get("formSubmissionsTotal").unwrap().as_deref(),
            Some("1")
        );
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::at(temp_dir.path()).unwrap();
        put(&storage, "a", "1");
        put(&storage, "b", "2");

        let leftovers = fs::read_dir(storage.data_dir())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        put(&store, "k", "v");
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store
            .update(&mut |entries| {
                entries.clear();
                Ok(())
            })
            .unwrap();
        assert!(keys(&store).is_empty());
    }
}
