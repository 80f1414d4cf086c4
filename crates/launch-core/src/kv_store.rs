use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};

use crate::atomic_io::write_text_atomic;

/// Trait contract for `KeyValueStore` behavior.
///
/// Values are plain strings; callers own any typed encoding on top.
pub trait KeyValueStore: Send + Sync {
    fn load_string(&self, key: &str, default: &str) -> String;
    fn save_string(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default)]
/// Process-local store used by tests and ephemeral runs.
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        lock(&self.entries).clone()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn load_string(&self, key: &str, default: &str) -> String {
        lock(&self.entries)
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn save_string(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug)]
/// JSON-object file store. Every save rewrites the file atomically.
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    /// Opens the store at `path`, treating a missing file as empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read launch state '{}'", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str::<BTreeMap<String, String>>(&raw).with_context(|| {
                    format!("failed to parse launch state '{}'", path.display())
                })?
            }
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), keys = entries.len(), "opened launch state store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let encoded =
            serde_json::to_string_pretty(entries).context("failed to encode launch state")?;
        write_text_atomic(&self.path, &format!("{encoded}\n"))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn load_string(&self, key: &str, default: &str) -> String {
        lock(&self.entries)
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn save_string(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(error) = self.persist(&entries) {
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
            return Err(error);
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
