//! Persisted mirror of the current-household selection. Survives process
//! restarts the way the original survived page reloads; always advisory,
//! never authoritative.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::household::CurrentHousehold;

pub const CURRENT_HOUSEHOLD_KEY: &str = "currentHousehold";

trait MirrorStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
    fn save(&self) -> anyhow::Result<()>;
}

#[derive(Default)]
struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MirrorStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data
            .lock()
            .map(|guard| guard.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut guard) = self.data.lock() {
            guard.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut guard) = self.data.lock() {
            guard.remove(key);
        }
    }

    fn save(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct FileStore {
    path: PathBuf,
    data: Mutex<HashMap<String, String>>,
}

impl FileStore {
    fn open(path: PathBuf) -> anyhow::Result<Self> {
        let data = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }
}

impl MirrorStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data
            .lock()
            .map(|guard| guard.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut guard) = self.data.lock() {
            guard.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut guard) = self.data.lock() {
            guard.remove(key);
        }
    }

    // Write-then-rename so a crash never leaves a torn mirror on disk.
    fn save(&self) -> anyhow::Result<()> {
        let snapshot = self
            .data
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn MirrorStore>,
}

impl StoreHandle {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(MemoryStore::default()),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self {
            inner: Arc::new(FileStore::open(path.into())?),
        })
    }

    pub fn snapshot(&self) -> Option<CurrentHousehold> {
        let raw = self.inner.get(CURRENT_HOUSEHOLD_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(current) => Some(current),
            Err(err) => {
                warn!(
                    target: "messmate",
                    event = "mirror_snapshot_unreadable",
                    error = %err
                );
                None
            }
        }
    }

    pub(crate) fn write(&self, current: &CurrentHousehold) {
        match serde_json::to_string(current) {
            Ok(raw) => {
                self.inner.set(CURRENT_HOUSEHOLD_KEY, &raw);
                if let Err(err) = self.inner.save() {
                    warn!(
                        target: "messmate",
                        event = "mirror_save_failed",
                        error = %err
                    );
                }
            }
            Err(err) => {
                warn!(
                    target: "messmate",
                    event = "mirror_serialize_failed",
                    error = %err
                );
            }
        }
    }

    pub(crate) fn clear(&self) {
        self.inner.remove(CURRENT_HOUSEHOLD_KEY);
        if let Err(err) = self.inner.save() {
            warn!(
                target: "messmate",
                event = "mirror_clear_save_failed",
                error = %err
            );
        }
    }
}
