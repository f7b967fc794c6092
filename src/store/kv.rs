use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

/// Durable string key-value storage.
///
/// Implementations must make each call atomic: a reader never observes a
/// half-written value.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self.inner.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.inner.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        map.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.inner.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        map.remove(key);
        Ok(())
    }
}

/// JSON map persisted to a single file.
///
/// Writes go to a unique temp file that is renamed over the target, with
/// 0600 permissions on unix.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create storage dir {}", parent.display()))?;
        }
        Ok(Self { path, lock: Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("corrupt storage file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<()> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let json = serde_json::to_string_pretty(map)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        debug!(path = %self.path.display(), keys = map.len(), "storage file written");
        Ok(())
    }

    fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<String, String>) -> bool,
    {
        let _guard = self.lock.lock().map_err(|_| anyhow!("file store poisoned"))?;
        let mut map = self.read_map()?;
        if apply(&mut map) {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("file store poisoned"))?;
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|map| {
            map.insert(key.to_owned(), value.to_owned());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|map| map.remove(key).is_some())
    }
}
