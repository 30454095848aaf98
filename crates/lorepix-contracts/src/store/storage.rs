use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// String-keyed blob substrate. Two logical keys exist in practice: one
/// for the settings object, one for the association map. Persists across
/// reloads, not across machines.
pub trait StorageBackend {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn write(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// One file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl StorageBackend for FileStorage {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    fn write(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, value)?;
        Ok(())
    }
}

/// In-memory substrate for tests, with optional write-failure injection
/// to exercise the rollback contract (quota-exceeded stand-in).
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: BTreeMap<String, String>,
    fail_writes: bool,
    write_count: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Accepted writes so far; lets tests assert that debounced edit
    /// bursts collapse into a single flush.
    pub fn write_count(&self) -> usize {
        self.write_count
    }

    /// Seeds a key directly, bypassing failure injection.
    pub fn insert(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if self.fail_writes {
            anyhow::bail!("storage quota exceeded");
        }
        self.write_count += 1;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{FileStorage, MemoryStorage, StorageBackend};

    #[test]
    fn file_storage_round_trips_and_creates_parents() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut storage = FileStorage::new(temp.path().join("nested/state"));
        assert!(storage.read("associations")?.is_none());
        storage.write("associations", "{\"a\": 1}")?;
        assert_eq!(storage.read("associations")?.as_deref(), Some("{\"a\": 1}"));
        Ok(())
    }

    #[test]
    fn memory_storage_injected_failure_rejects_writes() {
        let mut storage = MemoryStorage::new();
        storage.write("key", "value").expect("write");
        storage.set_fail_writes(true);
        assert!(storage.write("key", "other").is_err());
        assert_eq!(
            storage.read("key").expect("read").as_deref(),
            Some("value")
        );
    }
}
