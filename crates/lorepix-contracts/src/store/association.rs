use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::errors::StoreError;

use super::records::ImageRecord;
use super::storage::StorageBackend;

/// Side-table of entry id → attached images, flushed to the durable
/// substrate on every mutation. Orphaned rows (the host entry is gone)
/// are kept until explicitly cleared; the host list and this table are
/// reconciled only by identity resolution, never by garbage collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssociationStore {
    storage_key: String,
    records: IndexMap<String, Vec<ImageRecord>>,
}

impl AssociationStore {
    pub fn new(storage_key: impl Into<String>) -> Self {
        Self {
            storage_key: storage_key.into(),
            records: IndexMap::new(),
        }
    }

    /// Startup load. A corrupt blob resets to an empty store and reports
    /// the problem; malformed rows inside a parseable blob are skipped.
    /// Either way the extension keeps running.
    pub fn load(storage: &dyn StorageBackend, key: &str) -> (Self, Option<StoreError>) {
        let mut store = Self::new(key);
        let raw = match storage.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return (store, None),
            Err(err) => return (store, Some(StoreError::Load(format!("{err:#}")))),
        };
        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => return (store, Some(StoreError::Load(err.to_string()))),
        };
        let Some(object) = parsed.as_object() else {
            return (
                store,
                Some(StoreError::Load("expected a JSON object".to_string())),
            );
        };
        for (id, value) in object {
            let records = match value {
                Value::Array(items) => items
                    .iter()
                    .filter_map(ImageRecord::from_value)
                    .collect::<Vec<ImageRecord>>(),
                other => ImageRecord::from_value(other).into_iter().collect(),
            };
            if !records.is_empty() {
                store.records.insert(id.clone(), records);
            }
        }
        (store, None)
    }

    pub fn get(&self, id: &str) -> Option<&[ImageRecord]> {
        self.records.get(id).map(Vec::as_slice)
    }

    pub fn first(&self, id: &str) -> Option<&ImageRecord> {
        self.records.get(id).and_then(|records| records.first())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replaces the whole sequence for `id` with a single record.
    pub fn set(
        &mut self,
        storage: &mut dyn StorageBackend,
        id: &str,
        record: ImageRecord,
    ) -> Result<(), StoreError> {
        let previous = self.records.insert(id.to_string(), vec![record]);
        self.flush_or_rollback(storage, id, previous)
    }

    /// Gallery append: keeps existing records for `id` and adds one more.
    pub fn push(
        &mut self,
        storage: &mut dyn StorageBackend,
        id: &str,
        record: ImageRecord,
    ) -> Result<(), StoreError> {
        let previous = self.records.get(id).cloned();
        self.records.entry(id.to_string()).or_default().push(record);
        self.flush_or_rollback(storage, id, previous)
    }

    /// Deletes every record for `id`. No-op (and no flush) when absent.
    pub fn remove(&mut self, storage: &mut dyn StorageBackend, id: &str) -> Result<bool, StoreError> {
        let Some(previous) = self.records.shift_remove(id) else {
            return Ok(false);
        };
        self.flush_or_rollback(storage, id, Some(previous))?;
        Ok(true)
    }

    /// Deletes one record of a gallery by its record id; dropping the last
    /// record drops the entry key entirely.
    pub fn remove_image(
        &mut self,
        storage: &mut dyn StorageBackend,
        id: &str,
        image_id: &str,
    ) -> Result<bool, StoreError> {
        let Some(existing) = self.records.get(id) else {
            return Ok(false);
        };
        let filtered = existing
            .iter()
            .filter(|record| record.id.as_deref() != Some(image_id))
            .cloned()
            .collect::<Vec<ImageRecord>>();
        if filtered.len() == existing.len() {
            return Ok(false);
        }
        let previous = if filtered.is_empty() {
            self.records.shift_remove(id)
        } else {
            self.records.insert(id.to_string(), filtered)
        };
        self.flush_or_rollback(storage, id, previous)?;
        Ok(true)
    }

    pub fn clear(&mut self, storage: &mut dyn StorageBackend) -> Result<(), StoreError> {
        let previous = std::mem::take(&mut self.records);
        if let Err(err) = self.flush(storage) {
            self.records = previous;
            return Err(err);
        }
        Ok(())
    }

    fn flush_or_rollback(
        &mut self,
        storage: &mut dyn StorageBackend,
        id: &str,
        previous: Option<Vec<ImageRecord>>,
    ) -> Result<(), StoreError> {
        match self.flush(storage) {
            Ok(()) => Ok(()),
            Err(err) => {
                match previous {
                    Some(records) => {
                        self.records.insert(id.to_string(), records);
                    }
                    None => {
                        self.records.shift_remove(id);
                    }
                }
                Err(err)
            }
        }
    }

    fn flush(&self, storage: &mut dyn StorageBackend) -> Result<(), StoreError> {
        let mut payload = Map::new();
        for (id, records) in &self.records {
            let value = match records.as_slice() {
                [single] => single.to_value(),
                many => Value::Array(many.iter().map(ImageRecord::to_value).collect()),
            };
            payload.insert(id.clone(), value);
        }
        let raw = serde_json::to_string_pretty(&Value::Object(payload))
            .map_err(|err| StoreError::Persistence(err.to_string()))?;
        storage
            .write(&self.storage_key, &raw)
            .map_err(|err| StoreError::Persistence(format!("{err:#}")))
    }
}
