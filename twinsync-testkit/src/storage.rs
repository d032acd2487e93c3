//! In-memory [`Storage`] backend: a tagged map of persistence rows, no
//! durability. Exists purely so tests can exercise `SyncState` rehydration
//! without a real key/value store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use twinsync_core::error::StorageError;
use twinsync_core::Storage;

type StorageId = i64;

#[derive(Default)]
pub struct MemStorage {
    rows: Mutex<HashMap<String, HashMap<StorageId, Vec<u8>>>>,
    next_id: Mutex<StorageId>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn create(&self, tag: &str, blob: Vec<u8>) -> Result<StorageId, StorageError> {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let id = *next;
        self.rows
            .lock()
            .unwrap()
            .entry(tag.to_string())
            .or_default()
            .insert(id, blob);
        Ok(id)
    }

    async fn update(&self, tag: &str, blob: Vec<u8>, id: StorageId) -> Result<(), StorageError> {
        let mut rows = self.rows.lock().unwrap();
        let bucket = rows.entry(tag.to_string()).or_default();
        if !bucket.contains_key(&id) {
            return Err(StorageError::UnknownId(id.to_string()));
        }
        bucket.insert(id, blob);
        Ok(())
    }

    async fn delete(&self, tag: &str, id: StorageId) -> Result<(), StorageError> {
        if let Some(bucket) = self.rows.lock().unwrap().get_mut(tag) {
            bucket.remove(&id);
        }
        Ok(())
    }

    async fn read_all(&self, tag: &str) -> Result<HashMap<StorageId, Vec<u8>>, StorageError> {
        Ok(self.rows.lock().unwrap().get(tag).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_read_all_round_trips() {
        let storage = MemStorage::new();
        let id = storage.create("pair", vec![1, 2, 3]).await.unwrap();
        let all = storage.read_all("pair").await.unwrap();
        assert_eq!(all.get(&id), Some(&vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let storage = MemStorage::new();
        let id = storage.create("pair", vec![1]).await.unwrap();
        storage.delete("pair", id).await.unwrap();
        storage.delete("pair", id).await.unwrap();
        assert!(storage.read_all("pair").await.unwrap().is_empty());
    }
}
