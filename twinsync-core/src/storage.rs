//! The persistence ("Storage") interface: four operations over opaque
//! byte blobs keyed by tag and id (spec §6). The backend itself — a real
//! key/value durable store — is out of scope; this is a trait only.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::entry::StorageId;
use crate::error::StorageError;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn create(&self, tag: &str, blob: Vec<u8>) -> Result<StorageId, StorageError>;
    async fn update(&self, tag: &str, blob: Vec<u8>, id: StorageId) -> Result<(), StorageError>;
    async fn delete(&self, tag: &str, id: StorageId) -> Result<(), StorageError>;
    async fn read_all(&self, tag: &str) -> Result<HashMap<StorageId, Vec<u8>>, StorageError>;
}
