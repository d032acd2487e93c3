//! In-memory [`Provider`]: a path-addressed object store backed by a
//! `Mutex`-guarded map, for exercising the reconciliation engine without a
//! real cloud SDK or filesystem. Content hash is the content itself —
//! sufficient for test assertions, not a production hashing scheme.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use twinsync_core::error::ProviderError;
use twinsync_core::provider::{DirInfo, Event, ObjInfo, Reader, Writer};
use twinsync_core::types::{Exists, ObjectType};
use twinsync_core::Provider;

#[derive(Clone)]
struct Object {
    otype: ObjectType,
    path: String,
    data: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Object>,
    paths: HashMap<String, String>,
    next_oid: u64,
}

pub struct MemProvider {
    name: String,
    inner: Mutex<Inner>,
}

impl MemProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn alloc_oid(inner: &mut Inner) -> String {
        inner.next_oid += 1;
        format!("{}-{}", "oid", inner.next_oid)
    }

    /// Test helper: read back a file's current bytes by path.
    pub fn read_path(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        let oid = inner.paths.get(path)?;
        inner.objects.get(oid).map(|o| o.data.clone())
    }

    /// Test helper: every currently-live path.
    pub fn live_paths(&self) -> Vec<String> {
        self.inner.lock().unwrap().paths.keys().cloned().collect()
    }
}

fn object_info(oid: &str, obj: &Object) -> ObjInfo {
    ObjInfo {
        otype: obj.otype,
        oid: oid.to_string(),
        path: Some(obj.path.clone()),
        hash: (obj.otype == ObjectType::File).then(|| obj.data.clone()),
    }
}

#[async_trait]
impl Provider for MemProvider {
    fn debug_name(&self) -> &str {
        &self.name
    }

    fn events(&self) -> BoxStream<'static, Result<Event, ProviderError>> {
        // Event ingestion is an external collaborator (spec §1 Non-goals);
        // tests drive `SyncState::update` directly instead of polling this.
        Box::pin(futures::stream::empty())
    }

    async fn walk(&self, path: &str) -> Result<Vec<Event>, ProviderError> {
        let inner = self.inner.lock().unwrap();
        let mut events = Vec::new();
        for (oid, obj) in inner.objects.iter() {
            if self.is_subpath(path, &obj.path, false).is_some() {
                events.push(Event {
                    otype: obj.otype,
                    oid: oid.clone(),
                    path: Some(obj.path.clone()),
                    hash: (obj.otype == ObjectType::File).then(|| obj.data.clone()),
                    exists: Exists::Exists,
                    mtime: None,
                    new_cursor: None,
                });
            }
        }
        Ok(events)
    }

    async fn info_path(&self, path: &str) -> Result<Option<ObjInfo>, ProviderError> {
        let inner = self.inner.lock().unwrap();
        let Some(oid) = inner.paths.get(path) else {
            return Ok(None);
        };
        Ok(inner.objects.get(oid).map(|o| object_info(oid, o)))
    }

    async fn info_oid(&self, oid: &str) -> Result<Option<ObjInfo>, ProviderError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.objects.get(oid).map(|o| object_info(oid, o)))
    }

    async fn exists_oid(&self, oid: &str) -> Result<bool, ProviderError> {
        Ok(self.inner.lock().unwrap().objects.contains_key(oid))
    }

    async fn exists_path(&self, path: &str) -> Result<bool, ProviderError> {
        Ok(self.inner.lock().unwrap().paths.contains_key(path))
    }

    async fn create(&self, path: &str, mut reader: Reader) -> Result<ObjInfo, ProviderError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;

        let mut inner = self.inner.lock().unwrap();
        if inner.paths.contains_key(path) {
            return Err(ProviderError::Exists(path.to_string()));
        }
        let oid = Self::alloc_oid(&mut inner);
        inner.objects.insert(
            oid.clone(),
            Object {
                otype: ObjectType::File,
                path: path.to_string(),
                data,
            },
        );
        inner.paths.insert(path.to_string(), oid.clone());
        Ok(object_info(&oid, inner.objects.get(&oid).unwrap()))
    }

    async fn upload(&self, oid: &str, mut reader: Reader) -> Result<ObjInfo, ProviderError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;

        let mut inner = self.inner.lock().unwrap();
        let obj = inner
            .objects
            .get_mut(oid)
            .ok_or_else(|| ProviderError::NotFound(oid.to_string()))?;
        obj.data = data;
        let obj = obj.clone();
        Ok(object_info(oid, &obj))
    }

    async fn download(&self, oid: &str, mut writer: Writer) -> Result<(), ProviderError> {
        let data = {
            let inner = self.inner.lock().unwrap();
            inner
                .objects
                .get(oid)
                .ok_or_else(|| ProviderError::NotFound(oid.to_string()))?
                .data
                .clone()
        };
        writer.write_all(&data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn rename(&self, oid: &str, new_path: &str) -> Result<String, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.paths.get(new_path).is_some_and(|existing| existing != oid) {
            return Err(ProviderError::Exists(new_path.to_string()));
        }
        let old_path = {
            let obj = inner
                .objects
                .get_mut(oid)
                .ok_or_else(|| ProviderError::NotFound(oid.to_string()))?;
            let old = obj.path.clone();
            obj.path = new_path.to_string();
            old
        };
        inner.paths.remove(&old_path);
        inner.paths.insert(new_path.to_string(), oid.to_string());
        Ok(oid.to_string())
    }

    async fn mkdir(&self, path: &str) -> Result<String, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.paths.contains_key(path) {
            return Err(ProviderError::Exists(path.to_string()));
        }
        let parent = self.dirname(path);
        if parent != self.sep().to_string() && !inner.paths.contains_key(&parent) {
            return Err(ProviderError::NotFound(parent));
        }
        let oid = Self::alloc_oid(&mut inner);
        inner.objects.insert(
            oid.clone(),
            Object {
                otype: ObjectType::Directory,
                path: path.to_string(),
                data: Vec::new(),
            },
        );
        inner.paths.insert(path.to_string(), oid.clone());
        Ok(oid)
    }

    async fn delete(&self, oid: &str) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        let obj = inner
            .objects
            .remove(oid)
            .ok_or_else(|| ProviderError::NotFound(oid.to_string()))?;
        inner.paths.remove(&obj.path);
        Ok(())
    }

    async fn listdir(&self, oid: &str) -> Result<Vec<DirInfo>, ProviderError> {
        let inner = self.inner.lock().unwrap();
        let dir_path = inner
            .objects
            .get(oid)
            .ok_or_else(|| ProviderError::NotFound(oid.to_string()))?
            .path
            .clone();

        let mut out = Vec::new();
        for (child_oid, obj) in inner.objects.iter() {
            if let Some(relative) = self.is_subpath(&dir_path, &obj.path, true) {
                let name = relative.trim_start_matches(self.sep());
                if !name.contains(self.sep()) {
                    out.push(DirInfo {
                        otype: obj.otype,
                        oid: child_oid.clone(),
                        name: name.to_string(),
                        path: Some(obj.path.clone()),
                    });
                }
            }
        }
        Ok(out)
    }
}
