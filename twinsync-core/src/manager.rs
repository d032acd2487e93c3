//! The reconciliation loop: pops one changed entry per tick, refreshes its
//! live state, classifies the change, and issues compensating operations on
//! the other side (spec §4.4).

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{ProviderError, SyncError};
use crate::provider::Provider;
use crate::state::{EntryId, SyncState};
use crate::translate::Translator;
use crate::types::{Exists, ObjectType, Side};

/// Outcome of processing one changed side of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmbraceResult {
    Finished,
    Requeue,
}

pub struct SyncManager {
    providers: [Arc<dyn Provider>; 2],
    translator: Arc<dyn Translator>,
    state: SyncState,
    temp_dir: PathBuf,
}

impl SyncManager {
    pub fn new(
        providers: [Arc<dyn Provider>; 2],
        translator: Arc<dyn Translator>,
        state: SyncState,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            providers,
            translator,
            state,
            temp_dir,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SyncState {
        &mut self.state
    }

    pub fn temp_dir(&self) -> &std::path::Path {
        &self.temp_dir
    }

    fn provider(&self, side: Side) -> &dyn Provider {
        self.providers[side.index()].as_ref()
    }

    /// One reconciliation tick (spec §4.4). A no-op when nothing is queued.
    pub async fn do_tick(&mut self) -> Result<(), SyncError> {
        let Some(id) = self.state.change() else {
            return Ok(());
        };

        let refs: [&dyn Provider; 2] = [self.provider(Side::Local), self.provider(Side::Remote)];
        if let Some(entry) = self.state.get_mut(id) {
            entry.get_latest_state(&refs).await;
            tracing::debug!(entry = id, state = %entry.pretty(), "dequeued changed entry");
        } else {
            return Ok(());
        }

        let (hash_conflict, path_conflict) = {
            let entry = self.state.get(id).expect("entry just refreshed");
            (entry.hash_conflict(), entry.path_conflict())
        };

        if hash_conflict {
            self.handle_hash_conflict(id).await?;
            return Ok(());
        }
        if path_conflict {
            self.handle_path_conflict(id).await?;
            return Ok(());
        }

        for side in Side::ALL {
            let changed = self
                .state
                .get(id)
                .map(|e| e.side(side).changed.is_some())
                .unwrap_or(false);
            if !changed {
                continue;
            }
            let result = self.embrace_change(id, side, side.other()).await?;
            if result == EmbraceResult::Finished {
                if let Some(entry) = self.state.get_mut(id) {
                    entry.side_mut(side).changed = None;
                }
                self.state.finished(id);
            }
            break;
        }

        self.state.storage_update(id).await?;
        Ok(())
    }

    async fn embrace_change(&mut self, id: EntryId, changed: Side, synced: Side) -> Result<EmbraceResult, SyncError> {
        let (exists, path, sync_path, hash, sync_hash, otype) = {
            let e = self.state.get(id).expect("entry exists");
            (
                e.side(changed).exists,
                e.side(changed).path.clone(),
                e.side(changed).sync_path.clone(),
                e.side(changed).hash.clone(),
                e.side(changed).sync_hash.clone(),
                e.otype,
            )
        };

        if exists == Exists::Trashed {
            return self.embrace_deletion(id, changed, synced, path).await;
        }

        let is_path_change = path != sync_path;
        let is_creation = sync_path.is_none();
        if is_path_change || is_creation {
            return self.handle_path_change_or_creation(id, changed, synced).await;
        }

        if otype == ObjectType::File && hash != sync_hash {
            let synced_oid = self.state.get(id).unwrap().side(synced).oid.clone();
            let Some(synced_oid) = synced_oid else {
                return Err(SyncError::Invariant(format!(
                    "content-only change on entry {id} with no oid on synced side"
                )));
            };
            let Some(temp) = self.download_changed(id, changed).await? else {
                return Ok(EmbraceResult::Finished);
            };
            self.upload_to_oid(synced, &synced_oid, &temp).await?;
            tokio::fs::remove_file(&temp).await.ok();

            if let Some(e) = self.state.get_mut(id) {
                let hash_val = e.side(changed).hash.clone();
                let changed_path_val = e.side(changed).path.clone();
                let synced_path_val = e.side(synced).path.clone();
                e.side_mut(changed).sync_hash = hash_val.clone();
                e.side_mut(synced).sync_hash = hash_val;
                e.side_mut(changed).sync_path = changed_path_val;
                // Each side's sync_path tracks its own path, never the other
                // side's — otherwise a later event on `synced` spuriously
                // looks like a path change against `changed`'s path.
                e.side_mut(synced).sync_path = synced_path_val;
            }
            return Ok(EmbraceResult::Finished);
        }

        // No effective change: a spurious `changed` flag.
        Ok(EmbraceResult::Finished)
    }

    async fn embrace_deletion(
        &mut self,
        id: EntryId,
        changed: Side,
        synced: Side,
        path: Option<String>,
    ) -> Result<EmbraceResult, SyncError> {
        let others: Vec<EntryId> = match &path {
            Some(path) => self
                .state
                .lookup_path(changed, path)
                .into_iter()
                .filter(|other| *other != id)
                .collect(),
            None => Vec::new(),
        };

        if others.is_empty() {
            let synced_oid = self.state.get(id).unwrap().side(synced).oid.clone();
            if let Some(oid) = synced_oid {
                match self.provider(synced).delete(&oid).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            if let Some(e) = self.state.get_mut(id) {
                e.side_mut(synced).exists = Exists::Trashed;
            }
        } else {
            let creation_pending = others
                .iter()
                .any(|other_id| self.state.get(*other_id).map(|e| e.is_creation(changed)).unwrap_or(false));
            if creation_pending {
                tracing::debug!(entry = id, "deletion superseded by a pending creation at the same path");
            } else {
                tracing::warn!(entry = id, "deletion conflicts with an untracked entry at the same path");
            }
            if let Some(e) = self.state.get_mut(id) {
                e.discard();
            }
        }

        Ok(EmbraceResult::Finished)
    }

    async fn handle_path_change_or_creation(
        &mut self,
        id: EntryId,
        changed: Side,
        synced: Side,
    ) -> Result<EmbraceResult, SyncError> {
        let mut path = self.state.get(id).unwrap().side(changed).path.clone();
        if path.is_none() {
            let oid = self.state.get(id).unwrap().side(changed).oid.clone();
            let Some(oid) = oid else {
                return Err(SyncError::Invariant(format!("entry {id} changed with no oid on side {changed:?}")));
            };
            match self.provider(changed).info_oid(&oid).await? {
                None => {
                    if let Some(e) = self.state.get_mut(id) {
                        e.side_mut(changed).exists = Exists::Trashed;
                    }
                    return Ok(EmbraceResult::Requeue);
                }
                Some(info) => {
                    let Some(info_path) = info.path else {
                        return Err(SyncError::Invariant(format!(
                            "provider info_oid returned no path for {oid}"
                        )));
                    };
                    path = Some(info_path.clone());
                    if let Some(e) = self.state.get_mut(id) {
                        e.side_mut(changed).path = Some(info_path);
                    }
                }
            }
        }
        let path = path.expect("resolved above");

        let Some(translated) = self.translator.translate(synced, &path) else {
            return Ok(EmbraceResult::Finished);
        };

        let is_creation = self.state.get(id).unwrap().is_creation(changed);
        if is_creation {
            if self.check_disjoint_create(id, changed, synced, &translated).await? {
                return Ok(EmbraceResult::Requeue);
            }

            let otype = self.state.get(id).unwrap().otype;
            if otype == ObjectType::Directory {
                self.mkdir_synced(id, changed, synced, &translated).await
            } else {
                let Some(temp) = self.download_changed(id, changed).await? else {
                    return Ok(EmbraceResult::Finished);
                };
                let synced_oid = self.state.get(id).unwrap().side(synced).oid.clone();
                let result = if let Some(oid) = synced_oid {
                    self.upload_to_oid(synced, &oid, &temp).await?;
                    self.state.update_entry(id, synced, None, Some(&translated), None, None);
                    if let Some(e) = self.state.get_mut(id) {
                        let changed_path_val = e.side(changed).path.clone();
                        let hash_val = e.side(changed).hash.clone();
                        e.side_mut(synced).sync_path = Some(translated.clone());
                        e.side_mut(changed).sync_path = changed_path_val;
                        e.side_mut(synced).sync_hash = hash_val.clone();
                        e.side_mut(changed).sync_hash = hash_val;
                    }
                    EmbraceResult::Finished
                } else {
                    self.create_synced(id, changed, synced, &translated, &temp).await?
                };
                tokio::fs::remove_file(&temp).await.ok();
                Ok(result)
            }
        } else {
            let synced_oid = self.state.get(id).unwrap().side(synced).oid.clone();
            let Some(oid) = synced_oid else {
                return Err(SyncError::Invariant(format!(
                    "rename on entry {id} with no oid on synced side {synced:?}"
                )));
            };
            let new_oid = self.provider(synced).rename(&oid, &translated).await?;
            self.state.update_entry(id, synced, Some(&new_oid), Some(&translated), None, None);
            if let Some(e) = self.state.get_mut(id) {
                e.side_mut(synced).sync_path = Some(translated.clone());
                let changed_path = e.side(changed).path.clone();
                e.side_mut(changed).sync_path = changed_path;
            }
            Ok(EmbraceResult::Finished)
        }
    }

    /// Looks for another non-trashed entry already claiming the translated
    /// path on the synced side. Returns `true` (meaning REQUEUE) if a
    /// split-conflict was issued.
    async fn check_disjoint_create(
        &mut self,
        id: EntryId,
        changed: Side,
        synced: Side,
        translated_path: &str,
    ) -> Result<bool, SyncError> {
        let others: Vec<EntryId> = self
            .state
            .lookup_path(synced, translated_path)
            .into_iter()
            .filter(|other| *other != id)
            .filter(|other| {
                self.state
                    .get(*other)
                    .map(|e| e.side(synced).exists != Exists::Trashed)
                    .unwrap_or(false)
            })
            .collect();

        if let Some(&defer_id) = others.first() {
            self.handle_split_conflict(defer_id, synced, id, changed).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Idempotent recursive directory create: builds every ancestor path
    /// from the root down, tolerating `Exists` at each step.
    async fn mkdirs(&self, side: Side, path: &str) -> Result<String, ProviderError> {
        let provider = self.provider(side);
        let normalized = provider.normalize_path(path);
        let sep = provider.sep().to_string();
        if normalized == sep {
            return Err(ProviderError::Programming("refusing to mkdir the root".into()));
        }
        let trimmed = normalized.trim_start_matches(provider.sep());
        let parts: Vec<&str> = trimmed.split(provider.sep()).filter(|p| !p.is_empty()).collect();

        let mut oid = None;
        for i in 1..=parts.len() {
            let prefix = provider.join(&parts[..i]);
            oid = Some(match provider.mkdir(&prefix).await {
                Ok(oid) => oid,
                Err(e) if e.is_exists() => match provider.info_path(&prefix).await? {
                    Some(info) => info.oid,
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            });
        }
        Ok(oid.expect("parts is non-empty, checked above"))
    }

    async fn mkdir_synced(
        &mut self,
        id: EntryId,
        changed: Side,
        synced: Side,
        translated_path: &str,
    ) -> Result<EmbraceResult, SyncError> {
        let path = self.state.get(id).unwrap().side(changed).path.clone();
        let dupes: Vec<EntryId> = match &path {
            Some(path) => self
                .state
                .lookup_path(changed, path)
                .into_iter()
                .filter(|other| *other != id)
                .filter(|other| {
                    self.state.get(*other).map(|e| e.otype == ObjectType::Directory).unwrap_or(false)
                })
                .collect(),
            None => Vec::new(),
        };
        for dupe in dupes {
            if let Some(e) = self.state.get_mut(dupe) {
                e.discard();
            }
        }

        let oid = self.mkdirs(synced, translated_path).await?;
        self.state.update_entry(id, synced, Some(&oid), Some(translated_path), None, None);
        if let Some(e) = self.state.get_mut(id) {
            e.side_mut(synced).sync_path = Some(translated_path.to_string());
            let changed_path = e.side(changed).path.clone();
            e.side_mut(changed).sync_path = changed_path;
        }
        Ok(EmbraceResult::Finished)
    }

    /// Downloads `changed`'s current content to a hash-named temp file.
    /// Returns `None` (after marking the side trashed) if the source has
    /// disappeared since the event fired.
    async fn download_changed(&mut self, id: EntryId, changed: Side) -> Result<Option<PathBuf>, SyncError> {
        let (oid, hash) = {
            let e = self.state.get(id).unwrap().side(changed);
            (e.oid.clone(), e.hash.clone())
        };
        let Some(oid) = oid else {
            return Ok(None);
        };

        let name = hash.as_ref().map(hex::encode).unwrap_or_else(|| format!("entry-{id}"));
        let temp_path = self.temp_dir.join(name);
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let file = tokio::fs::File::create(&temp_path).await?;
        let writer: crate::provider::Writer = Box::pin(file);

        match self.provider(changed).download(&oid, writer).await {
            Ok(()) => {
                if let Some(e) = self.state.get_mut(id) {
                    e.temp_file = Some(temp_path.clone());
                }
                Ok(Some(temp_path))
            }
            Err(e) if e.is_not_found() => {
                if let Some(entry) = self.state.get_mut(id) {
                    entry.side_mut(changed).exists = Exists::Trashed;
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upload_to_oid(&self, side: Side, oid: &str, temp_path: &PathBuf) -> Result<(), SyncError> {
        let file = tokio::fs::File::open(temp_path).await?;
        let reader: crate::provider::Reader = Box::pin(file);
        self.provider(side).upload(oid, reader).await?;
        Ok(())
    }

    /// Creates the object fresh on `synced`, falling back to materializing
    /// missing parent directories, and to REQUEUE on a parent/child race.
    async fn create_synced(
        &mut self,
        id: EntryId,
        changed: Side,
        synced: Side,
        translated_path: &str,
        temp_path: &PathBuf,
    ) -> Result<EmbraceResult, SyncError> {
        let file = tokio::fs::File::open(temp_path).await?;
        let reader: crate::provider::Reader = Box::pin(file);

        match self.provider(synced).create(translated_path, reader).await {
            Ok(info) => {
                self.state.update_entry(id, synced, Some(&info.oid), Some(translated_path), None, None);
                if let Some(e) = self.state.get_mut(id) {
                    let path_val = e.side(changed).path.clone();
                    let hash_val = e.side(changed).hash.clone();
                    e.side_mut(synced).sync_path = Some(translated_path.to_string());
                    e.side_mut(changed).sync_path = path_val;
                    e.side_mut(synced).sync_hash = hash_val.clone();
                    e.side_mut(changed).sync_hash = hash_val;
                }
                Ok(EmbraceResult::Finished)
            }
            Err(e) if e.is_not_found() => {
                let parent = self.provider(synced).dirname(translated_path);
                self.mkdirs(synced, &parent).await?;
                Ok(EmbraceResult::Requeue)
            }
            Err(e) if e.is_exists() => Ok(EmbraceResult::Requeue),
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_hash_conflict(&mut self, id: EntryId) -> Result<(), SyncError> {
        let (defer_id, defer_side, replace_id, replace_side) = self.state.split(id)?;
        self.handle_split_conflict(defer_id, defer_side, replace_id, replace_side).await
    }

    /// Renames the replace side's object to `<path>.conflicted` and
    /// re-arms the defer side so the engine re-pulls canonical content on
    /// the next tick (spec §4.4.4). Shared by the hash-conflict path and
    /// `check_disjoint_create`'s two-independent-entries case.
    async fn handle_split_conflict(
        &mut self,
        defer_id: EntryId,
        defer_side: Side,
        replace_id: EntryId,
        replace_side: Side,
    ) -> Result<(), SyncError> {
        let (replace_oid, replace_path) = {
            let e = self.state.get(replace_id).expect("replace entry exists");
            (e.side(replace_side).oid.clone(), e.side(replace_side).path.clone())
        };
        let Some(replace_path) = replace_path else {
            return Err(SyncError::Invariant(format!(
                "split-conflict on entry {replace_id} with no path on side {replace_side:?}"
            )));
        };
        let Some(replace_oid) = replace_oid else {
            return Err(SyncError::Invariant(format!(
                "split-conflict on entry {replace_id} with no oid on side {replace_side:?}"
            )));
        };

        let conflict_path = format!("{replace_path}.conflicted");
        let new_oid = self.provider(replace_side).rename(&replace_oid, &conflict_path).await?;

        self.state.update_entry(
            replace_id,
            replace_side,
            Some(&new_oid),
            Some(&conflict_path),
            None,
            None,
        );
        if let Some(e) = self.state.get_mut(replace_id) {
            e.side_mut(replace_side).changed = Some(chrono::Utc::now());
        }
        if let Some(e) = self.state.get_mut(defer_id) {
            e.side_mut(defer_side).changed = Some(chrono::Utc::now());
        }

        tracing::info!(
            defer = defer_id,
            replace = replace_id,
            replace_oid = %crate::entry::debug_sig(&new_oid),
            conflict_path = %conflict_path,
            "split conflict: preserved losing content as a sibling .conflicted file"
        );
        Ok(())
    }

    /// Picks the lexicographically greater of the two diverged paths and
    /// renames the losing side to match (spec §4.4.5). The comparison
    /// happens in a single namespace (translating one side's path into the
    /// other's) since the two sides' paths otherwise differ by root
    /// prefix and aren't directly comparable.
    async fn handle_path_conflict(&mut self, id: EntryId) -> Result<(), SyncError> {
        let (local_path, remote_path) = {
            let e = self.state.get(id).expect("entry exists");
            (e.side(Side::Local).path.clone(), e.side(Side::Remote).path.clone())
        };
        let (Some(local_path), Some(remote_path)) = (local_path, remote_path) else {
            return Err(SyncError::Invariant(format!("path conflict on entry {id} missing a path")));
        };

        let remote_in_local_ns = self.translator.translate(Side::Local, &remote_path);
        let local_in_remote_ns = self.translator.translate(Side::Remote, &local_path);
        let (Some(remote_in_local_ns), Some(local_in_remote_ns)) = (remote_in_local_ns, local_in_remote_ns) else {
            return Err(SyncError::Invariant(format!(
                "path conflict on entry {id} has an untranslatable path"
            )));
        };

        let local_wins = local_path >= remote_in_local_ns;
        let (loser_side, loser_target_path, winner_side, winner_native_path) = if local_wins {
            (Side::Remote, local_in_remote_ns, Side::Local, local_path)
        } else {
            (Side::Local, remote_in_local_ns, Side::Remote, remote_path)
        };

        let loser_oid = self.state.get(id).unwrap().side(loser_side).oid.clone();
        let Some(loser_oid) = loser_oid else {
            return Err(SyncError::Invariant(format!("path conflict on entry {id} with no oid on losing side")));
        };
        let new_loser_oid = self.provider(loser_side).rename(&loser_oid, &loser_target_path).await?;
        self.state
            .update_entry(id, loser_side, Some(&new_loser_oid), Some(&loser_target_path), None, None);

        if let Some(e) = self.state.get_mut(id) {
            e.side_mut(loser_side).sync_path = Some(loser_target_path);
            e.side_mut(winner_side).sync_path = Some(winner_native_path);
            e.side_mut(Side::Local).changed = None;
            e.side_mut(Side::Remote).changed = None;
        }
        self.state.finished(id);

        tracing::info!(entry = id, winner = ?winner_side, "path conflict resolved by lexicographic pick");
        Ok(())
    }
}
