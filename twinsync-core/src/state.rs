//! The bi-indexed, persistable collection of per-object sync records
//! (spec §4.3): per-side oid index, per-side path index (a set of
//! candidates per path, since transient duplicates are legal), and the
//! changeset of entries with pending work.

use rand::seq::IteratorRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::entry::{StorageId, SyncEntry};
use crate::error::SyncError;
use crate::provider::Provider;
use crate::storage::Storage;
use crate::types::{Exists, ObjectType, Side};

/// In-process identity for a [`SyncEntry`]. Distinct from [`StorageId`]:
/// this is never persisted, it only names an entry within one running
/// `SyncState`.
pub type EntryId = u64;

pub struct SyncState {
    entries: HashMap<EntryId, SyncEntry>,
    oid_index: [HashMap<String, EntryId>; 2],
    path_index: [HashMap<String, HashSet<EntryId>>; 2],
    changeset: HashSet<EntryId>,
    storage: Option<Arc<dyn Storage>>,
    tag: String,
    next_id: EntryId,
}

impl SyncState {
    /// Rehydrates every row for `tag`, reindexing by oid and path on both
    /// sides and clearing the dirty flag on each (spec §4.3).
    pub async fn new(storage: Option<Arc<dyn Storage>>, tag: impl Into<String>) -> Result<Self, SyncError> {
        let tag = tag.into();
        let mut state = Self {
            entries: HashMap::new(),
            oid_index: [HashMap::new(), HashMap::new()],
            path_index: [HashMap::new(), HashMap::new()],
            changeset: HashSet::new(),
            storage: storage.clone(),
            tag: tag.clone(),
            next_id: 0,
        };

        if let Some(storage) = storage {
            let rows = storage.read_all(&tag).await?;
            for (storage_id, blob) in rows {
                let entry = SyncEntry::deserialize(storage_id, &blob)
                    .map_err(|e| SyncError::Invariant(format!("corrupt persisted entry {storage_id}: {e}")))?;
                state.insert_rehydrated(entry);
            }
        }

        Ok(state)
    }

    fn insert_rehydrated(&mut self, entry: SyncEntry) {
        let id = self.next_id;
        self.next_id += 1;
        for side in Side::ALL {
            let s = entry.side(side);
            if let Some(oid) = &s.oid {
                self.oid_index[side.index()].insert(oid.clone(), id);
            }
            if let Some(path) = &s.path {
                self.path_index[side.index()]
                    .entry(path.clone())
                    .or_default()
                    .insert(id);
            }
        }
        self.entries.insert(id, entry);
    }

    fn alloc_id(&mut self) -> EntryId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn get(&self, id: EntryId) -> Option<&SyncEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut SyncEntry> {
        self.entries.get_mut(&id)
    }

    fn change_oid(&mut self, side: Side, id: EntryId, oid: Option<&str>) {
        let old = self.entries.get(&id).and_then(|e| e.side(side).oid.clone());
        if let Some(old) = &old {
            if self.oid_index[side.index()].get(old) == Some(&id) {
                self.oid_index[side.index()].remove(old);
            }
        }
        if let Some(oid) = oid {
            self.oid_index[side.index()].insert(oid.to_string(), id);
            if let Some(e) = self.entries.get_mut(&id) {
                e.side_mut(side).oid = Some(oid.to_string());
            }
        }
    }

    fn change_path(&mut self, side: Side, id: EntryId, path: Option<&str>) {
        let old = self.entries.get(&id).and_then(|e| e.side(side).path.clone());
        if let Some(old) = &old {
            if let Some(bucket) = self.path_index[side.index()].get_mut(old) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    self.path_index[side.index()].remove(old);
                }
            }
        }
        if let Some(path) = path {
            self.path_index[side.index()]
                .entry(path.to_string())
                .or_default()
                .insert(id);
            if let Some(e) = self.entries.get_mut(&id) {
                e.side_mut(side).path = Some(path.to_string());
            }
        }
    }

    /// Same as [`SyncState::update`], but on a known entry; does not bump
    /// `changed`.
    pub fn update_entry(
        &mut self,
        id: EntryId,
        side: Side,
        oid: Option<&str>,
        path: Option<&str>,
        hash: Option<Option<Vec<u8>>>,
        exists: Option<Exists>,
    ) {
        if let Some(oid) = oid {
            self.change_oid(side, id, Some(oid));
        }
        if let Some(path) = path {
            self.change_path(side, id, Some(path));
        }
        if let Some(entry) = self.entries.get_mut(&id) {
            if let Some(hash) = hash {
                entry.side_mut(side).hash = hash;
            }
            if let Some(exists) = exists {
                entry.side_mut(side).exists = exists;
            }
        }
    }

    pub fn lookup_oid(&self, side: Side, oid: &str) -> Option<EntryId> {
        self.oid_index[side.index()].get(oid).copied()
    }

    pub fn lookup_path(&self, side: Side, path: &str) -> Vec<EntryId> {
        self.path_index[side.index()]
            .get(path)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Looks up by oid; creates an entry if missing; marks the side
    /// changed; enqueues it; persists it (spec §4.3).
    pub async fn update(
        &mut self,
        side: Side,
        otype: ObjectType,
        oid: &str,
        path: Option<&str>,
        hash: Option<Vec<u8>>,
        exists: Exists,
    ) -> Result<EntryId, SyncError> {
        let id = match self.lookup_oid(side, oid) {
            Some(id) => id,
            None => {
                let id = self.alloc_id();
                self.entries.insert(id, SyncEntry::new(otype));
                id
            }
        };

        self.update_entry(id, side, Some(oid), path, Some(hash), Some(exists));

        if let Some(entry) = self.entries.get_mut(&id) {
            entry.side_mut(side).changed = Some(chrono::Utc::now());
            entry.dirty = true;
        }
        self.changeset.insert(id);
        self.storage_update(id).await?;
        Ok(id)
    }

    /// Samples one changed entry. Fairness: eventually visits every
    /// non-discarded entry with `changed` set. Discarded entries sampled
    /// along the way are pruned and resampled (spec §4.3).
    pub fn change(&mut self) -> Option<EntryId> {
        loop {
            let id = *self.changeset.iter().choose(&mut rand::thread_rng())?;
            match self.entries.get(&id) {
                Some(entry) if entry.discarded => {
                    self.changeset.remove(&id);
                    continue;
                }
                Some(_) => return Some(id),
                None => {
                    self.changeset.remove(&id);
                    continue;
                }
            }
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changeset.is_empty()
    }

    /// Removes from the changeset unless a side still has `changed` set
    /// (defense against stale completion).
    pub fn finished(&mut self, id: EntryId) {
        if let Some(entry) = self.entries.get(&id) {
            if entry.side(Side::Local).changed.is_some() || entry.side(Side::Remote).changed.is_some() {
                return;
            }
        }
        self.changeset.remove(&id);
    }

    /// Duplicates `id` so the hash-conflict handler can rewrite the
    /// losing side's name (spec §4.4.4, Open Question 1).
    ///
    /// Deterministic rule: `replace_side` is always [`Side::Local`]. The
    /// replace side's current (oid, path, hash) moves to a brand-new
    /// entry with its sync witnesses cleared (it becomes a pending
    /// creation, to be renamed `.conflicted` and pushed to the other side
    /// as an independent object). The original entry keeps the defer
    /// side's identity untouched, but has both sides' sync witnesses on
    /// the *defer* side cleared too, so the next tick re-classifies it as
    /// a creation rather than a content-update — content-update requires
    /// an existing oid on the synced side (spec §4.4.1), and that oid now
    /// belongs to the replace entry. This keeps exactly one physical
    /// object per oid and drops no bytes.
    pub fn split(&mut self, id: EntryId) -> Result<(EntryId, Side, EntryId, Side), SyncError> {
        let replace_side = Side::Local;
        let defer_side = replace_side.other();

        let otype = self
            .get(id)
            .ok_or_else(|| SyncError::Invariant(format!("split on unknown entry {id}")))?
            .otype;

        let moved = self.get(id).unwrap().side(replace_side).clone();

        // Detach the replace side from the original entry's indices.
        self.change_oid(replace_side, id, None);
        self.change_path(replace_side, id, None);
        if let Some(entry) = self.get_mut(id) {
            let side = entry.side_mut(replace_side);
            side.oid = None;
            side.path = None;
            side.hash = None;
            side.exists = Exists::Unknown;
            side.sync_path = None;
            side.sync_hash = None;
            side.changed = None;

            // Force the defer side to be re-classified as a creation on
            // the next tick, since the oid it used to upload to is gone.
            let defer = entry.side_mut(defer_side);
            defer.sync_path = None;
            defer.sync_hash = None;
        }

        let new_id = self.alloc_id();
        let mut replace_entry = SyncEntry::new(otype);
        {
            let side = replace_entry.side_mut(replace_side);
            side.oid = moved.oid.clone();
            side.path = moved.path.clone();
            side.hash = moved.hash.clone();
            side.exists = moved.exists;
            side.sync_path = None;
            side.sync_hash = None;
            side.changed = Some(chrono::Utc::now());
        }
        self.entries.insert(new_id, replace_entry);
        if let Some(oid) = &moved.oid {
            self.oid_index[replace_side.index()].insert(oid.clone(), new_id);
        }
        if let Some(path) = &moved.path {
            self.path_index[replace_side.index()]
                .entry(path.clone())
                .or_default()
                .insert(new_id);
        }
        self.changeset.insert(new_id);
        self.changeset.insert(id);

        Ok((id, defer_side, new_id, replace_side))
    }

    /// Renames every entry under `from_dir` to the corresponding path
    /// under `to_dir`, updating path indices. Reimplemented fresh from
    /// the contract (spec §9 Open Question 3) rather than translating the
    /// original's admitted-broken loop.
    pub fn rename_dir(&mut self, side: Side, from_dir: &str, to_dir: &str, provider: &dyn Provider) {
        let affected: Vec<(EntryId, String)> = self.entries
            .iter()
            .filter_map(|(id, entry)| {
                let path = entry.side(side).path.as_ref()?;
                provider
                    .is_subpath(from_dir, path, false)
                    .map(|_| (*id, path.clone()))
            })
            .collect();

        for (id, path) in affected {
            if let Ok(new_path) = provider.replace_path(&path, from_dir, to_dir) {
                self.change_path(side, id, Some(&new_path));
            }
        }
    }

    pub fn get_all(&self, include_discarded: bool) -> Vec<EntryId> {
        self.entries
            .iter()
            .filter(|(_, e)| include_discarded || !e.discarded)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.get_all(false).len()
    }

    /// If dirty: deletes the persisted row when discarded, otherwise
    /// upserts it, assigning `storage_id` on first insert; clears dirty.
    pub async fn storage_update(&mut self, id: EntryId) -> Result<(), SyncError> {
        let Some(storage) = self.storage.clone() else {
            return Ok(());
        };
        let Some(entry) = self.entries.get_mut(&id) else {
            return Ok(());
        };
        if !entry.dirty {
            return Ok(());
        }

        if let Some(storage_id) = entry.storage_id {
            if entry.discarded {
                storage.delete(&self.tag, storage_id).await?;
            } else {
                storage.update(&self.tag, entry.serialize(), storage_id).await?;
            }
        } else {
            debug_assert!(!entry.discarded);
            let new_id: StorageId = storage.create(&self.tag, entry.serialize()).await?;
            entry.storage_id = Some(new_id);
        }
        entry.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemStorage {
        rows: StdMutex<HashMap<StorageId, Vec<u8>>>,
        next: StdMutex<StorageId>,
    }

    #[async_trait]
    impl Storage for MemStorage {
        async fn create(&self, _tag: &str, blob: Vec<u8>) -> Result<StorageId, crate::error::StorageError> {
            let mut next = self.next.lock().unwrap();
            *next += 1;
            let id = *next;
            self.rows.lock().unwrap().insert(id, blob);
            Ok(id)
        }
        async fn update(&self, _tag: &str, blob: Vec<u8>, id: StorageId) -> Result<(), crate::error::StorageError> {
            self.rows.lock().unwrap().insert(id, blob);
            Ok(())
        }
        async fn delete(&self, _tag: &str, id: StorageId) -> Result<(), crate::error::StorageError> {
            self.rows.lock().unwrap().remove(&id);
            Ok(())
        }
        async fn read_all(&self, _tag: &str) -> Result<HashMap<StorageId, Vec<u8>>, crate::error::StorageError> {
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn update_creates_entry_and_is_reachable_by_oid_and_path() {
        let mut state = SyncState::new(None, "pair").await.unwrap();
        let id = state
            .update(Side::Local, ObjectType::File, "oid1", Some("/a"), Some(vec![1]), Exists::Exists)
            .await
            .unwrap();

        assert_eq!(state.lookup_oid(Side::Local, "oid1"), Some(id));
        assert!(state.lookup_path(Side::Local, "/a").contains(&id));
        assert!(state.has_changes());
    }

    #[tokio::test]
    async fn change_skips_discarded_entries() {
        let mut state = SyncState::new(None, "pair").await.unwrap();
        let id = state
            .update(Side::Local, ObjectType::File, "oid1", Some("/a"), None, Exists::Exists)
            .await
            .unwrap();
        state.get_mut(id).unwrap().discard();

        assert_eq!(state.change(), None);
        assert!(!state.has_changes());
    }

    #[tokio::test]
    async fn finished_keeps_entry_if_other_side_still_changed() {
        let mut state = SyncState::new(None, "pair").await.unwrap();
        let id = state
            .update(Side::Local, ObjectType::File, "oid1", Some("/a"), None, Exists::Exists)
            .await
            .unwrap();
        state
            .update_entry(id, Side::Remote, Some("oid2"), Some("/b"), None, Some(Exists::Exists));
        state.get_mut(id).unwrap().side_mut(Side::Remote).changed = Some(chrono::Utc::now());

        state.get_mut(id).unwrap().side_mut(Side::Local).changed = None;
        state.finished(id);
        assert!(state.has_changes());
    }

    #[tokio::test]
    async fn storage_update_round_trips_through_rehydration() {
        let storage: Arc<dyn Storage> = Arc::new(MemStorage::default());
        let mut state = SyncState::new(Some(storage.clone()), "pair").await.unwrap();
        let id = state
            .update(Side::Local, ObjectType::File, "oid1", Some("/a"), Some(vec![9, 9]), Exists::Exists)
            .await
            .unwrap();
        assert!(state.get(id).unwrap().storage_id.is_some());

        let rehydrated = SyncState::new(Some(storage), "pair").await.unwrap();
        let rid = rehydrated.lookup_oid(Side::Local, "oid1").unwrap();
        assert_eq!(rehydrated.get(rid).unwrap().side(Side::Local).hash, Some(vec![9, 9]));
    }

    #[test]
    fn split_moves_replace_side_to_a_fresh_entry_with_no_shared_oid() {
        let mut state = futures::executor::block_on(SyncState::new(None, "pair")).unwrap();
        let id = futures::executor::block_on(state.update(
            Side::Local,
            ObjectType::File,
            "local-oid",
            Some("/stuff"),
            Some(vec![1]),
            Exists::Exists,
        ))
        .unwrap();
        state.update_entry(id, Side::Remote, Some("remote-oid"), Some("/stuff"), Some(Some(vec![2])), Some(Exists::Exists));
        // pretend this was previously in sync, now both sides diverge
        {
            let e = state.get_mut(id).unwrap();
            e.side_mut(Side::Local).sync_hash = Some(vec![0]);
            e.side_mut(Side::Local).sync_path = Some("/stuff".into());
            e.side_mut(Side::Remote).sync_hash = Some(vec![0]);
            e.side_mut(Side::Remote).sync_path = Some("/stuff".into());
        }

        let (defer_id, defer_side, replace_id, replace_side) = state.split(id).unwrap();
        assert_eq!(defer_id, id);
        assert_eq!(defer_side, Side::Remote);
        assert_eq!(replace_side, Side::Local);
        assert_ne!(replace_id, defer_id);

        // the oid index for Local now points only at the new entry
        assert_eq!(state.lookup_oid(Side::Local, "local-oid"), Some(replace_id));
        assert!(state.get(defer_id).unwrap().side(Side::Local).oid.is_none());
        assert!(state.get(replace_id).unwrap().side(Side::Local).oid.is_some());

        // defer side's remote identity is untouched
        assert_eq!(state.get(defer_id).unwrap().side(Side::Remote).oid.as_deref(), Some("remote-oid"));
        // but its sync witnesses were cleared so it re-classifies as a creation
        assert!(state.get(defer_id).unwrap().side(Side::Remote).sync_path.is_none());
    }
}
