//! The per-object sync record: a pair of [`SideState`]s plus the metadata
//! that lets the reconciliation engine tell a creation from a rename from a
//! no-op.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::provider::Provider;
use crate::types::{Exists, ObjectType, Side};

/// Opaque persistence row id, assigned by a [`crate::storage::Storage`]
/// backend on first insert.
pub type StorageId = i64;

/// Short, stable stand-in for an oid or hash in log lines, so `tracing`
/// output doesn't dump entire cloud-provider identifiers.
pub fn debug_sig(value: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}

/// One side's view of an object.
#[derive(Debug, Clone, Default)]
pub struct SideState {
    pub side: Option<Side>,
    pub oid: Option<String>,
    pub path: Option<String>,
    pub hash: Option<Vec<u8>>,
    pub exists: Exists,
    /// Set when this side has an unhandled change; cleared once the
    /// engine has propagated it.
    pub changed: Option<chrono::DateTime<chrono::Utc>>,
    pub sync_path: Option<String>,
    pub sync_hash: Option<Vec<u8>>,
}

impl SideState {
    pub fn new(side: Side) -> Self {
        Self {
            side: Some(side),
            ..Default::default()
        }
    }
}

/// Wire form of a [`SideState`] (spec §6): hashes are hex-encoded, new
/// fields default safely when absent so older rows deserialize cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SideStateDto {
    side: u8,
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    changed: Option<i64>,
    #[serde(default)]
    sync_path: Option<String>,
    #[serde(default)]
    sync_hash: Option<String>,
    #[serde(default)]
    exists: i8,
}

fn exists_to_wire(e: Exists) -> i8 {
    match e {
        Exists::Unknown => 0,
        Exists::Exists => 1,
        Exists::Trashed => -1,
    }
}

fn exists_from_wire(v: i8) -> Exists {
    match v {
        1 => Exists::Exists,
        -1 => Exists::Trashed,
        _ => Exists::Unknown,
    }
}

impl SideStateDto {
    fn from_state(s: &SideState) -> Self {
        Self {
            side: s.side.map(|s| s.index() as u8).unwrap_or(0),
            oid: s.oid.clone(),
            path: s.path.clone(),
            hash: s.hash.as_ref().map(hex::encode),
            changed: s.changed.map(|t| t.timestamp_millis()),
            sync_path: s.sync_path.clone(),
            sync_hash: s.sync_hash.as_ref().map(hex::encode),
            exists: exists_to_wire(s.exists),
        }
    }

    fn into_state(self, side: Side) -> Result<SideState, String> {
        let hash = self
            .hash
            .map(|h| hex::decode(&h).map_err(|e| format!("bad hash hex: {e}")))
            .transpose()?;
        let sync_hash = self
            .sync_hash
            .map(|h| hex::decode(&h).map_err(|e| format!("bad sync_hash hex: {e}")))
            .transpose()?;
        Ok(SideState {
            side: Some(side),
            oid: self.oid,
            path: self.path,
            hash,
            exists: exists_from_wire(self.exists),
            changed: self
                .changed
                .and_then(chrono::DateTime::from_timestamp_millis),
            sync_path: self.sync_path,
            sync_hash,
        })
    }
}

/// A record pairing the state of one logical object across both sides.
#[derive(Debug, Clone)]
pub struct SyncEntry {
    states: [SideState; 2],
    pub otype: ObjectType,
    pub temp_file: Option<std::path::PathBuf>,
    pub discarded: bool,
    pub storage_id: Option<StorageId>,
    pub dirty: bool,
}

impl SyncEntry {
    pub fn new(otype: ObjectType) -> Self {
        Self {
            states: [SideState::new(Side::Local), SideState::new(Side::Remote)],
            otype,
            temp_file: None,
            discarded: false,
            storage_id: None,
            dirty: true,
        }
    }

    pub fn side(&self, side: Side) -> &SideState {
        &self.states[side.index()]
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideState {
        self.dirty = true;
        &mut self.states[side.index()]
    }

    pub fn discard(&mut self) {
        self.discarded = true;
        self.dirty = true;
    }

    /// For each side whose `changed` is set, refresh `hash` (files) or
    /// `exists` (directories) from the provider (spec §4.2).
    pub async fn get_latest_state(&mut self, providers: &[&dyn Provider; 2]) {
        for side in Side::ALL {
            if self.states[side.index()].changed.is_none() {
                continue;
            }
            let oid = match self.states[side.index()].oid.clone() {
                Some(oid) => oid,
                None => continue,
            };
            if self.otype == ObjectType::File {
                let hash = providers[side.index()].hash_oid(&oid).await;
                self.states[side.index()].exists = Exists::from(hash.is_some());
                self.states[side.index()].hash = hash;
            } else {
                let exists = providers[side.index()]
                    .exists_oid(&oid)
                    .await
                    .unwrap_or(false);
                self.states[side.index()].exists = Exists::from(exists);
            }
            self.dirty = true;
        }
    }

    /// Both sides have a hash, and both differ from their recorded
    /// `sync_hash` — a genuine content conflict, resolved by splitting and
    /// renaming the losing side, never by guessing which content wins.
    pub fn hash_conflict(&self) -> bool {
        let l = &self.states[Side::Local.index()];
        let r = &self.states[Side::Remote.index()];
        match (&l.hash, &r.hash) {
            (Some(lh), Some(rh)) => l.sync_hash.as_ref() != Some(lh) && r.sync_hash.as_ref() != Some(rh),
            _ => false,
        }
    }

    /// Both sides have a path, and both differ from their recorded
    /// `sync_path` — both sides moved the object.
    pub fn path_conflict(&self) -> bool {
        let l = &self.states[Side::Local.index()];
        let r = &self.states[Side::Remote.index()];
        match (&l.path, &r.path) {
            (Some(lp), Some(rp)) => l.sync_path.as_ref() != Some(lp) && r.sync_path.as_ref() != Some(rp),
            _ => false,
        }
    }

    pub fn is_path_change(&self, side: Side) -> bool {
        let s = &self.states[side.index()];
        s.path != s.sync_path
    }

    pub fn is_creation(&self, side: Side) -> bool {
        self.states[side.index()].sync_path.is_none()
    }

    /// Compact fixed-width debug line, for `tracing::debug!` calls only —
    /// not a `Display` impl, so `{:?}` stays available for assertions.
    pub fn pretty(&self) -> String {
        if self.discarded {
            return "DISCARDED".to_string();
        }
        let l = &self.states[Side::Local.index()];
        let r = &self.states[Side::Remote.index()];
        format!(
            "id={:?} otype={:?} L[path={:?} oid={:?} sync_path={:?} exists={:?}] R[path={:?} oid={:?} sync_path={:?} exists={:?}]",
            self.storage_id, self.otype,
            l.path, l.oid, l.sync_path, l.exists,
            r.path, r.oid, r.sync_path, r.exists,
        )
    }

    pub fn serialize(&self) -> Vec<u8> {
        #[derive(Serialize)]
        struct EntryDto<'a> {
            side0: SideStateDto,
            side1: SideStateDto,
            otype: u8,
            temp_file: Option<&'a str>,
            discarded: bool,
        }
        let dto = EntryDto {
            side0: SideStateDto::from_state(&self.states[0]),
            side1: SideStateDto::from_state(&self.states[1]),
            otype: otype_to_wire(self.otype),
            temp_file: self.temp_file.as_ref().and_then(|p| p.to_str()),
            discarded: self.discarded,
        };
        serde_json::to_vec(&dto).expect("SyncEntry serialization cannot fail")
    }

    pub fn deserialize(storage_id: StorageId, blob: &[u8]) -> Result<Self, String> {
        #[derive(Deserialize)]
        struct EntryDto {
            side0: SideStateDto,
            side1: SideStateDto,
            otype: u8,
            #[serde(default)]
            temp_file: Option<String>,
            #[serde(default)]
            discarded: bool,
        }
        let dto: EntryDto = serde_json::from_slice(blob).map_err(|e| e.to_string())?;
        Ok(Self {
            states: [
                dto.side0.into_state(Side::Local)?,
                dto.side1.into_state(Side::Remote)?,
            ],
            otype: otype_from_wire(dto.otype),
            temp_file: dto.temp_file.map(std::path::PathBuf::from),
            discarded: dto.discarded,
            storage_id: Some(storage_id),
            dirty: false,
        })
    }
}

fn otype_to_wire(o: ObjectType) -> u8 {
    match o {
        ObjectType::File => 0,
        ObjectType::Directory => 1,
        ObjectType::NotKnown => 2,
    }
}

fn otype_from_wire(v: u8) -> ObjectType {
    match v {
        0 => ObjectType::File,
        1 => ObjectType::Directory,
        _ => ObjectType::NotKnown,
    }
}

impl fmt::Display for SyncEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_creation_true_until_sync_path_set() {
        let e = SyncEntry::new(ObjectType::File);
        assert!(e.is_creation(Side::Local));
    }

    #[test]
    fn debug_sig_is_short_and_stable() {
        let a = debug_sig("oid-1234567890abcdef");
        let b = debug_sig("oid-1234567890abcdef");
        let c = debug_sig("oid-different");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn hash_conflict_requires_both_hashes_and_both_differ() {
        let mut e = SyncEntry::new(ObjectType::File);
        e.side_mut(Side::Local).hash = Some(vec![1]);
        e.side_mut(Side::Local).sync_hash = Some(vec![0]);
        e.side_mut(Side::Remote).hash = Some(vec![2]);
        e.side_mut(Side::Remote).sync_hash = Some(vec![0]);
        assert!(e.hash_conflict());

        // if one side matches its sync_hash, no conflict
        e.side_mut(Side::Remote).sync_hash = Some(vec![2]);
        assert!(!e.hash_conflict());
    }

    #[test]
    fn path_conflict_requires_both_paths_and_both_differ() {
        let mut e = SyncEntry::new(ObjectType::File);
        e.side_mut(Side::Local).path = Some("/a".into());
        e.side_mut(Side::Local).sync_path = Some("/orig".into());
        e.side_mut(Side::Remote).path = Some("/b".into());
        e.side_mut(Side::Remote).sync_path = Some("/orig".into());
        assert!(e.path_conflict());
    }

    #[test]
    fn serialize_round_trips_byte_equal_modulo_key_order() {
        let mut e = SyncEntry::new(ObjectType::File);
        e.side_mut(Side::Local).oid = Some("oid-l".into());
        e.side_mut(Side::Local).path = Some("/a/b".into());
        e.side_mut(Side::Local).hash = Some(vec![0xde, 0xad, 0xbe, 0xef]);
        e.side_mut(Side::Remote).oid = Some("oid-r".into());
        e.side_mut(Side::Remote).sync_hash = Some(vec![1, 2, 3]);
        e.discard();

        let blob = e.serialize();
        let round_tripped = SyncEntry::deserialize(42, &blob).unwrap();

        assert_eq!(round_tripped.otype, e.otype);
        assert_eq!(round_tripped.discarded, e.discarded);
        assert_eq!(round_tripped.side(Side::Local).oid, e.side(Side::Local).oid);
        assert_eq!(round_tripped.side(Side::Local).path, e.side(Side::Local).path);
        assert_eq!(round_tripped.side(Side::Local).hash, e.side(Side::Local).hash);
        assert_eq!(
            round_tripped.side(Side::Remote).sync_hash,
            e.side(Side::Remote).sync_hash
        );
        assert_eq!(round_tripped.storage_id, Some(42));
    }

    #[test]
    fn deserialize_defaults_missing_fields_for_forward_compat() {
        let minimal = serde_json::json!({
            "side0": {"side": 0, "exists": 0},
            "side1": {"side": 1, "exists": 0},
            "otype": 0,
        });
        let blob = serde_json::to_vec(&minimal).unwrap();
        let e = SyncEntry::deserialize(1, &blob).unwrap();
        assert!(!e.discarded);
        assert!(e.temp_file.is_none());
    }
}
