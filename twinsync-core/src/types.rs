use serde::{Deserialize, Serialize};

/// Which of the two providers participating in a sync pair a value belongs to.
///
/// These are labels, not physical locations: `Side::Local` and `Side::Remote`
/// are just the two ends of the pair, and the engine treats them symmetrically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    Local = 0,
    Remote = 1,
}

impl Side {
    /// The side on the other end of the pair.
    pub fn other(self) -> Side {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub const ALL: [Side; 2] = [Side::Local, Side::Remote];
}

impl std::ops::Not for Side {
    type Output = Side;
    fn not(self) -> Side {
        self.other()
    }
}

/// The kind of object a [`crate::entry::SyncEntry`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    File,
    Directory,
    NotKnown,
}

/// A three-valued existence flag. Deliberately not `bool`: callers must
/// match on the variant rather than relying on truthiness, since "unknown"
/// is a distinct state from "trashed" and conflating them silently is the
/// single most common bug class in this kind of state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Exists {
    #[default]
    Unknown,
    Exists,
    Trashed,
}

impl Exists {
    pub fn is_exists(self) -> bool {
        matches!(self, Exists::Exists)
    }

    pub fn is_trashed(self) -> bool {
        matches!(self, Exists::Trashed)
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, Exists::Unknown)
    }
}

/// Setters elsewhere in the engine accept an `Option<bool>` the way the
/// original Python `exists` property setter did (`True`/`False`/`None`),
/// without opening the door to accidental `if entry.exists { .. }` checks.
impl From<Option<bool>> for Exists {
    fn from(val: Option<bool>) -> Self {
        match val {
            Some(true) => Exists::Exists,
            Some(false) => Exists::Trashed,
            None => Exists::Unknown,
        }
    }
}

impl From<bool> for Exists {
    fn from(val: bool) -> Self {
        if val { Exists::Exists } else { Exists::Trashed }
    }
}
