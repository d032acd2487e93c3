//! Reconciliation engine for a bidirectional, two-sided file synchronizer:
//! a persistent per-object sync record ([`entry::SyncEntry`]), the
//! bi-indexed store that tracks pending work ([`state::SyncState`]), and
//! the single-tick loop that converges one side onto the other
//! ([`manager::SyncManager`]).
//!
//! Concrete providers, credential handling, and the persistence backend are
//! out of scope — this crate only defines the [`provider::Provider`] and
//! [`storage::Storage`] contracts they must satisfy.

pub mod config;
pub mod entry;
pub mod error;
pub mod manager;
pub mod provider;
pub mod runnable;
pub mod state;
pub mod storage;
pub mod translate;
pub mod types;

pub use entry::SyncEntry;
pub use error::{ProviderError, Result, StorageError, SyncError};
pub use manager::SyncManager;
pub use provider::{DirInfo, Event, ObjInfo, Provider};
pub use runnable::Runnable;
pub use state::{EntryId, SyncState};
pub use storage::Storage;
pub use translate::{FnTranslator, Translator};
pub use types::{Exists, ObjectType, Side};
