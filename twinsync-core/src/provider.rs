//! The abstract object-store contract reconciliation consumes.
//!
//! A concrete provider (a cloud SDK, a local filesystem watcher, ...) is
//! deliberately out of scope here — see `spec.md` §1 Non-goals. This module
//! only specifies the interface; `twinsync-testkit` ships an in-memory
//! implementation used to exercise it in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ProviderError;
use crate::types::{Exists, ObjectType};

/// A change observed on a provider's event stream. Event order defines an
/// observed linearization for that side; the engine never assumes
/// cross-side ordering (spec §4.1, §5).
#[derive(Debug, Clone)]
pub struct Event {
    pub otype: ObjectType,
    pub oid: String,
    pub path: Option<String>,
    pub hash: Option<Vec<u8>>,
    pub exists: Exists,
    pub mtime: Option<DateTime<Utc>>,
    /// Opaque resumable position this event advances the provider's cursor to.
    pub new_cursor: Option<String>,
}

/// Point-lookup result for a path or oid.
#[derive(Debug, Clone)]
pub struct ObjInfo {
    pub otype: ObjectType,
    pub oid: String,
    pub path: Option<String>,
    pub hash: Option<Vec<u8>>,
}

/// One entry returned by [`Provider::listdir`].
#[derive(Debug, Clone)]
pub struct DirInfo {
    pub otype: ObjectType,
    pub oid: String,
    pub name: String,
    pub path: Option<String>,
}

pub type Reader = Pin<Box<dyn AsyncRead + Send>>;
pub type Writer = Pin<Box<dyn AsyncWrite + Send>>;

/// Abstract path-addressed object store with a mutation event stream.
///
/// All CRUD-ish operations may fail with the [`ProviderError`] kinds of
/// spec §7; the engine's policy for each kind is documented there, not
/// here — this trait only describes the shape of the contract.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Path delimiter used by this provider.
    fn sep(&self) -> char {
        '/'
    }

    /// Alternate delimiter normalized away, if any.
    fn alt_sep(&self) -> Option<char> {
        Some('\\')
    }

    /// True when this provider's oid *is* its path (no separate id space).
    fn oid_is_path(&self) -> bool {
        false
    }

    fn case_sensitive(&self) -> bool {
        true
    }

    /// A human-readable name used only in log lines.
    fn debug_name(&self) -> &str {
        "provider"
    }

    /// Lazy, possibly-infinite stream of mutation events.
    fn events(&self) -> BoxStream<'static, Result<Event, ProviderError>>;

    /// Every existing descendant of `path`, used on cold start.
    async fn walk(&self, path: &str) -> Result<Vec<Event>, ProviderError>;

    async fn info_path(&self, path: &str) -> Result<Option<ObjInfo>, ProviderError>;
    async fn info_oid(&self, oid: &str) -> Result<Option<ObjInfo>, ProviderError>;

    async fn exists_oid(&self, oid: &str) -> Result<bool, ProviderError>;
    async fn exists_path(&self, path: &str) -> Result<bool, ProviderError>;

    /// Fast-path hash lookup. Absent for missing objects; never raises.
    async fn hash_oid(&self, oid: &str) -> Option<Vec<u8>> {
        self.info_oid(oid).await.ok().flatten().and_then(|i| i.hash)
    }

    async fn create(&self, path: &str, reader: Reader) -> Result<ObjInfo, ProviderError>;
    async fn upload(&self, oid: &str, reader: Reader) -> Result<ObjInfo, ProviderError>;
    async fn download(&self, oid: &str, writer: Writer) -> Result<(), ProviderError>;
    /// Renames `oid` to `new_path`, returning the (possibly new) oid.
    async fn rename(&self, oid: &str, new_path: &str) -> Result<String, ProviderError>;
    async fn mkdir(&self, path: &str) -> Result<String, ProviderError>;
    async fn delete(&self, oid: &str) -> Result<(), ProviderError>;
    async fn listdir(&self, oid: &str) -> Result<Vec<DirInfo>, ProviderError>;

    // ---- path helpers -------------------------------------------------
    // Both primary and alternate separators are collapsed; when
    // case-insensitive, comparisons use lowercased forms but separators
    // are preserved (spec §4.1).

    fn join(&self, parts: &[&str]) -> String {
        let sep = self.sep();
        let alt = self.alt_sep();
        let mut pieces: Vec<String> = Vec::new();
        for part in parts {
            if part.is_empty() || *part == sep.to_string() {
                continue;
            }
            let mut trimmed = part.trim_matches(sep).to_string();
            if let Some(alt) = alt {
                trimmed = trimmed.trim_matches(alt).to_string();
            }
            if !trimmed.is_empty() {
                pieces.push(trimmed);
            }
        }
        if pieces.is_empty() {
            return sep.to_string();
        }
        format!("{}{}", sep, pieces.join(&sep.to_string()))
    }

    fn split(&self, path: &str) -> (String, String) {
        let sep = self.sep();
        let alt = self.alt_sep();
        let mut index = path.rfind(sep);
        if index.is_none() {
            if let Some(alt) = alt {
                index = path.rfind(alt);
            }
        }
        match index {
            None => (path.to_string(), String::new()),
            Some(0) => (sep.to_string(), path[1..].to_string()),
            Some(i) => (path[..i].to_string(), path[i + 1..].to_string()),
        }
    }

    fn normalize_path(&self, path: &str) -> String {
        let sep = self.sep();
        let alt = self.alt_sep();
        let trimmed = path.trim_end_matches(sep);
        let parts: Vec<&str> = trimmed
            .split(|c| c == sep || Some(c) == alt)
            .filter(|p| !p.is_empty())
            .collect();
        self.join(&parts)
    }

    fn dirname(&self, path: &str) -> String {
        let normalized = self.normalize_path(path);
        let trimmed = normalized.trim_start_matches(self.sep());
        let parts: Vec<&str> = trimmed.split(self.sep()).filter(|p| !p.is_empty()).collect();
        if parts.len() <= 1 {
            return self.sep().to_string();
        }
        self.join(&parts[..parts.len() - 1])
    }

    /// `None` when `target` is not `folder` or a descendant of it.
    /// `Some(sep)` for equality when `strict` is false.
    /// `Some(relative)` (including the leading separator) for a true
    /// proper subpath.
    fn is_subpath(&self, folder: &str, target: &str, strict: bool) -> Option<String> {
        let sep = self.sep();
        let alt = self.alt_sep();
        let norm = |s: &str| -> String {
            let mut s = s.to_string();
            if let Some(alt) = alt {
                s = s.replace(alt, &sep.to_string());
            }
            s.trim_end_matches(sep).to_string()
        };
        let mut folder_full = norm(folder);
        let mut target_full = norm(target);
        if !self.case_sensitive() {
            folder_full = folder_full.to_lowercase();
            target_full = target_full.to_lowercase();
        }

        if folder_full == target_full {
            return if strict { None } else { Some(sep.to_string()) };
        }

        if target_full.len() > folder_full.len() {
            let boundary = target_full.as_bytes()[folder_full.len()] as char;
            if boundary == sep && target_full.starts_with(&folder_full) {
                return Some(target_full[folder_full.len()..].to_string());
            }
        }
        None
    }

    /// Per spec §9 Open Question 2: returns `to_dir` concatenated with the
    /// subpath remainder. This is the stated-authoritative contract, not
    /// the original's early-return bug.
    fn replace_path(&self, path: &str, from_dir: &str, to_dir: &str) -> Result<String, ProviderError> {
        match self.is_subpath(from_dir, path, false) {
            Some(relative) => Ok(format!("{}{}", to_dir, relative)),
            None => Err(ProviderError::Programming(format!(
                "replace_path used without subpath: {} not under {}",
                path, from_dir
            ))),
        }
    }
}
