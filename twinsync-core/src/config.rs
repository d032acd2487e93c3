//! Pair configuration: load/save glue around [`directories::ProjectDirs`]
//! and `toml`, in the same style as a conventional on-disk config file (the
//! engine itself never reads this directly — see spec §1 Non-goals on CLI
//! parsing and config storage format).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairConfig {
    pub tag: String,
    pub local_root: String,
    pub remote_root: String,
    pub poll_interval_ms: u64,
    pub idle_delay_ms: u64,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            tag: "default".to_string(),
            local_root: "/".to_string(),
            remote_root: "/".to_string(),
            poll_interval_ms: 5_000,
            idle_delay_ms: 20,
        }
    }
}

impl PairConfig {
    /// Default path is `<config_dir>/twinsync/<tag>.toml`, resolved via
    /// the OS-appropriate config directory.
    pub fn default_path(tag: &str) -> PathBuf {
        directories::ProjectDirs::from("dev", "twinsync", "twinsync")
            .map(|dirs| dirs.config_dir().join(format!("{tag}.toml")))
            .unwrap_or_else(|| PathBuf::from(format!("{tag}.toml")))
    }

    pub fn load(path: &PathBuf) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| SyncError::Invariant(format!("invalid pair config at {path:?}: {e}")))
    }

    pub fn save(&self, path: &PathBuf) -> Result<(), SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| SyncError::Invariant(format!("failed to serialize pair config: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}
