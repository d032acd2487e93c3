//! Cooperative loop harness wrapping a [`SyncManager`] (spec §4.5): a
//! `tick()`, a caller-supplied `until` predicate, and a `done()` teardown
//! that removes the temp directory used for in-flight transfers.

use std::time::Duration;

use crate::error::SyncError;
use crate::manager::SyncManager;

const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(20);

pub struct Runnable {
    manager: SyncManager,
    idle_delay: Duration,
}

impl Runnable {
    pub fn new(manager: SyncManager) -> Self {
        Self {
            manager,
            idle_delay: DEFAULT_IDLE_DELAY,
        }
    }

    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    pub fn manager(&self) -> &SyncManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut SyncManager {
        &mut self.manager
    }

    pub async fn tick(&mut self) -> Result<(), SyncError> {
        self.manager.do_tick().await
    }

    /// Loops `while !until() { tick() }`, sleeping briefly between ticks
    /// when there was nothing queued, so a quiescent pair doesn't spin.
    pub async fn run_until(&mut self, mut until: impl FnMut() -> bool) -> Result<(), SyncError> {
        while !until() {
            let had_work = self.manager.state().has_changes();
            self.tick().await?;
            if !had_work {
                tokio::time::sleep(self.idle_delay).await;
            }
        }
        Ok(())
    }

    /// Teardown: best-effort removal of the temp directory. Orphaned temp
    /// files from a crash are not this method's concern (spec §9 notes a
    /// startup GC sweep as future work).
    pub async fn done(self) -> Result<(), SyncError> {
        match tokio::fs::remove_dir_all(self.manager.temp_dir()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
