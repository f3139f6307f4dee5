//! Per-folder mutual exclusion.
//!
//! Any operation that mutates a version folder (install, uninstall,
//! cleanup of a specific version) must hold that folder's lock.
//! Acquisition is non-blocking: contention surfaces as a busy error at
//! the call site instead of queueing. Entries accumulate but are cheap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct FolderLocks {
    inner: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

pub type FolderGuard = OwnedMutexGuard<()>;

impl FolderLocks {
    pub fn new() -> FolderLocks {
        FolderLocks::default()
    }

    /// Returns the guard, or `None` when another operation holds the
    /// folder. The guard may be held across await points.
    pub fn try_lock(&self, folder: &Path) -> Option<FolderGuard> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(folder.to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.try_lock_owned().ok()
    }
}
