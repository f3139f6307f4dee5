//! Registry of installs currently in progress, keyed by
//! `"<name>@<version>"`. Source of truth for the "needs SSE" signal.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
pub struct ActiveInstalls {
    inner: Arc<RwLock<HashSet<String>>>,
}

/// Removes its key from the registry when dropped, so an install can
/// never leak an active entry on any exit path.
pub struct ActiveGuard {
    key: String,
    inner: Arc<RwLock<HashSet<String>>>,
}

impl ActiveInstalls {
    pub fn new() -> ActiveInstalls {
        ActiveInstalls::default()
    }

    pub fn mark(&self, key: String) -> ActiveGuard {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone());
        ActiveGuard {
            key,
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_unmarks_on_drop() {
        let active = ActiveInstalls::new();
        let guard = active.mark("dotnet@8.0.5".to_string());
        assert!(active.is_active("dotnet@8.0.5"));
        assert_eq!(active.list(), vec!["dotnet@8.0.5"]);
        drop(guard);
        assert!(!active.is_active("dotnet@8.0.5"));
        assert!(active.list().is_empty());
    }
}
