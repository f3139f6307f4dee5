//! Tool groups.
//!
//! All versions of one tool name share a single enable flag, persisted
//! as `<writableRoot>/<os>/<arch>/_groups/<name>.json`. A missing file
//! means enabled, and the default is eagerly written back.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolGroupMetadata {
    pub tool_name: String,
    pub is_enabled: bool,
}

/// Snapshot handed to listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolGroupSnapshot {
    pub tool_name: String,
    pub is_enabled: bool,
}

#[derive(Debug)]
pub struct ToolGroup {
    name: String,
    path: PathBuf,
    state: Mutex<Option<ToolGroupMetadata>>,
}

impl ToolGroup {
    pub fn new(name: &str, groups_dir: &Path) -> ToolGroup {
        ToolGroup {
            name: name.to_string(),
            path: groups_dir.join(format!("{name}.json")),
            state: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Defaults to enabled when the sidecar is missing or unreadable.
    pub fn is_enabled(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.ensure_locked(&mut state).is_enabled
    }

    /// Persists only when the flag actually changes.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let meta = self.ensure_locked(&mut state);
        if meta.is_enabled == enabled {
            return Ok(());
        }
        meta.is_enabled = enabled;
        let meta = meta.clone();
        self.persist(&meta)
    }

    pub fn snapshot(&self) -> ToolGroupSnapshot {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let meta = self.ensure_locked(&mut state);
        ToolGroupSnapshot {
            tool_name: meta.tool_name.clone(),
            is_enabled: meta.is_enabled,
        }
    }

    fn ensure_locked<'a>(
        &self,
        state: &'a mut Option<ToolGroupMetadata>,
    ) -> &'a mut ToolGroupMetadata {
        if state.is_none() {
            let loaded = fs::read(&self.path)
                .ok()
                .and_then(|data| serde_json::from_slice::<ToolGroupMetadata>(&data).ok())
                .map(|mut meta| {
                    if meta.tool_name.trim().is_empty() {
                        meta.tool_name = self.name.clone();
                    }
                    meta
                });
            let meta = match loaded {
                Some(meta) => meta,
                None => {
                    let meta = ToolGroupMetadata {
                        tool_name: self.name.clone(),
                        is_enabled: true,
                    };
                    let _ = self.persist(&meta);
                    meta
                }
            };
            *state = Some(meta);
        }
        state.as_mut().expect("group metadata populated above")
    }

    fn persist(&self, meta: &ToolGroupMetadata) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(meta)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sidecar_defaults_to_enabled_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let group = ToolGroup::new("dotnet", dir.path());
        assert!(group.is_enabled());
        assert!(dir.path().join("dotnet.json").exists());
    }

    #[test]
    fn toggle_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let group = ToolGroup::new("dotnet", dir.path());
            group.set_enabled(false).unwrap();
        }
        let reloaded = ToolGroup::new("dotnet", dir.path());
        assert!(!reloaded.is_enabled());
        let snap = reloaded.snapshot();
        assert_eq!(snap.tool_name, "dotnet");
        assert!(!snap.is_enabled);
    }

    #[test]
    fn corrupt_sidecar_falls_back_to_enabled() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dotnet.json"), b"not json").unwrap();
        let group = ToolGroup::new("dotnet", dir.path());
        assert!(group.is_enabled());
    }
}
