//! Per-version metadata sidecar.
//!
//! The sidecar sits next to each version folder as
//! `<versionFolder>.toolmeta.json` and records the last-known download
//! process so a restart (or a crash mid-download) can observe where the
//! pipeline stopped. Writes are atomic: marshal, write `<path>.tmp`,
//! rename.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ToolConfig;
use crate::error::Result;
use crate::progress::{
    is_zero_u32, is_zero_u64, DownloadProgress, DownloadStatus,
};

pub const METADATA_SUFFIX: &str = ".toolmeta.json";

/// Last-known state of the download pipeline. The zero value means "no
/// download in flight"; `completed` always resets to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadProcess {
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub current_download_url_index: u32,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DownloadStatus>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub attempt_index: u32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub total_attempts: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub current_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_urls: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub all_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolMetadata {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub download_url: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path_to_entry: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub print_info_cmd: Vec<String>,
    pub download_process: DownloadProcess,
}

pub fn load_metadata_file(path: &Path) -> Result<Option<ToolMetadata>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

pub fn write_metadata_file(path: &Path, meta: &ToolMetadata) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(meta)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

/// In-memory view of one sidecar, loaded lazily behind a mutex. The
/// stored URL list, entry path, and info command are refreshed from the
/// live config at load time because the persisted copies may be stale
/// after a catalog update.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    state: Mutex<Option<ToolMetadata>>,
}

impl MetadataStore {
    pub fn new(version_folder: &Path) -> MetadataStore {
        let mut os = version_folder.as_os_str().to_os_string();
        os.push(METADATA_SUFFIX);
        MetadataStore {
            path: PathBuf::from(os),
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self, config: &ToolConfig) -> ToolMetadata {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.ensure_locked(&mut state, config).clone()
    }

    pub fn download_process(&self, config: &ToolConfig) -> DownloadProcess {
        self.snapshot(config).download_process
    }

    /// Applies one progress event to the persisted record. Transitional
    /// states force a write even when the record looks unchanged so a
    /// restart can observe the last status.
    pub fn record_progress(&self, config: &ToolConfig, dp: &DownloadProgress) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let meta = self.ensure_locked(&mut state, config);
        let prev = meta.download_process.clone();
        let mut current = prev.clone();
        let mut force_persist = false;

        match dp.status {
            DownloadStatus::Trying => {
                current = DownloadProcess {
                    current_download_url_index: dp.attempt_index.saturating_sub(1),
                    file_size: dp.total_bytes,
                    status: Some(dp.status),
                    attempt_index: dp.attempt_index,
                    total_attempts: dp.total_attempts,
                    current_url: dp.current_url.clone(),
                    failed_urls: dp.failed_urls.clone(),
                    all_urls: dp.all_urls.clone(),
                };
                force_persist = true;
            }
            DownloadStatus::Downloading => {
                if dp.attempt_index > 0 {
                    current.current_download_url_index = dp.attempt_index - 1;
                }
                if dp.total_bytes > 0 {
                    current.file_size = dp.total_bytes;
                }
                apply_common(&mut current, dp);
            }
            DownloadStatus::Extracting => {
                if dp.total_bytes > 0 {
                    current.file_size = dp.total_bytes;
                }
                apply_common(&mut current, dp);
                force_persist = true;
            }
            DownloadStatus::Paused | DownloadStatus::Failed => {
                if dp.attempt_index > 0 {
                    current.current_download_url_index = dp.attempt_index - 1;
                }
                if dp.total_bytes > 0 {
                    current.file_size = dp.total_bytes;
                }
                apply_common(&mut current, dp);
                force_persist = true;
            }
            DownloadStatus::Completed => {
                current = DownloadProcess::default();
                force_persist = true;
            }
            DownloadStatus::Disabled => {
                apply_common(&mut current, dp);
                force_persist = true;
            }
            DownloadStatus::Uninstalled => {
                apply_common(&mut current, dp);
            }
        }

        let changed = current != prev;
        meta.download_process = current;
        if changed || force_persist {
            if let Err(e) = write_metadata_file(&self.path, meta) {
                warn!(path = %self.path.display(), "failed to persist tool metadata: {e}");
            }
        }
    }

    /// Zeroes the download-process record; `force` persists even when
    /// it already was the zero value.
    pub fn reset(&self, config: &ToolConfig, force: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let meta = self.ensure_locked(&mut state, config);
        meta.download_process = DownloadProcess::default();
        if force {
            if let Err(e) = write_metadata_file(&self.path, meta) {
                warn!(path = %self.path.display(), "failed to persist tool metadata: {e}");
            }
        }
    }

    /// Drops the cached record (uninstall path).
    pub fn clear_cache(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Removes the sidecar and its `.tmp` companion.
    pub fn delete_files(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let _ = fs::remove_file(tmp_path(&self.path));
        Ok(())
    }

    fn ensure_locked<'a>(
        &self,
        state: &'a mut Option<ToolMetadata>,
        config: &ToolConfig,
    ) -> &'a mut ToolMetadata {
        if state.is_none() {
            let loaded = match load_metadata_file(&self.path) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %self.path.display(), "failed to read tool metadata: {e}");
                    None
                }
            };
            let mut needs_save = loaded.is_none();
            let mut meta = loaded.unwrap_or_default();
            if merge_config(&mut meta, config) {
                needs_save = true;
            }
            if needs_save {
                if let Err(e) = write_metadata_file(&self.path, &meta) {
                    warn!(path = %self.path.display(), "failed to write tool metadata: {e}");
                }
            }
            *state = Some(meta);
        }
        state.as_mut().expect("metadata populated above")
    }
}

fn apply_common(current: &mut DownloadProcess, dp: &DownloadProgress) {
    current.status = Some(dp.status);
    current.attempt_index = dp.attempt_index;
    current.total_attempts = dp.total_attempts;
    current.current_url = dp.current_url.clone();
    current.failed_urls = dp.failed_urls.clone();
    current.all_urls = dp.all_urls.clone();
}

/// Overwrites the config-derived fields with the live catalog values.
/// Returns whether anything changed.
fn merge_config(meta: &mut ToolMetadata, config: &ToolConfig) -> bool {
    let mut changed = false;
    if meta.download_url != config.download_urls {
        meta.download_url = config.download_urls.clone();
        changed = true;
    }
    if meta.print_info_cmd != config.print_info_cmd {
        meta.print_info_cmd = config.print_info_cmd.clone();
        changed = true;
    }
    if meta.path_to_entry.trim() != config.entry_path {
        meta.path_to_entry = config.entry_path.clone();
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ToolConfig {
        ToolConfig {
            tool_name: "dotnet".into(),
            version: "8.0.5".into(),
            download_urls: vec!["https://example.com/dotnet.zip".into()],
            entry_path: "dotnet".into(),
            print_info_cmd: vec!["--info".into()],
            is_executable: true,
        }
    }

    fn store(dir: &Path) -> MetadataStore {
        MetadataStore::new(&dir.join("8.0.5"))
    }

    fn progress(status: DownloadStatus) -> DownloadProgress {
        let mut dp = DownloadProgress::new(status);
        dp.attempt_index = 1;
        dp.total_attempts = 2;
        dp.current_url = "https://example.com/dotnet.zip".into();
        dp.all_urls = vec![
            "https://example.com/dotnet.zip".into(),
            "https://mirror.example.com/dotnet.zip".into(),
        ];
        dp
    }

    #[test]
    fn sidecar_round_trip_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("8.0.5.toolmeta.json");
        let meta = ToolMetadata {
            download_url: vec!["https://example.com/a.zip".into()],
            path_to_entry: "bin/a".into(),
            print_info_cmd: vec!["--version".into()],
            download_process: DownloadProcess {
                status: Some(DownloadStatus::Paused),
                file_size: 1024,
                attempt_index: 2,
                total_attempts: 3,
                current_url: "https://example.com/a.zip".into(),
                ..Default::default()
            },
        };
        write_metadata_file(&path, &meta).unwrap();
        let loaded = load_metadata_file(&path).unwrap().unwrap();
        assert_eq!(loaded, meta);
        write_metadata_file(&path, &loaded).unwrap();
        assert_eq!(load_metadata_file(&path).unwrap().unwrap(), meta);
    }

    #[test]
    fn first_access_writes_defaults_merged_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let snap = store.snapshot(&config());
        assert_eq!(snap.download_url, vec!["https://example.com/dotnet.zip"]);
        assert_eq!(snap.path_to_entry, "dotnet");
        assert_eq!(snap.download_process, DownloadProcess::default());
        assert!(store.path().exists());
    }

    #[test]
    fn stale_sidecar_is_refreshed_from_live_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let stale = ToolMetadata {
            download_url: vec!["https://old.example.com/dotnet.zip".into()],
            path_to_entry: "old/dotnet".into(),
            print_info_cmd: Vec::new(),
            download_process: DownloadProcess::default(),
        };
        write_metadata_file(store.path(), &stale).unwrap();

        let snap = store.snapshot(&config());
        assert_eq!(snap.download_url, vec!["https://example.com/dotnet.zip"]);
        assert_eq!(snap.path_to_entry, "dotnet");
        assert_eq!(snap.print_info_cmd, vec!["--info"]);
    }

    #[test]
    fn completed_zeroes_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let cfg = config();

        let mut downloading = progress(DownloadStatus::Downloading);
        downloading.total_bytes = 100;
        downloading.downloaded_bytes = 30;
        store.record_progress(&cfg, &downloading);
        assert_eq!(store.download_process(&cfg).file_size, 100);

        store.record_progress(&cfg, &progress(DownloadStatus::Completed));
        assert_eq!(store.download_process(&cfg), DownloadProcess::default());

        // The persisted image is zeroed too.
        let on_disk = load_metadata_file(store.path()).unwrap().unwrap();
        assert_eq!(on_disk.download_process, DownloadProcess::default());
    }

    #[test]
    fn paused_persists_status_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let cfg = config();

        let mut paused = progress(DownloadStatus::Paused);
        paused.total_bytes = 1000;
        paused.downloaded_bytes = 300;
        store.record_progress(&cfg, &paused);

        let on_disk = load_metadata_file(store.path()).unwrap().unwrap();
        assert_eq!(on_disk.download_process.status, Some(DownloadStatus::Paused));
        assert_eq!(on_disk.download_process.file_size, 1000);
        assert_eq!(on_disk.download_process.attempt_index, 1);
    }

    #[test]
    fn trying_rebuilds_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let cfg = config();

        let mut failed = progress(DownloadStatus::Failed);
        failed.failed_urls = vec!["https://example.com/dotnet.zip".into()];
        store.record_progress(&cfg, &failed);

        let mut trying = progress(DownloadStatus::Trying);
        trying.attempt_index = 2;
        trying.current_url = "https://mirror.example.com/dotnet.zip".into();
        trying.failed_urls = vec!["https://example.com/dotnet.zip".into()];
        store.record_progress(&cfg, &trying);

        let dp = store.download_process(&cfg);
        assert_eq!(dp.status, Some(DownloadStatus::Trying));
        assert_eq!(dp.current_download_url_index, 1);
        assert_eq!(dp.current_url, "https://mirror.example.com/dotnet.zip");
    }

    #[test]
    fn delete_removes_sidecar_and_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.snapshot(&config());
        fs::write(tmp_path(store.path()), b"{}").unwrap();

        store.clear_cache();
        store.delete_files().unwrap();
        assert!(!store.path().exists());
        assert!(!tmp_path(store.path()).exists());
        // Idempotent.
        store.delete_files().unwrap();
    }
}
