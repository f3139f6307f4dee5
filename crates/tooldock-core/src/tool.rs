//! Tool handles and their lifecycle.
//!
//! A `Tool` is either a real downloaded tool backed by a version folder
//! and a metadata sidecar, or a dev override pointing at a local
//! binary. Handles are cached per install key by the engine so every
//! caller observes the same in-flight state (notably the pause flag).

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;
use uuid::Uuid;

use crate::config::ToolConfig;
use crate::download::{self, DownloadJob};
use crate::engine::Shared;
use crate::error::{Error, Result};
use crate::extract;
use crate::group::ToolGroup;
use crate::metadata::{DownloadProcess, MetadataStore, ToolMetadata};
use crate::progress::{DownloadProgress, DownloadStatus, ProgressMessage};
use crate::roots::Resolved;

pub type ProgressCallback = Arc<dyn Fn(ProgressMessage) + Send + Sync>;

pub enum Tool {
    Downloaded(DownloadedTool),
    Dev(DevTool),
}

impl Tool {
    pub fn name(&self) -> &str {
        match self {
            Tool::Downloaded(t) => &t.config.tool_name,
            Tool::Dev(t) => &t.name,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Tool::Downloaded(t) => &t.config.version,
            Tool::Dev(_) => "dev",
        }
    }

    pub fn install_key(&self) -> String {
        crate::config::install_key(self.name(), self.version())
    }

    pub fn exists(&self) -> bool {
        match self {
            Tool::Downloaded(t) => t.exists(),
            Tool::Dev(t) => t.exists(),
        }
    }

    pub async fn install(&self) -> Result<()> {
        match self {
            Tool::Downloaded(t) => t.install().await,
            Tool::Dev(_) => Ok(()),
        }
    }

    pub fn uninstall(&self) -> Result<()> {
        match self {
            Tool::Downloaded(t) => t.uninstall(),
            Tool::Dev(_) => Ok(()),
        }
    }

    pub fn pause(&self) {
        if let Tool::Downloaded(t) = self {
            t.pause();
        }
    }

    pub fn entry_path(&self) -> String {
        match self {
            Tool::Downloaded(t) => t.config.entry_path.clone(),
            Tool::Dev(t) => t.exe_path.to_string_lossy().into_owned(),
        }
    }

    /// Where the artifact lives on disk, if anywhere.
    pub fn storage_folder(&self) -> Option<PathBuf> {
        match self {
            Tool::Downloaded(t) => t.storage_folder(),
            Tool::Dev(t) => t.exe_path.parent().map(Path::to_path_buf),
        }
    }

    /// Where the artifact is launched from; differs from the storage
    /// folder only when exec-permission staging relocated it.
    pub fn exec_folder(&self) -> Option<PathBuf> {
        match self {
            Tool::Downloaded(t) => t.exec_folder(),
            Tool::Dev(t) => t.exe_path.parent().map(Path::to_path_buf),
        }
    }

    pub fn tool_path(&self) -> Option<PathBuf> {
        match self {
            Tool::Downloaded(t) => t.tool_path(),
            Tool::Dev(t) => t.exists().then(|| t.exe_path.clone()),
        }
    }

    pub fn is_from_read_only_root(&self) -> bool {
        match self {
            Tool::Downloaded(t) => t.is_from_read_only_root(),
            Tool::Dev(_) => false,
        }
    }

    pub fn install_source(&self) -> String {
        match self {
            Tool::Downloaded(t) => t
                .config
                .download_urls
                .first()
                .cloned()
                .unwrap_or_default(),
            Tool::Dev(_) => "dev-override".to_string(),
        }
    }

    pub fn print_info_cmd(&self) -> &[String] {
        match self {
            Tool::Downloaded(t) => &t.config.print_info_cmd,
            Tool::Dev(_) => &[],
        }
    }

    pub fn create_exec_cmd(&self, args: &[String]) -> Result<Command> {
        let path = self
            .tool_path()
            .ok_or_else(|| Error::ToolNotFound(self.install_key()))?;
        let mut cmd = Command::new(path);
        cmd.args(args);
        Ok(cmd)
    }

    pub fn info_string(&self) -> String {
        match self {
            Tool::Downloaded(t) => t.info_string(),
            Tool::Dev(t) => format!("dev override: {}", t.exe_path.display()),
        }
    }

    pub fn as_downloaded(&self) -> Option<&DownloadedTool> {
        match self {
            Tool::Downloaded(t) => Some(t),
            Tool::Dev(_) => None,
        }
    }
}

pub struct DownloadedTool {
    config: ToolConfig,
    group: Arc<ToolGroup>,
    shared: Arc<Shared>,
    /// Cooperative pause flag sampled by the download read loop.
    paused: AtomicBool,
    metadata: MetadataStore,
    callback: Mutex<Option<ProgressCallback>>,
}

impl DownloadedTool {
    pub(crate) fn new(
        config: ToolConfig,
        group: Arc<ToolGroup>,
        shared: Arc<Shared>,
    ) -> DownloadedTool {
        let metadata =
            MetadataStore::new(&shared.roots.writable_folder(&config.tool_name, &config.version));
        DownloadedTool {
            config,
            group,
            shared,
            paused: AtomicBool::new(false),
            metadata,
            callback: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.group.is_enabled()
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.group.set_enabled(enabled)
    }

    /// Routes progress to the per-request callback when one is set,
    /// otherwise to the global broker. Callback scope is one install.
    pub fn set_progress_callback(&self, callback: Option<ProgressCallback>) {
        *self.callback.lock().unwrap_or_else(|e| e.into_inner()) = callback;
    }

    pub fn download_process(&self) -> DownloadProcess {
        self.metadata.download_process(&self.config)
    }

    pub fn metadata_snapshot(&self) -> ToolMetadata {
        self.metadata.snapshot(&self.config)
    }

    fn emit(&self, dp: DownloadProgress) {
        self.metadata.record_progress(&self.config, &dp);
        let msg =
            ProgressMessage::from_progress(&self.config.tool_name, &self.config.version, &dp);
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match callback {
            Some(cb) => cb(msg),
            None => self.shared.broker.publish(msg),
        }
    }

    fn emit_failure(&self, err: &Error) {
        let mut dp = DownloadProgress::new(DownloadStatus::Failed);
        dp.error = Some(err.to_string());
        self.emit(dp);
    }

    fn resolve(&self) -> Option<Resolved> {
        self.shared
            .roots
            .resolve(&self.config.tool_name, &self.config.version, &self.config.entry_path)
    }

    pub fn exists(&self) -> bool {
        self.resolve().is_some()
    }

    pub fn storage_folder(&self) -> Option<PathBuf> {
        self.resolve().map(|r| r.folder)
    }

    pub fn writable_folder(&self) -> PathBuf {
        self.shared
            .roots
            .writable_folder(&self.config.tool_name, &self.config.version)
    }

    pub fn is_from_read_only_root(&self) -> bool {
        self.resolve()
            .map(|r| self.shared.roots.is_read_only_root(&r.root))
            .unwrap_or(false)
    }

    pub fn exec_folder(&self) -> Option<PathBuf> {
        let resolved = self.resolve()?;
        if self.shared.roots.tmp_exec_root().is_none()
            || self.shared.exec_probe.supported(&resolved.folder)
        {
            return Some(resolved.folder);
        }
        self.shared
            .roots
            .exec_tool_folder(&self.config.tool_name, &self.config.version)
    }

    /// Entry path to launch, copying into the exec root on demand when
    /// the storage folder sits on a `noexec` mount.
    pub fn tool_path(&self) -> Option<PathBuf> {
        let resolved = self.resolve()?;
        if self.shared.roots.tmp_exec_root().is_none()
            || self.shared.exec_probe.supported(&resolved.folder)
        {
            return Some(resolved.entry);
        }
        let exec_folder = self
            .shared
            .roots
            .exec_tool_folder(&self.config.tool_name, &self.config.version)?;
        if !exec_folder.is_dir() {
            let _ = fs::create_dir_all(&exec_folder);
            let _ = copy_dir(&resolved.folder, &exec_folder);
        }
        Some(exec_folder.join(&self.config.entry_path))
    }

    pub fn info_string(&self) -> String {
        if self.config.print_info_cmd.is_empty() || !self.exists() {
            return String::new();
        }
        let path = match self.tool_path() {
            Some(path) => path,
            None => return String::new(),
        };
        let mut cmd = Command::new(path);
        cmd.args(&self.config.print_info_cmd);
        match cmd.output() {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                text
            }
            Err(_) => String::new(),
        }
    }

    /// Requests a cooperative pause; the download loop observes the
    /// flag on its next read. Idempotent, no lock required.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub(crate) async fn install(&self) -> Result<()> {
        let folder = self.writable_folder();
        let _guard = self.shared.locks.try_lock(&folder).ok_or(Error::Busy)?;
        let _active = self.shared.active.mark(self.config.install_key());
        self.paused.store(false, Ordering::Release);

        if self.exists() {
            self.metadata.reset(&self.config, true);
            self.emit(DownloadProgress::new(DownloadStatus::Completed));
            return Ok(());
        }

        self.download_all(&folder).await?;
        self.exec_post_check().await?;
        self.emit(DownloadProgress::new(DownloadStatus::Completed));
        Ok(())
    }

    async fn download_all(&self, folder: &Path) -> Result<()> {
        if !folder.exists() {
            if let Err(e) = fs::create_dir_all(folder) {
                let err: Error = e.into();
                self.emit_failure(&err);
                return Err(err);
            }
        }
        let staging = extract::staging_dir(folder);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        if self.config.download_urls.iter().all(|u| u.trim().is_empty()) {
            let err = Error::NoDownloadUrls(self.config.install_key());
            self.emit_failure(&err);
            return Err(err);
        }

        let emit = |dp: DownloadProgress| self.emit(dp);
        let job = DownloadJob {
            client: &self.shared.client,
            folder,
            paused: &self.paused,
            limit_bps: self.shared.limit_bps,
            emit: &emit,
        };
        job.run(&self.config.download_urls).await
    }

    /// Verifies the freshly installed tree is actually runnable,
    /// relocating it into the exec root when the storage root is
    /// mounted `noexec`.
    async fn exec_post_check(&self) -> Result<()> {
        if !self.config.is_executable {
            return Ok(());
        }
        let storage = match self.storage_folder() {
            Some(folder) => folder,
            None => {
                let err = Error::StorageFolderMissing;
                self.emit_failure(&err);
                return Err(err);
            }
        };
        if self.shared.exec_probe.supported(&storage) {
            return Ok(());
        }

        let exec_folder = match self
            .shared
            .roots
            .exec_tool_folder(&self.config.tool_name, &self.config.version)
        {
            Some(folder) => folder,
            None => {
                let err = Error::NoExecRoot;
                self.emit_failure(&err);
                return Err(err);
            }
        };
        // Probe the target before paying for the copy.
        if !self.shared.exec_probe.supported(&exec_folder) {
            let err = Error::ExecUnsupported(exec_folder);
            self.emit_failure(&err);
            return Err(err);
        }
        if let Err(e) = fs::create_dir_all(&exec_folder) {
            let err: Error = e.into();
            self.emit_failure(&err);
            return Err(err);
        }
        info!(
            from = %storage.display(),
            to = %exec_folder.display(),
            "storage root is not executable, relocating"
        );
        let src = storage.clone();
        let dst = exec_folder.clone();
        let copied = tokio::task::spawn_blocking(move || copy_dir(&src, &dst))
            .await
            .map_err(|e| Error::Task(e.to_string()))?;
        if let Err(e) = copied {
            let _ = fs::remove_dir_all(&exec_folder);
            let err: Error = e.into();
            self.emit_failure(&err);
            return Err(err);
        }
        if !crate::execprobe::ExecProbe::probe(&exec_folder) {
            let _ = fs::remove_dir_all(&exec_folder);
            let err = Error::ExecUnsupported(exec_folder);
            self.emit_failure(&err);
            return Err(err);
        }
        Ok(())
    }

    pub(crate) fn uninstall(&self) -> Result<()> {
        let folder = self.writable_folder();
        let _guard = self.shared.locks.try_lock(&folder).ok_or(Error::Busy)?;

        if folder.exists() {
            let parent = folder.parent().unwrap_or_else(|| Path::new("."));
            let base = folder
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let trash = parent.join(format!(".trash-{base}-{}", Uuid::new_v4()));
            match fs::rename(&folder, &trash) {
                Ok(()) => {
                    let _ = fs::remove_dir_all(&trash);
                }
                Err(_) => {
                    let _ = fs::remove_dir_all(&folder);
                }
            }
        }
        // An interrupted download may have left a staging dir beside
        // the version folder.
        let staging = extract::staging_dir(&folder);
        if staging.exists() {
            let _ = fs::remove_dir_all(&staging);
        }
        if let Some(exec_copy) = self
            .shared
            .roots
            .exec_tool_folder(&self.config.tool_name, &self.config.version)
        {
            let _ = fs::remove_dir_all(&exec_copy);
        }

        self.metadata.clear_cache();
        self.metadata.delete_files()?;
        Ok(())
    }

    /// Bytes already sitting in the temp file and the last known total.
    /// Falls back to a HEAD probe only when a partial file exists but
    /// no total was ever recorded.
    pub async fn partial_download_info(&self) -> (u64, u64) {
        let process = self.metadata.download_process(&self.config);
        let folder = self.writable_folder();
        let existing = download::partial_file_path(&folder, &self.config.download_urls)
            .and_then(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);
        let mut total = process.file_size;
        if total == 0 && existing > 0 {
            if let Some(url) = self
                .config
                .download_urls
                .iter()
                .find(|u| !u.trim().is_empty())
            {
                if let Ok(head) = download::head_info(&self.shared.client, url).await {
                    total = head.content_length;
                }
            }
        }
        (existing, total)
    }
}

/// Dev-override tool: a local path that bypasses download entirely.
pub struct DevTool {
    name: String,
    exe_path: PathBuf,
}

impl DevTool {
    pub fn new(name: &str, exe_path: PathBuf) -> DevTool {
        DevTool {
            name: name.to_string(),
            exe_path,
        }
    }

    pub fn exists(&self) -> bool {
        self.exe_path.is_file()
    }
}

/// Recursive copy preserving file modes. Symlinks are skipped.
pub(crate) fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let meta = fs::symlink_metadata(entry.path())?;
        if meta.file_type().is_symlink() {
            continue;
        }
        let target = dst.join(entry.file_name());
        if meta.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, Settings};

    fn engine(dir: &Path) -> Engine {
        Engine::new(Settings {
            writable_root: dir.join("tools"),
            read_only_roots: vec![dir.join("ro")],
            tmp_exec_root: None,
            download_limit_bps: Some(0),
        })
        .unwrap()
    }

    fn catalog_with(url: &str) -> String {
        format!(
            r#"{{"demo": {{"1.0.0": {{"downloadUrl": "{url}", "pathToEntry": "demo.sh"}}}}}}"#
        )
    }

    fn seed_installed(engine: &Engine, name: &str, version: &str, entry: &str) -> PathBuf {
        let folder = engine.roots().writable_folder(name, version);
        fs::create_dir_all(&folder).unwrap();
        let path = folder.join(entry);
        fs::write(&path, b"#!/bin/sh\necho demo\n").unwrap();
        path
    }

    #[tokio::test]
    async fn install_fast_path_when_entry_exists() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        engine
            .load_catalog_bytes(catalog_with("https://example.invalid/demo.zip").as_bytes())
            .unwrap();
        seed_installed(&engine, "demo", "1.0.0", "demo.sh");

        let tool = engine.get_tool_with_version("demo", "1.0.0").unwrap();
        let mut sub = engine.subscribe_progress();
        tool.install().await.unwrap();

        let msg = sub.try_recv().unwrap();
        assert_eq!(msg.status, DownloadStatus::Completed);
        // The sidecar's download process is the zero value.
        let dt = tool.as_downloaded().unwrap();
        assert_eq!(dt.download_process(), DownloadProcess::default());
    }

    #[tokio::test]
    async fn empty_url_list_fails_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        engine
            .load_catalog_bytes(catalog_with("https://example.invalid/demo.zip").as_bytes())
            .unwrap();
        let tool = engine.get_tool_with_version("demo", "1.0.0").unwrap();
        let dt = tool.as_downloaded().unwrap();

        // Force an empty mirror list through a doctored config.
        let mut config = dt.config().clone();
        config.download_urls = vec!["".into()];
        let doctored = DownloadedTool::new(
            config,
            engine.group("demo"),
            engine.shared_for_tests(),
        );
        let err = doctored.install().await.unwrap_err();
        assert!(matches!(err, Error::NoDownloadUrls(_)));
    }

    #[tokio::test]
    async fn uninstall_is_idempotent_and_removes_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        engine
            .load_catalog_bytes(catalog_with("https://example.invalid/demo.zip").as_bytes())
            .unwrap();
        seed_installed(&engine, "demo", "1.0.0", "demo.sh");

        let tool = engine.get_tool_with_version("demo", "1.0.0").unwrap();
        let dt = tool.as_downloaded().unwrap();
        // Materialize the sidecar like a real install would.
        let _ = dt.metadata_snapshot();
        assert!(dt.metadata.path().exists());

        tool.uninstall().unwrap();
        assert!(!tool.exists());
        assert!(!dt.metadata.path().exists());
        assert!(!dt.writable_folder().exists());

        // Second uninstall succeeds.
        tool.uninstall().unwrap();
    }

    #[tokio::test]
    async fn uninstall_never_touches_read_only_roots() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        engine
            .load_catalog_bytes(catalog_with("https://example.invalid/demo.zip").as_bytes())
            .unwrap();

        // Preinstalled copy in the read-only root.
        let ro_folder = engine
            .roots()
            .tool_folder(&dir.path().join("ro"), "demo", "1.0.0");
        fs::create_dir_all(&ro_folder).unwrap();
        fs::write(ro_folder.join("demo.sh"), b"#!/bin/sh\n").unwrap();

        let tool = engine.get_tool_with_version("demo", "1.0.0").unwrap();
        assert!(tool.is_from_read_only_root());
        tool.uninstall().unwrap();
        // Still resolvable: the read-only copy survives.
        assert!(tool.exists());
        assert!(ro_folder.join("demo.sh").exists());
    }

    #[tokio::test]
    async fn uninstall_while_locked_returns_busy() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        engine
            .load_catalog_bytes(catalog_with("https://example.invalid/demo.zip").as_bytes())
            .unwrap();
        let tool = engine.get_tool_with_version("demo", "1.0.0").unwrap();
        let dt = tool.as_downloaded().unwrap();

        let _guard = engine
            .shared_for_tests()
            .locks
            .try_lock(&dt.writable_folder())
            .unwrap();
        let err = tool.uninstall().unwrap_err();
        assert!(err.is_busy());
    }

    #[test]
    fn copy_dir_skips_symlinks_and_preserves_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("file.txt"), b"data").unwrap();
        fs::write(src.join("nested/inner.txt"), b"inner").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(src.join("file.txt"), src.join("link.txt")).unwrap();

        copy_dir(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("file.txt")).unwrap(), "data");
        assert_eq!(
            fs::read_to_string(dst.join("nested/inner.txt")).unwrap(),
            "inner"
        );
        assert!(!dst.join("link.txt").exists());
    }
}
