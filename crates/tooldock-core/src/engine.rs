//! The engine: catalog, tool-handle cache, version selection, runtime
//! discovery, groups, dev overrides, and the administrative cleanup
//! operations. One `Engine` instance owns all process-wide state so
//! tests stay isolated.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::active::ActiveInstalls;
use crate::cleanup;
use crate::config::{install_key, Catalog, ToolConfig};
use crate::dev;
use crate::download::parse_download_limit;
use crate::error::{Error, Result};
use crate::execprobe::ExecProbe;
use crate::group::{ToolGroup, ToolGroupSnapshot};
use crate::locks::FolderLocks;
use crate::metadata::{load_metadata_file, METADATA_SUFFIX};
use crate::platform;
use crate::progress::{ProgressBroker, ProgressMessage, Subscription};
use crate::roots::Roots;
use crate::tool::{DevTool, DownloadedTool, ProgressCallback, Tool};
use crate::version;

/// Env var consulted when no programmatic rate limit is set. Bytes per
/// second; `_` and `,` digit separators accepted; 0 disables limiting.
pub const DOWNLOAD_LIMIT_ENV: &str = "DOWNLOAD_LIMIT_BPS";

const DISCOVERY_INTERVAL: Duration = Duration::from_secs(10);

/// Construction-time configuration; replaces the globals of a typical
/// singleton design so multiple engines can coexist in one process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub writable_root: PathBuf,
    /// Searched before the writable root, in order. Never written.
    pub read_only_roots: Vec<PathBuf>,
    /// Relocation root for `noexec` storage; `None` disables staging.
    pub tmp_exec_root: Option<PathBuf>,
    /// `None` falls back to `DOWNLOAD_LIMIT_BPS`.
    pub download_limit_bps: Option<u64>,
}

/// State shared between the engine and every tool handle it creates.
pub(crate) struct Shared {
    pub roots: Roots,
    pub limit_bps: u64,
    pub locks: FolderLocks,
    pub active: ActiveInstalls,
    pub exec_probe: ExecProbe,
    pub broker: Arc<ProgressBroker>,
    pub client: reqwest::Client,
}

struct Discovered {
    configs: HashMap<String, ToolConfig>,
    last_scan: Option<Instant>,
}

pub struct Engine {
    shared: Arc<Shared>,
    catalog: RwLock<Catalog>,
    tools: RwLock<HashMap<String, Arc<Tool>>>,
    groups: RwLock<HashMap<String, Arc<ToolGroup>>>,
    discovered: Mutex<Discovered>,
    dev_overrides: RwLock<HashMap<String, PathBuf>>,
}

/// Version pick strategy for name-only lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VersionStrategy {
    PreferInstalled,
    LatestAvailable,
    OnlyInstalled,
}

impl Engine {
    pub fn new(settings: Settings) -> Result<Engine> {
        let limit_bps = settings.download_limit_bps.unwrap_or_else(|| {
            std::env::var(DOWNLOAD_LIMIT_ENV)
                .map(|raw| parse_download_limit(&raw))
                .unwrap_or(0)
        });
        let roots = Roots::new(
            settings.writable_root,
            settings.read_only_roots,
            settings.tmp_exec_root,
        );
        cleanup::sweep_trash(&roots);

        let client = reqwest::Client::builder()
            .user_agent(concat!("tooldock/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Engine {
            shared: Arc::new(Shared {
                roots,
                limit_bps,
                locks: FolderLocks::new(),
                active: ActiveInstalls::new(),
                exec_probe: ExecProbe::new(),
                broker: Arc::new(ProgressBroker::new()),
                client,
            }),
            catalog: RwLock::new(Catalog::default()),
            tools: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            discovered: Mutex::new(Discovered {
                configs: HashMap::new(),
                last_scan: None,
            }),
            dev_overrides: RwLock::new(HashMap::new()),
        })
    }

    pub fn roots(&self) -> &Roots {
        &self.shared.roots
    }

    pub fn broker(&self) -> Arc<ProgressBroker> {
        Arc::clone(&self.shared.broker)
    }

    pub fn subscribe_progress(&self) -> Subscription {
        self.shared.broker.subscribe()
    }

    pub fn publish_progress(&self, msg: ProgressMessage) {
        self.shared.broker.publish(msg);
    }

    pub fn load_catalog_file(&self, path: &Path) -> Result<()> {
        let catalog = Catalog::load(path)?;
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = catalog;
        Ok(())
    }

    pub fn load_catalog_bytes(&self, data: &[u8]) -> Result<()> {
        let catalog = Catalog::from_slice(data, platform::os(), platform::arch())?;
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = catalog;
        Ok(())
    }

    pub fn active_installs(&self) -> Vec<String> {
        self.shared.active.list()
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.shared.active.is_active(key)
    }

    // ---- dev overrides -------------------------------------------------

    pub fn load_dev_overrides_from_env(&self) {
        let found = dev::overrides_from_env();
        if found.is_empty() {
            return;
        }
        let mut overrides = self
            .dev_overrides
            .write()
            .unwrap_or_else(|e| e.into_inner());
        overrides.extend(found);
    }

    pub fn set_dev_override(&self, name: &str, exe_path: PathBuf) {
        if name.is_empty() {
            return;
        }
        self.dev_overrides
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_lowercase(), exe_path);
    }

    pub fn clear_dev_override(&self, name: &str) {
        self.dev_overrides
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&name.to_lowercase());
    }

    fn dev_override(&self, name: &str) -> Option<PathBuf> {
        self.dev_overrides
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&name.to_lowercase())
            .cloned()
    }

    // ---- groups --------------------------------------------------------

    pub fn group(&self, name: &str) -> Arc<ToolGroup> {
        {
            let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
            if let Some(group) = groups.get(name) {
                return Arc::clone(group);
            }
        }
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            groups
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ToolGroup::new(name, &self.shared.roots.groups_dir()))),
        )
    }

    pub fn set_group_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::ToolNotFound(String::new()));
        }
        self.group(name).set_enabled(enabled)
    }

    pub fn is_group_enabled(&self, name: &str) -> bool {
        self.group(name.trim()).is_enabled()
    }

    /// All known groups: configured names, instantiated groups, and
    /// `_groups/*.json` leftovers on disk. Sorted by name.
    pub fn group_snapshots(&self) -> Vec<ToolGroupSnapshot> {
        let mut names: HashSet<String> = HashSet::new();
        for key in self.all_configs().keys() {
            if let Some((name, _)) = crate::config::split_install_key(key) {
                names.insert(name.to_string());
            }
        }
        {
            let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
            names.extend(groups.keys().cloned());
        }
        if let Ok(entries) = std::fs::read_dir(self.shared.roots.groups_dir()) {
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy().into_owned();
                if let Some(name) = file_name.strip_suffix(".json") {
                    if !name.is_empty() {
                        names.insert(name.to_string());
                    }
                }
            }
        }
        let mut snapshots: Vec<ToolGroupSnapshot> = names
            .into_iter()
            .map(|name| self.group(&name).snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
        snapshots
    }

    // ---- configs and discovery ----------------------------------------

    /// Catalog entries merged with runtime-discovered ones; the catalog
    /// wins on key collisions.
    pub fn all_configs(&self) -> HashMap<String, ToolConfig> {
        let mut result: HashMap<String, ToolConfig> = self
            .catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .tools
            .clone();
        self.refresh_discovered(false);
        let discovered = self.discovered.lock().unwrap_or_else(|e| e.into_inner());
        for (key, config) in discovered.configs.iter() {
            result
                .entry(key.clone())
                .or_insert_with(|| config.clone());
        }
        result
    }

    fn config_by_key(&self, key: &str) -> Option<ToolConfig> {
        {
            let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
            if let Some(config) = catalog.tools.get(key) {
                return Some(config.clone());
            }
        }
        self.refresh_discovered(false);
        self.discovered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .configs
            .get(key)
            .cloned()
    }

    /// Scans candidate roots for metadata sidecars whose recorded entry
    /// still exists, so an installed-but-unconfigured tool still shows
    /// up in listings. Rate-limited unless forced.
    pub fn refresh_discovered(&self, force: bool) {
        let mut discovered = self.discovered.lock().unwrap_or_else(|e| e.into_inner());
        if !force {
            if let Some(last) = discovered.last_scan {
                if last.elapsed() < DISCOVERY_INTERVAL {
                    return;
                }
            }
        }
        let mut aggregated = HashMap::new();
        for root in self.shared.roots.candidates() {
            for (key, config) in discover_under_root(&root) {
                aggregated.entry(key).or_insert(config);
            }
        }
        discovered.configs = aggregated;
        discovered.last_scan = Some(Instant::now());
    }

    // ---- tool lookup ---------------------------------------------------

    /// Highest installed version, falling back to the latest available.
    pub fn get_tool(&self, name: &str) -> Result<Arc<Tool>> {
        self.get_tool_auto(name, VersionStrategy::PreferInstalled)
    }

    /// Latest version in the catalog, installed or not.
    pub fn get_tool_latest(&self, name: &str) -> Result<Arc<Tool>> {
        self.get_tool_auto(name, VersionStrategy::LatestAvailable)
    }

    /// Highest installed version; errors when nothing is installed.
    pub fn get_tool_installed(&self, name: &str) -> Result<Arc<Tool>> {
        self.get_tool_auto(name, VersionStrategy::OnlyInstalled)
    }

    fn get_tool_auto(&self, name: &str, strategy: VersionStrategy) -> Result<Arc<Tool>> {
        if let Some(exe_path) = self.dev_override(name) {
            let dev = DevTool::new(name, exe_path);
            if dev.exists() {
                return Ok(Arc::new(Tool::Dev(dev)));
            }
            // A stale override path falls through to the normal flow.
        }

        let versions = self.available_versions(name);
        if versions.is_empty() {
            return Err(Error::ToolNotFound(name.to_string()));
        }

        let selected = match strategy {
            VersionStrategy::PreferInstalled => self
                .highest_installed(name, &versions)
                .or_else(|| version::latest_of(versions.iter().map(String::as_str))),
            VersionStrategy::LatestAvailable => {
                version::latest_of(versions.iter().map(String::as_str))
            }
            VersionStrategy::OnlyInstalled => {
                let installed = self.highest_installed(name, &versions);
                if installed.is_none() {
                    return Err(Error::NoInstalledVersion(name.to_string()));
                }
                installed
            }
        };
        let selected = selected.ok_or_else(|| Error::ToolNotFound(name.to_string()))?;
        self.get_tool_with_version(name, &selected)
    }

    pub fn get_tool_with_version(&self, name: &str, tool_version: &str) -> Result<Arc<Tool>> {
        let key = install_key(name, tool_version);
        {
            let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
            if let Some(tool) = tools.get(&key) {
                return Ok(Arc::clone(tool));
            }
        }

        let config = self
            .config_by_key(&key)
            .ok_or_else(|| Error::ToolNotFound(key.clone()))?;
        let group = self.group(&config.tool_name);
        let tool = Arc::new(Tool::Downloaded(DownloadedTool::new(
            config,
            group,
            Arc::clone(&self.shared),
        )));

        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        // Another caller may have won the race; keep the first handle so
        // in-flight state stays consistent.
        Ok(Arc::clone(tools.entry(key).or_insert(tool)))
    }

    fn available_versions(&self, name: &str) -> Vec<String> {
        let prefix = format!("{name}@");
        self.all_configs()
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn highest_installed(&self, name: &str, versions: &[String]) -> Option<String> {
        let installed: Vec<&str> = versions
            .iter()
            .filter(|v| {
                self.config_by_key(&install_key(name, v))
                    .map(|config| {
                        self.shared
                            .roots
                            .installed(name, v, &config.entry_path)
                    })
                    .unwrap_or(false)
            })
            .map(String::as_str)
            .collect();
        version::latest_of(installed)
    }

    // ---- operations ----------------------------------------------------

    /// Installs `name@version`. A paused download is success-with-no-
    /// progress here, not an error.
    pub async fn install(&self, name: &str, tool_version: &str) -> Result<()> {
        let tool = self.get_tool_with_version(name, tool_version)?;
        match tool.install().await {
            Err(e) if e.is_paused() => Ok(()),
            other => other,
        }
    }

    /// Same as [`install`](Self::install) but routes this install's
    /// progress to `callback` instead of the broker.
    pub async fn install_with_callback(
        &self,
        name: &str,
        tool_version: &str,
        callback: ProgressCallback,
    ) -> Result<()> {
        let tool = self.get_tool_with_version(name, tool_version)?;
        if let Some(dt) = tool.as_downloaded() {
            dt.set_progress_callback(Some(callback));
        }
        let result = tool.install().await;
        if let Some(dt) = tool.as_downloaded() {
            dt.set_progress_callback(None);
        }
        match result {
            Err(e) if e.is_paused() => Ok(()),
            other => other,
        }
    }

    /// Uninstalls and broadcasts `uninstalled` so clients clear state.
    pub fn uninstall(&self, name: &str, tool_version: &str) -> Result<()> {
        let tool = self.get_tool_with_version(name, tool_version)?;
        tool.uninstall()?;
        self.shared.broker.publish(ProgressMessage::status_only(
            name,
            tool_version,
            crate::progress::DownloadStatus::Uninstalled,
        ));
        Ok(())
    }

    pub fn pause(&self, name: &str, tool_version: &str) -> Result<()> {
        let tool = self.get_tool_with_version(name, tool_version)?;
        tool.pause();
        Ok(())
    }

    pub async fn partial_download_info(
        &self,
        name: &str,
        tool_version: &str,
    ) -> Result<(u64, u64)> {
        let tool = self.get_tool_with_version(name, tool_version)?;
        match tool.as_downloaded() {
            Some(dt) => Ok(dt.partial_download_info().await),
            None => Ok((0, 0)),
        }
    }

    pub fn info_string(&self, name: &str, tool_version: &str) -> Result<String> {
        let tool = self.get_tool_with_version(name, tool_version)?;
        Ok(tool.info_string())
    }

    /// Pretty JSON of the metadata sidecar.
    pub fn metadata_json(&self, name: &str, tool_version: &str) -> Result<String> {
        let tool = self.get_tool_with_version(name, tool_version)?;
        let dt = tool
            .as_downloaded()
            .ok_or_else(|| Error::NoMetadata(install_key(name, tool_version)))?;
        Ok(serde_json::to_string_pretty(&dt.metadata_snapshot())?)
    }

    // ---- cleanup -------------------------------------------------------

    /// Removes writable-root versions not present in the catalog.
    pub fn delete_unknown(&self) -> Result<Vec<PathBuf>> {
        let allowed: HashSet<String> = {
            let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
            if catalog.is_empty() {
                return Err(Error::CatalogNotLoaded);
            }
            catalog.tools.keys().cloned().collect()
        };
        Ok(cleanup::prune_versions(
            &self.shared.roots,
            &self.shared.locks,
            &allowed,
        ))
    }

    /// Removes every writable-root version not named in `keep`.
    pub fn delete_all_except(&self, keep: &[String]) -> Vec<PathBuf> {
        let allowed: HashSet<String> = keep.iter().cloned().collect();
        cleanup::prune_versions(&self.shared.roots, &self.shared.locks, &allowed)
    }

    #[cfg(test)]
    pub(crate) fn shared_for_tests(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }
}

/// One root's `<os>/<arch>` subtree scanned for version folders with a
/// valid sidecar and a live entry file.
fn discover_under_root(root: &Path) -> HashMap<String, ToolConfig> {
    let mut result = HashMap::new();
    let os_arch = root.join(platform::os()).join(platform::arch());
    let tool_dirs = match std::fs::read_dir(&os_arch) {
        Ok(entries) => entries,
        Err(_) => return result,
    };
    for tool_entry in tool_dirs.flatten() {
        if !tool_entry.path().is_dir() {
            continue;
        }
        let tool_name = tool_entry.file_name().to_string_lossy().trim().to_string();
        if tool_name.is_empty() || tool_name == "_groups" {
            continue;
        }
        let version_dirs = match std::fs::read_dir(tool_entry.path()) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for version_entry in version_dirs.flatten() {
            if !version_entry.path().is_dir() {
                continue;
            }
            let version = version_entry.file_name().to_string_lossy().trim().to_string();
            if version.is_empty()
                || version.starts_with(".tmp_")
                || version.starts_with(".trash-")
            {
                continue;
            }
            let folder = version_entry.path();
            let mut sidecar_candidates = Vec::with_capacity(2);
            let mut sibling = folder.as_os_str().to_os_string();
            sibling.push(METADATA_SUFFIX);
            sidecar_candidates.push(PathBuf::from(sibling));
            sidecar_candidates.push(folder.join(METADATA_SUFFIX));

            let mut meta = None;
            for candidate in sidecar_candidates {
                if !candidate.is_file() {
                    continue;
                }
                match load_metadata_file(&candidate) {
                    Ok(Some(loaded)) => {
                        meta = Some(loaded);
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(path = %candidate.display(), "failed to parse tool metadata: {e}");
                    }
                }
            }
            let Some(meta) = meta else { continue };
            let entry_rel = meta.path_to_entry.trim().to_string();
            if entry_rel.is_empty() || !folder.join(&entry_rel).is_file() {
                continue;
            }
            let key = install_key(&tool_name, &version);
            result.entry(key).or_insert(ToolConfig {
                tool_name: tool_name.clone(),
                version: version.clone(),
                download_urls: meta.download_url.clone(),
                entry_path: entry_rel,
                print_info_cmd: meta.print_info_cmd.clone(),
                is_executable: true,
            });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{write_metadata_file, ToolMetadata};
    use std::fs;

    fn settings(dir: &Path) -> Settings {
        Settings {
            writable_root: dir.join("tools"),
            read_only_roots: vec![dir.join("ro")],
            tmp_exec_root: None,
            download_limit_bps: Some(0),
        }
    }

    fn catalog_json() -> &'static [u8] {
        br#"{
            "dotnet": {
                "8.0.4": {"downloadUrl": "https://example.invalid/d4.zip", "pathToEntry": "dotnet"},
                "8.0.5": {"downloadUrl": "https://example.invalid/d5.zip", "pathToEntry": "dotnet"}
            },
            "ffmpeg": {
                "6.0": {"downloadUrl": "https://example.invalid/f.tar.gz", "pathToEntry": "bin/ffmpeg"}
            }
        }"#
    }

    fn seed_version(engine: &Engine, name: &str, version: &str, entry: &str) {
        let folder = engine.roots().writable_folder(name, version);
        fs::create_dir_all(folder.join(Path::new(entry).parent().unwrap_or(Path::new("")))).unwrap();
        fs::write(folder.join(entry), b"bin").unwrap();
    }

    #[test]
    fn latest_available_when_nothing_installed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(settings(dir.path())).unwrap();
        engine.load_catalog_bytes(catalog_json()).unwrap();

        let tool = engine.get_tool("dotnet").unwrap();
        assert_eq!(tool.version(), "8.0.5");
        assert!(engine.get_tool_installed("dotnet").is_err());
    }

    #[test]
    fn prefers_highest_installed_version() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(settings(dir.path())).unwrap();
        engine.load_catalog_bytes(catalog_json()).unwrap();
        seed_version(&engine, "dotnet", "8.0.4", "dotnet");

        let tool = engine.get_tool("dotnet").unwrap();
        assert_eq!(tool.version(), "8.0.4");
        // Latest ignores install state.
        assert_eq!(engine.get_tool_latest("dotnet").unwrap().version(), "8.0.5");
        assert_eq!(
            engine.get_tool_installed("dotnet").unwrap().version(),
            "8.0.4"
        );
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(settings(dir.path())).unwrap();
        engine.load_catalog_bytes(catalog_json()).unwrap();
        assert!(matches!(
            engine.get_tool("ghost"),
            Err(Error::ToolNotFound(_))
        ));
        assert!(matches!(
            engine.get_tool_with_version("dotnet", "9.9.9"),
            Err(Error::ToolNotFound(_))
        ));
    }

    #[test]
    fn tool_handles_are_cached_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(settings(dir.path())).unwrap();
        engine.load_catalog_bytes(catalog_json()).unwrap();

        let a = engine.get_tool_with_version("dotnet", "8.0.5").unwrap();
        let b = engine.get_tool_with_version("dotnet", "8.0.5").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn dev_override_short_circuits_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(settings(dir.path())).unwrap();
        engine.load_catalog_bytes(catalog_json()).unwrap();

        let exe = dir.path().join("dotnet-dev");
        fs::write(&exe, b"#!/bin/sh\n").unwrap();
        engine.set_dev_override("dotnet", exe.clone());

        let tool = engine.get_tool("dotnet").unwrap();
        assert_eq!(tool.version(), "dev");
        assert_eq!(tool.tool_path(), Some(exe));
        assert_eq!(tool.install_source(), "dev-override");

        engine.clear_dev_override("dotnet");
        assert_eq!(engine.get_tool("dotnet").unwrap().version(), "8.0.5");
    }

    #[test]
    fn stale_dev_override_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(settings(dir.path())).unwrap();
        engine.load_catalog_bytes(catalog_json()).unwrap();
        engine.set_dev_override("dotnet", dir.path().join("gone"));
        assert_eq!(engine.get_tool("dotnet").unwrap().version(), "8.0.5");
    }

    #[test]
    fn discovery_surfaces_unconfigured_installs() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(settings(dir.path())).unwrap();
        engine.load_catalog_bytes(catalog_json()).unwrap();

        // A version on disk that the catalog no longer mentions.
        let folder = engine.roots().writable_folder("legacy", "1.2.3");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("legacy-bin"), b"x").unwrap();
        let meta = ToolMetadata {
            download_url: vec!["https://example.invalid/legacy.zip".into()],
            path_to_entry: "legacy-bin".into(),
            print_info_cmd: Vec::new(),
            download_process: Default::default(),
        };
        let mut sidecar = folder.as_os_str().to_os_string();
        sidecar.push(METADATA_SUFFIX);
        write_metadata_file(Path::new(&sidecar), &meta).unwrap();

        engine.refresh_discovered(true);
        let configs = engine.all_configs();
        assert!(configs.contains_key("legacy@1.2.3"));
        let tool = engine.get_tool_with_version("legacy", "1.2.3").unwrap();
        assert!(tool.exists());
    }

    #[test]
    fn delete_unknown_requires_catalog_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(settings(dir.path())).unwrap();
        assert!(matches!(
            engine.delete_unknown(),
            Err(Error::CatalogNotLoaded)
        ));

        engine.load_catalog_bytes(catalog_json()).unwrap();
        seed_version(&engine, "dotnet", "8.0.5", "dotnet");
        seed_version(&engine, "ghost", "0.1.0", "ghost-bin");

        let deleted = engine.delete_unknown().unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(engine.roots().writable_folder("dotnet", "8.0.5").exists());
        assert!(!engine.roots().writable_folder("ghost", "0.1.0").exists());
    }

    #[test]
    fn delete_all_except_honors_keep_list() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(settings(dir.path())).unwrap();
        engine.load_catalog_bytes(catalog_json()).unwrap();
        seed_version(&engine, "dotnet", "8.0.4", "dotnet");
        seed_version(&engine, "dotnet", "8.0.5", "dotnet");

        engine.delete_all_except(&["dotnet@8.0.5".to_string()]);
        assert!(!engine.roots().writable_folder("dotnet", "8.0.4").exists());
        assert!(engine.roots().writable_folder("dotnet", "8.0.5").exists());
    }

    #[test]
    fn group_toggle_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(settings(dir.path())).unwrap();
        engine.load_catalog_bytes(catalog_json()).unwrap();

        assert!(engine.is_group_enabled("dotnet"));
        engine.set_group_enabled("dotnet", false).unwrap();
        assert!(!engine.is_group_enabled("dotnet"));

        let snapshots = engine.group_snapshots();
        let dotnet = snapshots.iter().find(|s| s.tool_name == "dotnet").unwrap();
        assert!(!dotnet.is_enabled);
        // Both configured names are present.
        assert!(snapshots.iter().any(|s| s.tool_name == "ffmpeg"));
    }

    #[test]
    fn startup_sweeps_trash() {
        let dir = tempfile::tempdir().unwrap();
        let trash = dir
            .path()
            .join("tools")
            .join(platform::os())
            .join(platform::arch())
            .join("dotnet")
            .join(".trash-8.0.5-deadbeef");
        fs::create_dir_all(&trash).unwrap();

        let _engine = Engine::new(settings(dir.path())).unwrap();
        assert!(!trash.exists());
    }
}
