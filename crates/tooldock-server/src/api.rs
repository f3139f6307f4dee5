//! JSON routes and the grouped tool overview.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tooldock_core::{
    install_key, split_install_key, version, DownloadProcess, DownloadStatus, Engine,
    ProgressMessage,
};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::warn;

use crate::error::ApiError;
use crate::proxy::ToolProxy;
use crate::{assets, proxy, sse};

/// Request timeout for JSON routes. The SSE route is exempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct AppState {
    pub engine: Arc<Engine>,
    /// Duplicate-install guard for HTTP clients; the engine registry
    /// remains the authority for `/api/active`.
    active_http: Mutex<HashSet<String>>,
    pub proxy: ToolProxy,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> AppState {
        AppState {
            engine,
            active_http: Mutex::new(HashSet::new()),
            proxy: ToolProxy::new(),
            http: reqwest::Client::new(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/tools", get(list_tools))
        .route("/api/status", get(status))
        .route("/api/install", post(install))
        .route("/api/uninstall", post(uninstall))
        .route("/api/pause", post(pause))
        .route("/api/toggle", post(toggle))
        .route("/api/active", get(active))
        .route("/api/tool-path", get(tool_path))
        .route("/api/tool-info", get(tool_info))
        .route("/api/tool-metadata", get(tool_metadata))
        .route("/api/platform", get(platform))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    Router::new()
        .route("/", get(assets::index))
        .route("/static/*path", get(assets::static_asset))
        .merge(api)
        .route("/api/progress", get(sse::progress_stream))
        .route("/tool/:tool", axum::routing::any(proxy::forward_root))
        .route("/tool/:tool/*rest", axum::routing::any(proxy::forward_rest))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallRequest {
    #[serde(default)]
    tool_name: String,
    #[serde(default)]
    version: String,
}

impl InstallRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.tool_name.is_empty() || self.version.is_empty() {
            return Err(ApiError::BadRequest(
                "toolName and version are required".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToggleRequest {
    #[serde(default)]
    tool_name: String,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolQuery {
    #[serde(default)]
    tool_name: String,
    #[serde(default)]
    version: String,
}

/// One version row in the grouped overview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolOverview {
    name: String,
    version: String,
    installed: bool,
    /// Found under a read-only root.
    preinstalled: bool,
    is_executable: bool,
    enabled: bool,
    download_process: DownloadProcess,
    #[serde(skip_serializing_if = "String::is_empty")]
    metadata_json: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    storage_folder: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    exec_folder: String,
    exec_from_temp: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolGroupOverview {
    name: String,
    enabled: bool,
    tools: Vec<ToolOverview>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolRuntimeStatus {
    name: String,
    version: String,
    installed: bool,
    preinstalled: bool,
    downloading: bool,
    paused: bool,
    downloaded_bytes: u64,
    total_bytes: u64,
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<ToolGroupOverview>> {
    Json(build_overviews(&state.engine))
}

fn build_overviews(engine: &Engine) -> Vec<ToolGroupOverview> {
    let enabled_by_name: HashMap<String, bool> = engine
        .group_snapshots()
        .into_iter()
        .map(|snap| (snap.tool_name, snap.is_enabled))
        .collect();

    let mut groups: BTreeMap<String, ToolGroupOverview> = BTreeMap::new();
    for config in engine.all_configs().values() {
        let name = config.tool_name.trim().to_string();
        if name.is_empty() {
            continue;
        }
        let mut info = ToolOverview {
            name: config.tool_name.clone(),
            version: config.version.clone(),
            installed: false,
            preinstalled: false,
            is_executable: config.is_executable,
            enabled: true,
            download_process: DownloadProcess::default(),
            metadata_json: String::new(),
            storage_folder: String::new(),
            exec_folder: String::new(),
            exec_from_temp: false,
        };
        if let Ok(tool) = engine.get_tool_with_version(&config.tool_name, &config.version) {
            if let Some(dt) = tool.as_downloaded() {
                info.enabled = dt.is_enabled();
                info.download_process = dt.download_process();
                info.metadata_json =
                    serde_json::to_string_pretty(&dt.metadata_snapshot()).unwrap_or_default();
            }
            if tool.exists() {
                info.installed = true;
                info.preinstalled = tool.is_from_read_only_root();
                info.storage_folder = tool
                    .storage_folder()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                info.exec_folder = tool
                    .exec_folder()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                info.exec_from_temp = !info.exec_folder.is_empty()
                    && !info.storage_folder.is_empty()
                    && info.exec_folder != info.storage_folder;
            }
        }
        groups
            .entry(name.clone())
            .or_insert_with(|| ToolGroupOverview {
                name,
                enabled: true,
                tools: Vec::new(),
            })
            .tools
            .push(info);
    }

    // Groups known only from their sidecar still show up, version-less.
    for (name, enabled) in &enabled_by_name {
        groups
            .entry(name.clone())
            .or_insert_with(|| ToolGroupOverview {
                name: name.clone(),
                enabled: *enabled,
                tools: Vec::new(),
            });
    }

    groups
        .into_values()
        .map(|mut group| {
            group.tools.sort_by(|a, b| version::compare(&a.version, &b.version));
            if let Some(enabled) = enabled_by_name.get(&group.name) {
                group.enabled = *enabled;
            }
            for tool in &mut group.tools {
                tool.enabled = group.enabled;
            }
            group
        })
        .collect()
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Vec<ToolRuntimeStatus>> {
    let engine = &state.engine;
    let mut statuses = Vec::new();
    for config in engine.all_configs().values() {
        let key = config.install_key();
        let downloading = engine.is_active(&key);
        let (installed, preinstalled) =
            match engine.get_tool_with_version(&config.tool_name, &config.version) {
                Ok(tool) => (tool.exists(), tool.is_from_read_only_root()),
                Err(_) => (false, false),
            };
        let (downloaded_bytes, total_bytes) = engine
            .partial_download_info(&config.tool_name, &config.version)
            .await
            .unwrap_or((0, 0));
        let paused = !installed && !downloading && downloaded_bytes > 0;
        statuses.push(ToolRuntimeStatus {
            name: config.tool_name.clone(),
            version: config.version.clone(),
            installed,
            preinstalled,
            downloading,
            paused,
            downloaded_bytes,
            total_bytes,
        });
    }
    statuses.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| version::compare(&a.version, &b.version))
    });
    Json(statuses)
}

async fn install(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InstallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let key = install_key(&req.tool_name, &req.version);

    {
        let mut active = state.active_http.lock().unwrap_or_else(|e| e.into_inner());
        if active.contains(&key) || state.engine.is_active(&key) {
            return Err(ApiError::Conflict(
                "installation already in progress".to_string(),
            ));
        }
        active.insert(key.clone());
    }

    let task_state = Arc::clone(&state);
    tokio::spawn(async move {
        let result = task_state.engine.install(&req.tool_name, &req.version).await;
        task_state
            .active_http
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
        if let Err(err) = result {
            warn!(key = %key, "install failed: {err}");
            let mut msg =
                ProgressMessage::status_only(&req.tool_name, &req.version, DownloadStatus::Failed);
            msg.error = Some(err.to_string());
            task_state.engine.publish_progress(msg);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))))
}

async fn uninstall(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InstallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    state.engine.uninstall(&req.tool_name, &req.version)?;
    Ok(Json(json!({"status": "uninstalled"})))
}

async fn pause(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InstallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    state.engine.pause(&req.tool_name, &req.version)?;
    Ok(Json(json!({"status": "paused"})))
}

async fn toggle(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ToggleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.tool_name.is_empty() {
        return Err(ApiError::BadRequest("toolName is required".to_string()));
    }
    state.engine.set_group_enabled(&req.tool_name, req.enabled)?;
    Ok(Json(json!({"status": "ok"})))
}

async fn active(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let keys = state.engine.active_installs();
    let active: Vec<serde_json::Value> = keys
        .iter()
        .filter_map(|key| split_install_key(key))
        .map(|(name, version)| json!({"toolName": name, "version": version}))
        .collect();
    Json(json!({"needsSSE": !active.is_empty(), "active": active}))
}

async fn tool_path(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ToolQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if query.tool_name.is_empty() || query.version.is_empty() {
        return Err(ApiError::BadRequest(
            "toolName and version are required".to_string(),
        ));
    }
    let tool = state
        .engine
        .get_tool_with_version(&query.tool_name, &query.version)?;
    let storage = tool
        .storage_folder()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let exec = tool
        .exec_folder()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Json(json!({"storagePath": storage, "execPath": exec})))
}

async fn tool_info(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ToolQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if query.tool_name.is_empty() || query.version.is_empty() {
        return Err(ApiError::BadRequest(
            "toolName and version are required".to_string(),
        ));
    }
    let engine = Arc::clone(&state.engine);
    let (name, tool_version) = (query.tool_name.clone(), query.version.clone());
    // Runs the tool's info command; keep the blocking spawn off the
    // async workers.
    let info = tokio::task::spawn_blocking(move || engine.info_string(&name, &tool_version))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(json!({"info": info})))
}

async fn tool_metadata(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ToolQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if query.tool_name.is_empty() || query.version.is_empty() {
        return Err(ApiError::BadRequest(
            "toolName and version are required".to_string(),
        ));
    }
    let metadata = state
        .engine
        .metadata_json(&query.tool_name, &query.version)?;
    Ok(Json(json!({"metadata": metadata})))
}

async fn platform() -> Json<serde_json::Value> {
    Json(json!({"platform": tooldock_core::platform::platform_key()}))
}
