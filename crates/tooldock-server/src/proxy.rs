//! Reverse proxy for nested tool web UIs.
//!
//! Tools that expose their own UI register a target base URL under a
//! name; requests to `/tool/<name>/...` are forwarded with the prefix
//! stripped. Only this registration contract is part of the engine's
//! surface; the tools themselves decide what to serve.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use tracing::warn;

use crate::api::AppState;
use crate::error::ApiError;

const MAX_PROXY_BODY: usize = 32 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct ToolProxy {
    targets: RwLock<HashMap<String, String>>,
}

impl ToolProxy {
    pub fn new() -> ToolProxy {
        ToolProxy::default()
    }

    /// Registers (or replaces) the UI target for a tool name. The
    /// target must be an absolute http(s) URL.
    pub fn register(&self, tool_name: &str, target_url: &str) -> Result<(), String> {
        let parsed = reqwest::Url::parse(target_url).map_err(|e| e.to_string())?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("unsupported proxy scheme: {}", parsed.scheme()));
        }
        let base = target_url.trim_end_matches('/').to_string();
        self.targets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tool_name.to_string(), base);
        Ok(())
    }

    pub fn unregister(&self, tool_name: &str) {
        self.targets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(tool_name);
    }

    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn target(&self, tool_name: &str) -> Option<String> {
        self.targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tool_name)
            .cloned()
    }
}

pub async fn forward_root(
    State(state): State<Arc<AppState>>,
    Path(tool): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    forward(state, tool, String::new(), request).await
}

pub async fn forward_rest(
    State(state): State<Arc<AppState>>,
    Path((tool, rest)): Path<(String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    forward(state, tool, rest, request).await
}

async fn forward(
    state: Arc<AppState>,
    tool: String,
    rest: String,
    request: Request,
) -> Result<Response, ApiError> {
    let Some(base) = state.proxy.target(&tool) else {
        return Err(ApiError::NotFound(format!(
            "tool {tool} has no registered web ui"
        )));
    };

    let mut url = join_target(&base, &rest);
    if let Some(query) = request.uri().query() {
        url.push('?');
        url.push_str(query);
    }

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_PROXY_BODY)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let mut upstream = state.http.request(method, &url).body(body.to_vec());
    for (name, value) in parts.headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        upstream = upstream.header(name.as_str(), value.as_bytes());
    }

    let response = upstream.send().await.map_err(|e| {
        warn!(tool = %tool, url = %url, "proxy request failed: {e}");
        ApiError::Internal(e.to_string())
    })?;

    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers().iter() {
        if name.as_str().eq_ignore_ascii_case("transfer-encoding")
            || name.as_str().eq_ignore_ascii_case("connection")
        {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    builder
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// `/tool/<name>` forwards to the target root; deeper paths append.
fn join_target(base: &str, rest: &str) -> String {
    if rest.is_empty() {
        format!("{base}/")
    } else {
        format!("{base}/{rest}")
    }
}
