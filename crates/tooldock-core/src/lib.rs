//! Remote-tool acquisition and lifecycle engine.
//!
//! Given a declarative catalog of external tool binaries, the engine
//! resolves the best installed version across read-only and writable
//! roots, downloads missing versions with mirror failover and resumable
//! transfers, verifies the extracted artifact is actually executable
//! (relocating it off `noexec` mounts when needed), and serves
//! concurrent install/pause/resume/uninstall operations with strict
//! per-tool mutual exclusion. Progress fans out through an in-process
//! broker that an HTTP/SSE front can subscribe to.

mod active;
mod cleanup;
mod dev;

pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod execprobe;
pub mod extract;
pub mod group;
pub mod locks;
pub mod metadata;
pub mod platform;
pub mod progress;
pub mod roots;
pub mod tool;
pub mod version;

pub use config::{install_key, split_install_key, Catalog, ToolConfig};
pub use download::parse_download_limit;
pub use engine::{Engine, Settings, DOWNLOAD_LIMIT_ENV};
pub use error::{Error, Result};
pub use group::ToolGroupSnapshot;
pub use metadata::{DownloadProcess, ToolMetadata};
pub use progress::{DownloadStatus, ProgressBroker, ProgressMessage, Subscription};
pub use roots::Roots;
pub use tool::{DevTool, DownloadedTool, ProgressCallback, Tool};
