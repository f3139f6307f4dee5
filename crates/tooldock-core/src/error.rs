use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("tool is busy: another operation is in progress")]
    Busy,

    /// Sentinel returned by the download engine when the pause flag is
    /// observed. Converted to a no-op success by the orchestrator.
    #[error("download paused")]
    Paused,

    #[error("tool {0} not found")]
    ToolNotFound(String),

    #[error("no installed version of tool {0} found")]
    NoInstalledVersion(String),

    #[error("catalog is not loaded")]
    CatalogNotLoaded,

    #[error("no download urls configured for {0}")]
    NoDownloadUrls(String),

    #[error("HEAD request failed with status {0}")]
    HeadStatus(reqwest::StatusCode),

    #[error("cannot determine download file name for {0}")]
    FileName(String),

    #[error("tool {0} does not expose metadata")]
    NoMetadata(String),

    #[error("download of {url} failed with status {status}")]
    MirrorStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("range request failed (416) for {url}: local={local}, server={server}")]
    RangeNotSatisfiable { url: String, local: u64, server: u64 },

    #[error("unsupported archive format: {}", .0.display())]
    UnsupportedArchive(PathBuf),

    #[error("install succeeded but tool folder not found")]
    StorageFolderMissing,

    #[error("storage folder is not executable and no exec root is configured")]
    NoExecRoot,

    #[error("execution is not supported in {}", .0.display())]
    ExecUnsupported(PathBuf),

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

impl Error {
    pub fn is_paused(&self) -> bool {
        matches!(self, Error::Paused)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ToolNotFound(_) | Error::NoInstalledVersion(_) | Error::NoDownloadUrls(_)
        )
    }
}
