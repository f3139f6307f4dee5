//! Progress events and the SSE fan-out broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Pipeline status vocabulary, lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Trying,
    Downloading,
    Extracting,
    Paused,
    Failed,
    Completed,
    Disabled,
    Uninstalled,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Trying => "trying",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Extracting => "extracting",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Disabled => "disabled",
            DownloadStatus::Uninstalled => "uninstalled",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory event emitted by the download pipeline.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub status: DownloadStatus,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// Instantaneous speed, bytes per second.
    pub speed: f64,
    /// 1-based mirror attempt index.
    pub attempt_index: u32,
    pub total_attempts: u32,
    pub current_url: String,
    pub failed_urls: Vec<String>,
    pub all_urls: Vec<String>,
    pub error: Option<String>,
}

impl DownloadProgress {
    pub fn new(status: DownloadStatus) -> DownloadProgress {
        DownloadProgress {
            status,
            total_bytes: 0,
            downloaded_bytes: 0,
            speed: 0.0,
            attempt_index: 0,
            total_attempts: 0,
            current_url: String::new(),
            failed_urls: Vec::new(),
            all_urls: Vec::new(),
            error: None,
        }
    }
}

/// Wire payload fanned out over SSE.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessage {
    pub tool_name: String,
    pub version: String,
    pub status: DownloadStatus,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub downloaded_bytes: u64,
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub attempt_index: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub total_attempts: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_urls: Vec<String>,
}

impl ProgressMessage {
    /// A bare status message with every optional field zeroed.
    pub fn status_only(tool_name: &str, version: &str, status: DownloadStatus) -> ProgressMessage {
        ProgressMessage {
            tool_name: tool_name.to_string(),
            version: version.to_string(),
            status,
            total_bytes: 0,
            downloaded_bytes: 0,
            speed: 0.0,
            error: None,
            attempt_index: 0,
            total_attempts: 0,
            current_url: String::new(),
            failed_urls: Vec::new(),
            all_urls: Vec::new(),
        }
    }

    pub fn from_progress(tool_name: &str, version: &str, dp: &DownloadProgress) -> ProgressMessage {
        ProgressMessage {
            tool_name: tool_name.to_string(),
            version: version.to_string(),
            status: dp.status,
            total_bytes: dp.total_bytes,
            downloaded_bytes: dp.downloaded_bytes,
            speed: dp.speed,
            error: dp.error.clone(),
            attempt_index: dp.attempt_index,
            total_attempts: dp.total_attempts,
            current_url: dp.current_url.clone(),
            failed_urls: dp.failed_urls.clone(),
            all_urls: dp.all_urls.clone(),
        }
    }
}

pub(crate) fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

pub(crate) fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

pub(crate) fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

/// Per-client channel capacity. Slow clients drop events rather than
/// back-pressuring producers.
const CLIENT_BUFFER: usize = 10;

/// Multiplexes many producers onto many subscribers with non-blocking
/// sends.
#[derive(Debug, Default)]
pub struct ProgressBroker {
    clients: RwLock<HashMap<u64, mpsc::Sender<ProgressMessage>>>,
    next_id: AtomicU64,
}

/// Removes its client channel from the broker when dropped.
pub struct Subscription {
    id: u64,
    broker: Arc<ProgressBroker>,
    receiver: mpsc::Receiver<ProgressMessage>,
}

impl ProgressBroker {
    pub fn new() -> ProgressBroker {
        ProgressBroker::default()
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        Subscription {
            id,
            broker: Arc::clone(self),
            receiver: rx,
        }
    }

    pub fn publish(&self, msg: ProgressMessage) {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        for tx in clients.values() {
            // Full channel means a slow client; the event is dropped.
            let _ = tx.try_send(msg.clone());
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ProgressMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressMessage> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker
            .clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(status: DownloadStatus) -> ProgressMessage {
        ProgressMessage::from_progress("dotnet", "8.0.5", &DownloadProgress::new(status))
    }

    #[tokio::test]
    async fn subscriber_receives_published_messages() {
        let broker = Arc::new(ProgressBroker::new());
        let mut sub = broker.subscribe();
        broker.publish(msg(DownloadStatus::Downloading));
        let received = sub.recv().await.unwrap();
        assert_eq!(received.status, DownloadStatus::Downloading);
        assert_eq!(received.tool_name, "dotnet");
    }

    #[tokio::test]
    async fn slow_client_drops_instead_of_blocking() {
        let broker = Arc::new(ProgressBroker::new());
        let mut sub = broker.subscribe();
        for _ in 0..(CLIENT_BUFFER + 5) {
            broker.publish(msg(DownloadStatus::Downloading));
        }
        let mut received = 0;
        while sub.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, CLIENT_BUFFER);
    }

    #[tokio::test]
    async fn dropped_subscription_unregisters() {
        let broker = Arc::new(ProgressBroker::new());
        let sub = broker.subscribe();
        assert_eq!(broker.client_count(), 1);
        drop(sub);
        assert_eq!(broker.client_count(), 0);
    }

    #[test]
    fn message_omits_zero_fields() {
        let value = serde_json::to_value(msg(DownloadStatus::Completed)).unwrap();
        assert_eq!(value["status"], "completed");
        assert!(value.get("totalBytes").is_none());
        assert!(value.get("failedUrls").is_none());
        assert!(value.get("error").is_none());
    }
}
