//! The download pipeline: mirror failover, byte-range resumption,
//! cooperative pause, rate limiting, and progress accounting.
//!
//! Each mirror attempt HEAD-probes the URL for size and filename, then
//! streams a (possibly ranged) GET into `<folder>/<filename>`. The
//! pause flag is sampled before every chunk; observing it surfaces the
//! `Paused` sentinel, which is not a mirror failure.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use percent_encoding::percent_decode_str;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::extract;
use crate::progress::{DownloadProgress, DownloadStatus};

/// Minimum interval between `downloading` events.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

pub(crate) struct DownloadJob<'a> {
    pub client: &'a reqwest::Client,
    pub folder: &'a Path,
    pub paused: &'a AtomicBool,
    /// 0 disables rate limiting.
    pub limit_bps: u64,
    pub emit: &'a (dyn Fn(DownloadProgress) + Send + Sync),
}

impl DownloadJob<'_> {
    /// Tries every mirror in order. Success on the first mirror that
    /// downloads (and extracts) cleanly; `Paused` propagates
    /// immediately; anything else records the mirror in the failed
    /// list and moves on. Exhausting the list emits `failed`.
    pub(crate) async fn run(&self, urls: &[String]) -> Result<()> {
        let urls: Vec<String> = urls
            .iter()
            .filter(|u| !u.trim().is_empty())
            .cloned()
            .collect();
        let total = urls.len() as u32;
        let mut failed: Vec<String> = Vec::new();
        let mut last_err: Option<Error> = None;

        for (i, url) in urls.iter().enumerate() {
            let attempt = i as u32 + 1;
            (self.emit)(self.event(
                DownloadStatus::Trying,
                attempt,
                total,
                url,
                &failed,
                &urls,
            ));
            if i > 0 {
                info!(url = %url, "retrying with alternative mirror ({attempt}/{total})");
            } else {
                info!(url = %url, "starting download ({attempt}/{total})");
            }
            match self.attempt(url, attempt, total, &urls, &mut failed).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_paused() => return Err(e),
                Err(e) => {
                    warn!(url = %url, "mirror attempt {attempt}/{total} failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        let err = last_err
            .unwrap_or_else(|| Error::Task("download failed without a recorded error".into()));
        let mut event = self.event(DownloadStatus::Failed, total, total, "", &failed, &urls);
        event.error = Some(err.to_string());
        (self.emit)(event);
        Err(err)
    }

    async fn attempt(
        &self,
        url: &str,
        attempt: u32,
        total_attempts: u32,
        all_urls: &[String],
        failed: &mut Vec<String>,
    ) -> Result<()> {
        // HEAD is best-effort: a failure only loses the size and
        // filename hints, it does not condemn the mirror.
        let head = head_info(self.client, url).await.ok();
        let server_size = head.as_ref().map(|h| h.content_length).unwrap_or(0);
        let file_name = match head.and_then(|h| h.file_name) {
            Some(name) => name,
            None => file_name_from_url(url)
                .ok_or_else(|| Error::FileName(url.to_string()))?,
        };
        let tmp_path = self.folder.join(&file_name);
        let mut existing = fs::metadata(&tmp_path).map(|m| m.len()).unwrap_or(0);

        let decision = resume_decision(server_size, existing);
        if decision.delete_first {
            info!(
                path = %tmp_path.display(),
                "local file ({existing} bytes) exceeds server size ({server_size} bytes), restarting"
            );
            match fs::remove_file(&tmp_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    failed.push(url.to_string());
                    return Err(e.into());
                }
            }
            existing = 0;
        }

        if decision.need_download {
            self.perform(
                url,
                &tmp_path,
                existing,
                server_size,
                attempt,
                total_attempts,
                all_urls,
                failed,
            )
            .await?;
        } else {
            info!(path = %tmp_path.display(), "file already complete ({existing} bytes), skipping download");
        }

        if extract::is_supported_archive(&file_name) {
            (self.emit)(self.event(
                DownloadStatus::Extracting,
                attempt,
                total_attempts,
                url,
                failed,
                all_urls,
            ));
            let archive = tmp_path.clone();
            let target = self.folder.to_path_buf();
            let outcome = tokio::task::spawn_blocking(move || {
                extract::extract_archive(&archive, &target)
            })
            .await
            .map_err(|e| Error::Task(e.to_string()))?;
            if let Err(e) = outcome {
                failed.push(url.to_string());
                return Err(e);
            }
            let _ = fs::remove_file(&tmp_path);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn perform(
        &self,
        url: &str,
        tmp_path: &Path,
        mut existing: u64,
        server_size: u64,
        attempt: u32,
        total_attempts: u32,
        all_urls: &[String],
        failed: &mut Vec<String>,
    ) -> Result<()> {
        let mut request = self.client.get(url);
        if existing > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={existing}-"));
        }
        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                failed.push(url.to_string());
                return Err(e.into());
            }
        };

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            if server_size > 0 && existing == server_size {
                // Already complete; the range start just fell past the end.
                return Ok(());
            }
            failed.push(url.to_string());
            return Err(Error::RangeNotSatisfiable {
                url: url.to_string(),
                local: existing,
                server: server_size,
            });
        }
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            failed.push(url.to_string());
            return Err(Error::MirrorStatus {
                url: url.to_string(),
                status,
            });
        }

        let mut file = if status == StatusCode::PARTIAL_CONTENT && existing > 0 {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(tmp_path)
                .await?
        } else {
            existing = 0;
            tokio::fs::File::create(tmp_path).await?
        };

        let mut total_bytes = server_size;
        if total_bytes == 0 {
            total_bytes = response.content_length().unwrap_or(0);
            if total_bytes > 0 && status == StatusCode::PARTIAL_CONTENT && existing > 0 {
                total_bytes += existing;
            }
        }

        let mut limiter = RateLimiter::new(self.limit_bps);
        let mut downloaded = existing;
        let mut last_update = Instant::now();
        let mut last_bytes = downloaded;
        let mut stream = response.bytes_stream();

        loop {
            // Cooperative pause: sampled before consuming the next chunk.
            if self.paused.load(Ordering::Acquire) {
                let _ = file.flush().await;
                let mut event = self.event(
                    DownloadStatus::Paused,
                    attempt,
                    total_attempts,
                    url,
                    failed,
                    all_urls,
                );
                event.total_bytes = total_bytes;
                event.downloaded_bytes = downloaded;
                (self.emit)(event);
                return Err(Error::Paused);
            }

            let chunk = match stream.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    let _ = file.flush().await;
                    failed.push(url.to_string());
                    return Err(e.into());
                }
                None => break,
            };
            if let Err(e) = file.write_all(&chunk).await {
                failed.push(url.to_string());
                return Err(e.into());
            }
            downloaded += chunk.len() as u64;
            limiter.throttle(chunk.len() as u64).await;

            let now = Instant::now();
            let elapsed = now.duration_since(last_update);
            if elapsed >= PROGRESS_INTERVAL {
                let speed = (downloaded - last_bytes) as f64 / elapsed.as_secs_f64();
                let mut event = self.event(
                    DownloadStatus::Downloading,
                    attempt,
                    total_attempts,
                    url,
                    failed,
                    all_urls,
                );
                event.total_bytes = total_bytes;
                event.downloaded_bytes = downloaded;
                event.speed = speed;
                (self.emit)(event);
                last_update = now;
                last_bytes = downloaded;
            }
        }

        file.flush().await?;
        Ok(())
    }

    fn event(
        &self,
        status: DownloadStatus,
        attempt_index: u32,
        total_attempts: u32,
        url: &str,
        failed: &[String],
        all: &[String],
    ) -> DownloadProgress {
        let mut dp = DownloadProgress::new(status);
        dp.attempt_index = attempt_index;
        dp.total_attempts = total_attempts;
        dp.current_url = url.to_string();
        dp.failed_urls = failed.to_vec();
        dp.all_urls = all.to_vec();
        dp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResumeDecision {
    pub need_download: bool,
    pub delete_first: bool,
}

/// Decides what to do with a pre-existing temp file given the server's
/// reported size. Local truth defers to remote truth: a local file
/// larger than the server's copy is corrupt or obsolete.
pub(crate) fn resume_decision(server_size: u64, local_size: u64) -> ResumeDecision {
    if local_size == 0 || server_size == 0 {
        return ResumeDecision {
            need_download: true,
            delete_first: false,
        };
    }
    if local_size == server_size {
        return ResumeDecision {
            need_download: false,
            delete_first: false,
        };
    }
    if local_size > server_size {
        return ResumeDecision {
            need_download: true,
            delete_first: true,
        };
    }
    ResumeDecision {
        need_download: true,
        delete_first: false,
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HeadInfo {
    pub file_name: Option<String>,
    pub content_length: u64,
}

pub(crate) async fn head_info(client: &reqwest::Client, url: &str) -> Result<HeadInfo> {
    let response = client.head(url).send().await?;
    if !response.status().is_success() {
        return Err(Error::HeadStatus(response.status()));
    }
    let content_length = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let file_name = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(content_disposition_filename);
    Ok(HeadInfo {
        file_name,
        content_length,
    })
}

/// Filename priority: RFC 5987 `filename*=UTF-8''…` (percent-decoded)
/// over quoted `filename="…"` over unquoted `filename=…`.
pub(crate) fn content_disposition_filename(header: &str) -> Option<String> {
    if let Some(idx) = header.find("filename*=") {
        let rest = &header[idx + "filename*=".len()..];
        if let Some(enc_idx) = rest.find("''") {
            let mut encoded = &rest[enc_idx + 2..];
            if let Some(end) = encoded.find(';') {
                encoded = &encoded[..end];
            }
            let encoded = encoded.trim();
            if let Ok(decoded) = percent_decode_str(encoded).decode_utf8() {
                if !decoded.is_empty() {
                    return Some(decoded.into_owned());
                }
            }
        }
    }

    if let Some(idx) = header.find("filename=\"") {
        let rest = &header[idx + "filename=\"".len()..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    if let Some(idx) = header.find("filename=") {
        let mut rest = &header[idx + "filename=".len()..];
        if let Some(end) = rest.find(';') {
            rest = &rest[..end];
        }
        let rest = rest.trim();
        if !rest.is_empty() {
            return Some(rest.to_string());
        }
    }

    None
}

/// Basename of the URL path, with query/fragment stripped.
pub(crate) fn file_name_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next()?;
    let name = without_query.rsplit('/').next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Locates the temp file a paused or crashed download left behind.
pub(crate) fn partial_file_path(folder: &Path, urls: &[String]) -> Option<PathBuf> {
    let mut first_candidate = None;
    for url in urls {
        if url.trim().is_empty() {
            continue;
        }
        if let Some(name) = file_name_from_url(url) {
            let candidate = folder.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
            if first_candidate.is_none() {
                first_candidate = Some(candidate);
            }
        }
    }
    first_candidate
}

/// Sleep-based token bucket: the cumulative transfer may never run
/// ahead of `bps * elapsed`.
pub(crate) struct RateLimiter {
    bps: u64,
    started: Instant,
    total: u64,
}

impl RateLimiter {
    pub(crate) fn new(bps: u64) -> RateLimiter {
        RateLimiter {
            bps,
            started: Instant::now(),
            total: 0,
        }
    }

    pub(crate) async fn throttle(&mut self, bytes: u64) {
        if self.bps == 0 {
            return;
        }
        self.total += bytes;
        let expected = Duration::from_secs_f64(self.total as f64 / self.bps as f64);
        let elapsed = self.started.elapsed();
        if expected > elapsed {
            tokio::time::sleep(expected - elapsed).await;
        }
    }
}

/// Parses a bytes/sec limit, accepting `_` and `,` digit-group
/// separators. Invalid or negative input disables limiting.
pub fn parse_download_limit(raw: &str) -> u64 {
    let clean: String = raw.chars().filter(|c| *c != '_' && *c != ',').collect();
    if clean.is_empty() {
        return 0;
    }
    clean.trim().parse().unwrap_or(0)
}
