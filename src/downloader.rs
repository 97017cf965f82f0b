//! Streaming transfer of one scene archive to disk.
//!
//! Data lands in `<destination>.partial` and is renamed into place only once the
//! byte count matches the declared length, so an interrupted or rejected transfer
//! never leaves a file at the destination path. Transient failures resume the
//! partial file with a `Range` request.
use futures_util::StreamExt;
use reqwest::{header, Response, StatusCode};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{FetchError, NetworkErrorKind};
use crate::retry::RetryPolicy;
use crate::session::{DownloadSession, LOGIN_FAILURE_MARKER};

/// Bytes buffered before each write to disk.
pub const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Any real scene archive is larger than this.
pub const MIN_ARCHIVE_SIZE: u64 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Pending,
    Transferring,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadTask {
    pub source_url: String,
    pub destination_path: PathBuf,
    pub declared_content_length: Option<u64>,
    pub bytes_transferred: u64,
    pub status: TaskStatus,
    pub retries: u32,
}

impl DownloadTask {
    pub fn new(source_url: &str, destination_path: &Path) -> Self {
        Self {
            source_url: source_url.to_string(),
            destination_path: destination_path.to_path_buf(),
            declared_content_length: None,
            bytes_transferred: 0,
            status: TaskStatus::Pending,
            retries: 0,
        }
    }

    pub fn partial_path(&self) -> PathBuf {
        partial_path(&self.destination_path)
    }
}

pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub bytes_transferred: u64,
    pub total: u64,
    pub bytes_per_second: f64,
}

impl ProgressEvent {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.total as f64) * 100.0
    }
}

/// Receives progress after every chunk written and once at the end of a transfer.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

pub struct ChunkedDownloader {
    policy: RetryPolicy,
    progress: Option<ProgressCallback>,
}

impl ChunkedDownloader {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Stream `url` to `destination` using the session's cookies.
    pub async fn download(
        &self,
        session: &DownloadSession,
        url: &str,
        destination: &Path,
    ) -> Result<DownloadTask, FetchError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut task = DownloadTask::new(url, destination);
        let partial = task.partial_path();
        let mut attempt = 0;

        loop {
            task.status = TaskStatus::Transferring;
            match self.transfer(session, &mut task, &partial).await {
                Ok(()) => {
                    fs::rename(&partial, destination).await?;
                    task.status = TaskStatus::Complete;
                    info!(
                        url = %url,
                        path = %destination.display(),
                        size = %format_size(task.bytes_transferred),
                        "Download complete"
                    );
                    return Ok(task);
                }
                Err(e) if self.policy.should_retry(&e, attempt) => {
                    attempt += 1;
                    task.retries = attempt;
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        error = %e,
                        retry = attempt,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Download failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    task.status = TaskStatus::Failed;
                    discard(&partial).await;
                    return Err(e);
                }
            }
        }
    }

    async fn transfer(
        &self,
        session: &DownloadSession,
        task: &mut DownloadTask,
        partial: &Path,
    ) -> Result<(), FetchError> {
        let url = task.source_url.clone();
        let mut offset = match fs::metadata(partial).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = session.client().get(&url);
        if offset > 0 {
            debug!(url = %url, offset, "Resuming partial download");
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.policy.transport_error(&url, e))?;

        let status = response.status();
        if offset > 0 && status == StatusCode::RANGE_NOT_SATISFIABLE {
            if task.declared_content_length == Some(offset) {
                task.bytes_transferred = offset;
                return Ok(());
            }
            // Server no longer agrees with what we have; start over.
            discard(partial).await;
            return Err(FetchError::Network {
                kind: NetworkErrorKind::Transient,
                url,
                status: Some(status.as_u16()),
                message: "Resume range rejected".to_string(),
            });
        }
        if !status.is_success() {
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                info!(url = %url, "Archive has no product at this url");
            }
            return Err(self.policy.status_error(&url, status));
        }

        if is_html(response.headers()) {
            return Err(html_error(&url, response).await);
        }

        let append = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        if !append {
            offset = 0;
        }
        let total = match response.content_length() {
            Some(length) => length + offset,
            None => 0,
        };
        if total < MIN_ARCHIVE_SIZE {
            return Err(FetchError::TooSmall {
                url,
                content_length: total,
                minimum: MIN_ARCHIVE_SIZE,
            });
        }
        task.declared_content_length = Some(total);
        task.bytes_transferred = offset;

        let mut file = if append {
            OpenOptions::new().append(true).open(partial).await?
        } else {
            File::create(partial).await?
        };

        info!(
            url = %url,
            size = %format_size(total),
            resumed_from = offset,
            "Downloading"
        );

        let started = Instant::now();
        let mut received_this_attempt: u64 = 0;
        let mut buffer: Vec<u8> = Vec::with_capacity(CHUNK_SIZE);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Keep what arrived so the retry resumes after it.
                    file.write_all(&buffer).await?;
                    file.flush().await?;
                    task.bytes_transferred += buffer.len() as u64;
                    return Err(self.policy.transport_error(&url, e));
                }
            };
            buffer.extend_from_slice(&chunk);
            while buffer.len() >= CHUNK_SIZE {
                let rest = buffer.split_off(CHUNK_SIZE);
                file.write_all(&buffer).await?;
                received_this_attempt += buffer.len() as u64;
                task.bytes_transferred += buffer.len() as u64;
                buffer = rest;
                self.emit(task, total, received_this_attempt, started);
            }
        }
        if !buffer.is_empty() {
            file.write_all(&buffer).await?;
            received_this_attempt += buffer.len() as u64;
            task.bytes_transferred += buffer.len() as u64;
        }
        file.flush().await?;
        self.emit(task, total, received_this_attempt, started);

        if task.bytes_transferred > total {
            discard(partial).await;
            return Err(FetchError::network(
                NetworkErrorKind::Permanent,
                &url,
                format!(
                    "Received {} bytes, more than the declared {}",
                    task.bytes_transferred, total
                ),
            ));
        }
        if task.bytes_transferred < total {
            return Err(FetchError::network(
                NetworkErrorKind::Transient,
                &url,
                format!(
                    "Body ended after {} of {} bytes",
                    task.bytes_transferred, total
                ),
            ));
        }
        Ok(())
    }

    fn emit(&self, task: &DownloadTask, total: u64, received: u64, started: Instant) {
        let Some(callback) = &self.progress else {
            return;
        };
        let elapsed = started.elapsed().as_secs_f64();
        let bytes_per_second = if elapsed > 0.0 {
            received as f64 / elapsed
        } else {
            0.0
        };
        callback(&ProgressEvent {
            bytes_transferred: task.bytes_transferred,
            total,
            bytes_per_second,
        });
    }
}

fn is_html(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false)
}

/// An HTML page where an archive was expected. A login page means the session is no
/// longer authorised; anything else is kept for diagnosis.
async fn html_error(url: &str, response: Response) -> FetchError {
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("text/html")
        .to_string();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!(url = %url, error = %e, "Unable to read HTML response body");
            String::new()
        }
    };
    if body.contains(LOGIN_FAILURE_MARKER) {
        return FetchError::Authentication;
    }
    FetchError::InvalidResponse {
        url: url.to_string(),
        content_type,
        body,
    }
}

async fn discard(partial: &Path) {
    match fs::remove_file(partial).await {
        Ok(()) => debug!(path = %partial.display(), "Discarded partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %partial.display(), error = %e, "Unable to remove partial download"),
    }
}

/// Human readable byte count, e.g. `1.5 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
