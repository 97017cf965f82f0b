//! Classification of archive failures into transient and permanent, and the backoff
//! applied to the transient ones.
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{FetchError, NetworkErrorKind};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after the first one fails with a transient error.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// HTTP statuses treated as transient. The archive answers 500 for products it
    /// does not hold, so 500 belongs here even though retrying it rarely helps.
    pub transient_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 2_000,
            max_delay_ms: 60_000,
            transient_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn classify_status(&self, status: StatusCode) -> NetworkErrorKind {
        if self.transient_statuses.contains(&status.as_u16()) {
            NetworkErrorKind::Transient
        } else {
            NetworkErrorKind::Permanent
        }
    }

    pub fn classify_transport(&self, err: &reqwest::Error) -> NetworkErrorKind {
        if let Some(status) = err.status() {
            return self.classify_status(status);
        }
        // A connection dropped mid-body surfaces as a decode error.
        if err.is_timeout() || err.is_connect() || err.is_body() || err.is_decode() {
            NetworkErrorKind::Transient
        } else {
            NetworkErrorKind::Permanent
        }
    }

    pub fn status_error(&self, url: &str, status: StatusCode) -> FetchError {
        FetchError::Network {
            kind: self.classify_status(status),
            url: url.to_string(),
            status: Some(status.as_u16()),
            message: format!("HTTP {}", status),
        }
    }

    pub fn transport_error(&self, url: &str, err: reqwest::Error) -> FetchError {
        FetchError::Network {
            kind: self.classify_transport(&err),
            url: url.to_string(),
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Whether a failure on attempt number `attempt` (0-based) earns another try.
    pub fn should_retry(&self, err: &FetchError, attempt: u32) -> bool {
        err.is_retryable() && attempt < self.max_retries
    }

    /// Run `op` until it succeeds, fails permanently or runs out of retries.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, attempt) => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "{what} failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
