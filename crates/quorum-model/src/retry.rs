// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Transport retry with exponential backoff.
//!
//! Transport failures and 5xx responses are retried; 4xx responses are
//! client errors and surface immediately.  The delay quadruples from 100 ms
//! to the 3.2 s cap across the five attempts.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Error classification for the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network-level failure (connect, DNS, mid-body disconnect).
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status with the response body for diagnostics.
    #[error("{provider} error {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },
}

impl ProviderError {
    /// Transport failures and server errors are retryable; 4xx are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
        }
    }
}

pub const MAX_ATTEMPTS: u32 = 5;
const INITIAL_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_millis(3_200);

/// Run `op` up to [`MAX_ATTEMPTS`] times, backing off between retryable
/// failures.  Non-retryable errors return immediately.
pub async fn with_backoff<T, F, Fut>(label: &str, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                warn!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retryable provider failure; backing off"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 4).min(MAX_DELAY);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transport() -> ProviderError {
        ProviderError::Transport("boom".into())
    }

    fn status(code: u16) -> ProviderError {
        ProviderError::Status {
            provider: "test".into(),
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn retryability_classification() {
        assert!(transport().is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!status(429).is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out: Result<u32, _> = with_backoff("t", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        })
        .await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transport_errors_up_to_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out: Result<(), _> = with_backoff("t", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(transport())
            }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_do_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out: Result<(), _> = with_backoff("t", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(status(401))
            }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out = with_backoff("t", move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transport())
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
