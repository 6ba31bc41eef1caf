// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Write retry policy shared by the backend adapters.

use std::future::Future;

use tracing::{error, warn};

use engram_core::metrics::record_write_retry;
use engram_core::{EngramError, ThreadId};

/// Attempts made before a write failure is surfaced.
pub const WRITE_ATTEMPTS: u32 = 2;

/// Runs `op`, retrying immediately once on failure.
///
/// After the second failure the last error is wrapped in
/// [`EngramError::WriteFailed`].
pub async fn write_with_retry<F, Fut>(
    backend: &str,
    thread_id: &ThreadId,
    mut op: F,
) -> Result<(), EngramError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), EngramError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < WRITE_ATTEMPTS => {
                warn!(backend, thread_id = %thread_id, attempt, error = %e, "memory write failed, retrying");
                record_write_retry(backend);
                attempt += 1;
            }
            Err(e) => {
                error!(backend, thread_id = %thread_id, attempts = attempt, error = %e, "memory write failed");
                return Err(EngramError::WriteFailed {
                    backend: backend.to_string(),
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_second_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = write_with_retry("vector", &"t1".into(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(EngramError::unavailable("vector", "blip"))
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn surfaces_write_failed_after_two_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = write_with_retry("graph", &"t1".into(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngramError::unavailable("graph", "down"))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match err {
            EngramError::WriteFailed { attempts, backend, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(backend, "graph");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn first_success_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        write_with_retry("vector", &"t1".into(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
