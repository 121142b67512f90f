//! Timeout utilities and the isolated worker used for archive extraction.
//!
//! Extraction of an untrusted archive runs on a blocking worker thread owned
//! by a private runtime. The caller blocks on the result; a panic or a hang
//! inside the worker becomes an error instead of taking the process down.

use crate::error::{CleanerError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

/// Default whole-archive timeout in seconds
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 1800; // 30 minutes

/// Timeout configuration for a bounded operation
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Maximum duration for the operation
    pub duration: Duration,
    /// Whether to log timeout errors
    pub log_warnings: bool,
    /// Operation name for logging
    pub operation_name: String,
}

impl TimeoutConfig {
    /// Create a new timeout configuration
    pub fn new(seconds: u64, operation: impl Into<String>) -> Self {
        Self {
            duration: Duration::from_secs(seconds),
            log_warnings: true,
            operation_name: operation.into(),
        }
    }

    /// Create a default timeout configuration (30 minutes)
    pub fn default_timeout(operation: impl Into<String>) -> Self {
        Self::new(DEFAULT_TIMEOUT_SECONDS, operation)
    }
}

/// Execute an async operation with a timeout
pub async fn with_timeout<T, F>(config: TimeoutConfig, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    debug!(
        "Starting operation '{}' with timeout of {}s",
        config.operation_name,
        config.duration.as_secs()
    );

    match timeout(config.duration, future).await {
        Ok(result) => {
            debug!(
                "Operation '{}' completed",
                config.operation_name
            );
            result
        }
        Err(_) => {
            if config.log_warnings {
                error!(
                    "Operation '{}' timed out after {}s",
                    config.operation_name,
                    config.duration.as_secs()
                );
            }

            Err(CleanerError::Timeout {
                seconds: config.duration.as_secs(),
            })
        }
    }
}

/// Set once the caller has stopped waiting for an isolated job.
pub type CancelFlag = Arc<AtomicBool>;

/// Run `job` on an isolated blocking worker and wait for its result.
///
/// Exactly one job is in flight per call. A panicking job is reported through
/// `on_panic`. A job that outlives the timeout is abandoned on its thread and
/// its cancel flag is raised, so it must not publish anything once it sees
/// the flag.
pub fn run_isolated<T, F, P>(config: TimeoutConfig, job: F, on_panic: P) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&AtomicBool) -> Result<T> + Send + 'static,
    P: FnOnce(String) -> CleanerError,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .max_blocking_threads(1)
        .thread_name("diagscrub-worker")
        .build()?;

    let cancelled: CancelFlag = Arc::new(AtomicBool::new(false));
    let worker_flag = Arc::clone(&cancelled);
    let operation = config.operation_name.clone();
    let outcome = runtime.block_on(async move {
        let handle = tokio::task::spawn_blocking(move || job(&worker_flag));
        with_timeout(config, async move {
            match handle.await {
                Ok(result) => Ok(result),
                Err(join_err) => Ok(Err(on_panic(join_err.to_string()))),
            }
        })
        .await
    });

    match outcome {
        Ok(result) => {
            runtime.shutdown_background();
            result
        }
        Err(e) => {
            cancelled.store(true, Ordering::SeqCst);
            // Never wait on a worker that is still stuck after a timeout.
            runtime.shutdown_background();
            debug!(operation = %operation, "Isolated worker did not complete");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_async_timeout_success() {
        let config = TimeoutConfig::new(1, "test_operation");

        let result = with_timeout(config, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(42)
        })
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_async_timeout_failure() {
        let config = TimeoutConfig::new(1, "test_operation");

        let result: Result<i32> = with_timeout(config, async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(42)
        })
        .await;

        assert!(matches!(result, Err(CleanerError::Timeout { .. })));
    }

    #[test]
    fn test_isolated_job_result() {
        let config = TimeoutConfig::new(5, "sum");
        let value = run_isolated(config, |_| Ok(2 + 2), CleanerError::InvalidState).unwrap();
        assert_eq!(value, 4);
    }

    #[test]
    fn test_isolated_job_panic_is_contained() {
        let config = TimeoutConfig::new(5, "panics");
        let result: Result<()> = run_isolated(
            config,
            |_| panic!("decompression blew up"),
            CleanerError::InvalidState,
        );
        assert!(matches!(result, Err(CleanerError::InvalidState(_))));
    }

    #[test]
    fn test_isolated_job_timeout() {
        let config = TimeoutConfig::new(1, "hangs");
        let result: Result<()> = run_isolated(
            config,
            |_| {
                std::thread::sleep(Duration::from_secs(3));
                Ok(())
            },
            CleanerError::InvalidState,
        );
        assert!(matches!(result, Err(CleanerError::Timeout { seconds: 1 })));
    }

    #[test]
    fn test_abandoned_job_sees_cancel_flag() {
        let (tx, rx) = std::sync::mpsc::channel();
        let config = TimeoutConfig::new(1, "late");
        let result: Result<()> = run_isolated(
            config,
            move |cancelled| {
                std::thread::sleep(Duration::from_millis(1500));
                let _ = tx.send(cancelled.load(Ordering::SeqCst));
                Ok(())
            },
            CleanerError::InvalidState,
        );
        assert!(matches!(result, Err(CleanerError::Timeout { .. })));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_finished_job_is_not_cancelled() {
        let config = TimeoutConfig::new(5, "quick");
        let seen = run_isolated(config, |c| Ok(c.load(Ordering::SeqCst)), CleanerError::InvalidState)
            .unwrap();
        assert!(!seen);
    }
}
