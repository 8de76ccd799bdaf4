use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;

/// Shared retry policy for C3/C5: connection-class errors are retried once
/// after a fixed delay; every other error propagates unchanged. Long-running
/// consumer loops use their own loop-local recovery cadence instead of this
/// policy (see `nbus-redis::consumer`).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(5_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    /// Execute `f`, retrying exactly once after `retry_delay` if the first
    /// attempt fails with a transient (connection-class) error.
    pub async fn execute<T, F, Fut>(&self, mut f: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        match f().await {
            Ok(v) => Ok(v),
            Err(e) if e.is_transient() => {
                tracing::debug!("transient error, retrying after {:?}: {e}", self.retry_delay);
                tokio::time::sleep(self.retry_delay).await;
                f().await
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_once_on_transient_error() {
        let policy = RetryPolicy::new(Duration::from_millis(1));
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let result = policy
            .execute(|| {
                let a = a.clone();
                async move {
                    let n = a.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(TransportError::Connection("down".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let policy = RetryPolicy::new(Duration::from_millis(1));
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let result: Result<(), _> = policy
            .execute(|| {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(TransportError::Other("nope".into()))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_one_retry() {
        let policy = RetryPolicy::new(Duration::from_millis(1));
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let result: Result<(), _> = policy
            .execute(|| {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(TransportError::Connection("still down".into()))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
