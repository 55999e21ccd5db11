use super::{ProvisionError, ProvisionResult};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Re-runs read-only platform queries when the transport flakes out.
/// Never wrap submissions with this: a retried create is a second machine.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> ProvisionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProvisionResult<T>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(result) => {
                    if retries > 0 {
                        info!(what, retries, "Query succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(e) if e.is_transient() && retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        what,
                        error = %e,
                        retry_count = retries,
                        max_retries = self.max_retries,
                        "Query failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        error!(what, error = %e, "Maximum retries reached, giving up");
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result = policy
            .run("list", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProvisionError::Platform("connection reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_task_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result: ProvisionResult<()> = policy
            .run("task", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProvisionError::Task {
                    operation: crate::core::Operation::Create,
                    detail: "InvalidName".into(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let result: ProvisionResult<()> = policy
            .run("list", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProvisionError::Platform("503".into()))
            })
            .await;

        assert!(matches!(result, Err(ProvisionError::Platform(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
