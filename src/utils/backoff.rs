use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::BackendError;
use crate::BackoffPolicy;
use crate::Result;

/// Runs `task` until it succeeds, each attempt bounded by `policy.timeout_ms`.
///
/// Delays between attempts start at `base_delay_ms` and double up to
/// `max_delay_ms`. `max_retries` is the total number of attempts, 0 means
/// retry forever. The last error is returned once attempts are exhausted.
pub async fn task_with_timeout_and_exponential_backoff<F, Fut, T>(
    mut task: F,
    policy: BackoffPolicy,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut current_delay = Duration::from_millis(policy.base_delay_ms);
    let timeout_duration = Duration::from_millis(policy.timeout_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);

    loop {
        attempt += 1;
        debug!("Attempt {} of {}", attempt, policy.max_retries);

        let last_error = match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) => {
                warn!("Attempt {} failed: {}", attempt, e);
                e
            }
            Err(_) => {
                warn!("Task timed out after {:?}", timeout_duration);
                BackendError::Timeout(timeout_duration).into()
            }
        };

        if policy.max_retries != 0 && attempt >= policy.max_retries {
            warn!("Task failed after {} attempts", attempt);
            return Err(last_error);
        }

        debug!("Retrying in {:?}...", current_delay);
        sleep(current_delay).await;
        current_delay = (current_delay * 2).min(max_delay);
    }
}
