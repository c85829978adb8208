use std::fmt::Display;
use std::future::Future;

use font_core::RetryPolicy;
use tracing::warn;

/// Result of a retried operation plus how many tries it took
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, returns a non-retryable error, or the policy
/// runs out of attempts. Sleeps `policy.delay_for(n)` before retry `n`.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    retryable: R,
) -> Retried<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if attempt < max_attempts && retryable(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {:?}",
                    label, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Retried {
                    result: Err(e),
                    attempts: attempt,
                }
            }
        }
    }
}
