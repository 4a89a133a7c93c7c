//! Exponential backoff for transient AI-vendor failures: network/HTTP
//! errors retry with backoff, but a rejected schema never does. This is a
//! call-scoped helper so a single stage invocation doesn't need a full job
//! retry to recover from one flaky HTTP response.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::AiError;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base: Duration::from_millis(200), cap: Duration::from_secs(10), max_attempts: 4 }
    }
}

impl BackoffPolicy {
    /// `min(base * 2^(attempt-1), cap)` with jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << attempt.saturating_sub(1).min(20));
        let capped = exp.min(self.cap.as_millis());
        let jitter_frac: f64 = rand::thread_rng().gen_range(0.8..1.2);
        Duration::from_millis(((capped as f64) * jitter_frac) as u64)
    }
}

/// Runs `f` up to `policy.max_attempts` times, retrying only on
/// [`AiError::is_transient`]. Schema-shape failures surface immediately.
pub async fn with_retry<F, Fut, T>(policy: BackoffPolicy, mut f: F) -> Result<T, AiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AiError>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = BackoffPolicy { base: Duration::from_millis(1), cap: Duration::from_millis(5), max_attempts: 5 };
        let result: Result<u32, AiError> = with_retry(policy, || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(AiError::Transient("boom".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_schema_rejected() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = BackoffPolicy::default();
        let result: Result<u32, AiError> = with_retry(policy, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AiError::SchemaRejected("bad shape".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = BackoffPolicy { base: Duration::from_millis(1), cap: Duration::from_millis(2), max_attempts: 3 };
        let result: Result<u32, AiError> = with_retry(policy, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AiError::Transient("still down".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
