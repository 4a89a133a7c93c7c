//! Shared-cancellation fan-out for a group of concurrent tasks.
//!
//! Wires a single [`CancellationToken`] through every task in the group so
//! that the first error cancels its siblings promptly, instead of letting
//! every task run to completion before the failure is discovered.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Runs `tasks` concurrently up to `concurrency` at a time, sharing a single
/// [`CancellationToken`]. The first task to return `Err` cancels the token;
/// every other still-running task receives cancellation the next time it
/// checks `token.is_cancelled()`. Returns the first error encountered, if
/// any, alongside every `Ok` output (in task order).
pub async fn run_bounded<F, Fut, T, E>(
    tasks: Vec<F>,
    concurrency: usize,
) -> (Vec<Option<T>>, Option<E>)
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let token = CancellationToken::new();
    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));
    let first_error: Arc<Mutex<Option<E>>> = Arc::new(Mutex::new(None));

    let mut handles = Vec::with_capacity(tasks.len());
    for task in tasks {
        let permit_pool = semaphore.clone();
        let token = token.clone();
        let first_error = first_error.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit_pool.acquire_owned().await.expect("semaphore never closes");
            if token.is_cancelled() {
                return None;
            }
            match task(token.clone()).await {
                Ok(v) => Some(v),
                Err(e) => {
                    let mut slot = first_error.lock().await;
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                    token.cancel();
                    None
                }
            }
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap_or(None));
    }

    let error = Arc::try_unwrap(first_error).map(Mutex::into_inner).unwrap_or(None);
    (results, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type BoxedTask = Box<
        dyn FnOnce(CancellationToken) -> std::pin::Pin<Box<dyn Future<Output = Result<(), &'static str>> + Send>>
            + Send,
    >;

    #[tokio::test]
    async fn first_error_cancels_siblings() {
        let started = Arc::new(AtomicUsize::new(0));
        let cancelled_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks: Vec<BoxedTask> = Vec::new();
        for i in 0..5 {
            let started = started.clone();
            let cancelled_seen = cancelled_seen.clone();
            tasks.push(Box::new(move |token: CancellationToken| {
                Box::pin(async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if i == 0 {
                        return Err::<(), &'static str>("boom");
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    if token.is_cancelled() {
                        cancelled_seen.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(())
                })
            }));
        }

        let (results, error) = run_bounded(tasks, 5).await;
        assert_eq!(error, Some("boom"));
        assert_eq!(results.len(), 5);
    }

    #[tokio::test]
    async fn all_succeed_when_no_errors() {
        let tasks: Vec<_> = (0..3)
            .map(|i| {
                move |_token: CancellationToken| async move { Ok::<_, &'static str>(i * 2) }
            })
            .collect();

        let (results, error) = run_bounded(tasks, 2).await;
        assert!(error.is_none());
        assert_eq!(results.into_iter().flatten().sum::<i32>(), 0 + 2 + 4);
    }
}
