use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SyncError;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, SyncError>>>;

struct InFlight<V> {
    ticket: u64,
    fetch: SharedFetch<V>,
}

/// Keeps at most one request per key outstanding.
///
/// The fetch runs as its own task: callers that stop waiting do not cancel it, and the
/// handle is released by the task itself once the fetch has finished, whatever the outcome.
pub struct RequestCoordinator<K, V> {
    inflight: Arc<Mutex<HashMap<K, InFlight<V>>>>,
    next_ticket: AtomicU64,
}

impl<K, V> Default for RequestCoordinator<K, V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: AtomicU64::new(0),
        }
    }
}

impl<K, V> RequestCoordinator<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the fetch built by `make` unless one is already in flight for `key`, in which
    /// case the caller waits for that one instead.
    pub async fn coalesce<F, Fut>(&self, key: K, make: F) -> Result<V, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, SyncError>> + Send + 'static,
    {
        let fetch = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&key) {
                Some(existing) => {
                    debug!(?key, "joining in-flight request");
                    existing.fetch.clone()
                }
                None => {
                    let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                    let registry = Arc::clone(&self.inflight);
                    let task_key = key.clone();
                    let work = make();
                    // The registry lock is held until the handle is inserted, so the task
                    // cannot release it before it exists.
                    let task = tokio::spawn(async move {
                        let outcome = work.await;
                        let mut inflight = registry.lock().await;
                        if inflight.get(&task_key).map(|f| f.ticket) == Some(ticket) {
                            inflight.remove(&task_key);
                        }
                        outcome
                    });
                    let fetch = async move { task.await.unwrap_or_else(|e| Err(e.into())) }
                        .boxed()
                        .shared();
                    inflight.insert(
                        key,
                        InFlight {
                            ticket,
                            fetch: fetch.clone(),
                        },
                    );
                    fetch
                }
            }
        };
        fetch.await
    }

    pub async fn is_in_flight(&self, key: &K) -> bool {
        self.inflight.lock().await.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let coordinator = Arc::new(RequestCoordinator::<&'static str, u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut waiters = Vec::new();
        for _ in 0..5 {
            let coordinator = Arc::clone(&coordinator);
            let calls = Arc::clone(&calls);
            waiters.push(tokio::spawn(async move {
                coordinator
                    .coalesce("feeds", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_in_flight(&"feeds").await);
    }

    #[tokio::test]
    async fn failed_fetch_releases_the_handle() {
        let coordinator = RequestCoordinator::<u8, u32>::new();

        let first = coordinator
            .coalesce(1, || async { Err(SyncError::Unauthenticated) })
            .await;
        assert!(matches!(first, Err(SyncError::Unauthenticated)));
        assert!(!coordinator.is_in_flight(&1).await);

        let second = coordinator.coalesce(1, || async { Ok(3) }).await;
        assert_eq!(second.unwrap(), 3);
    }
}
