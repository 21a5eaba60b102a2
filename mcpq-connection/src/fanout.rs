//! Bounded fan-out over servers
//!
//! A fixed pool of workers pulls indices off a shared counter and writes
//! results into per-index slots, so output order always equals input
//! order no matter which server answers first. A failing server fills its
//! own slot with an error and never disturbs the others.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;

/// Default worker pool size, overridable via `MCPQ_CONCURRENCY`.
const DEFAULT_POOL_SIZE: usize = 5;

pub fn pool_size() -> usize {
    std::env::var("MCPQ_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_POOL_SIZE)
}

/// One per-server slot in the fan-out output.
#[derive(Debug, Clone)]
pub struct FanoutResult<T> {
    pub server: String,
    pub outcome: Result<T, String>,
}

/// Run `fetch` for every server with at most `concurrency` in flight.
/// Returns one slot per input, in input order; the call returns only once
/// every worker has drained.
pub async fn fan_out<T, F, Fut>(servers: Vec<String>, concurrency: usize, fetch: F) -> Vec<FanoutResult<T>>
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
{
    let total = servers.len();
    if total == 0 {
        return Vec::new();
    }

    let servers = Arc::new(servers);
    let next_index = Arc::new(AtomicUsize::new(0));
    let slots: Arc<Mutex<Vec<Option<FanoutResult<T>>>>> =
        Arc::new(Mutex::new((0..total).map(|_| None).collect()));

    let workers = concurrency.max(1).min(total);
    let mut pool = JoinSet::new();
    for _ in 0..workers {
        let servers = Arc::clone(&servers);
        let next_index = Arc::clone(&next_index);
        let slots = Arc::clone(&slots);
        let fetch = fetch.clone();
        pool.spawn(async move {
            loop {
                let index = next_index.fetch_add(1, Ordering::Relaxed);
                if index >= servers.len() {
                    break;
                }
                let server = servers[index].clone();
                let outcome = fetch(server.clone()).await;
                let mut slots = slots.lock().expect("lock poisoned");
                slots[index] = Some(FanoutResult { server, outcome });
            }
        });
    }

    while pool.join_next().await.is_some() {}

    Arc::try_unwrap(slots)
        .map(|mutex| mutex.into_inner().expect("lock poisoned"))
        .unwrap_or_default()
        .into_iter()
        .map(|slot| slot.expect("every slot filled by a worker"))
        .collect()
}
