use std::{fmt::Display, future::Future, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::warn;

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

/// Single-value cache with a time-to-live.
///
/// The lock is held across a refresh so concurrent callers wait for one fetch
/// instead of each hitting the upstream.
pub struct RateCache<T> {
    ttl: Duration,
    slot: Mutex<Option<Cached<T>>>,
}

impl<T: Clone> RateCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Returns the cached value while fresh, otherwise runs `fetch`. When the
    /// refresh fails a stale value is served if there is one.
    pub async fn get_or_refresh<F, Fut, E>(&self, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.value.clone());
            }
        }

        match fetch().await {
            Ok(value) => {
                *slot = Some(Cached {
                    value: value.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(value)
            }
            Err(e) => match slot.as_ref() {
                Some(stale) => {
                    warn!(error = %e, "Refresh failed, serving stale value");
                    Ok(stale.value.clone())
                }
                None => Err(e),
            },
        }
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
