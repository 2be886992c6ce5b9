//! Per-device cancellable reversal timers

use ahash::RandomState;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;

struct Pending {
    generation: u64,
    handle: AbortHandle,
}

/// At most one pending reversal per device; scheduling again replaces it
pub(super) struct ReversalScheduler {
    pending: DashMap<String, Pending, RandomState>,
    generation: AtomicU64,
}

impl ReversalScheduler {
    pub(super) fn new() -> Self {
        Self {
            pending: DashMap::with_hasher(RandomState::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub(super) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Spawn `make(generation)` after `delay`
    ///
    /// The task must call [`finish`](Self::finish) with its generation before
    /// doing work that could schedule or cancel for the same device.
    pub(super) fn schedule<F>(&self, device_id: &str, delay: Duration, make: F)
    where
        F: FnOnce(u64) -> BoxFuture<'static, ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            make(generation).await;
        });

        let previous = self.pending.insert(
            device_id.to_string(),
            Pending {
                generation,
                handle: task.abort_handle(),
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    /// Drop the entry of a task that is about to fire
    pub(super) fn finish(&self, device_id: &str, generation: u64) {
        self.pending
            .remove_if(device_id, |_, pending| pending.generation == generation);
    }

    pub(super) fn cancel(&self, device_id: &str) -> bool {
        match self.pending.remove(device_id) {
            Some((_, pending)) => {
                pending.handle.abort();
                true
            },
            None => false,
        }
    }

    pub(super) fn pending(&self) -> Vec<String> {
        self.pending.retain(|_, pending| !pending.handle.is_finished());
        let mut ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl Drop for ReversalScheduler {
    fn drop(&mut self) {
        for entry in self.pending.iter() {
            entry.handle.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_previous_timer() {
        let scheduler = Arc::new(ReversalScheduler::new());
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let fired = fired.clone();
            let sched = scheduler.clone();
            scheduler.schedule("pump", Duration::from_secs(5), move |generation| {
                Box::pin(async move {
                    sched.finish("pump", generation);
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            });
        }
        assert_eq!(scheduler.pending(), vec!["pump"]);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(scheduler.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let scheduler = ReversalScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        scheduler.schedule("fan", Duration::from_secs(1), move |_| {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        assert!(scheduler.cancel("fan"));
        assert!(!scheduler.cancel("fan"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
