//! Observable caches of persisted entities.
//!
//! The store is the source of truth; these caches are replaced wholesale after
//! every successful load and never patched locally. Consumers watch a
//! [`ListState`] through a `tokio::sync::watch` receiver.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::watch;

use crate::{AppError, AppResult};

mod clients;
mod sessions;

pub use clients::ClientStore;
pub use sessions::SessionStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListState<T> {
    pub items: Vec<T>,
    /// True while at least one load is in flight.
    pub loading: bool,
    /// Last failure; cleared by the next successful load.
    pub error: Option<AppError>,
    /// Bumped every time `items` is replaced.
    pub revision: u64,
}

impl<T> Default for ListState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            error: None,
            revision: 0,
        }
    }
}

impl<T> ListState<T> {
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether the cache has been filled at least once.
    pub fn is_loaded(&self) -> bool {
        self.revision > 0
    }
}

#[derive(Debug, Default)]
struct LoadTracker {
    issued: u64,
    applied: u64,
    in_flight: usize,
}

/// One observable list plus the bookkeeping that orders its loads.
pub(crate) struct ListChannel<T> {
    name: &'static str,
    tx: watch::Sender<ListState<T>>,
    tracker: Mutex<LoadTracker>,
}

impl<T: Clone> ListChannel<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(ListState::default());
        Self {
            name,
            tx,
            tracker: Mutex::new(LoadTracker::default()),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ListState<T>> {
        self.tx.subscribe()
    }

    pub(crate) fn snapshot(&self) -> ListState<T> {
        self.tx.borrow().clone()
    }

    /// Reserve a sequence number for a new load and mark the list as loading.
    pub(crate) fn begin_load(&self) -> u64 {
        let seq = {
            let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
            tracker.issued += 1;
            tracker.in_flight += 1;
            tracker.issued
        };
        self.tx.send_modify(|state| state.loading = true);
        seq
    }

    /// Apply the outcome of load `seq` unless a newer load has already landed.
    ///
    /// Returns `false` when the result was discarded as stale.
    pub(crate) fn finish_load(&self, seq: u64, outcome: &AppResult<Vec<T>>) -> bool {
        let (fresh, still_loading) = {
            let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
            tracker.in_flight = tracker.in_flight.saturating_sub(1);
            let fresh = seq > tracker.applied;
            if fresh {
                tracker.applied = seq;
            }
            (fresh, tracker.in_flight > 0)
        };

        if !fresh {
            tracing::debug!(
                target: "chrio",
                event = "stale_load_discarded",
                list = self.name,
                seq
            );
            self.tx.send_modify(|state| state.loading = still_loading);
            return false;
        }

        self.tx.send_modify(|state| {
            state.loading = still_loading;
            match outcome {
                Ok(items) => {
                    state.items = items.clone();
                    state.error = None;
                    state.revision += 1;
                }
                Err(err) => {
                    state.error = Some(err.clone());
                }
            }
        });
        true
    }

    /// Record a failed write without touching the cached items.
    pub(crate) fn record_error(&self, err: &AppError) {
        tracing::warn!(
            target: "chrio",
            event = "state_write_failed",
            list = self.name,
            code = err.code(),
            message = err.message()
        );
        self.tx.send_modify(|state| state.error = Some(err.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_replaces_items_and_clears_error() {
        let channel = ListChannel::<u32>::new("test");
        channel.record_error(&AppError::from("boom"));
        let seq = channel.begin_load();
        assert!(channel.snapshot().loading);
        assert!(channel.finish_load(seq, &Ok(vec![1, 2])));
        let state = channel.snapshot();
        assert_eq!(state.items, vec![1, 2]);
        assert!(!state.loading);
        assert!(state.error.is_none());
        assert_eq!(state.revision, 1);
    }

    #[test]
    fn failure_keeps_previous_items() {
        let channel = ListChannel::<u32>::new("test");
        let seq = channel.begin_load();
        channel.finish_load(seq, &Ok(vec![7]));
        let seq = channel.begin_load();
        channel.finish_load(seq, &Err(AppError::storage_unavailable("gone")));
        let state = channel.snapshot();
        assert_eq!(state.items, vec![7]);
        assert!(state.has_error());
        assert_eq!(state.revision, 1);
    }

    #[test]
    fn older_completion_is_discarded() {
        let channel = ListChannel::<u32>::new("test");
        let first = channel.begin_load();
        let second = channel.begin_load();
        assert!(channel.finish_load(second, &Ok(vec![2])));
        assert!(channel.snapshot().loading);
        assert!(!channel.finish_load(first, &Ok(vec![1])));
        let state = channel.snapshot();
        assert_eq!(state.items, vec![2]);
        assert!(!state.loading);
    }

    #[test]
    fn out_of_order_newer_result_still_applies() {
        let channel = ListChannel::<u32>::new("test");
        let first = channel.begin_load();
        let second = channel.begin_load();
        assert!(channel.finish_load(first, &Ok(vec![1])));
        assert!(channel.finish_load(second, &Ok(vec![2])));
        assert_eq!(channel.snapshot().items, vec![2]);
    }
}
