//! One-shot cooperative cancellation shared between the host and the supervisor.
//!
//! Wraps [`tokio_util::sync::CancellationToken`] (so tasks can `await` the
//! transition) and adds observer callbacks that fire exactly once.

use std::sync::{Arc, Mutex};

use tracing::debug;

type Observer = Box<dyn FnOnce() + Send + 'static>;

/// Shared cancellation flag. Clones observe the same state.
#[derive(Clone)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
    // `None` once the token has fired.
    observers: Arc<Mutex<Option<Vec<Observer>>>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: tokio_util::sync::CancellationToken::new(),
            observers: Arc::new(Mutex::new(Some(Vec::new()))),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Transition to cancelled and run every registered observer.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn cancel(&self) -> bool {
        let fired = {
            let mut guard = match self.observers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let fired = guard.take();
            if fired.is_some() {
                self.inner.cancel();
            }
            fired
        };
        let Some(observers) = fired else {
            return false;
        };
        debug!(observers = observers.len(), "cancellation requested");
        for observer in observers {
            observer();
        }
        true
    }

    /// Register a callback for the cancellation transition.
    ///
    /// Runs immediately (on the caller's thread) if the token already fired.
    pub fn on_cancel<F>(&self, observer: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut guard = match self.observers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_mut() {
            Some(observers) => observers.push(Box::new(observer)),
            None => {
                drop(guard);
                observer();
            }
        }
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cancel_fires_observers_once() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            token.on_cancel(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn observer_registered_after_cancel_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        handle.await.expect("join");
    }
}
