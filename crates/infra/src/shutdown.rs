//! Cooperative shutdown signal shared by every worker.
//!
//! Created once by the orchestrator and handed to each worker at spawn time.
//! Once triggered it stays set for the lifetime of the process group.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Default)]
struct State {
    set: bool,
    reason: Option<String>,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    state: Mutex<State>,
    cond: Condvar,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            token: CancellationToken::new(),
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        }
    }
}

/// Process-group wide shutdown flag.
///
/// Cheap to clone; every clone observes the same flag.
///
/// - `trigger` sets it (idempotent)
/// - `is_set` is a non-blocking read
/// - `wait` blocks the calling thread (run it under `spawn_blocking`)
/// - `cancelled` is the async equivalent, for `tokio::select!`
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Returns `true` only for the call that actually set it;
    /// later calls are no-ops and keep the first reason.
    pub fn trigger(&self, reason: impl Into<String>) -> bool {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.set {
            return false;
        }

        let reason = reason.into();
        info!(reason = %reason, "shutdown triggered");

        state.set = true;
        state.reason = Some(reason);
        drop(state);

        self.inner.token.cancel();
        self.inner.cond.notify_all();
        true
    }

    pub fn is_set(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Why the signal was triggered, once it has been.
    pub fn reason(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reason
            .clone()
    }

    /// Block the current thread until the signal is set.
    pub fn wait(&self) {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        let _state = self
            .inner
            .cond
            .wait_while(state, |s| !s.set)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Resolve once the signal is set.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// A child token that is cancelled together with this signal.
    pub fn child_token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_clear() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_set());
        assert_eq!(signal.reason(), None);
    }

    #[test]
    fn trigger_is_idempotent_and_sticky() {
        let signal = ShutdownSignal::new();
        let other = signal.clone();

        assert!(signal.trigger("first"));
        assert!(!other.trigger("second"));
        assert!(signal.is_set());
        assert!(other.is_set());
        assert_eq!(other.reason().as_deref(), Some("first"));
    }

    #[test]
    fn wait_blocks_until_triggered_from_another_thread() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            std::thread::spawn(move || signal.wait())
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        signal.trigger("test");
        waiter.join().unwrap();
    }

    #[test]
    fn wait_returns_immediately_when_already_set() {
        let signal = ShutdownSignal::new();
        signal.trigger("test");
        signal.wait();
    }

    #[tokio::test]
    async fn cancelled_resolves_for_async_waiters() {
        let signal = ShutdownSignal::new();
        let child = signal.child_token();
        let task = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };

        signal.trigger("test");
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(child.is_cancelled());
    }
}
