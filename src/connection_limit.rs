//! Connection Limiting
//!
//! Caps concurrent connections. A slot is held by a [`ConnectionGuard`] for
//! the lifetime of the connection task and released when the guard drops.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct ConnectionLimiter {
    inner: Arc<LimiterState>,
}

struct LimiterState {
    active: AtomicUsize,
    max_connections: usize,
}

impl ConnectionLimiter {
    pub fn new(max_connections: usize) -> Self {
        ConnectionLimiter {
            inner: Arc::new(LimiterState {
                active: AtomicUsize::new(0),
                max_connections,
            }),
        }
    }

    /// Claims a slot, or returns `None` when the relay is at capacity.
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        let max = self.inner.max_connections;
        self.inner
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < max).then_some(current + 1)
            })
            .ok()
            .map(|_| ConnectionGuard {
                inner: self.inner.clone(),
            })
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }
}

/// Releases its connection slot on drop.
pub struct ConnectionGuard {
    inner: Arc<LimiterState>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}
