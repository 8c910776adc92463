// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-key call coalescing.
//!
//! Concurrent callers for the same key share one in-flight computation:
//!
//! ```text
//!   caller A ──► run("k") ──► [leader]   producer() ──┐
//!   caller B ──► run("k") ──► [follower] wait ────────┼──► same result
//!   caller C ──► run("k") ──► [follower] wait ────────┘
//!                                   entry removed once resolved
//! ```
//!
//! Each key maps to a `tokio::sync::OnceCell`. If the leader is cancelled
//! mid-flight, one of the waiting followers runs its own closure instead.
//! Results are cloned to every caller, so failures are shared too, and
//! nothing outlives the flight.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::warn;

type Call = Arc<dyn Any + Send + Sync>;

/// How a caller took part in a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Ran the closure
    Leader,
    /// Received another caller's result
    Follower,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Follower => "follower",
        }
    }
}

/// Registry of in-flight calls keyed by cache key.
#[derive(Default)]
pub struct Singleflight {
    calls: DashMap<String, Call>,
}

impl Singleflight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a flight in progress.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }

    /// Run `f` for `key` unless another caller already is, in which case
    /// wait for and clone its result.
    pub async fn run<T, F, Fut>(&self, key: &str, f: F) -> (T, Role)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let entry = self
                .calls
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::<T>::new()) as Call);
            entry.value().clone().downcast::<OnceCell<T>>().ok()
        };

        let Some(cell) = cell else {
            // Same key in flight with a different result type
            warn!(key, "Singleflight type mismatch, running unshared");
            return (f().await, Role::Leader);
        };

        let guard = FlightGuard { calls: &self.calls, key, cell: &cell };
        let mut led = false;
        let value = cell
            .get_or_init(|| {
                led = true;
                f()
            })
            .await
            .clone();
        drop(guard);

        (value, if led { Role::Leader } else { Role::Follower })
    }
}

/// Removes the flight once resolved, or once abandoned with no waiters.
struct FlightGuard<'a, T> {
    calls: &'a DashMap<String, Call>,
    key: &'a str,
    cell: &'a Arc<OnceCell<T>>,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        let ptr = Arc::as_ptr(self.cell) as *const ();
        let initialized = self.cell.initialized();
        // map entry + this caller
        let abandoned = Arc::strong_count(self.cell) <= 2;
        self.calls.remove_if(self.key, |_, call| {
            Arc::as_ptr(call) as *const () == ptr && (initialized || abandoned)
        });
    }
}
