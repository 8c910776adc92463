// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event-driven logging of cache activity.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::MonitoringConfig;
use crate::events::{CacheEvent, CacheEventKind, Listener};

/// Turns [`CacheEvent`]s into `tracing` records according to
/// [`MonitoringConfig`].
///
/// Hits and misses are logged at `debug`, errors at `warn`, connection
/// changes at `info`. Set, delete, expire and evict traffic is logged at
/// `debug` whenever hit logging is on.
#[derive(Debug, Clone, Copy)]
pub struct LoggingListener {
    config: MonitoringConfig,
}

impl LoggingListener {
    #[must_use]
    pub fn new(config: MonitoringConfig) -> Self {
        Self { config }
    }

    /// Whether this listener logs anything at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.config.log_hits || self.config.log_misses || self.config.log_errors
    }

    /// Shared callback for [`EventListeners::add_shared`](crate::events::EventListeners::add_shared).
    #[must_use]
    pub fn into_listener(self) -> Listener {
        Arc::new(move |event: &CacheEvent| self.on_event(event))
    }

    pub fn on_event(&self, event: &CacheEvent) {
        let key = event.key.as_deref().unwrap_or("-");
        let source = event.source.map(|s| s.as_str()).unwrap_or("-");
        let operation = event.operation().unwrap_or("-");

        match event.kind {
            CacheEventKind::Hit if self.config.log_hits => {
                debug!(key, source, operation, "Cache hit");
            }
            CacheEventKind::Miss if self.config.log_misses => {
                debug!(key, source, operation, "Cache miss");
            }
            CacheEventKind::Error if self.config.log_errors => {
                warn!(
                    key,
                    source,
                    operation,
                    error = event.error.as_deref().unwrap_or("unknown"),
                    "Cache error"
                );
            }
            CacheEventKind::Connect if self.config.log_errors => {
                info!(source, "Cache backend connected");
            }
            CacheEventKind::Disconnect if self.config.log_errors => {
                warn!(source, error = event.error.as_deref().unwrap_or("-"), "Cache backend disconnected");
            }
            CacheEventKind::Set
            | CacheEventKind::Delete
            | CacheEventKind::Expire
            | CacheEventKind::Evict
                if self.config.log_hits =>
            {
                debug!(key, source, operation, kind = %event.kind, "Cache write");
            }
            _ => {}
        }
    }
}
