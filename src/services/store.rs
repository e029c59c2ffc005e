use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::models::{ClientKey, RateWindow};
use crate::services::clock::Clock;

/// Counter backend for the admission controller.
///
/// `increment` must be atomic per key: two concurrent calls for the same key
/// always observe distinct counts. A single instance uses [`MemoryStore`];
/// replicated deployments plug a shared counter service in here so quotas
/// are enforced across processes.
#[async_trait]
pub trait RateLimitStore: Send + Sync + Debug {
    /// Counts one request against `key` and returns the window as it stands
    /// after the increment. An expired or missing window restarts at 1.
    async fn increment(&self, key: &ClientKey) -> RateWindow;

    /// Drops windows that have already expired. Returns how many were
    /// removed.
    async fn purge_expired(&self) -> usize;
}

/// In-process fixed-window counters. Each key lives in one `DashMap` shard,
/// whose write lock serializes the read-modify-write of that key.
#[derive(Debug)]
pub struct MemoryStore {
    windows: DashMap<ClientKey, RateWindow>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            clock,
        }
    }

    pub fn get(&self, key: &ClientKey) -> Option<RateWindow> {
        self.windows.get(key).map(|entry| *entry)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn increment(&self, key: &ClientKey) -> RateWindow {
        let now = self.clock.now();
        let mut entry = self.windows.entry(key.clone()).or_insert(RateWindow {
            count: 0,
            window_start: now,
        });

        if now.saturating_duration_since(entry.window_start) >= self.window {
            *entry = RateWindow {
                count: 1,
                window_start: now,
            };
        } else {
            entry.count = entry.count.saturating_add(1);
        }

        *entry
    }

    async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.windows.retain(|_, window| {
            let live = now.saturating_duration_since(window.window_start) < self.window;
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }
}
