//! Service registry — which endpoints are announcing which service name.
//!
//! The registry is a concurrent map from service name to ServiceEntry,
//! populated by the multicast listener and read by any number of callers.
//! Each announcement is applied under the entry's shard write lock, so a
//! reader sees the endpoint and its timestamp refresh together or not at all.
//!
//! Nothing is expired here. Staleness is exposed through `last_seen`;
//! `fresh_uris_of` and `evict_stale` layer a TTL on top for callers that
//! want one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use beacon_core::Endpoint;
use dashmap::DashMap;

/// Everything known about one service name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Every endpoint announced under this name since the entry was created.
    pub endpoints: HashSet<Endpoint>,
    /// Wall-clock time of the most recent announcement for this name,
    /// whichever endpoint sent it. Never moves backwards.
    pub last_seen: SystemTime,
}

impl ServiceEntry {
    /// Time since the name was last heard, or zero if the clock stepped back.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_seen).unwrap_or_default()
    }

    pub fn is_stale(&self, ttl: Duration, now: SystemTime) -> bool {
        self.age(now) >= ttl
    }
}

/// The service registry, shared between the listener, the expiry sweep,
/// and query callers. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<DashMap<String, ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one announcement of `endpoint` under `name`, stamped now.
    ///
    /// Returns true if the endpoint was not known for this name before.
    pub fn record(&self, name: &str, endpoint: Endpoint) -> bool {
        self.record_at(name, endpoint, SystemTime::now())
    }

    /// Record one announcement with an explicit timestamp.
    pub fn record_at(&self, name: &str, endpoint: Endpoint, now: SystemTime) -> bool {
        // Fast path avoids allocating the key for names we already track.
        if let Some(mut entry) = self.services.get_mut(name) {
            entry.last_seen = entry.last_seen.max(now);
            return entry.endpoints.insert(endpoint);
        }

        let mut entry = self
            .services
            .entry(name.to_string())
            .or_insert_with(|| ServiceEntry {
                endpoints: HashSet::new(),
                last_seen: now,
            });
        entry.last_seen = entry.last_seen.max(now);
        let added = entry.endpoints.insert(endpoint);
        drop(entry);

        tracing::debug!(service = name, "new service name discovered");
        added
    }

    /// Snapshot of the endpoints known for `name`. Empty if never heard of.
    pub fn known_uris_of(&self, name: &str) -> Vec<Endpoint> {
        self.services
            .get(name)
            .map(|entry| entry.endpoints.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of endpoints and timestamp taken together.
    pub fn entry(&self, name: &str) -> Option<ServiceEntry> {
        self.services.get(name).map(|entry| entry.value().clone())
    }

    pub fn last_seen(&self, name: &str) -> Option<SystemTime> {
        self.services.get(name).map(|entry| entry.last_seen)
    }

    /// Like `known_uris_of`, but empty when the name is older than `ttl`.
    pub fn fresh_uris_of(&self, name: &str, ttl: Duration, now: SystemTime) -> Vec<Endpoint> {
        self.services
            .get(name)
            .filter(|entry| !entry.is_stale(ttl, now))
            .map(|entry| entry.endpoints.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every name not heard from within `ttl`. Returns how many went.
    pub fn evict_stale(&self, ttl: Duration, now: SystemTime) -> usize {
        let before = self.services.len();
        self.services.retain(|_, entry| !entry.is_stale(ttl, now));
        before.saturating_sub(self.services.len())
    }

    /// All service names currently tracked, in no particular order.
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
