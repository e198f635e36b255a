use std::sync::Arc;

use chrono::Duration;

use super::{CacheKeyInput, CachePolicy, PayloadUpdate, PruneReport, SnapshotCache, TravelSnapshot};
use crate::clock::Clock;
use crate::store::{SnapshotStore, StoreResult};

pub const TRAVEL_KEY_PREFIX: &str = "travel:";
pub const TRAVEL_TTL_DAYS: i64 = 14;
pub const TRAVEL_MAX_SNAPSHOTS: usize = 20;

impl CachePolicy {
    pub fn travel() -> Self {
        Self {
            prefix: TRAVEL_KEY_PREFIX,
            ttl: Duration::days(TRAVEL_TTL_DAYS),
            max_entries: TRAVEL_MAX_SNAPSHOTS,
        }
    }
}

/// Network responses per trip, kept so a trip can be shown offline.
#[derive(Clone)]
pub struct TravelSnapshotCache {
    inner: SnapshotCache,
}

impl TravelSnapshotCache {
    pub fn new(store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: SnapshotCache::new(store, clock, CachePolicy::travel()),
        }
    }

    /// `travel:{source}:{travelId}:{deviceId}:{from}:{to}`.
    ///
    /// Without a travel id the id segment becomes `auto-{deviceId}-{from}-{to}`.
    pub fn build_key(input: CacheKeyInput<'_>) -> String {
        let source = input.source();
        let device = input.device();
        let from = input.from.filter(|s| !s.is_empty()).unwrap_or("unknown-from");
        let to = input.to.filter(|s| !s.is_empty()).unwrap_or("unknown-to");
        let travel_id = match input.travel_id() {
            Some(id) => id.to_string(),
            None => format!("auto-{}-{}-{}", device, from, to),
        };
        format!(
            "{}{}:{}:{}:{}:{}",
            TRAVEL_KEY_PREFIX, source, travel_id, device, from, to
        )
    }

    pub async fn get(&self, key: &str) -> Option<TravelSnapshot> {
        self.inner.get(key).await
    }

    pub async fn save(&self, key: &str, update: PayloadUpdate) -> StoreResult<TravelSnapshot> {
        self.inner.save(key, update).await
    }

    pub async fn prune(&self) -> StoreResult<PruneReport> {
        self.inner.prune().await
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.now()
    }
}
