use std::sync::Arc;

use chrono::Duration;
use tracing::debug;

use super::{
    CacheKeyInput, CachePolicy, PayloadField, PayloadUpdate, PruneReport, SnapshotCache,
};
use crate::clock::Clock;
use crate::models::{LiveRoutePoint, TripSource};
use crate::store::{SnapshotStore, StoreResult};

pub const LIVE_ROUTE_KEY_PREFIX: &str = "live-route:";
pub const LIVE_ROUTE_TTL_DAYS: i64 = 45;
pub const LIVE_ROUTE_MAX_KEYS: usize = 16;
pub const LIVE_ROUTE_MAX_POINTS_PER_KEY: usize = 120_000;

impl CachePolicy {
    pub fn live_route() -> Self {
        Self {
            prefix: LIVE_ROUTE_KEY_PREFIX,
            ttl: Duration::days(LIVE_ROUTE_TTL_DAYS),
            max_entries: LIVE_ROUTE_MAX_KEYS,
        }
    }
}

/// Append-only stream of live points per trip, stored under `route`.
#[derive(Clone)]
pub struct LiveRouteCache {
    inner: SnapshotCache,
}

impl LiveRouteCache {
    pub fn new(store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: SnapshotCache::new(store, clock, CachePolicy::live_route()),
        }
    }

    /// `live-route:{source}:{travelId}:{deviceId}`, with `device-{deviceId}`
    /// standing in for a missing travel id.
    pub fn build_key(input: CacheKeyInput<'_>) -> String {
        let source = input.source();
        let device = input.device();
        let travel_id = match input.travel_id() {
            Some(id) => id.to_string(),
            None => format!("device-{}", device),
        };
        format!("{}{}:{}:{}", LIVE_ROUTE_KEY_PREFIX, source, travel_id, device)
    }

    /// Shorthand for the common case of a known device and trip.
    pub fn key_for(device_id: i64, travel_id: Option<&str>, source: TripSource) -> String {
        Self::build_key(CacheKeyInput {
            device_id: Some(device_id),
            travel_id,
            travel_source: Some(source),
            ..CacheKeyInput::default()
        })
    }

    /// Valid points for `key` in stored order. Missing, expired or
    /// malformed snapshots read as empty.
    pub async fn get_points(&self, key: &str) -> Vec<LiveRoutePoint> {
        match self.inner.get(key).await {
            Some(snapshot) => snapshot.payload.route_points(),
            None => Vec::new(),
        }
    }

    /// Append `points` after the stored ones, keeping the newest
    /// `max_points`. An empty batch writes nothing.
    pub async fn append_points(
        &self,
        key: &str,
        points: &[LiveRoutePoint],
        max_points: usize,
    ) -> StoreResult<()> {
        if points.is_empty() {
            return Ok(());
        }

        let mut merged = self.get_points(key).await;
        merged.extend_from_slice(points);
        if merged.len() > max_points {
            let excess = merged.len() - max_points;
            merged.drain(..excess);
        }

        debug!(key = key, added = points.len(), total = merged.len(), "Appending live points");
        let update = PayloadUpdate::new().with(PayloadField::Route, &merged)?;
        self.inner.save(key, update).await?;
        Ok(())
    }

    pub async fn prune(&self) -> StoreResult<PruneReport> {
        self.inner.prune().await
    }
}
