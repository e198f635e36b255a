//! Persistent trip snapshots and live route streams.
//!
//! Both namespaces share one envelope format (`{version, savedAt, payload}`)
//! and one `SnapshotStore`; they differ in key prefix, TTL and how many keys
//! survive a prune.

pub mod live_route;
pub mod snapshot;
pub mod travel;

pub use live_route::{LiveRouteCache, LIVE_ROUTE_MAX_POINTS_PER_KEY};
pub use snapshot::{
    CachePolicy, PayloadField, PayloadUpdate, PruneReport, SnapshotCache, SnapshotPayload,
    TravelSnapshot, CACHE_VERSION,
};
pub use travel::TravelSnapshotCache;

use crate::models::{TripQuery, TripSource};

/// The trip identity a cache key is derived from. Missing parts fall back
/// to fixed placeholders so a key can always be built.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheKeyInput<'a> {
    pub device_id: Option<i64>,
    pub from: Option<&'a str>,
    pub to: Option<&'a str>,
    pub travel_id: Option<&'a str>,
    pub travel_source: Option<TripSource>,
}

impl<'a> CacheKeyInput<'a> {
    pub(crate) fn source(&self) -> &'static str {
        self.travel_source.unwrap_or_default().as_str()
    }

    pub(crate) fn device(&self) -> i64 {
        self.device_id.unwrap_or(0)
    }

    pub(crate) fn travel_id(&self) -> Option<&'a str> {
        self.travel_id.filter(|id| !id.is_empty())
    }
}

impl<'a> From<&'a TripQuery> for CacheKeyInput<'a> {
    fn from(query: &'a TripQuery) -> Self {
        Self {
            device_id: Some(query.device_id),
            from: Some(query.from.as_str()),
            to: Some(query.to.as_str()),
            travel_id: query.travel_id.as_deref(),
            travel_source: query.travel_source,
        }
    }
}
