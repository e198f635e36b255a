use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::models::{DeviceEvent, LiveRoutePoint, ManualPoi, PlotData, Position};
use crate::store::{SnapshotStore, StoreResult};

/// The only envelope version this crate reads or writes.
pub const CACHE_VERSION: u32 = 1;

/// Expiry and eviction rules for one key namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    pub prefix: &'static str,
    pub ttl: Duration,
    pub max_entries: usize,
}

/// Top-level payload fields. Writes replace whole fields, never merge inside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadField {
    Plotmaps,
    Route,
    Events,
    ManualPois,
}

impl PayloadField {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadField::Plotmaps => "plotmaps",
            PayloadField::Route => "route",
            PayloadField::Events => "events",
            PayloadField::ManualPois => "manualPois",
        }
    }
}

/// Snapshot payload kept as raw JSON so unknown fields survive a merge;
/// typed accessors validate on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotPayload(Map<String, Value>);

impl SnapshotPayload {
    pub fn raw(&self, field: PayloadField) -> Option<&Value> {
        self.0.get(field.as_str()).filter(|v| !v.is_null())
    }

    pub fn has(&self, field: PayloadField) -> bool {
        self.raw(field).is_some()
    }

    /// Shallow merge: fields in `update` replace ours, the rest are kept.
    pub fn merge(&mut self, update: PayloadUpdate) {
        for (key, value) in update.0 {
            self.0.insert(key, value);
        }
    }

    pub fn plot_data(&self) -> Option<PlotData> {
        let raw = self.raw(PayloadField::Plotmaps)?;
        match serde_json::from_value(raw.clone()) {
            Ok(plot) => Some(plot),
            Err(e) => {
                debug!(error = %e, "Cached plot data has an unexpected shape");
                None
            }
        }
    }

    /// Live points stored under `route`, skipping malformed entries.
    pub fn route_points(&self) -> Vec<LiveRoutePoint> {
        self.raw(PayloadField::Route)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(LiveRoutePoint::from_value).collect())
            .unwrap_or_default()
    }

    /// Raw positions stored under `route`, or `None` when the field is absent.
    pub fn route_positions(&self) -> Option<Vec<Position>> {
        let items = self.raw(PayloadField::Route)?.as_array()?;
        Some(Position::from_values(items.clone()))
    }

    pub fn events(&self) -> Option<Vec<DeviceEvent>> {
        let items = self.raw(PayloadField::Events)?.as_array()?;
        Some(
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
        )
    }

    pub fn manual_pois(&self) -> Vec<ManualPoi> {
        self.raw(PayloadField::ManualPois)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The fields one `save` supplies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadUpdate(Map<String, Value>);

impl PayloadUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Serialize + ?Sized>(
        mut self,
        field: PayloadField,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        self.0
            .insert(field.as_str().to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Persisted envelope: `{version, savedAt, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TravelSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub payload: SnapshotPayload,
}

impl TravelSnapshot {
    pub fn new(saved_at: DateTime<Utc>, payload: SnapshotPayload) -> Self {
        Self {
            version: CACHE_VERSION,
            saved_at,
            payload,
        }
    }

    /// Parse a stored value. Wrong version or shape yields `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        let snapshot: Self = serde_json::from_value(value).ok()?;
        (snapshot.version == CACHE_VERSION).then_some(snapshot)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.saved_at > ttl
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub expired: usize,
    pub evicted: usize,
    pub retained: usize,
}

/// Expiry, merge-on-save and eviction over one namespace of a `SnapshotStore`.
#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>, policy: CachePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// A live, well-formed snapshot for `key`, or `None`.
    ///
    /// Expired and malformed entries are deleted on the way out. Store
    /// failures are logged and read as a miss.
    pub async fn get(&self, key: &str) -> Option<TravelSnapshot> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!(key = key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let Some(snapshot) = TravelSnapshot::from_value(raw) else {
            debug!(key = key, "Discarding malformed snapshot");
            self.discard(key).await;
            return None;
        };

        if snapshot.is_expired(self.clock.now(), self.policy.ttl) {
            debug!(key = key, saved_at = %snapshot.saved_at, "Discarding expired snapshot");
            self.discard(key).await;
            return None;
        }

        Some(snapshot)
    }

    /// Shallow-merge `update` into the snapshot at `key`, stamp it, write it,
    /// then prune this namespace.
    pub async fn save(&self, key: &str, update: PayloadUpdate) -> StoreResult<TravelSnapshot> {
        let mut payload = self
            .get(key)
            .await
            .map(|existing| existing.payload)
            .unwrap_or_default();
        payload.merge(update);

        let snapshot = TravelSnapshot::new(self.clock.now(), payload);
        self.store.set(key, serde_json::to_value(&snapshot)?).await?;
        debug!(key = key, "Snapshot saved");

        if let Err(e) = self.prune().await {
            warn!(prefix = self.policy.prefix, error = %e, "Snapshot pruning failed");
        }

        Ok(snapshot)
    }

    /// Drop expired (and unreadable) entries, then keep only the newest
    /// `max_entries` by `savedAt`.
    pub async fn prune(&self) -> StoreResult<PruneReport> {
        let now = self.clock.now();
        let mut report = PruneReport::default();

        for (key, snapshot) in self.namespace_entries().await? {
            let expired = match &snapshot {
                Some(snapshot) => snapshot.is_expired(now, self.policy.ttl),
                None => true,
            };
            if expired {
                self.store.delete(&key).await?;
                report.expired += 1;
            }
        }

        let mut fresh: Vec<(String, TravelSnapshot)> = self
            .namespace_entries()
            .await?
            .into_iter()
            .filter_map(|(key, snapshot)| snapshot.map(|s| (key, s)))
            .collect();
        fresh.sort_by(|a, b| b.1.saved_at.cmp(&a.1.saved_at));

        if fresh.len() > self.policy.max_entries {
            for (key, _) in fresh.split_off(self.policy.max_entries) {
                self.store.delete(&key).await?;
                report.evicted += 1;
            }
        }
        report.retained = fresh.len();

        if report.expired > 0 || report.evicted > 0 {
            debug!(
                prefix = self.policy.prefix,
                expired = report.expired,
                evicted = report.evicted,
                retained = report.retained,
                "Pruned snapshot namespace"
            );
        }
        Ok(report)
    }

    async fn namespace_entries(&self) -> StoreResult<Vec<(String, Option<TravelSnapshot>)>> {
        Ok(self
            .store
            .entries()
            .await?
            .into_iter()
            .filter(|(key, _)| key.starts_with(self.policy.prefix))
            .map(|(key, value)| (key, TravelSnapshot::from_value(value)))
            .collect())
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            debug!(key = key, error = %e, "Failed to delete stale snapshot");
        }
    }
}
