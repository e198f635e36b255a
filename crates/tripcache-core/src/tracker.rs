//! Session state for one map: selection, rendering, live mode and caches.
//!
//! `LiveTracker` owns the shared `MapState` and wires the loader and the
//! live poller to it. All state mutation happens in short synchronous
//! sections between awaits.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::{PlotSource, PoiSource, PositionSource};
use crate::cache::{LiveRouteCache, PruneReport, TravelSnapshotCache};
use crate::clock::Clock;
use crate::error::TrackerError;
use crate::loader::{Sourced, TravelDataLoader};
use crate::lock;
use crate::models::{DeviceEvent, Position, QueryDefaults, Trip, TripQuery};
use crate::network::NetworkStatus;
use crate::poller::{LivePoller, PollPhase, PollTimer};
use crate::settings::{normalize_polling_interval, LiveSettings, SettingsStore};
use crate::state::{MapState, SharedMapState};
use crate::store::{SnapshotStore, StoreResult};

// ============================================================================
// Construction
// ============================================================================

/// Everything a tracker needs from the outside world.
pub struct TrackerDeps {
    pub store: Arc<dyn SnapshotStore>,
    pub plots: Arc<dyn PlotSource>,
    pub pois: Arc<dyn PoiSource>,
    pub positions: Arc<dyn PositionSource>,
    pub settings: Arc<dyn SettingsStore>,
    pub timer: Arc<dyn PollTimer>,
    pub clock: Arc<dyn Clock>,
    pub network: NetworkStatus,
    pub defaults: QueryDefaults,
}

pub struct LiveTracker {
    map: SharedMapState,
    loader: TravelDataLoader,
    poller: LivePoller,
    settings_store: Arc<dyn SettingsStore>,
    travel_cache: TravelSnapshotCache,
    live_cache: LiveRouteCache,
    network: NetworkStatus,
}

impl LiveTracker {
    /// Build a tracker, restoring live mode and interval from the settings
    /// store. Nothing is scheduled until the first render.
    pub fn new(deps: TrackerDeps) -> Self {
        let map = MapState::shared();
        let travel_cache = TravelSnapshotCache::new(deps.store.clone(), deps.clock.clone());
        let live_cache = LiveRouteCache::new(deps.store, deps.clock.clone());

        let loader = TravelDataLoader::new(
            deps.plots,
            deps.pois,
            deps.positions.clone(),
            travel_cache.clone(),
            deps.network.clone(),
            deps.defaults.clone(),
        );
        let poller = LivePoller::new(
            deps.positions,
            live_cache.clone(),
            map.clone(),
            deps.timer,
            deps.network.clone(),
            deps.clock,
            deps.defaults,
        );

        let settings = deps.settings.load();
        poller.restore(
            settings.live_mode_enabled,
            Duration::from_millis(settings.live_polling_interval_ms),
        );
        debug!(
            live = settings.live_mode_enabled,
            interval_ms = settings.live_polling_interval_ms,
            "Restored live settings"
        );

        Self {
            map,
            loader,
            poller,
            settings_store: deps.settings,
            travel_cache,
            live_cache,
            network: deps.network,
        }
    }

    pub fn map(&self) -> SharedMapState {
        self.map.clone()
    }

    /// A copy of the current map state.
    pub fn snapshot(&self) -> MapState {
        lock(&self.map).clone()
    }

    pub fn network(&self) -> &NetworkStatus {
        &self.network
    }

    pub fn poller(&self) -> &LivePoller {
        &self.poller
    }

    pub fn is_live(&self) -> bool {
        self.poller.is_live()
    }

    pub fn phase(&self) -> PollPhase {
        self.poller.phase()
    }

    pub fn settings(&self) -> LiveSettings {
        LiveSettings {
            live_mode_enabled: self.poller.is_live(),
            live_polling_interval_ms: self.poller.interval().as_millis() as u64,
        }
    }

    fn persist_settings(&self) {
        if let Err(e) = self.settings_store.save(&self.settings()) {
            warn!(error = %e, "Failed to persist live settings");
        }
    }

    // ========================================================================
    // Selection and rendering
    // ========================================================================

    /// Replace the selection (duplicates dropped, first wins) and render it.
    pub async fn select_trips(&self, trips: Vec<Trip>) -> Result<(), TrackerError> {
        let mut seen = HashSet::new();
        let selected: Vec<Trip> = trips
            .into_iter()
            .filter(|trip| seen.insert(trip.selection_key()))
            .collect();
        debug!(count = selected.len(), "Trips selected");
        lock(&self.map).selected_trips = selected;
        self.render().await
    }

    /// Render the current selection. While live, cached live points are
    /// restored onto the fresh polylines and the timer is armed.
    pub async fn render(&self) -> Result<(), TrackerError> {
        let trips = lock(&self.map).selected_trips.clone();
        self.loader.render_into(&self.map, &trips).await?;

        if self.poller.is_live() {
            self.poller.seed_from_cache().await;
            self.poller.schedule();
        }
        Ok(())
    }

    // ========================================================================
    // Live mode
    // ========================================================================

    /// Persist the choice. Enabling restores cached points, then polls once
    /// right away (which re-arms the timer).
    pub async fn set_live_mode_enabled(&self, enabled: bool) {
        self.poller.set_live_mode(enabled);
        self.persist_settings();
        info!(enabled = enabled, "Live mode changed");

        if enabled {
            self.poller.seed_from_cache().await;
            self.poller.poll_live_updates().await;
        }
    }

    /// Normalize, persist and apply a new polling interval.
    pub fn set_polling_interval(&self, ms: u64) {
        let normalized = normalize_polling_interval(ms as f64);
        self.poller.set_interval(Duration::from_millis(normalized));
        self.persist_settings();
    }

    /// Drive timer ticks into poll cycles until `shutdown` resolves or the
    /// tick channel closes, then cancel the timer.
    pub async fn run_until<F>(&self, ticks: &mut mpsc::UnboundedReceiver<()>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Shutdown requested");
                    break;
                }
                tick = ticks.recv() => match tick {
                    Some(()) => self.poller.poll_live_updates().await,
                    None => break,
                },
            }
        }
        self.poller.cancel();
    }

    // ========================================================================
    // Route, events and cache maintenance
    // ========================================================================

    fn primary_query(&self) -> TripQuery {
        let primary = lock(&self.map).selected_trips.first().cloned();
        self.loader.query_for(primary.as_ref())
    }

    fn apply_provenance<T>(&self, sourced: Sourced<T>) -> T {
        lock(&self.map).provenance = sourced.provenance;
        sourced.value
    }

    /// Route of the primary selected trip (or the default query).
    pub async fn load_route(&self) -> Result<Vec<Position>, TrackerError> {
        let query = self.primary_query();
        let sourced = self.loader.load_route(&query).await?;
        Ok(self.apply_provenance(sourced))
    }

    /// Device events of the primary selected trip (or the default query).
    pub async fn load_events(&self) -> Result<Vec<DeviceEvent>, TrackerError> {
        let query = self.primary_query();
        let sourced = self.loader.load_events(&query).await?;
        Ok(self.apply_provenance(sourced))
    }

    pub async fn prune_caches(&self) -> StoreResult<(PruneReport, PruneReport)> {
        let travel = self.travel_cache.prune().await?;
        let live = self.live_cache.prune().await?;
        Ok((travel, live))
    }
}
