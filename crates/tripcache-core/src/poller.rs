//! Incremental live position polling.
//!
//! While live mode is on, a timer fires every polling interval and each
//! auto-detected trip on the map is extended with positions newer than the
//! last one it has seen. Cycles never overlap: a tick that arrives while a
//! cycle is running is skipped and the timer is re-armed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, PositionSource};
use crate::cache::{LiveRouteCache, LIVE_ROUTE_MAX_POINTS_PER_KEY};
use crate::clock::{iso_after, to_iso_millis, Clock};
use crate::lock;
use crate::merge::{append_points_to_polyline, last_timestamp};
use crate::models::{LiveRoutePoint, QueryDefaults, Trip, TripQuery};
use crate::network::NetworkStatus;
use crate::settings::DEFAULT_POLLING_INTERVAL_MS;
use crate::state::SharedMapState;

/// A one-shot timer. Scheduling replaces any pending firing.
pub trait PollTimer: Send + Sync {
    fn schedule(&self, delay: Duration);
    fn cancel(&self);
    fn is_scheduled(&self) -> bool;
}

/// Fires by sending `()` on the channel returned from [`TokioTimer::new`].
pub struct TokioTimer {
    ticks: mpsc::UnboundedSender<()>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TokioTimer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timer = Self {
            ticks: tx,
            pending: Mutex::new(None),
        };
        (timer, rx)
    }
}

impl PollTimer for TokioTimer {
    fn schedule(&self, delay: Duration) {
        let ticks = self.ticks.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = ticks.send(());
        });
        if let Some(previous) = lock(&self.pending).replace(handle) {
            previous.abort();
        }
    }

    fn cancel(&self) {
        if let Some(pending) = lock(&self.pending).take() {
            pending.abort();
        }
    }

    fn is_scheduled(&self) -> bool {
        lock(&self.pending)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A timer that only fires when told to. Remembers the last requested delay.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    pending: Arc<Mutex<Option<Duration>>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_delay(&self) -> Option<Duration> {
        *lock(&self.pending)
    }

    /// Consume the pending firing. Returns whether one was scheduled.
    pub fn fire(&self) -> bool {
        lock(&self.pending).take().is_some()
    }
}

impl PollTimer for ManualTimer {
    fn schedule(&self, delay: Duration) {
        *lock(&self.pending) = Some(delay);
    }

    fn cancel(&self) {
        lock(&self.pending).take();
    }

    fn is_scheduled(&self) -> bool {
        lock(&self.pending).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Scheduled,
    Polling,
}

#[derive(Debug)]
struct PollState {
    live_mode: bool,
    interval: Duration,
    in_flight: bool,
    /// Last position timestamp fetched, keyed by route state key.
    last_fetch_by_route: HashMap<String, String>,
}

/// Clears the in-flight flag however a cycle ends.
struct InFlightGuard {
    state: Arc<Mutex<PollState>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.state).in_flight = false;
    }
}

/// How one selected trip maps onto polylines and cache keys.
#[derive(Debug, Clone, PartialEq)]
pub struct TripDescriptor {
    pub query: TripQuery,
    pub route_prefix: String,
    pub route_state_key: String,
    pub live_key: String,
}

impl TripDescriptor {
    pub fn for_trip(trip: &Trip, defaults: &QueryDefaults) -> Self {
        let query = TripQuery::for_trip(trip, defaults);
        let route_prefix = query.route_prefix();
        let travel_id = match trip.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => format!("{}:{}", query.from, query.to),
        };
        let live_key = LiveRouteCache::key_for(query.device_id, Some(&travel_id), trip.source);
        Self {
            route_state_key: format!("{}:{}", query.device_id, route_prefix),
            route_prefix,
            live_key,
            query,
        }
    }
}

#[derive(Clone)]
pub struct LivePoller {
    positions: Arc<dyn PositionSource>,
    live_cache: LiveRouteCache,
    map: SharedMapState,
    timer: Arc<dyn PollTimer>,
    network: NetworkStatus,
    clock: Arc<dyn Clock>,
    defaults: QueryDefaults,
    state: Arc<Mutex<PollState>>,
}

impl LivePoller {
    pub fn new(
        positions: Arc<dyn PositionSource>,
        live_cache: LiveRouteCache,
        map: SharedMapState,
        timer: Arc<dyn PollTimer>,
        network: NetworkStatus,
        clock: Arc<dyn Clock>,
        defaults: QueryDefaults,
    ) -> Self {
        Self {
            positions,
            live_cache,
            map,
            timer,
            network,
            clock,
            defaults,
            state: Arc::new(Mutex::new(PollState {
                live_mode: false,
                interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
                in_flight: false,
                last_fetch_by_route: HashMap::new(),
            })),
        }
    }

    pub fn phase(&self) -> PollPhase {
        if lock(&self.state).in_flight {
            PollPhase::Polling
        } else if self.timer.is_scheduled() {
            PollPhase::Scheduled
        } else {
            PollPhase::Idle
        }
    }

    pub fn is_live(&self) -> bool {
        lock(&self.state).live_mode
    }

    pub fn interval(&self) -> Duration {
        lock(&self.state).interval
    }

    /// Turning live mode off cancels the pending timer. Turning it on does
    /// not schedule anything by itself.
    pub fn set_live_mode(&self, enabled: bool) {
        lock(&self.state).live_mode = enabled;
        if !enabled {
            self.timer.cancel();
        }
    }

    /// Load persisted live mode and interval without touching the timer.
    pub fn restore(&self, enabled: bool, interval: Duration) {
        let mut state = lock(&self.state);
        state.live_mode = enabled;
        state.interval = interval;
    }

    /// Set the interval (already normalized); re-arms the timer when live.
    pub fn set_interval(&self, interval: Duration) {
        lock(&self.state).interval = interval;
        self.schedule();
    }

    /// Arm the timer for one interval, if live mode is on.
    pub fn schedule(&self) {
        let (live, interval) = {
            let state = lock(&self.state);
            (state.live_mode, state.interval)
        };
        if live {
            self.timer.schedule(interval);
        }
    }

    pub fn cancel(&self) {
        self.timer.cancel();
    }

    pub fn last_known(&self, route_state_key: &str) -> Option<String> {
        lock(&self.state)
            .last_fetch_by_route
            .get(route_state_key)
            .cloned()
    }

    fn advance_last_known(&self, route_state_key: &str, timestamp: &str) {
        if timestamp.is_empty() {
            return;
        }
        let mut state = lock(&self.state);
        let entry = state
            .last_fetch_by_route
            .entry(route_state_key.to_string())
            .or_default();
        if entry.as_str() < timestamp {
            *entry = timestamp.to_string();
        }
    }

    fn begin_cycle(&self) -> Option<InFlightGuard> {
        let mut state = lock(&self.state);
        if !state.live_mode || state.in_flight {
            return None;
        }
        state.in_flight = true;
        Some(InFlightGuard {
            state: self.state.clone(),
        })
    }

    fn active_descriptors(&self) -> Vec<TripDescriptor> {
        lock(&self.map)
            .selected_trips
            .iter()
            .filter(|trip| trip.is_live_candidate())
            .map(|trip| TripDescriptor::for_trip(trip, &self.defaults))
            .collect()
    }

    fn path_last(&self, descriptor: &TripDescriptor) -> Option<Option<String>> {
        let state = lock(&self.map);
        let index = state.find_polyline_index(&descriptor.route_prefix, descriptor.query.device_id)?;
        Some(last_timestamp(&state.polylines[index].path).map(str::to_owned))
    }

    /// Merge `points` into the trip's polyline, updating polygon and
    /// distance. Returns how many points were appended.
    fn merge_into_map(&self, descriptor: &TripDescriptor, points: &[LiveRoutePoint]) -> usize {
        let mut state = lock(&self.map);
        let Some(index) =
            state.find_polyline_index(&descriptor.route_prefix, descriptor.query.device_id)
        else {
            return 0;
        };

        let path = std::mem::take(&mut state.polylines[index].path);
        let outcome = append_points_to_polyline(path, points);
        state.polylines[index].path = outcome.path;
        if outcome.points_added > 0 {
            state.refresh_polygon();
            state.distance_km += outcome.distance_delta_km;
        }
        outcome.points_added
    }

    /// Restore cached live points onto the map and record how far each trip
    /// is already known, so the next poll only asks for newer positions.
    pub async fn seed_from_cache(&self) {
        for descriptor in self.active_descriptors() {
            if self.path_last(&descriptor).is_none() {
                continue;
            }

            let cached = self.live_cache.get_points(&descriptor.live_key).await;
            let restored = self.merge_into_map(&descriptor, &cached);

            let path_last = self.path_last(&descriptor).flatten();
            let cache_last = cached.last().map(|p| p.timestamp.clone());
            for timestamp in [path_last, cache_last].into_iter().flatten() {
                self.advance_last_known(&descriptor.route_state_key, &timestamp);
            }

            if restored > 0 {
                info!(route = %descriptor.route_state_key, restored = restored, "Live cache restored points");
            }
        }
    }

    /// Run one poll cycle, then re-arm the timer.
    ///
    /// Skips straight to re-arming when live mode is off or another cycle
    /// is still running. Errors are logged, never returned.
    pub async fn poll_live_updates(&self) {
        let Some(guard) = self.begin_cycle() else {
            debug!("Skipping live poll");
            self.schedule();
            return;
        };

        if self.network.is_offline() {
            debug!("Offline, skipping live poll");
        } else if let Err(e) = self.poll_active_trips().await {
            error!(error = %e, "Error polling live updates");
        }

        drop(guard);
        self.schedule();
    }

    async fn poll_active_trips(&self) -> Result<(), ApiError> {
        for descriptor in self.active_descriptors() {
            self.poll_trip(&descriptor).await?;
        }
        Ok(())
    }

    async fn poll_trip(&self, descriptor: &TripDescriptor) -> Result<(), ApiError> {
        let Some(path_last) = self.path_last(descriptor) else {
            return Ok(());
        };
        let Some(known_last) = self.last_known(&descriptor.route_state_key).or(path_last) else {
            return Ok(());
        };
        let Some(from) = iso_after(&known_last) else {
            return Ok(());
        };
        let to = to_iso_millis(self.clock.now());
        if from >= to {
            return Ok(());
        }

        let positions = self
            .positions
            .fetch_positions(descriptor.query.device_id, &from, &to)
            .await?;
        let fresh: Vec<LiveRoutePoint> = positions
            .iter()
            .map(LiveRoutePoint::from)
            .filter(|p| p.timestamp > known_last)
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        // The map may have been re-rendered while the fetch was in flight
        let appended = self.merge_into_map(descriptor, &fresh);
        if appended == 0 {
            return Ok(());
        }

        if let Err(e) = self
            .live_cache
            .append_points(&descriptor.live_key, &fresh, LIVE_ROUTE_MAX_POINTS_PER_KEY)
            .await
        {
            warn!(key = %descriptor.live_key, error = %e, "Failed to persist live points");
        }
        if let Some(newest) = fresh.iter().map(|p| p.timestamp.as_str()).max() {
            self.advance_last_known(&descriptor.route_state_key, newest);
        }
        info!(route = %descriptor.route_state_key, appended = appended, "Live update appended points");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{PathPoint, TripSource};
    use crate::state::MapState;
    use crate::store::MemoryStore;
    use crate::testing::{defaults, plot, position, t0, ts, vertex, FakeBackend, DEVICE};
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::Ordering;
    use tokio::sync::Notify;

    struct Harness {
        backend: Arc<FakeBackend>,
        poller: LivePoller,
        timer: ManualTimer,
        clock: ManualClock,
        map: SharedMapState,
        live_cache: LiveRouteCache,
        network: NetworkStatus,
    }

    fn live_trip() -> Trip {
        Trip {
            id: Some("t-1".to_string()),
            title: "Alps".to_string(),
            von: "2024-05-01T00:00:00.000Z".to_string(),
            bis: "2024-05-02T00:00:00.000Z".to_string(),
            distance: 0.0,
            source: TripSource::Auto,
            device_id: Some(DEVICE),
        }
    }

    /// A map already showing `live_trip()` with `path`.
    fn harness(path: Vec<PathPoint>) -> Harness {
        let backend = FakeBackend::new();
        let clock = ManualClock::new(t0() + ChronoDuration::minutes(1));
        let timer = ManualTimer::new();
        let network = NetworkStatus::new();
        let live_cache = LiveRouteCache::new(Arc::new(MemoryStore::new()), Arc::new(clock.clone()));
        let map = MapState::shared();
        {
            let trip = live_trip();
            let query = TripQuery::for_trip(&trip, &defaults());
            let mut data = plot(path, 0.0, None);
            data.polylines[0].route_key = Some(query.route_key(0));
            let mut state = lock(&map);
            state.polylines = data.polylines;
            state.selected_trips = vec![trip];
            state.refresh_polygon();
        }
        let poller = LivePoller::new(
            backend.clone(),
            live_cache.clone(),
            map.clone(),
            Arc::new(timer.clone()),
            network.clone(),
            Arc::new(clock.clone()),
            defaults(),
        );
        Harness {
            backend,
            poller,
            timer,
            clock,
            map,
            live_cache,
            network,
        }
    }

    fn descriptor() -> TripDescriptor {
        TripDescriptor::for_trip(&live_trip(), &defaults())
    }

    fn path_len(h: &Harness) -> usize {
        lock(&h.map).polylines[0].path.len()
    }

    #[test]
    fn test_descriptor_keys() {
        let d = descriptor();
        assert_eq!(d.route_prefix, "auto:t-1:");
        assert_eq!(d.route_state_key, "4:auto:t-1:");
        assert_eq!(d.live_key, "live-route:auto:t-1:4");

        let mut anonymous = live_trip();
        anonymous.id = None;
        let d = TripDescriptor::for_trip(&anonymous, &defaults());
        assert_eq!(
            d.route_prefix,
            "4:2024-05-01T00:00:00.000Z:2024-05-02T00:00:00.000Z:"
        );
        assert_eq!(
            d.live_key,
            "live-route:auto:2024-05-01T00:00:00.000Z:2024-05-02T00:00:00.000Z:4"
        );
    }

    #[tokio::test]
    async fn test_poll_appends_new_positions_and_persists() {
        let h = harness(vec![vertex(47.0, 8.0, 0)]);
        h.backend.push_positions([
            position(47.0, 8.0, 0),
            position(47.01, 8.0, 10),
            position(47.02, 8.0, 20),
        ]);
        h.poller.set_live_mode(true);

        h.poller.poll_live_updates().await;

        assert_eq!(path_len(&h), 3);
        assert_eq!(lock(&h.map).polygon.len(), 3);
        assert!(lock(&h.map).distance_km > 2.0);
        assert_eq!(h.poller.last_known(&descriptor().route_state_key), Some(ts(20)));
        assert_eq!(h.live_cache.get_points(&descriptor().live_key).await.len(), 2);

        let windows = lock(&h.backend.position_windows).clone();
        assert_eq!(windows, vec![(
            "2024-05-01T10:00:00.001Z".to_string(),
            "2024-05-01T10:01:00.000Z".to_string()
        )]);
        assert_eq!(h.timer.pending_delay(), Some(Duration::from_millis(30_000)));
        assert_eq!(h.poller.phase(), PollPhase::Scheduled);
    }

    #[tokio::test]
    async fn test_replayed_positions_are_noops() {
        let h = harness(vec![vertex(47.0, 8.0, 0)]);
        h.backend.push_positions([position(47.01, 8.0, 10)]);
        h.poller.set_live_mode(true);

        h.poller.poll_live_updates().await;
        let distance = lock(&h.map).distance_km;
        h.poller.poll_live_updates().await;

        assert_eq!(path_len(&h), 2);
        assert_eq!(lock(&h.map).distance_km, distance);
        assert_eq!(h.live_cache.get_points(&descriptor().live_key).await.len(), 1);
        assert_eq!(h.backend.position_calls(), 2);
    }

    #[tokio::test]
    async fn test_live_mode_off_skips_network() {
        let h = harness(vec![vertex(47.0, 8.0, 0)]);
        h.poller.poll_live_updates().await;
        assert_eq!(h.backend.position_calls(), 0);
        assert_eq!(h.poller.phase(), PollPhase::Idle);
    }

    #[tokio::test]
    async fn test_manual_trips_are_not_polled() {
        let h = harness(vec![vertex(47.0, 8.0, 0)]);
        lock(&h.map).selected_trips[0].source = TripSource::Manual;
        h.poller.set_live_mode(true);
        h.poller.poll_live_updates().await;
        assert_eq!(h.backend.position_calls(), 0);
        assert!(h.timer.is_scheduled());
    }

    #[tokio::test]
    async fn test_unknown_last_timestamp_skips_trip() {
        let h = harness(vec![PathPoint {
            lat: 47.0,
            lng: 8.0,
            timestamp: None,
        }]);
        h.poller.set_live_mode(true);
        h.poller.poll_live_updates().await;
        assert_eq!(h.backend.position_calls(), 0);
    }

    #[tokio::test]
    async fn test_window_not_open_yet_skips_trip() {
        let h = harness(vec![vertex(47.0, 8.0, 0)]);
        h.clock.set(t0());
        h.poller.set_live_mode(true);
        h.poller.poll_live_updates().await;
        assert_eq!(h.backend.position_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_error_is_contained_and_rescheduled() {
        let h = harness(vec![vertex(47.0, 8.0, 0)]);
        h.backend.fail_positions.store(true, Ordering::SeqCst);
        h.poller.set_live_mode(true);

        h.poller.poll_live_updates().await;

        assert_eq!(path_len(&h), 1);
        assert!(h.timer.is_scheduled());
        assert_eq!(h.poller.phase(), PollPhase::Scheduled);
    }

    #[tokio::test]
    async fn test_offline_cycle_makes_no_requests() {
        let h = harness(vec![vertex(47.0, 8.0, 0)]);
        h.network.set_offline(true);
        h.poller.set_live_mode(true);
        h.poller.poll_live_updates().await;
        assert_eq!(h.backend.position_calls(), 0);
        assert!(h.timer.is_scheduled());
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let h = harness(vec![vertex(47.0, 8.0, 0)]);
        h.backend.push_positions([position(47.01, 8.0, 10)]);
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *lock(&h.backend.gate) = Some((entered.clone(), release.clone()));
        h.poller.set_live_mode(true);

        let second = async {
            entered.notified().await;
            assert_eq!(h.poller.phase(), PollPhase::Polling);
            h.poller.poll_live_updates().await;
            release.notify_one();
        };
        tokio::join!(h.poller.poll_live_updates(), second);

        assert_eq!(h.backend.position_calls(), 1);
        assert_eq!(path_len(&h), 2);
        assert_eq!(h.poller.phase(), PollPhase::Scheduled);
    }

    #[tokio::test]
    async fn test_disabling_live_mode_cancels_timer() {
        let h = harness(vec![vertex(47.0, 8.0, 0)]);
        h.poller.set_live_mode(true);
        h.poller.schedule();
        assert!(h.timer.is_scheduled());

        h.poller.set_live_mode(false);
        assert!(!h.timer.is_scheduled());
        h.poller.set_interval(Duration::from_millis(10_000));
        assert!(!h.timer.is_scheduled());
    }

    #[tokio::test]
    async fn test_set_interval_rearms_when_live() {
        let h = harness(vec![vertex(47.0, 8.0, 0)]);
        h.poller.set_live_mode(true);
        h.poller.set_interval(Duration::from_millis(10_000));
        assert_eq!(h.timer.pending_delay(), Some(Duration::from_millis(10_000)));
    }

    #[tokio::test]
    async fn test_seed_restores_cached_points_before_polling() {
        let h = harness(vec![vertex(47.0, 8.0, 0)]);
        h.live_cache
            .append_points(
                &descriptor().live_key,
                &[
                    LiveRoutePoint::new(47.01, 8.0, ts(10)),
                    LiveRoutePoint::new(47.02, 8.0, ts(20)),
                ],
                LIVE_ROUTE_MAX_POINTS_PER_KEY,
            )
            .await
            .unwrap();
        h.poller.set_live_mode(true);

        h.poller.seed_from_cache().await;
        assert_eq!(path_len(&h), 3);
        assert_eq!(h.poller.last_known(&descriptor().route_state_key), Some(ts(20)));

        h.poller.poll_live_updates().await;
        let windows = lock(&h.backend.position_windows).clone();
        assert_eq!(windows[0].0, "2024-05-01T10:00:20.001Z");
    }

    #[tokio::test]
    async fn test_seed_never_moves_last_known_backwards() {
        let h = harness(vec![vertex(47.0, 8.0, 0), vertex(47.0, 8.1, 30)]);
        h.live_cache
            .append_points(
                &descriptor().live_key,
                &[LiveRoutePoint::new(47.01, 8.0, ts(10))],
                LIVE_ROUTE_MAX_POINTS_PER_KEY,
            )
            .await
            .unwrap();

        h.poller.seed_from_cache().await;
        assert_eq!(path_len(&h), 2);
        assert_eq!(h.poller.last_known(&descriptor().route_state_key), Some(ts(30)));
    }

    #[tokio::test]
    async fn test_polyline_falls_back_to_main_device() {
        let h = harness(vec![vertex(47.0, 8.0, 0)]);
        lock(&h.map).polylines[0].route_key = None;
        h.backend.push_positions([position(47.01, 8.0, 10)]);
        h.poller.set_live_mode(true);
        h.poller.poll_live_updates().await;
        assert_eq!(path_len(&h), 2);
    }

    #[tokio::test]
    async fn test_tokio_timer_fires_and_cancels() {
        let (timer, mut ticks) = TokioTimer::new();
        timer.schedule(Duration::from_millis(5));
        assert!(timer.is_scheduled());
        assert_eq!(ticks.recv().await, Some(()));

        timer.schedule(Duration::from_secs(60));
        timer.cancel();
        assert!(!timer.is_scheduled());
        assert!(ticks.try_recv().is_err());
    }
}
