//! Network-first trip loading with snapshot fallback.
//!
//! Each selected trip is fetched from the plot source and written to the
//! travel cache. When the fetch fails (or the network is known to be down)
//! the last snapshot for that trip is used instead and the map is marked as
//! showing cached data.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::{ApiError, PlotSource, PoiSource, PositionSource};
use crate::cache::{PayloadField, PayloadUpdate, SnapshotPayload, TravelSnapshotCache};
use crate::error::TrackerError;
use crate::lock;
use crate::models::{
    Bounds, DeviceEvent, LatLng, ManualPoi, MapMarker, PlotData, Position, QueryDefaults, Trip,
    TripQuery,
};
use crate::network::NetworkStatus;
use crate::state::{CacheProvenance, MapState, SharedMapState, DEFAULT_ZOOM};

/// Polyline colours, assigned by selection index.
pub const PALETTE: [&str; 10] = [
    "#E53935", "#1E88E5", "#43A047", "#F4511E", "#8E24AA", "#00897B", "#3949AB", "#6D4C41",
    "#5E35B1", "#039BE5",
];

/// Plot data for one trip and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTrip {
    pub plot: PlotData,
    pub pois: Vec<ManualPoi>,
    pub from_cache: bool,
    pub cached_at: Option<DateTime<Utc>>,
}

/// A value together with the provenance it should give the map.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub provenance: CacheProvenance,
}

#[derive(Clone)]
pub struct TravelDataLoader {
    plots: Arc<dyn PlotSource>,
    pois: Arc<dyn PoiSource>,
    positions: Arc<dyn PositionSource>,
    cache: TravelSnapshotCache,
    network: NetworkStatus,
    defaults: QueryDefaults,
}

impl TravelDataLoader {
    pub fn new(
        plots: Arc<dyn PlotSource>,
        pois: Arc<dyn PoiSource>,
        positions: Arc<dyn PositionSource>,
        cache: TravelSnapshotCache,
        network: NetworkStatus,
        defaults: QueryDefaults,
    ) -> Self {
        Self {
            plots,
            pois,
            positions,
            cache,
            network,
            defaults,
        }
    }

    pub fn defaults(&self) -> &QueryDefaults {
        &self.defaults
    }

    /// The query for `trip`, or the default query when there is none.
    pub fn query_for(&self, trip: Option<&Trip>) -> TripQuery {
        match trip {
            Some(trip) => TripQuery::for_trip(trip, &self.defaults),
            None => TripQuery::from_defaults(&self.defaults),
        }
    }

    async fn network<T, F>(&self, request: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        if self.network.is_offline() {
            return Err(ApiError::Offline);
        }
        request.await
    }

    /// Load one trip. `trip` is `None` for the default query, whose
    /// polylines keep their own colours and names.
    pub async fn load_single(
        &self,
        query: &TripQuery,
        trip: Option<&Trip>,
        index: usize,
    ) -> Result<LoadedTrip, TrackerError> {
        let cache_key = TravelSnapshotCache::build_key(query.into());

        let mut loaded = match self.network(self.plots.fetch_plot_data(query)).await {
            Ok(plot) => {
                let pois = self.load_manual_pois(query).await;
                self.store_trip(&cache_key, &plot, &pois).await;
                LoadedTrip {
                    plot,
                    pois,
                    from_cache: false,
                    cached_at: None,
                }
            }
            Err(e) => self.cached_trip(cache_key, e).await?,
        };

        let color = PALETTE[index % PALETTE.len()];
        for (line_index, line) in loaded.plot.polylines.iter_mut().enumerate() {
            if let Some(trip) = trip {
                line.color = color.to_string();
                if !trip.title.is_empty() {
                    line.device_name = trip.title.clone();
                }
            }
            line.route_key = Some(query.route_key(line_index));
        }

        Ok(loaded)
    }

    async fn store_trip(&self, cache_key: &str, plot: &PlotData, pois: &[ManualPoi]) {
        let update = PayloadUpdate::new()
            .with(PayloadField::Plotmaps, plot)
            .and_then(|u| u.with(PayloadField::ManualPois, pois));
        let result = match update {
            Ok(update) => self.cache.save(cache_key, update).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(cache_key = cache_key, error = %e, "Failed to save travel snapshot");
        }
    }

    async fn cached_trip(&self, cache_key: String, error: ApiError) -> Result<LoadedTrip, TrackerError> {
        let snapshot = self.cache.get(&cache_key).await;
        let Some((snapshot, plot)) =
            snapshot.and_then(|s| s.payload.plot_data().map(|plot| (s, plot)))
        else {
            return Err(TrackerError::NoTripData {
                cache_key,
                source: error,
            });
        };

        warn!(cache_key = %cache_key, error = %error, "Using cached travel snapshot for map rendering");
        Ok(LoadedTrip {
            plot,
            pois: snapshot.payload.manual_pois(),
            from_cache: true,
            cached_at: Some(snapshot.saved_at),
        })
    }

    /// Manual POIs for the query's range. Failures yield an empty list.
    pub async fn load_manual_pois(&self, query: &TripQuery) -> Vec<ManualPoi> {
        let response = self
            .network(self.pois.fetch_manual_pois(
                Some(query.device_id),
                Some(&query.from),
                Some(&query.to),
            ))
            .await;
        match response {
            Ok(response) if response.success => response.pois,
            Ok(response) => {
                warn!(
                    error = response.error.as_deref().unwrap_or("unknown"),
                    "Manual POI lookup reported failure, continuing without POIs"
                );
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Manual POI fetch failed, continuing without POIs");
                Vec::new()
            }
        }
    }

    /// Render `trips` (or the default query when empty) into `map`.
    pub async fn render_into(&self, map: &SharedMapState, trips: &[Trip]) -> Result<(), TrackerError> {
        if trips.is_empty() {
            let query = self.query_for(None);
            let loaded = self.load_single(&query, None, 0).await?;
            apply_single(&mut lock(map), loaded);
            return Ok(());
        }

        let queries: Vec<TripQuery> = trips.iter().map(|t| self.query_for(Some(t))).collect();
        let results = try_join_all(
            trips
                .iter()
                .zip(&queries)
                .enumerate()
                .map(|(index, (trip, query))| self.load_single(query, Some(trip), index)),
        )
        .await?;

        let mut state = lock(map);
        apply_many(&mut state, results);
        info!(
            polylines = state.polylines.len(),
            points = state.point_count(),
            markers = state.locations.len(),
            distance_km = state.distance_km,
            zoom = state.zoom,
            cached = state.provenance.using_cached_data,
            "Map rendered"
        );
        Ok(())
    }

    pub async fn load_route(&self, query: &TripQuery) -> Result<Sourced<Vec<Position>>, TrackerError> {
        self.fetch_with_fallback(
            query,
            PayloadField::Route,
            self.positions.fetch_route(query),
            SnapshotPayload::route_positions,
        )
        .await
    }

    pub async fn load_events(&self, query: &TripQuery) -> Result<Sourced<Vec<DeviceEvent>>, TrackerError> {
        self.fetch_with_fallback(
            query,
            PayloadField::Events,
            self.plots.fetch_events(query),
            SnapshotPayload::events,
        )
        .await
    }

    async fn fetch_with_fallback<T, F>(
        &self,
        query: &TripQuery,
        field: PayloadField,
        request: F,
        from_payload: fn(&SnapshotPayload) -> Option<T>,
    ) -> Result<Sourced<T>, TrackerError>
    where
        T: Serialize,
        F: Future<Output = Result<T, ApiError>>,
    {
        let cache_key = TravelSnapshotCache::build_key(query.into());

        match self.network(request).await {
            Ok(value) => {
                match PayloadUpdate::new().with(field, &value) {
                    Ok(update) => {
                        if let Err(e) = self.cache.save(&cache_key, update).await {
                            warn!(cache_key = %cache_key, error = %e, "Failed to save travel snapshot");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to encode snapshot field"),
                }
                let mut provenance = CacheProvenance::default();
                provenance.mark_network();
                Ok(Sourced { value, provenance })
            }
            Err(error) => {
                let cached = self.cache.get(&cache_key).await.and_then(|snapshot| {
                    from_payload(&snapshot.payload).map(|value| (value, snapshot.saved_at))
                });
                let Some((value, saved_at)) = cached else {
                    return Err(TrackerError::NoTripData {
                        cache_key,
                        source: error,
                    });
                };
                warn!(cache_key = %cache_key, field = field.as_str(), error = %error, "Using cached data");
                let mut provenance = CacheProvenance::default();
                provenance.mark_cached(Some(saved_at));
                Ok(Sourced { value, provenance })
            }
        }
    }
}

/// Drop markers already seen under the same `key|von|bis|lat|lng`.
pub fn dedupe_locations(markers: impl IntoIterator<Item = MapMarker>) -> Vec<MapMarker> {
    let mut seen = HashSet::new();
    markers
        .into_iter()
        .filter(|marker| seen.insert(marker.dedupe_key()))
        .collect()
}

/// Any cached result marks the map cached, stamped with the newest save time.
pub fn combine_provenance(results: &[LoadedTrip]) -> CacheProvenance {
    let mut provenance = CacheProvenance::default();
    if results.iter().any(|r| r.from_cache) {
        provenance.mark_cached(results.iter().filter_map(|r| r.cached_at).max());
    } else {
        provenance.mark_network();
    }
    provenance
}

fn poi_markers(pois: &[ManualPoi]) -> impl Iterator<Item = MapMarker> + '_ {
    pois.iter().map(ManualPoi::to_marker)
}

fn apply_single(state: &mut MapState, loaded: LoadedTrip) {
    state.provenance = combine_provenance(std::slice::from_ref(&loaded));

    let LoadedTrip { plot, pois, .. } = loaded;
    state.locations = dedupe_locations(plot.locations.into_iter().chain(poi_markers(&pois)));
    state.manual_pois = pois;
    state.polylines = plot.polylines;
    if plot.polygone.is_empty() {
        state.refresh_polygon();
    } else {
        state.polygon = plot
            .polygone
            .iter()
            .map(|p| LatLng { lat: p.lat, lng: p.lng })
            .collect();
    }
    state.center = plot.center;
    state.zoom = plot.zoom.unwrap_or(DEFAULT_ZOOM);
    state.distance_km = plot.distance;
    debug!(polylines = state.polylines.len(), "Rendered default query");
}

fn apply_many(state: &mut MapState, results: Vec<LoadedTrip>) {
    state.provenance = combine_provenance(&results);

    state.zoom = results
        .iter()
        .map(|r| r.plot.zoom.unwrap_or(DEFAULT_ZOOM))
        .fold(f64::INFINITY, f64::min);
    if !state.zoom.is_finite() {
        state.zoom = DEFAULT_ZOOM;
    }
    state.distance_km = results.iter().map(|r| r.plot.distance).sum();

    let mut polylines = Vec::new();
    let mut locations = Vec::new();
    let mut pois = Vec::new();
    for result in results {
        polylines.extend(result.plot.polylines);
        locations.extend(result.plot.locations);
        pois.extend(result.pois);
    }

    state.locations = dedupe_locations(locations);
    state.locations.extend(poi_markers(&pois));
    state.manual_pois = pois;
    state.polylines = polylines;
    state.refresh_polygon();

    if let Some(bounds) = Bounds::around(state.polylines.iter().flat_map(|l| l.path.iter())) {
        state.center = bounds.center();
    }
}
