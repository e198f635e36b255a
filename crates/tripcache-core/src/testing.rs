//! In-process fakes shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use crate::api::{ApiError, PlotSource, PoiSource, PositionSource};
use crate::lock;
use crate::models::{
    DeviceEvent, DevicePolyline, PathPoint, PlotData, PoiResponse, Position, QueryDefaults,
    TripQuery, DEFAULT_MAX_POINTS,
};

pub(crate) const DEVICE: i64 = 4;

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

/// ISO timestamp `seconds` after 2024-05-01T10:00:00Z.
pub(crate) fn ts(seconds: i64) -> String {
    crate::clock::to_iso_millis(t0() + chrono::Duration::seconds(seconds))
}

pub(crate) fn defaults() -> QueryDefaults {
    QueryDefaults {
        device_id: DEVICE,
        from: "2024-04-01T00:00:00.000Z".to_string(),
        to: "2024-05-02T00:00:00.000Z".to_string(),
        name: "route".to_string(),
        max_points: DEFAULT_MAX_POINTS.to_string(),
    }
}

pub(crate) fn vertex(lat: f64, lng: f64, seconds: i64) -> PathPoint {
    PathPoint {
        lat,
        lng,
        timestamp: Some(ts(seconds)),
    }
}

pub(crate) fn position(lat: f64, lng: f64, seconds: i64) -> Position {
    Position {
        latitude: lat,
        longitude: lng,
        fix_time: ts(seconds),
        device_id: Some(DEVICE),
        speed: None,
        altitude: None,
        total_distance: None,
    }
}

/// A one-polyline plot for the main device.
pub(crate) fn plot(path: Vec<PathPoint>, distance: f64, zoom: Option<f64>) -> PlotData {
    PlotData {
        polylines: vec![DevicePolyline {
            device_id: DEVICE,
            device_name: "Van".to_string(),
            color: "#000000".to_string(),
            line_weight: None,
            path,
            route_key: None,
            is_main_device: true,
        }],
        distance,
        zoom,
        ..PlotData::default()
    }
}

/// Backend double for all three source traits. Plots are keyed by travel id
/// (`"default"` when the query has none).
#[derive(Default)]
pub(crate) struct FakeBackend {
    pub plots: Mutex<HashMap<String, PlotData>>,
    pub pois: Mutex<Option<PoiResponse>>,
    pub positions: Mutex<Vec<Position>>,
    pub route: Mutex<Vec<Position>>,
    pub events: Mutex<Vec<DeviceEvent>>,
    pub fail_plots: AtomicBool,
    pub fail_pois: AtomicBool,
    pub fail_positions: AtomicBool,
    pub plot_calls: AtomicUsize,
    pub position_calls: AtomicUsize,
    pub position_windows: Mutex<Vec<(String, String)>>,
    /// When set, `fetch_positions` signals `entered` and waits on `release`.
    pub gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_plot(&self, travel_id: &str, plot: PlotData) {
        lock(&self.plots).insert(travel_id.to_string(), plot);
    }

    pub fn push_positions(&self, positions: impl IntoIterator<Item = Position>) {
        lock(&self.positions).extend(positions);
    }

    pub fn set_failing(&self, flag: &AtomicBool, failing: bool) {
        flag.store(failing, Ordering::SeqCst);
    }

    pub fn plot_calls(&self) -> usize {
        self.plot_calls.load(Ordering::SeqCst)
    }

    pub fn position_calls(&self) -> usize {
        self.position_calls.load(Ordering::SeqCst)
    }

    fn server_error(what: &str) -> ApiError {
        ApiError::Backend {
            endpoint: format!("fake://{}", what),
            status: 503,
            body: "unavailable".to_string(),
        }
    }
}

#[async_trait]
impl PlotSource for FakeBackend {
    async fn fetch_plot_data(&self, query: &TripQuery) -> Result<PlotData, ApiError> {
        self.plot_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_plots.load(Ordering::SeqCst) {
            return Err(Self::server_error("plot"));
        }
        let key = query.travel_id.clone().unwrap_or_else(|| "default".to_string());
        lock(&self.plots)
            .get(&key)
            .cloned()
            .ok_or_else(|| ApiError::NotFound {
                endpoint: "fake://plot".to_string(),
                body: key,
            })
    }

    async fn fetch_events(&self, _query: &TripQuery) -> Result<Vec<DeviceEvent>, ApiError> {
        if self.fail_plots.load(Ordering::SeqCst) {
            return Err(Self::server_error("events"));
        }
        Ok(lock(&self.events).clone())
    }
}

#[async_trait]
impl PoiSource for FakeBackend {
    async fn fetch_manual_pois(
        &self,
        _device_id: Option<i64>,
        _from: Option<&str>,
        _to: Option<&str>,
    ) -> Result<PoiResponse, ApiError> {
        if self.fail_pois.load(Ordering::SeqCst) {
            return Err(Self::server_error("poi"));
        }
        Ok(lock(&self.pois).clone().unwrap_or(PoiResponse {
            success: true,
            ..PoiResponse::default()
        }))
    }
}

#[async_trait]
impl PositionSource for FakeBackend {
    async fn fetch_positions(
        &self,
        device_id: i64,
        from: &str,
        to: &str,
    ) -> Result<Vec<Position>, ApiError> {
        self.position_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.position_windows).push((from.to_string(), to.to_string()));

        let gate = lock(&self.gate).clone();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }

        if self.fail_positions.load(Ordering::SeqCst) {
            return Err(Self::server_error("position"));
        }
        Ok(lock(&self.positions)
            .iter()
            .filter(|p| p.device_id.unwrap_or(device_id) == device_id)
            .filter(|p| p.fix_time.as_str() >= from && p.fix_time.as_str() <= to)
            .cloned()
            .collect())
    }

    async fn fetch_route(&self, _query: &TripQuery) -> Result<Vec<Position>, ApiError> {
        if self.fail_positions.load(Ordering::SeqCst) {
            return Err(Self::server_error("route"));
        }
        Ok(lock(&self.route).clone())
    }
}
