//! The map state produced for the UI.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{DevicePolyline, LatLng, ManualPoi, MapMarker, Trip};

pub const DEFAULT_ZOOM: f64 = 10.0;

/// Whether the map currently shows cached instead of live network data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheProvenance {
    pub using_cached_data: bool,
    pub cached_at: Option<DateTime<Utc>>,
}

impl CacheProvenance {
    pub fn mark_cached(&mut self, saved_at: Option<DateTime<Utc>>) {
        self.using_cached_data = true;
        self.cached_at = saved_at;
    }

    pub fn mark_network(&mut self) {
        self.using_cached_data = false;
        self.cached_at = None;
    }

    /// How long ago the cached data was saved, e.g. "3h ago".
    pub fn age_display(&self, now: DateTime<Utc>) -> Option<String> {
        let saved_at = self.cached_at.filter(|_| self.using_cached_data)?;
        let minutes = (now - saved_at).num_minutes();
        let display = if minutes < 1 {
            // Negative ages come from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        };
        Some(display)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapState {
    pub polylines: Vec<DevicePolyline>,
    /// Every polyline vertex, flattened.
    pub polygon: Vec<LatLng>,
    pub locations: Vec<MapMarker>,
    pub manual_pois: Vec<ManualPoi>,
    pub center: LatLng,
    pub zoom: f64,
    pub distance_km: f64,
    pub provenance: CacheProvenance,
    pub selected_trips: Vec<Trip>,
}

impl Default for MapState {
    fn default() -> Self {
        Self {
            polylines: Vec::new(),
            polygon: Vec::new(),
            locations: Vec::new(),
            manual_pois: Vec::new(),
            center: LatLng::default(),
            zoom: DEFAULT_ZOOM,
            distance_km: 0.0,
            provenance: CacheProvenance::default(),
            selected_trips: Vec::new(),
        }
    }
}

pub type SharedMapState = Arc<Mutex<MapState>>;

impl MapState {
    pub fn shared() -> SharedMapState {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn refresh_polygon(&mut self) {
        self.polygon = self
            .polylines
            .iter()
            .flat_map(|line| line.path.iter())
            .map(|p| LatLng { lat: p.lat, lng: p.lng })
            .collect();
    }

    /// The polyline whose route key starts with `route_prefix`, else the
    /// main polyline of `device_id`.
    pub fn find_polyline_index(&self, route_prefix: &str, device_id: i64) -> Option<usize> {
        self.polylines
            .iter()
            .position(|line| {
                line.route_key
                    .as_deref()
                    .is_some_and(|key| key.starts_with(route_prefix))
            })
            .or_else(|| {
                self.polylines
                    .iter()
                    .position(|line| line.device_id == device_id && line.is_main_device)
            })
    }

    pub fn point_count(&self) -> usize {
        self.polylines.iter().map(|line| line.path.len()).sum()
    }
}
