use serde::{Deserialize, Serialize};

use super::PathPoint;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Bounding box of the given points, `None` when there are none.
    pub fn around<'a>(points: impl IntoIterator<Item = &'a PathPoint>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let init = Bounds {
            min_lat: first.lat,
            max_lat: first.lat,
            min_lng: first.lng,
            max_lng: first.lng,
        };
        Some(iter.fold(init, |b, p| Bounds {
            min_lat: b.min_lat.min(p.lat),
            max_lat: b.max_lat.max(p.lat),
            min_lng: b.min_lng.min(p.lng),
            max_lng: b.max_lng.max(p.lng),
        }))
    }

    pub fn center(&self) -> LatLng {
        LatLng {
            lat: (self.min_lat + self.max_lat) / 2.0,
            lng: (self.min_lng + self.max_lng) / 2.0,
        }
    }
}

/// One device's route on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DevicePolyline {
    #[serde(default)]
    pub device_id: i64,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_weight: Option<f64>,
    #[serde(default)]
    pub path: Vec<PathPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_key: Option<String>,
    #[serde(default)]
    pub is_main_device: bool,
}

/// A standstill location or manual POI shown on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct MapMarker {
    #[serde(default)]
    pub key: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub von: String,
    #[serde(default)]
    pub bis: String,
    #[serde(default)]
    pub period: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(rename = "isPOI", default)]
    pub is_poi: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poi_id: Option<i64>,
}

impl MapMarker {
    /// Identity used to collapse the same marker reported by several trips.
    pub fn dedupe_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.key, self.von, self.bis, self.lat, self.lng
        )
    }
}

/// A manually placed point of interest (database row shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ManualPoi {
    pub id: i64,
    #[serde(default)]
    pub poi_key: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ManualPoi {
    pub fn to_marker(&self) -> MapMarker {
        MapMarker {
            key: self.poi_key.clone(),
            lat: self.latitude,
            lng: self.longitude,
            title: self.country.clone().unwrap_or_default(),
            von: self.timestamp.clone(),
            bis: self.timestamp.clone(),
            period: 0.0,
            country: self.country.clone(),
            address: self.address.clone(),
            is_poi: true,
            poi_id: Some(self.id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoiResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub pois: Vec<ManualPoi>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything the plot source returns for one trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotData {
    #[serde(default)]
    pub polylines: Vec<DevicePolyline>,
    #[serde(default)]
    pub locations: Vec<MapMarker>,
    #[serde(default)]
    pub center: LatLng,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom: Option<f64>,
    #[serde(default)]
    pub distance: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub polygone: Vec<PathPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_id: Option<i64>,
}
