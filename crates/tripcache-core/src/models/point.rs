use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A live position as stored in the live route cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LiveRoutePoint {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: String,
}

impl LiveRoutePoint {
    pub fn new(lat: f64, lng: f64, timestamp: impl Into<String>) -> Self {
        Self {
            lat,
            lng,
            timestamp: timestamp.into(),
        }
    }

    /// Validate a loosely shaped JSON entry. Anything without numeric
    /// `lat`/`lng` and a string `timestamp` is rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            lat: obj.get("lat")?.as_f64()?,
            lng: obj.get("lng")?.as_f64()?,
            timestamp: obj.get("timestamp")?.as_str()?.to_string(),
        })
    }
}

impl From<&Position> for LiveRoutePoint {
    fn from(pos: &Position) -> Self {
        Self {
            lat: pos.latitude,
            lng: pos.longitude,
            timestamp: pos.fix_time.clone(),
        }
    }
}

/// One vertex of a rendered polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PathPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl From<&LiveRoutePoint> for PathPoint {
    fn from(point: &LiveRoutePoint) -> Self {
        Self {
            lat: point.lat,
            lng: point.lng,
            timestamp: Some(point.timestamp.clone()),
        }
    }
}

/// A raw fix from the position source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub fix_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_distance: Option<f64>,
}

impl Position {
    /// Keep only entries that parse as a `Position`, dropping malformed ones.
    pub fn from_values(values: Vec<Value>) -> Vec<Self> {
        values
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect()
    }
}
