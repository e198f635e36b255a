use std::fmt;

use serde::{Deserialize, Serialize};

/// Default `maxpoints` sent with plot and route requests.
pub const DEFAULT_MAX_POINTS: &str = "2500";

/// Where a trip came from. Only auto-detected trips are followed live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum TripSource {
    #[default]
    Auto,
    Manual,
}

impl TripSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripSource::Auto => "auto",
            TripSource::Manual => "manual",
        }
    }
}

impl fmt::Display for TripSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bounded interval of travel for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Trip {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    /// Start, ISO-8601.
    pub von: String,
    /// End, ISO-8601.
    pub bis: String,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub source: TripSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<i64>,
}

impl Trip {
    /// Identity used to deduplicate a selection.
    pub fn selection_key(&self) -> String {
        let id = match &self.id {
            Some(id) => id.clone(),
            None => format!(
                "{}:{}:{}",
                self.device_id.map(|d| d.to_string()).unwrap_or_default(),
                self.von,
                self.bis
            ),
        };
        format!("{}:{}", self.source, id)
    }

    pub fn is_live_candidate(&self) -> bool {
        self.source == TripSource::Auto
    }
}

/// Session-wide fallbacks used when a trip does not carry its own values.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefaults {
    pub device_id: i64,
    pub from: String,
    pub to: String,
    pub name: String,
    pub max_points: String,
}

/// Request body for plot, route and event lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripQuery {
    pub name: String,
    pub device_id: i64,
    pub from: String,
    pub to: String,
    #[serde(rename = "maxpoints")]
    pub max_points: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travel_source: Option<TripSource>,
}

impl TripQuery {
    /// The query used when nothing is selected.
    pub fn from_defaults(defaults: &QueryDefaults) -> Self {
        Self {
            name: defaults.name.clone(),
            device_id: defaults.device_id,
            from: defaults.from.clone(),
            to: defaults.to.clone(),
            max_points: defaults.max_points.clone(),
            travel_id: None,
            travel_source: None,
        }
    }

    pub fn for_trip(trip: &Trip, defaults: &QueryDefaults) -> Self {
        let name = if trip.title.is_empty() {
            defaults.name.clone()
        } else {
            trip.title.clone()
        };
        let device_id = trip
            .device_id
            .filter(|id| *id != 0)
            .unwrap_or(defaults.device_id);
        let from = if trip.von.is_empty() {
            defaults.from.clone()
        } else {
            trip.von.clone()
        };
        let to = if trip.bis.is_empty() {
            defaults.to.clone()
        } else {
            trip.bis.clone()
        };

        Self {
            name,
            device_id,
            from,
            to,
            max_points: defaults.max_points.clone(),
            travel_id: trip.id.clone(),
            travel_source: Some(trip.source),
        }
    }

    /// Shared prefix of every polyline route key produced for this query:
    /// `{source}:{travelId}:` for identified trips, else
    /// `{deviceId}:{from}:{to}:`.
    pub fn route_prefix(&self) -> String {
        match self.travel_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => format!("{}:{}:", self.travel_source.unwrap_or_default(), id),
            None => format!("{}:{}:{}:", self.device_id, self.from, self.to),
        }
    }

    pub fn route_key(&self, line_index: usize) -> String {
        format!("{}{}", self.route_prefix(), line_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> QueryDefaults {
        QueryDefaults {
            device_id: 4,
            from: "2019-03-01T00:00:00.000Z".to_string(),
            to: "2024-05-01T00:00:00.000Z".to_string(),
            name: "route".to_string(),
            max_points: DEFAULT_MAX_POINTS.to_string(),
        }
    }

    #[test]
    fn test_trip_parses_with_defaults() {
        let trip: Trip = serde_json::from_str(
            r#"{"title":"Alps","von":"2024-05-01T00:00:00.000Z","bis":"2024-05-03T00:00:00.000Z","distance":812.4}"#,
        )
        .unwrap();
        assert_eq!(trip.source, TripSource::Auto);
        assert!(trip.is_live_candidate());
        assert_eq!(
            trip.selection_key(),
            "auto::2024-05-01T00:00:00.000Z:2024-05-03T00:00:00.000Z"
        );
    }

    #[test]
    fn test_selection_key_prefers_id() {
        let trip: Trip = serde_json::from_str(
            r#"{"id":"t-9","title":"Coast","von":"a","bis":"b","source":"manual"}"#,
        )
        .unwrap();
        assert_eq!(trip.selection_key(), "manual:t-9");
        assert!(!trip.is_live_candidate());
    }

    #[test]
    fn test_query_for_trip_falls_back_to_defaults() {
        let trip = Trip {
            id: Some("t-1".to_string()),
            title: String::new(),
            von: "2024-05-01T00:00:00.000Z".to_string(),
            bis: String::new(),
            distance: 0.0,
            source: TripSource::Auto,
            device_id: None,
        };
        let query = TripQuery::for_trip(&trip, &defaults());
        assert_eq!(query.device_id, 4);
        assert_eq!(query.name, "route");
        assert_eq!(query.to, "2024-05-01T00:00:00.000Z");
        assert_eq!(query.travel_source, Some(TripSource::Auto));

        let body = serde_json::to_value(&query).unwrap();
        assert_eq!(body["maxpoints"], "2500");
        assert_eq!(body["travelId"], "t-1");
        assert_eq!(body["travelSource"], "auto");
    }

    #[test]
    fn test_route_keys() {
        let mut query = TripQuery::from_defaults(&defaults());
        assert_eq!(
            query.route_key(0),
            "4:2019-03-01T00:00:00.000Z:2024-05-01T00:00:00.000Z:0"
        );

        query.travel_id = Some("t-1".to_string());
        query.travel_source = Some(TripSource::Manual);
        assert_eq!(query.route_prefix(), "manual:t-1:");
        assert_eq!(query.route_key(2), "manual:t-1:2");
    }
}
