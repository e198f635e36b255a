//! Appending live points onto a rendered polyline.

use crate::models::{LiveRoutePoint, PathPoint};

/// Upper bound on the number of vertices kept in one polyline.
pub const MAX_PATH_POINTS: usize = 120_000;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub path: Vec<PathPoint>,
    pub points_added: usize,
    /// Distance covered by the appended segment, in kilometres.
    pub distance_delta_km: f64,
}

/// Timestamp of the last vertex that carries a non-empty one.
pub fn last_timestamp(path: &[PathPoint]) -> Option<&str> {
    path.iter()
        .rev()
        .find_map(|p| p.timestamp.as_deref().filter(|ts| !ts.is_empty()))
}

/// Great-circle distance between two points.
pub fn haversine_km(a: &PathPoint, b: &PathPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

pub fn path_distance_km(path: &[PathPoint]) -> f64 {
    path.windows(2).map(|w| haversine_km(&w[0], &w[1])).sum()
}

/// Append `points` to `path`, capped at [`MAX_PATH_POINTS`].
pub fn append_points_to_polyline(path: Vec<PathPoint>, points: &[LiveRoutePoint]) -> MergeOutcome {
    append_points_bounded(path, points, MAX_PATH_POINTS)
}

/// Append the points newer than the path's last timestamp.
///
/// Timestamps compare as strings, which orders correctly for uniformly
/// formatted UTC ISO-8601. Accepted points keep their input order. The
/// distance delta runs from the previous last vertex through every accepted
/// point. When the result exceeds `max_points` the oldest vertices are
/// dropped.
pub fn append_points_bounded(
    mut path: Vec<PathPoint>,
    points: &[LiveRoutePoint],
    max_points: usize,
) -> MergeOutcome {
    let cutoff = last_timestamp(&path).map(str::to_owned);
    let accepted: Vec<PathPoint> = points
        .iter()
        .filter(|p| match &cutoff {
            Some(cutoff) => p.timestamp.as_str() > cutoff.as_str(),
            None => true,
        })
        .map(PathPoint::from)
        .collect();

    if accepted.is_empty() {
        return MergeOutcome {
            path,
            points_added: 0,
            distance_delta_km: 0.0,
        };
    }

    let mut distance_delta_km = 0.0;
    let mut prev = path.last().cloned();
    for point in &accepted {
        if let Some(prev) = &prev {
            distance_delta_km += haversine_km(prev, point);
        }
        prev = Some(point.clone());
    }

    let points_added = accepted.len();
    path.extend(accepted);
    if path.len() > max_points {
        let excess = path.len() - max_points;
        path.drain(..excess);
    }

    MergeOutcome {
        path,
        points_added,
        distance_delta_km,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(lat: f64, lng: f64, ts: Option<&str>) -> PathPoint {
        PathPoint {
            lat,
            lng,
            timestamp: ts.map(str::to_string),
        }
    }

    fn live(lat: f64, lng: f64, ts: &str) -> LiveRoutePoint {
        LiveRoutePoint::new(lat, lng, ts)
    }

    #[test]
    fn test_haversine_one_degree_of_latitude() {
        let d = haversine_km(&vertex(0.0, 0.0, None), &vertex(1.0, 0.0, None));
        assert!((d - 111.19).abs() < 0.01, "got {}", d);
        assert_eq!(haversine_km(&vertex(5.0, 5.0, None), &vertex(5.0, 5.0, None)), 0.0);
    }

    #[test]
    fn test_last_timestamp_skips_untimed_tail() {
        let path = vec![
            vertex(47.0, 8.0, Some("2024-05-01T10:00:05.000Z")),
            vertex(47.1, 8.0, Some("")),
            vertex(47.2, 8.0, None),
        ];
        assert_eq!(last_timestamp(&path), Some("2024-05-01T10:00:05.000Z"));
        assert_eq!(last_timestamp(&path[1..]), None);
    }

    #[test]
    fn test_append_skips_points_not_newer_than_last() {
        let path = vec![vertex(47.0, 8.0, Some("2024-05-01T10:00:05.000Z"))];
        let outcome = append_points_to_polyline(
            path,
            &[
                live(47.0, 8.1, "2024-05-01T10:00:04.000Z"),
                live(47.0, 8.1, "2024-05-01T10:00:05.000Z"),
                live(47.1, 8.0, "2024-05-01T10:00:06.000Z"),
            ],
        );
        assert_eq!(outcome.points_added, 1);
        assert_eq!(outcome.path.len(), 2);
        assert_eq!(
            last_timestamp(&outcome.path),
            Some("2024-05-01T10:00:06.000Z")
        );
    }

    #[test]
    fn test_append_is_idempotent() {
        let path = vec![vertex(47.0, 8.0, Some("2024-05-01T10:00:00.000Z"))];
        let batch = [
            live(47.1, 8.0, "2024-05-01T10:00:01.000Z"),
            live(47.2, 8.0, "2024-05-01T10:00:02.000Z"),
        ];
        let first = append_points_to_polyline(path, &batch);
        let second = append_points_to_polyline(first.path.clone(), &batch);
        assert_eq!(second.points_added, 0);
        assert_eq!(second.distance_delta_km, 0.0);
        assert_eq!(second.path, first.path);
    }

    #[test]
    fn test_append_to_empty_path_accepts_everything() {
        let outcome = append_points_to_polyline(
            Vec::new(),
            &[
                live(0.0, 0.0, "2024-05-01T10:00:01.000Z"),
                live(1.0, 0.0, "2024-05-01T10:00:02.000Z"),
            ],
        );
        assert_eq!(outcome.points_added, 2);
        assert!((outcome.distance_delta_km - 111.19).abs() < 0.01);
    }

    #[test]
    fn test_path_without_timestamp_accepts_all_and_measures_from_last_vertex() {
        let path = vec![vertex(0.0, 0.0, None)];
        let outcome = append_points_to_polyline(path, &[live(1.0, 0.0, "2024-05-01T10:00:01.000Z")]);
        assert_eq!(outcome.points_added, 1);
        assert!((outcome.distance_delta_km - 111.19).abs() < 0.01);
    }

    #[test]
    fn test_distance_delta_matches_recomputed_total() {
        let path = vec![
            vertex(47.0, 8.0, Some("2024-05-01T10:00:00.000Z")),
            vertex(47.01, 8.02, Some("2024-05-01T10:00:01.000Z")),
        ];
        let before = path_distance_km(&path);
        let outcome = append_points_to_polyline(
            path,
            &[
                live(47.03, 8.01, "2024-05-01T10:00:02.000Z"),
                live(47.05, 8.04, "2024-05-01T10:00:03.000Z"),
            ],
        );
        let after = path_distance_km(&outcome.path);
        assert!((before + outcome.distance_delta_km - after).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_order_batch_keeps_input_order() {
        let path = vec![vertex(47.0, 8.0, Some("2024-05-01T10:00:00.000Z"))];
        let outcome = append_points_to_polyline(
            path,
            &[
                live(47.2, 8.0, "2024-05-01T10:00:02.000Z"),
                live(47.1, 8.0, "2024-05-01T10:00:01.000Z"),
            ],
        );
        assert_eq!(outcome.points_added, 2);
        assert_eq!(
            outcome.path[1].timestamp.as_deref(),
            Some("2024-05-01T10:00:02.000Z")
        );
    }

    #[test]
    fn test_bounded_append_drops_oldest() {
        let path = vec![
            vertex(0.0, 0.0, Some("2024-05-01T10:00:00.000Z")),
            vertex(0.0, 0.1, Some("2024-05-01T10:00:01.000Z")),
        ];
        let outcome = append_points_bounded(
            path,
            &[
                live(0.0, 0.2, "2024-05-01T10:00:02.000Z"),
                live(0.0, 0.3, "2024-05-01T10:00:03.000Z"),
            ],
            3,
        );
        assert_eq!(outcome.points_added, 2);
        assert_eq!(outcome.path.len(), 3);
        assert_eq!(outcome.path[0].lng, 0.1);
    }
}
