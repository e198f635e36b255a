//! Data source seams. `ApiClient` implements all of them over HTTP; tests
//! substitute in-process fakes.

use async_trait::async_trait;

use super::ApiError;
use crate::models::{DeviceEvent, PlotData, PoiResponse, Position, TripQuery};

#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Raw fixes for `device_id` in `[from, to]`, unsimplified.
    async fn fetch_positions(
        &self,
        device_id: i64,
        from: &str,
        to: &str,
    ) -> Result<Vec<Position>, ApiError>;

    /// The (possibly simplified) route for a whole trip.
    async fn fetch_route(&self, query: &TripQuery) -> Result<Vec<Position>, ApiError>;
}

#[async_trait]
pub trait PlotSource: Send + Sync {
    async fn fetch_plot_data(&self, query: &TripQuery) -> Result<PlotData, ApiError>;

    async fn fetch_events(&self, query: &TripQuery) -> Result<Vec<DeviceEvent>, ApiError>;
}

#[async_trait]
pub trait PoiSource: Send + Sync {
    /// Manual POIs in a range, or all of them when the range is incomplete.
    async fn fetch_manual_pois(
        &self,
        device_id: Option<i64>,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<PoiResponse, ApiError>;
}
