//! Data models for trips, positions and map output.
//!
//! - `Trip`, `TripQuery`: what is selected and how it is requested
//! - `Position`, `LiveRoutePoint`, `PathPoint`: fixes at different stages
//! - `PlotData`, `DevicePolyline`, `MapMarker`, `ManualPoi`: plot source output

pub mod plot;
pub mod point;
pub mod trip;

pub use plot::{
    Bounds, DeviceEvent, DevicePolyline, LatLng, ManualPoi, MapMarker, PlotData, PoiResponse,
};
pub use point::{LiveRoutePoint, PathPoint, Position};
pub use trip::{QueryDefaults, Trip, TripQuery, TripSource, DEFAULT_MAX_POINTS};
