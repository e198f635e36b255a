//! HTTP access to the tracking backend.
//!
//! `ApiClient` talks to the plot, route, event and POI endpoints with an
//! optional bearer token. The rest of the crate only sees the traits in
//! `sources`, so the client can be swapped for a fake.

pub mod client;
pub mod error;
pub mod sources;

pub use client::ApiClient;
pub use error::ApiError;
pub use sources::{PlotSource, PoiSource, PositionSource};
