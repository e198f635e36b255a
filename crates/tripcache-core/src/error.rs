use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum TrackerError {
    /// The network request failed and no usable snapshot exists.
    #[error("No data for {cache_key}: {source}")]
    NoTripData {
        cache_key: String,
        #[source]
        source: ApiError,
    },
}

impl TrackerError {
    pub fn api_error(&self) -> &ApiError {
        match self {
            TrackerError::NoTripData { source, .. } => source,
        }
    }
}
