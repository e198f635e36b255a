//! Core library for tripcache.
//!
//! Keeps a device's trip paths usable offline and follows them live:
//!
//! - `store`: async key-value persistence (`MemoryStore`, `FileStore`)
//! - `cache`: versioned, TTL- and count-bounded trip snapshots and live route streams
//! - `merge`: timestamp-deduplicating path merge with incremental haversine distance
//! - `poller`: single-flight incremental position polling
//! - `loader`: network-first trip loading with snapshot fallback
//! - `tracker`: the session object tying the above to one shared map state

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod loader;
pub mod merge;
pub mod models;
pub mod network;
pub mod poller;
pub mod settings;
pub mod state;
pub mod store;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, PlotSource, PoiSource, PositionSource};
pub use cache::{LiveRouteCache, TravelSnapshot, TravelSnapshotCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::TrackerError;
pub use loader::TravelDataLoader;
pub use merge::{append_points_to_polyline, MergeOutcome, MAX_PATH_POINTS};
pub use network::NetworkStatus;
pub use poller::{LivePoller, ManualTimer, PollPhase, PollTimer, TokioTimer};
pub use settings::{FileSettingsStore, LiveSettings, MemorySettingsStore, SettingsStore};
pub use state::{CacheProvenance, MapState, SharedMapState};
pub use store::{FileStore, MemoryStore, SnapshotStore, StoreError};
pub use tracker::{LiveTracker, TrackerDeps};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// All shared state in this crate is only mutated inside short synchronous
/// sections, so a poisoned lock still holds consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
