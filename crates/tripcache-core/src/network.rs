use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

/// Shared online/offline signal. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct NetworkStatus {
    offline: Arc<AtomicBool>,
}

impl NetworkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offline() -> Self {
        let status = Self::default();
        status.offline.store(true, Ordering::SeqCst);
        status
    }

    pub fn set_offline(&self, offline: bool) {
        let was = self.offline.swap(offline, Ordering::SeqCst);
        if was != offline {
            info!(offline = offline, "Network status changed");
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    pub fn is_online(&self) -> bool {
        !self.is_offline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let status = NetworkStatus::new();
        let observer = status.clone();
        assert!(observer.is_online());
        status.set_offline(true);
        assert!(observer.is_offline());
        assert!(NetworkStatus::offline().is_offline());
    }
}
