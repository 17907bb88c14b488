//! Mutual exclusion between ROI edits and a running extraction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use roiscope_core::Mask;

/// Shared flag raised while an extraction holds a snapshot of the ROI list.
#[derive(Debug, Clone, Default)]
pub struct ExtractionGuard(Arc<AtomicBool>);

impl ExtractionGuard {
    /// Whether an extraction currently holds the list.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise the flag, or `None` if it is already raised.
    #[must_use]
    pub fn try_raise(&self) -> Option<ExtractionLease> {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ExtractionLease(Arc::clone(&self.0)))
    }
}

/// Holds the guard raised; dropping it lowers the guard.
#[derive(Debug)]
pub struct ExtractionLease(Arc<AtomicBool>);

impl Drop for ExtractionLease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Rasterized copy of the ROI list taken when an extraction starts.
#[derive(Debug)]
pub struct ExtractionSnapshot {
    /// Labels in list order.
    pub labels: Vec<String>,
    /// One mask per label.
    pub masks: Vec<Mask>,
    /// Keeps the list locked until the snapshot is dropped.
    pub lease: ExtractionLease,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_lowers_on_drop() {
        let guard = ExtractionGuard::default();
        let lease = guard.try_raise().unwrap();
        assert!(guard.is_raised());
        assert!(guard.try_raise().is_none());
        drop(lease);
        assert!(!guard.is_raised());
        assert!(guard.try_raise().is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let guard = ExtractionGuard::default();
        let other = guard.clone();
        let _lease = other.try_raise().unwrap();
        assert!(guard.is_raised());
    }
}
