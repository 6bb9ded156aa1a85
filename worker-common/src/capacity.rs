//! Per-route capacity accounting as seen from outside the admission controller.

use serde::{Deserialize, Serialize};

/// Point-in-time view of a route's capacity state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    /// Admitted requests that have not been released yet.
    pub in_flight: usize,
    /// Sum of workload costs of in-flight requests.
    pub workload_total: f64,
    /// Requests waiting for admission.
    pub queued: usize,
}

impl CapacitySnapshot {
    pub fn is_idle(&self) -> bool {
        self.in_flight == 0 && self.queued == 0
    }
}
