//! Point-in-time view of a governor's counters

use crate::governor::GovernorRole;
use serde::{Deserialize, Serialize};

/// Immutable read of a governor's configuration and counters.
///
/// Taken without blocking; individual counters are read independently, so a
/// snapshot taken under load is a consistent view of each value but not of
/// the set as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorSnapshot {
   /// `role:resource-key`, used in logs and errors
   pub label: String,
   pub role: GovernorRole,
   pub max_permits: usize,
   /// Permits currently outstanding
   pub in_use: usize,
   /// Callers currently waiting on the semaphore
   pub queued: usize,
   pub total_acquired: u64,
   pub total_timeouts: u64,
   pub total_canceled_waits: u64,
   pub disabled: bool,
}

impl GovernorSnapshot {
   /// Fraction of permits in use (0.0 to 1.0)
   ///
   /// Returns 0.0 for a disabled governor or one with no capacity.
   pub fn utilization(&self) -> f64 {
      if self.disabled || self.max_permits == 0 {
         0.0
      } else {
         self.in_use as f64 / self.max_permits as f64
      }
   }

   /// True when every permit is handed out
   pub fn is_saturated(&self) -> bool {
      !self.disabled && self.in_use >= self.max_permits
   }
}
