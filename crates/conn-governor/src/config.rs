//! Configuration for pool governors

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Admission settings for one governor
///
/// # Examples
///
/// ```
/// use conn_governor::GovernorConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = GovernorConfig::default();
///
/// // Customize specific fields
/// let config = GovernorConfig {
///     max_permits: 1,
///     acquire_timeout_ms: 2_000,
///     ..Default::default()
/// };
///
/// // Or through the builder-style setters
/// let config = GovernorConfig::new()
///     .with_max_permits(4)
///     .with_acquire_timeout(Duration::from_millis(250));
/// assert_eq!(config.acquire_timeout(), Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
   /// Maximum number of permits outstanding at once. Must be at least 1
   /// unless the governor is disabled.
   ///
   /// Ignored when the governor draws from a shared semaphore; the shared
   /// semaphore's capacity is the bound in that case.
   ///
   /// Default: 6
   pub max_permits: usize,

   /// How long an acquisition may wait (in milliseconds) before failing with
   /// a pool-saturated error
   ///
   /// Default: 5000
   pub acquire_timeout_ms: u64,

   /// Bypass admission control entirely. A disabled governor hands out empty
   /// permits and never touches its counters.
   ///
   /// Default: false
   pub disabled: bool,
}

impl Default for GovernorConfig {
   fn default() -> Self {
      Self {
         max_permits: 6,
         acquire_timeout_ms: 5_000,
         disabled: false,
      }
   }
}

impl GovernorConfig {
   pub fn new() -> Self {
      Self::default()
   }

   /// A configuration that admits everything without bookkeeping
   pub fn disabled() -> Self {
      Self {
         disabled: true,
         ..Self::default()
      }
   }

   pub fn with_max_permits(mut self, max_permits: usize) -> Self {
      self.max_permits = max_permits;
      self
   }

   pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
      self.acquire_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
      self
   }

   pub fn acquire_timeout(&self) -> Duration {
      Duration::from_millis(self.acquire_timeout_ms)
   }
}
