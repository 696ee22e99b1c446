//! Error types for conn-governor

use crate::governor::GovernorRole;
use crate::key::ResourceKey;
use std::time::Duration;
use thiserror::Error;

/// Errors that may occur when asking a governor for admission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
   /// No permit became available before the acquire timeout elapsed.
   ///
   /// Never retried by the governor; retry policy belongs to the caller.
   #[error("Pool saturated: no {role} permit for resource {key} within {timeout:?}")]
   PoolSaturated {
      role: GovernorRole,
      key: ResourceKey,
      timeout: Duration,
   },

   /// The caller's cancellation signal fired while waiting for a permit
   #[error("Acquisition of {role} permit for resource {key} was canceled")]
   AcquisitionCanceled { role: GovernorRole, key: ResourceKey },

   /// The governor's semaphore has been closed and admits nothing further
   #[error("{role} governor for resource {key} has been closed")]
   GovernorClosed { role: GovernorRole, key: ResourceKey },

   /// No governor is registered for the requested role and resource
   #[error("No {role} governor registered for resource {key}")]
   UnknownGovernor { role: GovernorRole, key: ResourceKey },

   /// Governor configuration rejected at construction time
   #[error("Invalid governor configuration: {0}")]
   InvalidConfig(String),
}

impl Error {
   /// True when the failure means "pool is full" rather than "caller gave up"
   pub fn is_saturated(&self) -> bool {
      matches!(self, Error::PoolSaturated { .. })
   }

   /// True when the caller's cancellation signal ended the wait
   pub fn is_canceled(&self) -> bool {
      matches!(self, Error::AcquisitionCanceled { .. })
   }
}
