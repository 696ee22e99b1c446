//! Permit handed out by a successful acquisition

use crate::governor::GovernorState;
use crate::semaphore::PermitSemaphore;
use crate::turnstile::TurnstileHold;
use std::sync::Arc;

/// One admitted unit of work.
///
/// Releasing returns the unit to the governor and, for writers, reopens the
/// turnstile. Release happens exactly once: [`Permit::release`] may be called
/// any number of times and dropping the permit afterwards is a no-op.
///
/// # Example
///
/// ```
/// use conn_governor::{GovernorConfig, GovernorRole, PoolGovernor, ResourceKey};
///
/// # fn example() -> conn_governor::Result<()> {
/// let key = ResourceKey::from_connection_string("sqlite://app.db");
/// let governor = PoolGovernor::new(GovernorRole::Reader, key, &GovernorConfig::default())?;
///
/// let mut permit = governor.acquire()?;
/// assert_eq!(governor.snapshot().in_use, 1);
///
/// permit.release();
/// permit.release(); // no-op
/// assert_eq!(governor.snapshot().in_use, 0);
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[must_use = "dropping the permit releases it immediately"]
#[derive(Debug)]
pub struct Permit {
   grant: Option<Grant>,
}

#[derive(Debug)]
struct Grant {
   state: Arc<GovernorState>,
   semaphore: Arc<PermitSemaphore>,
   turnstile: Option<TurnstileHold>,
}

impl Permit {
   /// Permit from a disabled governor; releasing it touches nothing
   pub(crate) fn empty() -> Self {
      Self { grant: None }
   }

   pub(crate) fn granted(
      state: Arc<GovernorState>,
      semaphore: Arc<PermitSemaphore>,
      turnstile: Option<TurnstileHold>,
   ) -> Self {
      Self {
         grant: Some(Grant {
            state,
            semaphore,
            turnstile,
         }),
      }
   }

   /// True for permits from a disabled governor, and after release
   pub fn is_empty(&self) -> bool {
      self.grant.is_none()
   }

   /// True if this permit keeps the writer turnstile closed
   pub fn holds_turnstile(&self) -> bool {
      self
         .grant
         .as_ref()
         .is_some_and(|grant| grant.turnstile.is_some())
   }

   /// Give the permit back. Idempotent and never fails.
   pub fn release(&mut self) {
      let Some(mut grant) = self.grant.take() else {
         return;
      };
      // Count down before returning capacity so in-use never overshoots the bound
      grant.state.permit_released();
      grant.semaphore.release();
      if let Some(mut hold) = grant.turnstile.take() {
         hold.release();
      }
   }
}

impl Drop for Permit {
   fn drop(&mut self) {
      self.release();
   }
}
