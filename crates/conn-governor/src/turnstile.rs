//! Writer-preference gate shared by a writer governor and its reader governors

use crate::semaphore::{PermitSemaphore, WaitError};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Capacity-1 gate implementing writer preference.
///
/// The writer governor holds the turnstile for as long as its permit lives.
/// Reader governors pass through it (acquire, then release at once) before
/// contending for their own semaphore. While a writer holds or is waiting on the
/// gate, new readers stall at the checkpoint; readers that already hold permits
/// keep running and drain naturally.
///
/// Cloning shares the same gate. Neither governor owns it; its lifetime follows
/// whoever owns both governors (see [`GovernorPair`]).
///
/// [`GovernorPair`]: crate::GovernorPair
#[derive(Debug, Clone)]
pub struct Turnstile {
   gate: Arc<PermitSemaphore>,
}

impl Default for Turnstile {
   fn default() -> Self {
      Self::new()
   }
}

impl Turnstile {
   pub fn new() -> Self {
      Self {
         gate: Arc::new(PermitSemaphore::new(1)),
      }
   }

   /// True while someone holds the gate
   pub fn is_held(&self) -> bool {
      self.gate.available() == 0
   }

   /// Take the gate without waiting
   pub fn try_hold(&self) -> Option<TurnstileHold> {
      match self.gate.try_acquire() {
         Ok(true) => Some(TurnstileHold::new(Arc::clone(&self.gate))),
         _ => None,
      }
   }

   /// True if two handles refer to the same gate
   pub fn same_gate(&self, other: &Turnstile) -> bool {
      Arc::ptr_eq(&self.gate, &other.gate)
   }

   pub(crate) fn hold_blocking(&self, deadline: Instant) -> Result<TurnstileHold, WaitError> {
      self.gate.acquire_blocking(deadline)?;
      Ok(TurnstileHold::new(Arc::clone(&self.gate)))
   }

   pub(crate) async fn hold_async(
      &self,
      deadline: Instant,
      cancel: &CancellationToken,
   ) -> Result<TurnstileHold, WaitError> {
      self.gate.acquire_async(deadline, cancel).await?;
      Ok(TurnstileHold::new(Arc::clone(&self.gate)))
   }

   /// Touch-and-go checkpoint
   pub(crate) fn pass_blocking(&self, deadline: Instant) -> Result<(), WaitError> {
      self.hold_blocking(deadline).map(drop)
   }

   pub(crate) async fn pass_async(
      &self,
      deadline: Instant,
      cancel: &CancellationToken,
   ) -> Result<(), WaitError> {
      self.hold_async(deadline, cancel).await.map(drop)
   }

   /// Non-blocking checkpoint; false when a writer holds the gate
   pub(crate) fn try_pass(&self) -> bool {
      self.try_hold().is_some()
   }
}

/// Ownership of a [`Turnstile`]; the gate reopens when this is released or dropped
#[must_use = "dropping the hold reopens the turnstile immediately"]
#[derive(Debug)]
pub struct TurnstileHold {
   gate: Option<Arc<PermitSemaphore>>,
}

impl TurnstileHold {
   fn new(gate: Arc<PermitSemaphore>) -> Self {
      Self { gate: Some(gate) }
   }

   /// Reopen the gate. Calling this more than once is a no-op.
   pub fn release(&mut self) {
      if let Some(gate) = self.gate.take() {
         gate.release();
      }
   }
}

impl Drop for TurnstileHold {
   fn drop(&mut self) {
      self.release();
   }
}
