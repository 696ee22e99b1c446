//! Counting semaphore that can be waited on from blocking threads and async tasks
//!
//! Blocking waiters park on a condvar, async waiters on a [`Notify`]. Every release
//! wakes one waiter of each kind; whoever loses the race re-checks and waits again,
//! so a released unit is never stranded.

use parking_lot::{Condvar, Mutex};
use std::time::Instant;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Why a wait on a [`PermitSemaphore`] ended without a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitError {
   TimedOut,
   Canceled,
   Closed,
}

#[derive(Debug)]
struct State {
   available: usize,
   closed: bool,
}

/// Bounded capacity pool backing a governor.
///
/// A governor normally creates and owns its semaphore. To let several governors
/// draw from one capacity pool, create the semaphore yourself, wrap it in an
/// `Arc` and hand it to each governor as [`GovernorSemaphore::Shared`]; the
/// creator is then responsible for its size and for closing it.
///
/// [`GovernorSemaphore::Shared`]: crate::GovernorSemaphore::Shared
#[derive(Debug)]
pub struct PermitSemaphore {
   capacity: usize,
   state: Mutex<State>,
   condvar: Condvar,
   notify: Notify,
}

impl PermitSemaphore {
   /// Create a semaphore with `capacity` units, all available
   pub fn new(capacity: usize) -> Self {
      Self {
         capacity,
         state: Mutex::new(State {
            available: capacity,
            closed: false,
         }),
         condvar: Condvar::new(),
         notify: Notify::new(),
      }
   }

   pub fn capacity(&self) -> usize {
      self.capacity
   }

   /// Units not currently handed out
   pub fn available(&self) -> usize {
      self.state.lock().available
   }

   pub fn is_closed(&self) -> bool {
      self.state.lock().closed
   }

   /// Close the semaphore, failing current and future waiters.
   ///
   /// Units already handed out can still be released.
   pub fn close(&self) {
      self.state.lock().closed = true;
      self.condvar.notify_all();
      self.notify.notify_waiters();
   }

   /// Take a unit without waiting. `Ok(false)` means none is free right now.
   pub(crate) fn try_acquire(&self) -> Result<bool, WaitError> {
      let mut state = self.state.lock();
      if state.closed {
         return Err(WaitError::Closed);
      }
      if state.available > 0 {
         state.available -= 1;
         return Ok(true);
      }
      Ok(false)
   }

   /// Park the current thread until a unit is free or `deadline` passes
   pub(crate) fn acquire_blocking(&self, deadline: Instant) -> Result<(), WaitError> {
      let mut state = self.state.lock();
      let mut timed_out = false;
      loop {
         if state.closed {
            return Err(WaitError::Closed);
         }
         if state.available > 0 {
            state.available -= 1;
            return Ok(());
         }
         if timed_out {
            return Err(WaitError::TimedOut);
         }
         // One more pass after the deadline: a release may have raced the timer.
         timed_out = self.condvar.wait_until(&mut state, deadline).timed_out();
      }
   }

   /// Suspend until a unit is free, `deadline` passes or `cancel` fires
   pub(crate) async fn acquire_async(
      &self,
      deadline: Instant,
      cancel: &CancellationToken,
   ) -> Result<(), WaitError> {
      let deadline = tokio::time::Instant::from_std(deadline);
      loop {
         let notified = self.notify.notified();
         tokio::pin!(notified);
         // Register before checking so a release between check and await is not lost
         notified.as_mut().enable();

         if self.try_acquire()? {
            return Ok(());
         }

         tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Canceled),
            _ = &mut notified => {}
            _ = tokio::time::sleep_until(deadline) => {
               return if self.try_acquire()? {
                  Ok(())
               } else {
                  Err(WaitError::TimedOut)
               };
            }
         }
      }
   }

   /// Return one unit and wake a waiter of each kind
   pub(crate) fn release(&self) {
      {
         let mut state = self.state.lock();
         debug_assert!(state.available < self.capacity, "semaphore over-released");
         state.available += 1;
      }
      self.condvar.notify_one();
      self.notify.notify_one();
   }
}
