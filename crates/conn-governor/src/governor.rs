//! Per-(role, resource) admission control

use crate::Result;
use crate::config::GovernorConfig;
use crate::error::Error;
use crate::key::ResourceKey;
use crate::permit::Permit;
use crate::semaphore::{PermitSemaphore, WaitError};
use crate::snapshot::GovernorSnapshot;
use crate::turnstile::{Turnstile, TurnstileHold};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Workload class a governor admits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GovernorRole {
   Reader,
   Writer,
}

impl fmt::Display for GovernorRole {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         GovernorRole::Reader => f.write_str("reader"),
         GovernorRole::Writer => f.write_str("writer"),
      }
   }
}

/// How a governor uses its turnstile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnstilePolicy {
   /// Hold the turnstile for the permit's whole lifetime (writers)
   Hold,
   /// Acquire and immediately release it as a fairness checkpoint (readers)
   Pass,
}

impl TurnstilePolicy {
   /// Writers hold, readers pass
   pub fn for_role(role: GovernorRole) -> Self {
      match role {
         GovernorRole::Writer => TurnstilePolicy::Hold,
         GovernorRole::Reader => TurnstilePolicy::Pass,
      }
   }
}

/// Where a governor's capacity comes from
#[derive(Debug, Clone)]
pub enum GovernorSemaphore {
   /// Created by the governor, sized from `max_permits`; closed by the
   /// governor on [`PoolGovernor::close`]
   Owned(Arc<PermitSemaphore>),
   /// Supplied by the caller and possibly drawn on by other governors. The
   /// caller sizes it and is the only one that closes it.
   Shared(Arc<PermitSemaphore>),
}

impl GovernorSemaphore {
   fn semaphore(&self) -> &Arc<PermitSemaphore> {
      match self {
         GovernorSemaphore::Owned(sem) | GovernorSemaphore::Shared(sem) => sem,
      }
   }
}

/// Counters shared between a governor and the permits it hands out
#[derive(Debug, Default)]
pub(crate) struct GovernorState {
   in_use: AtomicUsize,
   queued: AtomicUsize,
   total_acquired: AtomicU64,
   total_timeouts: AtomicU64,
   total_canceled_waits: AtomicU64,
   drained: Notify,
   drain_lock: Mutex<()>,
   drain_condvar: Condvar,
}

impl GovernorState {
   pub(crate) fn permit_released(&self) {
      if self.in_use.fetch_sub(1, Ordering::SeqCst) == 1 {
         // Taking the lock orders this wake-up after a blocking drain waiter's check
         let _guard = self.drain_lock.lock();
         self.drain_condvar.notify_all();
         self.drained.notify_waiters();
      }
   }
}

/// Keeps the queued-waiter count accurate even if the waiting future is dropped
struct QueuedGuard<'a>(&'a GovernorState);

impl<'a> QueuedGuard<'a> {
   fn enter(state: &'a GovernorState) -> Self {
      state.queued.fetch_add(1, Ordering::SeqCst);
      Self(state)
   }
}

impl Drop for QueuedGuard<'_> {
   fn drop(&mut self) {
      self.0.queued.fetch_sub(1, Ordering::SeqCst);
   }
}

/// Counts an async acquisition that was dropped mid-wait as a canceled wait
struct AbandonGuard<'a> {
   state: &'a GovernorState,
   armed: bool,
}

impl Drop for AbandonGuard<'_> {
   fn drop(&mut self) {
      if self.armed {
         self.state.total_canceled_waits.fetch_add(1, Ordering::SeqCst);
      }
   }
}

/// Admission controller bounding concurrent permits for one role of one resource.
///
/// Acquisition comes in blocking ([`acquire`](Self::acquire)) and suspending
/// ([`acquire_async`](Self::acquire_async)) forms with identical counters,
/// fairness and errors; only the async form observes a cancellation token.
///
/// # Example
///
/// ```
/// use conn_governor::{GovernorConfig, GovernorRole, PoolGovernor, ResourceKey};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> conn_governor::Result<()> {
/// let key = ResourceKey::from_connection_string("sqlite://app.db");
/// let config = GovernorConfig::new().with_max_permits(2);
/// let governor = PoolGovernor::new(GovernorRole::Reader, key, &config)?;
///
/// let cancel = CancellationToken::new();
/// let permit = governor.acquire_async(&cancel).await?;
/// assert_eq!(governor.snapshot().in_use, 1);
/// drop(permit);
///
/// governor.wait_for_drain_async(&cancel).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PoolGovernor {
   role: GovernorRole,
   key: ResourceKey,
   label: String,
   max_permits: usize,
   acquire_timeout: Duration,
   disabled: bool,
   semaphore: GovernorSemaphore,
   turnstile: Option<(Turnstile, TurnstilePolicy)>,
   state: Arc<GovernorState>,
}

impl PoolGovernor {
   /// Create a governor owning a semaphore of `config.max_permits` units
   pub fn new(role: GovernorRole, key: ResourceKey, config: &GovernorConfig) -> Result<Self> {
      if !config.disabled && config.max_permits == 0 {
         return Err(Error::InvalidConfig(format!(
            "{role} governor for resource {key} needs max_permits >= 1"
         )));
      }

      Ok(Self {
         role,
         key,
         label: format!("{role}:{key}"),
         max_permits: config.max_permits,
         acquire_timeout: config.acquire_timeout(),
         disabled: config.disabled,
         semaphore: GovernorSemaphore::Owned(Arc::new(PermitSemaphore::new(config.max_permits))),
         turnstile: None,
         state: Arc::new(GovernorState::default()),
      })
   }

   /// Draw capacity from a semaphore shared with other governors.
   ///
   /// The shared semaphore's capacity replaces `max_permits`.
   pub fn with_shared_semaphore(mut self, semaphore: Arc<PermitSemaphore>) -> Self {
      if self.max_permits != semaphore.capacity() {
         debug!(
            governor = %self.label,
            configured = self.max_permits,
            shared_capacity = semaphore.capacity(),
            "Shared semaphore capacity overrides configured max_permits"
         );
      }
      self.max_permits = semaphore.capacity();
      self.semaphore = GovernorSemaphore::Shared(semaphore);
      self
   }

   /// Coordinate with sibling governors through `turnstile`
   pub fn with_turnstile(mut self, turnstile: Turnstile, policy: TurnstilePolicy) -> Self {
      self.turnstile = Some((turnstile, policy));
      self
   }

   pub fn role(&self) -> GovernorRole {
      self.role
   }

   pub fn key(&self) -> ResourceKey {
      self.key
   }

   pub fn label(&self) -> &str {
      &self.label
   }

   pub fn is_disabled(&self) -> bool {
      self.disabled
   }

   pub fn turnstile(&self) -> Option<&Turnstile> {
      self.turnstile.as_ref().map(|(turnstile, _)| turnstile)
   }

   /// Wait (blocking the current thread) for a permit
   pub fn acquire(&self) -> Result<Permit> {
      if self.disabled {
         return Ok(Permit::empty());
      }
      let deadline = Instant::now() + self.acquire_timeout;

      let hold = self.enter_turnstile(deadline)?;

      let waited = {
         let _queued = QueuedGuard::enter(&self.state);
         self.semaphore.semaphore().acquire_blocking(deadline)
      };

      match waited {
         Ok(()) => Ok(self.grant(hold)),
         Err(wait) => {
            drop(hold);
            Err(self.wait_failed(wait))
         }
      }
   }

   /// Suspend until a permit is granted, the acquire timeout elapses or `cancel` fires.
   ///
   /// Dropping the returned future mid-wait counts as a canceled wait and leaves
   /// no residual state behind.
   pub async fn acquire_async(&self, cancel: &CancellationToken) -> Result<Permit> {
      if self.disabled {
         return Ok(Permit::empty());
      }
      let deadline = Instant::now() + self.acquire_timeout;

      let mut abandon = AbandonGuard {
         state: &self.state,
         armed: true,
      };
      let result = self.acquire_async_inner(deadline, cancel).await;
      abandon.armed = false;
      result
   }

   async fn acquire_async_inner(
      &self,
      deadline: Instant,
      cancel: &CancellationToken,
   ) -> Result<Permit> {
      let hold = self.enter_turnstile_async(deadline, cancel).await?;

      let waited = {
         let _queued = QueuedGuard::enter(&self.state);
         self
            .semaphore
            .semaphore()
            .acquire_async(deadline, cancel)
            .await
      };

      match waited {
         Ok(()) => Ok(self.grant(hold)),
         Err(wait) => {
            drop(hold);
            Err(self.wait_failed(wait))
         }
      }
   }

   /// Take a permit only if one is free right now.
   ///
   /// `Ok(None)` is a failed probe, not a timeout, and leaves every counter as is.
   pub fn try_acquire(&self) -> Result<Option<Permit>> {
      if self.disabled {
         return Ok(Some(Permit::empty()));
      }

      let hold = match &self.turnstile {
         Some((turnstile, TurnstilePolicy::Hold)) => match turnstile.try_hold() {
            Some(hold) => Some(hold),
            None => return Ok(None),
         },
         Some((turnstile, TurnstilePolicy::Pass)) => {
            if !turnstile.try_pass() {
               return Ok(None);
            }
            None
         }
         None => None,
      };

      match self.semaphore.semaphore().try_acquire() {
         Ok(true) => Ok(Some(self.grant(hold))),
         Ok(false) => Ok(None),
         Err(wait) => Err(self.wait_failed(wait)),
      }
   }

   /// Async flavor of [`try_acquire`](Self::try_acquire); never suspends
   pub async fn try_acquire_async(&self) -> Result<Option<Permit>> {
      self.try_acquire()
   }

   /// Suspend until no permits are outstanding
   pub async fn wait_for_drain_async(&self, cancel: &CancellationToken) -> Result<()> {
      loop {
         let drained = self.state.drained.notified();
         tokio::pin!(drained);
         drained.as_mut().enable();

         if self.state.in_use.load(Ordering::SeqCst) == 0 {
            return Ok(());
         }

         tokio::select! {
            biased;
            _ = cancel.cancelled() => {
               return Err(Error::AcquisitionCanceled {
                  role: self.role,
                  key: self.key,
               });
            }
            _ = &mut drained => {}
         }
      }
   }

   /// Block until no permits are outstanding; false if `timeout` elapsed first
   pub fn wait_for_drain(&self, timeout: Duration) -> bool {
      let deadline = Instant::now() + timeout;
      let mut guard = self.state.drain_lock.lock();
      while self.state.in_use.load(Ordering::SeqCst) > 0 {
         if self
            .state
            .drain_condvar
            .wait_until(&mut guard, deadline)
            .timed_out()
         {
            return self.state.in_use.load(Ordering::SeqCst) == 0;
         }
      }
      true
   }

   /// Read the counters without blocking or mutating anything
   pub fn snapshot(&self) -> GovernorSnapshot {
      GovernorSnapshot {
         label: self.label.clone(),
         role: self.role,
         max_permits: self.max_permits,
         in_use: self.state.in_use.load(Ordering::SeqCst),
         queued: self.state.queued.load(Ordering::SeqCst),
         total_acquired: self.state.total_acquired.load(Ordering::SeqCst),
         total_timeouts: self.state.total_timeouts.load(Ordering::SeqCst),
         total_canceled_waits: self.state.total_canceled_waits.load(Ordering::SeqCst),
         disabled: self.disabled,
      }
   }

   /// Stop admitting. Closes the semaphore only if this governor owns it.
   pub fn close(&self) {
      let in_use = self.state.in_use.load(Ordering::SeqCst);
      if in_use > 0 {
         warn!(governor = %self.label, in_use, "Closing governor with permits outstanding");
      }
      match &self.semaphore {
         GovernorSemaphore::Owned(sem) => sem.close(),
         GovernorSemaphore::Shared(_) => {
            trace!(governor = %self.label, "Leaving shared semaphore open for its owner");
         }
      }
   }

   fn enter_turnstile(&self, deadline: Instant) -> Result<Option<TurnstileHold>> {
      let Some((turnstile, policy)) = &self.turnstile else {
         return Ok(None);
      };
      let entered = match policy {
         TurnstilePolicy::Hold => turnstile.hold_blocking(deadline).map(Some),
         TurnstilePolicy::Pass => turnstile.pass_blocking(deadline).map(|()| None),
      };
      entered.map_err(|wait| self.wait_failed(wait))
   }

   async fn enter_turnstile_async(
      &self,
      deadline: Instant,
      cancel: &CancellationToken,
   ) -> Result<Option<TurnstileHold>> {
      let Some((turnstile, policy)) = &self.turnstile else {
         return Ok(None);
      };
      let entered = match policy {
         TurnstilePolicy::Hold => turnstile.hold_async(deadline, cancel).await.map(Some),
         TurnstilePolicy::Pass => turnstile.pass_async(deadline, cancel).await.map(|()| None),
      };
      entered.map_err(|wait| self.wait_failed(wait))
   }

   fn grant(&self, hold: Option<TurnstileHold>) -> Permit {
      let in_use = self.state.in_use.fetch_add(1, Ordering::SeqCst) + 1;
      self.state.total_acquired.fetch_add(1, Ordering::SeqCst);
      trace!(
         governor = %self.label,
         in_use,
         holds_turnstile = hold.is_some(),
         "Permit granted"
      );
      Permit::granted(
         Arc::clone(&self.state),
         Arc::clone(self.semaphore.semaphore()),
         hold,
      )
   }

   /// Record a failed wait and turn it into the caller-facing error
   fn wait_failed(&self, wait: WaitError) -> Error {
      match wait {
         WaitError::TimedOut => {
            self.state.total_timeouts.fetch_add(1, Ordering::SeqCst);
            debug!(
               governor = %self.label,
               timeout_ms = self.acquire_timeout.as_millis() as u64,
               "Permit acquisition timed out"
            );
            Error::PoolSaturated {
               role: self.role,
               key: self.key,
               timeout: self.acquire_timeout,
            }
         }
         WaitError::Canceled => {
            self.state.total_canceled_waits.fetch_add(1, Ordering::SeqCst);
            debug!(governor = %self.label, "Permit acquisition canceled");
            Error::AcquisitionCanceled {
               role: self.role,
               key: self.key,
            }
         }
         WaitError::Closed => Error::GovernorClosed {
            role: self.role,
            key: self.key,
         },
      }
   }
}
