//! Integration tests for permit admission, fairness and failure cleanup.
//!
//! Tests verify:
//! - Bounded admission: never more than `max_permits` outstanding
//! - Disabled governors: no blocking, no bookkeeping
//! - Idempotent release: double release never over-admits
//! - Writer preference: new readers wait behind a writer holding the turnstile
//! - Bounded writer waits under a continuous stream of readers, blocking and async
//! - Failure cleanup: timeouts and cancellations leave no turnstile or counter residue

use conn_governor::{
   CancellationToken, Error, GovernorConfig, GovernorPair, GovernorRole, PermitSemaphore,
   PoolGovernor, ResourceKey, Turnstile, TurnstilePolicy,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

fn key(name: &str) -> ResourceKey {
   ResourceKey::from_connection_string(&format!("sqlite://{name}.db"))
}

fn governor(role: GovernorRole, max_permits: usize, timeout: Duration) -> Arc<PoolGovernor> {
   let config = GovernorConfig::new()
      .with_max_permits(max_permits)
      .with_acquire_timeout(timeout);
   Arc::new(PoolGovernor::new(role, key("governor-tests"), &config).unwrap())
}

/// Records the order in which tasks were granted permits
#[derive(Default)]
struct GrantOrder(std::sync::Mutex<Vec<&'static str>>);

impl GrantOrder {
   fn record(&self, who: &'static str) {
      self.0.lock().unwrap().push(who);
   }

   fn entries(&self) -> Vec<&'static str> {
      self.0.lock().unwrap().clone()
   }
}

async fn wait_until_queued(governor: &PoolGovernor, queued: usize) {
   for _ in 0..200 {
      if governor.snapshot().queued == queued {
         return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
   }
   panic!(
      "governor never reached {queued} queued waiters (saw {})",
      governor.snapshot().queued
   );
}

/// Route governor logs to the test harness; safe to call from every test
fn init_tracing() {
   let _ = tracing_subscriber::fmt()
      .with_max_level(tracing::Level::DEBUG)
      .with_test_writer()
      .try_init();
}

// ============================================================================
// Bounded admission
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_permits_never_exceed_max() {
   let governor = governor(GovernorRole::Reader, 3, Duration::from_secs(5));
   let barrier = Arc::new(Barrier::new(8));
   let (active, max_seen) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));

   let handles: Vec<_> = (0..8)
      .map(|_| {
         let (governor, barrier, active, max_seen) = (
            Arc::clone(&governor),
            Arc::clone(&barrier),
            Arc::clone(&active),
            Arc::clone(&max_seen),
         );

         tokio::spawn(async move {
            barrier.wait().await;
            let cancel = CancellationToken::new();
            let permit = governor.acquire_async(&cancel).await.unwrap();

            max_seen.fetch_max(active.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
            assert!(governor.snapshot().in_use <= 3);
            tokio::time::sleep(Duration::from_millis(10)).await;
            active.fetch_sub(1, Ordering::SeqCst);

            drop(permit);
         })
      })
      .collect();

   for handle in handles {
      handle.await.unwrap();
   }

   assert_eq!(
      max_seen.load(Ordering::SeqCst),
      3,
      "Expected exactly 3 concurrent permit holders, saw {}",
      max_seen.load(Ordering::SeqCst)
   );

   let snapshot = governor.snapshot();
   assert_eq!(snapshot.in_use, 0);
   assert_eq!(snapshot.queued, 0);
   assert_eq!(snapshot.total_acquired, 8);
   assert_eq!(snapshot.total_timeouts, 0);
}

#[tokio::test]
async fn test_extra_try_acquire_fails_until_release() {
   let governor = governor(GovernorRole::Reader, 2, Duration::from_secs(5));

   let first = governor.try_acquire_async().await.unwrap().unwrap();
   let _second = governor.try_acquire_async().await.unwrap().unwrap();
   assert!(governor.try_acquire_async().await.unwrap().is_none());

   drop(first);
   assert!(governor.try_acquire_async().await.unwrap().is_some());
   assert_eq!(governor.snapshot().total_timeouts, 0);
}

#[test]
fn test_blocking_acquire_waits_for_release() {
   let governor = governor(GovernorRole::Writer, 1, Duration::from_secs(5));
   let held = governor.acquire().unwrap();

   let waiter = {
      let governor = Arc::clone(&governor);
      std::thread::spawn(move || {
         let start = Instant::now();
         let permit = governor.acquire().unwrap();
         (start.elapsed(), permit.is_empty())
      })
   };

   std::thread::sleep(Duration::from_millis(50));
   assert_eq!(governor.snapshot().queued, 1);
   drop(held);

   let (waited, empty) = waiter.join().unwrap();
   assert!(waited >= Duration::from_millis(40), "waited only {waited:?}");
   assert!(!empty);
   assert_eq!(governor.snapshot().total_acquired, 2);
}

#[test]
fn test_blocking_timeout_reports_saturation() {
   let governor = governor(GovernorRole::Writer, 1, Duration::from_millis(30));
   let _held = governor.acquire().unwrap();

   let err = governor.acquire().unwrap_err();
   assert!(err.is_saturated());
   assert_eq!(
      err,
      Error::PoolSaturated {
         role: GovernorRole::Writer,
         key: key("governor-tests"),
         timeout: Duration::from_millis(30),
      }
   );

   let snapshot = governor.snapshot();
   assert_eq!(snapshot.total_timeouts, 1);
   assert_eq!(snapshot.in_use, 1);
   assert_eq!(snapshot.queued, 0);
}

#[tokio::test]
async fn test_async_timeout_matches_blocking_bookkeeping() {
   let governor = governor(GovernorRole::Reader, 1, Duration::from_millis(30));
   let _held = governor.acquire().unwrap();

   let cancel = CancellationToken::new();
   let err = governor.acquire_async(&cancel).await.unwrap_err();
   assert!(err.is_saturated());

   let snapshot = governor.snapshot();
   assert_eq!(snapshot.total_timeouts, 1);
   assert_eq!(snapshot.total_canceled_waits, 0);
   assert_eq!(snapshot.queued, 0);
}

// ============================================================================
// Disabled governors and release
// ============================================================================

#[tokio::test]
async fn test_disabled_governor_never_blocks_or_counts() {
   let config = GovernorConfig {
      max_permits: 1,
      ..GovernorConfig::disabled()
   };
   let governor = PoolGovernor::new(GovernorRole::Writer, key("disabled"), &config).unwrap();
   let cancel = CancellationToken::new();

   let mut permits = Vec::new();
   for _ in 0..5 {
      permits.push(governor.acquire().unwrap());
      permits.push(governor.acquire_async(&cancel).await.unwrap());
      permits.push(governor.try_acquire().unwrap().unwrap());
   }

   assert!(permits.iter().all(|permit| permit.is_empty()));

   let snapshot = governor.snapshot();
   assert!(snapshot.disabled);
   assert_eq!(snapshot.in_use, 0);
   assert_eq!(snapshot.total_acquired, 0);

   drop(permits);
   assert_eq!(governor.snapshot().in_use, 0);
}

#[test]
fn test_double_release_never_over_admits() {
   let governor = governor(GovernorRole::Reader, 1, Duration::from_millis(20));

   let mut permit = governor.acquire().unwrap();
   permit.release();
   permit.release();
   assert!(permit.is_empty());
   drop(permit);
   assert_eq!(governor.snapshot().in_use, 0);

   // Only one permit may be out even after the repeated releases above
   let _held = governor.acquire().unwrap();
   assert!(governor.try_acquire().unwrap().is_none());
   assert_eq!(governor.snapshot().in_use, 1);
}

// ============================================================================
// Writer preference
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writer_blocks_new_readers_but_not_admitted_ones() {
   let pair = GovernorPair::new(
      key("writer-preference"),
      &GovernorConfig::new().with_max_permits(1),
      &GovernorConfig::new().with_max_permits(10),
   )
   .unwrap();
   let cancel = CancellationToken::new();

   let mut readers = Vec::new();
   for _ in 0..3 {
      readers.push(pair.reader().acquire_async(&cancel).await.unwrap());
   }

   let writer = pair.writer().acquire_async(&cancel).await.unwrap();
   assert!(writer.holds_turnstile());
   assert!(pair.turnstile().is_held());

   // The three admitted readers are unaffected
   assert_eq!(pair.reader().snapshot().in_use, 3);

   let fourth = {
      let reader = Arc::clone(pair.reader());
      tokio::spawn(async move {
         let cancel = CancellationToken::new();
         reader.acquire_async(&cancel).await
      })
   };

   tokio::time::sleep(Duration::from_millis(50)).await;
   assert!(!fourth.is_finished(), "4th reader passed a held turnstile");
   assert_eq!(pair.reader().snapshot().in_use, 3);

   drop(writer);

   let permit = tokio::time::timeout(Duration::from_secs(2), fourth)
      .await
      .expect("4th reader should proceed once the writer releases")
      .unwrap()
      .unwrap();
   assert!(!permit.holds_turnstile());
   assert_eq!(pair.reader().snapshot().in_use, 4);
   assert!(!pair.turnstile().is_held());

   drop(readers);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writer_granted_before_later_readers_on_shared_capacity() {
   let shared = Arc::new(PermitSemaphore::new(2));
   let turnstile = Turnstile::new();
   let resource = key("shared-capacity");
   let config = GovernorConfig::new().with_acquire_timeout(Duration::from_secs(5));

   let writer = Arc::new(
      PoolGovernor::new(GovernorRole::Writer, resource, &config)
         .unwrap()
         .with_shared_semaphore(Arc::clone(&shared))
         .with_turnstile(turnstile.clone(), TurnstilePolicy::Hold),
   );
   let reader = Arc::new(
      PoolGovernor::new(GovernorRole::Reader, resource, &config)
         .unwrap()
         .with_shared_semaphore(Arc::clone(&shared))
         .with_turnstile(turnstile.clone(), TurnstilePolicy::Pass),
   );

   let cancel = CancellationToken::new();
   let mut first = reader.acquire_async(&cancel).await.unwrap();
   let _second = reader.acquire_async(&cancel).await.unwrap();

   let order = Arc::new(GrantOrder::default());

   let writer_task = {
      let (writer, order) = (Arc::clone(&writer), Arc::clone(&order));
      tokio::spawn(async move {
         let cancel = CancellationToken::new();
         let permit = writer.acquire_async(&cancel).await.unwrap();
         order.record("writer");
         tokio::time::sleep(Duration::from_millis(20)).await;
         drop(permit);
      })
   };

   wait_until_queued(&writer, 1).await;
   assert!(turnstile.is_held(), "writer should hold the turnstile while it waits");

   let late_reader = {
      let (reader, order) = (Arc::clone(&reader), Arc::clone(&order));
      tokio::spawn(async move {
         let cancel = CancellationToken::new();
         let permit = reader.acquire_async(&cancel).await.unwrap();
         order.record("reader");
         drop(permit);
      })
   };

   tokio::time::sleep(Duration::from_millis(30)).await;
   first.release();

   writer_task.await.unwrap();
   late_reader.await.unwrap();

   assert_eq!(order.entries(), vec!["writer", "reader"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writer_wait_bounded_under_continuous_readers() {
   let timeout = Duration::from_secs(5);
   let pair = Arc::new(
      GovernorPair::new(
         key("reader-stream"),
         &GovernorConfig::new()
            .with_max_permits(1)
            .with_acquire_timeout(timeout),
         &GovernorConfig::new()
            .with_max_permits(64)
            .with_acquire_timeout(timeout),
      )
      .unwrap(),
   );
   let stop = Arc::new(AtomicBool::new(false));
   let reader_grants = Arc::new(AtomicUsize::new(0));

   let readers: Vec<_> = (0..12)
      .map(|_| {
         let (pair, stop, grants) =
            (Arc::clone(&pair), Arc::clone(&stop), Arc::clone(&reader_grants));
         tokio::spawn(async move {
            let cancel = CancellationToken::new();
            while !stop.load(Ordering::SeqCst) {
               let permit = pair.reader().acquire_async(&cancel).await.unwrap();
               grants.fetch_add(1, Ordering::SeqCst);
               tokio::task::yield_now().await;
               drop(permit);
            }
         })
      })
      .collect();

   // Let the reader stream get going before the writer shows up
   tokio::time::sleep(Duration::from_millis(20)).await;

   let cancel = CancellationToken::new();
   let mut worst = Duration::ZERO;
   for _ in 0..25 {
      let started = Instant::now();
      let permit = pair.writer().acquire_async(&cancel).await.unwrap();
      worst = worst.max(started.elapsed());
      drop(permit);
      tokio::task::yield_now().await;
   }
   for _ in 0..25 {
      let writer = Arc::clone(pair.writer());
      let waited = tokio::task::spawn_blocking(move || {
         let started = Instant::now();
         let permit = writer.acquire().unwrap();
         let waited = started.elapsed();
         drop(permit);
         waited
      })
      .await
      .unwrap();
      worst = worst.max(waited);
   }

   stop.store(true, Ordering::SeqCst);
   for reader in readers {
      reader.await.unwrap();
   }

   assert!(
      worst < Duration::from_secs(1),
      "writer waited {worst:?} behind the reader stream"
   );
   assert!(reader_grants.load(Ordering::SeqCst) > 0);

   let snapshot = pair.reader().snapshot();
   assert_eq!(snapshot.in_use, 0);
   assert_eq!(snapshot.queued, 0);
   assert_eq!(snapshot.total_timeouts, 0);
   assert_eq!(pair.writer().snapshot().total_acquired, 50);
}

#[test]
fn test_blocking_reader_waits_behind_writer_turnstile() {
   let pair = GovernorPair::new(
      key("blocking-reader"),
      &GovernorConfig::new().with_max_permits(1),
      &GovernorConfig::new().with_max_permits(4),
   )
   .unwrap();

   let writer = pair.writer().acquire().unwrap();
   assert!(pair.turnstile().is_held());

   let reader = {
      let reader = Arc::clone(pair.reader());
      std::thread::spawn(move || reader.acquire())
   };

   std::thread::sleep(Duration::from_millis(50));
   assert!(!reader.is_finished(), "blocking reader passed a held turnstile");
   assert_eq!(pair.reader().snapshot().in_use, 0);

   drop(writer);

   let permit = reader.join().unwrap().unwrap();
   assert!(!permit.holds_turnstile());
   assert_eq!(pair.reader().snapshot().in_use, 1);
   assert!(!pair.turnstile().is_held());
}

// ============================================================================
// Failure cleanup
// ============================================================================

#[test]
fn test_writer_timeout_releases_turnstile() {
   let shared = Arc::new(PermitSemaphore::new(1));
   let turnstile = Turnstile::new();
   let config = GovernorConfig::new().with_acquire_timeout(Duration::from_millis(30));
   let writer = PoolGovernor::new(GovernorRole::Writer, key("timeout-turnstile"), &config)
      .unwrap()
      .with_shared_semaphore(Arc::clone(&shared))
      .with_turnstile(turnstile.clone(), TurnstilePolicy::Hold);

   // Exhaust the shared capacity behind the writer's back
   let other = PoolGovernor::new(GovernorRole::Reader, key("timeout-turnstile"), &config)
      .unwrap()
      .with_shared_semaphore(Arc::clone(&shared));
   let _held = other.acquire().unwrap();

   let err = writer.acquire().unwrap_err();
   assert!(err.is_saturated());
   assert!(!turnstile.is_held());
   assert!(turnstile.try_hold().is_some(), "turnstile must be re-acquirable");
   assert_eq!(writer.snapshot().total_timeouts, 1);
   assert_eq!(writer.snapshot().in_use, 0);
}

#[tokio::test]
async fn test_writer_cancel_releases_turnstile() {
   let shared = Arc::new(PermitSemaphore::new(1));
   let turnstile = Turnstile::new();
   let config = GovernorConfig::new().with_acquire_timeout(Duration::from_secs(5));
   let writer = Arc::new(
      PoolGovernor::new(GovernorRole::Writer, key("cancel-turnstile"), &config)
         .unwrap()
         .with_shared_semaphore(Arc::clone(&shared))
         .with_turnstile(turnstile.clone(), TurnstilePolicy::Hold),
   );
   let other = PoolGovernor::new(GovernorRole::Reader, key("cancel-turnstile"), &config)
      .unwrap()
      .with_shared_semaphore(Arc::clone(&shared));
   let _held = other.acquire().unwrap();

   let cancel = CancellationToken::new();
   let task = {
      let (writer, cancel) = (Arc::clone(&writer), cancel.clone());
      tokio::spawn(async move { writer.acquire_async(&cancel).await })
   };

   wait_until_queued(&writer, 1).await;
   assert!(turnstile.is_held());
   cancel.cancel();

   let err = task.await.unwrap().unwrap_err();
   assert!(err.is_canceled());
   assert!(!err.is_saturated());
   assert!(turnstile.try_hold().is_some(), "turnstile must be re-acquirable");

   let snapshot = writer.snapshot();
   assert_eq!(snapshot.total_canceled_waits, 1);
   assert_eq!(snapshot.total_timeouts, 0);
   assert_eq!(snapshot.in_use, 0);
   assert_eq!(snapshot.queued, 0);
}

#[test]
fn test_reader_checkpoint_timeout_leaves_no_residue() {
   let pair = GovernorPair::new(
      key("reader-checkpoint-timeout"),
      &GovernorConfig::new().with_max_permits(1),
      &GovernorConfig::new()
         .with_max_permits(4)
         .with_acquire_timeout(Duration::from_millis(30)),
   )
   .unwrap();
   let writer = pair.writer().acquire().unwrap();

   let err = pair.reader().acquire().unwrap_err();
   assert!(err.is_saturated());

   let snapshot = pair.reader().snapshot();
   assert_eq!(snapshot.total_timeouts, 1);
   assert_eq!(snapshot.total_canceled_waits, 0);
   assert_eq!(snapshot.queued, 0);
   assert_eq!(snapshot.in_use, 0);

   // Only the writer ever held the gate
   drop(writer);
   assert!(!pair.turnstile().is_held());
   assert!(pair.reader().try_acquire().unwrap().is_some());
}

#[tokio::test]
async fn test_reader_checkpoint_cancel_leaves_no_residue() {
   let pair = GovernorPair::new(
      key("reader-checkpoint-cancel"),
      &GovernorConfig::new().with_max_permits(1),
      &GovernorConfig::new().with_max_permits(4),
   )
   .unwrap();
   let writer = pair.writer().acquire().unwrap();

   let cancel = CancellationToken::new();
   let task = {
      let (reader, cancel) = (Arc::clone(pair.reader()), cancel.clone());
      tokio::spawn(async move { reader.acquire_async(&cancel).await })
   };

   tokio::time::sleep(Duration::from_millis(30)).await;
   assert!(!task.is_finished());
   cancel.cancel();

   let err = task.await.unwrap().unwrap_err();
   assert!(err.is_canceled());

   let snapshot = pair.reader().snapshot();
   assert_eq!(snapshot.total_canceled_waits, 1);
   assert_eq!(snapshot.total_timeouts, 0);
   assert_eq!(snapshot.queued, 0);
   assert_eq!(snapshot.in_use, 0);

   drop(writer);
   assert!(!pair.turnstile().is_held());
   assert!(pair.reader().try_acquire().unwrap().is_some());
}

#[tokio::test]
async fn test_canceled_wait_scenario() {
   init_tracing();
   let governor = governor(GovernorRole::Writer, 1, Duration::from_secs(5));
   let _permit_a = governor.acquire().unwrap();

   let cancel = CancellationToken::new();
   let second = {
      let (governor, cancel) = (Arc::clone(&governor), cancel.clone());
      tokio::spawn(async move { governor.acquire_async(&cancel).await })
   };

   wait_until_queued(&governor, 1).await;
   cancel.cancel();

   let err = second.await.unwrap().unwrap_err();
   assert!(matches!(err, Error::AcquisitionCanceled { .. }));

   let snapshot = governor.snapshot();
   assert_eq!(snapshot.total_canceled_waits, 1);
   assert_eq!(snapshot.queued, 0);
   assert_eq!(snapshot.in_use, 1);
}

#[tokio::test]
async fn test_dropped_acquire_future_counts_as_canceled() {
   init_tracing();
   let governor = governor(GovernorRole::Reader, 1, Duration::from_secs(5));
   let _held = governor.acquire().unwrap();

   let cancel = CancellationToken::new();
   let abandoned =
      tokio::time::timeout(Duration::from_millis(30), governor.acquire_async(&cancel)).await;
   assert!(abandoned.is_err());

   let snapshot = governor.snapshot();
   assert_eq!(snapshot.total_canceled_waits, 1);
   assert_eq!(snapshot.queued, 0);
   assert_eq!(snapshot.in_use, 1);
}

// ============================================================================
// Drain
// ============================================================================

#[tokio::test]
async fn test_wait_for_drain_resolves_when_last_permit_released() {
   let governor = governor(GovernorRole::Reader, 2, Duration::from_secs(5));
   let first = governor.acquire().unwrap();
   let second = governor.acquire().unwrap();

   let drain = {
      let governor = Arc::clone(&governor);
      tokio::spawn(async move {
         let cancel = CancellationToken::new();
         governor.wait_for_drain_async(&cancel).await
      })
   };

   drop(first);
   tokio::time::sleep(Duration::from_millis(20)).await;
   assert!(!drain.is_finished());

   drop(second);
   tokio::time::timeout(Duration::from_secs(2), drain)
      .await
      .expect("drain should resolve")
      .unwrap()
      .unwrap();
}

#[tokio::test]
async fn test_wait_for_drain_observes_cancellation() {
   let governor = governor(GovernorRole::Writer, 1, Duration::from_secs(5));
   let _held = governor.acquire().unwrap();

   let cancel = CancellationToken::new();
   let drain = {
      let (governor, cancel) = (Arc::clone(&governor), cancel.clone());
      tokio::spawn(async move { governor.wait_for_drain_async(&cancel).await })
   };

   tokio::time::sleep(Duration::from_millis(20)).await;
   cancel.cancel();

   let err = drain.await.unwrap().unwrap_err();
   assert!(err.is_canceled());
}

#[test]
fn test_blocking_drain() {
   let governor = governor(GovernorRole::Reader, 1, Duration::from_secs(5));
   assert!(governor.wait_for_drain(Duration::ZERO));

   let permit = governor.acquire().unwrap();
   assert!(!governor.wait_for_drain(Duration::from_millis(20)));

   let releaser = std::thread::spawn(move || {
      std::thread::sleep(Duration::from_millis(20));
      drop(permit);
   });
   assert!(governor.wait_for_drain(Duration::from_secs(2)));
   releaser.join().unwrap();
}
