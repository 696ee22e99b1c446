//! # conn-governor
//!
//! Admission control for physical database connections: a bounded permit pool
//! per (role, resource) with writer-preference fairness between a resource's
//! writer and its readers.
//!
//! ## Core Types
//!
//! - **[`PoolGovernor`]**: Bounds concurrent permits for one role of one resource
//! - **[`Permit`]**: RAII admission token, released exactly once
//! - **[`Turnstile`]**: Capacity-1 gate giving writers preference over new readers
//! - **[`GovernorPair`]**: Writer + reader governors wired to one turnstile
//! - **[`GovernorRegistry`]**: Governors looked up by role and [`ResourceKey`]
//! - **[`GovernorSnapshot`]**: Non-blocking read of a governor's counters
//! - **[`Error`]**: Saturation, cancellation and configuration failures
//!
//! ## Architecture
//!
//! - **Blocking and async acquisition**: Both paths share counters, fairness and
//!   errors; the async path also observes a [`CancellationToken`]
//! - **Writer preference**: Writers hold the turnstile for the life of their
//!   permit, readers pass through it before contending for capacity
//! - **Explicit capacity ownership**: A governor closes a semaphore it created,
//!   never one it was given ([`GovernorSemaphore`])
//! - **Clean failures**: Timeouts and cancellations release any held turnstile
//!   and restore counters before the error reaches the caller
//!
//! ## Usage
//!
//! ```
//! use conn_governor::{GovernorConfig, GovernorPair, ResourceKey};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> conn_governor::Result<()> {
//!     let key = ResourceKey::from_connection_string("sqlite://app.db");
//!     let pair = GovernorPair::new(
//!         key,
//!         &GovernorConfig::new().with_max_permits(1),
//!         &GovernorConfig::new().with_max_permits(6),
//!     )?;
//!
//!     let cancel = CancellationToken::new();
//!
//!     // Readers run concurrently up to their bound
//!     let read = pair.reader().acquire_async(&cancel).await?;
//!     drop(read);
//!
//!     // A writer closes the turnstile to new readers until it is done
//!     let write = pair.writer().acquire_async(&cancel).await?;
//!     assert!(write.holds_turnstile());
//!     drop(write);
//!
//!     pair.writer().wait_for_drain_async(&cancel).await?;
//!     Ok(())
//! }
//! ```
//!
mod config;
mod error;
mod governor;
mod key;
mod permit;
mod registry;
mod semaphore;
mod snapshot;
mod turnstile;

// Re-export public types
pub use config::GovernorConfig;
pub use error::Error;
pub use governor::{GovernorRole, GovernorSemaphore, PoolGovernor, TurnstilePolicy};
pub use key::ResourceKey;
pub use permit::Permit;
pub use registry::{GovernorPair, GovernorRegistry};
pub use semaphore::PermitSemaphore;
pub use snapshot::GovernorSnapshot;
pub use turnstile::{Turnstile, TurnstileHold};

// Re-export the cancellation signal accepted by async acquisition
pub use tokio_util::sync::CancellationToken;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
