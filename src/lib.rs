//! # sqlx-conn-strategy
//!
//! Connection sharing strategies for SQLx, with per-role admission control from
//! [`conn_governor`].
//!
//! ## Core Types
//!
//! - **[`ConnectionStrategy`]**: Hands out physical connections according to a [`DbMode`]
//! - **[`TrackedConnection`]**: A connection plus its lock and admission permit
//! - **[`ConnectionFactory`]**: Seam to the driver that opens and closes connections
//! - **[`Dialect`]**: Provider rules (read-only pragma, in-memory detection, `Best` mode)
//! - **[`SqliteConnectionFactory`]** / **[`SqliteDialect`]**: The SQLite implementation
//! - **[`Error`]**: Error type for strategy operations
//!
//! ## Modes
//!
//! - **`Standard`**: A fresh connection per request
//! - **`KeepAlive`**: `Standard` plus one idle sentinel connection that keeps the
//!   resource alive
//! - **`SingleConnection`**: Everything shares one serialized connection
//! - **`SingleWriter`**: Writes share one serialized writer; reads get fresh
//!   read-only connections
//! - **`Best`**: Chosen by the dialect from the connection string
//!
//! ## Usage
//!
//! ```no_run
//! use sqlx_conn_strategy::{
//!     ConnectionStrategy, ConnectionTopology, DbMode, ExecutionType, SqliteConnectionFactory,
//!     SqliteDialect, StrategyConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> sqlx_conn_strategy::Result<()> {
//!     let topology = ConnectionTopology::new("sqlite://app.db");
//!     let config = StrategyConfig::new(DbMode::SingleWriter, topology);
//!     let factory = SqliteConnectionFactory::new();
//!     let strategy = ConnectionStrategy::open(config, factory, Arc::new(SqliteDialect)).await?;
//!
//!     // Writes are serialized on the persistent writer
//!     let mut writer = strategy.get_connection(ExecutionType::Write, false).await?;
//!     sqlx::query("CREATE TABLE IF NOT EXISTS users (name TEXT)")
//!         .execute(&mut *writer.lock().await?)
//!         .await?;
//!     strategy.release_connection(writer).await?;
//!
//!     // Reads get their own read-only connection
//!     let mut reader = strategy.get_connection(ExecutionType::Read, false).await?;
//!     let rows = sqlx::query("SELECT name FROM users")
//!         .fetch_all(&mut *reader.lock().await?)
//!         .await?;
//!     strategy.release_connection(reader).await?;
//!
//!     strategy.close().await?;
//!     Ok(())
//! }
//! ```
//!
mod config;
mod connection;
mod dialect;
mod error;
mod factory;
mod sqlite;
mod strategy;

// Re-export public types
pub use config::{ConnectionTopology, DbMode, ReadWriteMode, RoleSettings, StrategyConfig};
pub use connection::{ConnectionGuard, ExecutionType, LockKind, TrackedConnection};
pub use dialect::{Dialect, GenericDialect, MemoryKind, SqliteDialect};
pub use error::{Error, Result};
pub use factory::{ConnectionFactory, ConnectionRequest};
pub use sqlite::SqliteConnectionFactory;
pub use strategy::ConnectionStrategy;

// Re-export governor types that appear in this crate's API
pub use conn_governor;
pub use conn_governor::{
   CancellationToken, GovernorConfig, GovernorPair, GovernorRole, GovernorSnapshot, Permit,
   ResourceKey,
};

// Re-export async-trait so factory implementors need no extra dependency
pub use async_trait::async_trait;
