//! Connection strategies: which physical connection serves a logical request

use crate::Result;
use crate::config::{ConnectionTopology, DbMode, ReadWriteMode, StrategyConfig};
use crate::connection::{ConnectionHandle, ExecutionType, SharedSlot, TrackedConnection};
use crate::dialect::{Dialect, MemoryKind};
use crate::error::Error;
use crate::factory::{ConnectionFactory, ConnectionRequest};
use conn_governor::{CancellationToken, GovernorPair, GovernorRole, GovernorSnapshot};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, trace};
use uuid::Uuid;

/// Connection kept open for the strategy's whole lifetime
struct PersistentConnection<C> {
   id: Uuid,
   slot: SharedSlot<C>,
}

/// Decides, per request, which physical connection to hand out and whether
/// it must be serialized.
///
/// | Mode | Write | Read | Shared read |
/// |---|---|---|---|
/// | `Standard` | new connection | new connection (reader string) | new connection |
/// | `KeepAlive` | new connection | new connection | new connection |
/// | `SingleConnection` | persistent | persistent | persistent |
/// | `SingleWriter` | persistent writer | new read-only connection | persistent writer |
///
/// Every request is first admitted by the governor for its role: the writer
/// governor for the persistent connection and ephemeral writes, the reader
/// governor for ephemeral reads. Permits travel with the returned
/// [`TrackedConnection`]. Because writers hold the shared turnstile while
/// their permit lives, a task holding a write connection must not wait for a
/// read connection from the same strategy.
///
/// # Example
///
/// ```no_run
/// use sqlx_conn_strategy::{
///    ConnectionStrategy, ConnectionTopology, DbMode, ExecutionType, SqliteConnectionFactory,
///    SqliteDialect, StrategyConfig,
/// };
/// use std::sync::Arc;
///
/// # async fn example() -> sqlx_conn_strategy::Result<()> {
/// let config = StrategyConfig::new(DbMode::Best, ConnectionTopology::new("sqlite://app.db"));
/// let factory = SqliteConnectionFactory::new();
/// let strategy = ConnectionStrategy::open(config, factory, Arc::new(SqliteDialect)).await?;
///
/// let mut writer = strategy.get_connection(ExecutionType::Write, false).await?;
/// {
///    let mut conn = writer.lock().await?;
///    sqlx::query("CREATE TABLE IF NOT EXISTS users (name TEXT)")
///       .execute(&mut *conn)
///       .await?;
/// }
/// strategy.release_connection(writer).await?;
///
/// strategy.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionStrategy<F: ConnectionFactory> {
   mode: DbMode,
   read_write: ReadWriteMode,
   topology: ConnectionTopology,
   dialect: Arc<dyn Dialect>,
   factory: F,
   governors: GovernorPair,
   persistent: Option<PersistentConnection<F::Connection>>,
   closed: AtomicBool,
}

impl<F: ConnectionFactory> fmt::Debug for ConnectionStrategy<F> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("ConnectionStrategy")
         .field("mode", &self.mode)
         .field("read_write", &self.read_write)
         .field("dialect", &self.dialect)
         .field("persistent", &self.persistent.as_ref().map(|p| p.id))
         .field("closed", &self.is_closed())
         .finish_non_exhaustive()
   }
}

impl<F: ConnectionFactory> ConnectionStrategy<F> {
   /// Validate the configuration, build the governors and open the persistent
   /// connection when the mode needs one.
   ///
   /// Configuration errors are raised before any connection is opened.
   pub async fn open(
      config: StrategyConfig,
      factory: F,
      dialect: Arc<dyn Dialect>,
   ) -> Result<Self> {
      let writer_string = &config.topology.writer.connection_string;
      let mode = dialect.resolve_mode(config.mode, writer_string);
      validate(mode, config.read_write, dialect.memory_kind(writer_string))?;

      let key = config.topology.resource_key();
      let reader = config.topology.reader();
      let governors = GovernorPair::new(key, &config.topology.writer.governor, &reader.governor)?;

      let mut strategy = Self {
         mode,
         read_write: config.read_write,
         topology: config.topology,
         dialect,
         factory,
         governors,
         persistent: None,
         closed: AtomicBool::new(false),
      };

      if matches!(
         mode,
         DbMode::KeepAlive | DbMode::SingleConnection | DbMode::SingleWriter
      ) {
         let conn = strategy.open_persistent().await?;
         strategy.persistent = Some(PersistentConnection {
            id: Uuid::new_v4(),
            slot: Arc::new(Mutex::new(Some(conn))),
         });
      }

      debug!(
         dialect = strategy.dialect.name(),
         mode = ?strategy.mode,
         read_write = ?strategy.read_write,
         resource = %key,
         "Connection strategy opened"
      );
      Ok(strategy)
   }

   /// Mode in effect, after resolving [`DbMode::Best`]
   pub fn mode(&self) -> DbMode {
      self.mode
   }

   pub fn read_write(&self) -> ReadWriteMode {
      self.read_write
   }

   pub fn governors(&self) -> &GovernorPair {
      &self.governors
   }

   /// Writer and reader governor counters
   pub fn governor_snapshots(&self) -> [GovernorSnapshot; 2] {
      self.governors.snapshots()
   }

   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::SeqCst)
   }

   /// Hand out a connection for `execution`.
   ///
   /// `shared` asks for the persistent connection where the mode has one that
   /// may serve the request (see the table on [`ConnectionStrategy`]).
   pub async fn get_connection(
      &self,
      execution: ExecutionType,
      shared: bool,
   ) -> Result<TrackedConnection<F::Connection>> {
      self
         .get_connection_with_cancel(execution, shared, &CancellationToken::new())
         .await
   }

   /// Like [`get_connection`](Self::get_connection), giving up with a
   /// cancellation error if `cancel` fires while waiting for admission
   pub async fn get_connection_with_cancel(
      &self,
      execution: ExecutionType,
      shared: bool,
      cancel: &CancellationToken,
   ) -> Result<TrackedConnection<F::Connection>> {
      if self.is_closed() {
         return Err(Error::StrategyClosed);
      }
      if execution == ExecutionType::Write && self.read_write == ReadWriteMode::ReadOnly {
         return Err(Error::ReadOnlyContext);
      }

      match (self.mode, execution, shared) {
         (DbMode::SingleConnection, _, _)
         | (DbMode::SingleWriter, ExecutionType::Write, _)
         | (DbMode::SingleWriter, ExecutionType::Read, true) => {
            self.persistent_connection(execution, cancel).await
         }
         (DbMode::SingleWriter, ExecutionType::Read, false) => {
            self.ephemeral_connection(execution, true, cancel).await
         }
         // Best never survives `open`; the sentinel of KeepAlive is never handed out
         (DbMode::Standard | DbMode::KeepAlive | DbMode::Best, _, _) => {
            self.ephemeral_connection(execution, false, cancel).await
         }
      }
   }

   /// Return a connection obtained from this strategy.
   ///
   /// Ephemeral connections are closed; handles to the persistent connection
   /// are simply dropped. The permit is released last in both cases.
   pub async fn release_connection(
      &self,
      tracked: TrackedConnection<F::Connection>,
   ) -> Result<()> {
      let id = tracked.id();
      let (handle, permit) = tracked.into_parts();
      let closed = match handle {
         ConnectionHandle::Exclusive(conn) => {
            trace!(connection = %id, "Closing ephemeral connection");
            self.factory.close(conn).await
         }
         ConnectionHandle::Shared(slot) => {
            drop(slot);
            Ok(())
         }
      };
      drop(permit);
      closed
   }

   /// Run `work` on a connection, releasing it on every exit path.
   ///
   /// # Example
   ///
   /// ```no_run
   /// # use sqlx_conn_strategy::{ConnectionStrategy, ExecutionType, SqliteConnectionFactory};
   /// # use sqlx_conn_strategy::Result;
   /// # async fn example(strategy: ConnectionStrategy<SqliteConnectionFactory>) -> Result<()> {
   /// let (count,): (i64,) = strategy
   ///    .with_connection(ExecutionType::Read, false, |conn| {
   ///       Box::pin(async move {
   ///          Ok(sqlx::query_as("SELECT COUNT(*) FROM users")
   ///             .fetch_one(&mut *conn)
   ///             .await?)
   ///       })
   ///    })
   ///    .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn with_connection<T, W>(
      &self,
      execution: ExecutionType,
      shared: bool,
      work: W,
   ) -> Result<T>
   where
      W: for<'c> FnOnce(&'c mut F::Connection) -> BoxFuture<'c, Result<T>>,
   {
      let mut tracked = self.get_connection(execution, shared).await?;
      let outcome = match tracked.lock().await {
         Ok(mut conn) => work(&mut *conn).await,
         Err(e) => Err(e),
      };
      let released = self.release_connection(tracked).await;

      let value = outcome?;
      released?;
      Ok(value)
   }

   /// Dispose the persistent connection and stop admitting requests.
   ///
   /// Waits for any caller currently holding the persistent connection's lock.
   /// Outstanding ephemeral connections stay usable until released.
   pub async fn close(&self) -> Result<()> {
      if self.closed.swap(true, Ordering::SeqCst) {
         return Ok(());
      }

      let mut result = Ok(());
      if let Some(persistent) = &self.persistent {
         let conn = persistent.slot.lock().await.take();
         if let Some(conn) = conn {
            debug!(connection = %persistent.id, "Closing persistent connection");
            if let Err(e) = self.factory.close(conn).await {
               error!("Failed to close persistent connection: {}", e);
               result = Err(e);
            }
         }
      }

      self.governors.close();
      result
   }

   async fn persistent_connection(
      &self,
      execution: ExecutionType,
      cancel: &CancellationToken,
   ) -> Result<TrackedConnection<F::Connection>> {
      let Some(persistent) = &self.persistent else {
         return Err(Error::Configuration(format!(
            "{:?} mode has no persistent connection",
            self.mode
         )));
      };

      let permit = self
         .governors
         .for_role(GovernorRole::Writer)
         .acquire_async(cancel)
         .await?;

      trace!(connection = %persistent.id, ?execution, "Handing out persistent connection");
      Ok(TrackedConnection::shared(
         persistent.id,
         Arc::clone(&persistent.slot),
         execution,
         permit,
      ))
   }

   async fn ephemeral_connection(
      &self,
      execution: ExecutionType,
      apply_read_only: bool,
      cancel: &CancellationToken,
   ) -> Result<TrackedConnection<F::Connection>> {
      let permit = self
         .governors
         .for_role(execution.role())
         .acquire_async(cancel)
         .await?;

      let request = match execution {
         ExecutionType::Write => ConnectionRequest {
            connection_string: self.topology.writer.connection_string.clone(),
            execution,
            read_only: false,
         },
         ExecutionType::Read => ConnectionRequest {
            connection_string: self.topology.reader().connection_string,
            execution,
            read_only: true,
         },
      };

      let mut conn = self.factory.open(&request).await?;
      if apply_read_only && let Some(statement) = self.dialect.read_only_statement() {
         if let Err(e) = self.factory.apply_setting(&mut conn, statement).await {
            // Never hand out a read connection that could still write
            let _ = self.factory.close(conn).await;
            return Err(e);
         }
      }

      let tracked = TrackedConnection::exclusive(conn, execution, permit);
      trace!(connection = %tracked.id(), ?execution, "Opened ephemeral connection");
      Ok(tracked)
   }

   async fn open_persistent(&self) -> Result<F::Connection> {
      let read_only = self.read_write == ReadWriteMode::ReadOnly;
      let request = ConnectionRequest {
         connection_string: self.topology.writer.connection_string.clone(),
         execution: if read_only {
            ExecutionType::Read
         } else {
            ExecutionType::Write
         },
         read_only,
      };

      let mut conn = self.factory.open(&request).await?;

      let statements = if self.mode == DbMode::KeepAlive {
         // The sentinel only keeps the resource alive
         Vec::new()
      } else if read_only {
         self
            .dialect
            .read_only_statement()
            .map(|s| vec![s.to_string()])
            .unwrap_or_default()
      } else if self.mode == DbMode::SingleWriter {
         self
            .dialect
            .writer_init_statements(&request.connection_string)
      } else {
         Vec::new()
      };

      for statement in &statements {
         if let Err(e) = self.factory.apply_setting(&mut conn, statement).await {
            let _ = self.factory.close(conn).await;
            return Err(e);
         }
      }

      Ok(conn)
   }
}

/// Reject mode/topology combinations that could never work
fn validate(mode: DbMode, read_write: ReadWriteMode, memory: MemoryKind) -> Result<()> {
   match (mode, memory) {
      (DbMode::SingleConnection, kind)
         if kind.is_in_memory() && read_write == ReadWriteMode::ReadOnly =>
      {
         Err(Error::Configuration(
            "SingleConnection over an in-memory database cannot be read-only: \
             nothing could ever create its schema"
               .to_string(),
         ))
      }
      (DbMode::Standard | DbMode::KeepAlive | DbMode::SingleWriter, MemoryKind::Isolated) => {
         Err(Error::Configuration(format!(
            "{mode:?} mode cannot serve an isolated in-memory database; \
             every new connection would see an empty database (use SingleConnection)"
         )))
      }
      _ => Ok(()),
   }
}
