//! Seam between strategies and the driver that opens physical connections

use crate::Result;
use crate::connection::ExecutionType;
use async_trait::async_trait;

/// What a strategy asks the factory to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
   pub connection_string: String,
   pub execution: ExecutionType,
   /// Open with the provider's read-only flag where it has one
   pub read_only: bool,
}

/// Opens and closes physical connections.
///
/// Issuing commands is left to the connection type itself (for sqlx, its
/// `Executor` implementation).
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
   type Connection: Send + 'static;

   async fn open(&self, request: &ConnectionRequest) -> Result<Self::Connection>;

   /// Run a provider setting statement (such as a read-only pragma) on `conn`
   async fn apply_setting(&self, conn: &mut Self::Connection, statement: &str) -> Result<()>;

   async fn close(&self, conn: Self::Connection) -> Result<()>;
}
