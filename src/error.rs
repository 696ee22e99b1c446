use conn_governor::GovernorRole;

/// Result type alias for strategy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for connection strategies.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Admission failure from a pool governor (saturation, cancellation, closed).
   #[error(transparent)]
   Governor(#[from] conn_governor::Error),

   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Sharing mode cannot serve the configured topology. Raised while opening
   /// the strategy, before any connection exists.
   #[error("invalid connection strategy configuration: {0}")]
   Configuration(String),

   /// Write connection requested from a read-only context.
   #[error("cannot open a write connection in a read-only context")]
   ReadOnlyContext,

   /// The strategy has been closed and hands out no more connections.
   #[error("connection strategy has been closed")]
   StrategyClosed,

   /// The persistent connection behind a shared handle was disposed.
   #[error("connection has been closed")]
   ConnectionClosed,
}

impl Error {
   /// Machine-readable code for the error.
   pub fn error_code(&self) -> String {
      match self {
         Error::Governor(e) => match e {
            conn_governor::Error::PoolSaturated { role, .. } => {
               format!("POOL_SATURATED_{}", role_code(*role))
            }
            conn_governor::Error::AcquisitionCanceled { .. } => "ACQUISITION_CANCELED".to_string(),
            conn_governor::Error::GovernorClosed { .. } => "GOVERNOR_CLOSED".to_string(),
            conn_governor::Error::UnknownGovernor { .. } => "UNKNOWN_GOVERNOR".to_string(),
            conn_governor::Error::InvalidConfig(_) => "CONFIGURATION_ERROR".to_string(),
         },
         Error::Sqlx(e) => {
            // Surface the driver's own code when there is one
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::Configuration(_) => "CONFIGURATION_ERROR".to_string(),
         Error::ReadOnlyContext => "READ_ONLY_CONTEXT".to_string(),
         Error::StrategyClosed => "STRATEGY_CLOSED".to_string(),
         Error::ConnectionClosed => "CONNECTION_CLOSED".to_string(),
      }
   }

   /// True when a governor gave up waiting because its pool was full.
   pub fn is_saturated(&self) -> bool {
      matches!(self, Error::Governor(e) if e.is_saturated())
   }

   /// True when the caller's cancellation signal ended an acquisition.
   pub fn is_canceled(&self) -> bool {
      matches!(self, Error::Governor(e) if e.is_canceled())
   }
}

fn role_code(role: GovernorRole) -> &'static str {
   match role {
      GovernorRole::Reader => "READER",
      GovernorRole::Writer => "WRITER",
   }
}
