//! Configuration for connection strategies

use conn_governor::{GovernorConfig, ResourceKey};
use serde::{Deserialize, Serialize};

/// How physical connections are shared across logical requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DbMode {
   /// A fresh connection per request; reads use the reader connection string
   #[default]
   Standard,
   /// Like `Standard`, plus one sentinel connection held open for the
   /// context's lifetime and never used for work
   KeepAlive,
   /// Every request shares one persistent, serialized connection
   SingleConnection,
   /// Writes (and shared reads) use one persistent, serialized writer;
   /// other reads get fresh read-only connections
   SingleWriter,
   /// Let the dialect pick based on the connection string
   Best,
}

/// Whether the context may write at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadWriteMode {
   #[default]
   ReadWrite,
   ReadOnly,
}

/// Connection string and admission settings for one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSettings {
   pub connection_string: String,
   pub governor: GovernorConfig,
}

impl RoleSettings {
   pub fn new(connection_string: impl Into<String>, governor: GovernorConfig) -> Self {
      Self {
         connection_string: connection_string.into(),
         governor,
      }
   }
}

/// Per-role connection strings and limits for one logical database
///
/// # Examples
///
/// ```
/// use sqlx_conn_strategy::{ConnectionTopology, GovernorConfig, RoleSettings};
///
/// // One connection string for both roles, default limits
/// let topology = ConnectionTopology::new("sqlite://app.db");
/// assert_eq!(topology.reader().connection_string, "sqlite://app.db");
///
/// // Route reads elsewhere with their own limits
/// let topology = ConnectionTopology::new("postgres://primary/app").with_reader(RoleSettings::new(
///     "postgres://replica/app",
///     GovernorConfig::new().with_max_permits(16),
/// ));
/// assert_eq!(topology.reader().governor.max_permits, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTopology {
   pub writer: RoleSettings,

   /// Falls back to the writer's connection string and default reader limits
   #[serde(default)]
   pub reader: Option<RoleSettings>,
}

impl ConnectionTopology {
   /// Both roles on `connection_string`; writer limited to 1 permit, reader to
   /// the governor defaults
   pub fn new(connection_string: impl Into<String>) -> Self {
      Self {
         writer: RoleSettings::new(connection_string, GovernorConfig::new().with_max_permits(1)),
         reader: None,
      }
   }

   pub fn with_writer_governor(mut self, governor: GovernorConfig) -> Self {
      self.writer.governor = governor;
      self
   }

   pub fn with_reader(mut self, reader: RoleSettings) -> Self {
      self.reader = Some(reader);
      self
   }

   /// Reader settings, defaulting to the writer's connection string
   pub fn reader(&self) -> RoleSettings {
      self.reader.clone().unwrap_or_else(|| {
         RoleSettings::new(
            self.writer.connection_string.clone(),
            GovernorConfig::default(),
         )
      })
   }

   /// Identity of the logical resource, derived from the writer connection string
   pub fn resource_key(&self) -> ResourceKey {
      ResourceKey::from_connection_string(&self.writer.connection_string)
   }
}

/// Everything a [`ConnectionStrategy`](crate::ConnectionStrategy) needs besides
/// its factory and dialect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
   #[serde(default)]
   pub mode: DbMode,
   #[serde(default)]
   pub read_write: ReadWriteMode,
   pub topology: ConnectionTopology,
}

impl StrategyConfig {
   pub fn new(mode: DbMode, topology: ConnectionTopology) -> Self {
      Self {
         mode,
         read_write: ReadWriteMode::ReadWrite,
         topology,
      }
   }

   pub fn read_only(mut self) -> Self {
      self.read_write = ReadWriteMode::ReadOnly;
      self
   }

   pub fn is_read_only(&self) -> bool {
      self.read_write == ReadWriteMode::ReadOnly
   }
}
