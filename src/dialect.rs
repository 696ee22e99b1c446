//! Provider-specific knowledge the strategy layer needs

use crate::config::DbMode;
use std::fmt;

/// How a connection string relates to in-memory storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
   /// Backed by persistent storage
   None,
   /// Private to the connection that opens it; gone when that connection closes
   Isolated,
   /// Named in-memory database visible to every connection in the process
   /// while at least one stays open
   SharedCache,
}

impl MemoryKind {
   pub fn is_in_memory(self) -> bool {
      !matches!(self, MemoryKind::None)
   }
}

/// Provider-specific settings consulted by the strategy layer
pub trait Dialect: fmt::Debug + Send + Sync {
   fn name(&self) -> &str;

   /// Statement that makes a freshly opened connection refuse writes, if the
   /// provider has one
   fn read_only_statement(&self) -> Option<&str> {
      None
   }

   /// Statements run once on a persistent writer connection right after it opens
   fn writer_init_statements(&self, _connection_string: &str) -> Vec<String> {
      Vec::new()
   }

   fn memory_kind(&self, _connection_string: &str) -> MemoryKind {
      MemoryKind::None
   }

   /// True for single-process engines backed by a local file
   fn is_embedded(&self) -> bool {
      false
   }

   /// Pick a concrete mode for [`DbMode::Best`]; other modes pass through
   fn resolve_mode(&self, mode: DbMode, connection_string: &str) -> DbMode {
      if mode != DbMode::Best {
         return mode;
      }
      match self.memory_kind(connection_string) {
         MemoryKind::Isolated => DbMode::SingleConnection,
         MemoryKind::SharedCache => DbMode::SingleWriter,
         MemoryKind::None if self.is_embedded() => DbMode::SingleWriter,
         MemoryKind::None => DbMode::Standard,
      }
   }
}

/// Dialect for servers with no special sharing rules
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericDialect;

impl Dialect for GenericDialect {
   fn name(&self) -> &str {
      "generic"
   }
}

/// SQLite: embedded, single writer, `:memory:` and shared-cache databases
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
   fn name(&self) -> &str {
      "sqlite"
   }

   fn read_only_statement(&self) -> Option<&str> {
      Some("PRAGMA query_only = ON")
   }

   fn writer_init_statements(&self, connection_string: &str) -> Vec<String> {
      if self.memory_kind(connection_string).is_in_memory() {
         return Vec::new();
      }
      // https://www.sqlite.org/wal.html#performance_considerations
      vec![
         "PRAGMA journal_mode = WAL".to_string(),
         "PRAGMA synchronous = NORMAL".to_string(),
      ]
   }

   fn memory_kind(&self, connection_string: &str) -> MemoryKind {
      let lowered = connection_string.to_ascii_lowercase();
      let in_memory = lowered.contains(":memory:") || lowered.contains("mode=memory");
      if !in_memory {
         MemoryKind::None
      } else if lowered.contains("cache=shared") {
         MemoryKind::SharedCache
      } else {
         MemoryKind::Isolated
      }
   }

   fn is_embedded(&self) -> bool {
      true
   }
}
