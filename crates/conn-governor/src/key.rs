//! Opaque identity of the logical pool a governor protects

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Hash identifying a logical resource, usually derived from a connection string.
///
/// Only the hash is retained, so credentials embedded in the connection string
/// never end up in errors, snapshots or log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey(u64);

impl ResourceKey {
   /// Derive a key from a connection string
   pub fn from_connection_string(connection_string: &str) -> Self {
      let mut hasher = DefaultHasher::new();
      connection_string.trim().hash(&mut hasher);
      Self(hasher.finish())
   }

   /// Wrap an already computed hash
   pub const fn from_hash(hash: u64) -> Self {
      Self(hash)
   }

   pub const fn hash_value(&self) -> u64 {
      self.0
   }
}

impl fmt::Display for ResourceKey {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{:016x}", self.0)
   }
}
