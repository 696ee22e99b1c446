//! Governors keyed by role and resource

use crate::Result;
use crate::config::GovernorConfig;
use crate::error::Error;
use crate::governor::{GovernorRole, PoolGovernor, TurnstilePolicy};
use crate::key::ResourceKey;
use crate::permit::Permit;
use crate::snapshot::GovernorSnapshot;
use crate::turnstile::Turnstile;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Writer and reader governors for one resource, coordinating through a shared turnstile.
///
/// The pair owns the turnstile handle; both governors hold clones of it, and
/// the gate lives as long as any of them.
#[derive(Debug, Clone)]
pub struct GovernorPair {
   writer: Arc<PoolGovernor>,
   reader: Arc<PoolGovernor>,
   turnstile: Turnstile,
}

impl GovernorPair {
   /// Build both governors for `key`, wired for writer preference
   pub fn new(
      key: ResourceKey,
      writer_config: &GovernorConfig,
      reader_config: &GovernorConfig,
   ) -> Result<Self> {
      let turnstile = Turnstile::new();
      let writer = PoolGovernor::new(GovernorRole::Writer, key, writer_config)?
         .with_turnstile(turnstile.clone(), TurnstilePolicy::for_role(GovernorRole::Writer));
      let reader = PoolGovernor::new(GovernorRole::Reader, key, reader_config)?
         .with_turnstile(turnstile.clone(), TurnstilePolicy::for_role(GovernorRole::Reader));

      Ok(Self {
         writer: Arc::new(writer),
         reader: Arc::new(reader),
         turnstile,
      })
   }

   pub fn writer(&self) -> &Arc<PoolGovernor> {
      &self.writer
   }

   pub fn reader(&self) -> &Arc<PoolGovernor> {
      &self.reader
   }

   pub fn for_role(&self, role: GovernorRole) -> &Arc<PoolGovernor> {
      match role {
         GovernorRole::Writer => &self.writer,
         GovernorRole::Reader => &self.reader,
      }
   }

   pub fn turnstile(&self) -> &Turnstile {
      &self.turnstile
   }

   pub fn snapshots(&self) -> [GovernorSnapshot; 2] {
      [self.writer.snapshot(), self.reader.snapshot()]
   }

   /// Close both governors
   pub fn close(&self) {
      self.writer.close();
      self.reader.close();
   }
}

/// Lookup table of governors by (role, resource key).
///
/// # Example
///
/// ```
/// use conn_governor::{GovernorConfig, GovernorRegistry, GovernorRole, ResourceKey};
///
/// # fn example() -> conn_governor::Result<()> {
/// let registry = GovernorRegistry::new();
/// let key = ResourceKey::from_connection_string("sqlite://app.db");
/// let writer_config = GovernorConfig::new().with_max_permits(1);
/// registry.register_pair(key, &writer_config, &GovernorConfig::default())?;
///
/// let permit = registry.acquire(GovernorRole::Writer, key)?;
/// assert_eq!(registry.snapshot(GovernorRole::Writer, key)?.in_use, 1);
/// drop(permit);
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct GovernorRegistry {
   pairs: RwLock<HashMap<ResourceKey, GovernorPair>>,
}

impl GovernorRegistry {
   pub fn new() -> Self {
      Self::default()
   }

   /// Register writer and reader governors for `key`.
   ///
   /// If `key` is already registered the existing pair is returned unchanged and
   /// the supplied configurations are ignored.
   pub fn register_pair(
      &self,
      key: ResourceKey,
      writer_config: &GovernorConfig,
      reader_config: &GovernorConfig,
   ) -> Result<GovernorPair> {
      if let Some(existing) = self.pairs.read().get(&key) {
         return Ok(existing.clone());
      }

      let mut pairs = self.pairs.write();
      // Another caller may have registered between the read and write locks
      if let Some(existing) = pairs.get(&key) {
         return Ok(existing.clone());
      }

      let pair = GovernorPair::new(key, writer_config, reader_config)?;
      debug!(resource = %key, "Registered governor pair");
      pairs.insert(key, pair.clone());
      Ok(pair)
   }

   pub fn pair(&self, key: ResourceKey) -> Option<GovernorPair> {
      self.pairs.read().get(&key).cloned()
   }

   /// Look up the governor for `role` on `key`
   pub fn governor(&self, role: GovernorRole, key: ResourceKey) -> Result<Arc<PoolGovernor>> {
      self
         .pairs
         .read()
         .get(&key)
         .map(|pair| Arc::clone(pair.for_role(role)))
         .ok_or(Error::UnknownGovernor { role, key })
   }

   pub fn acquire(&self, role: GovernorRole, key: ResourceKey) -> Result<Permit> {
      self.governor(role, key)?.acquire()
   }

   pub async fn acquire_async(
      &self,
      role: GovernorRole,
      key: ResourceKey,
      cancel: &CancellationToken,
   ) -> Result<Permit> {
      let governor = self.governor(role, key)?;
      governor.acquire_async(cancel).await
   }

   pub fn try_acquire(&self, role: GovernorRole, key: ResourceKey) -> Result<Option<Permit>> {
      self.governor(role, key)?.try_acquire()
   }

   pub async fn try_acquire_async(
      &self,
      role: GovernorRole,
      key: ResourceKey,
   ) -> Result<Option<Permit>> {
      let governor = self.governor(role, key)?;
      governor.try_acquire_async().await
   }

   pub async fn wait_for_drain_async(
      &self,
      role: GovernorRole,
      key: ResourceKey,
      cancel: &CancellationToken,
   ) -> Result<()> {
      let governor = self.governor(role, key)?;
      governor.wait_for_drain_async(cancel).await
   }

   pub fn snapshot(&self, role: GovernorRole, key: ResourceKey) -> Result<GovernorSnapshot> {
      Ok(self.governor(role, key)?.snapshot())
   }

   /// Snapshots of every registered governor
   pub fn snapshots(&self) -> Vec<GovernorSnapshot> {
      self
         .pairs
         .read()
         .values()
         .flat_map(GovernorPair::snapshots)
         .collect()
   }

   /// Drop `key` from the registry and close its governors.
   ///
   /// Outstanding permits stay valid; callers that need a quiet pool should
   /// `wait_for_drain_async` on the returned pair first.
   pub fn remove(&self, key: ResourceKey) -> Option<GovernorPair> {
      let pair = self.pairs.write().remove(&key)?;
      pair.close();
      debug!(resource = %key, "Removed governor pair");
      Some(pair)
   }
}
