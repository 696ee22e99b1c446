//! Physical connection handles paired with their lock

use crate::Result;
use crate::error::Error;
use conn_governor::{GovernorRole, Permit};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use uuid::Uuid;

/// What the caller intends to do with a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionType {
   Read,
   Write,
}

impl ExecutionType {
   /// Governor role that admits this kind of work on an ephemeral connection
   pub fn role(self) -> GovernorRole {
      match self {
         ExecutionType::Read => GovernorRole::Reader,
         ExecutionType::Write => GovernorRole::Writer,
      }
   }
}

/// Lock a connection carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
   /// Exclusive connection; locking is free
   Noop,
   /// Shared connection; callers are serialized
   Serializing,
}

/// A persistent connection shared by many logical callers.
///
/// The slot is emptied when the owning strategy disposes the connection, so
/// stray handles fail with [`Error::ConnectionClosed`] instead of touching a
/// closed connection.
pub(crate) type SharedSlot<C> = Arc<Mutex<Option<C>>>;

#[derive(Debug)]
pub(crate) enum ConnectionHandle<C> {
   Exclusive(C),
   Shared(SharedSlot<C>),
}

/// Connection handed out by a [`ConnectionStrategy`](crate::ConnectionStrategy).
///
/// Exclusive connections were opened for this caller alone and lock for free.
/// Shared connections wrap the strategy's persistent connection in a real
/// mutex. The variant is fixed when the connection is created.
///
/// The admission permit travels with the connection and is returned on
/// [`release_connection`](crate::ConnectionStrategy::release_connection) or drop.
#[must_use = "dropping the connection releases it without closing it cleanly"]
#[derive(Debug)]
pub struct TrackedConnection<C> {
   id: Uuid,
   execution: ExecutionType,
   // Declared before the permit so the handle drops first
   handle: ConnectionHandle<C>,
   permit: Permit,
}

impl<C> TrackedConnection<C> {
   pub(crate) fn exclusive(conn: C, execution: ExecutionType, permit: Permit) -> Self {
      Self {
         id: Uuid::new_v4(),
         execution,
         handle: ConnectionHandle::Exclusive(conn),
         permit,
      }
   }

   pub(crate) fn shared(
      id: Uuid,
      slot: SharedSlot<C>,
      execution: ExecutionType,
      permit: Permit,
   ) -> Self {
      Self {
         id,
         execution,
         handle: ConnectionHandle::Shared(slot),
         permit,
      }
   }

   pub(crate) fn into_parts(self) -> (ConnectionHandle<C>, Permit) {
      (self.handle, self.permit)
   }

   /// Identity of the physical connection; equal for every handle to the
   /// same persistent connection
   pub fn id(&self) -> Uuid {
      self.id
   }

   pub fn execution(&self) -> ExecutionType {
      self.execution
   }

   pub fn is_shared(&self) -> bool {
      matches!(self.handle, ConnectionHandle::Shared(_))
   }

   pub fn lock_kind(&self) -> LockKind {
      match self.handle {
         ConnectionHandle::Exclusive(_) => LockKind::Noop,
         ConnectionHandle::Shared(_) => LockKind::Serializing,
      }
   }

   /// True if both handles refer to the same physical connection
   pub fn same_connection(&self, other: &TrackedConnection<C>) -> bool {
      self.id == other.id
   }

   pub fn permit(&self) -> &Permit {
      &self.permit
   }

   /// Wait for exclusive use of the connection
   pub async fn lock(&mut self) -> Result<ConnectionGuard<'_, C>> {
      match &mut self.handle {
         ConnectionHandle::Exclusive(conn) => Ok(ConnectionGuard::Exclusive(conn)),
         ConnectionHandle::Shared(slot) => map_slot(slot.lock().await),
      }
   }

   /// Blocking flavor of [`lock`](Self::lock).
   ///
   /// # Panics
   ///
   /// Panics when called from within an asynchronous execution context, like
   /// `tokio::sync::Mutex::blocking_lock`.
   pub fn blocking_lock(&mut self) -> Result<ConnectionGuard<'_, C>> {
      match &mut self.handle {
         ConnectionHandle::Exclusive(conn) => Ok(ConnectionGuard::Exclusive(conn)),
         ConnectionHandle::Shared(slot) => map_slot(slot.blocking_lock()),
      }
   }
}

fn map_slot<C>(guard: MutexGuard<'_, Option<C>>) -> Result<ConnectionGuard<'_, C>> {
   MutexGuard::try_map(guard, Option::as_mut)
      .map(ConnectionGuard::Shared)
      .map_err(|_| Error::ConnectionClosed)
}

/// Exclusive access to a tracked connection; derefs to the connection
pub enum ConnectionGuard<'a, C> {
   Exclusive(&'a mut C),
   Shared(MappedMutexGuard<'a, C>),
}

impl<C> Deref for ConnectionGuard<'_, C> {
   type Target = C;

   fn deref(&self) -> &Self::Target {
      match self {
         ConnectionGuard::Exclusive(conn) => conn,
         ConnectionGuard::Shared(guard) => guard,
      }
   }
}

impl<C> DerefMut for ConnectionGuard<'_, C> {
   fn deref_mut(&mut self) -> &mut Self::Target {
      match self {
         ConnectionGuard::Exclusive(conn) => conn,
         ConnectionGuard::Shared(guard) => guard,
      }
   }
}
