//! sqlx-backed SQLite connection factory

use crate::Result;
use crate::factory::{ConnectionFactory, ConnectionRequest};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use std::str::FromStr;
use tracing::trace;

/// Opens SQLite connections with sqlx.
///
/// Read requests open the file read-only; write requests create it if missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnectionFactory;

impl SqliteConnectionFactory {
   pub fn new() -> Self {
      Self
   }

   fn connect_options(request: &ConnectionRequest) -> Result<SqliteConnectOptions> {
      let options = SqliteConnectOptions::from_str(&request.connection_string)?
         .read_only(request.read_only)
         .create_if_missing(!request.read_only);
      Ok(options)
   }
}

#[async_trait]
impl ConnectionFactory for SqliteConnectionFactory {
   type Connection = SqliteConnection;

   async fn open(&self, request: &ConnectionRequest) -> Result<SqliteConnection> {
      let options = Self::connect_options(request)?;
      let conn = options.connect().await?;
      trace!(
         execution = ?request.execution,
         read_only = request.read_only,
         "Opened SQLite connection"
      );
      Ok(conn)
   }

   async fn apply_setting(&self, conn: &mut SqliteConnection, statement: &str) -> Result<()> {
      sqlx::query(statement).execute(&mut *conn).await?;
      trace!(statement, "Applied connection setting");
      Ok(())
   }

   async fn close(&self, conn: SqliteConnection) -> Result<()> {
      conn.close().await?;
      Ok(())
   }
}
