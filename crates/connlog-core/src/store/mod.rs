//! `SQLite`-backed connection log.
//!
//! Connections are appended with monotonically increasing identifiers and
//! pruned from the front. The store serves both halves of what a
//! [`WindowProjection`](crate::projection::WindowProjection) consumes: the
//! current identifier range ([`ConnIdRangeSource`]) and single-record reads
//! ([`RowFetcher`]).
//!
//! Each connection row references its owning application; a read whose
//! application row is missing yields no record rather than an error.


use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use thiserror::Error;
use tracing::{debug, info};

use crate::projection::RowFetcher;
use crate::range::{ConnIdRangeSource, IdentifierRange};
use crate::row::{ConnAddrs, ConnReason, RawConnRecord};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

const FETCH_CONN_SQL: &str = "SELECT
        t.conn_id,
        t.app_id,
        t.conn_time,
        t.process_id,
        t.reason,
        t.blocked,
        t.inherited,
        t.inbound,
        t.ip_proto,
        t.local_port,
        t.remote_port,
        t.local_ip,
        t.remote_ip,
        t.local_ip6,
        t.remote_ip6,
        a.path
    FROM conn t
        JOIN app a ON a.app_id = t.app_id
    WHERE t.conn_id = ?1";

/// Errors that can occur during connection log operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A connection to append to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConn {
    /// Owning application, as returned by [`ConnStore::add_app`].
    pub app_id: i64,
    /// Connection time in seconds since the Unix epoch.
    pub conn_time: i64,
    /// Process id.
    pub pid: u32,
    /// Decision reason.
    pub reason: ConnReason,
    /// Whether the connection was blocked.
    pub blocked: bool,
    /// Whether the decision was inherited.
    pub inherited: bool,
    /// Whether the connection was inbound.
    pub inbound: bool,
    /// IP protocol number.
    pub ip_proto: u8,
    /// Local port.
    pub local_port: u16,
    /// Remote port.
    pub remote_port: u16,
    /// Local and remote addresses.
    pub addrs: ConnAddrs,
}

/// The connection log backed by `SQLite`.
pub struct ConnStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for ConnStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnStore").finish_non_exhaustive()
    }
}

impl ConnStore {
    /// Opens or creates a connection log at `path`.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;

        info!(path = %path.display(), "opened connection log");
        Ok(Self::from_connection(conn))
    }

    /// Opens an existing connection log without write access.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        info!(path = %path.display(), "opened connection log read-only");
        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory connection log.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self::from_connection(conn))
    }

    const fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the identifier of the application at `path`, registering it
    /// first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the application cannot be inserted or read.
    pub fn add_app(&self, path: &str) -> Result<i64, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO app (path) VALUES (?1)",
            params![path],
        )?;
        let app_id = conn.query_row(
            "SELECT app_id FROM app WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )?;
        Ok(app_id)
    }

    /// Appends a connection and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be inserted.
    pub fn append_conn(&self, new: &NewConn) -> Result<i64, StoreError> {
        let conn = self.lock();
        let (local_ip, remote_ip, local_ip6, remote_ip6) = match new.addrs {
            ConnAddrs::V4 { local, remote } => (
                Some(i64::from(u32::from(local))),
                Some(i64::from(u32::from(remote))),
                None,
                None,
            ),
            ConnAddrs::V6 { local, remote } => (
                None,
                None,
                Some(local.octets().to_vec()),
                Some(remote.octets().to_vec()),
            ),
        };

        conn.execute(
            "INSERT INTO conn (app_id, conn_time, process_id, reason, blocked, inherited, inbound,
                ip_proto, local_port, remote_port, local_ip, remote_ip, local_ip6, remote_ip6)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                new.app_id,
                new.conn_time,
                new.pid,
                new.reason.code(),
                new.blocked,
                new.inherited,
                new.inbound,
                new.ip_proto,
                new.local_port,
                new.remote_port,
                local_ip,
                remote_ip,
                local_ip6,
                remote_ip6,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Deletes every connection with an identifier below `conn_id`.
    ///
    /// Returns the number of deleted connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn prune_before(&self, conn_id: i64) -> Result<usize, StoreError> {
        let removed = self
            .lock()
            .execute("DELETE FROM conn WHERE conn_id < ?1", params![conn_id])?;
        info!(before = conn_id, removed, "pruned connection log");
        Ok(removed)
    }

    /// Deletes every connection and application.
    ///
    /// Identifiers keep growing after a clear.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.lock()
            .execute_batch("DELETE FROM conn; DELETE FROM app;")?;
        info!("cleared connection log");
        Ok(())
    }

    /// Reads the current identifier bounds; `(0, 0)` for an empty log.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn conn_id_range(&self) -> Result<IdentifierRange, StoreError> {
        let (id_min, id_max): (Option<i64>, Option<i64>) = self.lock().query_row(
            "SELECT MIN(conn_id), MAX(conn_id) FROM conn",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(IdentifierRange::new(
            id_min.unwrap_or(0),
            id_max.unwrap_or(0),
        ))
    }

    /// Reads one connection joined with its application path.
    ///
    /// Returns `None` if the connection does not exist or its application
    /// is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn fetch_conn(&self, conn_id: i64) -> Result<Option<RawConnRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(FETCH_CONN_SQL)?;

        let record = stmt
            .query_row(params![conn_id], |row| {
                let local_ip4: Option<i64> = row.get(11)?;
                let remote_ip4: Option<i64> = row.get(12)?;
                let local_ip6: Option<Vec<u8>> = row.get(13)?;
                let remote_ip6: Option<Vec<u8>> = row.get(14)?;

                Ok(RawConnRecord {
                    conn_id: row.get(0)?,
                    app_id: row.get(1)?,
                    conn_time: row.get(2)?,
                    pid: row.get(3)?,
                    reason: row.get(4)?,
                    blocked: row.get(5)?,
                    inherited: row.get(6)?,
                    inbound: row.get(7)?,
                    ip_proto: row.get(8)?,
                    local_port: row.get(9)?,
                    remote_port: row.get(10)?,
                    // A NULL IPv4 column marks an IPv6 record.
                    is_ipv6: local_ip4.is_none(),
                    local_ip4: local_ip4.unwrap_or(0),
                    remote_ip4: remote_ip4.unwrap_or(0),
                    local_ip6: local_ip6.unwrap_or_default(),
                    remote_ip6: remote_ip6.unwrap_or_default(),
                    app_path: row.get(15)?,
                })
            })
            .optional()?;

        if record.is_none() {
            debug!(conn_id, "no joinable connection record");
        }
        Ok(record)
    }
}

impl RowFetcher for ConnStore {
    type Error = StoreError;

    fn fetch(&self, conn_id: i64) -> Result<Option<RawConnRecord>, Self::Error> {
        self.fetch_conn(conn_id)
    }
}

impl ConnIdRangeSource for ConnStore {
    type Error = StoreError;

    fn conn_id_range(&self) -> Result<IdentifierRange, Self::Error> {
        Self::conn_id_range(self)
    }
}
