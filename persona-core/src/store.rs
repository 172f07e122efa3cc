//! User record storage.
//!
//! A [`UserStore`] holds one versioned document per user. Writes after the
//! initial insert are conditional on the version the writer loaded, so two
//! processes sharing a database can never silently overwrite each other.
//!
//! The SQLite schema:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS users (
//!     user_id    TEXT PRIMARY KEY,
//!     data       BLOB NOT NULL,
//!     version    INTEGER NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     checksum   TEXT
//! );
//! ```
//!
//! - WAL mode for concurrent readers.
//! - JSON inside a BLOB keeps the schema stable as the aggregate grows.
//! - Optional CRC-32 checksum detects corruption (logged, not fatal).
//! - Backup via SQLite's online-backup API.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{EngineError, Result};
use crate::record::User;
use crate::types::UserId;

/// Versioned, per-user document storage.
pub trait UserStore: Send + Sync {
    /// Load a user. The returned record's `version` is the stored version.
    ///
    /// # Errors
    /// Storage or decoding failures.
    fn load(&self, id: &UserId) -> Result<Option<User>>;

    /// Insert a new record at version 1, updating `user.version`.
    ///
    /// # Errors
    /// [`EngineError::UserExists`] if a record is already present.
    fn insert(&self, user: &mut User) -> Result<()>;

    /// Replace the record only if its stored version is still
    /// `expected_version`. On success the stored and in-memory versions
    /// become `expected_version + 1`. Returns `false` on a version conflict.
    ///
    /// # Errors
    /// Storage or encoding failures, or [`EngineError::UserNotFound`].
    fn compare_and_swap(&self, user: &mut User, expected_version: u64) -> Result<bool>;

    /// Every stored user id, in id order.
    ///
    /// # Errors
    /// Storage failures.
    fn list_ids(&self) -> Result<Vec<UserId>>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Store backed by a concurrent map. Records are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: DashMap<UserId, User>,
}

impl MemoryUserStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserStore for MemoryUserStore {
    fn load(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.users.get(id).map(|u| u.value().clone()))
    }

    fn insert(&self, user: &mut User) -> Result<()> {
        match self.users.entry(user.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::UserExists(user.id.clone())),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                user.version = 1;
                slot.insert(user.clone());
                Ok(())
            }
        }
    }

    fn compare_and_swap(&self, user: &mut User, expected_version: u64) -> Result<bool> {
        let mut stored = self
            .users
            .get_mut(&user.id)
            .ok_or_else(|| EngineError::UserNotFound(user.id.clone()))?;
        if stored.version != expected_version {
            return Ok(false);
        }
        user.version = expected_version + 1;
        *stored = user.clone();
        Ok(true)
    }

    fn list_ids(&self) -> Result<Vec<UserId>> {
        let mut ids: Vec<UserId> = self.users.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// CRC-32 of `data` as lowercase hex.
fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}

/// CRC-32 (ISO 3309 / ITU-T V.42), bitwise.
fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
    user_id    TEXT PRIMARY KEY,
    data       BLOB NOT NULL,
    version    INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    checksum   TEXT
);";

/// Store backed by an SQLite database file.
pub struct SqliteUserStore {
    conn: Mutex<Connection>,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteUserStore")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SqliteUserStore {
    /// Open (or create) a database at `path`.
    ///
    /// # Errors
    /// [`EngineError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), wal = config.wal_mode, "user store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path,
        })
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// [`EngineError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn encode(&self, user: &User) -> Result<(Vec<u8>, Option<String>)> {
        let json = serde_json::to_vec(user).map_err(|e| EngineError::Serialization(e.to_string()))?;
        let checksum = self.config.checksum_enabled.then(|| crc32_hex(&json));
        Ok((json, checksum))
    }

    /// Number of stored users.
    ///
    /// # Errors
    /// [`EngineError::Database`] on SQLite failures.
    pub fn user_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Copy the database to `dest_path` with the online-backup API.
    ///
    /// # Errors
    /// [`EngineError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let conn = self.conn.lock();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;
        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "user store backup completed"
        );
        Ok(())
    }

    /// Run SQLite's integrity check.
    ///
    /// # Errors
    /// [`EngineError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .lock()
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Path of the database file, or `:memory:`.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl UserStore for SqliteUserStore {
    fn load(&self, id: &UserId) -> Result<Option<User>> {
        let start = Instant::now();
        let row: Option<(Vec<u8>, i64, Option<String>)> = {
            let conn = self.conn.lock();
            let mut stmt =
                conn.prepare_cached("SELECT data, version, checksum FROM users WHERE user_id = ?1")?;
            stmt.query_row(params![id.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()?
        };

        let Some((data, version, stored_checksum)) = row else {
            return Ok(None);
        };

        if self.config.checksum_enabled {
            if let Some(expected) = stored_checksum {
                let actual = crc32_hex(&data);
                if expected != actual {
                    warn!(user = %id, %expected, %actual, "checksum mismatch, record may be corrupt");
                }
            }
        }

        let mut user: User =
            serde_json::from_slice(&data).map_err(|e| EngineError::Serialization(e.to_string()))?;
        user.version = u64::try_from(version)
            .map_err(|_| EngineError::InvalidState(format!("user {id}: negative version {version}")))?;

        debug!(
            user = %id,
            version = user.version,
            bytes = data.len(),
            elapsed_us = start.elapsed().as_micros(),
            "loaded user"
        );
        Ok(Some(user))
    }

    fn insert(&self, user: &mut User) -> Result<()> {
        user.version = 1;
        let (json, checksum) = self.encode(user)?;
        let now = Utc::now().to_rfc3339();
        let inserted = self.conn.lock().execute(
            "INSERT INTO users (user_id, data, version, updated_at, checksum)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(user_id) DO NOTHING",
            params![user.id.as_str(), json, now, checksum],
        )?;
        if inserted == 0 {
            return Err(EngineError::UserExists(user.id.clone()));
        }
        debug!(user = %user.id, "inserted user");
        Ok(())
    }

    fn compare_and_swap(&self, user: &mut User, expected_version: u64) -> Result<bool> {
        let expected = i64::try_from(expected_version)
            .map_err(|_| EngineError::InvalidState(format!("version {expected_version} out of range")))?;
        let previous = user.version;
        user.version = expected_version + 1;
        let (json, checksum) = match self.encode(user) {
            Ok(encoded) => encoded,
            Err(e) => {
                user.version = previous;
                return Err(e);
            }
        };
        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET data = ?1, version = ?2, updated_at = ?3, checksum = ?4
             WHERE user_id = ?5 AND version = ?6",
            params![json, expected + 1, now, checksum, user.id.as_str(), expected],
        )?;
        if updated == 1 {
            debug!(user = %user.id, version = user.version, bytes = json.len(), "committed user");
            return Ok(true);
        }
        user.version = previous;

        let exists: Option<i64> = conn
            .query_row(
                "SELECT version FROM users WHERE user_id = ?1",
                params![user.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Ok(false),
            None => Err(EngineError::UserNotFound(user.id.clone())),
        }
    }

    fn list_ids(&self) -> Result<Vec<UserId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT user_id FROM users ORDER BY user_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(UserId::new(row?));
        }
        Ok(ids)
    }
}

/// Adds `.optional()` to `rusqlite::Result`, mapping `QueryReturnedNoRows` to `Ok(None)`.
trait OptionalExt<T> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
