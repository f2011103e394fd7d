use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{CapsuleRepository, OutboxRepository, StoreError, Transaction, TransactionalStore};
use crate::capsule::{Capsule, UnlockOutcome};
use crate::outbox::{OutboxEvent, OutboxStatus};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS capsules (
      id TEXT PRIMARY KEY,
      owner_id TEXT NOT NULL,
      title TEXT,
      storage_key TEXT NOT NULL UNIQUE,
      unlock_at_ms INTEGER NOT NULL,
      is_unlocked INTEGER NOT NULL DEFAULT 0 CHECK (is_unlocked IN (0, 1)),
      created_at_ms INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS outbox_events (
      id TEXT PRIMARY KEY,
      capsule_id TEXT NOT NULL UNIQUE REFERENCES capsules(id),
      event_type TEXT NOT NULL,
      payload BLOB NOT NULL,
      status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'published', 'failed')),
      attempts INTEGER NOT NULL DEFAULT 0,
      last_error TEXT,
      created_at_ms INTEGER NOT NULL,
      published_at_ms INTEGER,
      failed_at_ms INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_capsules_owner ON capsules(owner_id, created_at_ms);
    CREATE INDEX IF NOT EXISTS idx_capsules_due ON capsules(is_unlocked, unlock_at_ms);
    CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox_events(status, created_at_ms);
"#;

const CAPSULE_COLUMNS: &str =
    "id, owner_id, title, storage_key, unlock_at_ms, is_unlocked, created_at_ms";

const OUTBOX_COLUMNS: &str = "id, capsule_id, event_type, payload, status, attempts, last_error, \
     created_at_ms, published_at_ms, failed_at_ms";

/// Relational store backed by a single SQLite connection.
///
/// Cloning shares the connection. A transaction holds the connection for
/// its whole lifetime, so other callers wait for it to commit or roll back.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and migrate it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        Self::init(Some(path), conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(None, Connection::open_in_memory()?)
    }

    fn init(path: Option<PathBuf>, conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Path of the database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lock the underlying connection for direct SQL access.
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::LockPoisoned("connection"))
    }

    /// Number of rows in the capsule table.
    pub fn capsule_count(&self) -> Result<usize, StoreError> {
        self.count("SELECT COUNT(*) FROM capsules")
    }

    /// Number of rows in the outbox table.
    pub fn outbox_count(&self) -> Result<usize, StoreError> {
        self.count("SELECT COUNT(*) FROM outbox_events")
    }

    fn count(&self, sql: &str) -> Result<usize, StoreError> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// An open `BEGIN IMMEDIATE` unit on the store's connection.
pub struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl SqliteTransaction<'_> {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            Err(StoreError::TransactionFinished)
        } else {
            Ok(())
        }
    }
}

impl Transaction for SqliteTransaction<'_> {
    fn insert_capsule(&mut self, capsule: &Capsule) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.conn
            .execute(
                r#"
                INSERT INTO capsules(id, owner_id, title, storage_key, unlock_at_ms, is_unlocked, created_at_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    capsule.id.to_string(),
                    capsule.owner_id.to_string(),
                    capsule.title,
                    capsule.storage_key,
                    capsule.unlock_at.timestamp_millis(),
                    capsule.is_unlocked,
                    capsule.created_at.timestamp_millis(),
                ],
            )
            .map_err(write_error)?;
        Ok(())
    }

    fn insert_outbox_event(&mut self, event: &OutboxEvent) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.conn
            .execute(
                r#"
                INSERT INTO outbox_events(id, capsule_id, event_type, payload, status, attempts,
                                          last_error, created_at_ms, published_at_ms, failed_at_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    event.id.to_string(),
                    event.capsule_id.to_string(),
                    event.event_type,
                    event.payload,
                    event.status.as_str(),
                    event.attempts,
                    event.last_error,
                    event.created_at.timestamp_millis(),
                    event.published_at.map(|at| at.timestamp_millis()),
                    event.failed_at.map(|at| at.timestamp_millis()),
                ],
            )
            .map_err(write_error)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.conn.execute_batch("COMMIT").map_err(write_error)?;
        self.finished = true;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        // sqlite abandons the transaction itself on some errors
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished || self.conn.is_autocommit() {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => warn!("rolled back unfinished transaction"),
            Err(err) => warn!(error = %err, "failed to roll back unfinished transaction"),
        }
    }
}

impl TransactionalStore for SqliteStore {
    type Tx<'a> = SqliteTransaction<'a>;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError> {
        let conn = self.connection()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(SqliteTransaction {
            conn,
            finished: false,
        })
    }
}

impl CapsuleRepository for SqliteStore {
    fn get_capsule(&self, id: Uuid) -> Result<Option<Capsule>, StoreError> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                &format!("SELECT {CAPSULE_COLUMNS} FROM capsules WHERE id = ?1"),
                params![id.to_string()],
                CapsuleRow::read,
            )
            .optional()?;
        row.map(CapsuleRow::into_capsule).transpose()
    }

    fn capsules_for_owner(&self, owner_id: Uuid) -> Result<Vec<Capsule>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CAPSULE_COLUMNS} FROM capsules WHERE owner_id = ?1 ORDER BY created_at_ms, id"
        ))?;
        let rows = stmt
            .query_map(params![owner_id.to_string()], CapsuleRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(CapsuleRow::into_capsule).collect()
    }

    fn due_capsules(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Capsule>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CAPSULE_COLUMNS} FROM capsules \
             WHERE is_unlocked = 0 AND unlock_at_ms <= ?1 \
             ORDER BY unlock_at_ms, id LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(
                params![now.timestamp_millis(), sql_limit(limit)],
                CapsuleRow::read,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(CapsuleRow::into_capsule).collect()
    }

    fn mark_unlocked(&self, id: Uuid, now: DateTime<Utc>) -> Result<UnlockOutcome, StoreError> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE capsules SET is_unlocked = 1 \
             WHERE id = ?1 AND is_unlocked = 0 AND unlock_at_ms <= ?2",
            params![id.to_string(), now.timestamp_millis()],
        )?;
        if changed == 1 {
            debug!(capsule_id = %id, "capsule unlocked");
            return Ok(UnlockOutcome::Unlocked);
        }

        let current: Option<(bool, i64)> = conn
            .query_row(
                "SELECT is_unlocked, unlock_at_ms FROM capsules WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(match current {
            None => UnlockOutcome::NotFound,
            Some((true, _)) => UnlockOutcome::AlreadyUnlocked,
            Some((false, unlock_at_ms)) => UnlockOutcome::NotYetDue {
                unlock_at: from_millis(unlock_at_ms)?,
            },
        })
    }
}

impl OutboxRepository for SqliteStore {
    fn outbox_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxEvent>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events WHERE status = ?1 ORDER BY created_at_ms, id"
        ))?;
        let rows = stmt
            .query_map(params![status.as_str()], OutboxRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(OutboxRow::into_event).collect()
    }

    fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEvent>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events WHERE status = 'pending' \
             ORDER BY created_at_ms, id LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![sql_limit(limit)], OutboxRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(OutboxRow::into_event).collect()
    }

    fn get_outbox_event(&self, id: Uuid) -> Result<Option<OutboxEvent>, StoreError> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                &format!("SELECT {OUTBOX_COLUMNS} FROM outbox_events WHERE id = ?1"),
                params![id.to_string()],
                OutboxRow::read,
            )
            .optional()?;
        row.map(OutboxRow::into_event).transpose()
    }

    fn mark_published(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE outbox_events SET status = 'published', published_at_ms = ?2, last_error = NULL \
             WHERE id = ?1 AND status = 'pending'",
            params![id.to_string(), now.timestamp_millis()],
        )?;
        Ok(changed == 1)
    }

    fn record_publish_failure(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxStatus>, StoreError> {
        let conn = self.connection()?;
        let status: Option<String> = conn
            .query_row(
                r#"
                UPDATE outbox_events
                SET attempts = attempts + 1,
                    last_error = ?2,
                    status = CASE WHEN attempts + 1 >= ?3 THEN 'failed' ELSE 'pending' END,
                    failed_at_ms = CASE WHEN attempts + 1 >= ?3 THEN ?4 ELSE failed_at_ms END
                WHERE id = ?1 AND status = 'pending'
                RETURNING status
                "#,
                params![id.to_string(), error, max_attempts, now.timestamp_millis()],
                |row| row.get(0),
            )
            .optional()?;
        status.map(|value| parse_status(&value)).transpose()
    }
}

struct CapsuleRow {
    id: String,
    owner_id: String,
    title: Option<String>,
    storage_key: String,
    unlock_at_ms: i64,
    is_unlocked: bool,
    created_at_ms: i64,
}

impl CapsuleRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(CapsuleRow {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            storage_key: row.get(3)?,
            unlock_at_ms: row.get(4)?,
            is_unlocked: row.get(5)?,
            created_at_ms: row.get(6)?,
        })
    }

    fn into_capsule(self) -> Result<Capsule, StoreError> {
        Ok(Capsule {
            id: parse_uuid(&self.id)?,
            owner_id: parse_uuid(&self.owner_id)?,
            title: self.title,
            storage_key: self.storage_key,
            unlock_at: from_millis(self.unlock_at_ms)?,
            is_unlocked: self.is_unlocked,
            created_at: from_millis(self.created_at_ms)?,
        })
    }
}

struct OutboxRow {
    id: String,
    capsule_id: String,
    event_type: String,
    payload: Vec<u8>,
    status: String,
    attempts: u32,
    last_error: Option<String>,
    created_at_ms: i64,
    published_at_ms: Option<i64>,
    failed_at_ms: Option<i64>,
}

impl OutboxRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(OutboxRow {
            id: row.get(0)?,
            capsule_id: row.get(1)?,
            event_type: row.get(2)?,
            payload: row.get(3)?,
            status: row.get(4)?,
            attempts: row.get(5)?,
            last_error: row.get(6)?,
            created_at_ms: row.get(7)?,
            published_at_ms: row.get(8)?,
            failed_at_ms: row.get(9)?,
        })
    }

    fn into_event(self) -> Result<OutboxEvent, StoreError> {
        Ok(OutboxEvent {
            id: parse_uuid(&self.id)?,
            capsule_id: parse_uuid(&self.capsule_id)?,
            event_type: self.event_type,
            payload: self.payload,
            status: parse_status(&self.status)?,
            attempts: self.attempts,
            last_error: self.last_error,
            created_at: from_millis(self.created_at_ms)?,
            published_at: self.published_at_ms.map(from_millis).transpose()?,
            failed_at: self.failed_at_ms.map(from_millis).transpose()?,
        })
    }
}

fn write_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Constraint(message.clone().unwrap_or_else(|| failure.to_string()))
        }
        _ => StoreError::Sql(err),
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|err| StoreError::Corrupt(format!("uuid {value:?}: {err}")))
}

fn parse_status(value: &str) -> Result<OutboxStatus, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}
