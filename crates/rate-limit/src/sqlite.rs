//! SQLite-backed counter store.
//!
//! A single rusqlite [`Connection`] lives behind a [`Mutex`]; every store
//! operation takes the lock for the duration of its statements and runs on
//! Tokio's blocking pool. Conditional increments are a single
//! `UPDATE ... WHERE count < ?` statement, so the check and the write are one
//! atomic step even if another process shares the database file.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use mixgate_common::ProjectId;
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::store::{CounterStore, Increment, RateCounter, StoreError};

const COUNTER_COLUMNS: &str = "project_id, count, last_updated";

/// Thread-safe wrapper around one SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database file and apply pending migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(sqlite_err)?;

        info!(path = %path.display(), "counter database opened");
        Self::with_migrations(conn)
    }

    /// Open a private in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(format!("failed to open in-memory db: {}", e)))?;
        Self::with_migrations(conn)
    }

    fn with_migrations(conn: Connection) -> Result<Self, StoreError> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(sqlite_err)?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(sqlite_err)?;

    if current_version < 1 {
        conn.execute_batch(
            "BEGIN;
             CREATE TABLE IF NOT EXISTS rate_counters (
                 project_id    TEXT PRIMARY KEY NOT NULL,
                 count         INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
                 last_updated  INTEGER NOT NULL
             );
             INSERT INTO schema_migrations (version, name) VALUES (1, 'rate_counters');
             COMMIT;",
        )
        .map_err(sqlite_err)?;
        info!("applied counter migration v1: rate_counters");
    }

    Ok(())
}

fn sqlite_err(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

type CounterRow = (String, i64, i64);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CounterRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn to_counter((id, count, millis): CounterRow) -> Result<RateCounter, StoreError> {
    let project_id: ProjectId = id
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("project_id {:?}: {}", id, e)))?;
    let count = u64::try_from(count)
        .map_err(|_| StoreError::Corrupt(format!("negative count {} for {}", count, id)))?;
    let last_updated = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {} for {}", millis, id)))?;
    Ok(RateCounter {
        project_id,
        count,
        last_updated,
    })
}

fn select_counter(conn: &Connection, project_id: ProjectId) -> Result<Option<RateCounter>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM rate_counters WHERE project_id = ?1", COUNTER_COLUMNS),
        rusqlite::params![project_id.to_string()],
        read_row,
    )
    .optional()
    .map_err(sqlite_err)?
    .map(to_counter)
    .transpose()
}

/// Durable [`CounterStore`] on top of [`Database`].
#[derive(Clone)]
pub struct SqliteCounterStore {
    db: Arc<Database>,
}

impl SqliteCounterStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(Database::open(path)?)))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(Database::in_memory()?)))
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {}", e)))?
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn get(&self, project_id: ProjectId) -> Result<RateCounter, StoreError> {
        self.blocking(move |conn| {
            select_counter(conn, project_id)?.ok_or(StoreError::NotFound(project_id))
        })
        .await
    }

    async fn create(&self, project_id: ProjectId) -> Result<RateCounter, StoreError> {
        self.blocking(move |conn| {
            // Stored with millisecond precision; keep the snapshot identical.
            let counter = RateCounter::new(project_id, Utc::now().trunc_subsecs(3));
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO rate_counters (project_id, count, last_updated)
                     VALUES (?1, 0, ?2)",
                    rusqlite::params![
                        project_id.to_string(),
                        counter.last_updated.timestamp_millis()
                    ],
                )
                .map_err(sqlite_err)?;
            if inserted == 0 {
                return Err(StoreError::AlreadyExists(project_id));
            }
            Ok(counter)
        })
        .await
    }

    async fn increment(&self, project_id: ProjectId) -> Result<RateCounter, StoreError> {
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "UPDATE rate_counters SET count = count + 1, last_updated = ?2
                     WHERE project_id = ?1
                     RETURNING {}",
                    COUNTER_COLUMNS
                ),
                rusqlite::params![project_id.to_string(), Utc::now().timestamp_millis()],
                read_row,
            )
            .optional()
            .map_err(sqlite_err)?
            .map(to_counter)
            .transpose()?
            .ok_or(StoreError::NotFound(project_id))
        })
        .await
    }

    async fn increment_below(
        &self,
        project_id: ProjectId,
        limit: u64,
    ) -> Result<Increment, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.blocking(move |conn| {
            let applied = conn
                .query_row(
                    &format!(
                        "UPDATE rate_counters SET count = count + 1, last_updated = ?2
                         WHERE project_id = ?1 AND count < ?3
                         RETURNING {}",
                        COUNTER_COLUMNS
                    ),
                    rusqlite::params![
                        project_id.to_string(),
                        Utc::now().timestamp_millis(),
                        limit
                    ],
                    read_row,
                )
                .optional()
                .map_err(sqlite_err)?;

            match applied {
                Some(row) => Ok(Increment::Applied(to_counter(row)?)),
                // Nothing matched: either the row is missing or it is at the
                // limit. The connection lock is still held, so this read sees
                // the state the UPDATE was evaluated against.
                None => select_counter(conn, project_id)?
                    .map(Increment::AtLimit)
                    .ok_or(StoreError::NotFound(project_id)),
            }
        })
        .await
    }

    async fn reset(&self, project_id: ProjectId) -> Result<RateCounter, StoreError> {
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "UPDATE rate_counters SET count = 0, last_updated = ?2
                     WHERE project_id = ?1
                     RETURNING {}",
                    COUNTER_COLUMNS
                ),
                rusqlite::params![project_id.to_string(), Utc::now().timestamp_millis()],
                read_row,
            )
            .optional()
            .map_err(sqlite_err)?
            .map(to_counter)
            .transpose()?
            .ok_or(StoreError::NotFound(project_id))
        })
        .await
    }

    async fn reset_all(&self) -> Result<usize, StoreError> {
        self.blocking(|conn| {
            conn.execute(
                "UPDATE rate_counters SET count = 0, last_updated = ?1",
                rusqlite::params![Utc::now().timestamp_millis()],
            )
            .map_err(sqlite_err)
        })
        .await
    }

    async fn delete(&self, project_id: ProjectId) -> Result<bool, StoreError> {
        self.blocking(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM rate_counters WHERE project_id = ?1",
                    rusqlite::params![project_id.to_string()],
                )
                .map_err(sqlite_err)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<RateCounter>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM rate_counters ORDER BY project_id",
                    COUNTER_COLUMNS
                ))
                .map_err(sqlite_err)?;
            let rows = stmt.query_map([], read_row).map_err(sqlite_err)?;

            let mut counters = Vec::new();
            for row in rows {
                counters.push(to_counter(row.map_err(sqlite_err)?)?);
            }
            Ok(counters)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_reentrant() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| run_migrations(conn)).unwrap();

        let applied: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
                    .map_err(sqlite_err)
            })
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn create_increment_reset_cycle() {
        let store = SqliteCounterStore::in_memory().unwrap();
        let id = ProjectId::new();

        assert_eq!(store.create(id).await.unwrap().count, 0);
        assert_eq!(store.increment(id).await.unwrap().count, 1);
        assert_eq!(store.increment(id).await.unwrap().count, 2);
        assert_eq!(store.get(id).await.unwrap().count, 2);
        assert_eq!(store.reset(id).await.unwrap().count, 0);
        assert_eq!(store.get(id).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = SqliteCounterStore::in_memory().unwrap();
        let id = ProjectId::new();
        store.create(id).await.unwrap();

        assert!(matches!(
            store.create(id).await,
            Err(StoreError::AlreadyExists(p)) if p == id
        ));
    }

    #[tokio::test]
    async fn increment_below_distinguishes_limit_from_missing() {
        let store = SqliteCounterStore::in_memory().unwrap();
        let id = ProjectId::new();
        store.create(id).await.unwrap();

        assert!(matches!(store.increment_below(id, 1).await.unwrap(), Increment::Applied(c) if c.count == 1));
        assert!(matches!(store.increment_below(id, 1).await.unwrap(), Increment::AtLimit(c) if c.count == 1));
        assert!(matches!(
            store.increment_below(ProjectId::new(), 1).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reset_all_counts_rows() {
        let store = SqliteCounterStore::in_memory().unwrap();
        assert_eq!(store.reset_all().await.unwrap(), 0);

        for _ in 0..3 {
            let id = ProjectId::new();
            store.create(id).await.unwrap();
            store.increment(id).await.unwrap();
        }

        assert_eq!(store.reset_all().await.unwrap(), 3);
        assert!(store.list().await.unwrap().iter().all(|c| c.count == 0));
    }

    #[tokio::test]
    async fn counters_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("counters.db");
        let id = ProjectId::new();

        {
            let store = SqliteCounterStore::open(&path).unwrap();
            store.create(id).await.unwrap();
            store.increment(id).await.unwrap();
        }

        let reopened = SqliteCounterStore::open(&path).unwrap();
        assert_eq!(reopened.get(id).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn corrupt_rows_are_reported() {
        let store = SqliteCounterStore::in_memory().unwrap();
        store
            .db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO rate_counters (project_id, count, last_updated) VALUES ('bogus', 1, 0)",
                    [],
                )
                .map_err(sqlite_err)
            })
            .unwrap();

        assert!(matches!(store.list().await, Err(StoreError::Corrupt(_))));
    }
}
