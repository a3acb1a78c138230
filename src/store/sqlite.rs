//! SQLite-backed pool and queue stores.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::error::Error;

use super::{PoolStore, QueueEntry, QueueStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS message_pool (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id TEXT NOT NULL,
    message_index INTEGER NOT NULL,
    is_sent BOOLEAN NOT NULL DEFAULT FALSE,
    created_at INTEGER NOT NULL,
    UNIQUE(group_id, message_index)
);
CREATE TABLE IF NOT EXISTS message_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id TEXT NOT NULL,
    message_index INTEGER NOT NULL,
    scheduled_time INTEGER NOT NULL,
    is_sent BOOLEAN NOT NULL DEFAULT FALSE,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pool_group ON message_pool(group_id, is_sent);
CREATE INDEX IF NOT EXISTS idx_queue_due ON message_queue(is_sent, scheduled_time);
"#;

/// One connection serves both stores. The mutex serializes admin calls
/// against the tick thread, which is all the coordination a single-process
/// scheduler needs.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn =
            Connection::open(path).map_err(|e| Error::Store(format!("sqlite open: {}", e)))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::Store(format!("sqlite wal: {}", e)))?;
        // Admin commands run in their own process while the daemon ticks.
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| Error::Store(format!("sqlite busy_timeout: {}", e)))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::Store(format!("sqlite init: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self, Error> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::Store(format!("sqlite open: {}", e)))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::Store(format!("sqlite init: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means a panic mid-statement; the connection is
        // still usable for independent statements.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn try_initialize_pool(&self, group_id: &str, message_count: usize) -> rusqlite::Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM message_pool WHERE group_id = ?1",
            params![group_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO message_pool (group_id, message_index, is_sent, created_at)
                 VALUES (?1, ?2, FALSE, ?3)",
            )?;
            let now = Self::now_ms();
            for i in 0..message_count {
                stmt.execute(params![group_id, i as i64, now])?;
            }
        }
        tx.commit()
    }

    fn try_available_indices(&self, group_id: &str) -> rusqlite::Result<Vec<usize>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT message_index FROM message_pool
             WHERE group_id = ?1 AND is_sent = FALSE
             ORDER BY message_index ASC",
        )?;
        let rows = stmt.query_map(params![group_id], |row| row.get::<_, i64>(0))?;
        let mut indices = Vec::new();
        for row in rows {
            indices.push(row? as usize);
        }
        Ok(indices)
    }

    fn try_remove_index(&self, group_id: &str, index: usize) -> rusqlite::Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM message_pool WHERE group_id = ?1 AND message_index = ?2",
            params![group_id, index as i64],
        )?;
        // Shift the survivors down through negative space so the UNIQUE
        // constraint never sees two rows on the same index mid-update.
        tx.execute(
            "UPDATE message_pool SET message_index = -(message_index - 1)
             WHERE group_id = ?1 AND message_index > ?2",
            params![group_id, index as i64],
        )?;
        tx.execute(
            "UPDATE message_pool SET message_index = -message_index
             WHERE group_id = ?1 AND message_index < 0",
            params![group_id],
        )?;
        tx.commit()
    }

    fn try_due_entries(&self, now_ms: i64) -> rusqlite::Result<Vec<QueueEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, group_id, message_index, scheduled_time FROM message_queue
             WHERE scheduled_time <= ?1 AND is_sent = FALSE
             ORDER BY scheduled_time ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![now_ms], |row| {
            Ok(QueueEntry {
                id: row.get(0)?,
                group_id: row.get(1)?,
                message_index: row.get::<_, i64>(2)? as usize,
                scheduled_ms: row.get(3)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

impl PoolStore for SqliteStore {
    fn initialize_pool(&self, group_id: &str, message_count: usize) -> bool {
        match self.try_initialize_pool(group_id, message_count) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to initialize pool for {}: {}", group_id, e);
                false
            }
        }
    }

    fn available_indices(&self, group_id: &str) -> Vec<usize> {
        match self.try_available_indices(group_id) {
            Ok(indices) => indices,
            Err(e) => {
                tracing::error!("Failed to read available indices for {}: {}", group_id, e);
                Vec::new()
            }
        }
    }

    fn mark_sent(&self, group_id: &str, index: usize) -> bool {
        let result = self.lock().execute(
            "UPDATE message_pool SET is_sent = TRUE WHERE group_id = ?1 AND message_index = ?2",
            params![group_id, index as i64],
        );
        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to mark {}[{}] sent: {}", group_id, index, e);
                false
            }
        }
    }

    fn reset_pool(&self, group_id: &str) -> bool {
        let result = self.lock().execute(
            "UPDATE message_pool SET is_sent = FALSE WHERE group_id = ?1",
            params![group_id],
        );
        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to reset pool for {}: {}", group_id, e);
                false
            }
        }
    }

    fn add_index(&self, group_id: &str, index: usize) -> bool {
        let result = self.lock().execute(
            "INSERT OR IGNORE INTO message_pool (group_id, message_index, is_sent, created_at)
             VALUES (?1, ?2, FALSE, ?3)",
            params![group_id, index as i64, Self::now_ms()],
        );
        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to add {}[{}] to pool: {}", group_id, index, e);
                false
            }
        }
    }

    fn remove_index(&self, group_id: &str, index: usize) -> bool {
        match self.try_remove_index(group_id, index) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to remove {}[{}] from pool: {}", group_id, index, e);
                false
            }
        }
    }

    fn pool_len(&self, group_id: &str) -> usize {
        let result = self.lock().query_row(
            "SELECT COUNT(*) FROM message_pool WHERE group_id = ?1",
            params![group_id],
            |row| row.get::<_, i64>(0),
        );
        match result {
            Ok(count) => count as usize,
            Err(e) => {
                tracing::error!("Failed to count pool for {}: {}", group_id, e);
                0
            }
        }
    }

    fn clear_pool(&self, group_id: &str) -> bool {
        let result = self.lock().execute(
            "DELETE FROM message_pool WHERE group_id = ?1",
            params![group_id],
        );
        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to clear pool for {}: {}", group_id, e);
                false
            }
        }
    }
}

impl QueueStore for SqliteStore {
    fn enqueue(&self, group_id: &str, index: usize, scheduled_ms: i64) -> bool {
        let result = self.lock().execute(
            "INSERT INTO message_queue (group_id, message_index, scheduled_time, is_sent, created_at)
             VALUES (?1, ?2, ?3, FALSE, ?4)",
            params![group_id, index as i64, scheduled_ms, Self::now_ms()],
        );
        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to enqueue {}[{}]: {}", group_id, index, e);
                false
            }
        }
    }

    fn due_entries(&self, now_ms: i64) -> Vec<QueueEntry> {
        match self.try_due_entries(now_ms) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Failed to read due queue entries: {}", e);
                Vec::new()
            }
        }
    }

    fn mark_entry_sent(&self, entry_id: i64) -> bool {
        let result = self.lock().execute(
            "UPDATE message_queue SET is_sent = TRUE WHERE id = ?1",
            params![entry_id],
        );
        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to mark queue entry {} sent: {}", entry_id, e);
                false
            }
        }
    }

    fn queue_len(&self) -> usize {
        let result = self.lock().query_row(
            "SELECT COUNT(*) FROM message_queue WHERE is_sent = FALSE",
            [],
            |row| row.get::<_, i64>(0),
        );
        match result {
            Ok(count) => count as usize,
            Err(e) => {
                tracing::error!("Failed to count queue: {}", e);
                0
            }
        }
    }
}
