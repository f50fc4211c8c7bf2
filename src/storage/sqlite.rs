//! SQLite dataset implementation

use crate::output::{PostRecord, UserRecord};
use crate::storage::schema::initialize_schema;
use crate::storage::{RunRecord, RunStatus, StorageError, StorageResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite dataset holding the records of one or more crawl runs
pub struct SqliteDataset {
    conn: Connection,
}

impl SqliteDataset {
    /// Opens or creates the dataset at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteDataset)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory dataset
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    // ===== Run Management =====

    /// Records the start of a crawl run and returns its ID
    pub fn create_run(&mut self, config_hash: &str, mode: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, mode, status) VALUES (?1, ?2, ?3, ?4)",
            params![now, config_hash, mode, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Marks a run as finished with its final status
    pub fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET finished_at = ?1, status = ?2 WHERE id = ?3",
            params![now, status.to_db_string(), run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    pub fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, mode, status FROM runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok(RunRecord {
                        id: row.get(0)?,
                        started_at: row.get(1)?,
                        finished_at: row.get(2)?,
                        config_hash: row.get(3)?,
                        mode: row.get(4)?,
                        status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
                            .unwrap_or(RunStatus::Running),
                    })
                },
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    // ===== Records =====

    /// Inserts a post; returns `false` if the URI is already stored
    pub fn insert_post(&mut self, run_id: i64, post: &PostRecord) -> StorageResult<bool> {
        let langs = serde_json::to_string(&post.langs)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO posts (
                uri, cid, author_did, author_handle, text, created, indexed,
                reply_count, repost_count, like_count, quote_count,
                langs, reply_parent, reply_root, run_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                post.uri,
                post.cid,
                post.author_did,
                post.author_handle,
                post.text,
                post.created_at,
                post.indexed_at,
                post.metrics.reply_count as i64,
                post.metrics.repost_count as i64,
                post.metrics.like_count as i64,
                post.metrics.quote_count as i64,
                langs,
                post.reply_parent,
                post.reply_root,
                run_id,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Inserts a user; returns `false` if the DID is already stored
    pub fn insert_user(&mut self, run_id: i64, user: &UserRecord) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO users (
                did, handle, display_name, followers_count, avatar, description,
                created, indexed, posts_count, follows_count, run_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                user.did,
                user.handle,
                user.display_name,
                user.followers_count.map(|n| n as i64),
                user.avatar,
                user.description,
                user.created_at,
                user.indexed_at,
                user.posts_count.map(|n| n as i64),
                user.follows_count.map(|n| n as i64),
                run_id,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn count_posts(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_users(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
