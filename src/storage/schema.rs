//! Database schema definitions
//!
//! This module contains the SQL schema of the SQLite dataset.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    mode TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Posts emitted in posts mode
CREATE TABLE IF NOT EXISTS posts (
    uri TEXT PRIMARY KEY,
    cid TEXT NOT NULL,
    author_did TEXT NOT NULL,
    author_handle TEXT,
    text TEXT NOT NULL,
    created TEXT NOT NULL,
    indexed TEXT,
    reply_count INTEGER NOT NULL DEFAULT 0,
    repost_count INTEGER NOT NULL DEFAULT 0,
    like_count INTEGER NOT NULL DEFAULT 0,
    quote_count INTEGER NOT NULL DEFAULT 0,
    langs TEXT NOT NULL,
    reply_parent TEXT,
    reply_root TEXT,
    run_id INTEGER NOT NULL REFERENCES runs(id)
);

CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_did);
CREATE INDEX IF NOT EXISTS idx_posts_run ON posts(run_id);

-- Authors emitted in users mode
CREATE TABLE IF NOT EXISTS users (
    did TEXT PRIMARY KEY,
    handle TEXT NOT NULL,
    display_name TEXT,
    followers_count INTEGER,
    avatar TEXT,
    description TEXT,
    created TEXT,
    indexed TEXT,
    posts_count INTEGER,
    follows_count INTEGER,
    run_id INTEGER NOT NULL REFERENCES runs(id)
);

CREATE INDEX IF NOT EXISTS idx_users_run ON users(run_id);
"#;

/// Creates all tables if they do not exist yet
pub fn initialize_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
