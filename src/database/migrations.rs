//! Versioned schema for the Raindrop Sync database.
//!
//! Applied versions are recorded in `schema_version`; `run_all` only applies
//! the ones above the recorded maximum.

use rusqlite::Connection;

/// Highest version `run_all` knows how to apply.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Id of the invisible tree root.
pub const ROOT_NODE_ID: &str = "0";
/// Id of the bookmarks bar folder.
pub const BOOKMARKS_BAR_ID: &str = "1";
/// Id of the "Other bookmarks" folder.
pub const OTHER_BOOKMARKS_ID: &str = "2";

/// Highest applied version, 0 on a fresh database.
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Enables WAL and foreign keys, then applies every pending version.
pub fn run_all(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY,
             applied_at INTEGER NOT NULL,
             description TEXT NOT NULL
         );"
    )?;

    let current = get_schema_version(conn);

    if current < 1 {
        migration_v1(conn)?;
        record_version(conn, 1, "Bookmark tree with fixed root folders")?;
    }

    if current < 2 {
        migration_v2(conn)?;
        record_version(conn, 2, "Two-tier key-value store")?;
    }

    Ok(())
}

fn record_version(conn: &Connection, version: i32, description: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
        rusqlite::params![version, chrono::Utc::now().timestamp(), description],
    )?;
    Ok(())
}

/// V1: The bookmark tree. Folders have a NULL url.
fn migration_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS bookmark_nodes (
            id TEXT PRIMARY KEY,
            parent_id TEXT,
            title TEXT NOT NULL,
            url TEXT,
            position INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (parent_id) REFERENCES bookmark_nodes(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_bookmark_nodes_parent ON bookmark_nodes(parent_id);
        CREATE INDEX IF NOT EXISTS idx_bookmark_nodes_title ON bookmark_nodes(title);

        INSERT OR IGNORE INTO bookmark_nodes (id, parent_id, title, url, position, created_at, updated_at)
            VALUES ('0', NULL, '', NULL, 0, 0, 0);
        INSERT OR IGNORE INTO bookmark_nodes (id, parent_id, title, url, position, created_at, updated_at)
            VALUES ('1', '0', 'Bookmarks bar', NULL, 0, 0, 0);
        INSERT OR IGNORE INTO bookmark_nodes (id, parent_id, title, url, position, created_at, updated_at)
            VALUES ('2', '0', 'Other bookmarks', NULL, 1, 0, 0);
        "
    )
}

/// V2: Durable key-value store with a synced and a local tier.
fn migration_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv_store (
            tier TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (tier, key)
        );
        "
    )
}
