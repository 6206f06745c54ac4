//! SQL DDL for SmartScan tables.
//!
//! Static tables: `collections` (registry of vector collections) and
//! `schema_meta`. Each collection additionally owns an `<table>_items` table
//! and an `<table>_vec` vec0 virtual table, created on demand by
//! [`collection_ddl`]. All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Registry of per-modality vector collections
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    table_name TEXT NOT NULL UNIQUE,
    modality TEXT NOT NULL CHECK(modality IN ('image','text','video')),
    model TEXT NOT NULL,
    dimensions INTEGER NOT NULL CHECK(dimensions > 0),
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_collections_modality ON collections(modality);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize the static tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

/// Derive a safe SQL identifier from a collection name.
pub fn table_name(collection: &str) -> String {
    let mut name: String = collection
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) || name.is_empty() {
        name.insert(0, 'c');
    }
    name
}

/// DDL for one collection's item and vector tables.
pub fn collection_ddl(table: &str, dimensions: usize) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS "{table}_items" (
    id TEXT PRIMARY KEY,
    indexed_at TEXT NOT NULL
);
CREATE VIRTUAL TABLE IF NOT EXISTS "{table}_vec" USING vec0(
    id TEXT PRIMARY KEY,
    embedding FLOAT[{dimensions}]
);
"#
    )
}
