// src/db/mod.rs

//! Storage layer: connection setup plus the row-level relations of
//! spec.md §4.1.
//!
//! [`schema`] owns migrations; [`models`] owns the per-relation structs and
//! their CRUD methods. [`open_connection`] is the one place a `Connection`
//! is created, so every caller gets the same pragmas.

pub mod models;
pub mod schema;

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;

/// Open (creating if absent) a driftdb file at `path`, apply pragmas for a
/// single-writer/multi-reader workload, and bring its schema up to date.
///
/// WAL mode lets readers proceed against a consistent snapshot while a
/// write transaction is in flight (spec.md §5 "Scheduling model").
pub fn open_connection(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;
    schema::migrate(&conn)?;
    Ok(conn)
}

/// Open a private in-memory database, for tests and `Store::backup`
/// round-trip checks.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    schema::migrate(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_connection_creates_file_and_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.driftdb");
        let conn = open_connection(&path).unwrap();
        assert!(path.exists());
        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(applied as usize, schema::MIGRATIONS.len());
    }

    #[test]
    fn open_connection_is_idempotent_on_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.driftdb");
        open_connection(&path).unwrap();
        open_connection(&path).unwrap();
    }
}
