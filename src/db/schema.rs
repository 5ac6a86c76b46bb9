// src/db/schema.rs

//! Schema migrations for driftdb.
//!
//! Per spec.md §4.1, the format version is the set of applied migration
//! *names*, not a single integer: a migration is a name plus the SQL it
//! runs, recorded one row per applied name in `schema_migrations`. A file
//! carrying a name this build doesn't recognize is from a newer build than
//! this one understands, and opening it fails with [`Error::SchemaTooNew`]
//! rather than silently reinterpreting an unknown layout.
//!
//! Grounded on the teacher's `db::schema::migrate` loop shape, generalized
//! to named steps the way
//! `examples/mozilla-application-services/components/support/sql/src/open_database.rs`'s
//! `MigrationLogic` records upgrade functions.

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::{debug, info};

/// One migration: a stable name plus the function that applies it.
pub struct Migration {
    pub name: &'static str,
    pub up: fn(&Connection) -> Result<()>,
}

/// All migrations this build knows about, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_core_tables",
        up: migrate_0001_core_tables,
    },
    Migration {
        name: "0002_full_text_index",
        up: migrate_0002_full_text_index,
    },
];

fn init_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

fn applied_names(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(names)
}

fn mark_applied(conn: &Connection, name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (name) VALUES (?1)",
        [name],
    )?;
    Ok(())
}

/// Bring `conn`'s schema up to date, applying any migration this build knows
/// that the file hasn't yet recorded. Fails with [`Error::SchemaTooNew`] if
/// the file already carries a migration name absent from [`MIGRATIONS`].
pub fn migrate(conn: &Connection) -> Result<()> {
    init_migrations_table(conn)?;

    let applied = applied_names(conn)?;
    let known: HashSet<&str> = MIGRATIONS.iter().map(|m| m.name).collect();
    if applied.iter().any(|name| !known.contains(name.as_str())) {
        return Err(Error::SchemaTooNew);
    }

    for migration in MIGRATIONS {
        if applied.contains(migration.name) {
            continue;
        }
        info!("applying migration {}", migration.name);
        (migration.up)(conn)?;
        mark_applied(conn, migration.name)?;
    }

    debug!("schema up to date ({} migrations applied)", MIGRATIONS.len());
    Ok(())
}

/// `author`, `entry`, `tombstone`, `application_identifier` — the relations
/// of spec.md §4.1 apart from the full-text index.
fn migrate_0001_core_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE author (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            usn INTEGER NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE TABLE entry (
            scope TEXT NOT NULL,
            key TEXT NOT NULL,
            author_id TEXT NOT NULL,
            usn INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            type TEXT NOT NULL CHECK(type IN ('null', 'text', 'json', 'blob')),
            text TEXT,
            json TEXT,
            blob_mime TEXT,
            blob BLOB,
            PRIMARY KEY (scope, key, author_id)
        );

        CREATE INDEX idx_entry_scope_key ON entry(scope, key);
        CREATE INDEX idx_entry_author_usn ON entry(author_id, usn);

        -- No uniqueness beyond row identity: two different deleters may each
        -- witness the same prior (scope, key, author_id, usn) entry
        -- (spec.md §3, §9 'Tombstone primary key').
        CREATE TABLE tombstone (
            scope TEXT NOT NULL,
            key TEXT NOT NULL,
            author_id TEXT NOT NULL,
            usn INTEGER NOT NULL,
            deleting_author_id TEXT NOT NULL,
            deleting_usn INTEGER NOT NULL
        );

        CREATE INDEX idx_tombstone_slot ON tombstone(scope, key, author_id);
        CREATE INDEX idx_tombstone_deleter ON tombstone(deleting_author_id, deleting_usn);

        -- At most one row; enforced by always clearing before insert rather
        -- than a schema constraint (see db::models::ApplicationIdentifier::set).
        CREATE TABLE application_identifier (
            id TEXT PRIMARY KEY,
            major INTEGER NOT NULL,
            minor INTEGER NOT NULL,
            description TEXT
        );
        ",
    )?;
    Ok(())
}

/// `entry_full_text` — an FTS5 index over `entry.text`, kept in lockstep via
/// triggers so every write automatically maintains invariant 5 of spec.md
/// §3. Uses FTS5's "external content" mode so the indexed text isn't
/// duplicated into the virtual table.
fn migrate_0002_full_text_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE VIRTUAL TABLE entry_full_text USING fts5(
            text,
            content = 'entry',
            content_rowid = 'rowid'
        );

        CREATE TRIGGER entry_full_text_ai AFTER INSERT ON entry
        WHEN NEW.type = 'text'
        BEGIN
            INSERT INTO entry_full_text(rowid, text) VALUES (NEW.rowid, NEW.text);
        END;

        CREATE TRIGGER entry_full_text_ad AFTER DELETE ON entry
        WHEN OLD.type = 'text'
        BEGIN
            INSERT INTO entry_full_text(entry_full_text, rowid, text)
            VALUES ('delete', OLD.rowid, OLD.text);
        END;

        CREATE TRIGGER entry_full_text_au AFTER UPDATE ON entry
        BEGIN
            INSERT INTO entry_full_text(entry_full_text, rowid, text)
            SELECT 'delete', OLD.rowid, OLD.text WHERE OLD.type = 'text';
            INSERT INTO entry_full_text(rowid, text)
            SELECT NEW.rowid, NEW.text WHERE NEW.type = 'text';
        END;
        ",
    )?;
    Ok(())
}
