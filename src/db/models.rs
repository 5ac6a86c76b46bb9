// src/db/models.rs

//! Row structs for the four persistent relations of spec.md §4.1: `author`,
//! `entry`, `tombstone`, `application_identifier`. Each follows the
//! teacher's pattern of a struct plus `insert`/`find_*`/`from_row`
//! associated functions taking `&Connection` directly — the reconciliation
//! engine (`crate::engine`) composes these into transactions.

use crate::error::Result;
use crate::value::{Value, ValueKind};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

/// A write session's identity and high-water USN (spec.md §3 "Author record").
#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    pub id: Uuid,
    pub name: String,
    pub usn: i64,
    pub timestamp: DateTime<Utc>,
}

impl Author {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            usn: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO author (id, name, usn, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![
                self.id.to_string(),
                self.name,
                self.usn,
                self.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Persist the current `usn`/`timestamp`/`name` for an already-inserted author row.
    pub fn update(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "UPDATE author SET name = ?2, usn = ?3, timestamp = ?4 WHERE id = ?1",
            params![
                self.id.to_string(),
                self.name,
                self.usn,
                self.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: Uuid) -> Result<Option<Self>> {
        let mut stmt =
            conn.prepare("SELECT id, name, usn, timestamp FROM author WHERE id = ?1")?;
        Ok(stmt
            .query_row([id.to_string()], Self::from_row)
            .optional()?)
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare("SELECT id, name, usn, timestamp FROM author")?;
        let rows = stmt
            .query_map([], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every author row except `keep_id`, used by `erase_version_history`.
    pub fn delete_all_except(conn: &Connection, keep_id: Uuid) -> Result<()> {
        conn.execute(
            "DELETE FROM author WHERE id != ?1",
            [keep_id.to_string()],
        )?;
        Ok(())
    }

    pub fn max_entry_usn(conn: &Connection, author_id: Uuid) -> Result<Option<i64>> {
        let usn: Option<i64> = conn.query_row(
            "SELECT MAX(usn) FROM entry WHERE author_id = ?1",
            [author_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(usn)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let id: String = row.get(0)?;
        let timestamp: String = row.get(3)?;
        Ok(Self {
            id: parse_uuid(&id, 0)?,
            name: row.get(1)?,
            usn: row.get(2)?,
            timestamp: parse_timestamp(&timestamp, 3)?,
        })
    }
}

/// A tagged-value write at `(scope, key, author_id)` (spec.md §3 "Entry").
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub scope: String,
    pub key: String,
    pub author_id: Uuid,
    pub usn: i64,
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

impl Entry {
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        let (text, json, blob_mime, blob): (
            Option<&str>,
            Option<&str>,
            Option<&str>,
            Option<&[u8]>,
        ) = match &self.value {
            Value::Null => (None, None, None, None),
            Value::Text(s) => (Some(s.as_str()), None, None, None),
            Value::Json(s) => (None, Some(s.as_str()), None, None),
            Value::Blob { mime_type, bytes } => {
                (None, None, Some(mime_type.as_str()), Some(bytes.as_slice()))
            }
        };

        conn.execute(
            "INSERT INTO entry (scope, key, author_id, usn, timestamp, type, text, json, blob_mime, blob)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(scope, key, author_id) DO UPDATE SET
                usn = excluded.usn,
                timestamp = excluded.timestamp,
                type = excluded.type,
                text = excluded.text,
                json = excluded.json,
                blob_mime = excluded.blob_mime,
                blob = excluded.blob",
            params![
                self.scope,
                self.key,
                self.author_id.to_string(),
                self.usn,
                self.timestamp.to_rfc3339(),
                self.value.kind().as_str(),
                text,
                json,
                blob_mime,
                blob,
            ],
        )?;
        Ok(())
    }

    pub fn delete(conn: &Connection, scope: &str, key: &str, author_id: Uuid) -> Result<()> {
        conn.execute(
            "DELETE FROM entry WHERE scope = ?1 AND key = ?2 AND author_id = ?3",
            params![scope, key, author_id.to_string()],
        )?;
        Ok(())
    }

    pub fn find_one(
        conn: &Connection,
        scope: &str,
        key: &str,
        author_id: Uuid,
    ) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(SELECT_ENTRY_COLUMNS_WHERE.replace("{cond}", "scope = ?1 AND key = ?2 AND author_id = ?3").as_str())?;
        Ok(stmt
            .query_row(params![scope, key, author_id.to_string()], Self::from_row)
            .optional()?)
    }

    /// All entries (one per author, per invariant 2) at `(scope, key)`.
    pub fn find_by_slot(conn: &Connection, scope: &str, key: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            &SELECT_ENTRY_COLUMNS_WHERE.replace("{cond}", "scope = ?1 AND key = ?2"),
        )?;
        let rows = stmt
            .query_map(params![scope, key], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every entry at `(scope, key)` not authored by `author_id`.
    pub fn find_others_at_slot(
        conn: &Connection,
        scope: &str,
        key: &str,
        author_id: Uuid,
    ) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&SELECT_ENTRY_COLUMNS_WHERE.replace(
            "{cond}",
            "scope = ?1 AND key = ?2 AND author_id != ?3",
        ))?;
        let rows = stmt
            .query_map(params![scope, key, author_id.to_string()], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Distinct `(scope, key)` pairs carrying at least one non-null entry,
    /// optionally filtered. Matches spec.md §8 invariant 7.
    pub fn list_keys(
        conn: &Connection,
        scope: Option<&str>,
        key: Option<&str>,
    ) -> Result<Vec<(String, String)>> {
        let sql = match (scope, key) {
            (None, None) => {
                "SELECT DISTINCT scope, key FROM entry WHERE type != 'null' ORDER BY scope, key"
                    .to_string()
            }
            (Some(_), None) => {
                "SELECT DISTINCT scope, key FROM entry WHERE type != 'null' AND scope = ?1 ORDER BY scope, key".to_string()
            }
            (None, Some(_)) => {
                "SELECT DISTINCT scope, key FROM entry WHERE type != 'null' AND key = ?1 ORDER BY scope, key".to_string()
            }
            (Some(_), Some(_)) => {
                "SELECT DISTINCT scope, key FROM entry WHERE type != 'null' AND scope = ?1 AND key = ?2 ORDER BY scope, key".to_string()
            }
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows: rusqlite::Result<Vec<(String, String)>> = match (scope, key) {
            (None, None) => stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect(),
            (Some(s), None) => stmt
                .query_map([s], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect(),
            (None, Some(k)) => stmt
                .query_map([k], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect(),
            (Some(s), Some(k)) => stmt
                .query_map([s, k], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect(),
        };
        Ok(rows?)
    }

    /// Every entry row in the store, optionally filtered by scope/key, for
    /// bulk reads and predicate scans.
    pub fn find_all(
        conn: &Connection,
        scope: Option<&str>,
        key: Option<&str>,
    ) -> Result<Vec<Self>> {
        let sql = match (scope, key) {
            (None, None) => SELECT_ENTRY_COLUMNS.to_string(),
            (Some(_), None) => format!("{SELECT_ENTRY_COLUMNS} WHERE scope = ?1"),
            (None, Some(_)) => format!("{SELECT_ENTRY_COLUMNS} WHERE key = ?1"),
            (Some(_), Some(_)) => format!("{SELECT_ENTRY_COLUMNS} WHERE scope = ?1 AND key = ?2"),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows: rusqlite::Result<Vec<Self>> = match (scope, key) {
            (None, None) => stmt.query_map([], Self::from_row)?.collect(),
            (Some(s), None) => stmt.query_map([s], Self::from_row)?.collect(),
            (None, Some(k)) => stmt.query_map([k], Self::from_row)?.collect(),
            (Some(s), Some(k)) => stmt.query_map([s, k], Self::from_row)?.collect(),
        };
        Ok(rows?)
    }

    pub fn find_by_key_prefix(
        conn: &Connection,
        scope: Option<&str>,
        prefix: &str,
    ) -> Result<Vec<Self>> {
        let like = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let sql = match scope {
            None => format!("{SELECT_ENTRY_COLUMNS} WHERE key LIKE ?1 ESCAPE '\\'"),
            Some(_) => {
                format!("{SELECT_ENTRY_COLUMNS} WHERE scope = ?1 AND key LIKE ?2 ESCAPE '\\'")
            }
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows: rusqlite::Result<Vec<Self>> = match scope {
            None => stmt.query_map([&like], Self::from_row)?.collect(),
            Some(s) => stmt.query_map(params![s, like], Self::from_row)?.collect(),
        };
        Ok(rows?)
    }

    /// Entries authored by `author_id` with `usn` strictly greater than
    /// `since` (or unconditional when `since` is `None`) — the per-author
    /// fetch used by merge step 5.
    pub fn find_by_author_since(
        conn: &Connection,
        author_id: Uuid,
        since: Option<i64>,
    ) -> Result<Vec<Self>> {
        let sql = match since {
            None => format!("{SELECT_ENTRY_COLUMNS} WHERE author_id = ?1"),
            Some(_) => format!("{SELECT_ENTRY_COLUMNS} WHERE author_id = ?1 AND usn > ?2"),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows: rusqlite::Result<Vec<Self>> = match since {
            None => stmt
                .query_map([author_id.to_string()], Self::from_row)?
                .collect(),
            Some(u) => stmt
                .query_map(params![author_id.to_string(), u], Self::from_row)?
                .collect(),
        };
        Ok(rows?)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let author_id: String = row.get(2)?;
        let timestamp: String = row.get(4)?;
        let kind: String = row.get(5)?;
        let kind = ValueKind::parse(&kind).map_err(|_| {
            rusqlite::Error::InvalidColumnType(5, kind, rusqlite::types::Type::Text)
        })?;
        let value = match kind {
            ValueKind::Null => Value::Null,
            ValueKind::Text => Value::Text(row.get::<_, Option<String>>(6)?.unwrap_or_default()),
            ValueKind::Json => Value::Json(row.get::<_, Option<String>>(7)?.unwrap_or_default()),
            ValueKind::Blob => Value::Blob {
                mime_type: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                bytes: row.get::<_, Option<Vec<u8>>>(9)?.unwrap_or_default(),
            },
        };
        Ok(Self {
            scope: row.get(0)?,
            key: row.get(1)?,
            author_id: parse_uuid(&author_id, 2)?,
            usn: row.get(3)?,
            timestamp: parse_timestamp(&timestamp, 4)?,
            value,
        })
    }
}

const SELECT_ENTRY_COLUMNS: &str =
    "SELECT scope, key, author_id, usn, timestamp, type, text, json, blob_mime, blob FROM entry";
const SELECT_ENTRY_COLUMNS_WHERE: &str = "SELECT scope, key, author_id, usn, timestamp, type, text, json, blob_mime, blob FROM entry WHERE {cond}";

/// A promise that `(scope, key, author_id, usn)` has been superseded by
/// `(deleting_author_id, deleting_usn)` (spec.md §3 "Tombstone"). No
/// uniqueness beyond row identity — see spec.md §9.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    pub scope: String,
    pub key: String,
    pub author_id: Uuid,
    pub usn: i64,
    pub deleting_author_id: Uuid,
    pub deleting_usn: i64,
}

impl Tombstone {
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO tombstone (scope, key, author_id, usn, deleting_author_id, deleting_usn)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.scope,
                self.key,
                self.author_id.to_string(),
                self.usn,
                self.deleting_author_id.to_string(),
                self.deleting_usn,
            ],
        )?;
        Ok(())
    }

    /// Tombstones whose `deleting_author_id` has produced USNs beyond
    /// `since` (or all of that author's tombstones when `since` is `None`) —
    /// the per-author fetch used by merge step 6.
    pub fn find_by_deleter_since(
        conn: &Connection,
        deleting_author_id: Uuid,
        since: Option<i64>,
    ) -> Result<Vec<Self>> {
        let sql = match since {
            None => format!("{SELECT_TOMBSTONE_COLUMNS} WHERE deleting_author_id = ?1"),
            Some(_) => {
                format!("{SELECT_TOMBSTONE_COLUMNS} WHERE deleting_author_id = ?1 AND deleting_usn > ?2")
            }
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows: rusqlite::Result<Vec<Self>> = match since {
            None => stmt
                .query_map([deleting_author_id.to_string()], Self::from_row)?
                .collect(),
            Some(u) => stmt
                .query_map(params![deleting_author_id.to_string(), u], Self::from_row)?
                .collect(),
        };
        Ok(rows?)
    }

    /// Delete every tombstone at `(scope, key, author_id)` whose `usn` is
    /// strictly less than `below_usn` — the garbage-collection step that
    /// follows an incoming entry write (merge step 10, write step 3's
    /// counterpart during merge of a newer entry).
    pub fn gc_below(
        conn: &Connection,
        scope: &str,
        key: &str,
        author_id: Uuid,
        below_usn: i64,
    ) -> Result<()> {
        conn.execute(
            "DELETE FROM tombstone WHERE scope = ?1 AND key = ?2 AND author_id = ?3 AND usn < ?4",
            params![scope, key, author_id.to_string(), below_usn],
        )?;
        Ok(())
    }

    pub fn delete_all(conn: &Connection) -> Result<()> {
        conn.execute("DELETE FROM tombstone", [])?;
        Ok(())
    }

    pub fn count(conn: &Connection) -> Result<i64> {
        conn.query_row("SELECT COUNT(*) FROM tombstone", [], |row| row.get(0))
            .map_err(Into::into)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let author_id: String = row.get(2)?;
        let deleting_author_id: String = row.get(4)?;
        Ok(Self {
            scope: row.get(0)?,
            key: row.get(1)?,
            author_id: parse_uuid(&author_id, 2)?,
            usn: row.get(3)?,
            deleting_author_id: parse_uuid(&deleting_author_id, 4)?,
            deleting_usn: row.get(5)?,
        })
    }
}

const SELECT_TOMBSTONE_COLUMNS: &str =
    "SELECT scope, key, author_id, usn, deleting_author_id, deleting_usn FROM tombstone";

/// The file format stamp (spec.md §3 "Application identifier"). At most one
/// row; enforced in [`ApplicationIdentifier::set`] rather than in schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationIdentifier {
    pub id: String,
    pub major: u32,
    pub minor: u32,
    pub description: Option<String>,
}

impl ApplicationIdentifier {
    pub fn get(conn: &Connection) -> Result<Option<Self>> {
        let mut stmt =
            conn.prepare("SELECT id, major, minor, description FROM application_identifier")?;
        Ok(stmt
            .query_row([], |row| {
                Ok(Self {
                    id: row.get(0)?,
                    major: row.get(1)?,
                    minor: row.get(2)?,
                    description: row.get(3)?,
                })
            })
            .optional()?)
    }

    pub fn set(conn: &Connection, identifier: &Self) -> Result<()> {
        conn.execute("DELETE FROM application_identifier", [])?;
        conn.execute(
            "INSERT INTO application_identifier (id, major, minor, description) VALUES (?1, ?2, ?3, ?4)",
            params![
                identifier.id,
                identifier.major,
                identifier.minor,
                identifier.description,
            ],
        )?;
        Ok(())
    }
}

fn parse_uuid(s: &str, col: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

fn parse_timestamp(s: &str, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                col,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn author_round_trips() {
        let conn = open();
        let author = Author::new("local");
        author.insert(&conn).unwrap();
        let found = Author::find_by_id(&conn, author.id).unwrap().unwrap();
        assert_eq!(found, author);
    }

    #[test]
    fn entry_upsert_replaces_same_slot() {
        let conn = open();
        let author = Author::new("local");
        author.insert(&conn).unwrap();
        let mut entry = Entry {
            scope: "s".into(),
            key: "k".into(),
            author_id: author.id,
            usn: 1,
            timestamp: Utc::now(),
            value: Value::Text("v1".into()),
        };
        entry.upsert(&conn).unwrap();
        entry.usn = 2;
        entry.value = Value::Text("v2".into());
        entry.upsert(&conn).unwrap();

        let rows = Entry::find_by_slot(&conn, "s", "k").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, Value::Text("v2".into()));
    }

    #[test]
    fn tombstone_gc_below_removes_only_older() {
        let conn = open();
        let author = Author::new("local");
        author.insert(&conn).unwrap();
        let deleter = Author::new("deleter");
        deleter.insert(&conn).unwrap();

        let old = Tombstone {
            scope: "s".into(),
            key: "k".into(),
            author_id: author.id,
            usn: 1,
            deleting_author_id: deleter.id,
            deleting_usn: 1,
        };
        old.insert(&conn).unwrap();
        let newer = Tombstone {
            usn: 5,
            ..old.clone()
        };
        newer.insert(&conn).unwrap();

        Tombstone::gc_below(&conn, "s", "k", author.id, 3).unwrap();
        assert_eq!(Tombstone::count(&conn).unwrap(), 1);
    }

    #[test]
    fn application_identifier_set_replaces_prior_row() {
        let conn = open();
        ApplicationIdentifier::set(
            &conn,
            &ApplicationIdentifier {
                id: "app".into(),
                major: 1,
                minor: 0,
                description: None,
            },
        )
        .unwrap();
        ApplicationIdentifier::set(
            &conn,
            &ApplicationIdentifier {
                id: "app".into(),
                major: 1,
                minor: 1,
                description: None,
            },
        )
        .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM application_identifier", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(ApplicationIdentifier::get(&conn).unwrap().unwrap().minor, 1);
    }
}
