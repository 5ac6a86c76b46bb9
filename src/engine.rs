// src/engine.rs

//! The reconciliation engine (spec.md §4.3): `Store` is the single entry
//! point embedding applications hold. It owns one SQLite connection, the
//! local session's cached author row, and the change-notification fan-out.
//!
//! Per spec.md §9 "Author identity vs. session identity", each [`Store::open`]
//! mints a *new* author id — the canonical implementation treats every open
//! as a fresh write session rather than maintaining a per-device stable id.

use crate::db::models::{ApplicationIdentifier, Author, Entry, Tombstone};
use crate::db;
use crate::error::{Error, Result};
use crate::gate::{self, ApplicationId, GateOutcome};
use crate::observer::{ChangeEvent, ChangeObserver, Filter, ObserverHub, ReadObserver, ReadResult, Version};
use crate::value::Value;
use crate::vvec::VersionVector;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// The outcome of a merge (spec.md §4.3 step 12): every `(scope, key)` whose
/// entries changed, plus whether any of those keys still carry more than
/// one live version after the merge (a surviving multi-value-register
/// conflict the caller must resolve).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub changed: Vec<(String, String)>,
    pub has_conflicts: bool,
}

/// Entry/author/tombstone counts plus the consistency flag (spec.md §4.5
/// "statistics").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub entry_count: i64,
    pub author_count: i64,
    pub tombstone_count: i64,
    pub consistent: bool,
}

/// An embedded, offline-mergeable key-value store (spec.md §1).
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
    local_author: Author,
    expected_app: ApplicationId,
    hub: ObserverHub,
}

impl Store {
    /// Open (creating if absent) the driftdb file at `path`. `session_name`
    /// is the human-readable hint attached to the new author record minted
    /// for this open; `upgrade` runs per the gate of spec.md §4.4 when the
    /// stored application data needs to catch up to `expected`.
    pub fn open(
        path: impl AsRef<Path>,
        expected: ApplicationId,
        session_name: impl Into<String>,
        upgrade: impl FnMut(&Connection, Option<&ApplicationIdentifier>) -> Result<()>,
    ) -> Result<Self> {
        let conn = db::open_connection(path.as_ref())?;
        Self::finish_open(conn, Some(path.as_ref().to_path_buf()), expected, session_name, upgrade)
    }

    /// Open a private in-memory store. Used by tests and by callers who
    /// want a scratch replica to merge into/from.
    pub fn open_in_memory(
        expected: ApplicationId,
        session_name: impl Into<String>,
        upgrade: impl FnMut(&Connection, Option<&ApplicationIdentifier>) -> Result<()>,
    ) -> Result<Self> {
        let conn = db::open_in_memory()?;
        Self::finish_open(conn, None, expected, session_name, upgrade)
    }

    fn finish_open(
        mut conn: Connection,
        path: Option<PathBuf>,
        expected: ApplicationId,
        session_name: impl Into<String>,
        mut upgrade: impl FnMut(&Connection, Option<&ApplicationIdentifier>) -> Result<()>,
    ) -> Result<Self> {
        let tx = conn.transaction()?;
        gate::gate_open(&tx, &expected, |c, prior| upgrade(c, prior))?;
        let local_author = Author::new(session_name);
        local_author.insert(&tx)?;
        tx.commit()?;

        Ok(Self {
            conn,
            path,
            local_author,
            expected_app: expected,
            hub: ObserverHub::new(),
        })
    }

    /// This replica's own author id, for diagnostics and tests.
    pub fn local_author_id(&self) -> Uuid {
        self.local_author.id
    }

    /// The underlying connection, for the query surface in `crate::query`.
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn version_vector(&self) -> Result<VersionVector> {
        version_vector_of(&self.conn)
    }

    fn after_commit(&mut self, events: Vec<ChangeEvent>) {
        for event in events {
            self.hub.publish(event);
        }
    }

    fn read_result(&self, scope: &str, key: &str) -> Result<ReadResult> {
        let rows = Entry::find_by_slot(&self.conn, scope, key)?;
        Ok(rows
            .into_iter()
            .map(|e| Version {
                author_id: e.author_id,
                timestamp: e.timestamp,
                value: e.value,
            })
            .collect())
    }

    /// Write `value` to `(scope, key)` from the local session (spec.md
    /// §4.3 "Write path"). Returns the resulting read result so callers
    /// don't need a separate round trip for the common case.
    pub fn write(&mut self, scope: &str, key: &str, value: Value) -> Result<ReadResult> {
        if let Value::Json(payload) = &value {
            validate_json(&self.conn, payload)?;
        }

        let new_usn = self.local_author.usn + 1;
        let now = chrono::Utc::now();
        let local_id = self.local_author.id;

        let tx = self.conn.transaction()?;
        {
            let mut author = self.local_author.clone();
            author.usn = new_usn;
            author.timestamp = now;
            author.update(&tx)?;

            for other in Entry::find_others_at_slot(&tx, scope, key, local_id)? {
                Tombstone {
                    scope: scope.to_string(),
                    key: key.to_string(),
                    author_id: other.author_id,
                    usn: other.usn,
                    deleting_author_id: local_id,
                    deleting_usn: new_usn,
                }
                .insert(&tx)?;
                Entry::delete(&tx, scope, key, other.author_id)?;
            }

            Entry {
                scope: scope.to_string(),
                key: key.to_string(),
                author_id: local_id,
                usn: new_usn,
                timestamp: now,
                value,
            }
            .upsert(&tx)?;
        }
        tx.commit()?;

        self.local_author.usn = new_usn;
        self.local_author.timestamp = now;

        self.verify_consistency()?;
        let result = self.read_result(scope, key)?;
        let event = ChangeEvent {
            scope: scope.to_string(),
            key: key.to_string(),
            versions: result.clone(),
        };
        self.after_commit(vec![event]);
        Ok(result)
    }

    pub fn write_text(&mut self, scope: &str, key: &str, text: impl Into<String>) -> Result<ReadResult> {
        self.write(scope, key, Value::Text(text.into()))
    }

    pub fn write_json(&mut self, scope: &str, key: &str, json: impl Into<String>) -> Result<ReadResult> {
        self.write(scope, key, Value::Json(json.into()))
    }

    pub fn write_blob(
        &mut self,
        scope: &str,
        key: &str,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<ReadResult> {
        self.write(
            scope,
            key,
            Value::Blob {
                mime_type: mime_type.into(),
                bytes,
            },
        )
    }

    /// Equivalent to writing [`Value::Null`] (spec.md §4.3 "Delete").
    pub fn delete(&mut self, scope: &str, key: &str) -> Result<ReadResult> {
        self.write(scope, key, Value::Null)
    }

    /// Bulk write: steps 1 and 4 run once per input, step 3 once per key,
    /// all within one transaction (spec.md §4.3 "Bulk writes").
    pub fn bulk_write(&mut self, writes: Vec<(String, String, Value)>) -> Result<Vec<ReadResult>> {
        for (_, _, value) in &writes {
            if let Value::Json(payload) = value {
                validate_json(&self.conn, payload)?;
            }
        }

        let now = chrono::Utc::now();
        let local_id = self.local_author.id;
        let mut new_usn = self.local_author.usn;

        let tx = self.conn.transaction()?;
        for (scope, key, value) in &writes {
            new_usn += 1;
            for other in Entry::find_others_at_slot(&tx, scope, key, local_id)? {
                Tombstone {
                    scope: scope.clone(),
                    key: key.clone(),
                    author_id: other.author_id,
                    usn: other.usn,
                    deleting_author_id: local_id,
                    deleting_usn: new_usn,
                }
                .insert(&tx)?;
                Entry::delete(&tx, scope, key, other.author_id)?;
            }
            Entry {
                scope: scope.clone(),
                key: key.clone(),
                author_id: local_id,
                usn: new_usn,
                timestamp: now,
                value: value.clone(),
            }
            .upsert(&tx)?;
        }
        {
            let mut author = self.local_author.clone();
            author.usn = new_usn;
            author.timestamp = now;
            author.update(&tx)?;
        }
        tx.commit()?;

        self.local_author.usn = new_usn;
        self.local_author.timestamp = now;
        self.verify_consistency()?;

        let mut results = Vec::with_capacity(writes.len());
        let mut events = Vec::with_capacity(writes.len());
        for (scope, key, _) in &writes {
            let result = self.read_result(scope, key)?;
            events.push(ChangeEvent {
                scope: scope.clone(),
                key: key.clone(),
                versions: result.clone(),
            });
            results.push(result);
        }
        self.after_commit(events);
        Ok(results)
    }

    /// `read(scope, key)` (spec.md §4.3 "Read").
    pub fn read(&self, scope: &str, key: &str) -> Result<ReadResult> {
        self.read_result(scope, key)
    }

    /// `D.dominates(S)` (spec.md §4.3 "Dominance").
    pub fn dominates(&self, other: &Store) -> Result<bool> {
        Ok(self.version_vector()?.dominates(&other.version_vector()?))
    }

    /// Post-write/merge invariant check (spec.md §4.3 "Consistency check",
    /// §3 invariant 1): for every author, the highest `usn` on any of their
    /// entries must not exceed the `usn` recorded on their author row.
    pub fn consistency_check(&self) -> Result<bool> {
        for author in Author::list_all(&self.conn)? {
            if let Some(max_entry_usn) = Author::max_entry_usn(&self.conn, author.id)? {
                if max_entry_usn > author.usn {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn verify_consistency(&self) -> Result<()> {
        if self.consistency_check()? {
            Ok(())
        } else {
            warn!("author-table consistency invariant violated");
            Err(Error::AuthorTableInconsistency)
        }
    }

    /// Merge `source` into `self` (spec.md §4.3 "Merge"), applying steps
    /// 1-11 and returning the change set of step 12.
    pub fn merge(&mut self, source: &Store) -> Result<MergeReport> {
        self.run_merge(source)
    }

    /// Compute what [`Store::merge`] would change without applying it
    /// (spec.md §4.3 "A dry-run merge").
    pub fn merge_dry_run(&self, source: &Store) -> Result<MergeReport> {
        if !self.consistency_check()? {
            return Err(Error::AuthorTableInconsistency);
        }
        if !source.consistency_check()? {
            return Err(Error::AuthorTableInconsistency);
        }
        gate::check_merge_source(&self.expected_app, ApplicationIdentifier::get(&source.conn)?.as_ref())?;

        let transfer = compute_transfer(&self.conn, &source.conn)?;
        let mut changed: HashSet<(String, String)> = HashSet::new();
        for t in &transfer.tombstones {
            changed.insert((t.scope.clone(), t.key.clone()));
        }
        for e in &transfer.entries {
            changed.insert((e.scope.clone(), e.key.clone()));
        }
        let mut changed: Vec<_> = changed.into_iter().collect();
        changed.sort();
        Ok(MergeReport {
            changed,
            has_conflicts: false,
        })
    }

    fn run_merge(&mut self, source: &Store) -> Result<MergeReport> {
        if !self.consistency_check()? {
            return Err(Error::AuthorTableInconsistency);
        }
        if !source.consistency_check()? {
            return Err(Error::AuthorTableInconsistency);
        }
        gate::check_merge_source(&self.expected_app, ApplicationIdentifier::get(&source.conn)?.as_ref())?;

        let transfer = compute_transfer(&self.conn, &source.conn)?;
        let local_id = self.local_author.id;
        let tx = self.conn.transaction()?;
        apply_authors(&tx, local_id, &transfer.source_authors)?;

        let mut changed: HashSet<(String, String)> = HashSet::new();

        // Tombstones before entries: a same-slot tombstone that an incoming
        // entry would immediately obsolete must land first (spec.md §4.3
        // "Ordering").
        for t in &transfer.tombstones {
            if let Some(existing) = Entry::find_one(&tx, &t.scope, &t.key, t.author_id)? {
                if existing.usn <= t.usn {
                    Entry::delete(&tx, &t.scope, &t.key, t.author_id)?;
                    t.insert(&tx)?;
                    changed.insert((t.scope.clone(), t.key.clone()));
                }
            }
        }

        for e in &transfer.entries {
            e.upsert(&tx)?;
            Tombstone::gc_below(&tx, &e.scope, &e.key, e.author_id, e.usn)?;
            changed.insert((e.scope.clone(), e.key.clone()));
        }

        if let Some(refreshed) = Author::find_by_id(&tx, local_id)? {
            self.local_author = refreshed;
        }
        tx.commit()?;

        self.verify_consistency()?;

        let mut changed: Vec<_> = changed.into_iter().collect();
        changed.sort();

        let mut has_conflicts = false;
        let mut events = Vec::with_capacity(changed.len());
        for (scope, key) in &changed {
            let result = self.read_result(scope, key)?;
            if result.len() > 1 {
                has_conflicts = true;
            }
            events.push(ChangeEvent {
                scope: scope.clone(),
                key: key.clone(),
                versions: result,
            });
        }
        self.after_commit(events);

        Ok(MergeReport {
            changed,
            has_conflicts,
        })
    }

    /// Collapse to a single-author replica with no history (spec.md §4.3
    /// "Erase version history"). When a key still carries more than one
    /// live version, the highest-`usn` version wins — there is no author
    /// left to hold the others once every author but the local one is
    /// deleted.
    pub fn erase_version_history(&mut self) -> Result<()> {
        let local_id = self.local_author.id;
        let new_usn = self.local_author.usn + 1;
        let now = chrono::Utc::now();

        let tx = self.conn.transaction()?;
        Tombstone::delete_all(&tx)?;
        {
            let mut author = self.local_author.clone();
            author.usn = new_usn;
            author.timestamp = now;
            author.update(&tx)?;
        }

        let mut by_slot: BTreeMap<(String, String), Vec<Entry>> = BTreeMap::new();
        for entry in Entry::find_all(&tx, None, None)? {
            by_slot
                .entry((entry.scope.clone(), entry.key.clone()))
                .or_default()
                .push(entry);
        }
        for ((scope, key), mut versions) in by_slot {
            versions.sort_by(|a, b| a.usn.cmp(&b.usn).then(a.author_id.cmp(&b.author_id)));
            let winner = versions.pop().expect("each group has at least one entry");
            for leftover in &versions {
                Entry::delete(&tx, &leftover.scope, &leftover.key, leftover.author_id)?;
            }
            Entry::delete(&tx, &scope, &key, winner.author_id)?;
            Entry {
                scope,
                key,
                author_id: local_id,
                usn: new_usn,
                timestamp: now,
                value: winner.value,
            }
            .upsert(&tx)?;
        }

        Author::delete_all_except(&tx, local_id)?;
        tx.commit()?;

        self.local_author.usn = new_usn;
        self.local_author.timestamp = now;
        self.verify_consistency()?;
        info!("erased version history; local author is now the sole author");
        Ok(())
    }

    /// A byte-for-byte copy of the store at `destination` via an atomic
    /// file replace (spec.md §4.3 "Backup"). Only file-backed stores can be
    /// backed up this way.
    pub fn backup(&self, destination: impl AsRef<Path>) -> Result<()> {
        let source_path = self
            .path
            .as_ref()
            .ok_or_else(|| Error::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "cannot back up an in-memory store",
            )))?;
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;

        let destination = destination.as_ref();
        let parent = destination.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        std::fs::copy(source_path, tmp.path())?;
        tmp.persist(destination)
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// A cold change-notification stream: each committed write, bulk
    /// write, or merge forwards its delta (spec.md §4.5 "change_observer").
    pub fn change_observer(&mut self) -> ChangeObserver {
        ChangeObserver::new(&mut self.hub)
    }

    /// A hot observer over `filter` (spec.md §4.5 "read_observer").
    pub fn read_observer(&mut self, filter: Filter) -> ReadObserver {
        ReadObserver::new(&mut self.hub, filter)
    }
}

fn version_vector_of(conn: &Connection) -> Result<VersionVector> {
    let authors = Author::list_all(conn)?;
    Ok(VersionVector::from_pairs(
        authors.into_iter().map(|a| (a.id, a.usn)),
    ))
}

struct Transfer {
    entries: Vec<Entry>,
    tombstones: Vec<Tombstone>,
    source_authors: Vec<Author>,
}

/// Steps 2-7 of spec.md §4.3 "Merge": compute what destination `dest_conn`
/// still needs from source `source_conn`.
fn compute_transfer(dest_conn: &Connection, source_conn: &Connection) -> Result<Transfer> {
    let dest_vector = version_vector_of(dest_conn)?;
    let source_vector = version_vector_of(source_conn)?;
    let needs = dest_vector.need_list(&source_vector);

    let mut entries = Vec::new();
    let mut tombstones = Vec::new();
    for (author_id, since) in &needs {
        entries.extend(Entry::find_by_author_since(source_conn, *author_id, *since)?);
        tombstones.extend(Tombstone::find_by_deleter_since(
            source_conn,
            *author_id,
            *since,
        )?);
    }

    let source_authors = Author::list_all(source_conn)?
        .into_iter()
        .filter(|a| needs.iter().any(|(id, _)| *id == a.id))
        .collect();

    Ok(Transfer {
        entries,
        tombstones,
        source_authors,
    })
}

/// Step 8: `V_D.union(V_S)`, persisting the updated author records while
/// preserving the local session's own name (spec.md §5 "Shared resources").
fn apply_authors(tx: &Connection, local_author_id: Uuid, source_authors: &[Author]) -> Result<()> {
    for source_author in source_authors {
        match Author::find_by_id(tx, source_author.id)? {
            Some(mut existing) if source_author.usn > existing.usn => {
                existing.usn = source_author.usn;
                if existing.id != local_author_id {
                    existing.name = source_author.name.clone();
                }
                if source_author.timestamp > existing.timestamp {
                    existing.timestamp = source_author.timestamp;
                }
                existing.update(tx)?;
            }
            Some(_) => {}
            None => source_author.insert(tx)?,
        }
    }
    Ok(())
}

/// Validate a JSON payload the way spec.md §9 prescribes: ask the storage
/// substrate's `json_valid` (SQLite's JSON1 extension) first, and only fall
/// back to `serde_json` if that function isn't compiled in.
fn validate_json(conn: &Connection, payload: &str) -> Result<()> {
    let ok = match conn.query_row::<i64, _, _>("SELECT json_valid(?1)", [payload], |row| row.get(0)) {
        Ok(valid) => valid != 0,
        Err(rusqlite::Error::SqliteFailure(_, Some(ref message)))
            if message.contains("no such function") =>
        {
            serde_json::from_str::<serde_json::Value>(payload).is_ok()
        }
        Err(e) => return Err(e.into()),
    };
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidJson)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(name: &str) -> Store {
        Store::open_in_memory(ApplicationId::new("com.example.app", 1, 0), name, |_, _| Ok(()))
            .unwrap()
    }

    #[test]
    fn write_then_read_returns_single_version() {
        let mut a = open_store("A");
        a.write_text("", "k", "v1").unwrap();
        let result = a.read("", "k").unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.text().unwrap(), Some("v1"));
    }

    #[test]
    fn second_local_write_replaces_first() {
        let mut a = open_store("A");
        a.write_text("", "k", "v1").unwrap();
        a.write_text("", "k", "v2").unwrap();
        let result = a.read("", "k").unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.text().unwrap(), Some("v2"));
    }

    #[test]
    fn concurrent_writes_merge_into_multi_value_register() {
        let mut a = open_store("A");
        let mut b = open_store("B");
        a.write_text("", "k", "a").unwrap();
        b.write_text("", "k", "b").unwrap();
        a.merge(&b).unwrap();
        let result = a.read("", "k").unwrap();
        let mut texts: Vec<_> = result.iter().filter_map(|v| v.value.as_text()).collect();
        texts.sort();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn resolving_by_overwrite_then_merge_collapses_peer() {
        let mut a = open_store("A");
        let mut b = open_store("B");
        a.write_text("", "k", "a").unwrap();
        b.write_text("", "k", "b").unwrap();
        a.merge(&b).unwrap();
        a.write_text("", "k", "resolved").unwrap();
        assert_eq!(a.read("", "k").unwrap().text().unwrap(), Some("resolved"));

        b.merge(&a).unwrap();
        assert_eq!(b.read("", "k").unwrap().text().unwrap(), Some("resolved"));
    }

    #[test]
    fn dominates_is_reflexive() {
        let a = open_store("A");
        assert!(a.dominates(&a).unwrap());
    }

    #[test]
    fn merge_establishes_dominance() {
        let mut a = open_store("A");
        let b = open_store("B");
        a.merge(&b).unwrap();
        assert!(a.dominates(&b).unwrap());
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = open_store("A");
        let mut b = open_store("B");
        b.write_text("", "k", "v").unwrap();
        let first = a.merge(&b).unwrap();
        let second = a.merge(&b).unwrap();
        assert_eq!(first.changed, vec![("".to_string(), "k".to_string())]);
        assert!(second.changed.is_empty());
    }

    #[test]
    fn delete_then_remote_write_produces_two_versions_after_merge() {
        let mut a = open_store("A");
        let mut b = open_store("B");
        a.write_text("", "k", "v1").unwrap();
        b.merge(&a).unwrap();
        b.delete("", "k").unwrap();
        a.write_text("", "k", "v2").unwrap();
        a.merge(&b).unwrap();

        let result = a.read("", "k").unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.iter().any(|v| v.value.is_null()));
        assert!(result.iter().any(|v| v.value.as_text() == Some("v2")));
    }

    #[test]
    fn scopes_are_isolated() {
        let mut a = open_store("A");
        a.write_text("scope1", "k", "x").unwrap();
        a.write_text("scope2", "k", "y").unwrap();
        assert_eq!(a.read("scope1", "k").unwrap().text().unwrap(), Some("x"));
        assert_eq!(a.read("scope2", "k").unwrap().text().unwrap(), Some("y"));
    }

    #[test]
    fn erase_version_history_keeps_current_values_drops_other_authors() {
        let mut a = open_store("A");
        let mut b = open_store("B");
        a.write_text("", "k1", "v1").unwrap();
        b.write_text("", "k2", "v2").unwrap();
        a.merge(&b).unwrap();

        a.erase_version_history().unwrap();
        assert_eq!(a.read("", "k1").unwrap().text().unwrap(), Some("v1"));
        assert_eq!(a.read("", "k2").unwrap().text().unwrap(), Some("v2"));

        let authors = Author::list_all(&a.conn).unwrap();
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].id, a.local_author_id());
    }

    #[test]
    fn erase_then_write_skips_a_usn_value() {
        let mut a = open_store("A");
        a.write_text("", "k", "v1").unwrap();
        let usn_before_erase = a.local_author.usn;
        a.erase_version_history().unwrap();
        assert_eq!(a.local_author.usn, usn_before_erase + 1);
        a.write_text("", "k", "v2").unwrap();
        assert_eq!(a.local_author.usn, usn_before_erase + 2);
    }

    #[test]
    fn invalid_json_is_rejected_before_mutation() {
        let mut a = open_store("A");
        let err = a.write_json("", "k", "{not json}").unwrap_err();
        assert!(matches!(err, Error::InvalidJson));
        assert!(a.read("", "k").unwrap().is_empty());
    }

    #[test]
    fn multi_version_accessor_fails_on_conflict() {
        let mut a = open_store("A");
        let mut b = open_store("B");
        a.write_text("", "k", "a").unwrap();
        b.write_text("", "k", "b").unwrap();
        a.merge(&b).unwrap();
        let err = a.read("", "k").unwrap().text().unwrap_err();
        assert!(matches!(err, Error::VersionConflict));
    }

    #[test]
    fn gate_rejects_incompatible_application() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.driftdb");
        Store::open(&path, ApplicationId::new("app.one", 1, 0), "A", |_, _| Ok(())).unwrap();
        let err = Store::open(&path, ApplicationId::new("app.two", 1, 0), "A", |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, Error::IncompatibleApplications { .. }));
    }

    #[test]
    fn round_trip_preserves_reads_and_bumps_usn_past_prior_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.driftdb");
        {
            let mut a = Store::open(&path, ApplicationId::new("app", 1, 0), "A", |_, _| Ok(())).unwrap();
            a.write_text("", "k", "v1").unwrap();
            a.write_text("", "k", "v2").unwrap();
        }
        let mut reopened =
            Store::open(&path, ApplicationId::new("app", 1, 0), "A2", |_, _| Ok(())).unwrap();
        assert_eq!(reopened.read("", "k").unwrap().text().unwrap(), Some("v2"));
        reopened.write_text("", "k", "v3").unwrap();
        assert_eq!(reopened.read("", "k").unwrap().text().unwrap(), Some("v3"));
    }

    #[test]
    fn change_observer_receives_write_delta() {
        let mut a = open_store("A");
        let observer = a.change_observer();
        a.write_text("", "k", "v1").unwrap();
        let event = observer.recv().unwrap();
        assert_eq!((event.scope.as_str(), event.key.as_str()), ("", "k"));
        assert_eq!(event.versions.text().unwrap(), Some("v1"));
    }

    #[test]
    fn read_observer_yields_full_set_on_touch() {
        let mut a = open_store("A");
        let mut observer = a.read_observer(Filter::Key("k".to_string()));
        assert!(observer.needs_initial_yield());
        assert!(!observer.needs_initial_yield());
        a.write_text("", "k", "v1").unwrap();
        let touched = observer.next_touch().unwrap();
        assert_eq!(touched, ("".to_string(), "k".to_string()));
        assert_eq!(a.read("", "k").unwrap().text().unwrap(), Some("v1"));
    }

    // Quantified invariants (spec.md §8 "for all sequences/pairs"), shaped
    // after the arb-helper-plus-proptest! blocks in
    // examples/vsevex-carry/engine/src/reconcile.rs's property_tests module.
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_text() -> impl Strategy<Value = String> {
            "[a-z]{1,6}"
        }

        fn arb_write() -> impl Strategy<Value = (String, String, String)> {
            (arb_text(), arb_text(), arb_text())
        }

        fn arb_writes() -> impl Strategy<Value = Vec<(String, String, String)>> {
            prop::collection::vec(arb_write(), 0..8)
        }

        fn apply(store: &mut Store, writes: &[(String, String, String)]) {
            for (scope, key, text) in writes {
                store.write_text(scope, key, text.clone()).unwrap();
            }
        }

        proptest! {
            #[test]
            fn dominance_is_reflexive_for_any_write_sequence(writes in arb_writes()) {
                let mut a = open_store("A");
                apply(&mut a, &writes);
                prop_assert!(a.dominates(&a).unwrap());
            }

            #[test]
            fn merge_establishes_dominance_for_any_pair_of_sequences(
                writes_a in arb_writes(),
                writes_b in arb_writes(),
            ) {
                let mut a = open_store("A");
                let mut b = open_store("B");
                apply(&mut a, &writes_a);
                apply(&mut b, &writes_b);
                a.merge(&b).unwrap();
                prop_assert!(a.dominates(&b).unwrap());
            }

            #[test]
            fn merge_is_idempotent_for_any_pair_of_sequences(
                writes_a in arb_writes(),
                writes_b in arb_writes(),
            ) {
                let mut a = open_store("A");
                let mut b = open_store("B");
                apply(&mut a, &writes_a);
                apply(&mut b, &writes_b);

                a.merge(&b).unwrap();
                let vv_after_first = a.version_vector().unwrap();
                let second = a.merge(&b).unwrap();
                let vv_after_second = a.version_vector().unwrap();

                prop_assert!(second.changed.is_empty());
                prop_assert_eq!(vv_after_first, vv_after_second);
            }

            #[test]
            fn merge_converges_regardless_of_direction(
                writes_a in arb_writes(),
                writes_b in arb_writes(),
            ) {
                let mut a = open_store("A");
                let mut b = open_store("B");
                apply(&mut a, &writes_a);
                apply(&mut b, &writes_b);

                a.merge(&b).unwrap();
                b.merge(&a).unwrap();

                prop_assert!(a.dominates(&b).unwrap());
                prop_assert!(b.dominates(&a).unwrap());
            }
        }
    }
}
