// src/query.rs

//! Query surface (spec.md §4.5): key listing, bulk reads, full-text search,
//! and statistics. All read-only, so every method here takes `&Store`.

use crate::db::models::{Author, Entry, Tombstone};
use crate::engine::{Statistics, Store};
use crate::error::Result;
use crate::observer::{ReadResult, Version};
use std::collections::BTreeMap;

/// `(scope, key) -> ReadResult`, the shape every bulk accessor below returns.
pub type BulkReadResult = BTreeMap<(String, String), ReadResult>;

fn group_entries(entries: Vec<Entry>) -> BulkReadResult {
    let mut grouped: BulkReadResult = BTreeMap::new();
    for entry in entries {
        grouped
            .entry((entry.scope.clone(), entry.key.clone()))
            .or_default()
            .0
            .push(Version {
                author_id: entry.author_id,
                timestamp: entry.timestamp,
                value: entry.value,
            });
    }
    grouped
}

impl Store {
    /// `keys(scope?, key?)`: every `(scope, key)` carrying at least one
    /// non-null entry.
    pub fn keys(&self, scope: Option<&str>, key: Option<&str>) -> Result<Vec<(String, String)>> {
        Entry::list_keys(self.connection(), scope, key)
    }

    /// `bulk_read(scope?, key?)`.
    pub fn bulk_read(&self, scope: Option<&str>, key: Option<&str>) -> Result<BulkReadResult> {
        Ok(group_entries(Entry::find_all(self.connection(), scope, key)?))
    }

    /// `bulk_read(key_prefix)`, optionally scoped.
    pub fn bulk_read_by_prefix(&self, scope: Option<&str>, prefix: &str) -> Result<BulkReadResult> {
        Ok(group_entries(Entry::find_by_key_prefix(
            self.connection(),
            scope,
            prefix,
        )?))
    }

    /// `bulk_read(key_list)`: an explicit list of `(scope, key)` pairs.
    pub fn bulk_read_by_key_list(&self, keys: &[(String, String)]) -> Result<BulkReadResult> {
        let mut grouped = BulkReadResult::new();
        for (scope, key) in keys {
            let entries = Entry::find_by_slot(self.connection(), scope, key)?;
            if entries.is_empty() {
                continue;
            }
            let versions = entries
                .into_iter()
                .map(|e| Version {
                    author_id: e.author_id,
                    timestamp: e.timestamp,
                    value: e.value,
                })
                .collect();
            grouped.insert((scope.clone(), key.clone()), ReadResult(versions));
        }
        Ok(grouped)
    }

    /// `bulk_read(predicate)`: the predicate is evaluated once per entry
    /// row, with the row's scope/key and the version it would contribute.
    pub fn bulk_read_by_predicate(
        &self,
        predicate: impl Fn(&str, &str, &Version) -> bool,
    ) -> Result<BulkReadResult> {
        let mut grouped = BulkReadResult::new();
        for entry in Entry::find_all(self.connection(), None, None)? {
            let version = Version {
                author_id: entry.author_id,
                timestamp: entry.timestamp,
                value: entry.value,
            };
            if predicate(&entry.scope, &entry.key, &version) {
                grouped
                    .entry((entry.scope.clone(), entry.key.clone()))
                    .or_default()
                    .0
                    .push(version);
            }
        }
        Ok(grouped)
    }

    /// `search_text(query)`: consult the full-text index, return matching
    /// `(scope, key)` pairs.
    pub fn search_text(&self, query: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self.connection().prepare(
            "SELECT DISTINCT e.scope, e.key
             FROM entry_full_text f
             JOIN entry e ON e.rowid = f.rowid
             WHERE entry_full_text MATCH ?1
             ORDER BY e.scope, e.key",
        )?;
        let rows = stmt
            .query_map([query], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        Ok(rows)
    }

    /// `statistics`: entry/author/tombstone counts and the consistency flag.
    pub fn statistics(&self) -> Result<Statistics> {
        let entry_count: i64 = self
            .connection()
            .query_row("SELECT COUNT(*) FROM entry", [], |row| row.get(0))?;
        let author_count = Author::list_all(self.connection())?.len() as i64;
        let tombstone_count = Tombstone::count(self.connection())?;
        let consistent = self.consistency_check()?;

        Ok(Statistics {
            entry_count,
            author_count,
            tombstone_count,
            consistent,
        })
    }
}
