// src/vvec.rs

//! Version vectors: a per-author map of the highest USN this replica has
//! observed from that author.
//!
//! Equality of authors in the vector is always by id; the human-readable
//! `name` carried on author records is metadata and never enters comparisons
//! here (spec.md §4.2).

use std::collections::BTreeMap;
use uuid::Uuid;

/// A mapping from author id to the largest USN seen from that author.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionVector(BTreeMap<Uuid, i64>);

impl VersionVector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Uuid, i64)>) -> Self {
        Self(pairs.into_iter().collect())
    }

    pub fn get(&self, author: &Uuid) -> Option<i64> {
        self.0.get(author).copied()
    }

    pub fn set(&mut self, author: Uuid, usn: i64) {
        self.0.insert(author, usn);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &i64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True iff for every `(author, usn)` in `other`, `self` has `usn' >= usn`.
    /// A vector dominates itself.
    pub fn dominates(&self, other: &VersionVector) -> bool {
        other
            .0
            .iter()
            .all(|(author, usn)| self.get(author).is_some_and(|local| local >= *usn))
    }

    /// For every author in `other` whose USN there exceeds what `self` has (or
    /// is missing locally), returns `(author, self's usn or None)`. This is the
    /// set of authors whose records `self` still needs to fetch from `other`.
    pub fn need_list(&self, other: &VersionVector) -> Vec<(Uuid, Option<i64>)> {
        other
            .0
            .iter()
            .filter_map(|(author, their_usn)| {
                let local = self.get(author);
                match local {
                    Some(local_usn) if local_usn >= *their_usn => None,
                    _ => Some((*author, local)),
                }
            })
            .collect()
    }

    /// Destructively folds `other` into `self`: `self[a] := max(self[a], other[a])`.
    pub fn union(&mut self, other: &VersionVector) {
        for (author, usn) in other.0.iter() {
            let entry = self.0.entry(*author).or_insert(0);
            if *usn > *entry {
                *entry = *usn;
            }
        }
    }
}
