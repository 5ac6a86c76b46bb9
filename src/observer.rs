// src/observer.rs

//! Read results, and the two change-notification flavors of spec.md §4.5 /
//! §9: a "cold" [`ChangeObserver`] that forwards individual committed
//! deltas, and a "hot" [`ReadObserver`] that re-yields the full matching
//! set on every relevant commit.
//!
//! Both ride the same `crossbeam-channel` fan-out the engine's post-commit
//! hook feeds (`Store::notify`). Per spec.md §9, slow consumers drop rather
//! than block the committing thread: channels are bounded and sent with
//! `try_send`.

use crate::value::Value;
use chrono::{DateTime, Utc};
use std::ops::Deref;
use uuid::Uuid;

use crate::error::{Error, Result};

/// One author's live value at a key, as returned by [`crate::Store::read`].
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    pub author_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

/// The full multi-value-register read result for a `(scope, key)`
/// (spec.md §4.3 "Read"). Empty means never written; a single `Null`-typed
/// version means deleted; more than one means an unresolved conflict.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResult(pub Vec<Version>);

impl Deref for ReadResult {
    type Target = Vec<Version>;
    fn deref(&self) -> &Vec<Version> {
        &self.0
    }
}

impl FromIterator<Version> for ReadResult {
    fn from_iter<I: IntoIterator<Item = Version>>(iter: I) -> Self {
        ReadResult(iter.into_iter().collect())
    }
}

impl ReadResult {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn single(&self) -> Result<Option<&Version>> {
        match self.0.len() {
            0 => Ok(None),
            1 => Ok(Some(&self.0[0])),
            _ => Err(Error::VersionConflict),
        }
    }

    pub fn text(&self) -> Result<Option<&str>> {
        Ok(self.single()?.and_then(|v| v.value.as_text()))
    }

    pub fn json(&self) -> Result<Option<&str>> {
        Ok(self.single()?.and_then(|v| v.value.as_json()))
    }

    pub fn blob(&self) -> Result<Option<(&str, &[u8])>> {
        Ok(self.single()?.and_then(|v| v.value.as_blob()))
    }

    /// True iff the result contains exactly one version and it is `Null`.
    /// Fails with [`Error::VersionConflict`] on multiple versions, matching
    /// the other single-value accessors.
    pub fn is_deleted(&self) -> Result<bool> {
        Ok(self.single()?.is_some_and(|v| v.value.is_null()))
    }
}

/// Selects which `(scope, key)` pairs a [`ReadObserver`] or bulk read
/// tracks. Mirrors the overload set of spec.md §4.5's `bulk_read`.
#[derive(Debug, Clone)]
pub enum Filter {
    All,
    Scope(String),
    Key(String),
    ScopeKey(String, String),
    KeyPrefix {
        scope: Option<String>,
        prefix: String,
    },
}

impl Filter {
    pub fn matches(&self, scope: &str, key: &str) -> bool {
        match self {
            Filter::All => true,
            Filter::Scope(s) => s == scope,
            Filter::Key(k) => k == key,
            Filter::ScopeKey(s, k) => s == scope && k == key,
            Filter::KeyPrefix { scope: s, prefix } => {
                s.as_deref().is_none_or(|s| s == scope) && key.starts_with(prefix.as_str())
            }
        }
    }
}

/// A single committed delta, as delivered to cold observers.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub scope: String,
    pub key: String,
    pub versions: ReadResult,
}

const CHANNEL_CAPACITY: usize = 256;

/// The engine's post-commit fan-out. One hub per open [`crate::Store`];
/// every write, bulk write, and merge pushes through it after its
/// transaction commits (spec.md §5 "synchronously on the thread that
/// committed").
#[derive(Default)]
pub struct ObserverHub {
    subscribers: Vec<crossbeam_channel::Sender<ChangeEvent>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(&mut self) -> crossbeam_channel::Receiver<ChangeEvent> {
        let (tx, rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        self.subscribers.push(tx);
        rx
    }

    /// Fan out one event to every live subscriber. A full channel (a slow
    /// consumer) drops the event for that subscriber rather than blocking.
    pub fn publish(&mut self, event: ChangeEvent) {
        self.subscribers.retain(|tx| {
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(crossbeam_channel::TrySendError::Full(_)) => true,
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
            }
        });
    }
}

/// A cold observer: forwards each committed delta as it happens. Backed by
/// a bounded channel so a slow consumer simply misses events instead of
/// stalling the writer.
pub struct ChangeObserver {
    rx: crossbeam_channel::Receiver<ChangeEvent>,
}

impl ChangeObserver {
    pub(crate) fn new(hub: &mut ObserverHub) -> Self {
        Self {
            rx: hub.subscribe(),
        }
    }

    /// Block for the next committed delta. Returns `None` once the owning
    /// `Store` has been dropped.
    pub fn recv(&self) -> Option<ChangeEvent> {
        self.rx.recv().ok()
    }

    /// Non-blocking poll for a pending delta.
    pub fn try_recv(&self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

/// A hot observer: on subscription, and after every commit that touches its
/// matched region, re-yields the *full* current matching set rather than
/// an incremental delta.
pub struct ReadObserver {
    filter: Filter,
    rx: crossbeam_channel::Receiver<ChangeEvent>,
    yielded_initial: bool,
}

impl ReadObserver {
    pub(crate) fn new(hub: &mut ObserverHub, filter: Filter) -> Self {
        Self {
            filter,
            rx: hub.subscribe(),
            yielded_initial: false,
        }
    }

    /// True exactly once, the first time this observer is polled: the
    /// caller should fetch-and-yield the current matching set immediately
    /// on subscription, per spec.md §4.5.
    pub fn needs_initial_yield(&mut self) -> bool {
        if self.yielded_initial {
            false
        } else {
            self.yielded_initial = true;
            true
        }
    }

    /// Block until a commit touches this observer's matched region, then
    /// return the `(scope, key)` that changed so the caller can re-query
    /// the full current set for it. Returns `None` once the store is
    /// dropped.
    pub fn next_touch(&self) -> Option<(String, String)> {
        loop {
            let event = self.rx.recv().ok()?;
            if self.filter.matches(&event.scope, &event.key) {
                return Some((event.scope, event.key));
            }
        }
    }
}
