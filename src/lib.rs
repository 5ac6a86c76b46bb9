// src/lib.rs

//! driftdb
//!
//! An embedded key-value store whose defining property is that independent
//! replicas can be edited offline and later merged into a consistent
//! result without data loss. It is a file format, not a service: a single
//! SQLite-backed file that travels through cloud storage and is reconciled
//! when conflicting copies arrive.
//!
//! # Architecture
//!
//! - `value` / `vvec`: the tagged value type and the per-author version
//!   vector the merge protocol is built on.
//! - `db`: persistent schema (`db::schema`) and row structs (`db::models`)
//!   for the four relations — entry, author, tombstone, application
//!   identifier — plus the full-text index.
//! - `gate`: the application-version compatibility gate enforced on every
//!   open and on merge.
//! - `engine`: [`Store`], the CRDT write path, merge, erase-version-history,
//!   backup, and dominance.
//! - `query`: the read-only query surface — key listing, bulk reads,
//!   full-text search, statistics.
//! - `observer`: read results and the hot/cold change-notification streams.

pub mod db;
mod engine;
mod error;
pub mod gate;
pub mod observer;
mod query;
pub mod value;
pub mod vvec;

pub use engine::{MergeReport, Statistics, Store};
pub use error::{Error, Result};
pub use gate::ApplicationId;
pub use observer::{ChangeEvent, ChangeObserver, Filter, ReadObserver, ReadResult, Version};
pub use query::BulkReadResult;
pub use value::{Value, ValueKind};
