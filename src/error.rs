// src/error.rs

use thiserror::Error;

/// Core error type for driftdb.
///
/// Each variant is a distinct failure mode named in the spec; there are no
/// implicit conversions between variants, and only the storage substrate's
/// own errors get wrapped automatically.
#[derive(Error, Debug)]
pub enum Error {
    /// The file records schema migrations this build does not know about.
    #[error("database schema is newer than this build understands")]
    SchemaTooNew,

    /// Stored application data's major version exceeds the caller's expected major version.
    #[error(
        "stored application data (major {stored_major}) is newer than expected (major {expected_major})"
    )]
    ApplicationDataTooNew {
        stored_major: u32,
        expected_major: u32,
    },

    /// Stored application identifier does not match the caller's expected identifier.
    #[error("database belongs to a different application (stored {stored}, expected {expected})")]
    IncompatibleApplications { stored: String, expected: String },

    /// Merge source's application identifier is incompatible with the local expected version.
    #[error("merge source is from an incompatible application")]
    MergeSourceIncompatible,

    /// Merge source is newer than local and an upgrade is possible; caller must upgrade first.
    #[error("merge source requires a newer application version; upgrade before merging")]
    MergeSourceRequiresUpgrade,

    /// A single-value accessor (.text / .json / .blob / .is_deleted) was called on a
    /// multi-version read result.
    #[error("key has multiple concurrent versions; caller must resolve the conflict")]
    VersionConflict,

    /// Attempted to write a JSON value whose payload does not parse as JSON.
    #[error("value is not valid JSON")]
    InvalidJson,

    /// A post-condition check found the author-table-consistency invariant violated.
    #[error("author-table consistency invariant violated; recommend erase_version_history")]
    AuthorTableInconsistency,

    /// Underlying SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error opening, copying, or migrating the database file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using driftdb's `Error`.
pub type Result<T> = std::result::Result<T, Error>;
