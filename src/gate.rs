// src/gate.rs

//! Application-version gate (spec.md §4.4): every open compares the
//! caller's *expected* application identifier against the one stamped in
//! the file, and decides whether to open outright, run an upgrade callback
//! and re-stamp, or refuse.

use crate::db::models::ApplicationIdentifier;
use crate::error::{Error, Result};
use rusqlite::Connection;

/// The identifier an embedding application expects to find (or stamp) in a
/// driftdb file. Distinct from [`ApplicationIdentifier`], the stored row:
/// this is supplied by the caller at [`crate::Store::open`] time.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationId {
    pub id: String,
    pub major: u32,
    pub minor: u32,
    pub description: Option<String>,
}

impl ApplicationId {
    pub fn new(id: impl Into<String>, major: u32, minor: u32) -> Self {
        Self {
            id: id.into(),
            major,
            minor,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn as_stored(&self) -> ApplicationIdentifier {
        ApplicationIdentifier {
            id: self.id.clone(),
            major: self.major,
            minor: self.minor,
            description: self.description.clone(),
        }
    }
}

/// Whether opening stamped the file (first open, or an upgrade) or found it
/// already current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Stamped,
    AlreadyCurrent,
}

/// Run the open-time gate of spec.md §4.4's table. `upgrade` is invoked
/// exactly once, with the previously-stored identifier (`None` on a brand
/// new file), whenever an upgrade is warranted; it runs inside the caller's
/// transaction so a failed upgrade leaves nothing stamped.
pub fn gate_open<F>(conn: &Connection, expected: &ApplicationId, mut upgrade: F) -> Result<GateOutcome>
where
    F: FnMut(&Connection, Option<&ApplicationIdentifier>) -> Result<()>,
{
    let stored = ApplicationIdentifier::get(conn)?;
    match &stored {
        None => {
            upgrade(conn, None)?;
            ApplicationIdentifier::set(conn, &expected.as_stored())?;
            Ok(GateOutcome::Stamped)
        }
        Some(s) if s.id != expected.id => Err(Error::IncompatibleApplications {
            stored: s.id.clone(),
            expected: expected.id.clone(),
        }),
        Some(s) if s.major > expected.major => Err(Error::ApplicationDataTooNew {
            stored_major: s.major,
            expected_major: expected.major,
        }),
        Some(s) if (s.major, s.minor) < (expected.major, expected.minor) => {
            upgrade(conn, stored.as_ref())?;
            ApplicationIdentifier::set(conn, &expected.as_stored())?;
            Ok(GateOutcome::Stamped)
        }
        Some(_) => Ok(GateOutcome::AlreadyCurrent),
    }
}

/// Gate enforced on merge (spec.md §4.4, final paragraph): the *source*
/// replica's stamped identifier is checked against the local expected
/// version. A source with no stamp yet (nothing ever wrote application
/// data to it) is treated as compatible — there's nothing to conflict with.
pub fn check_merge_source(
    expected: &ApplicationId,
    source_stored: Option<&ApplicationIdentifier>,
) -> Result<()> {
    let Some(stored) = source_stored else {
        return Ok(());
    };
    if stored.id != expected.id {
        return Err(Error::MergeSourceIncompatible);
    }
    if (stored.major, stored.minor) > (expected.major, expected.minor) {
        return Err(Error::MergeSourceRequiresUpgrade);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn first_open_stamps_and_runs_upgrade_once() {
        let conn = db::open_in_memory().unwrap();
        let expected = ApplicationId::new("com.example.app", 1, 0);
        let mut upgrade_calls = 0;
        let outcome = gate_open(&conn, &expected, |_, prior| {
            upgrade_calls += 1;
            assert!(prior.is_none());
            Ok(())
        })
        .unwrap();
        assert_eq!(outcome, GateOutcome::Stamped);
        assert_eq!(upgrade_calls, 1);
        assert_eq!(
            ApplicationIdentifier::get(&conn).unwrap().unwrap().major,
            1
        );
    }

    #[test]
    fn reopen_at_same_version_skips_upgrade() {
        let conn = db::open_in_memory().unwrap();
        let expected = ApplicationId::new("com.example.app", 1, 0);
        gate_open(&conn, &expected, |_, _| Ok(())).unwrap();
        let mut upgrade_calls = 0;
        let outcome = gate_open(&conn, &expected, |_, _| {
            upgrade_calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(outcome, GateOutcome::AlreadyCurrent);
        assert_eq!(upgrade_calls, 0);
    }

    #[test]
    fn minor_upgrade_runs_callback_and_restamps() {
        let conn = db::open_in_memory().unwrap();
        gate_open(&conn, &ApplicationId::new("com.example.app", 1, 0), |_, _| Ok(())).unwrap();
        let mut upgrade_calls = 0;
        let outcome = gate_open(&conn, &ApplicationId::new("com.example.app", 1, 1), |_, prior| {
            upgrade_calls += 1;
            assert_eq!(prior.unwrap().minor, 0);
            Ok(())
        })
        .unwrap();
        assert_eq!(outcome, GateOutcome::Stamped);
        assert_eq!(upgrade_calls, 1);
    }

    #[test]
    fn stored_major_newer_than_expected_fails() {
        let conn = db::open_in_memory().unwrap();
        gate_open(&conn, &ApplicationId::new("com.example.app", 2, 0), |_, _| Ok(())).unwrap();
        let err = gate_open(&conn, &ApplicationId::new("com.example.app", 1, 0), |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, Error::ApplicationDataTooNew { .. }));
    }

    #[test]
    fn different_application_id_fails() {
        let conn = db::open_in_memory().unwrap();
        gate_open(&conn, &ApplicationId::new("com.example.app", 1, 0), |_, _| Ok(())).unwrap();
        let err = gate_open(&conn, &ApplicationId::new("com.example.other", 1, 0), |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, Error::IncompatibleApplications { .. }));
    }

    #[test]
    fn merge_source_requires_upgrade_when_newer() {
        let local = ApplicationId::new("com.example.app", 1, 0);
        let source_stored = ApplicationIdentifier {
            id: "com.example.app".into(),
            major: 1,
            minor: 2,
            description: None,
        };
        let err = check_merge_source(&local, Some(&source_stored)).unwrap_err();
        assert!(matches!(err, Error::MergeSourceRequiresUpgrade));
    }

    #[test]
    fn merge_source_incompatible_on_different_id() {
        let local = ApplicationId::new("com.example.app", 1, 0);
        let source_stored = ApplicationIdentifier {
            id: "com.example.other".into(),
            major: 1,
            minor: 0,
            description: None,
        };
        let err = check_merge_source(&local, Some(&source_stored)).unwrap_err();
        assert!(matches!(err, Error::MergeSourceIncompatible));
    }

    #[test]
    fn merge_source_with_no_stamp_is_compatible() {
        let local = ApplicationId::new("com.example.app", 1, 0);
        assert!(check_merge_source(&local, None).is_ok());
    }
}
