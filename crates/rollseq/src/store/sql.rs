//! Pieces shared by the sqlx-backed stores: the counter table, scope binding
//! and error classification.

use core::num::NonZeroU32;

use crate::{Error, Result, ScopeKey};

/// Counter table. Valid for both Postgres and SQLite.
pub(crate) const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS scope_sequences (
    dept_code VARCHAR(16) NOT NULL,
    semester  INTEGER     NOT NULL CHECK (semester >= 1),
    year2     SMALLINT    NOT NULL CHECK (year2 BETWEEN 0 AND 99),
    next_seq  BIGINT      NOT NULL CHECK (next_seq >= 1),
    PRIMARY KEY (dept_code, semester, year2)
)";

/// Pool size used by `connect`, matching sqlx's own default.
pub(crate) const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// A [`ScopeKey`] converted to the column types of `scope_sequences`.
pub(crate) struct ScopeParams<'a> {
    pub dept_code: &'a str,
    pub semester: i32,
    pub year2: i16,
}

impl<'a> TryFrom<&'a ScopeKey> for ScopeParams<'a> {
    type Error = Error;

    fn try_from(scope: &'a ScopeKey) -> Result<Self> {
        let semester = i32::try_from(scope.semester())
            .map_err(|_| Error::invalid_scope(format!("semester {} out of range", scope.semester())))?;
        Ok(Self {
            dept_code: scope.dept_code(),
            semester,
            year2: i16::from(scope.year2().value()),
        })
    }
}

/// Reads a stored `next_seq`, which must be positive.
pub(crate) fn decode_next(scope: &ScopeKey, raw: i64) -> Result<u64> {
    u64::try_from(raw)
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| Error::unavailable(format!("corrupt counter row {scope}: next_seq = {raw}")))
}

/// `next + count`, or [`Error::SequenceExhausted`] past `i64::MAX`.
pub(crate) fn advance(scope: &ScopeKey, next: i64, count: NonZeroU32) -> Result<i64> {
    next.checked_add(i64::from(count.get()))
        .ok_or_else(|| Error::SequenceExhausted {
            scope: scope.to_string(),
        })
}

/// Maps a sqlx failure onto the crate taxonomy.
///
/// `is_contention` decides, per backend, which database error codes mean the
/// unit of work lost a race and may be retried.
pub(crate) fn classify(err: sqlx::Error, is_contention: fn(&str) -> bool) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref().is_some_and(is_contention) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(code = ?db.code(), "unit of work aborted by contention");
            Error::conflict(db.message())
        }
        _ => Error::unavailable(err.to_string()),
    }
}

/// A transaction that could not be opened is never a conflict.
pub(crate) fn begin_failed(err: sqlx::Error) -> Error {
    Error::unavailable(format!("could not open transaction: {err}"))
}
