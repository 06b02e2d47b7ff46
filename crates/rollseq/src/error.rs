//! Error types for roll-number allocation.
//!
//! Every fallible operation in this crate returns [`Error`]. The variants map
//! onto how a caller should react:
//!
//! - `InvalidScope`: the input is wrong; do not retry.
//! - `TransientConflict`: the store aborted the unit of work because another
//!   allocation held the same counter row. The [`Allocator`] retries these
//!   internally.
//! - `StoreUnavailable`: the backing store could not be reached or a
//!   transaction could not be opened. Not retried by the allocator.
//! - `AllocationFailed`: conflicts persisted past the retry ceiling.
//!
//! [`Allocator`]: crate::Allocator

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors `rollseq` can produce.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The department code or semester was rejected before touching the
    /// store.
    #[error("invalid scope: {reason}")]
    InvalidScope { reason: String },

    /// The store aborted the unit of work due to contention (serialization
    /// failure, deadlock, or lock timeout). Nothing was committed.
    #[error("transient conflict: {reason}")]
    TransientConflict { reason: String },

    /// The backing store could not be reached or failed outside of a
    /// contention abort.
    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// Every attempt ended in a [`Error::TransientConflict`].
    #[error("allocation failed for scope {scope} after {attempts} attempts")]
    AllocationFailed { scope: String, attempts: u32 },

    /// The counter for a scope cannot advance any further.
    #[error("sequence exhausted for scope {scope}")]
    SequenceExhausted { scope: String },

    /// A string could not be parsed as an identifier.
    #[error("invalid identifier: {input:?}")]
    InvalidIdentifier { input: String },
}

impl Error {
    pub(crate) fn invalid_scope(reason: impl Into<String>) -> Self {
        Self::InvalidScope {
            reason: reason.into(),
        }
    }

    pub(crate) fn conflict(reason: impl Into<String>) -> Self {
        Self::TransientConflict {
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Whether the operation may succeed if retried unchanged.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientConflict { .. })
    }
}
