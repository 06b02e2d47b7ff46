use core::{future::Future, num::NonZeroU32, ops::Range};
use std::sync::Arc;

use crate::{Result, ScopeKey};

/// A contiguous run of sequence numbers reserved in one unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SequenceBlock {
    first: u64,
    len: u32,
}

impl SequenceBlock {
    pub(crate) const fn new(first: u64, len: NonZeroU32) -> Self {
        Self {
            first,
            len: len.get(),
        }
    }

    /// The first reserved sequence number.
    pub const fn first(&self) -> u64 {
        self.first
    }

    /// The last reserved sequence number (inclusive).
    pub const fn last(&self) -> u64 {
        self.first + self.len as u64 - 1
    }

    pub const fn len(&self) -> u32 {
        self.len
    }

    /// Always `false`; a block holds at least one number.
    pub const fn is_empty(&self) -> bool {
        false
    }

    pub const fn range(&self) -> Range<u64> {
        self.first..self.first + self.len as u64
    }
}

impl IntoIterator for SequenceBlock {
    type Item = u64;
    type IntoIter = Range<u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.range()
    }
}

/// Durable per-scope counters.
///
/// Implementations hold one row per [`ScopeKey`] storing the next value to
/// hand out, and must guarantee:
///
/// - A reservation is a single atomic unit of work: read the row (creating it
///   at 1 if missing), advance it by `count`, commit. Either the whole unit
///   commits and the block is returned, or nothing is consumed.
/// - Two reservations for the same scope never overlap, whether they run
///   concurrently or not, and even when the row is created by both at once.
/// - Reservations for different scopes never wait on each other.
/// - Waiting on a contended row is bounded; running out of time is reported
///   as [`Error::TransientConflict`].
/// - Rows are never deleted or moved backwards.
///
/// [`Error::TransientConflict`]: crate::Error::TransientConflict
pub trait SequenceStore: Send + Sync {
    /// Reserves `count` consecutive sequence numbers for `scope`.
    ///
    /// # Errors
    ///
    /// - [`Error::TransientConflict`] when the unit of work was aborted due
    ///   to contention and may be retried.
    /// - [`Error::StoreUnavailable`] when the backend cannot be reached.
    /// - [`Error::SequenceExhausted`] when the counter cannot advance by
    ///   `count`.
    ///
    /// [`Error::TransientConflict`]: crate::Error::TransientConflict
    /// [`Error::StoreUnavailable`]: crate::Error::StoreUnavailable
    /// [`Error::SequenceExhausted`]: crate::Error::SequenceExhausted
    fn reserve(
        &self,
        scope: &ScopeKey,
        count: NonZeroU32,
    ) -> impl Future<Output = Result<SequenceBlock>> + Send;

    /// Reserves and returns the next sequence number for `scope`.
    ///
    /// # Errors
    ///
    /// Same as [`SequenceStore::reserve`].
    fn next_sequence(&self, scope: &ScopeKey) -> impl Future<Output = Result<u64>> + Send {
        async move {
            let block = self.reserve(scope, NonZeroU32::MIN).await?;
            Ok(block.first())
        }
    }

    /// Returns the next value that would be handed out for `scope`, or `None`
    /// if the scope has never been allocated. Never mutates the row, but a
    /// store may wait on a busy row for up to its lock timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::StoreUnavailable`] when the backend cannot be reached.
    /// - [`Error::TransientConflict`] when the row stayed busy past the lock
    ///   timeout.
    ///
    /// [`Error::StoreUnavailable`]: crate::Error::StoreUnavailable
    /// [`Error::TransientConflict`]: crate::Error::TransientConflict
    fn peek(&self, scope: &ScopeKey) -> impl Future<Output = Result<Option<u64>>> + Send;
}

impl<S> SequenceStore for Arc<S>
where
    S: SequenceStore,
{
    fn reserve(
        &self,
        scope: &ScopeKey,
        count: NonZeroU32,
    ) -> impl Future<Output = Result<SequenceBlock>> + Send {
        (**self).reserve(scope, count)
    }

    fn peek(&self, scope: &ScopeKey) -> impl Future<Output = Result<Option<u64>>> + Send {
        (**self).peek(scope)
    }
}

impl<S> SequenceStore for &S
where
    S: SequenceStore,
{
    fn reserve(
        &self,
        scope: &ScopeKey,
        count: NonZeroU32,
    ) -> impl Future<Output = Result<SequenceBlock>> + Send {
        (**self).reserve(scope, count)
    }

    fn peek(&self, scope: &ScopeKey) -> impl Future<Output = Result<Option<u64>>> + Send {
        (**self).peek(scope)
    }
}
