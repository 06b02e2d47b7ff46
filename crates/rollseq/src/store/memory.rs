use core::{marker::PhantomData, num::NonZeroU32, pin::pin, time::Duration};
use std::{collections::HashMap, fmt, sync::Arc};

use futures::future::{Either, select};
use parking_lot::Mutex;
use tokio::sync::{Mutex as RowLock, MutexGuard};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    AllocatorConfig, Error, Result, ScopeKey, SequenceBlock, SequenceStore, SleepProvider,
    TokioSleep,
};

type Row = Arc<RowLock<u64>>;

/// An in-process [`SequenceStore`] keeping one counter row per scope.
///
/// The scope map is guarded by a short, synchronous lock used only to look up
/// or lazily create a row; each row then has its own async mutex, so
/// reservations on different scopes never wait on each other. Waiting on a
/// busy row is bounded by the configured lock timeout and reported as
/// [`Error::TransientConflict`].
///
/// The lock timeout is measured with the sleep provider `P`, so the store runs
/// on whichever executor `P` belongs to. The default is [`TokioSleep`]; use
/// [`MemorySequenceStore::with_sleep`] to pick another, e.g.
/// `MemorySequenceStore::<SmolSleep>::with_sleep(timeout)`.
///
/// Counters live as long as any clone of the store, which makes it suitable
/// for tests and single-process deployments. Clones share the same rows.
///
/// # Example
///
/// ```
/// # tokio_test_block_on(async {
/// use rollseq::{MemorySequenceStore, ScopeKey, SequenceStore, Year2};
///
/// let store = MemorySequenceStore::new();
/// let scope = ScopeKey::new("CS", 1, Year2::from_year(2025)).unwrap();
///
/// assert_eq!(store.next_sequence(&scope).await.unwrap(), 1);
/// assert_eq!(store.next_sequence(&scope).await.unwrap(), 2);
/// assert_eq!(store.peek(&scope).await.unwrap(), Some(3));
/// # });
/// # fn tokio_test_block_on<F: core::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
/// # }
/// ```
pub struct MemorySequenceStore<P = TokioSleep> {
    rows: Arc<Mutex<HashMap<ScopeKey, Row>>>,
    lock_timeout: Duration,
    _sleep: PhantomData<fn() -> P>,
}

impl MemorySequenceStore {
    /// Creates an empty store using [`AllocatorConfig::DEFAULT_LOCK_TIMEOUT_MS`].
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_millis(
            AllocatorConfig::DEFAULT_LOCK_TIMEOUT_MS,
        ))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self::with_sleep(lock_timeout)
    }
}

impl<P> MemorySequenceStore<P> {
    /// Creates an empty store that times row waits with `P`.
    pub fn with_sleep(lock_timeout: Duration) -> Self {
        Self {
            rows: Arc::new(Mutex::new(HashMap::new())),
            lock_timeout,
            _sleep: PhantomData,
        }
    }

    /// Number of scopes that have a counter row.
    pub fn scope_count(&self) -> usize {
        self.rows.lock().len()
    }

    pub(crate) fn row(&self, scope: &ScopeKey) -> Row {
        let mut rows = self.rows.lock();
        if let Some(row) = rows.get(scope) {
            return Arc::clone(row);
        }
        Arc::clone(
            rows.entry(scope.clone())
                .or_insert_with(|| Arc::new(RowLock::new(1))),
        )
    }
}

impl<P: SleepProvider> MemorySequenceStore<P> {
    /// Locks `row`, giving up after the lock timeout.
    async fn lock_row<'a>(&self, row: &'a RowLock<u64>) -> Option<MutexGuard<'a, u64>> {
        let lock = pin!(row.lock());
        let timeout = pin!(P::sleep_for(self.lock_timeout));
        match select(lock, timeout).await {
            Either::Left((guard, _)) => Some(guard),
            Either::Right(_) => None,
        }
    }
}

impl<P> Clone for MemorySequenceStore<P> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
            lock_timeout: self.lock_timeout,
            _sleep: PhantomData,
        }
    }
}

impl<P> fmt::Debug for MemorySequenceStore<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySequenceStore")
            .field("scopes", &self.scope_count())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

impl Default for MemorySequenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: SleepProvider> SequenceStore for MemorySequenceStore<P> {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip(self), fields(scope = %scope))
    )]
    async fn reserve(&self, scope: &ScopeKey, count: NonZeroU32) -> Result<SequenceBlock> {
        let row = self.row(scope);
        let Some(mut next) = self.lock_row(&row).await else {
            #[cfg(feature = "tracing")]
            tracing::debug!(timeout = ?self.lock_timeout, "counter row busy");
            return Err(Error::conflict(format!(
                "timed out after {:?} waiting for counter row {scope}",
                self.lock_timeout
            )));
        };

        // Nothing below awaits: once the lock is held the reservation either
        // commits in full or not at all, even if the caller is dropped.
        let first = *next;
        let advanced = first
            .checked_add(u64::from(count.get()))
            .filter(|n| i64::try_from(*n).is_ok())
            .ok_or_else(|| Error::SequenceExhausted {
                scope: scope.to_string(),
            })?;
        *next = advanced;

        Ok(SequenceBlock::new(first, count))
    }

    async fn peek(&self, scope: &ScopeKey) -> Result<Option<u64>> {
        let row = self.rows.lock().get(scope).cloned();
        let Some(row) = row else {
            return Ok(None);
        };
        let next = *self
            .lock_row(&row)
            .await
            .ok_or_else(|| Error::conflict(format!("counter row {scope} busy")))?;
        // A row still at 1 was created by an attempt that never committed.
        Ok((next > 1).then_some(next))
    }
}
