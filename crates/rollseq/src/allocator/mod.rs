use core::num::NonZeroU32;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    AllocatorConfig, CalendarSource, ConfigError, Error, Identifier, Result, RetryPolicy,
    ScopeKey, SequenceBlock, SequenceStore, SleepProvider, SystemCalendar,
};

#[cfg(test)]
mod tests;

/// Issues roll numbers of the form `DEPT-S<semester>-<yy>-<seq>`.
///
/// Each call runs through the same phases:
///
/// 1. **Validating**: the department code and semester are checked and the
///    two-digit year is read from the [`CalendarSource`]. Invalid input is
///    rejected with [`Error::InvalidScope`] before the store is touched.
/// 2. **Incrementing**: the [`SequenceStore`] reserves the next number for
///    the scope in one unit of work.
/// 3. **Retrying**: a [`Error::TransientConflict`] sleeps for the backoff
///    given by the [`RetryPolicy`] and goes back to step 2. Once the policy
///    runs out of attempts the call fails with [`Error::AllocationFailed`].
///    Any other store error fails the call immediately.
/// 4. **Formatting**: the reserved number becomes an [`Identifier`].
///
/// The allocator keeps no state between calls; every number comes from the
/// store, so several allocators (or processes) can share one store.
///
/// ## Cancellation
///
/// Dropping the returned future before the store commits consumes nothing.
/// Dropping it after the commit loses the return value but not the
/// reservation: the number stays consumed and is never handed out again.
///
/// ## Ordering
///
/// Concurrent callers on the same scope receive distinct numbers that
/// together form `1..=N`, but which caller receives which number is not
/// related to call order.
///
/// # Example
///
/// ```
/// # #[cfg(all(feature = "memory", feature = "async-tokio"))]
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// use rollseq::{Allocator, FixedCalendar, MemorySequenceStore, TokioSleep};
///
/// let allocator = Allocator::with_calendar(MemorySequenceStore::new(), FixedCalendar(2025));
///
/// let first = allocator.try_allocate_with::<TokioSleep>("CS", 1).await.unwrap();
/// let second = allocator.try_allocate_with::<TokioSleep>("CS", 1).await.unwrap();
/// assert_eq!(first.to_string(), "CS-S1-25-001");
/// assert_eq!(second.to_string(), "CS-S1-25-002");
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct Allocator<S, C = SystemCalendar> {
    store: S,
    calendar: C,
    retry: RetryPolicy,
}

impl<S> Allocator<S, SystemCalendar>
where
    S: SequenceStore,
{
    /// Creates an allocator that reads the year from the UTC system clock.
    pub fn new(store: S) -> Self {
        Self::with_calendar(store, SystemCalendar)
    }
}

impl<S, C> Allocator<S, C>
where
    S: SequenceStore,
    C: CalendarSource,
{
    pub fn with_calendar(store: S, calendar: C) -> Self {
        Self {
            store,
            calendar,
            retry: RetryPolicy::default(),
        }
    }

    /// Builds an allocator with the retry settings of `config`.
    ///
    /// The lock timeout in `config` belongs to the store and is not applied
    /// here.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn from_config(store: S, calendar: C, config: &AllocatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_calendar(store, calendar).with_retry_policy(config.retry_policy()))
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            ..retry
        };
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn calendar(&self) -> &C {
        &self.calendar
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Validates the inputs and resolves the scope for the current year.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidScope`] for an empty department code or a
    /// non-positive semester.
    pub fn scope_for(&self, dept_code: &str, semester: i64) -> Result<ScopeKey> {
        ScopeKey::new(dept_code, semester, self.calendar.current_year2())
    }

    /// Allocates the next identifier for `dept_code` and `semester` in the
    /// current year, sleeping between conflicting attempts with `P`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidScope`] for rejected input (the store is not
    ///   touched).
    /// - [`Error::AllocationFailed`] when every attempt conflicted.
    /// - [`Error::StoreUnavailable`] or [`Error::SequenceExhausted`] as
    ///   reported by the store.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn try_allocate_with<P>(&self, dept_code: &str, semester: i64) -> Result<Identifier>
    where
        P: SleepProvider,
    {
        let scope = self.scope_for(dept_code, semester)?;
        self.try_allocate_in::<P>(scope).await
    }

    /// Allocates the next identifier in an already resolved scope.
    ///
    /// # Errors
    ///
    /// Same as [`Self::try_allocate_with`], minus input validation.
    pub async fn try_allocate_in<P>(&self, scope: ScopeKey) -> Result<Identifier>
    where
        P: SleepProvider,
    {
        let block = self.reserve_with_retry::<P>(&scope, NonZeroU32::MIN).await?;
        let id = Identifier::new(scope, block.first());
        #[cfg(feature = "tracing")]
        tracing::debug!(%id, "allocated");
        Ok(id)
    }

    /// Allocates `count` consecutive identifiers in one unit of work, in
    /// ascending order. Intended for bulk approvals.
    ///
    /// # Errors
    ///
    /// Same as [`Self::try_allocate_with`]; a `count` of zero is rejected as
    /// [`Error::InvalidScope`].
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn try_allocate_batch_with<P>(
        &self,
        dept_code: &str,
        semester: i64,
        count: u32,
    ) -> Result<Vec<Identifier>>
    where
        P: SleepProvider,
    {
        let scope = self.scope_for(dept_code, semester)?;
        let count =
            NonZeroU32::new(count).ok_or_else(|| Error::invalid_scope("batch size must be positive"))?;
        let block = self.reserve_with_retry::<P>(&scope, count).await?;
        Ok(block
            .into_iter()
            .map(|seq| Identifier::new(scope.clone(), seq))
            .collect())
    }

    /// Returns the next sequence number the current year's scope would hand
    /// out, or `None` if nothing has been allocated in it yet.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidScope`] for rejected input, otherwise whatever the
    /// store reports.
    pub async fn peek(&self, dept_code: &str, semester: i64) -> Result<Option<u64>> {
        let scope = self.scope_for(dept_code, semester)?;
        self.store.peek(&scope).await
    }

    async fn reserve_with_retry<P>(&self, scope: &ScopeKey, count: NonZeroU32) -> Result<SequenceBlock>
    where
        P: SleepProvider,
    {
        let mut attempt = 1;
        loop {
            match self.store.reserve(scope, count).await {
                Ok(block) => return Ok(block),
                Err(err) if err.is_transient() => {
                    if !self.retry.allows_retry_after(attempt) {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%scope, attempt, "giving up after repeated conflicts: {err}");
                        return Err(Error::AllocationFailed {
                            scope: scope.to_string(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.retry.delay_for(attempt);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%scope, attempt, ?delay, "conflict, backing off: {err}");
                    P::sleep_for(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
