use core::future::Future;

use crate::{Allocator, CalendarSource, Identifier, Result, SequenceStore, SleepProvider};

/// An implementation of [`SleepProvider`] using Tokio's timer.
///
/// This is the default provider for use in async applications built on Tokio.
pub struct TokioSleep;
impl SleepProvider for TokioSleep {
    async fn sleep_for(dur: core::time::Duration) {
        tokio::time::sleep(dur).await
    }
}

/// An implementation of [`SleepProvider`] using Tokio's yield.
///
/// Retries go back to the store as soon as the scheduler runs the task again
/// instead of waiting out the backoff. Conflicting callers then hit the same
/// counter row in a tight loop, so prefer [`TokioSleep`] outside of tests.
pub struct TokioYield;
impl SleepProvider for TokioYield {
    async fn sleep_for(_dur: core::time::Duration) {
        tokio::task::yield_now().await
    }
}

/// Extension trait for allocating identifiers on the
/// [`tokio`](https://docs.rs/tokio) runtime.
///
/// Backs off between conflicting attempts with [`TokioSleep`], so callers
/// don't have to name a sleep provider.
pub trait AllocatorTokioExt {
    /// Allocates the next identifier for `dept_code` and `semester` in the
    /// current year.
    ///
    /// # Errors
    ///
    /// See [`Allocator::try_allocate_with`].
    fn allocate(&self, dept_code: &str, semester: i64) -> impl Future<Output = Result<Identifier>> + Send;

    /// Allocates `count` consecutive identifiers in one unit of work.
    ///
    /// # Errors
    ///
    /// See [`Allocator::try_allocate_batch_with`].
    fn allocate_batch(
        &self,
        dept_code: &str,
        semester: i64,
        count: u32,
    ) -> impl Future<Output = Result<Vec<Identifier>>> + Send;
}

impl<S, C> AllocatorTokioExt for Allocator<S, C>
where
    S: SequenceStore,
    C: CalendarSource + Sync,
{
    fn allocate(&self, dept_code: &str, semester: i64) -> impl Future<Output = Result<Identifier>> + Send {
        self.try_allocate_with::<TokioSleep>(dept_code, semester)
    }

    fn allocate_batch(
        &self,
        dept_code: &str,
        semester: i64,
        count: u32,
    ) -> impl Future<Output = Result<Vec<Identifier>>> + Send {
        self.try_allocate_batch_with::<TokioSleep>(dept_code, semester, count)
    }
}
