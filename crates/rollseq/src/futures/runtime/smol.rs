use core::future::Future;

use smol::Timer;

use crate::{Allocator, CalendarSource, Identifier, Result, SequenceStore, SleepProvider};

/// An implementation of [`SleepProvider`] using Smol's timer.
///
/// This is the default provider for use in async applications built on Smol.
pub struct SmolSleep;
impl SleepProvider for SmolSleep {
    async fn sleep_for(dur: core::time::Duration) {
        Timer::after(dur).await;
    }
}

/// An implementation of [`SleepProvider`] using Smol's yield.
///
/// See [`TokioYield`](crate::TokioYield) for the tradeoff; the same applies.
pub struct SmolYield;
impl SleepProvider for SmolYield {
    async fn sleep_for(_dur: core::time::Duration) {
        smol::future::yield_now().await;
    }
}

/// Extension trait for allocating identifiers on the
/// [`smol`](https://docs.rs/smol) runtime, backing off with [`SmolSleep`].
///
/// The SQL stores run on sqlx's tokio runtime. Under smol alone, use a
/// [`MemorySequenceStore<SmolSleep>`](crate::MemorySequenceStore) or another
/// store that does not need a tokio reactor.
pub trait AllocatorSmolExt {
    /// # Errors
    ///
    /// See [`Allocator::try_allocate_with`].
    fn allocate_smol(&self, dept_code: &str, semester: i64) -> impl Future<Output = Result<Identifier>> + Send;

    /// # Errors
    ///
    /// See [`Allocator::try_allocate_batch_with`].
    fn allocate_batch_smol(
        &self,
        dept_code: &str,
        semester: i64,
        count: u32,
    ) -> impl Future<Output = Result<Vec<Identifier>>> + Send;
}

impl<S, C> AllocatorSmolExt for Allocator<S, C>
where
    S: SequenceStore,
    C: CalendarSource + Sync,
{
    fn allocate_smol(&self, dept_code: &str, semester: i64) -> impl Future<Output = Result<Identifier>> + Send {
        self.try_allocate_with::<SmolSleep>(dept_code, semester)
    }

    fn allocate_batch_smol(
        &self,
        dept_code: &str,
        semester: i64,
        count: u32,
    ) -> impl Future<Output = Result<Vec<Identifier>>> + Send {
        self.try_allocate_batch_with::<SmolSleep>(dept_code, semester, count)
    }
}
