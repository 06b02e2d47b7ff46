use core::{future::Future, time::Duration};

/// A trait that abstracts over how to sleep for a given [`Duration`] in async
/// contexts.
///
/// The allocator backs off between conflicting attempts through this trait so
/// it stays independent of the async runtime.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use rollseq::SleepProvider;
///
/// /// Retries immediately; only useful in tests.
/// struct NoSleep;
/// impl SleepProvider for NoSleep {
///     async fn sleep_for(_dur: Duration) {}
/// }
/// ```
pub trait SleepProvider {
    /// We require `Send` so the allocation future can move across threads.
    fn sleep_for(dur: Duration) -> impl Future<Output = ()> + Send;
}
