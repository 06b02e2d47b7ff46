#![cfg(feature = "memory")]

use core::{
    num::NonZeroU32,
    sync::atomic::{AtomicI32, AtomicU32, Ordering},
    time::Duration,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use futures::future::join_all;

use super::*;
use crate::{FixedCalendar, MemorySequenceStore, Year2};

struct NoSleep;

impl SleepProvider for NoSleep {
    async fn sleep_for(_dur: Duration) {}
}

/// Fails the first `conflicts` reservations with a transient conflict, then
/// delegates. Counts every call.
struct FlakyStore<S> {
    inner: S,
    conflicts: u32,
    calls: AtomicU32,
}

impl<S> FlakyStore<S> {
    fn new(inner: S, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<S: SequenceStore> SequenceStore for FlakyStore<S> {
    async fn reserve(&self, scope: &ScopeKey, count: NonZeroU32) -> Result<SequenceBlock> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.conflicts {
            return Err(Error::conflict("injected"));
        }
        self.inner.reserve(scope, count).await
    }

    async fn peek(&self, scope: &ScopeKey) -> Result<Option<u64>> {
        self.inner.peek(scope).await
    }
}

/// Always reports the store as down.
struct DownStore {
    calls: AtomicU32,
}

impl SequenceStore for DownStore {
    async fn reserve(&self, _scope: &ScopeKey, _count: NonZeroU32) -> Result<SequenceBlock> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::unavailable("connection refused"))
    }

    async fn peek(&self, _scope: &ScopeKey) -> Result<Option<u64>> {
        Err(Error::unavailable("connection refused"))
    }
}

/// Commits, then never returns.
struct StallAfterCommit<S>(S);

impl<S: SequenceStore> SequenceStore for StallAfterCommit<S> {
    async fn reserve(&self, scope: &ScopeKey, count: NonZeroU32) -> Result<SequenceBlock> {
        let block = self.0.reserve(scope, count).await?;
        core::future::pending::<()>().await;
        Ok(block)
    }

    async fn peek(&self, scope: &ScopeKey) -> Result<Option<u64>> {
        self.0.peek(scope).await
    }
}

/// A year that can be moved forward while the allocator is in use.
struct SettableCalendar(AtomicI32);

impl CalendarSource for SettableCalendar {
    fn current_year(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }
}

fn allocator() -> Allocator<MemorySequenceStore, FixedCalendar> {
    Allocator::with_calendar(MemorySequenceStore::new(), FixedCalendar(2025))
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        jitter: false,
        ..RetryPolicy::default()
    }
}

#[tokio::test]
async fn first_allocation_in_scope_is_001() {
    let allocator = allocator();
    let id = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    assert_eq!(id.to_string(), "CS-S1-25-001");
    assert_eq!(id.sequence(), 1);
    assert_eq!(id.scope().dept_code(), "CS");
}

#[tokio::test]
async fn sequences_are_zero_padded_then_grow() {
    let allocator = allocator();
    let mut last = None;
    for _ in 0..1000 {
        last = Some(allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap());
    }
    assert_eq!(last.unwrap().to_string(), "CS-S1-25-1000");

    let ee = allocator.try_allocate_batch_with::<NoSleep>("EE", 2, 47).await.unwrap();
    assert_eq!(ee[46].to_string(), "EE-S2-25-047");
}

#[tokio::test]
async fn department_code_is_trimmed_and_case_preserved() {
    let allocator = allocator();
    let id = allocator
        .try_allocate_with::<NoSleep>("  Mech ", 10)
        .await
        .unwrap();
    assert_eq!(id.to_string(), "Mech-S10-25-001");
    // Case is significant: MECH is a different scope.
    let other = allocator.try_allocate_with::<NoSleep>("MECH", 10).await.unwrap();
    assert_eq!(other.sequence(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_allocations_are_unique_and_gap_free() {
    let allocator = Arc::new(allocator());

    let tasks = (0..200).map(|_| {
        let allocator = Arc::clone(&allocator);
        tokio::spawn(async move { allocator.try_allocate_with::<NoSleep>("CS", 1).await })
    });
    let ids: Vec<Identifier> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let rendered: HashSet<String> = ids.iter().map(ToString::to_string).collect();
    assert_eq!(rendered.len(), 200);
    let seqs: HashSet<u64> = ids.iter().map(Identifier::sequence).collect();
    assert_eq!(seqs, (1..=200).collect::<HashSet<_>>());
}

#[tokio::test]
async fn scopes_count_independently() {
    let allocator = allocator();
    for _ in 0..3 {
        allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    }
    let ee = allocator.try_allocate_with::<NoSleep>("EE", 1).await.unwrap();
    let cs2 = allocator.try_allocate_with::<NoSleep>("CS", 2).await.unwrap();
    let cs1 = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();

    assert_eq!(ee.to_string(), "EE-S1-25-001");
    assert_eq!(cs2.to_string(), "CS-S2-25-001");
    assert_eq!(cs1.to_string(), "CS-S1-25-004");
}

#[tokio::test]
async fn new_year_opens_a_new_scope() {
    let calendar = SettableCalendar(AtomicI32::new(2025));
    let allocator = Allocator::with_calendar(MemorySequenceStore::new(), &calendar);

    allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    calendar.0.store(2026, Ordering::SeqCst);

    let id = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    assert_eq!(id.to_string(), "CS-S1-26-001");
    assert_eq!(id.scope().year2(), Year2::new(26).unwrap());
}

#[tokio::test]
async fn counters_outlive_the_allocator() {
    let store = MemorySequenceStore::new();
    {
        let first = Allocator::with_calendar(store.clone(), FixedCalendar(2025));
        for _ in 0..5 {
            first.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
        }
    }

    let second = Allocator::with_calendar(store, FixedCalendar(2025));
    let id = second.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    assert_eq!(id.to_string(), "CS-S1-25-006");
}

#[tokio::test]
async fn discarded_identifiers_are_never_reissued() {
    let allocator = allocator();
    let issued = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    drop(issued);
    let next = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    assert_eq!(next.sequence(), 2);
}

#[tokio::test]
async fn invalid_input_never_touches_the_store() {
    let store = FlakyStore::new(MemorySequenceStore::new(), 0);
    let allocator = Allocator::with_calendar(&store, FixedCalendar(2025));

    for (dept, semester) in [("", 1), ("   ", 1), ("CS", 0), ("CS", -2), ("C-S", 1)] {
        let err = allocator
            .try_allocate_with::<NoSleep>(dept, semester)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidScope { .. }), "{dept:?}/{semester}: {err}");
    }
    let err = allocator
        .try_allocate_batch_with::<NoSleep>("CS", 1, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidScope { .. }));

    assert_eq!(store.calls(), 0);
    assert_eq!(store.inner.scope_count(), 0);
}

#[tokio::test]
async fn conflicts_below_the_ceiling_are_absorbed() {
    let store = FlakyStore::new(MemorySequenceStore::new(), 4);
    let allocator =
        Allocator::with_calendar(&store, FixedCalendar(2025)).with_retry_policy(policy(5));

    let id = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    assert_eq!(id.sequence(), 1);
    assert_eq!(store.calls(), 5);
}

#[tokio::test]
async fn persistent_conflict_fails_after_max_attempts() {
    let store = FlakyStore::new(MemorySequenceStore::new(), u32::MAX);
    let allocator =
        Allocator::with_calendar(&store, FixedCalendar(2025)).with_retry_policy(policy(5));

    let err = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap_err();
    assert_eq!(
        err,
        Error::AllocationFailed {
            scope: "CS-S1-25".to_owned(),
            attempts: 5,
        }
    );
    assert_eq!(store.calls(), 5);
    assert_eq!(store.inner.peek(&allocator.scope_for("CS", 1).unwrap()).await.unwrap(), None);
}

#[tokio::test]
async fn zero_attempts_still_tries_once() {
    let store = FlakyStore::new(MemorySequenceStore::new(), u32::MAX);
    let allocator =
        Allocator::with_calendar(&store, FixedCalendar(2025)).with_retry_policy(policy(0));

    let err = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap_err();
    assert!(matches!(err, Error::AllocationFailed { attempts: 1, .. }));
    assert_eq!(store.calls(), 1);
}

#[tokio::test]
async fn unavailable_store_is_not_retried() {
    let store = DownStore {
        calls: AtomicU32::new(0),
    };
    let allocator = Allocator::with_calendar(&store, FixedCalendar(2025));

    let err = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable { .. }));
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn row_lock_timeouts_are_retried_until_the_row_frees_up() {
    let store = MemorySequenceStore::with_lock_timeout(Duration::from_millis(5));
    let allocator = Allocator::with_calendar(store.clone(), FixedCalendar(2025))
        .with_retry_policy(policy(50));
    let scope = allocator.scope_for("CS", 1).unwrap();

    let held = store.row(&scope).lock_owned().await;
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(held);
    });

    let id = allocator.try_allocate_in::<NoSleep>(scope).await.unwrap();
    assert_eq!(id.sequence(), 1);
    release.await.unwrap();
}

#[tokio::test]
async fn cancelled_after_commit_consumes_the_number() {
    let store = MemorySequenceStore::new();
    let stalled = Allocator::with_calendar(StallAfterCommit(store.clone()), FixedCalendar(2025));

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        stalled.try_allocate_with::<NoSleep>("CS", 1),
    )
    .await;
    assert!(outcome.is_err(), "the stalled call should have been cancelled");

    let allocator = Allocator::with_calendar(store, FixedCalendar(2025));
    let id = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    assert_eq!(id.sequence(), 2);
}

#[tokio::test]
async fn cancelled_before_commit_consumes_nothing() {
    let store = MemorySequenceStore::with_lock_timeout(Duration::from_secs(30));
    let allocator = Allocator::with_calendar(store.clone(), FixedCalendar(2025));
    let scope = allocator.scope_for("CS", 1).unwrap();

    {
        let row = store.row(&scope);
        let _held = row.lock().await;
        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            allocator.try_allocate_with::<NoSleep>("CS", 1),
        )
        .await;
        assert!(outcome.is_err());
    }

    let id = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    assert_eq!(id.sequence(), 1);
}

#[tokio::test]
async fn batches_are_contiguous_and_ordered() {
    let allocator = allocator();
    allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();

    let batch = allocator.try_allocate_batch_with::<NoSleep>("CS", 1, 3).await.unwrap();
    let rendered: Vec<String> = batch.iter().map(ToString::to_string).collect();
    assert_eq!(rendered, ["CS-S1-25-002", "CS-S1-25-003", "CS-S1-25-004"]);

    let next = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    assert_eq!(next.sequence(), 5);
}

#[tokio::test]
async fn peek_reports_the_next_number() {
    let allocator = allocator();
    assert_eq!(allocator.peek("CS", 1).await.unwrap(), None);
    allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap();
    assert_eq!(allocator.peek("CS", 1).await.unwrap(), Some(2));
    assert!(matches!(
        allocator.peek("", 1).await,
        Err(Error::InvalidScope { .. })
    ));
}

#[tokio::test]
async fn from_config_applies_retry_settings() {
    let config = AllocatorConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        jitter: false,
        ..AllocatorConfig::default()
    };
    let store = FlakyStore::new(MemorySequenceStore::new(), u32::MAX);
    let allocator = Allocator::from_config(&store, FixedCalendar(2025), &config).unwrap();
    assert_eq!(allocator.retry_policy().max_attempts, 3);

    let err = allocator.try_allocate_with::<NoSleep>("CS", 1).await.unwrap_err();
    assert!(matches!(err, Error::AllocationFailed { attempts: 3, .. }));

    let bad = AllocatorConfig {
        max_attempts: 0,
        ..AllocatorConfig::default()
    };
    assert!(Allocator::from_config(MemorySequenceStore::new(), FixedCalendar(2025), &bad).is_err());
}

/// A store with no timer at all, for executors without one.
#[derive(Default)]
struct PlainStore(Mutex<HashMap<ScopeKey, u64>>);

impl SequenceStore for PlainStore {
    async fn reserve(&self, scope: &ScopeKey, count: NonZeroU32) -> Result<SequenceBlock> {
        let mut rows = self.0.lock().unwrap();
        let next = rows.entry(scope.clone()).or_insert(1);
        let first = *next;
        *next += u64::from(count.get());
        Ok(SequenceBlock::new(first, count))
    }

    async fn peek(&self, scope: &ScopeKey) -> Result<Option<u64>> {
        Ok(self.0.lock().unwrap().get(scope).copied())
    }
}

#[test]
fn allocator_is_executor_agnostic() {
    let store = FlakyStore::new(PlainStore::default(), 2);
    let allocator = Allocator::with_calendar(&store, FixedCalendar(2031));
    let id = futures::executor::block_on(allocator.try_allocate_with::<NoSleep>("EE", 4)).unwrap();
    assert_eq!(id.to_string(), "EE-S4-31-001");
    assert_eq!(store.calls(), 3);
}

#[cfg(feature = "async-smol")]
#[test]
fn retries_sleep_under_smol() {
    use crate::{AllocatorSmolExt, SmolSleep};

    let store = FlakyStore::new(
        MemorySequenceStore::<SmolSleep>::with_sleep(Duration::from_millis(100)),
        2,
    );
    let allocator = Allocator::with_calendar(&store, FixedCalendar(2025)).with_retry_policy(
        RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            ..policy(5)
        },
    );
    let id = smol::block_on(allocator.allocate_smol("CS", 1)).unwrap();
    assert_eq!(id.to_string(), "CS-S1-25-001");
    assert_eq!(store.calls(), 3);
}
