use core::{num::NonZeroU32, str::FromStr, time::Duration};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
#[cfg(feature = "tracing")]
use tracing::instrument;

use super::sql::{self, ScopeParams};
use crate::{AllocatorConfig, Error, Result, ScopeKey, SequenceBlock, SequenceStore};

/// Creates the row at `1 + count` or advances it by `count`, returning the
/// new `next_seq`. The `WHERE` guard leaves the row untouched (and returns
/// nothing) when the counter would pass `i64::MAX`.
const UPSERT_ADVANCE: &str = "\
INSERT INTO scope_sequences (dept_code, semester, year2, next_seq)
VALUES (?1, ?2, ?3, 1 + ?4)
ON CONFLICT (dept_code, semester, year2)
DO UPDATE SET next_seq = next_seq + ?4 WHERE next_seq <= ?5
RETURNING next_seq";

const SELECT_NEXT: &str = "\
SELECT next_seq FROM scope_sequences
WHERE dept_code = ?1 AND semester = ?2 AND year2 = ?3";

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// sqlx reports SQLite's extended result code; the primary code is the low
/// byte.
fn is_contention(code: &str) -> bool {
    code.parse::<i32>()
        .is_ok_and(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

/// A [`SequenceStore`] over a SQLite `scope_sequences` table.
///
/// SQLite has no row locks, so a reservation is a single upsert statement
/// that takes the database write lock for the length of its transaction.
/// Waiting for that lock is bounded by the connection busy timeout.
#[derive(Clone, Debug)]
pub struct SqliteSequenceStore {
    pool: SqlitePool,
}

impl SqliteSequenceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub const DEFAULT_MAX_CONNECTIONS: u32 = sql::DEFAULT_MAX_CONNECTIONS;

    /// Opens (creating if needed) the database at `url` with `lock_timeout`
    /// as the busy timeout and a pool of
    /// [`DEFAULT_MAX_CONNECTIONS`](Self::DEFAULT_MAX_CONNECTIONS).
    ///
    /// # Errors
    ///
    /// [`Error::StoreUnavailable`] if the URL is invalid or the database
    /// cannot be opened.
    pub async fn connect(url: &str, lock_timeout: Duration) -> Result<Self> {
        Self::connect_with(url, lock_timeout, Self::DEFAULT_MAX_CONNECTIONS).await
    }

    /// Like [`connect`](Self::connect) with a pool of at most
    /// `max_connections`.
    ///
    /// A reservation that cannot get a connection within the acquire timeout
    /// fails with [`Error::StoreUnavailable`] and is not retried, so size the
    /// pool for the largest burst of concurrent allocations.
    ///
    /// # Errors
    ///
    /// [`Error::StoreUnavailable`] if the URL is invalid or the database
    /// cannot be opened.
    pub async fn connect_with(
        url: &str,
        lock_timeout: Duration,
        max_connections: u32,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::unavailable(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(lock_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(lock_timeout.max(Duration::from_secs(1)))
            .connect_with(options)
            .await
            .map_err(|e| Error::unavailable(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// A private in-memory database behind a single connection that lives as
    /// long as the pool. Already migrated.
    ///
    /// # Errors
    ///
    /// [`Error::StoreUnavailable`] if SQLite cannot be initialized.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::unavailable(e.to_string()))?
            .busy_timeout(Duration::from_millis(
                AllocatorConfig::DEFAULT_LOCK_TIMEOUT_MS,
            ));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| Error::unavailable(e.to_string()))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Creates `scope_sequences` if it does not exist.
    ///
    /// # Errors
    ///
    /// [`Error::StoreUnavailable`] if the statement fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(sql::CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| sql::classify(e, is_contention))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl SequenceStore for SqliteSequenceStore {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip(self), fields(scope = %scope))
    )]
    async fn reserve(&self, scope: &ScopeKey, count: NonZeroU32) -> Result<SequenceBlock> {
        let p = ScopeParams::try_from(scope)?;
        let count_i64 = i64::from(count.get());
        let classify = |e| sql::classify(e, is_contention);

        let mut tx = self.pool.begin().await.map_err(sql::begin_failed)?;
        let advanced: Option<i64> = sqlx::query_scalar(UPSERT_ADVANCE)
            .bind(p.dept_code)
            .bind(p.semester)
            .bind(p.year2)
            .bind(count_i64)
            .bind(i64::MAX - count_i64)
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify)?;
        let Some(advanced) = advanced else {
            return Err(Error::SequenceExhausted {
                scope: scope.to_string(),
            });
        };
        let first = sql::decode_next(scope, advanced - count_i64)?;
        tx.commit().await.map_err(classify)?;

        #[cfg(feature = "tracing")]
        tracing::trace!(first, count = count.get(), "committed");
        Ok(SequenceBlock::new(first, count))
    }

    async fn peek(&self, scope: &ScopeKey) -> Result<Option<u64>> {
        let p = ScopeParams::try_from(scope)?;
        let next: Option<i64> = sqlx::query_scalar(SELECT_NEXT)
            .bind(p.dept_code)
            .bind(p.semester)
            .bind(p.year2)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| sql::classify(e, is_contention))?;
        next.map(|raw| sql::decode_next(scope, raw)).transpose()
    }
}
