use core::{num::NonZeroU32, time::Duration};

use sqlx::{
    PgPool,
    postgres::{PgConnection, PgPoolOptions},
};
#[cfg(feature = "tracing")]
use tracing::instrument;

use super::sql::{self, ScopeParams};
use crate::{AllocatorConfig, Error, Result, ScopeKey, SequenceBlock, SequenceStore};

const INSERT_IF_MISSING: &str = "\
INSERT INTO scope_sequences (dept_code, semester, year2, next_seq)
VALUES ($1, $2, $3, 1)
ON CONFLICT (dept_code, semester, year2) DO NOTHING";

const SELECT_FOR_UPDATE: &str = "\
SELECT next_seq FROM scope_sequences
WHERE dept_code = $1 AND semester = $2 AND year2 = $3
FOR UPDATE";

const UPDATE_NEXT: &str = "\
UPDATE scope_sequences SET next_seq = $4
WHERE dept_code = $1 AND semester = $2 AND year2 = $3";

const SELECT_NEXT: &str = "\
SELECT next_seq FROM scope_sequences
WHERE dept_code = $1 AND semester = $2 AND year2 = $3";

/// SQLSTATEs meaning the transaction lost a race: `serialization_failure`,
/// `deadlock_detected`, `lock_not_available` (our `lock_timeout`) and
/// `query_canceled` (a server-side `statement_timeout`).
fn is_contention(code: &str) -> bool {
    matches!(code, "40001" | "40P01" | "55P03" | "57014")
}

/// A [`SequenceStore`] over a Postgres `scope_sequences` table.
///
/// Each reservation is one transaction:
///
/// 1. `SET LOCAL lock_timeout` so waiting on a busy row is bounded;
/// 2. `INSERT .. ON CONFLICT DO NOTHING` creates the row at 1 if it is
///    missing. A concurrent creator blocks here until the first one commits
///    and then inserts nothing;
/// 3. `SELECT next_seq .. FOR UPDATE` takes the row lock;
/// 4. `UPDATE` advances the counter, then `COMMIT`.
///
/// Only the row for the requested scope is locked.
#[derive(Clone, Debug)]
pub struct PgSequenceStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgSequenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: Duration::from_millis(AllocatorConfig::DEFAULT_LOCK_TIMEOUT_MS),
        }
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub const DEFAULT_MAX_CONNECTIONS: u32 = sql::DEFAULT_MAX_CONNECTIONS;

    /// Opens a pool of
    /// [`DEFAULT_MAX_CONNECTIONS`](Self::DEFAULT_MAX_CONNECTIONS) against
    /// `url`.
    ///
    /// # Errors
    ///
    /// [`Error::StoreUnavailable`] if no connection can be established.
    pub async fn connect(url: &str, lock_timeout: Duration) -> Result<Self> {
        Self::connect_with(url, lock_timeout, Self::DEFAULT_MAX_CONNECTIONS).await
    }

    /// Like [`connect`](Self::connect) with a pool of at most
    /// `max_connections`.
    ///
    /// Every reservation holds a connection for its whole transaction. One
    /// that cannot get a connection within the acquire timeout fails with
    /// [`Error::StoreUnavailable`] and is not retried, so size the pool for
    /// the largest burst of concurrent allocations.
    ///
    /// # Errors
    ///
    /// [`Error::StoreUnavailable`] if no connection can be established.
    pub async fn connect_with(
        url: &str,
        lock_timeout: Duration,
        max_connections: u32,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(lock_timeout.max(Duration::from_secs(1)))
            .connect(url)
            .await
            .map_err(|e| Error::unavailable(e.to_string()))?;
        Ok(Self::new(pool).with_lock_timeout(lock_timeout))
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

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_and_advance(
        &self,
        conn: &mut PgConnection,
        scope: &ScopeKey,
        count: NonZeroU32,
    ) -> Result<i64> {
        let p = ScopeParams::try_from(scope)?;
        let classify = |e| sql::classify(e, is_contention);

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis().max(1)))
            .execute(&mut *conn)
            .await
            .map_err(classify)?;

        sqlx::query(INSERT_IF_MISSING)
            .bind(p.dept_code)
            .bind(p.semester)
            .bind(p.year2)
            .execute(&mut *conn)
            .await
            .map_err(classify)?;

        let next: i64 = sqlx::query_scalar(SELECT_FOR_UPDATE)
            .bind(p.dept_code)
            .bind(p.semester)
            .bind(p.year2)
            .fetch_one(&mut *conn)
            .await
            .map_err(classify)?;

        let advanced = sql::advance(scope, next, count)?;

        sqlx::query(UPDATE_NEXT)
            .bind(p.dept_code)
            .bind(p.semester)
            .bind(p.year2)
            .bind(advanced)
            .execute(&mut *conn)
            .await
            .map_err(classify)?;

        Ok(next)
    }
}

impl SequenceStore for PgSequenceStore {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip(self), fields(scope = %scope))
    )]
    async fn reserve(&self, scope: &ScopeKey, count: NonZeroU32) -> Result<SequenceBlock> {
        let mut tx = self.pool.begin().await.map_err(sql::begin_failed)?;

        // Any early return drops `tx`, which rolls back.
        let next = self.lock_and_advance(&mut tx, scope, count).await?;
        let first = sql::decode_next(scope, next)?;

        tx.commit()
            .await
            .map_err(|e| sql::classify(e, is_contention))?;

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
