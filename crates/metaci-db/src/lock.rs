//! Session-scoped advisory locks.
//!
//! The scheduler tick takes an advisory lock so that overlapping invocations
//! (a slow tick still running when the next fires, or a second replica) skip
//! instead of scanning concurrently.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use crate::DbResult;

/// Lock key for the scheduler tick.
pub const SCHEDULER_LOCK_KEY: i64 = 0x6d65_7461_6369_0001;

/// A held advisory lock. Advisory locks are bound to the session, so the
/// connection is kept checked out until release.
pub struct AdvisoryLock {
    conn: PoolConnection<Postgres>,
    key: i64,
}

impl AdvisoryLock {
    /// Try to take the lock without blocking. Returns `None` when another
    /// session holds it.
    pub async fn try_acquire(pool: &PgPool, key: i64) -> DbResult<Option<AdvisoryLock>> {
        let mut conn = pool.acquire().await?;
        let locked = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;
        if locked {
            Ok(Some(AdvisoryLock { conn, key }))
        } else {
            Ok(None)
        }
    }

    /// Release the lock and return the connection to the pool.
    pub async fn release(mut self) -> DbResult<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }
}
