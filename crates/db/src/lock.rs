//! Single-runner guard backed by a Postgres session-level advisory lock.
//!
//! The lock belongs to the database session, so the guard pins one pooled
//! connection for its whole lifetime. If the guard is dropped without an
//! explicit [`AdvisoryLockGuard::release`], the connection is closed instead
//! of being returned to the pool, which ends the session and frees the lock.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};

use mirror_common::error::{MirrorError, MirrorResult};

#[derive(Clone)]
pub struct AdvisoryLock {
    pool: PgPool,
    key: i64,
}

impl AdvisoryLock {
    pub fn new(pool: PgPool, key: i64) -> Self {
        Self { pool, key }
    }

    /// Try to take the lock without waiting. `Ok(None)` means another
    /// session holds it.
    pub async fn try_acquire(&self) -> MirrorResult<Option<AdvisoryLockGuard>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| MirrorError::Database(e.to_string()))?;

        let row = sqlx::query("select pg_try_advisory_lock($1) as locked")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| MirrorError::Database(e.to_string()))?;

        if !row.get::<bool, _>("locked") {
            tracing::debug!(key = self.key, "advisory lock held elsewhere");
            return Ok(None);
        }

        tracing::debug!(key = self.key, "advisory lock acquired");
        Ok(Some(AdvisoryLockGuard {
            conn: Some(conn),
            key: self.key,
        }))
    }
}

pub struct AdvisoryLockGuard {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl AdvisoryLockGuard {
    pub async fn release(mut self) -> MirrorResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let result = sqlx::query("select pg_advisory_unlock($1) as unlocked")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await;

        match result {
            Ok(row) => {
                if !row.get::<bool, _>("unlocked") {
                    tracing::warn!(key = self.key, "advisory lock was not held at release");
                }
                tracing::debug!(key = self.key, "advisory lock released");
                Ok(())
            }
            Err(e) => {
                conn.close_on_drop();
                Err(MirrorError::Database(e.to_string()))
            }
        }
    }
}

impl Drop for AdvisoryLockGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            tracing::warn!(key = self.key, "advisory lock guard dropped without release; closing session");
            conn.close_on_drop();
        }
    }
}
