//! Explicit transactional scope for one page commit.
//!
//! A page touches three stores (raw records, checkpoint, run counters). The
//! orchestrator opens one [`UnitOfWork`], hands it by `&mut` to every write,
//! and commits or rolls it back as a whole.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use mirror_common::error::{MirrorError, MirrorResult};

pub type PgUnitOfWork = Transaction<'static, Postgres>;

#[async_trait]
pub trait UnitOfWork: Send + Sized {
    async fn commit(self) -> MirrorResult<()>;
    async fn rollback(self) -> MirrorResult<()>;
}

#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    type Uow: UnitOfWork;

    async fn begin(&self) -> MirrorResult<Self::Uow>;
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self) -> MirrorResult<()> {
        Transaction::commit(self)
            .await
            .map_err(|e| MirrorError::Database(e.to_string()))
    }

    async fn rollback(self) -> MirrorResult<()> {
        Transaction::rollback(self)
            .await
            .map_err(|e| MirrorError::Database(e.to_string()))
    }
}

#[async_trait]
impl UnitOfWorkFactory for PgPool {
    type Uow = PgUnitOfWork;

    async fn begin(&self) -> MirrorResult<PgUnitOfWork> {
        sqlx::Pool::begin(self)
            .await
            .map_err(|e| MirrorError::Database(e.to_string()))
    }
}
