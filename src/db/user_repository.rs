use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::credential::{Credential, DbSecret};
use crate::models::user::{GuestSession, User};

/// Guest reaping and credential lookup. Guest deletion cascades every owned
/// row (workflows, versions, executions, phases, logs, balance) at the
/// schema level; the deleted rows come back so the caller can log what was
/// reaped.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn delete_expired_guests(&self, now: OffsetDateTime) -> Result<Vec<User>, sqlx::Error>;

    async fn delete_expired_guest_sessions(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<GuestSession>, sqlx::Error>;

    async fn find_credential_by_id(
        &self,
        credential_id: Uuid,
    ) -> Result<Option<Credential>, sqlx::Error>;

    async fn find_db_secret_by_id(&self, secret_id: Uuid)
        -> Result<Option<DbSecret>, sqlx::Error>;
}
