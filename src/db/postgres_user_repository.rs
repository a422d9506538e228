use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::user_repository::UserRepository;
use crate::models::credential::{Credential, DbSecret};
use crate::models::user::{GuestSession, User};

pub struct PostgresUserRepository {
    pub pool: PgPool,
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn delete_expired_guests(&self, now: OffsetDateTime) -> Result<Vec<User>, sqlx::Error> {
        let reaped = sqlx::query_as::<_, User>(
            r#"
            DELETE FROM users
            WHERE is_guest = true
              AND guest_expires_at IS NOT NULL
              AND guest_expires_at < $1
            RETURNING id, email, clerk_user_id, is_guest, guest_expires_at, created_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(reaped)
    }

    async fn delete_expired_guest_sessions(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<GuestSession>, sqlx::Error> {
        let reaped = sqlx::query_as::<_, GuestSession>(
            r#"
            DELETE FROM guest_sessions
            WHERE expires_at < $1
            RETURNING id, user_id, session_token, expires_at, created_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(reaped)
    }

    async fn find_credential_by_id(
        &self,
        credential_id: Uuid,
    ) -> Result<Option<Credential>, sqlx::Error> {
        let result = sqlx::query_as::<_, Credential>(
            r#"
            SELECT id, user_id, name, secret_ref, is_db_secret, created_at
            FROM credentials
            WHERE id = $1
            "#,
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn find_db_secret_by_id(
        &self,
        secret_id: Uuid,
    ) -> Result<Option<DbSecret>, sqlx::Error> {
        let result = sqlx::query_as::<_, DbSecret>(
            r#"
            SELECT id, user_id, encrypted_value, nonce, created_at
            FROM db_secrets
            WHERE id = $1
            "#,
        )
        .bind(secret_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }
}
