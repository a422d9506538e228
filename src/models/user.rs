use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub clerk_user_id: Option<String>,
    pub is_guest: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub guest_expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Ephemeral session row issued to guest users; reaped alongside expired
/// guests on cleanup ticks.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct GuestSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
