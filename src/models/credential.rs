use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// `secret_ref` is either an opaque external-store reference or a local
/// encrypted row id carrying the `db:` prefix.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Credential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub secret_ref: String,
    pub is_db_secret: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Encrypted-at-rest secret row backing `db:`-prefixed references.
/// `encrypted_value` and `nonce` are base64; the plaintext only ever exists
/// in executor locals.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct DbSecret {
    pub id: Uuid,
    pub user_id: Uuid,
    pub encrypted_value: String,
    pub nonce: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
