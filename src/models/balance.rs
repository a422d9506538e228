use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Invariant: `credits >= 0` at every commit point. Debits that would break
/// it fail without writing.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct UserBalance {
    pub user_id: Uuid,
    pub credits: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct UserPurchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_id: String,
    pub description: String,
    pub amount: i32,
    pub currency: String,
    #[serde(with = "time::serde::rfc3339")]
    pub purchase_date: OffsetDateTime,
}
