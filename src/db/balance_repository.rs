use async_trait::async_trait;
use uuid::Uuid;

use crate::models::balance::UserBalance;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("user balance not found")]
    BalanceNotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Credit top-up recorded alongside the balance change, in one transaction.
#[derive(Debug, Clone)]
pub struct NewUserPurchase {
    pub stripe_id: String,
    pub description: String,
    pub amount: i32,
    pub currency: String,
}

/// The credit ledger. Debits are never rolled back by downstream node
/// failures; they account for work already performed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceRepository: Send + Sync {
    /// Locks the balance row, fails with `InsufficientCredits` and no write
    /// when the balance cannot cover `amount`, otherwise decrements and
    /// commits.
    async fn atomic_debit(&self, user_id: Uuid, amount: i32) -> Result<UserBalance, LedgerError>;

    async fn credit(
        &self,
        user_id: Uuid,
        amount: i32,
        purchase: NewUserPurchase,
    ) -> Result<UserBalance, LedgerError>;

    async fn get_balance(&self, user_id: Uuid) -> Result<Option<UserBalance>, sqlx::Error>;
}
