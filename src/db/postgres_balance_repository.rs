use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::balance_repository::{BalanceRepository, LedgerError, NewUserPurchase};
use crate::models::balance::UserBalance;

const BALANCE_COLUMNS: &str = "user_id, credits, updated_at";

pub struct PostgresBalanceRepository {
    pub pool: PgPool,
}

#[async_trait]
impl BalanceRepository for PostgresBalanceRepository {
    async fn atomic_debit(&self, user_id: Uuid, amount: i32) -> Result<UserBalance, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(LedgerError::Database)?;

        let balance = sqlx::query_as::<_, UserBalance>(&format!(
            "SELECT {BALANCE_COLUMNS} FROM user_balances WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(LedgerError::Database)?;

        let Some(balance) = balance else {
            return Err(LedgerError::BalanceNotFound);
        };

        if balance.credits < amount {
            // Dropping the transaction rolls back the row lock without a write.
            return Err(LedgerError::InsufficientCredits);
        }

        let updated = sqlx::query_as::<_, UserBalance>(&format!(
            r#"
            UPDATE user_balances
            SET credits = credits - $2, updated_at = now()
            WHERE user_id = $1
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(LedgerError::Database)?;

        tx.commit().await.map_err(LedgerError::Database)?;
        Ok(updated)
    }

    async fn credit(
        &self,
        user_id: Uuid,
        amount: i32,
        purchase: NewUserPurchase,
    ) -> Result<UserBalance, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(LedgerError::Database)?;

        let updated = sqlx::query_as::<_, UserBalance>(&format!(
            r#"
            INSERT INTO user_balances (user_id, credits, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (user_id)
            DO UPDATE SET credits = user_balances.credits + $2, updated_at = now()
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(LedgerError::Database)?;

        sqlx::query(
            r#"
            INSERT INTO user_purchases
                (user_id, stripe_id, description, amount, currency, purchase_date)
            VALUES ($1, $2, $3, $4, $5, now())
            "#,
        )
        .bind(user_id)
        .bind(&purchase.stripe_id)
        .bind(&purchase.description)
        .bind(purchase.amount)
        .bind(&purchase.currency)
        .execute(&mut *tx)
        .await
        .map_err(LedgerError::Database)?;

        tx.commit().await.map_err(LedgerError::Database)?;
        Ok(updated)
    }

    async fn get_balance(&self, user_id: Uuid) -> Result<Option<UserBalance>, sqlx::Error> {
        sqlx::query_as::<_, UserBalance>(&format!(
            "SELECT {BALANCE_COLUMNS} FROM user_balances WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }
}
