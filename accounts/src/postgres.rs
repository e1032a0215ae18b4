//! `PostgreSQL` account balance view.
//!
//! The sequence gate lives in the upsert itself, so concurrent or repeated
//! deliveries of the same event cannot double-count.

use crate::read_side::AccountView;
use crate::types::{AccountId, Money};
use eventkeep_core::key::SequenceNr;
use eventkeep_core::projection::{ProjectionError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// PostgreSQL-backed [`AccountView`].
///
/// # Schema
///
/// ```sql
/// CREATE TABLE account_balances (
///     account_id TEXT PRIMARY KEY,
///     balance_cents BIGINT NOT NULL,
///     last_sequence_nr BIGINT NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL
/// );
/// ```
#[derive(Clone)]
pub struct PostgresAccountView {
    pool: PgPool,
}

impl PostgresAccountView {
    /// Create a view using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the read-side database.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if connection fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Create the `account_balances` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if migration fails.
    pub async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Migration failed: {e}")))
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn sequence_param(sequence_nr: SequenceNr) -> Result<i64> {
    i64::try_from(sequence_nr.value())
        .map_err(|_| ProjectionError::Storage(format!("sequence number {sequence_nr} out of range")))
}

impl AccountView for PostgresAccountView {
    async fn apply_delta(&self, account_id: &AccountId, delta: Money, sequence_nr: SequenceNr) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO account_balances (account_id, balance_cents, last_sequence_nr, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (account_id) DO UPDATE
             SET balance_cents = account_balances.balance_cents + EXCLUDED.balance_cents,
                 last_sequence_nr = EXCLUDED.last_sequence_nr,
                 updated_at = now()
             WHERE account_balances.last_sequence_nr < EXCLUDED.last_sequence_nr",
        )
        .bind(account_id.as_str())
        .bind(delta.cents())
        .bind(sequence_param(sequence_nr)?)
        .execute(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Failed to update balance: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    async fn balance(&self, account_id: &AccountId) -> Result<Option<Money>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT balance_cents FROM account_balances WHERE account_id = $1")
            .bind(account_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to load balance: {e}")))?;

        Ok(row.map(|(cents,)| Money::from_cents(cents)))
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM account_balances")
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to clear balances: {e}")))?;
        Ok(())
    }
}
