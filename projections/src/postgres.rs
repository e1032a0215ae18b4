//! `PostgreSQL` checkpoint storage for projections.
//!
//! The read side may live in its own database; nothing here touches the
//! event log.
//!
//! ```text
//! Write Side (Event Log)            Read Side (Projections)
//! ┌─────────────────────┐          ┌────────────────────────┐
//! │  events / snapshots │  feed →  │  projection_checkpoints │
//! │                     │          │  account_balances       │
//! └─────────────────────┘          └────────────────────────┘
//! ```

use eventkeep_core::projection::{EventPosition, ProjectionCheckpoint, ProjectionError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::pin::Pin;

/// Checkpoints kept in the `projection_checkpoints` table.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE projection_checkpoints (
///     projection_name TEXT PRIMARY KEY,
///     committed_offset BIGINT NOT NULL,
///     committed_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL
/// );
/// ```
///
/// # Example
///
/// ```ignore
/// use eventkeep_projections::PostgresProjectionCheckpoint;
///
/// let checkpoint = PostgresProjectionCheckpoint::connect("postgres://localhost/read").await?;
/// checkpoint.migrate().await?;
///
/// match checkpoint.load_position("account_balances").await? {
///     Some(position) => println!("Resuming after offset {}", position.offset),
///     None => println!("Starting from beginning"),
/// }
/// ```
#[derive(Clone)]
pub struct PostgresProjectionCheckpoint {
    pool: PgPool,
}

impl PostgresProjectionCheckpoint {
    /// Create a checkpoint tracker using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the read-side database.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if connection fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Create the `projection_checkpoints` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if migration fails.
    pub async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        // The read database may carry migrations of other read-side crates.
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

impl ProjectionCheckpoint for PostgresProjectionCheckpoint {
    fn save_position(
        &self,
        projection_name: &str,
        position: EventPosition,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            let offset = i64::try_from(position.offset).map_err(|_| {
                ProjectionError::Checkpoint(format!("offset {} out of range", position.offset))
            })?;

            sqlx::query(
                "INSERT INTO projection_checkpoints (projection_name, committed_offset, committed_at, updated_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (projection_name) DO UPDATE
                 SET committed_offset = EXCLUDED.committed_offset,
                     committed_at = EXCLUDED.committed_at,
                     updated_at = now()",
            )
            .bind(projection_name)
            .bind(offset)
            .bind(position.timestamp)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to save checkpoint: {e}")))?;

            Ok(())
        })
    }

    fn load_position(
        &self,
        projection_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EventPosition>>> + Send + '_>> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            let row: Option<(i64, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
                "SELECT committed_offset, committed_at
                 FROM projection_checkpoints
                 WHERE projection_name = $1",
            )
            .bind(projection_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to load checkpoint: {e}")))?;

            row.map(|(offset, timestamp)| {
                u64::try_from(offset)
                    .map(|offset| EventPosition::new(offset, timestamp))
                    .map_err(|_| ProjectionError::Checkpoint(format!("negative offset {offset}")))
            })
            .transpose()
        })
    }
}
