//! PostgreSQL implementation of the store.

use crate::runtime::config::DbConfig;
use crate::store::Store;
use crate::types::{Delegation, FetchedDelegation};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Postgres-backed store using an `sqlx` connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects the pool and bootstraps the schema.
    pub async fn connect(cfg: &DbConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.connect_timeout)
            .connect(&cfg.dsn())
            .await
            .context("failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Wraps an existing pool; used when the caller manages the connection.
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS delegations (
                id BIGSERIAL PRIMARY KEY,
                timestamp TIMESTAMPTZ NOT NULL,
                amount TEXT NOT NULL,
                delegator TEXT NOT NULL,
                block BIGINT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("failed to create delegations table")?;
        Ok(())
    }

    fn row_to_delegation(row: (DateTime<Utc>, String, String, i64)) -> Result<Delegation> {
        let (timestamp, amount, delegator, block) = row;
        let amount = amount
            .parse::<u64>()
            .with_context(|| format!("stored amount {amount:?} is not a valid integer"))?;
        Ok(Delegation {
            timestamp,
            amount,
            delegator,
            block: block as u64,
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn save_delegations(&self, delegations: &[FetchedDelegation]) -> Result<()> {
        if delegations.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        for delegation in delegations {
            sqlx::query(
                "INSERT INTO delegations (timestamp, amount, delegator, block) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(delegation.timestamp)
            .bind(delegation.amount.to_string())
            .bind(&delegation.sender.address)
            .bind(delegation.level as i64)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!("failed to insert delegation at level {}", delegation.level)
            })?;
        }

        tx.commit().await.context("failed to commit delegations")?;
        tracing::debug!(count = delegations.len(), "saved delegation batch");
        Ok(())
    }

    async fn current_level(&self) -> Result<u64> {
        let level = sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(block), 0) FROM delegations")
            .fetch_one(&self.pool)
            .await
            .context("failed to query database")?;
        Ok(level as u64)
    }

    async fn delete_from_level(&self, level: u64) -> Result<()> {
        let result = sqlx::query("DELETE FROM delegations WHERE block >= $1")
            .bind(level as i64)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete delegations from level {level}"))?;

        tracing::info!(
            level,
            removed = result.rows_affected(),
            "rolled back delegations"
        );
        Ok(())
    }

    async fn get_delegations(&self, year: Option<i32>) -> Result<Vec<Delegation>> {
        let rows = if let Some(year) = year {
            sqlx::query_as::<_, (DateTime<Utc>, String, String, i64)>(
                "SELECT timestamp, amount, delegator, block FROM delegations \
                 WHERE EXTRACT(YEAR FROM timestamp) = $1 ORDER BY timestamp DESC",
            )
            .bind(year)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, (DateTime<Utc>, String, String, i64)>(
                "SELECT timestamp, amount, delegator, block FROM delegations \
                 ORDER BY timestamp DESC",
            )
            .fetch_all(&self.pool)
            .await
        }
        .context("failed to query delegations")?;

        rows.into_iter().map(Self::row_to_delegation).collect()
    }
}
