//! PostgreSQL order store

use super::OrderStore;
use crate::config::DatabaseConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::model::{
    CommitmentStatus, Order, OrderStats, OrderStatus, ResolverCommitment, Secret, SecretRecord,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ethers::types::{Address, H256, U256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub async fn new(config: &DatabaseConfig) -> CoordinatorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                order_id BYTEA PRIMARY KEY,
                status VARCHAR(20) NOT NULL,
                resolver VARCHAR(42),
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                commitment_deadline TIMESTAMPTZ,
                competition_deadline TIMESTAMPTZ,
                funds_moved_at TIMESTAMPTZ,
                secret_revealed_at TIMESTAMPTZ,
                dst_settlement_tx VARCHAR(66),
                order_data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_orders_status_created ON orders (status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_orders_status_expires ON orders (status, expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_orders_status_commitment
             ON orders (status, commitment_deadline)",
            "CREATE INDEX IF NOT EXISTS idx_orders_resolver_created
             ON orders (resolver, created_at)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                order_id BYTEA PRIMARY KEY,
                preimage BYTEA NOT NULL,
                hash BYTEA NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                revealed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS commitments (
                id BIGSERIAL PRIMARY KEY,
                order_id BYTEA NOT NULL,
                resolver VARCHAR(42) NOT NULL,
                accepted_price TEXT NOT NULL,
                committed_at TIMESTAMPTZ NOT NULL,
                status VARCHAR(16) NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_commitments_order ON commitments (order_id, id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_commitments_resolver
             ON commitments (resolver, committed_at)",
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    fn order_from_row(row: &PgRow) -> CoordinatorResult<Order> {
        let data: serde_json::Value = row.get("order_data");
        serde_json::from_value(data)
            .map_err(|e| CoordinatorError::Internal(format!("corrupt order row: {e}")))
    }

    async fn orders_where(
        &self,
        predicate: &str,
        statuses: &[OrderStatus],
        deadline: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<Order>> {
        let status_strs: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let query = format!(
            "SELECT order_data FROM orders WHERE status = ANY($1) AND {predicate} ORDER BY created_at"
        );
        let rows = sqlx::query(&query)
            .bind(&status_strs)
            .bind(deadline)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::order_from_row).collect()
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn health_check(&self) -> CoordinatorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn save(&self, order: &Order) -> CoordinatorResult<()> {
        let data = serde_json::to_value(order)
            .map_err(|e| CoordinatorError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO orders
                (order_id, status, resolver, created_at, expires_at, commitment_deadline,
                 competition_deadline, funds_moved_at, secret_revealed_at, dst_settlement_tx,
                 order_data, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (order_id)
            DO UPDATE SET
                status = $2, resolver = $3, commitment_deadline = $6,
                competition_deadline = $7, funds_moved_at = $8, secret_revealed_at = $9,
                dst_settlement_tx = $10, order_data = $11, updated_at = $12
            "#,
        )
        .bind(order.id.as_bytes())
        .bind(order.status.as_str())
        .bind(order.resolver.map(|r| format!("{r:?}")))
        .bind(order.created_at)
        .bind(order.expires_at)
        .bind(order.commitment_deadline)
        .bind(order.competition_deadline)
        .bind(order.funds_moved_at)
        .bind(order.secret_revealed_at)
        .bind(order.dst_settlement_tx.map(|t| format!("{t:?}")))
        .bind(data)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Saved order {:?} ({})", order.id, order.status);
        Ok(())
    }

    async fn get(&self, order_id: H256) -> CoordinatorResult<Option<Order>> {
        let row = sqlx::query("SELECT order_data FROM orders WHERE order_id = $1")
            .bind(order_id.as_bytes())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::order_from_row).transpose()
    }

    async fn list_by_status(&self, status: OrderStatus) -> CoordinatorResult<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT order_data FROM orders WHERE status = $1 ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::order_from_row).collect()
    }

    async fn expired(&self, now: DateTime<Utc>) -> CoordinatorResult<Vec<Order>> {
        self.orders_where(
            "expires_at < $2",
            &[OrderStatus::Active, OrderStatus::RescueAvailable],
            now,
        )
        .await
    }

    async fn expired_commitments(&self, now: DateTime<Utc>) -> CoordinatorResult<Vec<Order>> {
        self.orders_where(
            "commitment_deadline IS NOT NULL AND commitment_deadline < $2",
            &[OrderStatus::Committed],
            now,
        )
        .await
    }

    async fn pending_reveal(&self, cutoff: DateTime<Utc>) -> CoordinatorResult<Vec<Order>> {
        self.orders_where(
            "dst_settlement_tx IS NOT NULL AND secret_revealed_at IS NULL
             AND funds_moved_at IS NOT NULL AND funds_moved_at < $2",
            &[OrderStatus::Settling],
            cutoff,
        )
        .await
    }

    async fn competition_timed_out(&self, now: DateTime<Utc>) -> CoordinatorResult<Vec<Order>> {
        self.orders_where(
            "competition_deadline IS NOT NULL AND competition_deadline < $2",
            &[OrderStatus::Competing],
            now,
        )
        .await
    }

    async fn save_secret(&self, record: &SecretRecord) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO secrets (order_id, preimage, hash, created_at, revealed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(record.order_id.as_bytes())
        .bind(&record.preimage.as_bytes()[..])
        .bind(record.hash.as_bytes())
        .bind(record.created_at)
        .bind(record.revealed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_secret(&self, order_id: H256) -> CoordinatorResult<Option<SecretRecord>> {
        let row = sqlx::query(
            "SELECT preimage, hash, created_at, revealed_at FROM secrets WHERE order_id = $1",
        )
        .bind(order_id.as_bytes())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let preimage_bytes: Vec<u8> = row.get("preimage");
        let preimage = Secret::from_vec(&preimage_bytes)
            .map_err(|e| CoordinatorError::Internal(format!("corrupt secret row: {e}")))?;
        let hash_bytes: Vec<u8> = row.get("hash");

        Ok(Some(SecretRecord {
            order_id,
            preimage,
            hash: H256::from_slice(&hash_bytes),
            created_at: row.get("created_at"),
            revealed_at: row.get("revealed_at"),
        }))
    }

    async fn mark_revealed(&self, order_id: H256, at: DateTime<Utc>) -> CoordinatorResult<()> {
        sqlx::query("UPDATE secrets SET revealed_at = $2 WHERE order_id = $1")
            .bind(order_id.as_bytes())
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_commitment(&self, commitment: &ResolverCommitment) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO commitments (order_id, resolver, accepted_price, committed_at, status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(commitment.order_id.as_bytes())
        .bind(format!("{:?}", commitment.resolver))
        .bind(commitment.accepted_price.to_string())
        .bind(commitment.timestamp)
        .bind(commitment.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_commitment_status(
        &self,
        order_id: H256,
        resolver: Address,
        status: CommitmentStatus,
    ) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            UPDATE commitments SET status = $3
            WHERE order_id = $1 AND resolver = $2 AND status = 'active'
            "#,
        )
        .bind(order_id.as_bytes())
        .bind(format!("{resolver:?}"))
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn commitments_for_order(
        &self,
        order_id: H256,
    ) -> CoordinatorResult<Vec<ResolverCommitment>> {
        let rows = sqlx::query(
            r#"
            SELECT resolver, accepted_price, committed_at, status
            FROM commitments WHERE order_id = $1 ORDER BY id
            "#,
        )
        .bind(order_id.as_bytes())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let resolver: String = row.get("resolver");
                let price: String = row.get("accepted_price");
                let status: String = row.get("status");
                Ok(ResolverCommitment {
                    order_id,
                    resolver: Address::from_str(&resolver).map_err(|e| {
                        CoordinatorError::Internal(format!("corrupt commitment row: {e}"))
                    })?,
                    accepted_price: U256::from_dec_str(&price).map_err(|e| {
                        CoordinatorError::Internal(format!("corrupt commitment row: {e}"))
                    })?,
                    timestamp: row.get("committed_at"),
                    status: CommitmentStatus::parse(&status).ok_or_else(|| {
                        CoordinatorError::Internal(format!(
                            "unknown commitment status `{status}`"
                        ))
                    })?,
                })
            })
            .collect()
    }

    async fn stats(&self) -> CoordinatorResult<OrderStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'active') as active,
                COUNT(*) FILTER (WHERE status = 'committed') as committed,
                COUNT(*) FILTER (WHERE status = 'settling') as settling,
                COUNT(*) FILTER (WHERE status = 'competing') as competing,
                COUNT(*) FILTER (WHERE status = 'completed') as completed,
                COUNT(*) FILTER (WHERE status = 'failed') as failed,
                COUNT(*) FILTER (WHERE status = 'rescue_available') as rescue_available
            FROM orders
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OrderStats {
            active: row.get::<i64, _>("active") as u64,
            committed: row.get::<i64, _>("committed") as u64,
            settling: row.get::<i64, _>("settling") as u64,
            competing: row.get::<i64, _>("competing") as u64,
            completed: row.get::<i64, _>("completed") as u64,
            failed: row.get::<i64, _>("failed") as u64,
            rescue_available: row.get::<i64, _>("rescue_available") as u64,
        })
    }

    async fn prune(&self, retention_days: u32) -> CoordinatorResult<u64> {
        let horizon = Utc::now() - Duration::days(retention_days as i64);

        let rows = sqlx::query(
            r#"
            DELETE FROM orders
            WHERE status IN ('completed', 'failed') AND updated_at < $1
            RETURNING order_id
            "#,
        )
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Vec<u8>> = rows.into_iter().map(|r| r.get("order_id")).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        sqlx::query("DELETE FROM secrets WHERE order_id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM commitments WHERE order_id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await?;

        info!("Pruned {} archived orders", ids.len());
        Ok(ids.len() as u64)
    }
}
