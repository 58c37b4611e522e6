//! Order persistence
//!
//! Single point of truth for orders, secrets, and the commitment audit
//! trail. Point-in-time consistent reads per order id; list queries may
//! lag. Writes to an individual order are serialized by the lifecycle
//! controller's per-order lock, not here.

mod postgres;

pub use postgres::PgOrderStore;

use crate::error::CoordinatorResult;
use crate::model::{
    CommitmentStatus, Order, OrderStats, OrderStatus, ResolverCommitment, SecretRecord,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Backend liveness probe.
    async fn health_check(&self) -> CoordinatorResult<()>;

    /// Insert or update an order.
    async fn save(&self, order: &Order) -> CoordinatorResult<()>;

    async fn get(&self, order_id: H256) -> CoordinatorResult<Option<Order>>;

    async fn list_by_status(&self, status: OrderStatus) -> CoordinatorResult<Vec<Order>>;

    /// Broadcast-able orders past their lifetime (ACTIVE and
    /// RESCUE_AVAILABLE).
    async fn expired(&self, now: DateTime<Utc>) -> CoordinatorResult<Vec<Order>>;

    /// COMMITTED orders whose resolver missed the commitment deadline.
    async fn expired_commitments(&self, now: DateTime<Utc>) -> CoordinatorResult<Vec<Order>>;

    /// SETTLING orders with a reported destination fill, no reveal, and
    /// funds moved before `cutoff` (the reaper's backstop for a lost
    /// settlement supervisor).
    async fn pending_reveal(&self, cutoff: DateTime<Utc>) -> CoordinatorResult<Vec<Order>>;

    /// COMPETING orders past their competition deadline.
    async fn competition_timed_out(&self, now: DateTime<Utc>) -> CoordinatorResult<Vec<Order>>;

    async fn save_secret(&self, record: &SecretRecord) -> CoordinatorResult<()>;

    async fn get_secret(&self, order_id: H256) -> CoordinatorResult<Option<SecretRecord>>;

    async fn mark_revealed(&self, order_id: H256, at: DateTime<Utc>) -> CoordinatorResult<()>;

    /// Append a commitment audit row.
    async fn save_commitment(&self, commitment: &ResolverCommitment) -> CoordinatorResult<()>;

    /// Move the active audit row for `(order_id, resolver)` to `status`.
    async fn update_commitment_status(
        &self,
        order_id: H256,
        resolver: Address,
        status: CommitmentStatus,
    ) -> CoordinatorResult<()>;

    async fn commitments_for_order(
        &self,
        order_id: H256,
    ) -> CoordinatorResult<Vec<ResolverCommitment>>;

    async fn stats(&self) -> CoordinatorResult<OrderStats>;

    /// Drop terminal orders (and their secrets and audit rows) older than
    /// `retention_days`. Returns the number of orders removed.
    async fn prune(&self, retention_days: u32) -> CoordinatorResult<u64>;
}
