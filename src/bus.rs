//! Fan-out messaging to the resolver fleet
//!
//! Two topics: order broadcasts at admission (and on rescue re-broadcast)
//! and secret broadcasts that open the competition window. Delivery is
//! at-least-once; consumers must be idempotent on `(order_id, kind)`.

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::model::{Order, Secret};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Auction announcement. Carries the redacted order (no preimage, no
/// signature) plus everything a resolver needs to price a fill without a
/// round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBroadcast {
    pub order_id: H256,
    pub order_data: Order,
    pub timestamp: DateTime<Utc>,
    pub auction_start_price: U256,
    pub auction_end_price: U256,
    pub auction_duration_secs: u64,
    pub current_price: U256,
    pub src_token_decimals: u8,
    pub dst_token_decimals: u8,
}

/// Competition start: the preimage goes public so any party can unlock the
/// destination escrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBroadcast {
    pub order_id: H256,
    pub preimage: Secret,
    pub resolver_address: Address,
    pub src_escrow: Address,
    pub dst_escrow: Address,
    pub src_chain: u64,
    pub dst_chain: u64,
    pub src_amount: U256,
    pub dst_amount: U256,
    pub timestamp: DateTime<Utc>,
    pub competition_deadline: DateTime<Utc>,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_order(&self, broadcast: &OrderBroadcast) -> CoordinatorResult<()>;
    async fn publish_secret(&self, broadcast: &SecretBroadcast) -> CoordinatorResult<()>;
}

/// In-process fan-out over tokio broadcast channels. Subscribers are the
/// transport adapters pushing to the resolver fleet.
pub struct BroadcastBus {
    order_tx: broadcast::Sender<OrderBroadcast>,
    secret_tx: broadcast::Sender<SecretBroadcast>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (order_tx, _) = broadcast::channel(capacity);
        let (secret_tx, _) = broadcast::channel(capacity);
        Self {
            order_tx,
            secret_tx,
        }
    }

    pub fn subscribe_orders(&self) -> broadcast::Receiver<OrderBroadcast> {
        self.order_tx.subscribe()
    }

    pub fn subscribe_secrets(&self) -> broadcast::Receiver<SecretBroadcast> {
        self.secret_tx.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl MessageBus for BroadcastBus {
    async fn publish_order(&self, broadcast: &OrderBroadcast) -> CoordinatorResult<()> {
        // No receivers is fine; the fleet may not be attached yet.
        let _ = self.order_tx.send(broadcast.clone());
        Ok(())
    }

    async fn publish_secret(&self, broadcast: &SecretBroadcast) -> CoordinatorResult<()> {
        self.secret_tx
            .send(broadcast.clone())
            .map_err(|_| CoordinatorError::Bus("no secret subscribers attached".to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_broadcast_serializes_preimage_as_hex() {
        let msg = SecretBroadcast {
            order_id: H256::repeat_byte(0x11),
            preimage: Secret::from([7u8; 32]),
            resolver_address: Address::repeat_byte(0xbb),
            src_escrow: Address::repeat_byte(0x01),
            dst_escrow: Address::repeat_byte(0x02),
            src_chain: 84532,
            dst_chain: 421614,
            src_amount: U256::from(1_000_000u64),
            dst_amount: U256::from(950_000u64),
            timestamp: Utc::now(),
            competition_deadline: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json["preimage"],
            format!("0x{}", "07".repeat(32)),
        );
        assert!(json.get("competitionDeadline").is_some());
    }

    #[tokio::test]
    async fn publish_secret_without_subscribers_is_an_error() {
        let bus = BroadcastBus::new(16);
        let msg = SecretBroadcast {
            order_id: H256::zero(),
            preimage: Secret::from([1u8; 32]),
            resolver_address: Address::zero(),
            src_escrow: Address::zero(),
            dst_escrow: Address::zero(),
            src_chain: 1,
            dst_chain: 2,
            src_amount: U256::zero(),
            dst_amount: U256::zero(),
            timestamp: Utc::now(),
            competition_deadline: Utc::now(),
        };
        assert!(bus.publish_secret(&msg).await.is_err());

        let _rx = bus.subscribe_secrets();
        assert!(bus.publish_secret(&msg).await.is_ok());
    }
}
