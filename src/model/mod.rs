//! Order domain model
//!
//! An [`Order`] is created at admission and from then on mutated only by
//! the lifecycle controller. The preimage lives in a separate
//! [`SecretRecord`] and never rides along with the order row.

pub mod secret;

pub use secret::Secret;

use chrono::{DateTime, Duration, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Active,
    Committed,
    Settling,
    Competing,
    Completed,
    Failed,
    RescueAvailable,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Settling => "settling",
            Self::Competing => "competing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RescueAvailable => "rescue_available",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "committed" => Some(Self::Committed),
            "settling" => Some(Self::Settling),
            "competing" => Some(Self::Competing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "rescue_available" => Some(Self::RescueAvailable),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The transition DAG. The only re-entrant edge is
    /// RESCUE_AVAILABLE -> COMMITTED; terminal states have no exits.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (*self, next),
            (Active, Committed)
                | (Active, Failed)
                | (Committed, Settling)
                | (Committed, RescueAvailable)
                | (RescueAvailable, Committed)
                | (RescueAvailable, Failed)
                | (Settling, Competing)
                | (Competing, Completed)
                | (Competing, Failed)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Committed => write!(f, "COMMITTED"),
            Self::Settling => write!(f, "SETTLING"),
            Self::Competing => write!(f, "COMPETING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::RescueAvailable => write!(f, "RESCUE_AVAILABLE"),
        }
    }
}

/// The signed trade intent, exactly as hashed for the order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapIntent {
    pub maker: Address,
    pub src_chain: u64,
    pub src_token: Address,
    pub src_amount: U256,
    pub dst_chain: u64,
    pub dst_token: Address,
    pub secret_hash: H256,
    /// Floor price at the 6-decimal internal scale.
    pub min_acceptable_price: U256,
    /// Lifetime of the order in seconds from admission.
    pub order_duration_secs: u64,
    pub nonce: U256,
    /// Unix timestamp after which the signature is void.
    pub deadline: u64,
}

/// Descending-price auction parameters, fixed at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionParams {
    pub start_price: U256,
    pub end_price: U256,
    pub duration_secs: u64,
    pub start_time: DateTime<Utc>,
}

/// Primary entity: one swap order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: H256,
    pub intent: SwapIntent,
    pub status: OrderStatus,
    pub auction: AuctionParams,
    /// Oracle quote captured at admission, 6-decimal scale.
    pub market_price: U256,

    pub resolver: Option<Address>,
    pub committed_price: Option<U256>,
    pub commitment_time: Option<DateTime<Utc>>,
    pub commitment_deadline: Option<DateTime<Utc>>,

    pub src_escrow: Option<Address>,
    pub dst_escrow: Option<Address>,

    pub funds_moved_at: Option<DateTime<Utc>>,
    pub src_settlement_tx: Option<H256>,
    pub dst_settlement_tx: Option<H256>,
    /// Destination amount reported at settlement, base units.
    pub dst_amount: Option<U256>,

    pub secret_revealed_at: Option<DateTime<Utc>>,
    pub secret_reveal_tx: Option<H256>,
    pub competition_deadline: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        id: H256,
        intent: SwapIntent,
        market_price: U256,
        auction: AuctionParams,
        now: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        let expires_at = now + lifetime;
        Self {
            id,
            intent,
            status: OrderStatus::Active,
            auction,
            market_price,
            resolver: None,
            committed_price: None,
            commitment_time: None,
            commitment_deadline: None,
            src_escrow: None,
            dst_escrow: None,
            funds_moved_at: None,
            src_settlement_tx: None,
            dst_settlement_tx: None,
            dst_amount: None,
            secret_revealed_at: None,
            secret_reveal_tx: None,
            competition_deadline: None,
            created_at: now,
            expires_at,
            updated_at: now,
        }
    }

    /// The resolver currently holding the order, if the status grants one.
    pub fn active_resolver(&self) -> Option<Address> {
        match self.status {
            OrderStatus::Committed | OrderStatus::Settling | OrderStatus::Competing => {
                self.resolver
            }
            _ => None,
        }
    }
}

/// Status of a row in the commitment audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentStatus {
    Active,
    Failed,
    Completed,
}

impl CommitmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "failed" => Some(Self::Failed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Append-only audit record of a resolver committing to an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverCommitment {
    pub order_id: H256,
    pub resolver: Address,
    pub accepted_price: U256,
    pub timestamp: DateTime<Utc>,
    pub status: CommitmentStatus,
}

/// Stored preimage, isolated from every broadcast payload.
#[derive(Debug, Clone)]
pub struct SecretRecord {
    pub order_id: H256,
    pub preimage: Secret,
    pub hash: H256,
    pub created_at: DateTime<Utc>,
    pub revealed_at: Option<DateTime<Utc>>,
}

/// Order counts by status, for the stats endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderStats {
    pub active: u64,
    pub committed: u64,
    pub settling: u64,
    pub competing: u64,
    pub completed: u64,
    pub failed: u64,
    pub rescue_available: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_never_revert() {
        use OrderStatus::*;
        for next in [
            Active,
            Committed,
            Settling,
            Competing,
            Completed,
            Failed,
            RescueAvailable,
        ] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn rescue_is_the_only_reentrant_edge() {
        use OrderStatus::*;
        assert!(Committed.can_transition_to(RescueAvailable));
        assert!(RescueAvailable.can_transition_to(Committed));
        // No other path leads back to COMMITTED.
        assert!(!Settling.can_transition_to(Committed));
        assert!(!Competing.can_transition_to(Committed));
    }

    #[test]
    fn no_skipping_settlement() {
        use OrderStatus::*;
        assert!(!Active.can_transition_to(Settling));
        assert!(!Active.can_transition_to(Competing));
        assert!(!Committed.can_transition_to(Competing));
        assert!(!Committed.can_transition_to(Completed));
        assert!(!Settling.can_transition_to(Completed));
    }

    #[test]
    fn status_string_round_trip() {
        use OrderStatus::*;
        for status in [
            Active,
            Committed,
            Settling,
            Competing,
            Completed,
            Failed,
            RescueAvailable,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("bogus"), None);
    }

    #[test]
    fn active_resolver_follows_status() {
        let intent = SwapIntent {
            maker: Address::repeat_byte(0xaa),
            src_chain: 84532,
            src_token: Address::repeat_byte(0x01),
            src_amount: U256::from(1_000_000u64),
            dst_chain: 421614,
            dst_token: Address::repeat_byte(0x02),
            secret_hash: H256::repeat_byte(0x03),
            min_acceptable_price: U256::from(900_000u64),
            order_duration_secs: 300,
            nonce: U256::one(),
            deadline: 4_000_000_000,
        };
        let now = Utc::now();
        let auction = AuctionParams {
            start_price: U256::from(1_000_000u64),
            end_price: U256::from(900_000u64),
            duration_secs: 60,
            start_time: now,
        };
        let mut order = Order::new(
            H256::repeat_byte(0x11),
            intent,
            U256::from(1_000_000u64),
            auction,
            now,
            Duration::seconds(300),
        );
        order.resolver = Some(Address::repeat_byte(0xbb));

        assert_eq!(order.active_resolver(), None);
        order.status = OrderStatus::Committed;
        assert_eq!(order.active_resolver(), Some(Address::repeat_byte(0xbb)));
        order.status = OrderStatus::RescueAvailable;
        assert_eq!(order.active_resolver(), None);
    }
}
