//! Test doubles and fixtures
//!
//! In-memory collaborators for exercising the lifecycle state machine
//! without chains, Postgres, or a transport. Not part of the production
//! contract; the real gateway performs real on-chain checks.

use crate::bus::{MessageBus, OrderBroadcast, SecretBroadcast};
use crate::chain::ChainGateway;
use crate::config::{
    ApiConfig, ChainConfig, CoordinatorConfig, DatabaseConfig, MetricsConfig, OracleConfig,
    Settings, WalletConfig,
};
use crate::error::{ChainError, CoordinatorError, CoordinatorResult};
use crate::lifecycle::LifecycleController;
use crate::model::{
    CommitmentStatus, Order, OrderStats, OrderStatus, ResolverCommitment, Secret, SecretRecord,
    SwapIntent,
};
use crate::oracle::PriceOracle;
use crate::signature;
use crate::store::OrderStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, TransactionReceipt, H256, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const SRC_CHAIN: u64 = 84532;
pub const DST_CHAIN: u64 = 421614;
pub const SRC_FACTORY: Address = Address::repeat_byte(0xfa);
pub const DST_FACTORY: Address = Address::repeat_byte(0xfb);

// ---- store ----

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<H256, Order>>,
    secrets: Mutex<HashMap<H256, SecretRecord>>,
    commitments: Mutex<Vec<ResolverCommitment>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matching(&self, predicate: impl Fn(&Order) -> bool) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| predicate(o))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn health_check(&self) -> CoordinatorResult<()> {
        Ok(())
    }

    async fn save(&self, order: &Order) -> CoordinatorResult<()> {
        self.orders
            .lock()
            .unwrap()
            .insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, order_id: H256) -> CoordinatorResult<Option<Order>> {
        Ok(self.orders.lock().unwrap().get(&order_id).cloned())
    }

    async fn list_by_status(&self, status: OrderStatus) -> CoordinatorResult<Vec<Order>> {
        Ok(self.matching(|o| o.status == status))
    }

    async fn expired(&self, now: DateTime<Utc>) -> CoordinatorResult<Vec<Order>> {
        Ok(self.matching(|o| {
            matches!(
                o.status,
                OrderStatus::Active | OrderStatus::RescueAvailable
            ) && o.expires_at < now
        }))
    }

    async fn expired_commitments(&self, now: DateTime<Utc>) -> CoordinatorResult<Vec<Order>> {
        Ok(self.matching(|o| {
            o.status == OrderStatus::Committed
                && o.commitment_deadline.map(|d| d < now).unwrap_or(false)
        }))
    }

    async fn pending_reveal(&self, cutoff: DateTime<Utc>) -> CoordinatorResult<Vec<Order>> {
        Ok(self.matching(|o| {
            o.status == OrderStatus::Settling
                && o.dst_settlement_tx.is_some()
                && o.secret_revealed_at.is_none()
                && o.funds_moved_at.map(|t| t < cutoff).unwrap_or(false)
        }))
    }

    async fn competition_timed_out(&self, now: DateTime<Utc>) -> CoordinatorResult<Vec<Order>> {
        Ok(self.matching(|o| {
            o.status == OrderStatus::Competing
                && o.competition_deadline.map(|d| d < now).unwrap_or(false)
        }))
    }

    async fn save_secret(&self, record: &SecretRecord) -> CoordinatorResult<()> {
        self.secrets
            .lock()
            .unwrap()
            .entry(record.order_id)
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn get_secret(&self, order_id: H256) -> CoordinatorResult<Option<SecretRecord>> {
        Ok(self.secrets.lock().unwrap().get(&order_id).cloned())
    }

    async fn mark_revealed(&self, order_id: H256, at: DateTime<Utc>) -> CoordinatorResult<()> {
        if let Some(secret) = self.secrets.lock().unwrap().get_mut(&order_id) {
            secret.revealed_at = Some(at);
        }
        Ok(())
    }

    async fn save_commitment(&self, commitment: &ResolverCommitment) -> CoordinatorResult<()> {
        self.commitments.lock().unwrap().push(commitment.clone());
        Ok(())
    }

    async fn update_commitment_status(
        &self,
        order_id: H256,
        resolver: Address,
        status: CommitmentStatus,
    ) -> CoordinatorResult<()> {
        for commitment in self.commitments.lock().unwrap().iter_mut() {
            if commitment.order_id == order_id
                && commitment.resolver == resolver
                && commitment.status == CommitmentStatus::Active
            {
                commitment.status = status;
            }
        }
        Ok(())
    }

    async fn commitments_for_order(
        &self,
        order_id: H256,
    ) -> CoordinatorResult<Vec<ResolverCommitment>> {
        Ok(self
            .commitments
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> CoordinatorResult<OrderStats> {
        let mut stats = OrderStats::default();
        for order in self.orders.lock().unwrap().values() {
            match order.status {
                OrderStatus::Active => stats.active += 1,
                OrderStatus::Committed => stats.committed += 1,
                OrderStatus::Settling => stats.settling += 1,
                OrderStatus::Competing => stats.competing += 1,
                OrderStatus::Completed => stats.completed += 1,
                OrderStatus::Failed => stats.failed += 1,
                OrderStatus::RescueAvailable => stats.rescue_available += 1,
            }
        }
        Ok(stats)
    }

    async fn prune(&self, retention_days: u32) -> CoordinatorResult<u64> {
        let horizon = Utc::now() - chrono::Duration::days(retention_days as i64);
        let mut orders = self.orders.lock().unwrap();
        let doomed: Vec<H256> = orders
            .values()
            .filter(|o| o.status.is_terminal() && o.updated_at < horizon)
            .map(|o| o.id)
            .collect();
        for id in &doomed {
            orders.remove(id);
            self.secrets.lock().unwrap().remove(id);
            self.commitments
                .lock()
                .unwrap()
                .retain(|c| c.order_id != *id);
        }
        Ok(doomed.len() as u64)
    }
}

// ---- gateway ----

/// Scripted chain gateway. Reads come from the tables; submissions record
/// themselves and return deterministic hashes.
#[derive(Default)]
pub struct StubGateway {
    /// (chain, token, owner) -> allowance
    pub allowances: Mutex<HashMap<(u64, Address, Address), U256>>,
    /// (chain, account) -> native balance
    pub native_balances: Mutex<HashMap<(u64, Address), U256>>,
    /// (chain, account, token) -> token balance
    pub token_balances: Mutex<HashMap<(u64, Address, Address), U256>>,
    /// (chain, token) -> decimals, defaults to 6
    pub decimals: Mutex<HashMap<(u64, Address), u8>>,
    /// Next transfer_user_funds outcome override
    pub transfer_failure: Mutex<Option<ChainError>>,
    /// Next reveal_on_destination outcome override
    pub reveal_failure: Mutex<Option<ChainError>>,
    pub transfers: Mutex<Vec<(H256, Address, U256)>>,
    pub reveals: Mutex<Vec<(u64, Address, Secret)>>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_allowance(&self, chain_id: u64, token: Address, owner: Address, amount: U256) {
        self.allowances
            .lock()
            .unwrap()
            .insert((chain_id, token, owner), amount);
    }

    pub fn set_native_balance(&self, chain_id: u64, account: Address, amount: U256) {
        self.native_balances
            .lock()
            .unwrap()
            .insert((chain_id, account), amount);
    }

    pub fn set_token_balance(&self, chain_id: u64, account: Address, token: Address, amount: U256) {
        self.token_balances
            .lock()
            .unwrap()
            .insert((chain_id, account, token), amount);
    }

    pub fn fail_next_reveal(&self, error: ChainError) {
        *self.reveal_failure.lock().unwrap() = Some(error);
    }

    fn tx_hash_for(order_id: H256, salt: u8) -> H256 {
        let mut bytes = order_id.to_fixed_bytes();
        bytes[31] ^= salt;
        H256::from(bytes)
    }
}

#[async_trait]
impl ChainGateway for StubGateway {
    async fn allowance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
        _spender: Address,
    ) -> Result<U256, ChainError> {
        Ok(self
            .allowances
            .lock()
            .unwrap()
            .get(&(chain_id, token, owner))
            .copied()
            .unwrap_or_default())
    }

    async fn escrow_balance(
        &self,
        chain_id: u64,
        escrow: Address,
        token: Option<Address>,
    ) -> Result<U256, ChainError> {
        let balance = match token {
            None => self
                .native_balances
                .lock()
                .unwrap()
                .get(&(chain_id, escrow))
                .copied(),
            Some(token) => self
                .token_balances
                .lock()
                .unwrap()
                .get(&(chain_id, escrow, token))
                .copied(),
        };
        Ok(balance.unwrap_or_default())
    }

    async fn token_decimals(&self, chain_id: u64, token: Address) -> Result<u8, ChainError> {
        Ok(self
            .decimals
            .lock()
            .unwrap()
            .get(&(chain_id, token))
            .copied()
            .unwrap_or(6))
    }

    async fn transfer_user_funds(
        &self,
        _chain_id: u64,
        order_id: H256,
        from: Address,
        _token: Address,
        amount: U256,
    ) -> Result<H256, ChainError> {
        if let Some(error) = self.transfer_failure.lock().unwrap().take() {
            return Err(error);
        }
        self.transfers.lock().unwrap().push((order_id, from, amount));
        Ok(Self::tx_hash_for(order_id, 0x01))
    }

    async fn await_confirmations(
        &self,
        _chain_id: u64,
        _tx_hash: H256,
        _n: u64,
    ) -> Result<TransactionReceipt, ChainError> {
        Ok(TransactionReceipt::default())
    }

    async fn reveal_on_destination(
        &self,
        chain_id: u64,
        escrow: Address,
        preimage: &Secret,
    ) -> Result<H256, ChainError> {
        if let Some(error) = self.reveal_failure.lock().unwrap().take() {
            return Err(error);
        }
        self.reveals
            .lock()
            .unwrap()
            .push((chain_id, escrow, *preimage));
        Ok(H256::from(ethers::utils::keccak256(preimage.as_bytes())))
    }

    async fn extract_revealed_secret(
        &self,
        chain_id: u64,
        tx_hash: H256,
        _escrow: Address,
    ) -> Result<Secret, ChainError> {
        Err(ChainError::SecretNotFound { chain_id, tx_hash })
    }

    async fn health_check(&self) -> Vec<(u64, bool)> {
        vec![(SRC_CHAIN, true), (DST_CHAIN, true)]
    }

    fn connected_chains(&self) -> Vec<u64> {
        vec![SRC_CHAIN, DST_CHAIN]
    }
}

// ---- bus ----

#[derive(Default)]
pub struct CaptureBus {
    pub orders: Mutex<Vec<OrderBroadcast>>,
    pub secrets: Mutex<Vec<SecretBroadcast>>,
}

impl CaptureBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for CaptureBus {
    async fn publish_order(&self, broadcast: &OrderBroadcast) -> CoordinatorResult<()> {
        self.orders.lock().unwrap().push(broadcast.clone());
        Ok(())
    }

    async fn publish_secret(&self, broadcast: &SecretBroadcast) -> CoordinatorResult<()> {
        self.secrets.lock().unwrap().push(broadcast.clone());
        Ok(())
    }
}

// ---- oracle ----

pub struct StaticOracle {
    pub price: Mutex<Option<U256>>,
}

impl StaticOracle {
    pub fn quoting(price: u64) -> Self {
        Self {
            price: Mutex::new(Some(U256::from(price))),
        }
    }
}

#[async_trait]
impl PriceOracle for StaticOracle {
    async fn market_price(
        &self,
        src_token: Address,
        dst_token: Address,
    ) -> CoordinatorResult<U256> {
        self.price
            .lock()
            .unwrap()
            .ok_or(CoordinatorError::NoMarketPrice {
                src_token,
                dst_token,
            })
    }
}

// ---- fixtures ----

pub fn test_settings() -> Settings {
    let mut chains = HashMap::new();
    chains.insert(
        "base-sepolia".to_string(),
        ChainConfig {
            chain_id: SRC_CHAIN,
            name: "base-sepolia".to_string(),
            rpc_urls: vec!["http://localhost:8545".to_string()],
            escrow_factory: SRC_FACTORY,
            confirmation_blocks: Some(1),
            min_safety_deposit_wei: U256::from(10_000_000_000_000_000u64),
            enabled: true,
        },
    );
    chains.insert(
        "arbitrum-sepolia".to_string(),
        ChainConfig {
            chain_id: DST_CHAIN,
            name: "arbitrum-sepolia".to_string(),
            rpc_urls: vec!["http://localhost:8546".to_string()],
            escrow_factory: DST_FACTORY,
            confirmation_blocks: Some(1),
            min_safety_deposit_wei: U256::from(10_000_000_000_000_000u64),
            enabled: true,
        },
    );

    Settings {
        coordinator: CoordinatorConfig {
            instance_id: "test".to_string(),
            default_order_duration_secs: 300,
            fast_auction_duration_secs: 60,
            resolver_commitment_window_secs: 300,
            secret_reveal_delay_secs: 0,
            competition_window_secs: 300,
            retention_days: 30,
            reaper_interval_secs: 10,
            max_retries: 2,
            retry_delay_ms: 1,
            chain_call_timeout_secs: 5,
            health_check_interval_secs: 60,
        },
        database: DatabaseConfig {
            url: "postgres://localhost/unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        metrics: MetricsConfig {
            enabled: false,
            port: 0,
        },
        chains,
        wallet: WalletConfig {
            keystore_path: None,
            private_key_env: None,
        },
        oracle: OracleConfig {
            pairs: HashMap::new(),
        },
    }
}

/// A maker wallet, its signed scenario intent, the matching preimage, and
/// the signature over the order digest.
pub fn signed_intent(preimage_byte: u8) -> (SwapIntent, Signature, Secret) {
    let wallet = LocalWallet::from_bytes(&[0x42u8; 32]).unwrap();
    let preimage = Secret::from([preimage_byte; 32]);

    let intent = SwapIntent {
        maker: wallet.address(),
        src_chain: SRC_CHAIN,
        src_token: Address::repeat_byte(0x01),
        src_amount: U256::from(1_000_000u64),
        dst_chain: DST_CHAIN,
        dst_token: Address::repeat_byte(0x02),
        secret_hash: preimage.hash(),
        min_acceptable_price: U256::from(900_000u64),
        order_duration_secs: 300,
        nonce: U256::from(1u64),
        deadline: 4_000_000_000,
    };

    let digest = signature::order_id(&intent, SRC_FACTORY);
    let sig = wallet.sign_hash(digest).unwrap();
    (intent, sig, preimage)
}

/// Everything wired together around the in-memory doubles.
pub struct Harness {
    pub controller: Arc<LifecycleController>,
    pub store: Arc<MemoryOrderStore>,
    pub gateway: Arc<StubGateway>,
    pub bus: Arc<CaptureBus>,
    pub oracle: Arc<StaticOracle>,
    pub settings: Arc<Settings>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_market_price(1_000_000)
    }

    pub fn with_market_price(price: u64) -> Self {
        let store = Arc::new(MemoryOrderStore::new());
        let gateway = Arc::new(StubGateway::new());
        let bus = Arc::new(CaptureBus::new());
        let oracle = Arc::new(StaticOracle::quoting(price));
        let settings = Arc::new(test_settings());
        let controller = Arc::new(LifecycleController::new(
            store.clone(),
            gateway.clone(),
            bus.clone(),
            oracle.clone(),
            settings.clone(),
        ));
        Self {
            controller,
            store,
            gateway,
            bus,
            oracle,
            settings,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
