//! EVM gateway: reads, submissions, confirmations
//!
//! Adapted submission discipline: one in-flight transaction per signer per
//! chain, nonce fetched under the submission lock, bounded timeout per
//! attempt and exponential back-off between attempts.

use super::abi;
use super::provider::ChainProvider;
use super::ChainGateway;
use crate::config::Settings;
use crate::error::{ChainError, CoordinatorError, CoordinatorResult};
use crate::model::Secret;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Cadence of receipt polling while waiting for confirmations.
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Give a submitted hash this long to surface a receipt before TX_NOT_FOUND.
const RECEIPT_GRACE: Duration = Duration::from_secs(120);
/// Overall budget for one confirmation wait.
const CONFIRMATION_BUDGET: Duration = Duration::from_secs(600);

pub struct EvmGateway {
    /// Chain providers indexed by chain ID
    providers: DashMap<u64, Arc<ChainProvider>>,
    /// One submission at a time per chain for this signer
    submission_locks: DashMap<u64, Arc<Mutex<()>>>,
    /// Wallet for signing
    wallet: LocalWallet,
    call_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl EvmGateway {
    pub fn new(settings: &Settings) -> CoordinatorResult<Self> {
        let wallet = Self::load_wallet(settings)?;
        info!("Chain gateway signer: {:?}", wallet.address());

        let providers = DashMap::new();
        for (name, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} (ID: {})",
                name, chain_config.chain_id
            );
            let provider = ChainProvider::new(chain_config.clone())?;
            providers.insert(chain_config.chain_id, Arc::new(provider));
        }

        Ok(Self {
            providers,
            submission_locks: DashMap::new(),
            wallet,
            call_timeout: Duration::from_secs(settings.coordinator.chain_call_timeout_secs),
            max_retries: settings.coordinator.max_retries,
            retry_delay: Duration::from_millis(settings.coordinator.retry_delay_ms),
        })
    }

    /// Load wallet from environment or keystore
    fn load_wallet(settings: &Settings) -> CoordinatorResult<LocalWallet> {
        if let Some(env_name) = &settings.wallet.private_key_env {
            if let Ok(key) = std::env::var(env_name) {
                return key.parse::<LocalWallet>().map_err(|e| {
                    CoordinatorError::Config(format!("Invalid private key in {env_name}: {e}"))
                });
            }
        }

        // Encrypted keystore support would go here; dev deployments use the
        // environment variable.
        Err(CoordinatorError::Config(
            "No wallet configured. Set the configured private_key_env variable".to_string(),
        ))
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }

    fn provider(&self, chain_id: u64) -> Result<Arc<ChainProvider>, ChainError> {
        self.providers
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or(ChainError::UnknownChain { chain_id })
    }

    fn submission_lock(&self, chain_id: u64) -> Arc<Mutex<()>> {
        self.submission_locks
            .entry(chain_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read-only call with the per-attempt timeout applied.
    async fn timed_call(
        &self,
        provider: &ChainProvider,
        tx: &TypedTransaction,
        operation: &str,
    ) -> Result<Bytes, ChainError> {
        timeout(self.call_timeout, provider.call(tx))
            .await
            .map_err(|_| ChainError::Timeout {
                chain_id: provider.chain_id(),
                operation: operation.to_string(),
            })?
    }

    fn read_tx(to: Address, data: Bytes) -> TypedTransaction {
        TransactionRequest::new().to(to).data(data).into()
    }

    /// Sign and broadcast, retrying transient failures with back-off.
    ///
    /// Holds the per-chain submission lock for the whole attempt sequence
    /// so a retry never races a later submission for the same nonce.
    async fn submit(
        &self,
        chain_id: u64,
        to: Address,
        data: Bytes,
    ) -> Result<H256, ChainError> {
        let provider = self.provider(chain_id)?;
        let lock = self.submission_lock(chain_id);
        let _guard = lock.lock().await;

        let wallet = self.wallet.clone().with_chain_id(chain_id);

        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.max_retries {
            attempts += 1;

            let nonce = provider.get_pending_nonce(wallet.address()).await?;
            let gas_price = provider.get_gas_price().await?;
            let mut tx: TypedTransaction = TransactionRequest::new()
                .from(wallet.address())
                .to(to)
                .data(data.clone())
                .nonce(nonce)
                .gas_price(gas_price)
                .into();
            let gas = provider.estimate_gas(&tx).await?;
            tx.set_gas(gas * 120u64 / 100u64);

            let signature = wallet
                .sign_transaction(&tx)
                .await
                .map_err(|e| ChainError::Rejected {
                    chain_id,
                    reason: format!("signing failed: {e}"),
                })?;
            let raw = tx.rlp_signed(&signature);

            match timeout(self.call_timeout, provider.send_raw_transaction(raw)).await {
                Ok(Ok(tx_hash)) => {
                    info!(
                        "Submitted {:?} on chain {} (attempt {}/{})",
                        tx_hash, chain_id, attempts, self.max_retries
                    );
                    return Ok(tx_hash);
                }
                Ok(Err(e)) => {
                    let reason = e.to_string();
                    if reason.contains("nonce too low") {
                        // Stale pending view; the refetch next attempt heals it.
                        warn!("Nonce too low on chain {}, refetching", chain_id);
                    } else if !reason.contains("underpriced") {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(
                        "Submission timeout on chain {} (attempt {})",
                        chain_id, attempts
                    );
                    last_error = Some(ChainError::Timeout {
                        chain_id,
                        operation: "send transaction".to_string(),
                    });
                }
            }

            if attempts < self.max_retries {
                let backoff = self.retry_delay * 2u32.saturating_pow(attempts - 1);
                tokio::time::sleep(backoff.min(Duration::from_secs(30))).await;
            }
        }

        Err(last_error.unwrap_or(ChainError::Rejected {
            chain_id,
            reason: "submission retries exhausted".to_string(),
        }))
    }

    /// Map a claim revert reason to the HTLC verdict it encodes.
    fn map_claim_revert(chain_id: u64, escrow: Address, reason: &str) -> ChainError {
        let lower = reason.to_lowercase();
        if lower.contains("claimed") {
            ChainError::AlreadyClaimed { chain_id, escrow }
        } else if lower.contains("deadline") || lower.contains("expired") {
            ChainError::DeadlinePassed { chain_id, escrow }
        } else if lower.contains("hash") || lower.contains("preimage") {
            ChainError::HashMismatch { chain_id }
        } else {
            ChainError::Rejected {
                chain_id,
                reason: reason.to_string(),
            }
        }
    }
}

#[async_trait]
impl ChainGateway for EvmGateway {
    async fn allowance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        let provider = self.provider(chain_id)?;
        let tx = Self::read_tx(token, abi::allowance_calldata(owner, spender));
        let raw = self.timed_call(&provider, &tx, "allowance").await?;
        abi::decode_uint(&raw).ok_or_else(|| ChainError::ChainUnreachable {
            chain_id,
            message: "undecodable allowance response".to_string(),
        })
    }

    async fn escrow_balance(
        &self,
        chain_id: u64,
        escrow: Address,
        token: Option<Address>,
    ) -> Result<U256, ChainError> {
        let provider = self.provider(chain_id)?;
        match token {
            None => {
                timeout(self.call_timeout, provider.get_balance(escrow))
                    .await
                    .map_err(|_| ChainError::Timeout {
                        chain_id,
                        operation: "native balance".to_string(),
                    })?
            }
            Some(token) => {
                let tx = Self::read_tx(token, abi::balance_of_calldata(escrow));
                let raw = self.timed_call(&provider, &tx, "balanceOf").await?;
                abi::decode_uint(&raw).ok_or_else(|| ChainError::ChainUnreachable {
                    chain_id,
                    message: "undecodable balance response".to_string(),
                })
            }
        }
    }

    async fn token_decimals(&self, chain_id: u64, token: Address) -> Result<u8, ChainError> {
        let provider = self.provider(chain_id)?;
        let tx = Self::read_tx(token, abi::decimals_calldata());
        match self.timed_call(&provider, &tx, "decimals").await {
            Ok(raw) => Ok(abi::decode_decimals(&raw).unwrap_or_else(|| {
                warn!("Token {:?} on chain {} returned undecodable decimals, assuming 18", token, chain_id);
                18
            })),
            // Nonstandard token without decimals(); the ERC-20 default.
            Err(ChainError::Rejected { .. }) => Ok(18),
            Err(e) => Err(e),
        }
    }

    async fn transfer_user_funds(
        &self,
        chain_id: u64,
        order_id: H256,
        from: Address,
        token: Address,
        amount: U256,
    ) -> Result<H256, ChainError> {
        let provider = self.provider(chain_id)?;
        let factory = provider.escrow_factory();
        let data = abi::transfer_user_funds_calldata(order_id, from, token, amount);

        // Simulate first so a revert becomes a typed verdict instead of a
        // burned submission.
        let mut tx = Self::read_tx(factory, data.clone());
        tx.set_from(self.wallet.address());
        match self.timed_call(&provider, &tx, "transferUserFunds").await {
            Ok(_) => {}
            Err(ChainError::Rejected { reason, .. }) => {
                let lower = reason.to_lowercase();
                if lower.contains("allowance") || lower.contains("insufficient") {
                    let have = self.allowance(chain_id, token, from, factory).await?;
                    return Err(ChainError::InsufficientAllowance {
                        chain_id,
                        have,
                        need: amount,
                    });
                }
                if lower.contains("unauthorized") || lower.contains("not authorized") {
                    return Err(ChainError::NotAuthorized {
                        chain_id,
                        owner: from,
                    });
                }
                return Err(ChainError::Rejected { chain_id, reason });
            }
            Err(e) => return Err(e),
        }

        self.submit(chain_id, factory, data).await
    }

    async fn await_confirmations(
        &self,
        chain_id: u64,
        tx_hash: H256,
        n: u64,
    ) -> Result<TransactionReceipt, ChainError> {
        let provider = self.provider(chain_id)?;
        let started = tokio::time::Instant::now();

        loop {
            if started.elapsed() > CONFIRMATION_BUDGET {
                return Err(ChainError::Timeout {
                    chain_id,
                    operation: format!("{n} confirmations of {tx_hash:?}"),
                });
            }

            match provider.get_transaction_receipt(tx_hash).await? {
                None => {
                    if started.elapsed() > RECEIPT_GRACE {
                        return Err(ChainError::TxNotFound { chain_id, tx_hash });
                    }
                }
                Some(receipt) => {
                    if receipt.status == Some(0.into()) {
                        return Err(ChainError::TxReverted { chain_id, tx_hash });
                    }
                    let tx_block = receipt
                        .block_number
                        .map(|b| b.as_u64())
                        .unwrap_or(u64::MAX);
                    let current = provider.get_block_number().await?;
                    let confirmations = current.saturating_sub(tx_block);
                    if confirmations >= n {
                        // Re-verify inclusion so a reorg during the wait
                        // does not count as confirmed.
                        match provider.get_transaction_receipt(tx_hash).await? {
                            Some(receipt) if receipt.status != Some(0.into()) => {
                                debug!(
                                    "{:?} confirmed on chain {} ({} confirmations)",
                                    tx_hash, chain_id, confirmations
                                );
                                return Ok(receipt);
                            }
                            Some(_) => {
                                return Err(ChainError::TxReverted { chain_id, tx_hash })
                            }
                            None => {
                                warn!(
                                    "Reorg: {:?} no longer included on chain {}",
                                    tx_hash, chain_id
                                );
                            }
                        }
                    }
                }
            }

            tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
        }
    }

    async fn reveal_on_destination(
        &self,
        chain_id: u64,
        escrow: Address,
        preimage: &Secret,
    ) -> Result<H256, ChainError> {
        let provider = self.provider(chain_id)?;
        let data = abi::claim_calldata(preimage);

        let mut tx = Self::read_tx(escrow, data.clone());
        tx.set_from(self.wallet.address());
        match self.timed_call(&provider, &tx, "claim").await {
            Ok(_) => {}
            Err(ChainError::Rejected { reason, .. }) => {
                return Err(Self::map_claim_revert(chain_id, escrow, &reason));
            }
            Err(e) => return Err(e),
        }

        self.submit(chain_id, escrow, data).await
    }

    async fn extract_revealed_secret(
        &self,
        chain_id: u64,
        tx_hash: H256,
        escrow: Address,
    ) -> Result<Secret, ChainError> {
        let provider = self.provider(chain_id)?;
        let receipt = provider
            .get_transaction_receipt(tx_hash)
            .await?
            .ok_or(ChainError::SecretNotFound { chain_id, tx_hash })?;

        receipt
            .logs
            .iter()
            .filter(|log| log.address == escrow)
            .filter(|log| log.topics.first() == Some(&*abi::SECRET_REVEALED_TOPIC))
            .find_map(|log| abi::decode_revealed_preimage(&log.data))
            .ok_or(ChainError::SecretNotFound { chain_id, tx_hash })
    }

    async fn health_check(&self) -> Vec<(u64, bool)> {
        // Snapshot the providers so no map guard is held across an await.
        let providers: Vec<(u64, Arc<ChainProvider>)> = self
            .providers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut results = Vec::new();
        for (chain_id, provider) in providers {
            let healthy = provider.health_check().await;
            results.push((chain_id, healthy));
            crate::metrics::record_chain_health(chain_id, healthy);
        }
        results
    }

    fn connected_chains(&self) -> Vec<u64> {
        self.providers.iter().map(|e| *e.key()).collect()
    }
}
