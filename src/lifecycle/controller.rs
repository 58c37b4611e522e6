//! Order lifecycle state machine
//!
//! Every mutation runs inside the order's critical section; the store is
//! written before any irreversible chain action except the reveal, which
//! is idempotent against the on-chain already-claimed guard.

use super::locks::OrderLocks;
use crate::auction;
use crate::bus::{MessageBus, OrderBroadcast, SecretBroadcast};
use crate::chain::ChainGateway;
use crate::config::{ChainConfig, Settings};
use crate::error::{ChainError, CoordinatorError, CoordinatorResult};
use crate::metrics;
use crate::model::{
    AuctionParams, CommitmentStatus, Order, OrderStatus, ResolverCommitment, Secret, SecretRecord,
    SwapIntent,
};
use crate::oracle::PriceOracle;
use crate::signature;
use crate::store::OrderStore;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ethers::types::{Address, Signature, H256, U256};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Successful admission.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub order_id: H256,
    pub market_price: U256,
    pub expires_at: DateTime<Utc>,
}

/// Successful commitment, with the amounts both sides are now on the hook
/// for.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub current_price: U256,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub commitment_deadline: DateTime<Utc>,
}

/// Successful rescue take-over.
#[derive(Debug, Clone)]
pub struct Rescued {
    pub original_resolver: Address,
    pub commitment_deadline: DateTime<Utc>,
}

/// Answer to an authenticated secret query.
#[derive(Debug, Clone)]
pub struct RevealInfo {
    pub reveal_tx_hash: Option<H256>,
    pub revealed_at: DateTime<Utc>,
}

/// Live auction view for one order.
#[derive(Debug, Clone)]
pub struct AuctionQuote {
    pub current_price: U256,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub time_remaining_secs: u64,
}

pub struct LifecycleController {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn ChainGateway>,
    bus: Arc<dyn MessageBus>,
    oracle: Arc<dyn PriceOracle>,
    settings: Arc<Settings>,
    locks: OrderLocks,
    /// Settlement supervisors by order id, aborted on supersession.
    supervisors: DashMap<H256, JoinHandle<()>>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn ChainGateway>,
        bus: Arc<dyn MessageBus>,
        oracle: Arc<dyn PriceOracle>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            gateway,
            bus,
            oracle,
            settings,
            locks: OrderLocks::new(),
            supervisors: DashMap::new(),
        }
    }

    // ---- admission ----

    /// Admit a signed intent: verify the signature and the hashlock, check
    /// the maker's allowance, anchor the auction at the oracle quote,
    /// persist, and broadcast.
    pub async fn admit(
        &self,
        intent: SwapIntent,
        sig: Signature,
        preimage: Secret,
    ) -> CoordinatorResult<Admitted> {
        let now = Utc::now();

        if intent.src_amount.is_zero() {
            return Err(CoordinatorError::Malformed("src amount must be positive".into()));
        }
        if intent.min_acceptable_price.is_zero() {
            return Err(CoordinatorError::Malformed(
                "min acceptable price must be positive".into(),
            ));
        }
        let src_chain = self.chain_cfg(intent.src_chain)?;
        self.chain_cfg(intent.dst_chain)?;
        if (now.timestamp() as u64) > intent.deadline {
            return Err(CoordinatorError::Malformed("intent deadline passed".into()));
        }

        let order_id =
            signature::verify_intent_signature(&intent, &sig, src_chain.escrow_factory)?;
        if !preimage.matches_hash(intent.secret_hash) {
            return Err(CoordinatorError::HashMismatch);
        }

        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        if self.store.get(order_id).await?.is_some() {
            return Err(CoordinatorError::DuplicateOrder { order_id });
        }

        let have = self
            .gateway
            .allowance(
                intent.src_chain,
                intent.src_token,
                intent.maker,
                src_chain.escrow_factory,
            )
            .await?;
        if have < intent.src_amount {
            return Err(CoordinatorError::AllowanceTooLow {
                have,
                need: intent.src_amount,
            });
        }

        let market_price = self
            .oracle
            .market_price(intent.src_token, intent.dst_token)
            .await?;
        if market_price < intent.min_acceptable_price {
            return Err(CoordinatorError::MarketBelowMinimum {
                market: market_price,
                min: intent.min_acceptable_price,
            });
        }

        let auction = AuctionParams {
            start_price: market_price.max(intent.min_acceptable_price),
            end_price: intent.min_acceptable_price,
            duration_secs: self.settings.coordinator.fast_auction_duration_secs,
            start_time: now,
        };
        let lifetime = if intent.order_duration_secs > 0 {
            intent.order_duration_secs
        } else {
            self.settings.coordinator.default_order_duration_secs
        };

        let secret_record = SecretRecord {
            order_id,
            preimage,
            hash: intent.secret_hash,
            created_at: now,
            revealed_at: None,
        };
        let order = Order::new(
            order_id,
            intent,
            market_price,
            auction,
            now,
            Duration::seconds(lifetime as i64),
        );

        // Secret first: an order row without its preimage is unservable,
        // the reverse is just an orphan row.
        self.store.save_secret(&secret_record).await?;
        self.store.save(&order).await?;

        self.broadcast_order(&order).await;
        metrics::record_order_admitted();
        info!(order_id = ?order_id, maker = ?order.intent.maker, "order admitted");

        Ok(Admitted {
            order_id,
            market_price,
            expires_at: order.expires_at,
        })
    }

    // ---- commitment ----

    /// Accept a resolver's quoted fill at `now`, first in wins.
    pub async fn commit(
        &self,
        order_id: H256,
        resolver: Address,
        quoted: U256,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<CommitReceipt> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.require(order_id).await?;
        if !matches!(
            order.status,
            OrderStatus::Active | OrderStatus::RescueAvailable
        ) {
            return Err(self.wrong_status(&order, "ACTIVE or RESCUE_AVAILABLE"));
        }
        if now > order.expires_at {
            return Err(CoordinatorError::WrongStatus {
                order_id,
                status: format!("{} past expiry", order.status),
                required: "ACTIVE or RESCUE_AVAILABLE".into(),
            });
        }

        auction::validate_quote(&order.auction, quoted, now)?;
        let deadline = self.commit_inner(&mut order, resolver, quoted, now).await?;

        let (src_dec, dst_dec) = self.pair_decimals(&order).await?;
        let taker_amount =
            auction::dst_token_amount(order.intent.src_amount, src_dec, dst_dec, quoted)?;

        Ok(CommitReceipt {
            current_price: auction::current_price(&order.auction, now),
            maker_amount: order.intent.src_amount,
            taker_amount,
            commitment_deadline: deadline,
        })
    }

    /// A rescuer takes over a defaulted order at the defaulter's price; the
    /// upside is the forfeited safety deposit.
    pub async fn rescue(
        &self,
        order_id: H256,
        new_resolver: Address,
    ) -> CoordinatorResult<Rescued> {
        let now = Utc::now();
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.require(order_id).await?;
        if order.status != OrderStatus::RescueAvailable {
            return Err(self.wrong_status(&order, "RESCUE_AVAILABLE"));
        }
        let original_resolver = order
            .resolver
            .ok_or_else(|| CoordinatorError::Internal("rescuable order without resolver".into()))?;
        if new_resolver == original_resolver {
            return Err(CoordinatorError::Malformed(
                "defaulted resolver cannot rescue its own order".into(),
            ));
        }

        let price = order
            .committed_price
            .unwrap_or_else(|| auction::current_price(&order.auction, now));
        let deadline = self
            .commit_inner(&mut order, new_resolver, price, now)
            .await?;

        metrics::record_rescue();
        info!(order_id = ?order_id, rescuer = ?new_resolver, "order rescued");
        Ok(Rescued {
            original_resolver,
            commitment_deadline: deadline,
        })
    }

    async fn commit_inner(
        &self,
        order: &mut Order,
        resolver: Address,
        price: U256,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<DateTime<Utc>> {
        if let Some(previous) = order.resolver {
            // Superseded commitment; its audit row (if still active) fails.
            self.store
                .update_commitment_status(order.id, previous, CommitmentStatus::Failed)
                .await?;
        }

        let deadline = now + self.settings.coordinator.commitment_window();
        self.transition(order, OrderStatus::Committed, now)?;
        order.resolver = Some(resolver);
        order.committed_price = Some(price);
        order.commitment_time = Some(now);
        order.commitment_deadline = Some(deadline);
        self.store.save(order).await?;
        self.store
            .save_commitment(&ResolverCommitment {
                order_id: order.id,
                resolver,
                accepted_price: price,
                timestamp: now,
                status: CommitmentStatus::Active,
            })
            .await?;

        metrics::record_commitment();
        info!(order_id = ?order.id, resolver = ?resolver, price = %price, "resolver committed");
        Ok(deadline)
    }

    // ---- escrow and settlement ----

    /// The committed resolver reports both escrows deployed and deposited;
    /// verified deposits trigger the user fund move.
    pub async fn escrows_ready(
        &self,
        order_id: H256,
        resolver: Address,
        src_escrow: Address,
        dst_escrow: Address,
        src_deposit_tx: H256,
        dst_deposit_tx: H256,
    ) -> CoordinatorResult<()> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.require(order_id).await?;
        if order.status != OrderStatus::Committed {
            return Err(self.wrong_status(&order, "COMMITTED"));
        }
        self.require_resolver(&order, resolver)?;

        let src_min = self.chain_cfg(order.intent.src_chain)?.min_safety_deposit_wei;
        let have = self
            .gateway
            .escrow_balance(order.intent.src_chain, src_escrow, None)
            .await?;
        if have < src_min {
            return Err(CoordinatorError::EscrowUnderfunded {
                escrow: src_escrow,
                have,
                need: src_min,
            });
        }

        let dst_min = self.chain_cfg(order.intent.dst_chain)?.min_safety_deposit_wei;
        let have = self
            .gateway
            .escrow_balance(order.intent.dst_chain, dst_escrow, None)
            .await?;
        if have < dst_min {
            return Err(CoordinatorError::EscrowUnderfunded {
                escrow: dst_escrow,
                have,
                need: dst_min,
            });
        }

        debug!(
            order_id = ?order_id,
            src_deposit_tx = ?src_deposit_tx,
            dst_deposit_tx = ?dst_deposit_tx,
            "escrow deposits verified"
        );

        order.src_escrow = Some(src_escrow);
        order.dst_escrow = Some(dst_escrow);
        order.updated_at = Utc::now();
        self.store.save(&order).await?;

        self.move_user_funds(&mut order).await
    }

    /// Pull the maker's pre-approved funds into the source escrow.
    async fn move_user_funds(&self, order: &mut Order) -> CoordinatorResult<()> {
        let tx_hash = self
            .gateway
            .transfer_user_funds(
                order.intent.src_chain,
                order.id,
                order.intent.maker,
                order.intent.src_token,
                order.intent.src_amount,
            )
            .await?;

        let now = Utc::now();
        self.transition(order, OrderStatus::Settling, now)?;
        order.funds_moved_at = Some(now);
        order.src_settlement_tx = Some(tx_hash);
        self.store.save(order).await?;

        metrics::record_funds_moved();
        info!(order_id = ?order.id, tx = ?tx_hash, "user funds moved to source escrow");
        Ok(())
    }

    /// The resolver reports its destination fill. Once both escrows verify
    /// funded, a supervisor task carries the order through reveal.
    pub async fn notify_settlement(
        self: &Arc<Self>,
        order_id: H256,
        resolver: Address,
        dst_amount: U256,
        dst_tx_hash: H256,
    ) -> CoordinatorResult<()> {
        {
            let lock = self.locks.lock_for(order_id);
            let _guard = lock.lock().await;

            let mut order = self.require(order_id).await?;
            if order.status != OrderStatus::Settling {
                return Err(self.wrong_status(&order, "SETTLING"));
            }
            self.require_resolver(&order, resolver)?;

            let src_escrow = order.src_escrow.ok_or_else(|| {
                CoordinatorError::Internal("settling order without src escrow".into())
            })?;
            let dst_escrow = order.dst_escrow.ok_or_else(|| {
                CoordinatorError::Internal("settling order without dst escrow".into())
            })?;

            let have = self
                .gateway
                .escrow_balance(
                    order.intent.src_chain,
                    src_escrow,
                    Some(order.intent.src_token),
                )
                .await?;
            if have < order.intent.src_amount {
                return Err(CoordinatorError::EscrowUnderfunded {
                    escrow: src_escrow,
                    have,
                    need: order.intent.src_amount,
                });
            }

            let have = self
                .gateway
                .escrow_balance(
                    order.intent.dst_chain,
                    dst_escrow,
                    Some(order.intent.dst_token),
                )
                .await?;
            if have < dst_amount {
                return Err(CoordinatorError::EscrowUnderfunded {
                    escrow: dst_escrow,
                    have,
                    need: dst_amount,
                });
            }

            order.dst_settlement_tx = Some(dst_tx_hash);
            order.dst_amount = Some(dst_amount);
            order.updated_at = Utc::now();
            self.store.save(&order).await?;

            info!(order_id = ?order_id, tx = ?dst_tx_hash, "destination fill verified");
        }

        self.spawn_settlement_supervisor(order_id);
        Ok(())
    }

    fn spawn_settlement_supervisor(self: &Arc<Self>, order_id: H256) {
        if let Some(existing) = self.supervisors.get(&order_id) {
            if !existing.value().is_finished() {
                return;
            }
        }
        self.supervisors.remove(&order_id);
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = controller.settle(order_id).await {
                if e.is_settlement_verdict() {
                    if let Err(e) = controller
                        .fail_from_competition(order_id, &e.to_string())
                        .await
                    {
                        error!(order_id = ?order_id, "failed to downgrade order: {e}");
                    }
                } else {
                    // Transient or infrastructure trouble; the reaper's
                    // RevealDue / CompetitionTimeout backstop re-drives it.
                    error!(order_id = ?order_id, "settlement supervisor error: {e}");
                }
            }
            controller.supervisors.remove(&order_id);
        });
        self.supervisors.insert(order_id, handle);
    }

    /// Supervisor body: confirmations on the destination fill, the reveal
    /// delay, secret publication, then the authoritative reveal.
    async fn settle(&self, order_id: H256) -> CoordinatorResult<()> {
        let order = self.require(order_id).await?;
        let dst_tx = order.dst_settlement_tx.ok_or_else(|| {
            CoordinatorError::Internal("settlement supervisor without dst tx".into())
        })?;

        let confirmations = self.settings.confirmations_for(order.intent.dst_chain);
        self.confirm_with_retry(order.intent.dst_chain, dst_tx, confirmations)
            .await?;

        tokio::time::sleep(std::time::Duration::from_secs(
            self.settings.coordinator.secret_reveal_delay_secs,
        ))
        .await;

        self.publish_secret_for_competition(order_id).await?;
        self.complete_with_reveal(order_id).await
    }

    // ---- competition and reveal ----

    /// Open the competition window: stamp the deadline, go COMPETING, and
    /// put the preimage on the secret bus.
    pub async fn publish_secret_for_competition(&self, order_id: H256) -> CoordinatorResult<()> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.require(order_id).await?;
        if order.status == OrderStatus::Competing {
            // Re-driven by the reaper after a supervisor loss.
            return Ok(());
        }
        if order.status != OrderStatus::Settling {
            return Err(self.wrong_status(&order, "SETTLING"));
        }

        let now = Utc::now();
        let deadline = now + self.settings.coordinator.competition_window();
        order.competition_deadline = Some(deadline);
        self.transition(&mut order, OrderStatus::Competing, now)?;
        self.store.save(&order).await?;

        let secret = self.require_secret(order_id).await?;
        let resolver = order
            .resolver
            .ok_or_else(|| CoordinatorError::Internal("competing order without resolver".into()))?;
        let broadcast = SecretBroadcast {
            order_id,
            preimage: secret.preimage,
            resolver_address: resolver,
            src_escrow: order.src_escrow.unwrap_or_default(),
            dst_escrow: order.dst_escrow.unwrap_or_default(),
            src_chain: order.intent.src_chain,
            dst_chain: order.intent.dst_chain,
            src_amount: order.intent.src_amount,
            dst_amount: order.dst_amount.unwrap_or_default(),
            timestamp: now,
            competition_deadline: deadline,
        };
        if let Err(e) = self.bus.publish_secret(&broadcast).await {
            // The authoritative reveal below still guarantees liveness.
            warn!(order_id = ?order_id, "secret broadcast failed: {e}");
        }

        metrics::record_secret_published();
        info!(order_id = ?order_id, deadline = %deadline, "competition opened");
        Ok(())
    }

    /// The coordinator's own reveal on the destination escrow. Idempotent:
    /// a claim that already happened completes the order.
    pub async fn complete_with_reveal(&self, order_id: H256) -> CoordinatorResult<()> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.require(order_id).await?;
        if order.status == OrderStatus::Completed {
            return Ok(());
        }
        if order.status != OrderStatus::Competing {
            return Err(self.wrong_status(&order, "COMPETING"));
        }

        let secret = self.require_secret(order_id).await?;
        let dst_escrow = order
            .dst_escrow
            .ok_or_else(|| CoordinatorError::Internal("competing order without dst escrow".into()))?;

        match self
            .gateway
            .reveal_on_destination(order.intent.dst_chain, dst_escrow, &secret.preimage)
            .await
        {
            Ok(tx_hash) => {
                let confirmations = self.settings.confirmations_for(order.intent.dst_chain);
                self.confirm_with_retry(order.intent.dst_chain, tx_hash, confirmations)
                    .await?;
                // The recorded reveal tx must carry the preimage it claims to.
                match self
                    .gateway
                    .extract_revealed_secret(order.intent.dst_chain, tx_hash, dst_escrow)
                    .await
                {
                    Ok(revealed) if revealed != secret.preimage => {
                        warn!(
                            order_id = ?order_id,
                            tx = ?tx_hash,
                            "reveal tx carries an unexpected preimage"
                        );
                    }
                    Err(e) => {
                        debug!(order_id = ?order_id, "revealed-secret extraction: {e}");
                    }
                    Ok(_) => {}
                }
                self.finish_completed(&mut order, Some(tx_hash)).await
            }
            Err(ChainError::AlreadyClaimed { .. }) => {
                // Someone beat us to it with the broadcast preimage; the
                // swap is done either way.
                info!(order_id = ?order_id, "destination escrow already claimed");
                self.finish_completed(&mut order, None).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn finish_completed(
        &self,
        order: &mut Order,
        reveal_tx: Option<H256>,
    ) -> CoordinatorResult<()> {
        let now = Utc::now();
        order.secret_reveal_tx = reveal_tx;
        order.secret_revealed_at = Some(now);
        self.transition(order, OrderStatus::Completed, now)?;
        self.store.save(order).await?;
        self.store.mark_revealed(order.id, now).await?;
        if let Some(resolver) = order.resolver {
            self.store
                .update_commitment_status(order.id, resolver, CommitmentStatus::Completed)
                .await?;
        }

        metrics::record_order_completed();
        if let Some(moved) = order.funds_moved_at {
            metrics::observe_settlement_latency((now - moved).num_seconds().max(0) as f64);
        }
        info!(order_id = ?order.id, tx = ?reveal_tx, "order completed");
        self.locks.release(order.id);
        Ok(())
    }

    async fn fail_from_competition(&self, order_id: H256, reason: &str) -> CoordinatorResult<()> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.require(order_id).await?;
        if order.status != OrderStatus::Competing {
            return Ok(());
        }

        let now = Utc::now();
        if let Some(resolver) = order.resolver {
            self.store
                .update_commitment_status(order.id, resolver, CommitmentStatus::Failed)
                .await?;
        }
        self.transition(&mut order, OrderStatus::Failed, now)?;
        self.store.save(&order).await?;

        metrics::record_order_failed();
        error!(order_id = ?order_id, "order failed in competition: {reason}");
        self.locks.release(order_id);
        Ok(())
    }

    // ---- timer events ----

    /// Reaper: ACTIVE or RESCUE_AVAILABLE past its lifetime.
    pub async fn handle_order_expired(&self, order_id: H256) -> CoordinatorResult<()> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.require(order_id).await?;
        if !matches!(
            order.status,
            OrderStatus::Active | OrderStatus::RescueAvailable
        ) {
            // Raced with a commit between scan and event; nothing to do.
            return Ok(());
        }
        let now = Utc::now();
        if now < order.expires_at {
            return Ok(());
        }

        if let Some(resolver) = order.resolver {
            self.store
                .update_commitment_status(order_id, resolver, CommitmentStatus::Failed)
                .await?;
        }
        self.transition(&mut order, OrderStatus::Failed, now)?;
        self.store.save(&order).await?;

        metrics::record_order_failed();
        info!(order_id = ?order_id, "order expired unfilled");
        self.locks.release(order_id);
        Ok(())
    }

    /// Reaper: COMMITTED past the commitment deadline. The defaulter's
    /// deposit stays attached to its escrow for the eventual completer.
    pub async fn handle_commitment_lapsed(&self, order_id: H256) -> CoordinatorResult<()> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.require(order_id).await?;
        if order.status != OrderStatus::Committed {
            return Ok(());
        }
        let now = Utc::now();
        match order.commitment_deadline {
            Some(deadline) if now > deadline => {}
            _ => return Ok(()),
        }

        if let Some((_, handle)) = self.supervisors.remove(&order_id) {
            handle.abort();
        }
        let resolver = order
            .resolver
            .ok_or_else(|| CoordinatorError::Internal("committed order without resolver".into()))?;
        self.store
            .update_commitment_status(order_id, resolver, CommitmentStatus::Failed)
            .await?;
        self.transition(&mut order, OrderStatus::RescueAvailable, now)?;
        self.store.save(&order).await?;

        metrics::record_commitment_lapsed();
        warn!(order_id = ?order_id, defaulter = ?resolver, "commitment lapsed, rescue open");

        // The order stays broadcast-able for rescuers.
        self.broadcast_order(&order).await;
        Ok(())
    }

    /// Reaper backstop: a SETTLING order with a reported fill whose
    /// supervisor vanished (crash, restart). Re-arm it.
    pub async fn handle_reveal_due(self: &Arc<Self>, order_id: H256) -> CoordinatorResult<()> {
        let order = self.require(order_id).await?;
        if order.status != OrderStatus::Settling || order.dst_settlement_tx.is_none() {
            return Ok(());
        }
        debug!(order_id = ?order_id, "re-arming settlement supervisor");
        self.spawn_settlement_supervisor(order_id);
        Ok(())
    }

    /// Reaper: COMPETING past the competition deadline and still not
    /// revealed. One authoritative attempt; a hard failure ends the order.
    pub async fn handle_competition_timeout(&self, order_id: H256) -> CoordinatorResult<()> {
        let order = self.require(order_id).await?;
        if order.status != OrderStatus::Competing {
            return Ok(());
        }
        match order.competition_deadline {
            Some(deadline) if Utc::now() > deadline => {}
            _ => return Ok(()),
        }

        match self.complete_with_reveal(order_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable() => {
                warn!(order_id = ?order_id, "fallback reveal hit transient error: {e}");
                Err(e)
            }
            Err(e) => self.fail_from_competition(order_id, &e.to_string()).await,
        }
    }

    // ---- queries ----

    /// Reveal information for the committed resolver; the preimage itself
    /// only travels via the secret bus or the chain.
    pub async fn order_secret(
        &self,
        order_id: H256,
        resolver: Address,
    ) -> CoordinatorResult<RevealInfo> {
        let order = self.require(order_id).await?;
        if order.resolver != Some(resolver) {
            return Err(CoordinatorError::NotCommittedResolver { order_id, resolver });
        }
        match order.secret_revealed_at {
            Some(revealed_at) => Ok(RevealInfo {
                reveal_tx_hash: order.secret_reveal_tx,
                revealed_at,
            }),
            None => Err(CoordinatorError::SecretNotRevealed { order_id }),
        }
    }

    /// Current auction price and both token amounts at that price.
    pub async fn auction_quote(&self, order_id: H256) -> CoordinatorResult<AuctionQuote> {
        let order = self.require(order_id).await?;
        let now = Utc::now();
        let current_price = auction::current_price(&order.auction, now);
        let (src_dec, dst_dec) = self.pair_decimals(&order).await?;
        let taker_amount =
            auction::dst_token_amount(order.intent.src_amount, src_dec, dst_dec, current_price)?;

        Ok(AuctionQuote {
            current_price,
            maker_amount: order.intent.src_amount,
            taker_amount,
            time_remaining_secs: auction::time_remaining(&order.auction, now),
        })
    }

    /// Orders a resolver can still take: ACTIVE plus RESCUE_AVAILABLE.
    pub async fn broadcastable_orders(&self) -> CoordinatorResult<Vec<(Order, U256)>> {
        let now = Utc::now();
        let mut orders = self.store.list_by_status(OrderStatus::Active).await?;
        orders.extend(
            self.store
                .list_by_status(OrderStatus::RescueAvailable)
                .await?,
        );
        Ok(orders
            .into_iter()
            .map(|o| {
                let price = auction::current_price(&o.auction, now);
                (o, price)
            })
            .collect())
    }

    // ---- startup and shutdown ----

    /// Re-arm supervisors for orders that were mid-settlement when the
    /// process last stopped.
    pub async fn recover_in_flight(self: &Arc<Self>) -> CoordinatorResult<usize> {
        let mut recovered = 0;

        for order in self.store.list_by_status(OrderStatus::Settling).await? {
            if order.dst_settlement_tx.is_some() {
                self.spawn_settlement_supervisor(order.id);
                recovered += 1;
            }
        }

        for order in self.store.list_by_status(OrderStatus::Competing).await? {
            let controller = self.clone();
            let order_id = order.id;
            let handle = tokio::spawn(async move {
                if let Err(e) = controller.complete_with_reveal(order_id).await {
                    error!(order_id = ?order_id, "recovered reveal failed: {e}");
                }
                controller.supervisors.remove(&order_id);
            });
            self.supervisors.insert(order_id, handle);
            recovered += 1;
        }

        if recovered > 0 {
            info!("recovered {recovered} in-flight settlements");
        }
        Ok(recovered)
    }

    /// Abort every supervisor. Safe mid-settlement: all store writes
    /// precede the irreversible actions, and the reveal is idempotent.
    pub async fn stop(&self) {
        for entry in self.supervisors.iter() {
            entry.value().abort();
        }
        self.supervisors.clear();
        info!("Lifecycle controller stopped");
    }

    // ---- internals ----

    fn transition(
        &self,
        order: &mut Order,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<()> {
        if !order.status.can_transition_to(to) {
            return Err(CoordinatorError::Internal(format!(
                "illegal transition {} -> {} on order {:?}",
                order.status, to, order.id
            )));
        }
        debug!(order_id = ?order.id, from = %order.status, to = %to, "transition");
        order.status = to;
        order.updated_at = now;
        Ok(())
    }

    async fn require(&self, order_id: H256) -> CoordinatorResult<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or(CoordinatorError::OrderNotFound { order_id })
    }

    async fn require_secret(&self, order_id: H256) -> CoordinatorResult<SecretRecord> {
        self.store
            .get_secret(order_id)
            .await?
            .ok_or_else(|| CoordinatorError::Internal(format!("order {order_id:?} has no secret")))
    }

    fn require_resolver(&self, order: &Order, resolver: Address) -> CoordinatorResult<()> {
        if order.resolver != Some(resolver) {
            return Err(CoordinatorError::NotCommittedResolver {
                order_id: order.id,
                resolver,
            });
        }
        Ok(())
    }

    fn wrong_status(&self, order: &Order, required: &str) -> CoordinatorError {
        CoordinatorError::WrongStatus {
            order_id: order.id,
            status: order.status.to_string(),
            required: required.to_string(),
        }
    }

    fn chain_cfg(&self, chain_id: u64) -> CoordinatorResult<&ChainConfig> {
        self.settings
            .get_chain_by_id(chain_id)
            .ok_or_else(|| ChainError::UnknownChain { chain_id }.into())
    }

    async fn pair_decimals(&self, order: &Order) -> CoordinatorResult<(u8, u8)> {
        let src = self
            .gateway
            .token_decimals(order.intent.src_chain, order.intent.src_token)
            .await?;
        let dst = self
            .gateway
            .token_decimals(order.intent.dst_chain, order.intent.dst_token)
            .await?;
        Ok((src, dst))
    }

    async fn confirm_with_retry(
        &self,
        chain_id: u64,
        tx_hash: H256,
        confirmations: u64,
    ) -> CoordinatorResult<()> {
        let mut attempt = 0u32;
        loop {
            match self
                .gateway
                .await_confirmations(chain_id, tx_hash, confirmations)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.settings.coordinator.max_retries => {
                    attempt += 1;
                    let backoff = std::time::Duration::from_millis(
                        self.settings.coordinator.retry_delay_ms,
                    ) * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        tx = ?tx_hash,
                        "confirmation wait failed (attempt {attempt}): {e}; backing off"
                    );
                    tokio::time::sleep(backoff.min(std::time::Duration::from_secs(30))).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn broadcast_order(&self, order: &Order) {
        match self.build_order_broadcast(order).await {
            Ok(broadcast) => {
                if let Err(e) = self.bus.publish_order(&broadcast).await {
                    warn!(order_id = ?order.id, "order broadcast failed: {e}");
                }
            }
            Err(e) => warn!(order_id = ?order.id, "could not build order broadcast: {e}"),
        }
    }

    async fn build_order_broadcast(&self, order: &Order) -> CoordinatorResult<OrderBroadcast> {
        let (src_dec, dst_dec) = self.pair_decimals(order).await?;
        let now = Utc::now();
        Ok(OrderBroadcast {
            order_id: order.id,
            order_data: order.clone(),
            timestamp: now,
            auction_start_price: order.auction.start_price,
            auction_end_price: order.auction.end_price,
            auction_duration_secs: order.auction.duration_secs,
            current_price: auction::current_price(&order.auction, now),
            src_token_decimals: src_dec,
            dst_token_decimals: dst_dec,
        })
    }
}
