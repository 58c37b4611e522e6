//! State machine scenarios against in-memory collaborators

use crate::error::{ChainError, CoordinatorError};
use crate::model::{CommitmentStatus, OrderStatus};
use crate::reaper::Reaper;
use crate::signature;
use crate::store::OrderStore;
use crate::testkit::{signed_intent, Harness, DST_CHAIN, SRC_CHAIN, SRC_FACTORY};

use chrono::{Duration, Utc};
use ethers::types::{Address, H256, U256};

const RESOLVER_A: Address = Address::repeat_byte(0xb1);
const RESOLVER_B: Address = Address::repeat_byte(0xb2);
const SRC_ESCROW: Address = Address::repeat_byte(0xe1);
const DST_ESCROW: Address = Address::repeat_byte(0xe2);

fn deposit() -> U256 {
    U256::from(10_000_000_000_000_000u64)
}

async fn wait_for_status(harness: &Harness, order_id: H256, status: OrderStatus) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let order = harness.store.get(order_id).await.unwrap().unwrap();
            if order.status == status {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("order never reached {status}"));
}

/// Admit the scenario intent with a funded maker.
async fn admit_scenario(harness: &Harness) -> H256 {
    let (intent, sig, preimage) = signed_intent(0x07);
    harness.gateway.set_allowance(
        SRC_CHAIN,
        intent.src_token,
        intent.maker,
        intent.src_amount,
    );
    harness
        .controller
        .admit(intent, sig, preimage)
        .await
        .unwrap()
        .order_id
}

async fn commit_scenario(harness: &Harness, order_id: H256, resolver: Address) {
    harness
        .controller
        .commit(order_id, resolver, U256::from(950_000u64), Utc::now())
        .await
        .unwrap();
}

/// Fund both escrows and report them, landing the order in SETTLING.
async fn settle_scenario(harness: &Harness, order_id: H256, resolver: Address) {
    let order = harness.store.get(order_id).await.unwrap().unwrap();
    harness
        .gateway
        .set_native_balance(SRC_CHAIN, SRC_ESCROW, deposit());
    harness
        .gateway
        .set_native_balance(DST_CHAIN, DST_ESCROW, deposit());
    harness
        .controller
        .escrows_ready(
            order_id,
            resolver,
            SRC_ESCROW,
            DST_ESCROW,
            H256::repeat_byte(0xd1),
            H256::repeat_byte(0xd2),
        )
        .await
        .unwrap();

    harness.gateway.set_token_balance(
        SRC_CHAIN,
        SRC_ESCROW,
        order.intent.src_token,
        order.intent.src_amount,
    );
    harness.gateway.set_token_balance(
        DST_CHAIN,
        DST_ESCROW,
        order.intent.dst_token,
        U256::from(950_000u64),
    );
    harness
        .controller
        .notify_settlement(
            order_id,
            resolver,
            U256::from(950_000u64),
            H256::repeat_byte(0xd3),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn happy_path_settles_to_completed() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;

    let order = harness.store.get(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Active);
    assert_eq!(order.auction.start_price, U256::from(1_000_000u64));
    assert_eq!(order.auction.end_price, U256::from(900_000u64));
    assert_eq!(order.auction.duration_secs, 60);
    assert_eq!(harness.bus.orders.lock().unwrap().len(), 1);

    let receipt = harness
        .controller
        .commit(
            order_id,
            RESOLVER_A,
            U256::from(950_000u64),
            order.auction.start_time + Duration::seconds(30),
        )
        .await
        .unwrap();
    assert_eq!(receipt.maker_amount, U256::from(1_000_000u64));
    assert_eq!(receipt.taker_amount, U256::from(950_000u64));
    assert_eq!(receipt.current_price, U256::from(950_000u64));

    settle_scenario(&harness, order_id, RESOLVER_A).await;
    wait_for_status(&harness, order_id, OrderStatus::Completed).await;

    let order = harness.store.get(order_id).await.unwrap().unwrap();
    assert!(order.src_settlement_tx.is_some());
    assert!(order.secret_reveal_tx.is_some());
    assert!(order.secret_revealed_at.is_some());
    assert_eq!(order.resolver, Some(RESOLVER_A));

    // The fund pull and the authoritative reveal both hit the gateway.
    assert_eq!(harness.gateway.transfers.lock().unwrap().len(), 1);
    assert_eq!(harness.gateway.reveals.lock().unwrap().len(), 1);

    // The preimage went out exactly once, on the secret topic.
    let secrets = harness.bus.secrets.lock().unwrap();
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].order_id, order_id);
    assert_eq!(secrets[0].dst_amount, U256::from(950_000u64));

    let secret = harness.store.get_secret(order_id).await.unwrap().unwrap();
    assert!(secret.revealed_at.is_some());
    assert!(secret.preimage.matches_hash(order.intent.secret_hash));

    let commitments = harness
        .store
        .commitments_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(commitments.len(), 1);
    assert_eq!(commitments[0].status, CommitmentStatus::Completed);
}

#[tokio::test]
async fn foreign_signature_leaves_store_untouched() {
    let harness = Harness::new();
    let (intent, _sig, preimage) = signed_intent(0x07);
    harness.gateway.set_allowance(
        SRC_CHAIN,
        intent.src_token,
        intent.maker,
        intent.src_amount,
    );

    let other = ethers::signers::LocalWallet::from_bytes(&[0x43u8; 32]).unwrap();
    let digest = signature::order_id(&intent, SRC_FACTORY);
    let bad_sig = other.sign_hash(digest).unwrap();

    let err = harness
        .controller
        .admit(intent, bad_sig, preimage)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::BadSignature { .. }));
    assert!(harness.store.get(digest).await.unwrap().is_none());
    assert!(harness.bus.orders.lock().unwrap().is_empty());
}

#[tokio::test]
async fn short_allowance_is_rejected() {
    let harness = Harness::new();
    let (intent, sig, preimage) = signed_intent(0x07);
    harness.gateway.set_allowance(
        SRC_CHAIN,
        intent.src_token,
        intent.maker,
        U256::from(500_000u64),
    );

    let err = harness
        .controller
        .admit(intent, sig, preimage)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::AllowanceTooLow { have, need }
            if have == U256::from(500_000u64) && need == U256::from(1_000_000u64)
    ));
}

#[tokio::test]
async fn preimage_must_match_the_hashlock() {
    let harness = Harness::new();
    let (intent, sig, _preimage) = signed_intent(0x07);
    harness.gateway.set_allowance(
        SRC_CHAIN,
        intent.src_token,
        intent.maker,
        intent.src_amount,
    );

    let wrong = crate::model::Secret::from([0x08u8; 32]);
    let err = harness
        .controller
        .admit(intent, sig, wrong)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::HashMismatch));
}

#[tokio::test]
async fn duplicate_admission_is_deterministic() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;

    let (intent, sig, preimage) = signed_intent(0x07);
    let err = harness
        .controller
        .admit(intent, sig, preimage)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::DuplicateOrder { order_id: dup } if dup == order_id
    ));
}

#[tokio::test]
async fn market_below_floor_is_rejected() {
    let harness = Harness::with_market_price(800_000);
    let (intent, sig, preimage) = signed_intent(0x07);
    harness.gateway.set_allowance(
        SRC_CHAIN,
        intent.src_token,
        intent.maker,
        intent.src_amount,
    );

    let err = harness
        .controller
        .admit(intent, sig, preimage)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::MarketBelowMinimum { .. }));
}

#[tokio::test]
async fn quote_above_the_curve_is_rejected() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;
    let order = harness.store.get(order_id).await.unwrap().unwrap();

    let err = harness
        .controller
        .commit(
            order_id,
            RESOLVER_A,
            U256::from(980_000u64),
            order.auction.start_time + Duration::seconds(30),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::PriceOutOfBand { .. }));

    let order = harness.store.get(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Active);
}

#[tokio::test]
async fn only_one_concurrent_commit_wins() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;
    let now = Utc::now();

    let (a, b) = tokio::join!(
        harness
            .controller
            .commit(order_id, RESOLVER_A, U256::from(950_000u64), now),
        harness
            .controller
            .commit(order_id, RESOLVER_B, U256::from(950_000u64), now),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);

    let commitments = harness
        .store
        .commitments_for_order(order_id)
        .await
        .unwrap();
    let active = commitments
        .iter()
        .filter(|c| c.status == CommitmentStatus::Active)
        .count();
    assert_eq!(active, 1);
}

#[tokio::test]
async fn unfilled_order_expires_via_reaper() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;

    // Age the order past its lifetime.
    let mut order = harness.store.get(order_id).await.unwrap().unwrap();
    order.expires_at = Utc::now() - Duration::seconds(1);
    harness.store.save(&order).await.unwrap();

    let reaper = Reaper::new(
        harness.controller.clone(),
        harness.store.clone(),
        harness.settings.coordinator.clone(),
    );
    reaper.scan().await.unwrap();

    let order = harness.store.get(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
}

#[tokio::test]
async fn lapsed_commitment_opens_rescue_and_second_resolver_completes() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;
    commit_scenario(&harness, order_id, RESOLVER_A).await;

    // Resolver A never reports escrows; age the commitment past deadline.
    let mut order = harness.store.get(order_id).await.unwrap().unwrap();
    order.commitment_deadline = Some(Utc::now() - Duration::seconds(1));
    harness.store.save(&order).await.unwrap();

    let reaper = Reaper::new(
        harness.controller.clone(),
        harness.store.clone(),
        harness.settings.coordinator.clone(),
    );
    reaper.scan().await.unwrap();

    let order = harness.store.get(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::RescueAvailable);
    // The defaulted order is re-broadcast for rescuers.
    assert_eq!(harness.bus.orders.lock().unwrap().len(), 2);

    let rescued = harness
        .controller
        .rescue(order_id, RESOLVER_B)
        .await
        .unwrap();
    assert_eq!(rescued.original_resolver, RESOLVER_A);

    let order = harness.store.get(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Committed);
    assert_eq!(order.resolver, Some(RESOLVER_B));
    // Rescuer inherits the defaulted price.
    assert_eq!(order.committed_price, Some(U256::from(950_000u64)));

    settle_scenario(&harness, order_id, RESOLVER_B).await;
    wait_for_status(&harness, order_id, OrderStatus::Completed).await;

    let commitments = harness
        .store
        .commitments_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(commitments.len(), 2);
    assert_eq!(commitments[0].resolver, RESOLVER_A);
    assert_eq!(commitments[0].status, CommitmentStatus::Failed);
    assert_eq!(commitments[1].resolver, RESOLVER_B);
    assert_eq!(commitments[1].status, CommitmentStatus::Completed);
}

#[tokio::test]
async fn defaulter_cannot_rescue_its_own_order() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;
    commit_scenario(&harness, order_id, RESOLVER_A).await;

    let mut order = harness.store.get(order_id).await.unwrap().unwrap();
    order.commitment_deadline = Some(Utc::now() - Duration::seconds(1));
    harness.store.save(&order).await.unwrap();
    harness
        .controller
        .handle_commitment_lapsed(order_id)
        .await
        .unwrap();

    let err = harness
        .controller
        .rescue(order_id, RESOLVER_A)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Malformed(_)));
}

#[tokio::test]
async fn wrong_resolver_cannot_report_escrows() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;
    commit_scenario(&harness, order_id, RESOLVER_A).await;

    let err = harness
        .controller
        .escrows_ready(
            order_id,
            RESOLVER_B,
            SRC_ESCROW,
            DST_ESCROW,
            H256::zero(),
            H256::zero(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotCommittedResolver { .. }));
}

#[tokio::test]
async fn underfunded_safety_deposit_keeps_order_committed() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;
    commit_scenario(&harness, order_id, RESOLVER_A).await;

    harness
        .gateway
        .set_native_balance(SRC_CHAIN, SRC_ESCROW, U256::from(1u64));

    let err = harness
        .controller
        .escrows_ready(
            order_id,
            RESOLVER_A,
            SRC_ESCROW,
            DST_ESCROW,
            H256::zero(),
            H256::zero(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::EscrowUnderfunded { .. }));

    let order = harness.store.get(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Committed);
    assert!(harness.gateway.transfers.lock().unwrap().is_empty());
}

#[tokio::test]
async fn already_claimed_reveal_still_completes_the_order() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;
    commit_scenario(&harness, order_id, RESOLVER_A).await;

    harness.gateway.fail_next_reveal(ChainError::AlreadyClaimed {
        chain_id: DST_CHAIN,
        escrow: DST_ESCROW,
    });
    settle_scenario(&harness, order_id, RESOLVER_A).await;
    wait_for_status(&harness, order_id, OrderStatus::Completed).await;

    let order = harness.store.get(order_id).await.unwrap().unwrap();
    // Someone else claimed; we have no reveal tx of our own.
    assert!(order.secret_reveal_tx.is_none());
    assert!(order.secret_revealed_at.is_some());
}

#[tokio::test]
async fn competition_timeout_with_dead_escrow_fails_the_order() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;
    commit_scenario(&harness, order_id, RESOLVER_A).await;

    // The supervisor's reveal attempt hits a hard revert.
    harness.gateway.fail_next_reveal(ChainError::Rejected {
        chain_id: DST_CHAIN,
        reason: "escrow selfdestructed".to_string(),
    });
    settle_scenario(&harness, order_id, RESOLVER_A).await;
    wait_for_status(&harness, order_id, OrderStatus::Competing).await;

    // Deadline passes; the fallback reveal fails the same way.
    let mut order = harness.store.get(order_id).await.unwrap().unwrap();
    order.competition_deadline = Some(Utc::now() - Duration::seconds(1));
    harness.store.save(&order).await.unwrap();
    harness.gateway.fail_next_reveal(ChainError::DeadlinePassed {
        chain_id: DST_CHAIN,
        escrow: DST_ESCROW,
    });

    harness
        .controller
        .handle_competition_timeout(order_id)
        .await
        .unwrap();

    let order = harness.store.get(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);

    let commitments = harness
        .store
        .commitments_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(commitments[0].status, CommitmentStatus::Failed);
}

#[tokio::test]
async fn reveal_due_backstop_rearms_a_lost_supervisor() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;
    commit_scenario(&harness, order_id, RESOLVER_A).await;

    harness
        .gateway
        .set_native_balance(SRC_CHAIN, SRC_ESCROW, deposit());
    harness
        .gateway
        .set_native_balance(DST_CHAIN, DST_ESCROW, deposit());
    harness
        .controller
        .escrows_ready(
            order_id,
            RESOLVER_A,
            SRC_ESCROW,
            DST_ESCROW,
            H256::zero(),
            H256::zero(),
        )
        .await
        .unwrap();

    // Simulate a crash right after the fill was recorded: the fill is in
    // the store but no supervisor is running.
    let mut order = harness.store.get(order_id).await.unwrap().unwrap();
    order.dst_settlement_tx = Some(H256::repeat_byte(0xd3));
    order.dst_amount = Some(U256::from(950_000u64));
    order.funds_moved_at = Some(Utc::now() - Duration::seconds(300));
    harness.store.save(&order).await.unwrap();

    let reaper = Reaper::new(
        harness.controller.clone(),
        harness.store.clone(),
        harness.settings.coordinator.clone(),
    );
    reaper.scan().await.unwrap();

    wait_for_status(&harness, order_id, OrderStatus::Completed).await;
}

#[tokio::test]
async fn secret_query_is_resolver_gated_and_reveal_gated() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;
    commit_scenario(&harness, order_id, RESOLVER_A).await;

    let err = harness
        .controller
        .order_secret(order_id, RESOLVER_B)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotCommittedResolver { .. }));

    let err = harness
        .controller
        .order_secret(order_id, RESOLVER_A)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::SecretNotRevealed { .. }));

    settle_scenario(&harness, order_id, RESOLVER_A).await;
    wait_for_status(&harness, order_id, OrderStatus::Completed).await;

    let info = harness
        .controller
        .order_secret(order_id, RESOLVER_A)
        .await
        .unwrap();
    assert!(info.reveal_tx_hash.is_some());
}

#[tokio::test]
async fn terminal_orders_reject_further_operations() {
    let harness = Harness::new();
    let order_id = admit_scenario(&harness).await;
    commit_scenario(&harness, order_id, RESOLVER_A).await;
    settle_scenario(&harness, order_id, RESOLVER_A).await;
    wait_for_status(&harness, order_id, OrderStatus::Completed).await;

    let err = harness
        .controller
        .commit(order_id, RESOLVER_B, U256::from(950_000u64), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::WrongStatus { .. }));

    let err = harness
        .controller
        .rescue(order_id, RESOLVER_B)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::WrongStatus { .. }));
}
