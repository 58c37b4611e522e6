//! Order-id determinism and signature verification across random keys

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use lockstep_coordinator::model::{Secret, SwapIntent};
use lockstep_coordinator::signature::{order_id, verify_intent_signature};
use rand::Rng;

fn intent_for(maker: Address, nonce: u64, secret_hash: H256) -> SwapIntent {
    SwapIntent {
        maker,
        src_chain: 84532,
        src_token: Address::repeat_byte(0x01),
        src_amount: U256::from(1_000_000u64),
        dst_chain: 421614,
        dst_token: Address::repeat_byte(0x02),
        secret_hash,
        min_acceptable_price: U256::from(900_000u64),
        order_duration_secs: 300,
        nonce: U256::from(nonce),
        deadline: 4_000_000_000,
    }
}

#[test]
fn order_id_is_stable_across_processes() {
    // Two independent coordinators hashing the same signed intent must
    // agree without talking to each other, so the id cannot depend on
    // wall-clock or instance identity.
    let factory = Address::repeat_byte(0xfa);
    let intent = intent_for(Address::repeat_byte(0xaa), 1, H256::repeat_byte(0x03));

    let first = order_id(&intent, factory);
    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = order_id(&intent, factory);
    assert_eq!(first, second);
}

#[test]
fn random_wallets_verify_only_their_own_intents() {
    let factory = Address::repeat_byte(0xfa);
    let mut rng = rand::thread_rng();

    for nonce in 0..16u64 {
        let mut key = [0u8; 32];
        rng.fill(&mut key);
        let Ok(wallet) = LocalWallet::from_bytes(&key) else {
            continue;
        };

        let preimage: [u8; 32] = rng.gen();
        let secret = Secret::from(preimage);
        let intent = intent_for(wallet.address(), nonce, secret.hash());

        let digest = order_id(&intent, factory);
        let sig = wallet.sign_hash(digest).unwrap();
        assert_eq!(
            verify_intent_signature(&intent, &sig, factory).unwrap(),
            digest
        );

        // The same signature under a different maker must not verify.
        let mut stolen = intent.clone();
        stolen.maker = Address::repeat_byte(0xee);
        assert!(verify_intent_signature(&stolen, &sig, factory).is_err());
    }
}

#[test]
fn distinct_nonces_give_distinct_orders() {
    let factory = Address::repeat_byte(0xfa);
    let maker = Address::repeat_byte(0xaa);
    let hashlock = H256::repeat_byte(0x03);

    let mut seen = std::collections::HashSet::new();
    for nonce in 0..64u64 {
        assert!(seen.insert(order_id(&intent_for(maker, nonce, hashlock), factory)));
    }
}
