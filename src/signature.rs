//! Typed-structured signature verification and order-id derivation
//!
//! The order id IS the EIP-712 digest of the intent under the source
//! chain's domain. Two coordinators that see the same signed intent derive
//! the same id without talking to each other. Pure and deterministic;
//! nothing here suspends.

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::model::SwapIntent;

use ethers::abi::{encode, Token};
use ethers::types::transaction::eip712::EIP712Domain;
use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::keccak256;

pub const DOMAIN_NAME: &str = "LockstepSwap";
pub const DOMAIN_VERSION: &str = "1";

const INTENT_TYPE: &str = "SwapIntent(address maker,uint256 srcChain,address srcToken,\
uint256 srcAmount,uint256 dstChain,address dstToken,bytes32 secretHash,\
uint256 minAcceptablePrice,uint256 orderDuration,uint256 nonce,uint256 deadline)";

fn domain(src_chain: u64, escrow_factory: Address) -> EIP712Domain {
    EIP712Domain {
        name: Some(DOMAIN_NAME.to_string()),
        version: Some(DOMAIN_VERSION.to_string()),
        chain_id: Some(U256::from(src_chain)),
        verifying_contract: Some(escrow_factory),
        salt: None,
    }
}

fn struct_hash(intent: &SwapIntent) -> [u8; 32] {
    let type_hash = keccak256(INTENT_TYPE.as_bytes());
    let encoded = encode(&[
        Token::FixedBytes(type_hash.to_vec()),
        Token::Address(intent.maker),
        Token::Uint(U256::from(intent.src_chain)),
        Token::Address(intent.src_token),
        Token::Uint(intent.src_amount),
        Token::Uint(U256::from(intent.dst_chain)),
        Token::Address(intent.dst_token),
        Token::FixedBytes(intent.secret_hash.as_bytes().to_vec()),
        Token::Uint(intent.min_acceptable_price),
        Token::Uint(U256::from(intent.order_duration_secs)),
        Token::Uint(intent.nonce),
        Token::Uint(U256::from(intent.deadline)),
    ]);
    keccak256(encoded)
}

/// Domain-separated structural hash of the intent; doubles as the order id.
pub fn order_id(intent: &SwapIntent, escrow_factory: Address) -> H256 {
    let separator = domain(intent.src_chain, escrow_factory).separator();
    let struct_hash = struct_hash(intent);

    let mut message = Vec::with_capacity(2 + 32 + 32);
    message.extend_from_slice(&[0x19, 0x01]);
    message.extend_from_slice(&separator);
    message.extend_from_slice(&struct_hash);
    H256::from(keccak256(message))
}

/// Recover the signer of `(H(intent), signature)` and require it to be the
/// maker. Returns the order id on success.
pub fn verify_intent_signature(
    intent: &SwapIntent,
    signature: &Signature,
    escrow_factory: Address,
) -> CoordinatorResult<H256> {
    let digest = order_id(intent, escrow_factory);
    let signer = signature
        .recover(digest)
        .map_err(|_| CoordinatorError::BadSignature {
            maker: intent.maker,
        })?;
    if signer != intent.maker {
        return Err(CoordinatorError::BadSignature {
            maker: intent.maker,
        });
    }
    Ok(digest)
}
