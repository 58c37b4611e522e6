//! Calldata and log codecs for ERC-20 and the escrow contracts

use crate::model::Secret;

use ethers::abi::{decode, encode, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::id;
use lazy_static::lazy_static;

lazy_static! {
    /// topic0 of `SecretRevealed(bytes32 indexed orderId, bytes32 preimage)`
    pub static ref SECRET_REVEALED_TOPIC: H256 =
        H256::from(ethers::utils::keccak256("SecretRevealed(bytes32,bytes32)"));
}

fn call(signature: &str, args: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend_from_slice(&encode(args));
    Bytes::from(data)
}

/// `allowance(address owner, address spender)`
pub fn allowance_calldata(owner: Address, spender: Address) -> Bytes {
    call(
        "allowance(address,address)",
        &[Token::Address(owner), Token::Address(spender)],
    )
}

/// `balanceOf(address account)`
pub fn balance_of_calldata(account: Address) -> Bytes {
    call("balanceOf(address)", &[Token::Address(account)])
}

/// `decimals()`
pub fn decimals_calldata() -> Bytes {
    Bytes::from(id("decimals()").to_vec())
}

/// Escrow factory pull of pre-approved maker funds into the source escrow.
pub fn transfer_user_funds_calldata(
    order_id: H256,
    from: Address,
    token: Address,
    amount: U256,
) -> Bytes {
    call(
        "transferUserFunds(bytes32,address,address,uint256)",
        &[
            Token::FixedBytes(order_id.as_bytes().to_vec()),
            Token::Address(from),
            Token::Address(token),
            Token::Uint(amount),
        ],
    )
}

/// Unlock an HTLC escrow with the hashlock preimage.
pub fn claim_calldata(preimage: &Secret) -> Bytes {
    call(
        "claim(bytes32)",
        &[Token::FixedBytes(preimage.as_bytes().to_vec())],
    )
}

/// Decode a single uint256 return value.
pub fn decode_uint(data: &[u8]) -> Option<U256> {
    let tokens = decode(&[ParamType::Uint(256)], data).ok()?;
    tokens.first()?.clone().into_uint()
}

/// Decode a `decimals()` return value.
pub fn decode_decimals(data: &[u8]) -> Option<u8> {
    let value = decode_uint(data)?;
    if value > U256::from(u8::MAX) {
        return None;
    }
    Some(value.as_u64() as u8)
}

/// Pull the 32-byte preimage out of a `SecretRevealed` log payload.
pub fn decode_revealed_preimage(data: &[u8]) -> Option<Secret> {
    if data.len() != 32 {
        return None;
    }
    Secret::from_vec(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erc20_selectors_match_the_standard() {
        let data = allowance_calldata(Address::zero(), Address::zero());
        assert_eq!(&data[..4], &[0xdd, 0x62, 0xed, 0x3e]);

        let data = balance_of_calldata(Address::zero());
        assert_eq!(&data[..4], &[0x70, 0xa0, 0x82, 0x31]);

        let data = decimals_calldata();
        assert_eq!(&data[..4], &[0x31, 0x3c, 0xe5, 0x67]);
    }

    #[test]
    fn transfer_calldata_carries_all_arguments() {
        let order_id = H256::repeat_byte(0x11);
        let data = transfer_user_funds_calldata(
            order_id,
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0x01),
            U256::from(1_000_000u64),
        );
        // selector + 4 words
        assert_eq!(data.len(), 4 + 4 * 32);
        assert_eq!(&data[4..36], order_id.as_bytes());
    }

    #[test]
    fn uint_decode_round_trips() {
        let encoded = encode(&[Token::Uint(U256::from(42u64))]);
        assert_eq!(decode_uint(&encoded), Some(U256::from(42u64)));
        assert_eq!(decode_uint(&[0u8; 7]), None);
    }

    #[test]
    fn decimals_reject_out_of_range() {
        let encoded = encode(&[Token::Uint(U256::from(18u64))]);
        assert_eq!(decode_decimals(&encoded), Some(18));
        let encoded = encode(&[Token::Uint(U256::from(300u64))]);
        assert_eq!(decode_decimals(&encoded), None);
    }

    #[test]
    fn preimage_decodes_only_from_exact_word() {
        let secret = Secret::from([5u8; 32]);
        assert_eq!(
            decode_revealed_preimage(secret.as_bytes()),
            Some(secret)
        );
        assert_eq!(decode_revealed_preimage(&[5u8; 31]), None);
    }
}
