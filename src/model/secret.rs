//! Preimage handling for the HTLC hashlock

use ethers::types::H256;
use ethers::utils::keccak256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

const LENGTH: usize = 32;

#[derive(PartialEq, Clone, Copy, Debug, thiserror::Error)]
#[error("invalid preimage length, expected {expected} bytes, got {got}")]
pub struct InvalidLength {
    expected: usize,
    got: usize,
}

/// A 32-byte hashlock preimage.
///
/// Debug and Display never print the raw bytes; the preimage leaves the
/// process only through the secret bus or an on-chain reveal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Secret([u8; LENGTH]);

impl Secret {
    pub fn from_vec(bytes: &[u8]) -> Result<Secret, InvalidLength> {
        if bytes.len() != LENGTH {
            return Err(InvalidLength {
                expected: LENGTH,
                got: bytes.len(),
            });
        }
        let mut data = [0u8; LENGTH];
        data.copy_from_slice(bytes);
        Ok(Secret(data))
    }

    pub fn as_bytes(&self) -> &[u8; LENGTH] {
        &self.0
    }

    /// keccak256 of the preimage, the EVM HTLC hashlock.
    pub fn hash(&self) -> H256 {
        H256::from(keccak256(self.0))
    }

    pub fn matches_hash(&self, hash: H256) -> bool {
        self.hash() == hash
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<[u8; LENGTH]> for Secret {
    fn from(bytes: [u8; LENGTH]) -> Self {
        Secret(bytes)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

#[derive(PartialEq, Clone, Copy, Debug, thiserror::Error)]
pub enum FromStrError {
    #[error("failed to decode preimage hex")]
    HexDecode(#[from] hex::FromHexError),
    #[error(transparent)]
    InvalidLength(#[from] InvalidLength),
}

impl FromStr for Secret {
    type Err = FromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Ok(Self::from_vec(&bytes)?)
    }
}

impl Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl<'vde> de::Visitor<'vde> for Visitor {
            type Value = Secret;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a hex encoded 32 byte preimage")
            }

            fn visit_str<E>(self, v: &str) -> Result<Secret, E>
            where
                E: de::Error,
            {
                Secret::from_str(v).map_err(|_| {
                    de::Error::invalid_value(de::Unexpected::Str(v), &"hex encoded 32 bytes")
                })
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_preimage() {
        let result =
            Secret::from_str("68d627971643a6f97f27c58957826fcba853ec2077fd10ec6b93d8e61deb4c");
        assert!(result.is_err());
    }

    #[test]
    fn accepts_0x_prefix() {
        let hex = "0x0101010101010101010101010101010101010101010101010101010101010101";
        let secret = Secret::from_str(hex).unwrap();
        assert_eq!(secret.to_hex(), hex);
    }

    #[test]
    fn hashlock_matches_only_own_hash() {
        let secret = Secret::from([7u8; 32]);
        let other = Secret::from([8u8; 32]);
        assert!(secret.matches_hash(secret.hash()));
        assert!(!secret.matches_hash(other.hash()));
    }

    #[test]
    fn debug_never_prints_bytes() {
        let secret = Secret::from([9u8; 32]);
        assert_eq!(format!("{:?}", secret), "Secret(..)");
    }

    #[test]
    fn serde_round_trip() {
        let secret = Secret::from([3u8; 32]);
        let json = serde_json::to_string(&secret).unwrap();
        let back: Secret = serde_json::from_str(&json).unwrap();
        assert_eq!(secret, back);
    }
}
