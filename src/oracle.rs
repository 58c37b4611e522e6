//! Reference price lookup at admission
//!
//! Price-feed production is someone else's job; the controller only needs
//! one quote per admission to anchor the auction. The trait is the seam,
//! the config-table impl is the default wiring.

use crate::config::OracleConfig;
use crate::error::{CoordinatorError, CoordinatorResult};

use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::collections::HashMap;
use std::str::FromStr;

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Market price of one source base unit in destination terms, at the
    /// 6-decimal internal price scale.
    async fn market_price(
        &self,
        src_token: Address,
        dst_token: Address,
    ) -> CoordinatorResult<U256>;
}

/// Oracle backed by the `[oracle.pairs]` config table.
pub struct ConfigOracle {
    pairs: HashMap<(Address, Address), U256>,
}

impl ConfigOracle {
    pub fn from_config(config: &OracleConfig) -> CoordinatorResult<Self> {
        let mut pairs = HashMap::new();
        for (key, price) in &config.pairs {
            let (src, dst) = key.split_once(':').ok_or_else(|| {
                CoordinatorError::Config(format!("oracle pair key `{key}` is not `src:dst`"))
            })?;
            let src = Address::from_str(src).map_err(|e| {
                CoordinatorError::Config(format!("oracle pair `{key}`: bad src token: {e}"))
            })?;
            let dst = Address::from_str(dst).map_err(|e| {
                CoordinatorError::Config(format!("oracle pair `{key}`: bad dst token: {e}"))
            })?;
            pairs.insert((src, dst), U256::from(*price));
        }
        Ok(Self { pairs })
    }
}

#[async_trait]
impl PriceOracle for ConfigOracle {
    async fn market_price(
        &self,
        src_token: Address,
        dst_token: Address,
    ) -> CoordinatorResult<U256> {
        self.pairs
            .get(&(src_token, dst_token))
            .copied()
            .ok_or(CoordinatorError::NoMarketPrice {
                src_token,
                dst_token,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn looks_up_configured_pair() {
        let mut table = HashMap::new();
        table.insert(
            format!(
                "{:?}:{:?}",
                Address::repeat_byte(0x01),
                Address::repeat_byte(0x02)
            ),
            1_000_000u64,
        );
        let oracle = ConfigOracle::from_config(&OracleConfig { pairs: table }).unwrap();

        let price = oracle
            .market_price(Address::repeat_byte(0x01), Address::repeat_byte(0x02))
            .await
            .unwrap();
        assert_eq!(price, U256::from(1_000_000u64));

        let err = oracle
            .market_price(Address::repeat_byte(0x02), Address::repeat_byte(0x01))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NoMarketPrice { .. }));
    }

    #[test]
    fn rejects_malformed_pair_key() {
        let mut table = HashMap::new();
        table.insert("not-a-pair".to_string(), 1u64);
        assert!(ConfigOracle::from_config(&OracleConfig { pairs: table }).is_err());
    }
}
