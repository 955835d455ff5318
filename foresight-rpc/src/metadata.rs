//! Metadata collaborators: address naming, token pricing and ENS labels.
//!
//! None of these are implemented here beyond static fallbacks; the host
//! injects real services through [`MetadataServices`].

use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::Serialize;

use crate::simulation::tokens::{ENS_BASE_REGISTRAR, WELL_KNOWN_TOKENS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AddressKind {
    Erc20 { symbol: String, decimals: u8 },
    Erc721 { symbol: String },
    Contract,
    Eoa,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressBookEntry {
    pub address: Address,
    pub name: String,
    pub kind: AddressKind,
}

/// Price of one whole token in wei of the native currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPriceEstimate {
    pub token: Address,
    pub decimals: u8,
    pub price_in_native_wei: U256,
}

impl TokenPriceEstimate {
    /// Native-wei value of `amount` base units, rounded down.
    pub fn value_of(&self, amount: U256) -> U256 {
        let scale = U256::from(10u64).pow(U256::from(self.decimals));
        amount.saturating_mul(self.price_in_native_wei) / scale
    }
}

#[async_trait]
pub trait AddressNamer: Send + Sync {
    async fn name(&self, address: Address) -> Option<AddressBookEntry>;
}

#[async_trait]
pub trait TokenPricer: Send + Sync {
    async fn price(&self, token: Address) -> Option<TokenPriceEstimate>;
}

#[async_trait]
pub trait EnsLabelResolver: Send + Sync {
    /// Label for a `.eth` labelhash, without the suffix.
    async fn label(&self, labelhash: B256) -> Option<String>;
}

/// Names the tokens in [`WELL_KNOWN_TOKENS`] and the ENS registrar.
pub struct StaticAddressBook;

#[async_trait]
impl AddressNamer for StaticAddressBook {
    async fn name(&self, address: Address) -> Option<AddressBookEntry> {
        if address == ENS_BASE_REGISTRAR {
            return Some(AddressBookEntry {
                address,
                name: "ENS: Base Registrar".into(),
                kind: AddressKind::Erc721 {
                    symbol: "ENS".into(),
                },
            });
        }
        let symbol = WELL_KNOWN_TOKENS.get(&address)?;
        let decimals = match *symbol {
            "USDC" | "USDT" => 6,
            "WBTC" => 8,
            _ => 18,
        };
        Some(AddressBookEntry {
            address,
            name: symbol.to_string(),
            kind: AddressKind::Erc20 {
                symbol: symbol.to_string(),
                decimals,
            },
        })
    }
}

/// Knows nothing. Used when the host has no pricing or ENS service.
pub struct NoMetadata;

#[async_trait]
impl AddressNamer for NoMetadata {
    async fn name(&self, _address: Address) -> Option<AddressBookEntry> {
        None
    }
}

#[async_trait]
impl TokenPricer for NoMetadata {
    async fn price(&self, _token: Address) -> Option<TokenPriceEstimate> {
        None
    }
}

#[async_trait]
impl EnsLabelResolver for NoMetadata {
    async fn label(&self, _labelhash: B256) -> Option<String> {
        None
    }
}

#[derive(Clone)]
pub struct MetadataServices {
    pub namer: Arc<dyn AddressNamer>,
    pub pricer: Arc<dyn TokenPricer>,
    pub ens: Arc<dyn EnsLabelResolver>,
}

impl Default for MetadataServices {
    fn default() -> Self {
        Self {
            namer: Arc::new(StaticAddressBook),
            pricer: Arc::new(NoMetadata),
            ens: Arc::new(NoMetadata),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;

    #[tokio::test]
    async fn test_static_address_book() {
        let usdc = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
        let entry = StaticAddressBook.name(usdc).await.unwrap();
        assert_eq!(entry.name, "USDC");
        assert_eq!(
            entry.kind,
            AddressKind::Erc20 {
                symbol: "USDC".into(),
                decimals: 6
            }
        );
        assert!(StaticAddressBook.name(ENS_BASE_REGISTRAR).await.is_some());
        assert!(StaticAddressBook.name(Address::repeat_byte(3)).await.is_none());
    }

    #[test]
    fn test_price_value_of() {
        // 1 USDC = 0.0004 ETH
        let estimate = TokenPriceEstimate {
            token: Address::repeat_byte(1),
            decimals: 6,
            price_in_native_wei: U256::from(400_000_000_000_000u64),
        };
        assert_eq!(
            estimate.value_of(U256::from(2_500_000u64)),
            U256::from(1_000_000_000_000_000u64)
        );
    }
}
