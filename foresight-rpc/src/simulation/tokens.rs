//! Token ABIs and log classification.
//!
//! ERC-20 and ERC-721 share the `Transfer` and `Approval` topic; they are told
//! apart by topic count (ERC-721 indexes the token id).

use std::collections::BTreeMap;

use alloy_primitives::{address, Address, U256};
use alloy_sol_types::{sol, SolEvent};
use serde::Serialize;

use crate::ethrpc::types::NATIVE_TRANSFER_LOG_ADDRESS;
use crate::ethrpc::Log;

sol! {
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);
        event Approval(address indexed owner, address indexed spender, uint256 value);

        function balanceOf(address owner) external view returns (uint256 balance);
        function transfer(address to, uint256 amount) external returns (bool);
        function approve(address spender, uint256 amount) external returns (bool);
        function transferFrom(address from, address to, uint256 amount) external returns (bool);
    }

    interface IERC721 {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
        event Approval(address indexed owner, address indexed approved, uint256 indexed tokenId);
        event ApprovalForAll(address indexed owner, address indexed operator, bool approved);
    }
}

/// ENS .eth base registrar (ERC-721, token id = labelhash).
pub const ENS_BASE_REGISTRAR: Address = address!("57f1887a8BF19b14fC0dF6Fd9B2acc9Af147eA85");

lazy_static::lazy_static! {
    /// Mainnet tokens that users commonly hold and that phishing pages imitate.
    pub static ref WELL_KNOWN_TOKENS: BTreeMap<Address, &'static str> = BTreeMap::from([
        (address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"), "WETH"),
        (address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"), "USDC"),
        (address!("dAC17F958D2ee523a2206206994597C13D831ec7"), "USDT"),
        (address!("6B175474E89094C44Da98b954EedeAC495271d0F"), "DAI"),
        (address!("2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599"), "WBTC"),
        (address!("1f9840a85d5aF5bf1D1762F925BDADdC4201F984"), "UNI"),
        (address!("514910771AF9Ca656af840dff83E8264EcF986CA"), "LINK"),
    ]);
}

pub fn is_well_known_token(address: Address) -> bool {
    WELL_KNOWN_TOKENS.contains_key(&address)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TokenEvent {
    Erc20Transfer {
        token: Address,
        from: Address,
        to: Address,
        value: U256,
    },
    Erc20Approval {
        token: Address,
        owner: Address,
        spender: Address,
        value: U256,
    },
    Erc721Transfer {
        token: Address,
        from: Address,
        to: Address,
        token_id: U256,
    },
    Erc721Approval {
        token: Address,
        owner: Address,
        approved: Address,
        token_id: U256,
    },
    ApprovalForAll {
        token: Address,
        owner: Address,
        operator: Address,
        approved: bool,
    },
    /// Native value moved, reported by `traceTransfers`.
    NativeTransfer {
        from: Address,
        to: Address,
        value: U256,
    },
}

impl TokenEvent {
    /// Classify a log. Anything we cannot decode is `None`.
    pub fn parse(log: &Log) -> Option<TokenEvent> {
        let topic0 = *log.topics.first()?;
        let topics = log.topics.iter().copied();
        let data = &log.data;

        if topic0 == IERC20::Transfer::SIGNATURE_HASH {
            return match log.topics.len() {
                3 => {
                    let event = IERC20::Transfer::decode_raw_log(topics, data, true).ok()?;
                    if log.address == NATIVE_TRANSFER_LOG_ADDRESS {
                        Some(TokenEvent::NativeTransfer {
                            from: event.from,
                            to: event.to,
                            value: event.value,
                        })
                    } else {
                        Some(TokenEvent::Erc20Transfer {
                            token: log.address,
                            from: event.from,
                            to: event.to,
                            value: event.value,
                        })
                    }
                }
                4 => {
                    let event = IERC721::Transfer::decode_raw_log(topics, data, true).ok()?;
                    Some(TokenEvent::Erc721Transfer {
                        token: log.address,
                        from: event.from,
                        to: event.to,
                        token_id: event.tokenId,
                    })
                }
                _ => None,
            };
        }
        if topic0 == IERC20::Approval::SIGNATURE_HASH {
            return match log.topics.len() {
                3 => {
                    let event = IERC20::Approval::decode_raw_log(topics, data, true).ok()?;
                    Some(TokenEvent::Erc20Approval {
                        token: log.address,
                        owner: event.owner,
                        spender: event.spender,
                        value: event.value,
                    })
                }
                4 => {
                    let event = IERC721::Approval::decode_raw_log(topics, data, true).ok()?;
                    Some(TokenEvent::Erc721Approval {
                        token: log.address,
                        owner: event.owner,
                        approved: event.approved,
                        token_id: event.tokenId,
                    })
                }
                _ => None,
            };
        }
        if topic0 == IERC721::ApprovalForAll::SIGNATURE_HASH {
            let event = IERC721::ApprovalForAll::decode_raw_log(topics, data, true).ok()?;
            return Some(TokenEvent::ApprovalForAll {
                token: log.address,
                owner: event.owner,
                operator: event.operator,
                approved: event.approved,
            });
        }
        None
    }
}

pub fn parse_token_events(logs: &[Log]) -> Vec<TokenEvent> {
    logs.iter().filter_map(TokenEvent::parse).collect()
}
