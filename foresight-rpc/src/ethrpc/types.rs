//! Request and response shapes for the JSON-RPC methods we consume.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::wire::hex::{format_u64, serde_opt_u64, serde_u64};
use crate::wire::AccessListItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
    Safe,
    Finalized,
    Earliest,
    Number(u64),
}

impl BlockTag {
    pub fn to_param(self) -> serde_json::Value {
        serde_json::Value::String(match self {
            BlockTag::Latest => "latest".into(),
            BlockTag::Pending => "pending".into(),
            BlockTag::Safe => "safe".into(),
            BlockTag::Finalized => "finalized".into(),
            BlockTag::Earliest => "earliest".into(),
            BlockTag::Number(n) => format_u64(n),
        })
    }
}

impl Serialize for BlockTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_param().serialize(serializer)
    }
}

/// The subset of a block we care about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    #[serde(with = "serde_u64")]
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    #[serde(with = "serde_u64")]
    pub timestamp: u64,
    #[serde(with = "serde_u64")]
    pub gas_limit: u64,
    #[serde(with = "serde_u64")]
    pub gas_used: u64,
    /// Absent on pre-London chains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub miner: Address,
}

/// `eth_call` / `eth_estimateGas` / `eth_simulateV1` transaction object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_opt_u64")]
    pub gas: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_opt_u64")]
    pub nonce: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_opt_u64")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<Vec<AccessListItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_blob_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_versioned_hashes: Option<Vec<B256>>,
}

/// Per-account state override for `eth_call` and `eth_simulateV1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_opt_u64")]
    pub nonce: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Bytes>,
    /// Replaces the whole storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BTreeMap<B256, B256>>,
    /// Patches individual slots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_diff: Option<BTreeMap<B256, B256>>,
    #[serde(
        default,
        rename = "movePrecompileToAddress",
        skip_serializing_if = "Option::is_none"
    )]
    pub move_precompile_to: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockOverrides {
    #[serde(skip_serializing_if = "Option::is_none", with = "serde_opt_u64")]
    pub number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", with = "serde_opt_u64")]
    pub time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", with = "serde_opt_u64")]
    pub gas_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_recipient: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U256>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStateCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_overrides: Option<BlockOverrides>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub state_overrides: BTreeMap<Address, AccountOverride>,
    pub calls: Vec<CallRequest>,
}

/// `eth_simulateV1` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatePayload {
    pub block_state_calls: Vec<BlockStateCall>,
    /// Emit native value transfers as pseudo-logs from
    /// [`NATIVE_TRANSFER_LOG_ADDRESS`].
    pub trace_transfers: bool,
    pub validation: bool,
}

/// Address that `traceTransfers` uses for native value transfer logs.
pub const NATIVE_TRANSFER_LOG_ADDRESS: Address = Address::new([0xee; 20]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulateCallError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedCallResult {
    /// `0x1` success, `0x0` failure.
    #[serde(with = "serde_u64")]
    pub status: u64,
    pub return_data: Bytes,
    #[serde(with = "serde_u64")]
    pub gas_used: u64,
    #[serde(default)]
    pub logs: Vec<Log>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SimulateCallError>,
}

impl SimulatedCallResult {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedBlockResult {
    #[serde(with = "serde_u64")]
    pub number: u64,
    #[serde(default)]
    pub hash: B256,
    #[serde(with = "serde_u64")]
    pub timestamp: u64,
    #[serde(with = "serde_u64")]
    pub gas_limit: u64,
    #[serde(with = "serde_u64")]
    pub gas_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U256>,
    pub calls: Vec<SimulatedCallResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_block: Option<BlockTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_block: Option<BlockTag>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<Address>,
    /// `None` entries match any topic in that position.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<Option<B256>>,
}
