//! Overlay state. Never mutated in place once published: writers clone,
//! modify and swap the whole value behind an `Arc`.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{keccak256, Address, Bytes, I256, B256, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::mock_signer::PreviewTransaction;
use crate::ethrpc::{AccountOverride, BlockHeader, Log};
use crate::protectors::QuarantineCode;
use crate::requests::TransactionRequest;
use crate::typed_data::VerifiedTypedData;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreSimulationTransaction {
    pub preview: PreviewTransaction,
    /// Origin of the page that asked for the transaction.
    pub website: String,
    pub created: DateTime<Utc>,
    /// keccak-256 of the original request string; stable across re-simulation.
    pub transaction_identifier: B256,
    pub original_request: TransactionRequest,
    pub engine_filled_fees: bool,
    pub engine_filled_gas: bool,
    /// Gas estimation predicted a revert.
    pub predicted_revert: Option<String>,
    /// Set when the request pinned a nonce other than the one the sender
    /// would use next; holds that next nonce.
    pub expected_nonce: Option<u64>,
}

impl PreSimulationTransaction {
    pub fn identifier_for(original_request: &str) -> B256 {
        keccak256(original_request.as_bytes())
    }

    pub fn from(&self) -> Address {
        self.preview.from()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CallStatus {
    Success,
    Failure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    pub status: CallStatus,
    pub gas_used: u64,
    pub logs: Vec<Log>,
    pub return_data: Bytes,
    /// Native balance change per address, gas included.
    pub balance_deltas: BTreeMap<Address, I256>,
}

impl CallResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, CallStatus::Success)
    }
}

/// ERC-20 balance of `owner` right before and right after a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub token: Address,
    pub owner: Address,
    pub before: U256,
    pub after: U256,
}

impl TokenBalance {
    pub fn delta(&self) -> I256 {
        I256::from_raw(self.after).saturating_sub(I256::from_raw(self.before))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedTransaction {
    pub pre_simulation: PreSimulationTransaction,
    pub call_result: CallResult,
    pub realized_gas_price: U256,
    pub token_balances_after: Vec<TokenBalance>,
    pub quarantine_codes: BTreeSet<QuarantineCode>,
}

impl SimulatedTransaction {
    pub fn identifier(&self) -> B256 {
        self.pre_simulation.transaction_identifier
    }

    pub fn from(&self) -> Address {
        self.pre_simulation.from()
    }

    /// Total fee paid in native units.
    pub fn fee(&self) -> U256 {
        U256::from(self.call_result.gas_used).saturating_mul(self.realized_gas_price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignableMessage {
    /// `personal_sign`: prefixed with the Ethereum signed message header.
    PersonalSign { message: Bytes },
    /// `eth_sign`: raw data, signed without a prefix when it is 32 bytes.
    EthSign { data: Bytes },
    TypedData(Box<VerifiedTypedData>),
    /// Legacy `eth_signTypedData` array form.
    TypedDataV1 { fields: Vec<(String, String, serde_json::Value)> },
}

impl SignableMessage {
    /// EIP-191 personal message hash.
    pub fn personal_hash(message: &[u8]) -> B256 {
        let mut buf = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
        buf.extend_from_slice(message);
        keccak256(buf)
    }

    /// Hash the signer would sign, when we can compute it.
    pub fn signing_hash(&self) -> Option<B256> {
        match self {
            SignableMessage::PersonalSign { message } => Some(Self::personal_hash(message)),
            SignableMessage::EthSign { data } if data.len() == 32 => Some(B256::from_slice(data)),
            SignableMessage::EthSign { data } => Some(Self::personal_hash(data)),
            SignableMessage::TypedData(typed) => Some(typed.signing_hash),
            SignableMessage::TypedDataV1 { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub identifier: B256,
    pub method: String,
    pub from: Address,
    pub message: SignableMessage,
    pub website: String,
    pub created: DateTime<Utc>,
    pub quarantine_codes: BTreeSet<QuarantineCode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedBlock {
    pub state_overrides: BTreeMap<Address, AccountOverride>,
    pub signed_messages: Vec<SignedMessage>,
    pub simulated_transactions: Vec<SimulatedTransaction>,
    /// Seconds added to the previous block's timestamp.
    pub time_increase_delta: u64,
}

impl SimulatedBlock {
    pub fn is_empty(&self) -> bool {
        self.signed_messages.is_empty()
            && self.simulated_transactions.is_empty()
            && self.state_overrides.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationState {
    pub anchor_block_number: u64,
    pub anchor_block_hash: B256,
    pub anchor_timestamp: u64,
    /// `None` on chains without EIP-1559.
    pub anchor_base_fee_per_gas: Option<U256>,
    pub anchor_gas_limit: u64,
    pub anchor_gas_used: u64,
    pub chain_id: u64,
    pub blocks: Vec<SimulatedBlock>,
    pub simulation_conducted_at: DateTime<Utc>,
}

impl SimulationState {
    pub fn empty(anchor: &BlockHeader, chain_id: u64) -> Self {
        Self {
            anchor_block_number: anchor.number,
            anchor_block_hash: anchor.hash,
            anchor_timestamp: anchor.timestamp,
            anchor_base_fee_per_gas: anchor.base_fee_per_gas,
            anchor_gas_limit: anchor.gas_limit,
            anchor_gas_used: anchor.gas_used,
            chain_id,
            blocks: Vec::new(),
            simulation_conducted_at: Utc::now(),
        }
    }

    /// Effective number of overlay block `index`.
    pub fn block_number(&self, index: usize) -> u64 {
        self.anchor_block_number + index as u64 + 1
    }

    /// Anchor timestamp plus every delta up to and including block `index`.
    pub fn block_timestamp(&self, index: usize) -> u64 {
        self.blocks
            .iter()
            .take(index + 1)
            .fold(self.anchor_timestamp, |ts, block| {
                ts.saturating_add(block.time_increase_delta)
            })
    }

    pub fn transactions(&self) -> impl Iterator<Item = &SimulatedTransaction> {
        self.blocks
            .iter()
            .flat_map(|block| block.simulated_transactions.iter())
    }

    pub fn signed_messages(&self) -> impl Iterator<Item = &SignedMessage> {
        self.blocks.iter().flat_map(|block| block.signed_messages.iter())
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions().count()
    }

    /// Overlay transactions sent by `address`.
    pub fn transactions_sent_by(&self, address: Address) -> u64 {
        self.transactions().filter(|tx| tx.from() == address).count() as u64
    }

    pub fn find_transaction(&self, identifier: B256) -> Option<&SimulatedTransaction> {
        self.transactions().find(|tx| tx.identifier() == identifier)
    }

    /// Transactions that ran before `identifier`, in execution order.
    pub fn transactions_before(&self, identifier: B256) -> Vec<&SimulatedTransaction> {
        self.transactions()
            .take_while(|tx| tx.identifier() != identifier)
            .collect()
    }
}
