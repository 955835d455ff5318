//! Read-only snapshot of an overlay for the presentation layer.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, Bytes, I256, B256, U256};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::metadata::{AddressBookEntry, MetadataServices, TokenPriceEstimate};
use crate::protectors::QuarantineCode;
use crate::simulation::tokens::{parse_token_events, TokenEvent, ENS_BASE_REGISTRAR};
use crate::simulation::{
    CallStatus, SignableMessage, SignedMessage, SimulatedTransaction, SimulationState, TokenBalance,
};
use crate::typed_data::TypedValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizedSimulatorState {
    pub anchor_block_number: u64,
    pub chain_id: u64,
    pub per_block: Vec<VisualizedBlock>,
    pub address_book_entries: Vec<AddressBookEntry>,
    pub token_price_estimates: Vec<TokenPriceEstimate>,
    pub named_token_ids: Vec<NamedTokenId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizedBlock {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transactions: Vec<VisualizedTransaction>,
    pub signed_messages: Vec<VisualizedMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantineReason {
    pub code: QuarantineCode,
    pub message: String,
}

fn quarantine_reasons(codes: &BTreeSet<QuarantineCode>) -> Vec<QuarantineReason> {
    codes
        .iter()
        .map(|code| QuarantineReason {
            code: *code,
            message: code.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizedTransaction {
    pub identifier: B256,
    pub hash: B256,
    pub website: String,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub nonce: Option<u64>,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub realized_gas_price: U256,
    pub fee: U256,
    #[serde(flatten)]
    pub status: CallStatus,
    pub predicted_revert: Option<String>,
    pub native_balance_deltas: BTreeMap<Address, I256>,
    pub token_events: Vec<TokenEvent>,
    pub token_balances_after: Vec<TokenBalance>,
    pub quarantine: Vec<QuarantineReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataV1Field {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum VisualizedMessageBody {
    PersonalSign {
        /// Present when the message is valid UTF-8.
        text: Option<String>,
        raw: Bytes,
    },
    EthSign {
        data: Bytes,
    },
    TypedData {
        primary_type: String,
        domain: Value,
        message: Option<Value>,
        domain_separator: B256,
        message_hash: Option<B256>,
    },
    TypedDataV1 {
        fields: Vec<TypedDataV1Field>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizedMessage {
    pub identifier: B256,
    pub method: String,
    pub from: Address,
    pub website: String,
    pub signing_hash: Option<B256>,
    pub body: VisualizedMessageBody,
    pub quarantine: Vec<QuarantineReason>,
}

/// An NFT id with a human name, e.g. an ENS `.eth` label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedTokenId {
    pub token: Address,
    pub token_id: U256,
    pub name: String,
}

/// JSON view of a typed value. Integers become decimal strings so no
/// precision is lost in JavaScript.
pub fn typed_value_json(value: &TypedValue) -> Value {
    match value {
        TypedValue::Uint(v) => json!(v.to_string()),
        TypedValue::Int(v) => json!(v.to_string()),
        TypedValue::Bool(v) => json!(v),
        TypedValue::Address(a) => json!(a.to_checksum(None)),
        TypedValue::FixedBytes(b) | TypedValue::Bytes(b) => json!(format!("0x{}", hex::encode(b))),
        TypedValue::String(s) => json!(s),
        TypedValue::Struct { fields, .. } => Value::Object(
            fields
                .iter()
                .map(|(name, v)| (name.clone(), typed_value_json(v)))
                .collect(),
        ),
        TypedValue::Array(items) => Value::Array(items.iter().map(typed_value_json).collect()),
    }
}

fn typed_value_addresses(value: &TypedValue, out: &mut BTreeSet<Address>) {
    match value {
        TypedValue::Address(a) => {
            out.insert(*a);
        }
        TypedValue::Struct { fields, .. } => fields.iter().for_each(|(_, v)| typed_value_addresses(v, out)),
        TypedValue::Array(items) => items.iter().for_each(|v| typed_value_addresses(v, out)),
        _ => {}
    }
}

fn visualize_transaction(tx: &SimulatedTransaction) -> VisualizedTransaction {
    let preview = &tx.pre_simulation.preview;
    let inner = preview.transaction();
    VisualizedTransaction {
        identifier: tx.identifier(),
        hash: preview.hash(),
        website: tx.pre_simulation.website.clone(),
        from: tx.from(),
        to: inner.to(),
        value: inner.value(),
        nonce: preview.nonce(),
        gas_limit: inner.gas_limit(),
        gas_used: tx.call_result.gas_used,
        realized_gas_price: tx.realized_gas_price,
        fee: tx.fee(),
        status: tx.call_result.status.clone(),
        predicted_revert: tx.pre_simulation.predicted_revert.clone(),
        native_balance_deltas: tx.call_result.balance_deltas.clone(),
        token_events: parse_token_events(&tx.call_result.logs),
        token_balances_after: tx.token_balances_after.clone(),
        quarantine: quarantine_reasons(&tx.quarantine_codes),
    }
}

fn visualize_message(message: &SignedMessage) -> VisualizedMessage {
    let body = match &message.message {
        SignableMessage::PersonalSign { message } => VisualizedMessageBody::PersonalSign {
            text: std::str::from_utf8(message).ok().map(str::to_string),
            raw: message.clone(),
        },
        SignableMessage::EthSign { data } => VisualizedMessageBody::EthSign { data: data.clone() },
        SignableMessage::TypedData(typed) => VisualizedMessageBody::TypedData {
            primary_type: typed.primary_type.clone(),
            domain: typed_value_json(&typed.domain),
            message: typed.message.as_ref().map(typed_value_json),
            domain_separator: typed.domain_separator,
            message_hash: typed.message_hash,
        },
        SignableMessage::TypedDataV1 { fields } => VisualizedMessageBody::TypedDataV1 {
            fields: fields
                .iter()
                .map(|(type_name, name, value)| TypedDataV1Field {
                    type_name: type_name.clone(),
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        },
    };
    VisualizedMessage {
        identifier: message.identifier,
        method: message.method.clone(),
        from: message.from,
        website: message.website.clone(),
        signing_hash: message.message.signing_hash(),
        body,
        quarantine: quarantine_reasons(&message.quarantine_codes),
    }
}

/// Build the presentation snapshot and resolve every address, token price
/// and ENS name it mentions. Lookups that fail are simply left out.
pub async fn visualize_simulator_state(
    state: &SimulationState,
    services: &MetadataServices,
) -> VisualizedSimulatorState {
    let per_block: Vec<VisualizedBlock> = state
        .blocks
        .iter()
        .enumerate()
        .map(|(index, block)| VisualizedBlock {
            block_number: state.block_number(index),
            block_timestamp: state.block_timestamp(index),
            transactions: block.simulated_transactions.iter().map(visualize_transaction).collect(),
            signed_messages: block.signed_messages.iter().map(visualize_message).collect(),
        })
        .collect();

    let mut addresses = BTreeSet::new();
    let mut erc20_tokens = BTreeSet::new();
    let mut ens_ids = BTreeSet::new();
    for tx in per_block.iter().flat_map(|b| &b.transactions) {
        addresses.insert(tx.from);
        addresses.extend(tx.to);
        addresses.extend(tx.native_balance_deltas.keys().copied());
        for balance in &tx.token_balances_after {
            erc20_tokens.insert(balance.token);
            addresses.insert(balance.owner);
        }
        for event in &tx.token_events {
            match *event {
                TokenEvent::Erc20Transfer { token, from, to, .. } => {
                    erc20_tokens.insert(token);
                    addresses.extend([from, to]);
                }
                TokenEvent::Erc20Approval { token, owner, spender, .. } => {
                    erc20_tokens.insert(token);
                    addresses.extend([owner, spender]);
                }
                TokenEvent::Erc721Transfer { token, from, to, token_id } => {
                    addresses.extend([token, from, to]);
                    if token == ENS_BASE_REGISTRAR {
                        ens_ids.insert(token_id);
                    }
                }
                TokenEvent::Erc721Approval { token, owner, approved, token_id } => {
                    addresses.extend([token, owner, approved]);
                    if token == ENS_BASE_REGISTRAR {
                        ens_ids.insert(token_id);
                    }
                }
                TokenEvent::ApprovalForAll { token, owner, operator, .. } => {
                    addresses.extend([token, owner, operator]);
                }
                TokenEvent::NativeTransfer { from, to, .. } => {
                    addresses.extend([from, to]);
                }
            }
        }
    }
    for message in state.signed_messages() {
        addresses.insert(message.from);
        if let SignableMessage::TypedData(typed) = &message.message {
            typed_value_addresses(&typed.domain, &mut addresses);
            if let Some(body) = &typed.message {
                typed_value_addresses(body, &mut addresses);
            }
        }
    }
    addresses.extend(erc20_tokens.iter().copied());
    addresses.remove(&Address::ZERO);

    let mut address_book_entries = Vec::new();
    for address in addresses {
        if let Some(entry) = services.namer.name(address).await {
            address_book_entries.push(entry);
        }
    }

    let mut token_price_estimates = Vec::new();
    for token in erc20_tokens {
        match services.pricer.price(token).await {
            Some(estimate) => token_price_estimates.push(estimate),
            None => debug!(%token, "No price estimate"),
        }
    }

    let mut named_token_ids = Vec::new();
    for token_id in ens_ids {
        if let Some(label) = services.ens.label(B256::from(token_id)).await {
            named_token_ids.push(NamedTokenId {
                token: ENS_BASE_REGISTRAR,
                token_id,
                name: format!("{label}.eth"),
            });
        }
    }

    VisualizedSimulatorState {
        anchor_block_number: state.anchor_block_number,
        chain_id: state.chain_id,
        per_block,
        address_book_entries,
        token_price_estimates,
        named_token_ids,
    }
}
