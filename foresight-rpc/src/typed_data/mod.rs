//! Strict EIP-712 typed-data validation and hashing.
//!
//! Signing requests are attacker-controlled. Everything is checked before we
//! hash or show anything: the payload shape, the type grammar, and every value
//! against its declared type using 256-bit arithmetic.

pub mod grammar;
pub mod hash;
pub mod validate;

use alloy_primitives::{Address, B256, U256};
use serde_json::Value;

pub use self::grammar::FieldType;
pub use self::validate::{TypeTree, TypedDataVersion, TypedField, TypedValue};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid typed data at {path}: {reason}")]
pub struct InvalidTypedData {
    /// Breadcrumb to the offending field, e.g. `message.details[1].amount`.
    pub path: String,
    pub reason: String,
}

impl InvalidTypedData {
    pub fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// A payload that passed validation, with its hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedTypedData {
    pub tree: TypeTree,
    pub primary_type: String,
    pub domain: TypedValue,
    /// `None` when the primary type is `EIP712Domain`.
    pub message: Option<TypedValue>,
    pub domain_separator: B256,
    pub message_hash: Option<B256>,
    pub signing_hash: B256,
}

impl VerifiedTypedData {
    pub fn domain_chain_id(&self) -> Option<U256> {
        self.domain.field("chainId").and_then(TypedValue::as_uint)
    }

    pub fn verifying_contract(&self) -> Option<Address> {
        self.domain
            .field("verifyingContract")
            .and_then(TypedValue::as_address)
    }

    pub fn message_field(&self, name: &str) -> Option<&TypedValue> {
        self.message.as_ref().and_then(|m| m.field(name))
    }

    pub fn encode_type(&self) -> String {
        hash::encode_type(&self.tree, &self.primary_type)
    }
}

/// Validate and hash a typed-data payload.
pub fn verify_typed_data(
    raw: &Value,
    version: TypedDataVersion,
) -> Result<VerifiedTypedData, InvalidTypedData> {
    let parsed = validate::parse_payload(raw, version)?;
    let domain_separator = hash::hash_struct(&parsed.tree, &parsed.domain)?;
    let message_hash = parsed
        .message
        .as_ref()
        .map(|m| hash::hash_struct(&parsed.tree, m))
        .transpose()?;
    let signing_hash = hash::signing_hash(domain_separator, message_hash);
    Ok(VerifiedTypedData {
        tree: parsed.tree,
        primary_type: parsed.primary_type,
        domain: parsed.domain,
        message: parsed.message,
        domain_separator,
        message_hash,
        signing_hash,
    })
}

/// Payloads frequently arrive as a JSON string inside the params array.
pub fn verify_typed_data_str(
    raw: &str,
    version: TypedDataVersion,
) -> Result<VerifiedTypedData, InvalidTypedData> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| InvalidTypedData::new("$", format!("not valid JSON: {e}")))?;
    verify_typed_data(&value, version)
}
