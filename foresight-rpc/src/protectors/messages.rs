//! Checks on signature requests.
//!
//! Off-chain signatures never reach the simulator, yet a permit signed today
//! moves tokens tomorrow. These checks judge the message itself.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use super::approvals::UNLIMITED_APPROVAL_THRESHOLD;
use super::{Protector, ProtectorContext, QuarantineCode};
use crate::ethrpc::RpcError;
use crate::simulation::{SignableMessage, SignedMessage, SimulatedTransaction};
use crate::typed_data::{TypedValue, VerifiedTypedData};

/// EIP-712 primary types that authorize token movement.
pub const PERMIT_PRIMARY_TYPES: &[&str] = &[
    "Permit",                    // ERC-2612, DAI
    "PermitSingle",              // Permit2 allowance
    "PermitBatch",               // Permit2 allowance, many tokens
    "PermitTransferFrom",        // Permit2 signature transfer
    "PermitWitnessTransferFrom", // Permit2 signature transfer with witness
    "PermitBatchTransferFrom",
];

/// Fields naming the address that gains the allowance.
const SPENDER_FIELDS: &[&str] = &["spender", "operator", "taker"];

pub fn is_permit(typed: &VerifiedTypedData) -> bool {
    PERMIT_PRIMARY_TYPES
        .iter()
        .any(|t| typed.primary_type.eq_ignore_ascii_case(t))
}

/// Amounts a permit grants, wherever the known layouts keep them:
/// `value` (ERC-2612), `details.amount` (Permit2 allowance) and
/// `permitted.amount` (Permit2 transfer), each possibly an array.
fn granted_amounts(typed: &VerifiedTypedData) -> Vec<U256> {
    fn amounts_in(value: &TypedValue, out: &mut Vec<U256>) {
        match value {
            TypedValue::Array(items) => items.iter().for_each(|item| amounts_in(item, out)),
            TypedValue::Struct { .. } => {
                if let Some(amount) = value.field("amount").and_then(TypedValue::as_uint) {
                    out.push(amount);
                }
            }
            _ => {}
        }
    }

    let mut amounts = Vec::new();
    for name in ["value", "amount"] {
        if let Some(v) = typed.message_field(name).and_then(TypedValue::as_uint) {
            amounts.push(v);
        }
    }
    for name in ["details", "permitted"] {
        if let Some(nested) = typed.message_field(name) {
            amounts_in(nested, &mut amounts);
        }
    }
    amounts
}

fn is_unlimited_permit(typed: &VerifiedTypedData) -> bool {
    // DAI's permit has no amount, only `allowed`, and grants everything.
    if matches!(typed.message_field("allowed"), Some(TypedValue::Bool(true))) {
        return true;
    }
    granted_amounts(typed)
        .into_iter()
        .any(|amount| amount >= UNLIMITED_APPROVAL_THRESHOLD)
}

fn permit_spender(typed: &VerifiedTypedData) -> Option<Address> {
    SPENDER_FIELDS
        .iter()
        .find_map(|name| typed.message_field(name).and_then(TypedValue::as_address))
}

/// Flags blind hash signing, dangerous permits and cross-chain signatures.
pub struct MessageProtector;

#[async_trait]
impl Protector for MessageProtector {
    fn name(&self) -> &'static str {
        "messages"
    }

    async fn inspect(
        &self,
        _tx: &SimulatedTransaction,
        _ctx: &ProtectorContext<'_>,
    ) -> Result<Vec<QuarantineCode>, RpcError> {
        Ok(Vec::new())
    }

    async fn inspect_message(
        &self,
        message: &SignedMessage,
        ctx: &ProtectorContext<'_>,
    ) -> Result<Vec<QuarantineCode>, RpcError> {
        let typed = match &message.message {
            SignableMessage::EthSign { data } if data.len() == 32 => {
                return Ok(vec![QuarantineCode::BlindHashSignature]);
            }
            SignableMessage::TypedData(typed) => typed,
            SignableMessage::EthSign { .. }
            | SignableMessage::PersonalSign { .. }
            | SignableMessage::TypedDataV1 { .. } => return Ok(Vec::new()),
        };

        let mut codes = Vec::new();
        if let Some(chain_id) = typed.domain_chain_id() {
            if chain_id != U256::from(ctx.state.chain_id) {
                codes.push(QuarantineCode::ChainIdMismatch);
            }
        }
        if is_permit(typed) {
            if is_unlimited_permit(typed) {
                codes.push(QuarantineCode::UnlimitedPermit);
            }
            if let Some(spender) = permit_spender(typed) {
                if !ctx.has_code(spender).await? {
                    codes.push(QuarantineCode::PermitToEoa);
                }
            }
        }
        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use alloy_primitives::{Bytes, B256};
    use chrono::Utc;
    use serde_json::{json, Value};

    use super::*;
    use crate::ethrpc::{EthRpcClient, RetryPolicy};
    use crate::test_utils::{anchor_state, code_for, ScriptedTransport};
    use crate::typed_data::{verify_typed_data, TypedDataVersion};

    const ROUTER: &str = "0x3fC91A3afd70395Cd496C647d5a6CC9D4B2b7FAD";
    const PERMIT2: &str = "0x000000000022D473030F116dDEE9F6B43aC78BA3";

    fn signed(message: SignableMessage) -> SignedMessage {
        SignedMessage {
            identifier: B256::repeat_byte(1),
            method: "eth_signTypedData_v4".into(),
            from: Address::repeat_byte(1),
            message,
            website: "https://app.example".into(),
            created: Utc::now(),
            quarantine_codes: BTreeSet::new(),
        }
    }

    async fn inspect(message: SignableMessage) -> Vec<QuarantineCode> {
        let transport = Arc::new(ScriptedTransport::new());
        code_for(&transport, vec![ROUTER.parse().unwrap(), PERMIT2.parse().unwrap()]);
        let client = EthRpcClient::new(transport, RetryPolicy::default());
        let state = anchor_state();
        let ctx = ProtectorContext {
            state: &state,
            client: &client,
            abort: None,
        };
        MessageProtector.inspect_message(&signed(message), &ctx).await.unwrap()
    }

    fn typed(raw: Value) -> SignableMessage {
        SignableMessage::TypedData(Box::new(verify_typed_data(&raw, TypedDataVersion::V4).unwrap()))
    }

    fn permit_single(amount: &str, spender: &str, chain_id: u64) -> Value {
        json!({
            "types": {
                "EIP712Domain": [
                    {"name": "name", "type": "string"},
                    {"name": "chainId", "type": "uint256"},
                    {"name": "verifyingContract", "type": "address"}
                ],
                "PermitDetails": [
                    {"name": "token", "type": "address"},
                    {"name": "amount", "type": "uint160"},
                    {"name": "expiration", "type": "uint48"},
                    {"name": "nonce", "type": "uint48"}
                ],
                "PermitSingle": [
                    {"name": "details", "type": "PermitDetails"},
                    {"name": "spender", "type": "address"},
                    {"name": "sigDeadline", "type": "uint256"}
                ]
            },
            "primaryType": "PermitSingle",
            "domain": {"name": "Permit2", "chainId": chain_id, "verifyingContract": PERMIT2},
            "message": {
                "details": {
                    "token": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                    "amount": amount,
                    "expiration": "1718000000",
                    "nonce": "0"
                },
                "spender": spender,
                "sigDeadline": "1718000000"
            }
        })
    }

    #[tokio::test]
    async fn test_blind_hash_signature() {
        let codes = inspect(SignableMessage::EthSign {
            data: Bytes::from(vec![0xab; 32]),
        })
        .await;
        assert_eq!(codes, vec![QuarantineCode::BlindHashSignature]);

        let codes = inspect(SignableMessage::EthSign {
            data: Bytes::from(b"hello".to_vec()),
        })
        .await;
        assert!(codes.is_empty());
    }

    #[tokio::test]
    async fn test_personal_sign_is_not_flagged() {
        let codes = inspect(SignableMessage::PersonalSign {
            message: Bytes::from(vec![0xab; 32]),
        })
        .await;
        assert!(codes.is_empty());
    }

    #[tokio::test]
    async fn test_unlimited_permit2_to_contract() {
        let max_uint160 = "1461501637330902918203684832716283019655932542975";
        let codes = inspect(typed(permit_single(max_uint160, ROUTER, 1))).await;
        assert_eq!(codes, vec![QuarantineCode::UnlimitedPermit]);
    }

    #[tokio::test]
    async fn test_bounded_permit_to_eoa() {
        let eoa = "0x6666666666666666666666666666666666666666";
        let codes = inspect(typed(permit_single("1000000", eoa, 1))).await;
        assert_eq!(codes, vec![QuarantineCode::PermitToEoa]);
    }

    #[tokio::test]
    async fn test_chain_id_mismatch() {
        let codes = inspect(typed(permit_single("1000000", ROUTER, 137))).await;
        assert_eq!(codes, vec![QuarantineCode::ChainIdMismatch]);
    }

    #[tokio::test]
    async fn test_dai_style_permit_is_unlimited() {
        let raw = json!({
            "types": {
                "EIP712Domain": [
                    {"name": "name", "type": "string"},
                    {"name": "version", "type": "string"},
                    {"name": "chainId", "type": "uint256"},
                    {"name": "verifyingContract", "type": "address"}
                ],
                "Permit": [
                    {"name": "holder", "type": "address"},
                    {"name": "spender", "type": "address"},
                    {"name": "nonce", "type": "uint256"},
                    {"name": "expiry", "type": "uint256"},
                    {"name": "allowed", "type": "bool"}
                ]
            },
            "primaryType": "Permit",
            "domain": {
                "name": "Dai Stablecoin",
                "version": "1",
                "chainId": 1,
                "verifyingContract": "0x6B175474E89094C44Da98b954EedeAC495271d0F"
            },
            "message": {
                "holder": "0x0101010101010101010101010101010101010101",
                "spender": ROUTER,
                "nonce": 0,
                "expiry": 0,
                "allowed": true
            }
        });
        assert_eq!(inspect(typed(raw)).await, vec![QuarantineCode::UnlimitedPermit]);
    }
}
