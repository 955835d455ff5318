//! Strict parsing of the signing and sending requests we intercept.
//!
//! serde handles the shape; cross-field rules are checked afterwards in
//! [`TransactionRequest::validate`] so each rule has its own message.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::typed_data::{verify_typed_data, InvalidTypedData, TypedDataVersion, VerifiedTypedData};
use crate::types::INVALID_PARAMS;
use crate::wire::hex::{serde_opt_address, serde_opt_data, serde_opt_u256, serde_opt_u64};
use crate::wire::{parse_address, parse_data, AccessListItem, SignedTransaction, WireError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    TypedData(#[from] InvalidTypedData),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl RequestError {
    pub fn code(&self) -> i64 {
        INVALID_PARAMS
    }
}

fn invalid(message: impl Into<String>) -> RequestError {
    RequestError::InvalidParams(message.into())
}

/// `eth_sendTransaction` parameter object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransactionRequest {
    #[serde(default, with = "serde_opt_address", skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, with = "serde_opt_address", skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(default, alias = "gasLimit", with = "serde_opt_u64", skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    #[serde(default, with = "serde_opt_u256", skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    #[serde(default, with = "serde_opt_u256", skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default, with = "serde_opt_u256", skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(default, with = "serde_opt_u256", skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(default, with = "serde_opt_data", skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(default, with = "serde_opt_data", skip_serializing_if = "Option::is_none")]
    pub input: Option<Bytes>,
    #[serde(default, with = "serde_opt_u64", skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(default, with = "serde_opt_u64", skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, rename = "type", with = "serde_opt_u64", skip_serializing_if = "Option::is_none")]
    pub tx_type: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<Vec<AccessListItem>>,
    #[serde(default, with = "serde_opt_u256", skip_serializing_if = "Option::is_none")]
    pub max_fee_per_blob_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_versioned_hashes: Option<Vec<B256>>,
}

impl TransactionRequest {
    pub fn from_value(value: &Value) -> Result<Self, RequestError> {
        let request: TransactionRequest = serde_json::from_value(value.clone())
            .map_err(|e| invalid(format!("transaction object: {e}")))?;
        request.validate()?;
        Ok(request)
    }

    /// Cross-field rules serde cannot express.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.from.is_none() {
            return Err(invalid("missing `from`"));
        }
        if self.gas_price.is_some() && self.max_fee_per_gas.is_some() {
            return Err(invalid("`gasPrice` and `maxFeePerGas` are mutually exclusive"));
        }
        if self.max_priority_fee_per_gas.is_some() && self.max_fee_per_gas.is_none() {
            return Err(invalid("`maxPriorityFeePerGas` requires `maxFeePerGas`"));
        }
        if let (Some(max), Some(priority)) = (self.max_fee_per_gas, self.max_priority_fee_per_gas) {
            if priority > max {
                return Err(invalid("`maxPriorityFeePerGas` exceeds `maxFeePerGas`"));
            }
        }
        if let (Some(data), Some(input)) = (&self.data, &self.input) {
            if data != input {
                return Err(invalid("`data` and `input` disagree"));
            }
        }
        match self.tx_type {
            None => {}
            Some(0) | Some(1) if self.max_fee_per_gas.is_some() => {
                return Err(invalid("legacy transaction type with `maxFeePerGas`"));
            }
            Some(2) | Some(3) if self.gas_price.is_some() => {
                return Err(invalid("fee-market transaction type with `gasPrice`"));
            }
            Some(0..=3) => {}
            Some(other) => return Err(invalid(format!("unsupported transaction type {other}"))),
        }
        if self.is_blob() && self.to.is_none() {
            return Err(invalid("blob transactions cannot create contracts"));
        }
        Ok(())
    }

    pub fn sender(&self) -> Address {
        self.from.unwrap_or_default()
    }

    /// `input`, falling back to `data`.
    pub fn calldata(&self) -> Bytes {
        self.input
            .clone()
            .or_else(|| self.data.clone())
            .unwrap_or_default()
    }

    pub fn is_blob(&self) -> bool {
        self.tx_type == Some(3)
            || self.blob_versioned_hashes.is_some()
            || self.max_fee_per_blob_gas.is_some()
    }

    /// Whether the request asks for a legacy-priced transaction.
    pub fn is_legacy_priced(&self) -> bool {
        self.gas_price.is_some() || matches!(self.tx_type, Some(0) | Some(1))
    }
}

/// A request the proxy holds for confirmation instead of forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptedRequest {
    SendTransaction {
        request: TransactionRequest,
        /// The parameter object exactly as received.
        original: String,
    },
    SendRawTransaction {
        raw: Bytes,
        transaction: SignedTransaction,
        from: Address,
    },
    PersonalSign {
        account: Address,
        message: Bytes,
    },
    EthSign {
        account: Address,
        data: Bytes,
    },
    SignTypedData {
        account: Address,
        version: TypedDataVersion,
        typed_data: Box<VerifiedTypedData>,
    },
    SignTypedDataV1 {
        account: Address,
        fields: Vec<(String, String, Value)>,
    },
}

impl InterceptedRequest {
    pub fn account(&self) -> Address {
        match self {
            InterceptedRequest::SendTransaction { request, .. } => request.sender(),
            InterceptedRequest::SendRawTransaction { from, .. } => *from,
            InterceptedRequest::PersonalSign { account, .. }
            | InterceptedRequest::EthSign { account, .. }
            | InterceptedRequest::SignTypedData { account, .. }
            | InterceptedRequest::SignTypedDataV1 { account, .. } => *account,
        }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(
            self,
            InterceptedRequest::SendTransaction { .. } | InterceptedRequest::SendRawTransaction { .. }
        )
    }
}

fn params_array<'a>(params: &'a Value, method: &str, min: usize) -> Result<&'a [Value], RequestError> {
    let list = params
        .as_array()
        .ok_or_else(|| invalid(format!("{method}: params must be an array")))?;
    if list.len() < min {
        return Err(invalid(format!(
            "{method}: expected at least {min} params, got {}",
            list.len()
        )));
    }
    Ok(list)
}

fn string_param<'a>(value: &'a Value, what: &str) -> Result<&'a str, RequestError> {
    value
        .as_str()
        .ok_or_else(|| invalid(format!("{what} must be a string")))
}

/// `personal_sign` messages are hex when they look like hex, UTF-8 otherwise.
fn personal_message(raw: &str) -> Bytes {
    match parse_data(raw) {
        Ok(bytes) => bytes,
        Err(_) => Bytes::copy_from_slice(raw.as_bytes()),
    }
}

/// Typed data may arrive as an object or as a JSON string.
fn typed_payload(value: &Value) -> Result<Value, RequestError> {
    match value {
        Value::String(s) => serde_json::from_str(s)
            .map_err(|e| RequestError::TypedData(InvalidTypedData::new("$", format!("not valid JSON: {e}")))),
        Value::Object(_) => Ok(value.clone()),
        _ => Err(invalid("typed data must be an object or a JSON string")),
    }
}

fn typed_data_v1(value: &Value) -> Result<Vec<(String, String, Value)>, RequestError> {
    let entries = value
        .as_array()
        .ok_or_else(|| invalid("eth_signTypedData_v1 expects an array of fields"))?;
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let object = entry
                .as_object()
                .ok_or_else(|| invalid(format!("field {i} is not an object")))?;
            if object.len() != 3 {
                return Err(invalid(format!("field {i} must have exactly type, name and value")));
            }
            let ty = object.get("type").and_then(Value::as_str);
            let name = object.get("name").and_then(Value::as_str);
            match (ty, name, object.get("value")) {
                (Some(ty), Some(name), Some(value)) => Ok((ty.to_string(), name.to_string(), value.clone())),
                _ => Err(invalid(format!("field {i} must have exactly type, name and value"))),
            }
        })
        .collect()
}

/// Parse a request if it is one we intercept. Anything else is `Ok(None)`
/// and gets forwarded unchanged.
pub fn parse_intercepted(method: &str, params: &Value) -> Result<Option<InterceptedRequest>, RequestError> {
    let request = match method {
        "eth_sendTransaction" => {
            let list = params_array(params, method, 1)?;
            let request = TransactionRequest::from_value(&list[0])?;
            InterceptedRequest::SendTransaction {
                request,
                original: list[0].to_string(),
            }
        }
        "eth_sendRawTransaction" => {
            let list = params_array(params, method, 1)?;
            let raw = parse_data(string_param(&list[0], "raw transaction")?)?;
            let transaction = SignedTransaction::decode_signed(&raw)?;
            let from = transaction.recover_sender()?;
            InterceptedRequest::SendRawTransaction {
                raw,
                transaction,
                from,
            }
        }
        "personal_sign" => {
            let list = params_array(params, method, 2)?;
            let first = string_param(&list[0], "message")?;
            let second = string_param(&list[1], "account")?;
            // Some dapps send [account, message].
            let (message, account) = match (parse_address(first), parse_address(second)) {
                (Ok(account), Err(_)) => (second, account),
                (_, Ok(account)) => (first, account),
                (Err(_), Err(e)) => return Err(e.into()),
            };
            InterceptedRequest::PersonalSign {
                account,
                message: personal_message(message),
            }
        }
        "eth_sign" => {
            let list = params_array(params, method, 2)?;
            InterceptedRequest::EthSign {
                account: parse_address(string_param(&list[0], "account")?)?,
                data: parse_data(string_param(&list[1], "data")?)?,
            }
        }
        "eth_signTypedData" | "eth_signTypedData_v1" => {
            let list = params_array(params, method, 2)?;
            InterceptedRequest::SignTypedDataV1 {
                fields: typed_data_v1(&list[0])?,
                account: parse_address(string_param(&list[1], "account")?)?,
            }
        }
        "eth_signTypedData_v3" | "eth_signTypedData_v4" => {
            let version = if method.ends_with("v3") {
                TypedDataVersion::V3
            } else {
                TypedDataVersion::V4
            };
            let list = params_array(params, method, 2)?;
            let account = parse_address(string_param(&list[0], "account")?)?;
            let typed_data = verify_typed_data(&typed_payload(&list[1])?, version)?;
            InterceptedRequest::SignTypedData {
                account,
                version,
                typed_data: Box::new(typed_data),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(request))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const ALICE: &str = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf";

    fn send(tx: Value) -> Result<Option<InterceptedRequest>, RequestError> {
        parse_intercepted("eth_sendTransaction", &json!([tx]))
    }

    #[test]
    fn test_valid_send_transaction() {
        let parsed = send(json!({
            "from": ALICE,
            "to": "0x000000000000000000000000000000000000dead",
            "value": "0xde0b6b3a7640000",
            "data": "0xa9059cbb",
            "gas": "0x5208",
        }))
        .unwrap()
        .unwrap();
        let InterceptedRequest::SendTransaction { request, original } = parsed else {
            panic!("wrong variant");
        };
        assert_eq!(request.gas, Some(21_000));
        assert_eq!(request.calldata(), Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]));
        assert!(original.contains("0xa9059cbb"));
    }

    #[test]
    fn test_cross_field_rules() {
        let both_fees = send(json!({"from": ALICE, "gasPrice": "0x1", "maxFeePerGas": "0x2"}));
        assert!(matches!(both_fees, Err(RequestError::InvalidParams(_))));

        let lone_priority = send(json!({"from": ALICE, "maxPriorityFeePerGas": "0x1"}));
        assert!(matches!(lone_priority, Err(RequestError::InvalidParams(_))));

        let disagree = send(json!({"from": ALICE, "data": "0x01", "input": "0x02"}));
        assert!(matches!(disagree, Err(RequestError::InvalidParams(_))));

        let agree = send(json!({"from": ALICE, "data": "0x01", "input": "0x01"}));
        assert!(agree.is_ok());

        let missing_from = send(json!({"to": ALICE}));
        assert!(missing_from.is_err());

        let wrong_type = send(json!({"from": ALICE, "type": "0x2", "gasPrice": "0x1"}));
        assert!(wrong_type.is_err());

        let blob_create = send(json!({"from": ALICE, "type": "0x3"}));
        assert!(blob_create.is_err());
    }

    #[test]
    fn test_strict_encodings() {
        assert!(send(json!({"from": ALICE, "value": "100"})).is_err());
        assert!(send(json!({"from": ALICE, "data": "0x123"})).is_err());
        assert!(send(json!({"from": "0x1234"})).is_err());
        assert!(send(json!({"from": ALICE, "unexpected": true})).is_err());
    }

    #[test]
    fn test_personal_sign_both_orders() {
        let normal = parse_intercepted("personal_sign", &json!(["0x68656c6c6f", ALICE]))
            .unwrap()
            .unwrap();
        let swapped = parse_intercepted("personal_sign", &json!([ALICE, "0x68656c6c6f"]))
            .unwrap()
            .unwrap();
        assert_eq!(normal, swapped);
        let InterceptedRequest::PersonalSign { message, .. } = normal else {
            panic!("wrong variant");
        };
        assert_eq!(message.as_ref(), b"hello");
    }

    #[test]
    fn test_personal_sign_utf8_message() {
        let parsed = parse_intercepted("personal_sign", &json!(["Sign in to example.org", ALICE]))
            .unwrap()
            .unwrap();
        assert!(matches!(
            parsed,
            InterceptedRequest::PersonalSign { ref message, .. } if message.as_ref() == b"Sign in to example.org"
        ));
    }

    #[test]
    fn test_typed_data_string_payload() {
        let payload = json!({
            "types": {
                "EIP712Domain": [{"name": "name", "type": "string"}, {"name": "chainId", "type": "uint256"}],
                "Ping": [{"name": "n", "type": "uint8"}]
            },
            "primaryType": "Ping",
            "domain": {"name": "x", "chainId": 1},
            "message": {"n": 3}
        });
        let parsed = parse_intercepted("eth_signTypedData_v4", &json!([ALICE, payload.to_string()]))
            .unwrap()
            .unwrap();
        let InterceptedRequest::SignTypedData { typed_data, version, .. } = parsed else {
            panic!("wrong variant");
        };
        assert_eq!(version, TypedDataVersion::V4);
        assert_eq!(typed_data.domain_chain_id(), Some(U256::from(1)));
    }

    #[test]
    fn test_typed_data_errors_carry_breadcrumb() {
        let payload = json!({
            "types": {"EIP712Domain": [], "Ping": [{"name": "n", "type": "uint8"}]},
            "primaryType": "Ping",
            "domain": {},
            "message": {"n": 300}
        });
        let err = parse_intercepted("eth_signTypedData_v4", &json!([ALICE, payload])).unwrap_err();
        let RequestError::TypedData(inner) = err else {
            panic!("wrong error");
        };
        assert!(inner.path.contains("n"));
    }

    #[test]
    fn test_typed_data_v1() {
        let parsed = parse_intercepted(
            "eth_signTypedData",
            &json!([[{"type": "string", "name": "greeting", "value": "hi"}], ALICE]),
        )
        .unwrap()
        .unwrap();
        assert!(matches!(parsed, InterceptedRequest::SignTypedDataV1 { ref fields, .. } if fields.len() == 1));

        let extra_key = parse_intercepted(
            "eth_signTypedData_v1",
            &json!([[{"type": "string", "name": "g", "value": "hi", "x": 1}], ALICE]),
        );
        assert!(extra_key.is_err());
    }

    #[test]
    fn test_raw_transaction_recovers_sender() {
        let raw = "0xf86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83";
        let parsed = parse_intercepted("eth_sendRawTransaction", &json!([raw]))
            .unwrap()
            .unwrap();
        assert_eq!(
            parsed.account(),
            "0x9d8A62f656a8d1615C1294fd71e9CFb3E4855A4F".parse::<Address>().unwrap()
        );
        assert!(parsed.is_transaction());
    }

    #[test]
    fn test_passthrough_methods() {
        assert_eq!(parse_intercepted("eth_blockNumber", &json!([])).unwrap(), None);
    }
}
