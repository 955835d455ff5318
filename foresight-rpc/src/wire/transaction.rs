//! Transaction envelopes: legacy (EIP-155), EIP-2930, EIP-1559, EIP-4844 and
//! the read-only rollup deposit type.
//!
//! Field orders follow the EIPs exactly. Hashing is always over our own
//! serialization so a decoded transaction re-hashes to the same value.

use alloy_primitives::{keccak256, Address, Bytes, Parity, Signature, B256, U256};
use serde::{Deserialize, Serialize};

use super::rlp::RlpItem;
use super::WireError;

pub const EIP2930_TX_TYPE: u8 = 0x01;
pub const EIP1559_TX_TYPE: u8 = 0x02;
pub const EIP4844_TX_TYPE: u8 = 0x03;
pub const DEPOSIT_TX_TYPE: u8 = 0x7e;
pub const LEGACY_TX_TYPE: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<B256>,
}

fn access_list_to_rlp(list: &[AccessListItem]) -> RlpItem {
    RlpItem::List(
        list.iter()
            .map(|entry| {
                RlpItem::List(vec![
                    RlpItem::bytes(entry.address.to_vec()),
                    RlpItem::List(
                        entry
                            .storage_keys
                            .iter()
                            .map(|key| RlpItem::bytes(key.to_vec()))
                            .collect(),
                    ),
                ])
            })
            .collect(),
    )
}

fn access_list_from_rlp(item: &RlpItem) -> Result<Vec<AccessListItem>, WireError> {
    item.as_list()?
        .iter()
        .map(|entry| {
            let fields = entry.as_list()?;
            let [address, keys] = fields else {
                return Err(WireError::Rlp(format!(
                    "access list entry with {} fields",
                    fields.len()
                )));
            };
            Ok(AccessListItem {
                address: address.as_address()?,
                storage_keys: keys
                    .as_list()?
                    .iter()
                    .map(RlpItem::as_b256)
                    .collect::<Result<_, _>>()?,
            })
        })
        .collect()
}

// ── Envelopes ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    /// `None` signs without replay protection (pre-EIP-155).
    pub chain_id: Option<u64>,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip2930Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub access_list: Vec<AccessListItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub access_list: Vec<AccessListItem>,
}

/// Blob transactions cannot create contracts, so `to` is mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip4844Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
    pub access_list: Vec<AccessListItem>,
    pub max_fee_per_blob_gas: U256,
    pub blob_versioned_hashes: Vec<B256>,
}

/// Rollup deposit as reported by the node. Never signed or serialized by us;
/// the hash is the one the node gave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositTransaction {
    pub hash: B256,
    pub source_hash: B256,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub mint: Option<U256>,
    pub value: U256,
    #[serde(rename = "gas", with = "super::hex::serde_u64")]
    pub gas_limit: u64,
    #[serde(default)]
    pub is_system_tx: bool,
    pub input: Bytes,
}

impl DepositTransaction {
    /// Parse a deposit from `eth_getTransactionByHash`-shaped JSON.
    pub fn from_rpc_json(value: &serde_json::Value) -> Result<Self, WireError> {
        let tx_type = value.get("type").and_then(|t| t.as_str()).unwrap_or_default();
        if super::hex::parse_u64_quantity(tx_type)? != DEPOSIT_TX_TYPE as u64 {
            return Err(WireError::Unsupported(format!(
                "expected deposit type 0x7e, got {tx_type}"
            )));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| WireError::malformed("deposit transaction", tx_type, e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsignedTransaction {
    Legacy(LegacyTransaction),
    Eip2930(Eip2930Transaction),
    Eip1559(Eip1559Transaction),
    Eip4844(Eip4844Transaction),
    Deposit(DepositTransaction),
}

impl UnsignedTransaction {
    pub fn tx_type(&self) -> u8 {
        match self {
            UnsignedTransaction::Legacy(_) => LEGACY_TX_TYPE,
            UnsignedTransaction::Eip2930(_) => EIP2930_TX_TYPE,
            UnsignedTransaction::Eip1559(_) => EIP1559_TX_TYPE,
            UnsignedTransaction::Eip4844(_) => EIP4844_TX_TYPE,
            UnsignedTransaction::Deposit(_) => DEPOSIT_TX_TYPE,
        }
    }

    /// Deposits have no sender nonce.
    pub fn nonce(&self) -> Option<u64> {
        match self {
            UnsignedTransaction::Legacy(tx) => Some(tx.nonce),
            UnsignedTransaction::Eip2930(tx) => Some(tx.nonce),
            UnsignedTransaction::Eip1559(tx) => Some(tx.nonce),
            UnsignedTransaction::Eip4844(tx) => Some(tx.nonce),
            UnsignedTransaction::Deposit(_) => None,
        }
    }

    pub fn set_nonce(&mut self, nonce: u64) {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.nonce = nonce,
            UnsignedTransaction::Eip2930(tx) => tx.nonce = nonce,
            UnsignedTransaction::Eip1559(tx) => tx.nonce = nonce,
            UnsignedTransaction::Eip4844(tx) => tx.nonce = nonce,
            UnsignedTransaction::Deposit(_) => {}
        }
    }

    pub fn chain_id(&self) -> Option<u64> {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.chain_id,
            UnsignedTransaction::Eip2930(tx) => Some(tx.chain_id),
            UnsignedTransaction::Eip1559(tx) => Some(tx.chain_id),
            UnsignedTransaction::Eip4844(tx) => Some(tx.chain_id),
            UnsignedTransaction::Deposit(_) => None,
        }
    }

    pub fn to(&self) -> Option<Address> {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.to,
            UnsignedTransaction::Eip2930(tx) => tx.to,
            UnsignedTransaction::Eip1559(tx) => tx.to,
            UnsignedTransaction::Eip4844(tx) => Some(tx.to),
            UnsignedTransaction::Deposit(tx) => tx.to,
        }
    }

    pub fn value(&self) -> U256 {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.value,
            UnsignedTransaction::Eip2930(tx) => tx.value,
            UnsignedTransaction::Eip1559(tx) => tx.value,
            UnsignedTransaction::Eip4844(tx) => tx.value,
            UnsignedTransaction::Deposit(tx) => tx.value,
        }
    }

    pub fn input(&self) -> &Bytes {
        match self {
            UnsignedTransaction::Legacy(tx) => &tx.input,
            UnsignedTransaction::Eip2930(tx) => &tx.input,
            UnsignedTransaction::Eip1559(tx) => &tx.input,
            UnsignedTransaction::Eip4844(tx) => &tx.input,
            UnsignedTransaction::Deposit(tx) => &tx.input,
        }
    }

    pub fn gas_limit(&self) -> u64 {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.gas_limit,
            UnsignedTransaction::Eip2930(tx) => tx.gas_limit,
            UnsignedTransaction::Eip1559(tx) => tx.gas_limit,
            UnsignedTransaction::Eip4844(tx) => tx.gas_limit,
            UnsignedTransaction::Deposit(tx) => tx.gas_limit,
        }
    }

    pub fn set_gas_limit(&mut self, gas_limit: u64) {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.gas_limit = gas_limit,
            UnsignedTransaction::Eip2930(tx) => tx.gas_limit = gas_limit,
            UnsignedTransaction::Eip1559(tx) => tx.gas_limit = gas_limit,
            UnsignedTransaction::Eip4844(tx) => tx.gas_limit = gas_limit,
            UnsignedTransaction::Deposit(tx) => tx.gas_limit = gas_limit,
        }
    }

    /// Gas price for legacy/2930, fee cap for fee-market types.
    pub fn max_fee_per_gas(&self) -> U256 {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.gas_price,
            UnsignedTransaction::Eip2930(tx) => tx.gas_price,
            UnsignedTransaction::Eip1559(tx) => tx.max_fee_per_gas,
            UnsignedTransaction::Eip4844(tx) => tx.max_fee_per_gas,
            UnsignedTransaction::Deposit(_) => U256::ZERO,
        }
    }

    /// Sets the gas price (legacy/2930) or the fee cap (fee-market types).
    pub fn set_max_fee_per_gas(&mut self, fee: U256) {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.gas_price = fee,
            UnsignedTransaction::Eip2930(tx) => tx.gas_price = fee,
            UnsignedTransaction::Eip1559(tx) => tx.max_fee_per_gas = fee,
            UnsignedTransaction::Eip4844(tx) => tx.max_fee_per_gas = fee,
            UnsignedTransaction::Deposit(_) => {}
        }
    }

    pub fn access_list(&self) -> Option<&[AccessListItem]> {
        match self {
            UnsignedTransaction::Eip2930(tx) => Some(&tx.access_list),
            UnsignedTransaction::Eip1559(tx) => Some(&tx.access_list),
            UnsignedTransaction::Eip4844(tx) => Some(&tx.access_list),
            UnsignedTransaction::Legacy(_) | UnsignedTransaction::Deposit(_) => None,
        }
    }

    pub fn max_priority_fee_per_gas(&self) -> Option<U256> {
        match self {
            UnsignedTransaction::Eip1559(tx) => Some(tx.max_priority_fee_per_gas),
            UnsignedTransaction::Eip4844(tx) => Some(tx.max_priority_fee_per_gas),
            UnsignedTransaction::Legacy(_)
            | UnsignedTransaction::Eip2930(_)
            | UnsignedTransaction::Deposit(_) => None,
        }
    }

    pub fn is_fee_market(&self) -> bool {
        self.max_priority_fee_per_gas().is_some()
    }

    /// Price actually paid per gas given the block base fee.
    pub fn effective_gas_price(&self, base_fee: Option<U256>) -> U256 {
        match (self.max_priority_fee_per_gas(), base_fee) {
            (Some(priority), Some(base)) => {
                let cap = self.max_fee_per_gas();
                cap.min(base.saturating_add(priority))
            }
            _ => self.max_fee_per_gas(),
        }
    }

    fn unsigned_fields(&self) -> Result<Vec<RlpItem>, WireError> {
        let fields = match self {
            UnsignedTransaction::Legacy(tx) => {
                let mut fields = vec![
                    RlpItem::u64(tx.nonce),
                    RlpItem::uint(tx.gas_price),
                    RlpItem::u64(tx.gas_limit),
                    RlpItem::optional_address(tx.to),
                    RlpItem::uint(tx.value),
                    RlpItem::bytes(tx.input.to_vec()),
                ];
                if let Some(chain_id) = tx.chain_id {
                    fields.extend([RlpItem::u64(chain_id), RlpItem::u64(0), RlpItem::u64(0)]);
                }
                fields
            }
            UnsignedTransaction::Eip2930(tx) => vec![
                RlpItem::u64(tx.chain_id),
                RlpItem::u64(tx.nonce),
                RlpItem::uint(tx.gas_price),
                RlpItem::u64(tx.gas_limit),
                RlpItem::optional_address(tx.to),
                RlpItem::uint(tx.value),
                RlpItem::bytes(tx.input.to_vec()),
                access_list_to_rlp(&tx.access_list),
            ],
            UnsignedTransaction::Eip1559(tx) => vec![
                RlpItem::u64(tx.chain_id),
                RlpItem::u64(tx.nonce),
                RlpItem::uint(tx.max_priority_fee_per_gas),
                RlpItem::uint(tx.max_fee_per_gas),
                RlpItem::u64(tx.gas_limit),
                RlpItem::optional_address(tx.to),
                RlpItem::uint(tx.value),
                RlpItem::bytes(tx.input.to_vec()),
                access_list_to_rlp(&tx.access_list),
            ],
            UnsignedTransaction::Eip4844(tx) => vec![
                RlpItem::u64(tx.chain_id),
                RlpItem::u64(tx.nonce),
                RlpItem::uint(tx.max_priority_fee_per_gas),
                RlpItem::uint(tx.max_fee_per_gas),
                RlpItem::u64(tx.gas_limit),
                RlpItem::bytes(tx.to.to_vec()),
                RlpItem::uint(tx.value),
                RlpItem::bytes(tx.input.to_vec()),
                access_list_to_rlp(&tx.access_list),
                RlpItem::uint(tx.max_fee_per_blob_gas),
                RlpItem::List(
                    tx.blob_versioned_hashes
                        .iter()
                        .map(|h| RlpItem::bytes(h.to_vec()))
                        .collect(),
                ),
            ],
            UnsignedTransaction::Deposit(_) => {
                return Err(WireError::Unsupported(
                    "deposit transactions cannot be serialized".into(),
                ))
            }
        };
        Ok(fields)
    }

    /// Typed envelopes are `type || rlp(fields)`; legacy is bare `rlp(fields)`.
    fn envelope(&self, fields: Vec<RlpItem>) -> Vec<u8> {
        let body = RlpItem::List(fields).encode();
        match self {
            UnsignedTransaction::Legacy(_) => body,
            _ => {
                let mut out = Vec::with_capacity(body.len() + 1);
                out.push(self.tx_type());
                out.extend_from_slice(&body);
                out
            }
        }
    }

    pub fn serialize_unsigned(&self) -> Result<Vec<u8>, WireError> {
        let fields = self.unsigned_fields()?;
        Ok(self.envelope(fields))
    }

    pub fn signing_hash(&self) -> Result<B256, WireError> {
        Ok(keccak256(self.serialize_unsigned()?))
    }
}

// ── Signatures ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxSignature {
    /// Legacy `v` exactly as it appears on the wire.
    Legacy { v: u64, r: U256, s: U256 },
    YParity { y_parity: bool, r: U256, s: U256 },
}

impl TxSignature {
    pub fn r(&self) -> U256 {
        match self {
            TxSignature::Legacy { r, .. } | TxSignature::YParity { r, .. } => *r,
        }
    }

    pub fn s(&self) -> U256 {
        match self {
            TxSignature::Legacy { s, .. } | TxSignature::YParity { s, .. } => *s,
        }
    }

    /// `y_parity + 35 + 2 * chain_id`, or `27 + y_parity` without a chain id.
    pub fn legacy_v(y_parity: bool, chain_id: Option<u64>) -> Result<u64, WireError> {
        match chain_id {
            Some(id) => id
                .checked_mul(2)
                .and_then(|v| v.checked_add(35 + y_parity as u64))
                .ok_or_else(|| WireError::InvalidSignature(format!("chain id {id} overflows v"))),
            None => Ok(27 + y_parity as u64),
        }
    }

    /// Recover the y parity, checking a legacy `v` against the chain id.
    pub fn y_parity(&self, chain_id: Option<u64>, legacy: bool) -> Result<bool, WireError> {
        match *self {
            TxSignature::YParity { y_parity, .. } => Ok(y_parity),
            TxSignature::Legacy { v, .. } if legacy => {
                for parity in [false, true] {
                    if Self::legacy_v(parity, chain_id)? == v {
                        return Ok(parity);
                    }
                }
                Err(WireError::InvalidSignature(format!(
                    "v {v} does not match chain id {chain_id:?}"
                )))
            }
            TxSignature::Legacy { v, .. } => match v {
                0 | 27 => Ok(false),
                1 | 28 => Ok(true),
                _ => Err(WireError::InvalidSignature(format!(
                    "v {v} is not a y parity"
                ))),
            },
        }
    }
}

/// Chain id implied by a legacy `v`.
fn chain_id_from_v(v: u64) -> Result<Option<u64>, WireError> {
    match v {
        27 | 28 => Ok(None),
        v if v >= 35 => Ok(Some((v - 35) / 2)),
        v => Err(WireError::InvalidSignature(format!("legacy v {v}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: UnsignedTransaction,
    pub signature: TxSignature,
}

impl SignedTransaction {
    pub fn new(transaction: UnsignedTransaction, signature: TxSignature) -> Self {
        Self {
            transaction,
            signature,
        }
    }

    pub fn y_parity(&self) -> Result<bool, WireError> {
        let legacy = matches!(self.transaction, UnsignedTransaction::Legacy(_));
        self.signature
            .y_parity(self.transaction.chain_id(), legacy)
    }

    fn signature_fields(&self) -> Result<[RlpItem; 3], WireError> {
        let y_parity = self.y_parity()?;
        let first = match self.transaction {
            UnsignedTransaction::Legacy(ref tx) => {
                RlpItem::u64(TxSignature::legacy_v(y_parity, tx.chain_id)?)
            }
            _ => RlpItem::u64(y_parity as u64),
        };
        Ok([
            first,
            RlpItem::uint(self.signature.r()),
            RlpItem::uint(self.signature.s()),
        ])
    }

    pub fn serialize_signed(&self) -> Result<Vec<u8>, WireError> {
        let mut fields = match &self.transaction {
            // EIP-155 replaces the trailing [chain_id, 0, 0] with [v, r, s].
            UnsignedTransaction::Legacy(tx) => {
                let mut fields = UnsignedTransaction::Legacy(LegacyTransaction {
                    chain_id: None,
                    ..tx.clone()
                })
                .unsigned_fields()?;
                fields.truncate(6);
                fields
            }
            other => other.unsigned_fields()?,
        };
        fields.extend(self.signature_fields()?);
        Ok(self.transaction.envelope(fields))
    }

    /// Deposits report the node's hash; everything else hashes its own bytes.
    pub fn hash(&self) -> Result<B256, WireError> {
        match &self.transaction {
            UnsignedTransaction::Deposit(tx) => Ok(tx.hash),
            _ => Ok(keccak256(self.serialize_signed()?)),
        }
    }

    pub fn recover_sender(&self) -> Result<Address, WireError> {
        let y_parity = self.y_parity()?;
        let prehash = self.transaction.signing_hash()?;
        let signature = Signature::new(
            self.signature.r(),
            self.signature.s(),
            Parity::Parity(y_parity),
        );
        signature
            .recover_address_from_prehash(&prehash)
            .map_err(|e| WireError::InvalidSignature(e.to_string()))
    }

    /// Decode a signed transaction from its network encoding.
    pub fn decode_signed(bytes: &[u8]) -> Result<Self, WireError> {
        let first = *bytes
            .first()
            .ok_or_else(|| WireError::Rlp("empty transaction".into()))?;
        if first >= 0xc0 {
            return Self::decode_legacy(bytes);
        }
        let body = RlpItem::decode(&bytes[1..])?;
        let fields = body.as_list()?;
        match first {
            EIP2930_TX_TYPE => {
                let [chain_id, nonce, gas_price, gas_limit, to, value, input, access_list, y, r, s] =
                    fields
                else {
                    return Err(field_count("EIP-2930", 11, fields.len()));
                };
                let transaction = UnsignedTransaction::Eip2930(Eip2930Transaction {
                    chain_id: chain_id.as_u64()?,
                    nonce: nonce.as_u64()?,
                    gas_price: gas_price.as_uint(256)?,
                    gas_limit: gas_limit.as_u64()?,
                    to: to.as_optional_address()?,
                    value: value.as_uint(256)?,
                    input: Bytes::copy_from_slice(input.as_bytes()?),
                    access_list: access_list_from_rlp(access_list)?,
                });
                Ok(Self::new(transaction, typed_signature(y, r, s)?))
            }
            EIP1559_TX_TYPE => {
                let [chain_id, nonce, priority, max_fee, gas_limit, to, value, input, access_list, y, r, s] =
                    fields
                else {
                    return Err(field_count("EIP-1559", 12, fields.len()));
                };
                let transaction = UnsignedTransaction::Eip1559(Eip1559Transaction {
                    chain_id: chain_id.as_u64()?,
                    nonce: nonce.as_u64()?,
                    max_priority_fee_per_gas: priority.as_uint(256)?,
                    max_fee_per_gas: max_fee.as_uint(256)?,
                    gas_limit: gas_limit.as_u64()?,
                    to: to.as_optional_address()?,
                    value: value.as_uint(256)?,
                    input: Bytes::copy_from_slice(input.as_bytes()?),
                    access_list: access_list_from_rlp(access_list)?,
                });
                Ok(Self::new(transaction, typed_signature(y, r, s)?))
            }
            EIP4844_TX_TYPE => {
                let [chain_id, nonce, priority, max_fee, gas_limit, to, value, input, access_list, blob_fee, hashes, y, r, s] =
                    fields
                else {
                    return Err(field_count("EIP-4844", 14, fields.len()));
                };
                let transaction = UnsignedTransaction::Eip4844(Eip4844Transaction {
                    chain_id: chain_id.as_u64()?,
                    nonce: nonce.as_u64()?,
                    max_priority_fee_per_gas: priority.as_uint(256)?,
                    max_fee_per_gas: max_fee.as_uint(256)?,
                    gas_limit: gas_limit.as_u64()?,
                    to: to.as_address()?,
                    value: value.as_uint(256)?,
                    input: Bytes::copy_from_slice(input.as_bytes()?),
                    access_list: access_list_from_rlp(access_list)?,
                    max_fee_per_blob_gas: blob_fee.as_uint(256)?,
                    blob_versioned_hashes: hashes
                        .as_list()?
                        .iter()
                        .map(RlpItem::as_b256)
                        .collect::<Result<_, _>>()?,
                });
                Ok(Self::new(transaction, typed_signature(y, r, s)?))
            }
            DEPOSIT_TX_TYPE => Err(WireError::Unsupported(
                "deposit transactions are read from RPC JSON, not raw bytes".into(),
            )),
            other => Err(WireError::Unsupported(format!(
                "unknown transaction type {other:#04x}"
            ))),
        }
    }

    fn decode_legacy(bytes: &[u8]) -> Result<Self, WireError> {
        let body = RlpItem::decode(bytes)?;
        let fields = body.as_list()?;
        let [nonce, gas_price, gas_limit, to, value, input, v, r, s] = fields else {
            return Err(field_count("legacy", 9, fields.len()));
        };
        let v = v.as_u64()?;
        let transaction = UnsignedTransaction::Legacy(LegacyTransaction {
            chain_id: chain_id_from_v(v)?,
            nonce: nonce.as_u64()?,
            gas_price: gas_price.as_uint(256)?,
            gas_limit: gas_limit.as_u64()?,
            to: to.as_optional_address()?,
            value: value.as_uint(256)?,
            input: Bytes::copy_from_slice(input.as_bytes()?),
        });
        let signature = TxSignature::Legacy {
            v,
            r: r.as_uint(256)?,
            s: s.as_uint(256)?,
        };
        Ok(Self::new(transaction, signature))
    }
}

fn typed_signature(y: &RlpItem, r: &RlpItem, s: &RlpItem) -> Result<TxSignature, WireError> {
    let y_parity = match y.as_u64()? {
        0 => false,
        1 => true,
        other => {
            return Err(WireError::InvalidSignature(format!(
                "y parity must be 0 or 1, got {other}"
            )))
        }
    };
    Ok(TxSignature::YParity {
        y_parity,
        r: r.as_uint(256)?,
        s: s.as_uint(256)?,
    })
}

fn field_count(kind: &str, expected: usize, got: usize) -> WireError {
    WireError::Rlp(format!("{kind} transaction has {got} fields, expected {expected}"))
}
