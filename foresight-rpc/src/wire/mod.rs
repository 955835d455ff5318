//! Wire codec: hex wire values, RLP and the Ethereum transaction envelopes.
//!
//! Everything that crosses the JSON-RPC boundary as a string, or the network
//! boundary as bytes, goes through this module. Parsing is strict: digit counts
//! are checked against the declared width, and numbers against their bit width.

pub mod hex;
pub mod rlp;
pub mod transaction;

pub use self::hex::{
    format_data, format_quantity, format_u64, parse_address, parse_bytes32, parse_data,
    parse_quantity, parse_quantity_bits, parse_u64_quantity,
};
pub use self::rlp::RlpItem;
pub use self::transaction::{
    AccessListItem, DepositTransaction, Eip1559Transaction, Eip2930Transaction,
    Eip4844Transaction, LegacyTransaction, SignedTransaction, TxSignature, UnsignedTransaction,
};

/// Longest slice of attacker-supplied input echoed back in an error message.
const ERROR_SNIPPET_LEN: usize = 80;

/// Errors produced while parsing or serializing wire values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The value is not shaped like the wire type it claims to be
    /// (missing prefix, wrong digit count, non-hex characters, ...).
    #[error("malformed {kind} {value:?}: {detail}")]
    MalformedWireValue {
        kind: &'static str,
        value: String,
        detail: String,
    },

    /// The value parsed but does not fit the declared bit width.
    #[error("{kind} {value} does not fit in {bits} bits")]
    OutOfRange {
        kind: &'static str,
        value: String,
        bits: usize,
    },

    /// Structurally invalid RLP.
    #[error("invalid RLP: {0}")]
    Rlp(String),

    /// The transaction type cannot take part in the requested operation.
    #[error("unsupported transaction: {0}")]
    Unsupported(String),

    /// Signature values inconsistent with the transaction they belong to.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

impl WireError {
    pub(crate) fn malformed(kind: &'static str, value: &str, detail: impl Into<String>) -> Self {
        WireError::MalformedWireValue {
            kind,
            value: snippet(value),
            detail: detail.into(),
        }
    }

    pub(crate) fn out_of_range(kind: &'static str, value: &str, bits: usize) -> Self {
        WireError::OutOfRange {
            kind,
            value: snippet(value),
            bits,
        }
    }
}

fn snippet(value: &str) -> String {
    if value.len() <= ERROR_SNIPPET_LEN {
        return value.to_string();
    }
    let mut end = ERROR_SNIPPET_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &value[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_snippet_truncates_hostile_input() {
        let long = "z".repeat(10_000);
        let err = WireError::malformed("address", &long, "bad");
        let message = err.to_string();
        assert!(message.len() < 200);
        assert!(message.contains('…'));
    }
}
