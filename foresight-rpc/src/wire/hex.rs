//! Hex-encoded wire values.
//!
//! Quantities are `0x`-prefixed big-endian hex without leading zeros when we
//! produce them (`0x0` for zero). Addresses are exactly 40 hex digits, hashes
//! exactly 64, byte strings always even-length.

use alloy_primitives::{Address, Bytes, B256, U256};

use super::WireError;

/// A 256-bit quantity never needs more than 64 hex digits.
const MAX_QUANTITY_DIGITS: usize = 64;

fn strip_prefix<'a>(kind: &'static str, value: &'a str) -> Result<&'a str, WireError> {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| WireError::malformed(kind, value, "missing 0x prefix"))
}

fn check_hex_digits(kind: &'static str, value: &str, digits: &str) -> Result<(), WireError> {
    match digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        Some(c) => Err(WireError::malformed(kind, value, format!("invalid hex digit {c:?}"))),
        None => Ok(()),
    }
}

/// Parse a 256-bit quantity.
pub fn parse_quantity(value: &str) -> Result<U256, WireError> {
    parse_quantity_bits(value, 256)
}

/// Parse a quantity that must fit in `bits` bits.
pub fn parse_quantity_bits(value: &str, bits: usize) -> Result<U256, WireError> {
    let digits = strip_prefix("quantity", value)?;
    if digits.is_empty() {
        return Err(WireError::malformed("quantity", value, "no hex digits"));
    }
    check_hex_digits("quantity", value, digits)?;

    let significant = digits.trim_start_matches('0');
    if significant.len() > MAX_QUANTITY_DIGITS {
        return Err(WireError::out_of_range("quantity", value, bits));
    }
    if significant.is_empty() {
        return Ok(U256::ZERO);
    }
    let parsed = U256::from_str_radix(significant, 16)
        .map_err(|e| WireError::malformed("quantity", value, e.to_string()))?;
    if bits < 256 && parsed.bit_len() > bits {
        return Err(WireError::out_of_range("quantity", value, bits));
    }
    Ok(parsed)
}

/// Parse a quantity into a `u64`.
pub fn parse_u64_quantity(value: &str) -> Result<u64, WireError> {
    let parsed = parse_quantity_bits(value, 64)?;
    Ok(parsed.to::<u64>())
}

/// Parse a 20-byte address, exactly 40 hex digits.
pub fn parse_address(value: &str) -> Result<Address, WireError> {
    let bytes = parse_fixed_bytes("address", value, 20)?;
    Ok(Address::from_slice(&bytes))
}

/// Parse a 32-byte hash, exactly 64 hex digits.
pub fn parse_bytes32(value: &str) -> Result<B256, WireError> {
    let bytes = parse_fixed_bytes("bytes32", value, 32)?;
    Ok(B256::from_slice(&bytes))
}

/// Parse a hex string that must decode to exactly `len` bytes.
pub fn parse_fixed_bytes(kind: &'static str, value: &str, len: usize) -> Result<Vec<u8>, WireError> {
    let digits = strip_prefix(kind, value)?;
    if digits.len() != len * 2 {
        return Err(WireError::malformed(
            kind,
            value,
            format!("expected {} hex digits, got {}", len * 2, digits.len()),
        ));
    }
    check_hex_digits(kind, value, digits)?;
    ::hex::decode(digits).map_err(|e| WireError::malformed(kind, value, e.to_string()))
}

/// Parse an arbitrary even-length byte string.
pub fn parse_data(value: &str) -> Result<Bytes, WireError> {
    let digits = strip_prefix("data", value)?;
    if digits.len() % 2 != 0 {
        return Err(WireError::malformed("data", value, "odd number of hex digits"));
    }
    check_hex_digits("data", value, digits)?;
    ::hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| WireError::malformed("data", value, e.to_string()))
}

/// Format a quantity without leading zeros.
pub fn format_quantity(value: U256) -> String {
    format!("0x{value:x}")
}

pub fn format_u64(value: u64) -> String {
    format!("{value:#x}")
}

pub fn format_data(bytes: &[u8]) -> String {
    format!("0x{}", ::hex::encode(bytes))
}

/// Serde adapter for `u64` fields carried as hex quantities.
pub mod serde_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_u64(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_u64_quantity(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional `u64` quantities.
pub mod serde_opt_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&super::format_u64(*v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| super::parse_u64_quantity(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde adapter for optional 256-bit quantities. Unlike the `U256` serde
/// impl this rejects decimal strings and JSON numbers.
pub mod serde_opt_u256 {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&super::format_quantity(*v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<U256>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| super::parse_quantity(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde adapter for optional addresses with an exact digit count.
pub mod serde_opt_address {
    use alloy_primitives::Address;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Address>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_checksum(None)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Address>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| super::parse_address(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde adapter for optional even-length byte strings.
pub mod serde_opt_data {
    use alloy_primitives::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&super::format_data(v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Bytes>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| super::parse_data(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_optional_adapters() {
        #[derive(serde::Deserialize)]
        struct Sample {
            #[serde(default, with = "serde_opt_u256")]
            value: Option<U256>,
            #[serde(default, with = "serde_opt_address")]
            to: Option<Address>,
        }
        let ok: Sample = serde_json::from_str(r#"{"value":"0x10"}"#).unwrap();
        assert_eq!(ok.value, Some(U256::from(16)));
        assert_eq!(ok.to, None);
        assert!(serde_json::from_str::<Sample>(r#"{"value":"16"}"#).is_err());
        assert!(serde_json::from_str::<Sample>(r#"{"value":16}"#).is_err());
        assert!(serde_json::from_str::<Sample>(r#"{"to":"0x1234"}"#).is_err());
    }

    #[test]
    fn test_quantity_zero_and_leading_zeros() {
        assert_eq!(parse_quantity("0x0").unwrap(), U256::ZERO);
        assert_eq!(parse_quantity("0x000a").unwrap(), U256::from(10));
        assert_eq!(format_quantity(U256::ZERO), "0x0");
        assert_eq!(format_quantity(U256::from(255)), "0xff");
        assert_eq!(format_u64(0x1234), "0x1234");
    }

    #[test]
    fn test_quantity_rejects_malformed() {
        assert!(matches!(
            parse_quantity("0x"),
            Err(WireError::MalformedWireValue { .. })
        ));
        assert!(matches!(
            parse_quantity("1234"),
            Err(WireError::MalformedWireValue { .. })
        ));
        assert!(matches!(
            parse_quantity("0xzz"),
            Err(WireError::MalformedWireValue { .. })
        ));
    }

    #[test]
    fn test_quantity_bit_width() {
        assert_eq!(parse_quantity_bits("0xff", 8).unwrap(), U256::from(255));
        assert!(matches!(
            parse_quantity_bits("0x100", 8),
            Err(WireError::OutOfRange { bits: 8, .. })
        ));
        let too_wide = format!("0x1{}", "0".repeat(64));
        assert!(matches!(
            parse_quantity(&too_wide),
            Err(WireError::OutOfRange { .. })
        ));
        assert_eq!(parse_u64_quantity("0xffffffffffffffff").unwrap(), u64::MAX);
        assert!(parse_u64_quantity("0x10000000000000000").is_err());
    }

    #[test]
    fn test_address_requires_exactly_40_digits() {
        let ok = parse_address("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf").unwrap();
        assert_eq!(
            ok,
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf".parse::<Address>().unwrap()
        );
        assert!(matches!(
            parse_address("0x7e5f4552091a69125d5dfcb7b8c2659029395b"),
            Err(WireError::MalformedWireValue { kind: "address", .. })
        ));
        assert!(parse_address("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf00").is_err());
    }

    #[test]
    fn test_bytes32_and_data() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert_eq!(parse_bytes32(&hash).unwrap(), B256::repeat_byte(0xab));
        assert!(parse_bytes32("0xabab").is_err());

        assert_eq!(parse_data("0x").unwrap(), Bytes::new());
        assert_eq!(parse_data("0xdeadbeef").unwrap().to_vec(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(parse_data("0xabc").is_err());
        assert_eq!(format_data(&[0xde, 0xad]), "0xdead");
    }
}
