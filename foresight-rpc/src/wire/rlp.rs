//! Recursive-length-prefix items.
//!
//! Headers are read and written with `alloy_rlp::Header`; the item tree itself
//! is our own so transactions can be assembled field by field and decoded
//! without a derive per envelope.

use alloy_primitives::{Address, B256, U256};
use alloy_rlp::Header;

use super::WireError;

/// Transactions nest at most four levels deep (envelope, access list, entry,
/// storage keys). Anything deeper than this is hostile.
const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpItem {
    Bytes(Vec<u8>),
    List(Vec<RlpItem>),
}

impl RlpItem {
    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        RlpItem::Bytes(value.into())
    }

    /// Big-endian with leading zero bytes stripped; zero is the empty string.
    pub fn uint(value: U256) -> Self {
        let be = value.to_be_bytes::<32>();
        let first = be.iter().position(|b| *b != 0).unwrap_or(be.len());
        RlpItem::Bytes(be[first..].to_vec())
    }

    pub fn u64(value: u64) -> Self {
        Self::uint(U256::from(value))
    }

    /// Contract creation encodes `to` as the empty string.
    pub fn optional_address(value: Option<Address>) -> Self {
        match value {
            Some(address) => RlpItem::Bytes(address.to_vec()),
            None => RlpItem::Bytes(Vec::new()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            RlpItem::Bytes(bytes) if bytes.len() == 1 && bytes[0] < 0x80 => out.push(bytes[0]),
            RlpItem::Bytes(bytes) => {
                Header {
                    list: false,
                    payload_length: bytes.len(),
                }
                .encode(out);
                out.extend_from_slice(bytes);
            }
            RlpItem::List(items) => {
                let mut payload = Vec::new();
                for item in items {
                    item.encode_into(&mut payload);
                }
                Header {
                    list: true,
                    payload_length: payload.len(),
                }
                .encode(out);
                out.extend_from_slice(&payload);
            }
        }
    }

    /// Decode exactly one item spanning the whole input.
    pub fn decode(input: &[u8]) -> Result<Self, WireError> {
        let mut buf = input;
        let item = Self::decode_one(&mut buf, 0)?;
        if !buf.is_empty() {
            return Err(WireError::Rlp(format!("{} trailing bytes", buf.len())));
        }
        Ok(item)
    }

    fn decode_one(buf: &mut &[u8], depth: usize) -> Result<Self, WireError> {
        if depth > MAX_DEPTH {
            return Err(WireError::Rlp("nesting too deep".into()));
        }
        let first = *buf
            .first()
            .ok_or_else(|| WireError::Rlp("unexpected end of input".into()))?;

        let header = Header::decode(buf).map_err(|e| WireError::Rlp(e.to_string()))?;
        if buf.len() < header.payload_length {
            return Err(WireError::Rlp(format!(
                "truncated: need {} bytes, have {}",
                header.payload_length,
                buf.len()
            )));
        }
        let (payload, rest) = buf.split_at(header.payload_length);
        *buf = rest;

        // A lone byte below 0x80 must be encoded as itself.
        if !header.list && first == 0x81 && payload.first().is_some_and(|b| *b < 0x80) {
            return Err(WireError::Rlp("non-canonical single byte".into()));
        }

        if header.list {
            let mut inner = payload;
            let mut items = Vec::new();
            while !inner.is_empty() {
                items.push(Self::decode_one(&mut inner, depth + 1)?);
            }
            Ok(RlpItem::List(items))
        } else {
            Ok(RlpItem::Bytes(payload.to_vec()))
        }
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn as_bytes(&self) -> Result<&[u8], WireError> {
        match self {
            RlpItem::Bytes(bytes) => Ok(bytes),
            RlpItem::List(_) => Err(WireError::Rlp("expected bytes, found list".into())),
        }
    }

    pub fn as_list(&self) -> Result<&[RlpItem], WireError> {
        match self {
            RlpItem::List(items) => Ok(items),
            RlpItem::Bytes(_) => Err(WireError::Rlp("expected list, found bytes".into())),
        }
    }

    /// Unsigned integer of at most `bits` bits, canonically encoded.
    pub fn as_uint(&self, bits: usize) -> Result<U256, WireError> {
        let bytes = self.as_bytes()?;
        if bytes.first() == Some(&0) {
            return Err(WireError::Rlp("integer with leading zero byte".into()));
        }
        if bytes.len() > 32 {
            return Err(WireError::out_of_range("integer", &::hex::encode(bytes), bits));
        }
        let value = U256::from_be_slice(bytes);
        if bits < 256 && value.bit_len() > bits {
            return Err(WireError::out_of_range("integer", &::hex::encode(bytes), bits));
        }
        Ok(value)
    }

    pub fn as_u64(&self) -> Result<u64, WireError> {
        Ok(self.as_uint(64)?.to::<u64>())
    }

    pub fn as_address(&self) -> Result<Address, WireError> {
        let bytes = self.as_bytes()?;
        if bytes.len() != 20 {
            return Err(WireError::Rlp(format!("address of {} bytes", bytes.len())));
        }
        Ok(Address::from_slice(bytes))
    }

    pub fn as_optional_address(&self) -> Result<Option<Address>, WireError> {
        if self.as_bytes()?.is_empty() {
            return Ok(None);
        }
        self.as_address().map(Some)
    }

    pub fn as_b256(&self) -> Result<B256, WireError> {
        let bytes = self.as_bytes()?;
        if bytes.len() != 32 {
            return Err(WireError::Rlp(format!("hash of {} bytes", bytes.len())));
        }
        Ok(B256::from_slice(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_values() {
        assert_eq!(RlpItem::bytes(b"dog".to_vec()).encode(), vec![0x83, b'd', b'o', b'g']);
        assert_eq!(RlpItem::uint(U256::ZERO).encode(), vec![0x80]);
        assert_eq!(RlpItem::u64(15).encode(), vec![0x0f]);
        assert_eq!(RlpItem::u64(1024).encode(), vec![0x82, 0x04, 0x00]);
        assert_eq!(RlpItem::List(vec![]).encode(), vec![0xc0]);

        let cat_dog = RlpItem::List(vec![
            RlpItem::bytes(b"cat".to_vec()),
            RlpItem::bytes(b"dog".to_vec()),
        ]);
        assert_eq!(
            cat_dog.encode(),
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
        assert_eq!(RlpItem::decode(&cat_dog.encode()).unwrap(), cat_dog);
    }

    #[test]
    fn test_long_string_header() {
        let payload = vec![0xaa; 60];
        let encoded = RlpItem::bytes(payload.clone()).encode();
        assert_eq!(&encoded[..2], &[0xb8, 60]);
        assert_eq!(RlpItem::decode(&encoded).unwrap(), RlpItem::Bytes(payload));
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        // trailing byte
        assert!(RlpItem::decode(&[0x83, b'd', b'o', b'g', 0x00]).is_err());
        // truncated
        assert!(RlpItem::decode(&[0x83, b'd', b'o']).is_err());
        // single byte that should have been encoded as itself
        assert!(RlpItem::decode(&[0x81, 0x05]).is_err());
        assert!(RlpItem::decode(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_deep_nesting() {
        let mut item = RlpItem::List(vec![]);
        for _ in 0..40 {
            item = RlpItem::List(vec![item]);
        }
        assert!(RlpItem::decode(&item.encode()).is_err());
    }

    #[test]
    fn test_uint_accessor_is_canonical() {
        assert_eq!(RlpItem::bytes(vec![0x04, 0x00]).as_uint(256).unwrap(), U256::from(1024));
        assert!(RlpItem::bytes(vec![0x00, 0x01]).as_uint(256).is_err());
        assert!(RlpItem::bytes(vec![0x01; 9]).as_u64().is_err());
        assert_eq!(RlpItem::bytes(vec![]).as_u64().unwrap(), 0);
    }

    #[test]
    fn test_optional_address() {
        assert_eq!(RlpItem::optional_address(None).as_optional_address().unwrap(), None);
        let addr = Address::repeat_byte(0x35);
        assert_eq!(
            RlpItem::optional_address(Some(addr)).as_optional_address().unwrap(),
            Some(addr)
        );
        assert!(RlpItem::bytes(vec![1, 2, 3]).as_optional_address().is_err());
    }
}
