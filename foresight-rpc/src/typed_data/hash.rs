//! EIP-712 hashing over a validated type tree.

use std::collections::BTreeSet;

use alloy_primitives::{keccak256, B256};

use super::grammar::FieldType;
use super::validate::{TypeTree, TypedValue};
use super::InvalidTypedData;

/// `Name(type1 name1,...)` followed by every referenced struct, sorted.
pub fn encode_type(tree: &TypeTree, primary: &str) -> String {
    let mut deps = BTreeSet::new();
    collect_dependencies(tree, primary, &mut deps);
    deps.remove(primary);

    let mut out = encode_single(tree, primary);
    for dep in deps {
        out.push_str(&encode_single(tree, &dep));
    }
    out
}

fn encode_single(tree: &TypeTree, name: &str) -> String {
    let fields = tree
        .fields(name)
        .unwrap_or_default()
        .iter()
        .map(|f| format!("{} {}", f.ty, f.name))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}({fields})")
}

fn collect_dependencies(tree: &TypeTree, name: &str, deps: &mut BTreeSet<String>) {
    if !deps.insert(name.to_string()) {
        return;
    }
    for field in tree.fields(name).unwrap_or_default() {
        if let FieldType::Struct(dep) = field.ty.base() {
            collect_dependencies(tree, dep, deps);
        }
    }
}

pub fn type_hash(tree: &TypeTree, name: &str) -> B256 {
    keccak256(encode_type(tree, name))
}

/// `keccak(typeHash || encodeData(value))`.
pub fn hash_struct(tree: &TypeTree, value: &TypedValue) -> Result<B256, InvalidTypedData> {
    let TypedValue::Struct { name, fields } = value else {
        return Err(InvalidTypedData::new("$", "hash_struct on a non-struct value"));
    };
    let mut buf = Vec::with_capacity(32 * (fields.len() + 1));
    buf.extend_from_slice(type_hash(tree, name).as_slice());
    for (_, field) in fields {
        buf.extend_from_slice(encode_field(tree, field)?.as_slice());
    }
    Ok(keccak256(buf))
}

fn encode_field(tree: &TypeTree, value: &TypedValue) -> Result<B256, InvalidTypedData> {
    Ok(match value {
        TypedValue::Uint(v) => B256::from(v.to_be_bytes::<32>()),
        TypedValue::Int(v) => B256::from(v.into_raw().to_be_bytes::<32>()),
        TypedValue::Bool(b) => {
            let mut word = [0u8; 32];
            word[31] = *b as u8;
            B256::from(word)
        }
        TypedValue::Address(a) => a.into_word(),
        TypedValue::FixedBytes(bytes) => B256::right_padding_from(bytes),
        TypedValue::Bytes(bytes) => keccak256(bytes),
        TypedValue::String(s) => keccak256(s.as_bytes()),
        TypedValue::Struct { .. } => hash_struct(tree, value)?,
        TypedValue::Array(items) => {
            let mut buf = Vec::with_capacity(32 * items.len());
            for item in items {
                buf.extend_from_slice(encode_field(tree, item)?.as_slice());
            }
            keccak256(buf)
        }
    })
}

/// `keccak(0x1901 || domainSeparator || hashStruct(message))`; the message
/// part is omitted when the primary type is the domain itself.
pub fn signing_hash(domain_separator: B256, message_hash: Option<B256>) -> B256 {
    let mut buf = Vec::with_capacity(66);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(domain_separator.as_slice());
    if let Some(message_hash) = message_hash {
        buf.extend_from_slice(message_hash.as_slice());
    }
    keccak256(buf)
}
