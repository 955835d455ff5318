//! Structural and value validation of EIP-712 payloads.
//!
//! Validation turns untrusted JSON into a [`TypeTree`] plus [`TypedValue`]s
//! that the hasher consumes directly. Every failure carries the field path
//! where it happened.

use std::collections::BTreeMap;

use alloy_primitives::{Address, I256, U256};
use serde_json::{Map, Value};

use super::grammar::{is_identifier, FieldType};
use super::InvalidTypedData;
use crate::wire;

/// Values nested deeper than this are rejected.
pub const MAX_DEPTH: usize = 32;

/// A decimal integer never needs more than 78 digits to reach 2^256.
const MAX_DECIMAL_DIGITS: usize = 78;

pub const DOMAIN_TYPE: &str = "EIP712Domain";

/// Canonical EIP712Domain fields, in canonical order.
pub const DOMAIN_FIELDS: [(&str, &str); 5] = [
    ("name", "string"),
    ("version", "string"),
    ("chainId", "uint256"),
    ("verifyingContract", "address"),
    ("salt", "bytes32"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedDataVersion {
    /// No arrays.
    V3,
    V4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedField {
    pub name: String,
    pub ty: FieldType,
}

/// Struct name to resolved field list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeTree {
    pub structs: BTreeMap<String, Vec<TypedField>>,
}

impl TypeTree {
    pub fn fields(&self, name: &str) -> Option<&[TypedField]> {
        self.structs.get(name).map(Vec::as_slice)
    }
}

/// A validated value, shaped by its [`FieldType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedValue {
    Uint(U256),
    Int(I256),
    Bool(bool),
    Address(Address),
    /// `bytesN` and `function`; length already checked.
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
    Struct {
        name: String,
        fields: Vec<(String, TypedValue)>,
    },
    Array(Vec<TypedValue>),
}

impl TypedValue {
    pub fn field(&self, name: &str) -> Option<&TypedValue> {
        match self {
            TypedValue::Struct { fields, .. } => {
                fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            TypedValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            TypedValue::Address(a) => Some(*a),
            _ => None,
        }
    }
}

fn invalid(path: &str, reason: impl Into<String>) -> InvalidTypedData {
    InvalidTypedData::new(path, reason)
}

fn show(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.len() > 66 {
        let mut end = 66;
        while !rendered.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &rendered[..end])
    } else {
        rendered
    }
}

// ── Structure ───────────────────────────────────────────────────

pub struct Parsed {
    pub tree: TypeTree,
    pub primary_type: String,
    pub domain: TypedValue,
    pub message: Option<TypedValue>,
}

pub fn parse_payload(raw: &Value, version: TypedDataVersion) -> Result<Parsed, InvalidTypedData> {
    let top = raw
        .as_object()
        .ok_or_else(|| invalid("$", "typed data must be a JSON object"))?;
    for key in top.keys() {
        if !matches!(key.as_str(), "types" | "primaryType" | "domain" | "message") {
            return Err(invalid("$", format!("unexpected top-level field {key:?}")));
        }
    }
    let types = top
        .get("types")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("types", "missing or not an object"))?;
    let primary_type = top
        .get("primaryType")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("primaryType", "missing or not a string"))?;
    let domain = top
        .get("domain")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("domain", "missing or not an object"))?;
    let message = top
        .get("message")
        .ok_or_else(|| invalid("message", "missing"))?;

    let tree = build_tree(types, domain, version)?;

    if !tree.structs.contains_key(primary_type) {
        return Err(invalid(
            "primaryType",
            format!("{primary_type:?} is not a declared struct"),
        ));
    }

    let domain_value = Value::Object(domain.clone());
    let domain = validate_value(
        &tree,
        &FieldType::Struct(DOMAIN_TYPE.into()),
        &domain_value,
        "domain",
        0,
    )?;

    // A primary type of EIP712Domain signs the domain alone.
    let message = if primary_type == DOMAIN_TYPE {
        None
    } else {
        Some(validate_value(
            &tree,
            &FieldType::Struct(primary_type.to_string()),
            message,
            "message",
            0,
        )?)
    };

    Ok(Parsed {
        tree,
        primary_type: primary_type.to_string(),
        domain,
        message,
    })
}

fn build_tree(
    types: &Map<String, Value>,
    domain: &Map<String, Value>,
    version: TypedDataVersion,
) -> Result<TypeTree, InvalidTypedData> {
    // Pass 1: raw field lists, checked for shape and duplicates.
    let mut raw_structs: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for (name, fields) in types {
        let path = format!("types.{name}");
        if !is_identifier(name) {
            return Err(invalid(&path, "invalid struct name"));
        }
        let entries = fields
            .as_array()
            .ok_or_else(|| invalid(&path, "field list must be an array"))?;
        let mut seen = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let entry_path = format!("{path}[{i}]");
            let obj = entry
                .as_object()
                .ok_or_else(|| invalid(&entry_path, "field must be an object"))?;
            if obj.len() != 2 {
                return Err(invalid(
                    &entry_path,
                    format!("field must have exactly name and type, got {}", show(entry)),
                ));
            }
            let field_name = obj
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid(&entry_path, "field name missing or not a string"))?;
            let field_type = obj
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid(&entry_path, "field type missing or not a string"))?;
            if !is_identifier(field_name) {
                return Err(invalid(&entry_path, format!("invalid field name {field_name:?}")));
            }
            if seen.iter().any(|(n, _): &(String, String)| n == field_name) {
                return Err(invalid(&entry_path, format!("duplicate field {field_name:?}")));
            }
            seen.push((field_name.to_string(), field_type.to_string()));
        }
        raw_structs.insert(name.clone(), seen);
    }

    match raw_structs.get(DOMAIN_TYPE) {
        Some(fields) => check_domain_fields(fields)?,
        None => {
            raw_structs.insert(DOMAIN_TYPE.into(), infer_domain_fields(domain)?);
        }
    }

    // Pass 2: resolve type strings now that every struct name is known.
    let mut tree = TypeTree::default();
    for (name, fields) in &raw_structs {
        let is_struct = |candidate: &str| raw_structs.contains_key(candidate);
        let mut resolved = Vec::with_capacity(fields.len());
        for (field_name, field_type) in fields {
            let path = format!("types.{name}.{field_name}");
            let ty = FieldType::parse(field_type, &is_struct).map_err(|e| invalid(&path, e))?;
            if version == TypedDataVersion::V3 && ty.contains_array() {
                return Err(invalid(&path, "arrays require eth_signTypedData_v4"));
            }
            resolved.push(TypedField {
                name: field_name.clone(),
                ty,
            });
        }
        tree.structs.insert(name.clone(), resolved);
    }
    Ok(tree)
}

fn check_domain_fields(fields: &[(String, String)]) -> Result<(), InvalidTypedData> {
    for (name, ty) in fields {
        if let Some((_, canonical)) = DOMAIN_FIELDS.iter().find(|(n, _)| n == name) {
            if ty != canonical {
                return Err(invalid(
                    &format!("types.{DOMAIN_TYPE}.{name}"),
                    format!("must be {canonical}, got {ty}"),
                ));
            }
        }
    }
    Ok(())
}

/// Wallets omit `EIP712Domain` from `types` often enough that we rebuild it
/// from the domain keys, canonical order.
fn infer_domain_fields(domain: &Map<String, Value>) -> Result<Vec<(String, String)>, InvalidTypedData> {
    for key in domain.keys() {
        if !DOMAIN_FIELDS.iter().any(|(n, _)| n == key) {
            return Err(invalid(
                &format!("domain.{key}"),
                "unknown domain field and no EIP712Domain type declared",
            ));
        }
    }
    Ok(DOMAIN_FIELDS
        .iter()
        .filter(|(name, _)| domain.contains_key(*name))
        .map(|(name, ty)| (name.to_string(), ty.to_string()))
        .collect())
}

// ── Values ──────────────────────────────────────────────────────

pub fn validate_value(
    tree: &TypeTree,
    ty: &FieldType,
    value: &Value,
    path: &str,
    depth: usize,
) -> Result<TypedValue, InvalidTypedData> {
    if depth > MAX_DEPTH {
        return Err(invalid(path, "nesting too deep"));
    }
    match ty {
        FieldType::Uint(bits) => {
            let (negative, magnitude) = parse_integer(value, path)?;
            if negative && !magnitude.is_zero() {
                return Err(invalid(path, format!("negative value {} for uint{bits}", show(value))));
            }
            if magnitude.bit_len() > *bits {
                return Err(invalid(
                    path,
                    format!("value {} out of bounds for uint{bits}", show(value)),
                ));
            }
            Ok(TypedValue::Uint(magnitude))
        }
        FieldType::Int(bits) => {
            let (negative, magnitude) = parse_integer(value, path)?;
            let limit = U256::from(1u8) << (bits - 1);
            let in_range = if negative {
                magnitude <= limit
            } else {
                magnitude < limit
            };
            if !in_range {
                return Err(invalid(
                    path,
                    format!("value {} out of bounds for int{bits}", show(value)),
                ));
            }
            let raw = if negative {
                U256::ZERO.wrapping_sub(magnitude)
            } else {
                magnitude
            };
            Ok(TypedValue::Int(I256::from_raw(raw)))
        }
        FieldType::Bool => value
            .as_bool()
            .map(TypedValue::Bool)
            .ok_or_else(|| invalid(path, format!("expected bool, got {}", show(value)))),
        FieldType::String => value
            .as_str()
            .map(|s| TypedValue::String(s.to_string()))
            .ok_or_else(|| invalid(path, format!("expected string, got {}", show(value)))),
        FieldType::Address => {
            let s = expect_str(value, path)?;
            wire::parse_address(s)
                .map(TypedValue::Address)
                .map_err(|e| invalid(path, e.to_string()))
        }
        FieldType::FixedBytes(n) => {
            let s = expect_str(value, path)?;
            wire::hex::parse_fixed_bytes("fixed bytes", s, *n)
                .map(TypedValue::FixedBytes)
                .map_err(|e| invalid(path, e.to_string()))
        }
        FieldType::Function => {
            let s = expect_str(value, path)?;
            wire::hex::parse_fixed_bytes("function", s, 24)
                .map(TypedValue::FixedBytes)
                .map_err(|e| invalid(path, e.to_string()))
        }
        FieldType::Bytes => {
            let s = expect_str(value, path)?;
            wire::parse_data(s)
                .map(|b| TypedValue::Bytes(b.to_vec()))
                .map_err(|e| invalid(path, e.to_string()))
        }
        FieldType::Array { inner, len } => {
            let items = value
                .as_array()
                .ok_or_else(|| invalid(path, format!("expected array, got {}", show(value))))?;
            if let Some(max) = len {
                if items.len() > *max {
                    return Err(invalid(
                        path,
                        format!("array of {} items exceeds fixed length {max}", items.len()),
                    ));
                }
            }
            items
                .iter()
                .enumerate()
                .map(|(i, item)| validate_value(tree, inner, item, &format!("{path}[{i}]"), depth + 1))
                .collect::<Result<Vec<_>, _>>()
                .map(TypedValue::Array)
        }
        FieldType::Struct(name) => {
            let declared = tree
                .fields(name)
                .ok_or_else(|| invalid(path, format!("undefined struct {name:?}")))?;
            let obj = value
                .as_object()
                .ok_or_else(|| invalid(path, format!("expected {name} object, got {}", show(value))))?;
            for key in obj.keys() {
                if !declared.iter().any(|f| &f.name == key) {
                    return Err(invalid(
                        &format!("{path}.{key}"),
                        format!("field not declared in {name}"),
                    ));
                }
            }
            let mut fields = Vec::with_capacity(declared.len());
            for field in declared {
                let field_path = format!("{path}.{}", field.name);
                let field_value = obj
                    .get(&field.name)
                    .ok_or_else(|| invalid(&field_path, "missing field"))?;
                let typed = validate_value(tree, &field.ty, field_value, &field_path, depth + 1)?;
                fields.push((field.name.clone(), typed));
            }
            Ok(TypedValue::Struct {
                name: name.clone(),
                fields,
            })
        }
    }
}

fn expect_str<'a>(value: &'a Value, path: &str) -> Result<&'a str, InvalidTypedData> {
    value
        .as_str()
        .ok_or_else(|| invalid(path, format!("expected hex string, got {}", show(value))))
}

/// Integers arrive as JSON numbers (read with arbitrary precision), decimal
/// strings or hex strings. Returns sign and magnitude.
fn parse_integer(value: &Value, path: &str) -> Result<(bool, U256), InvalidTypedData> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(invalid(path, format!("expected integer, got {}", show(other)))),
    };
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.as_str()),
    };
    let magnitude = if body.starts_with("0x") || body.starts_with("0X") {
        wire::parse_quantity(body).map_err(|e| invalid(path, e.to_string()))?
    } else {
        if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid(path, format!("not an integer: {}", show(value))));
        }
        let significant = body.trim_start_matches('0');
        if significant.len() > MAX_DECIMAL_DIGITS {
            return Err(invalid(path, format!("value {} out of bounds", show(value))));
        }
        if significant.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(significant, 10)
                .map_err(|_| invalid(path, format!("value {} out of bounds", show(value))))?
        }
    };
    Ok((negative, magnitude))
}
