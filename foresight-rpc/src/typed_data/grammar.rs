//! EIP-712 field type grammar.

use std::fmt;

/// A resolved EIP-712 field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Uint(usize),
    Int(usize),
    FixedBytes(usize),
    Bytes,
    Bool,
    String,
    Address,
    Function,
    Struct(String),
    /// `len` is `None` for dynamic arrays.
    Array {
        inner: Box<FieldType>,
        len: Option<usize>,
    },
}

impl FieldType {
    /// Parse a type string. `is_struct` reports whether a name is declared.
    ///
    /// Integer and byte widths are validated before struct lookup, so a
    /// declared struct called `uint3` does not make `uint3` legal.
    pub fn parse(raw: &str, is_struct: &dyn Fn(&str) -> bool) -> Result<FieldType, String> {
        if raw.contains(['(', ')', ',']) {
            return Err(format!("tuple types are not allowed: {raw:?}"));
        }
        if let Some(open) = raw.strip_suffix(']').and_then(|s| s.rfind('[')) {
            let inner_raw = &raw[..open];
            let len_raw = &raw[open + 1..raw.len() - 1];
            let len = if len_raw.is_empty() {
                None
            } else {
                Some(parse_array_len(raw, len_raw)?)
            };
            let inner = FieldType::parse(inner_raw, is_struct)?;
            return Ok(FieldType::Array {
                inner: Box::new(inner),
                len,
            });
        }
        if raw.contains(['[', ']']) {
            return Err(format!("unbalanced array brackets in {raw:?}"));
        }

        match raw {
            "bytes" => return Ok(FieldType::Bytes),
            "bool" => return Ok(FieldType::Bool),
            "string" => return Ok(FieldType::String),
            "address" => return Ok(FieldType::Address),
            "function" => return Ok(FieldType::Function),
            "uint" | "int" => return Err(format!("{raw:?} needs an explicit width")),
            _ => {}
        }

        if let Some(width) = numeric_suffix(raw, "uint") {
            return integer_width(raw, width).map(FieldType::Uint);
        }
        if let Some(width) = numeric_suffix(raw, "int") {
            return integer_width(raw, width).map(FieldType::Int);
        }
        if let Some(width) = numeric_suffix(raw, "bytes") {
            return match width.parse::<usize>() {
                Ok(n @ 1..=32) if !width.starts_with('0') => Ok(FieldType::FixedBytes(n)),
                _ => Err(format!("invalid fixed bytes width in {raw:?}")),
            };
        }

        if !is_identifier(raw) {
            return Err(format!("invalid type name {raw:?}"));
        }
        if is_struct(raw) {
            Ok(FieldType::Struct(raw.to_string()))
        } else {
            Err(format!("undefined struct type {raw:?}"))
        }
    }

    pub fn is_atomic(&self) -> bool {
        !matches!(
            self,
            FieldType::Struct(_) | FieldType::Array { .. } | FieldType::Bytes | FieldType::String
        )
    }

    /// Innermost non-array type.
    pub fn base(&self) -> &FieldType {
        match self {
            FieldType::Array { inner, .. } => inner.base(),
            other => other,
        }
    }

    pub fn contains_array(&self) -> bool {
        matches!(self, FieldType::Array { .. })
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Uint(bits) => write!(f, "uint{bits}"),
            FieldType::Int(bits) => write!(f, "int{bits}"),
            FieldType::FixedBytes(n) => write!(f, "bytes{n}"),
            FieldType::Bytes => f.write_str("bytes"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::String => f.write_str("string"),
            FieldType::Address => f.write_str("address"),
            FieldType::Function => f.write_str("function"),
            FieldType::Struct(name) => f.write_str(name),
            FieldType::Array { inner, len: Some(n) } => write!(f, "{inner}[{n}]"),
            FieldType::Array { inner, len: None } => write!(f, "{inner}[]"),
        }
    }
}

fn parse_array_len(raw: &str, len_raw: &str) -> Result<usize, String> {
    if !len_raw.bytes().all(|b| b.is_ascii_digit()) || len_raw.starts_with('0') {
        return Err(format!("invalid array length in {raw:?}"));
    }
    match len_raw.parse::<usize>() {
        Ok(0) | Err(_) => Err(format!("invalid array length in {raw:?}")),
        Ok(n) => Ok(n),
    }
}

/// `Some(digits)` when `raw` is `prefix` followed only by ASCII digits.
fn numeric_suffix<'a>(raw: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = raw.strip_prefix(prefix)?;
    (!rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())).then_some(rest)
}

fn integer_width(raw: &str, width: &str) -> Result<usize, String> {
    match width.parse::<usize>() {
        Ok(bits) if !width.starts_with('0') && (8..=256).contains(&bits) && bits % 8 == 0 => {
            Ok(bits)
        }
        _ => Err(format!("invalid integer width in {raw:?}")),
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
