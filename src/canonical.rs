//! Canonical Encoding
//!
//! Converts structured values into the unique deterministic byte sequence
//! used as hashing input for the audit chain and for approval signatures.
//! Output is compact JSON with map keys sorted byte-wise and numbers emitted
//! exactly as the caller supplied them.

use std::collections::BTreeMap;

use crate::error::TrustChainError;

/// Closed value model accepted by the canonicalizer.
///
/// `Absent` marks a map entry that must not be emitted at all. Timestamps
/// must be normalized to ISO-8601 strings before they reach this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalValue {
    Null,
    Bool(bool),
    /// Literal decimal representation, emitted verbatim.
    Number(String),
    String(String),
    List(Vec<CanonicalValue>),
    Map(BTreeMap<String, CanonicalValue>),
    Absent,
}

impl CanonicalValue {
    /// Build a number from its literal text, rejecting anything that is not
    /// a JSON number.
    pub fn number(literal: impl Into<String>) -> Result<Self, TrustChainError> {
        let literal = literal.into();
        if !is_json_number(&literal) {
            return Err(TrustChainError::InvalidPayload(format!(
                "invalid number literal: {:?}",
                literal
            )));
        }
        Ok(Self::Number(literal))
    }

    /// Build a map from key/value pairs. Later duplicates replace earlier ones.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, CanonicalValue)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl From<&serde_json::Value> for CanonicalValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            // arbitrary_precision keeps the literal text of the number
            serde_json::Value::Number(n) => Self::Number(n.to_string()),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for CanonicalValue {
    fn from(value: serde_json::Value) -> Self {
        Self::from(&value)
    }
}

impl From<&str> for CanonicalValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for CanonicalValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for CanonicalValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for CanonicalValue {
    fn from(value: i64) -> Self {
        Self::Number(value.to_string())
    }
}

impl From<u64> for CanonicalValue {
    fn from(value: u64) -> Self {
        Self::Number(value.to_string())
    }
}

impl From<Vec<CanonicalValue>> for CanonicalValue {
    fn from(value: Vec<CanonicalValue>) -> Self {
        Self::List(value)
    }
}

/// Canonicalize a value into its deterministic byte encoding.
pub fn canonicalize(value: &CanonicalValue) -> Result<Vec<u8>, TrustChainError> {
    if value.is_absent() {
        return Err(TrustChainError::InvalidPayload(
            "top-level value is absent".to_string(),
        ));
    }

    let mut buf = Vec::with_capacity(128);
    encode(&mut buf, value)?;
    Ok(buf)
}

/// Canonicalize a JSON value. Convenience for payloads arriving as JSON.
pub fn canonicalize_json(value: &serde_json::Value) -> Result<Vec<u8>, TrustChainError> {
    canonicalize(&CanonicalValue::from(value))
}

fn encode(buf: &mut Vec<u8>, value: &CanonicalValue) -> Result<(), TrustChainError> {
    match value {
        // JSON semantics: an absent list element still occupies its slot
        CanonicalValue::Null | CanonicalValue::Absent => buf.extend_from_slice(b"null"),
        CanonicalValue::Bool(true) => buf.extend_from_slice(b"true"),
        CanonicalValue::Bool(false) => buf.extend_from_slice(b"false"),
        CanonicalValue::Number(literal) => {
            if !is_json_number(literal) {
                return Err(TrustChainError::InvalidPayload(format!(
                    "invalid number literal: {:?}",
                    literal
                )));
            }
            buf.extend_from_slice(literal.as_bytes());
        }
        CanonicalValue::String(s) => write_escaped(buf, s),
        CanonicalValue::List(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                encode(buf, item)?;
            }
            buf.push(b']');
        }
        CanonicalValue::Map(entries) => {
            // BTreeMap<String, _> iterates in byte-wise key order
            buf.push(b'{');
            let mut first = true;
            for (key, item) in entries.iter().filter(|(_, v)| !v.is_absent()) {
                if !first {
                    buf.push(b',');
                }
                first = false;
                write_escaped(buf, key);
                buf.push(b':');
                encode(buf, item)?;
            }
            buf.push(b'}');
        }
    }
    Ok(())
}

fn write_escaped(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => buf.extend_from_slice(b"\\\""),
            '\\' => buf.extend_from_slice(b"\\\\"),
            '\n' => buf.extend_from_slice(b"\\n"),
            '\r' => buf.extend_from_slice(b"\\r"),
            '\t' => buf.extend_from_slice(b"\\t"),
            '\u{08}' => buf.extend_from_slice(b"\\b"),
            '\u{0c}' => buf.extend_from_slice(b"\\f"),
            c if (c as u32) < 0x20 => {
                buf.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut tmp = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
            }
        }
    }
    buf.push(b'"');
}

/// JSON number grammar: `-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?`
fn is_json_number(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;

    if bytes.get(i) == Some(&b'-') {
        i += 1;
    }

    match bytes.get(i) {
        Some(b'0') => i += 1,
        Some(b'1'..=b'9') => {
            while matches!(bytes.get(i), Some(b'0'..=b'9')) {
                i += 1;
            }
        }
        _ => return false,
    }

    if bytes.get(i) == Some(&b'.') {
        i += 1;
        let start = i;
        while matches!(bytes.get(i), Some(b'0'..=b'9')) {
            i += 1;
        }
        if i == start {
            return false;
        }
    }

    if matches!(bytes.get(i), Some(b'e') | Some(b'E')) {
        i += 1;
        if matches!(bytes.get(i), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        let start = i;
        while matches!(bytes.get(i), Some(b'0'..=b'9')) {
            i += 1;
        }
        if i == start {
            return false;
        }
    }

    i == bytes.len()
}
