//! Canonical bencoding for deterministic serialization.
//!
//! Every hash in the system (block hashes, transaction ids, signed messages)
//! is computed over this encoding, so it must be byte-identical across
//! platforms:
//! - Dictionary keys sorted bytewise, byte-string keys before text keys
//! - Integers in shortest decimal form, no leading zeros
//! - Definite lengths only
//! - No floats (timestamps are RFC 3339 text)

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValueError;

/// A dictionary key: either a byte string or a text string.
///
/// Byte-string keys sort before text keys; within a kind, keys sort by
/// their raw bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Bytes(Vec<u8>),
    Text(String),
}

impl Key {
    pub fn text(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Bytes(b) => write!(f, "b\"{}\"", hex::encode(b)),
            Key::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

/// A plain value: the universe of canonically encodable data.
///
/// Actions serialize to and from this type, and all consensus-critical
/// hashing is defined over its encoding.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Bytes(Vec<u8>),
    Text(String),
    List(Vec<Value>),
    Dict(BTreeMap<Key, Value>),
}

impl Value {
    /// Encode to canonical bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_value_to(&mut buf, self);
        buf
    }

    /// Decode a value from canonical bytes, rejecting trailing garbage.
    pub fn decode(bytes: &[u8]) -> Result<Value, ValueError> {
        let (value, rest) = decode_value(bytes)?;
        if !rest.is_empty() {
            return Err(ValueError::TrailingBytes(rest.len()));
        }
        Ok(value)
    }

    /// Borrow as an i64, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow as a byte slice, if this is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow as a str, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as a list, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow as a dict, if this is a dictionary.
    pub fn as_dict(&self) -> Option<&BTreeMap<Key, Value>> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Convenience for building dictionaries with text keys.
pub fn dict<I>(entries: I) -> Value
where
    I: IntoIterator<Item = (Key, Value)>,
{
    Value::Dict(entries.into_iter().collect())
}

/// Look up a required entry in a dictionary by text key.
pub fn expect_entry<'a>(
    entries: &'a BTreeMap<Key, Value>,
    key: &str,
) -> Result<&'a Value, ValueError> {
    entries
        .get(&Key::text(key))
        .ok_or_else(|| ValueError::MissingKey(key.to_string()))
}

fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(b'n'),
        Value::Bool(true) => buf.push(b't'),
        Value::Bool(false) => buf.push(b'f'),
        Value::Int(n) => {
            buf.push(b'i');
            buf.extend_from_slice(n.to_string().as_bytes());
            buf.push(b'e');
        }
        Value::Bytes(b) => {
            buf.extend_from_slice(b.len().to_string().as_bytes());
            buf.push(b':');
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            buf.push(b'u');
            buf.extend_from_slice(s.len().to_string().as_bytes());
            buf.push(b':');
            buf.extend_from_slice(s.as_bytes());
        }
        Value::List(items) => {
            buf.push(b'l');
            for item in items {
                encode_value_to(buf, item);
            }
            buf.push(b'e');
        }
        Value::Dict(entries) => {
            // BTreeMap iterates in Key order, which is the canonical order:
            // byte keys first, then text keys, each lexicographic.
            buf.push(b'd');
            for (key, val) in entries {
                match key {
                    Key::Bytes(b) => encode_value_to(buf, &Value::Bytes(b.clone())),
                    Key::Text(s) => encode_value_to(buf, &Value::Text(s.clone())),
                }
                encode_value_to(buf, val);
            }
            buf.push(b'e');
        }
    }
}

fn decode_value(bytes: &[u8]) -> Result<(Value, &[u8]), ValueError> {
    let first = *bytes.first().ok_or(ValueError::UnexpectedEnd)?;
    match first {
        b'n' => Ok((Value::Null, &bytes[1..])),
        b't' => Ok((Value::Bool(true), &bytes[1..])),
        b'f' => Ok((Value::Bool(false), &bytes[1..])),
        b'i' => decode_int(&bytes[1..]),
        b'u' => {
            let (raw, rest) = decode_length_prefixed(&bytes[1..])?;
            let text = String::from_utf8(raw).map_err(|_| ValueError::InvalidUtf8)?;
            Ok((Value::Text(text), rest))
        }
        b'0'..=b'9' => {
            let (raw, rest) = decode_length_prefixed(bytes)?;
            Ok((Value::Bytes(raw), rest))
        }
        b'l' => {
            let mut rest = &bytes[1..];
            let mut items = Vec::new();
            loop {
                if rest.first() == Some(&b'e') {
                    return Ok((Value::List(items), &rest[1..]));
                }
                let (item, remaining) = decode_value(rest)?;
                items.push(item);
                rest = remaining;
            }
        }
        b'd' => {
            let mut rest = &bytes[1..];
            let mut entries = BTreeMap::new();
            let mut last_key: Option<Key> = None;
            loop {
                if rest.first() == Some(&b'e') {
                    return Ok((Value::Dict(entries), &rest[1..]));
                }
                let (key_value, remaining) = decode_value(rest)?;
                let key = match key_value {
                    Value::Bytes(b) => Key::Bytes(b),
                    Value::Text(s) => Key::Text(s),
                    _ => return Err(ValueError::InvalidDictKey),
                };
                if let Some(prev) = &last_key {
                    if *prev >= key {
                        return Err(ValueError::UnsortedDictKeys);
                    }
                }
                let (val, remaining) = decode_value(remaining)?;
                last_key = Some(key.clone());
                entries.insert(key, val);
                rest = remaining;
            }
        }
        other => Err(ValueError::UnexpectedByte(other)),
    }
}

fn decode_int(bytes: &[u8]) -> Result<(Value, &[u8]), ValueError> {
    let end = bytes
        .iter()
        .position(|&b| b == b'e')
        .ok_or(ValueError::UnexpectedEnd)?;
    let digits = std::str::from_utf8(&bytes[..end]).map_err(|_| ValueError::InvalidUtf8)?;
    if digits.is_empty()
        || digits == "-"
        || (digits.len() > 1 && (digits.starts_with('0') || digits.starts_with("-0")))
    {
        return Err(ValueError::InvalidInteger(digits.to_string()));
    }
    let n: i64 = digits
        .parse()
        .map_err(|_| ValueError::InvalidInteger(digits.to_string()))?;
    Ok((Value::Int(n), &bytes[end + 1..]))
}

fn decode_length_prefixed(bytes: &[u8]) -> Result<(Vec<u8>, &[u8]), ValueError> {
    let colon = bytes
        .iter()
        .position(|&b| b == b':')
        .ok_or(ValueError::UnexpectedEnd)?;
    let digits = std::str::from_utf8(&bytes[..colon]).map_err(|_| ValueError::InvalidUtf8)?;
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return Err(ValueError::InvalidInteger(digits.to_string()));
    }
    let len: usize = digits
        .parse()
        .map_err(|_| ValueError::InvalidInteger(digits.to_string()))?;
    let start = colon + 1;
    if bytes.len() < start + len {
        return Err(ValueError::UnexpectedEnd);
    }
    Ok((bytes[start..start + len].to_vec(), &bytes[start + len..]))
}
