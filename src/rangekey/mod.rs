//! Range-key value encoding.
//!
//! A range-key entry is stored in a span skiplist under its start key; the
//! entry's value carries the end key and, depending on the kind, the
//! suffix/value payloads. The format uses the engine's byte-stable
//! little-endian framing:
//!
//! ```text
//! RANGEKEYSET:   [u32 end_len][end] ( [u32 suffix_len][suffix] [u32 value_len][value] )*
//! RANGEKEYUNSET: [u32 end_len][end] ( [u32 suffix_len][suffix] )*
//! RANGEKEYDEL:   [end]                                  (raw, like RANGEDEL)
//! ```

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use crate::base::{Corruption, InternalKey, InternalKeyKind};
use crate::keyspan::{Key, KeysOrder, Span};

// ------------------------------------------------------------------------------------------------
// Encoding
// ------------------------------------------------------------------------------------------------

fn put_slice(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s);
}

/// Encodes the value of a `RANGEKEYSET` entry: the end key plus
/// `(suffix, value)` pairs.
pub fn encode_set(end: &[u8], pairs: &[(&[u8], &[u8])]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + end.len());
    put_slice(&mut out, end);
    for (suffix, value) in pairs {
        put_slice(&mut out, suffix);
        put_slice(&mut out, value);
    }
    out
}

/// Encodes the value of a `RANGEKEYUNSET` entry: the end key plus suffixes.
pub fn encode_unset(end: &[u8], suffixes: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + end.len());
    put_slice(&mut out, end);
    for suffix in suffixes {
        put_slice(&mut out, suffix);
    }
    out
}

// ------------------------------------------------------------------------------------------------
// Decoding
// ------------------------------------------------------------------------------------------------

fn read_slice<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], Corruption> {
    if buf.len() < 4 {
        return Err(Corruption::new(format!(
            "truncated range key length prefix: {} bytes remaining",
            buf.len()
        )));
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let rest = &buf[4..];
    if rest.len() < len {
        return Err(Corruption::new(format!(
            "truncated range key field: need {len} bytes, have {}",
            rest.len()
        )));
    }
    let (field, rest) = rest.split_at(len);
    *buf = rest;
    Ok(field)
}

/// Decodes a range-key entry into a single-key [`Span`].
///
/// The key's trailer is the entry's; `RANGEKEYSET` keys carry suffix and
/// value, `RANGEKEYUNSET` keys carry only a suffix, and `RANGEKEYDEL` keys
/// carry neither. Multi-pair values decode into one key per pair.
pub fn decode(ikey: InternalKey<'_>, value: &[u8]) -> Result<Span, Corruption> {
    let mut span = Span {
        start: ikey.user_key.to_vec(),
        ..Span::default()
    };
    match ikey.kind() {
        InternalKeyKind::RangeKeyDelete => {
            span.end = value.to_vec();
            span.keys.push(Key {
                trailer: ikey.trailer,
                suffix: Vec::new(),
                value: Vec::new(),
            });
        }
        InternalKeyKind::RangeKeyUnset => {
            let mut rest = value;
            span.end = read_slice(&mut rest)?.to_vec();
            while !rest.is_empty() {
                let suffix = read_slice(&mut rest)?.to_vec();
                span.keys.push(Key {
                    trailer: ikey.trailer,
                    suffix,
                    value: Vec::new(),
                });
            }
        }
        InternalKeyKind::RangeKeySet => {
            let mut rest = value;
            span.end = read_slice(&mut rest)?.to_vec();
            while !rest.is_empty() {
                let suffix = read_slice(&mut rest)?.to_vec();
                let value = read_slice(&mut rest)?.to_vec();
                span.keys.push(Key {
                    trailer: ikey.trailer,
                    suffix,
                    value,
                });
            }
        }
        kind => {
            return Err(Corruption::new(format!(
                "key kind {kind} is not a range key"
            )));
        }
    }
    span.keys_order = KeysOrder::ByTrailerDesc;
    Ok(span)
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------
