//! # Batch Module
//!
//! An ordered set of mutations applied to a memtable as a unit. The batch
//! stores records in a flat byte buffer:
//!
//! ```text
//! [u8 kind][u32 key_len][key][u32 value_len][value]
//! ```
//!
//! repeated per record, little-endian lengths. The commit pipeline assigns
//! one sequence number per seq-consuming record; `LOGDATA` records ride along
//! in the buffer but consume none and are never materialized.
//!
//! A batch also tracks the pessimistic number of memtable bytes its
//! application may require ([`Batch::memtable_size`]), computed with
//! [`Arena::max_node_size`] so that a successful reservation guarantees the
//! arena can absorb the whole batch.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use crate::arena::Arena;
use crate::base::{Corruption, InternalKeyKind};
use crate::rangekey;

// ------------------------------------------------------------------------------------------------
// Batch
// ------------------------------------------------------------------------------------------------

/// An ordered set of mutations, encoded and counted for application to a
/// memtable.
#[derive(Debug, Default, Clone)]
pub struct Batch {
    pub(crate) data: Vec<u8>,
    pub(crate) count: u32,
    pub(crate) memtable_size: u64,
}

impl Batch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`.
    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.push_record(InternalKeyKind::Set, key, value);
    }

    /// Adds a merge operand for `key`.
    pub fn merge(&mut self, key: &[u8], value: &[u8]) {
        self.push_record(InternalKeyKind::Merge, key, value);
    }

    /// Deletes `key`.
    pub fn delete(&mut self, key: &[u8]) {
        self.push_record(InternalKeyKind::Delete, key, b"");
    }

    /// Deletes `key`, cancelling exactly one older version.
    pub fn single_delete(&mut self, key: &[u8]) {
        self.push_record(InternalKeyKind::SingleDelete, key, b"");
    }

    /// Deletes every key in `[start, end)`.
    pub fn delete_range(&mut self, start: &[u8], end: &[u8]) {
        self.push_record(InternalKeyKind::RangeDelete, start, end);
    }

    /// Sets a range key over `[start, end)` with the given suffix and value.
    pub fn range_key_set(&mut self, start: &[u8], end: &[u8], suffix: &[u8], value: &[u8]) {
        let encoded = rangekey::encode_set(end, &[(suffix, value)]);
        self.push_record(InternalKeyKind::RangeKeySet, start, &encoded);
    }

    /// Removes range keys with `suffix` over `[start, end)`.
    pub fn range_key_unset(&mut self, start: &[u8], end: &[u8], suffix: &[u8]) {
        let encoded = rangekey::encode_unset(end, &[suffix]);
        self.push_record(InternalKeyKind::RangeKeyUnset, start, &encoded);
    }

    /// Removes all range keys over `[start, end)`.
    pub fn range_key_delete(&mut self, start: &[u8], end: &[u8]) {
        self.push_record(InternalKeyKind::RangeKeyDelete, start, end);
    }

    /// Attaches opaque data that travels with the batch but is never
    /// materialized and consumes no sequence number.
    pub fn log_data(&mut self, data: &[u8]) {
        self.encode_record(InternalKeyKind::LogData, data, b"");
    }

    /// The exact number of seq-consuming records.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Pessimistic upper bound on the memtable bytes applying this batch may
    /// consume.
    pub fn memtable_size(&self) -> u64 {
        self.memtable_size
    }

    /// Whether the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// A cursor over the batch's records in insertion order.
    pub fn reader(&self) -> BatchReader<'_> {
        BatchReader { buf: &self.data }
    }

    fn push_record(&mut self, kind: InternalKeyKind, key: &[u8], value: &[u8]) {
        self.encode_record(kind, key, value);
        self.count += 1;
        self.memtable_size += Arena::max_node_size(key.len() as u32 + 8, value.len() as u32);
    }

    pub(crate) fn encode_record(&mut self, kind: InternalKeyKind, key: &[u8], value: &[u8]) {
        self.data.push(kind as u8);
        self.data.extend_from_slice(&(key.len() as u32).to_le_bytes());
        self.data.extend_from_slice(key);
        self.data
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.data.extend_from_slice(value);
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// An in-order cursor over a batch's `(kind, user_key, value)` records.
#[derive(Debug)]
pub struct BatchReader<'a> {
    buf: &'a [u8],
}

impl<'a> BatchReader<'a> {
    /// Returns the next record, `None` at the end, or corruption if the
    /// buffer is malformed.
    pub fn next(&mut self) -> Result<Option<(InternalKeyKind, &'a [u8], &'a [u8])>, Corruption> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let kind = InternalKeyKind::try_from(self.buf[0])?;
        self.buf = &self.buf[1..];
        let key = self.read_field()?;
        let value = self.read_field()?;
        Ok(Some((kind, key, value)))
    }

    fn read_field(&mut self) -> Result<&'a [u8], Corruption> {
        if self.buf.len() < 4 {
            return Err(Corruption::new("truncated batch record length prefix"));
        }
        let len =
            u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        let rest = &self.buf[4..];
        if rest.len() < len {
            return Err(Corruption::new(format!(
                "truncated batch record: need {len} bytes, have {}",
                rest.len()
            )));
        }
        let (field, rest) = rest.split_at(len);
        self.buf = rest;
        Ok(field)
    }
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------
