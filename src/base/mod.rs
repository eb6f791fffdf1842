//! # Base Module
//!
//! Shared vocabulary of the write path: internal keys, key kinds, packed
//! trailers, and the user-key comparator bundle.
//!
//! ## Internal keys
//!
//! Every entry stored by the engine is addressed by an *internal key*: the
//! user key plus a [`Trailer`] packing the sequence number and the
//! [`InternalKeyKind`] into a single `u64`. Internal keys are ordered by
//! user key ascending, then trailer **descending**, so that the newest
//! version of a key is encountered first during forward iteration.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Data that violates an on-write or on-read invariant of the engine.
///
/// Corruption is always reported upward; the layer above typically reacts by
/// marking the store read-only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("corruption: {0}")]
pub struct Corruption(String);

impl Corruption {
    /// Creates a corruption error with the given message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

// ------------------------------------------------------------------------------------------------
// Sequence numbers and key kinds
// ------------------------------------------------------------------------------------------------

/// A monotonically increasing sequence number assigned by the commit
/// pipeline. Entries with higher sequence numbers shadow older entries for
/// the same user key.
pub type SeqNum = u64;

/// The kind of operation an internal key represents.
///
/// Discriminant values are part of the batch wire format and must never be
/// reordered. Higher values win ties between entries sharing a `(user_key,
/// seq_num)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum InternalKeyKind {
    /// A point tombstone.
    Delete = 0,

    /// A point write.
    Set = 1,

    /// A merge operand combined with older versions at read time.
    Merge = 2,

    /// Opaque payload carried through the commit pipeline but never
    /// materialized in a memtable.
    LogData = 3,

    /// A point tombstone that cancels exactly one older version.
    SingleDelete = 7,

    /// A range tombstone deleting all keys in `[user_key, value)`.
    RangeDelete = 15,

    /// Removes all range keys within a span.
    RangeKeyDelete = 19,

    /// Removes range keys with specific suffixes within a span.
    RangeKeyUnset = 20,

    /// Sets suffix/value range keys over a span.
    RangeKeySet = 21,

    /// Marker for an ingested table; forbidden in memtables.
    IngestSst = 22,

    /// Marker for an excised span; forbidden in memtables.
    Excise = 23,
}

impl InternalKeyKind {
    /// Decodes a kind from its wire discriminant.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Delete),
            1 => Some(Self::Set),
            2 => Some(Self::Merge),
            3 => Some(Self::LogData),
            7 => Some(Self::SingleDelete),
            15 => Some(Self::RangeDelete),
            19 => Some(Self::RangeKeyDelete),
            20 => Some(Self::RangeKeyUnset),
            21 => Some(Self::RangeKeySet),
            22 => Some(Self::IngestSst),
            23 => Some(Self::Excise),
            _ => None,
        }
    }

    /// Returns whether this kind is one of the three range-key operations.
    pub fn is_range_key(self) -> bool {
        matches!(
            self,
            Self::RangeKeySet | Self::RangeKeyUnset | Self::RangeKeyDelete
        )
    }
}

impl TryFrom<u8> for InternalKeyKind {
    type Error = Corruption;

    fn try_from(v: u8) -> Result<Self, Corruption> {
        Self::from_u8(v).ok_or_else(|| Corruption::new(format!("unknown internal key kind: {v}")))
    }
}

impl fmt::Display for InternalKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Delete => "DEL",
            Self::Set => "SET",
            Self::Merge => "MERGE",
            Self::LogData => "LOGDATA",
            Self::SingleDelete => "SINGLEDEL",
            Self::RangeDelete => "RANGEDEL",
            Self::RangeKeyDelete => "RANGEKEYDEL",
            Self::RangeKeyUnset => "RANGEKEYUNSET",
            Self::RangeKeySet => "RANGEKEYSET",
            Self::IngestSst => "INGESTSST",
            Self::Excise => "EXCISE",
        };
        f.write_str(name)
    }
}

// ------------------------------------------------------------------------------------------------
// Trailers
// ------------------------------------------------------------------------------------------------

/// `(seq_num, kind)` packed as `(seq_num << 8) | kind`.
///
/// The packing makes the derived ordering on the raw `u64` agree with the
/// lexicographic ordering on `(seq_num, kind)`, so sorting trailers
/// descending sorts entries newest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Trailer(u64);

impl Trailer {
    /// The greatest possible trailer; sorts before every real entry of the
    /// same user key under descending-trailer order.
    pub const MAX: Trailer = Trailer(u64::MAX);

    /// Packs a sequence number and kind.
    pub fn new(seq_num: SeqNum, kind: InternalKeyKind) -> Self {
        Self((seq_num << 8) | kind as u64)
    }

    /// The sequence number component.
    pub fn seq_num(self) -> SeqNum {
        self.0 >> 8
    }

    /// The kind component.
    pub fn kind(self) -> InternalKeyKind {
        InternalKeyKind::from_u8((self.0 & 0xff) as u8)
            .expect("trailer constructed with a valid key kind")
    }
}

impl fmt::Display for Trailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.seq_num(), self.kind())
    }
}

// ------------------------------------------------------------------------------------------------
// Internal keys
// ------------------------------------------------------------------------------------------------

/// A user key plus its trailer. The user key bytes are borrowed; ownership
/// stays with the arena or buffer the key was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalKey<'a> {
    /// The application-visible key.
    pub user_key: &'a [u8],

    /// Packed `(seq_num, kind)`.
    pub trailer: Trailer,
}

impl<'a> InternalKey<'a> {
    /// Builds an internal key from its parts.
    pub fn new(user_key: &'a [u8], seq_num: SeqNum, kind: InternalKeyKind) -> Self {
        Self {
            user_key,
            trailer: Trailer::new(seq_num, kind),
        }
    }

    /// The sequence number component of the trailer.
    pub fn seq_num(&self) -> SeqNum {
        self.trailer.seq_num()
    }

    /// The kind component of the trailer.
    pub fn kind(&self) -> InternalKeyKind {
        self.trailer.kind()
    }
}

// ------------------------------------------------------------------------------------------------
// Comparators
// ------------------------------------------------------------------------------------------------

/// Total order on user keys.
pub type Compare = fn(&[u8], &[u8]) -> Ordering;

/// Equality on user keys; must agree with [`Compare`].
pub type Equal = fn(&[u8], &[u8]) -> bool;

/// Renders a user key for diagnostics.
pub type FormatKey = fn(&[u8]) -> String;

/// The comparator bundle a memtable is configured with.
#[derive(Clone, Copy)]
pub struct Comparer {
    /// Total order on user keys.
    pub compare: Compare,

    /// Equality consistent with `compare`.
    pub equal: Equal,

    /// Key formatter used in log and panic messages.
    pub format_key: FormatKey,
}

impl Comparer {
    /// The default bytewise comparator.
    pub fn bytewise() -> Self {
        Self {
            compare: bytewise_compare,
            equal: bytewise_equal,
            format_key: format_key_hex,
        }
    }
}

impl Default for Comparer {
    fn default() -> Self {
        Self::bytewise()
    }
}

impl fmt::Debug for Comparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comparer").finish_non_exhaustive()
    }
}

fn bytewise_compare(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

fn bytewise_equal(a: &[u8], b: &[u8]) -> bool {
    a == b
}

/// Formats a key as hex, truncating long keys to keep log lines readable.
pub fn format_key_hex(key: &[u8]) -> String {
    use fmt::Write;

    let mut out = String::new();
    if key.len() <= 32 {
        for byte in key {
            let _ = write!(out, "{byte:02x}");
        }
    } else {
        for byte in &key[..16] {
            let _ = write!(out, "{byte:02x}");
        }
        let _ = write!(out, "...[{} bytes]", key.len());
    }
    out
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------
