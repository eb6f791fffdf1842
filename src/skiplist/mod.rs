//! # Skiplist Module
//!
//! A concurrent ordered map of internal keys, backed by the shared
//! [`Arena`](crate::arena::Arena). Key and value bytes are copied into the
//! arena on insert; the map's nodes order entries by user key ascending and
//! trailer **descending**, so the newest version of a user key is reached
//! first during forward iteration.
//!
//! Inserts are lock-free and may run concurrently with each other and with
//! iteration. The only failure mode is [`ArenaFull`].
//!
//! ## Invariants
//!
//! - Entries are never removed; a memtable is append-only.
//! - The arena outlives every entry: iterators borrow the skiplist, and the
//!   skiplist holds the arena alive.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering as CmpOrdering;
use std::ops::Bound;
use std::slice;
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use crossbeam_skiplist::map::Entry;

use crate::arena::{Arena, ArenaFull};
use crate::base::{Compare, InternalKey, Trailer};

// ------------------------------------------------------------------------------------------------
// Node keys and values
// ------------------------------------------------------------------------------------------------

/// Map key: a raw view of arena-resident user-key bytes plus the trailer.
///
/// Carries the comparator so the derived `Ord` can delegate to it; every key
/// in one map shares the same comparator.
struct NodeKey {
    ptr: *const u8,
    len: u32,
    trailer: Trailer,
    cmp: Compare,
}

// SAFETY: `ptr` points into the arena owned by the skiplist that stores this
// key; the bytes are written once before insertion and immutable afterwards.
unsafe impl Send for NodeKey {}
unsafe impl Sync for NodeKey {}

impl NodeKey {
    fn user_key(&self) -> &[u8] {
        // SAFETY: see the `Send`/`Sync` justification above.
        unsafe { slice::from_raw_parts(self.ptr, self.len as usize) }
    }
}

impl Ord for NodeKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        match (self.cmp)(self.user_key(), other.user_key()) {
            // Newer entries sort first within a user key.
            CmpOrdering::Equal => other.trailer.cmp(&self.trailer),
            ord => ord,
        }
    }
}

impl PartialOrd for NodeKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NodeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for NodeKey {}

/// Map value: a raw view of arena-resident value bytes.
struct NodeValue {
    ptr: *const u8,
    len: u32,
}

// SAFETY: as for `NodeKey`.
unsafe impl Send for NodeValue {}
unsafe impl Sync for NodeValue {}

// ------------------------------------------------------------------------------------------------
// Skiplist
// ------------------------------------------------------------------------------------------------

/// A lock-free ordered map of internal keys over a shared arena.
pub struct Skiplist {
    arena: Arc<Arena>,
    cmp: Compare,
    map: SkipMap<NodeKey, NodeValue>,
}

impl Skiplist {
    /// Creates an empty skiplist allocating out of `arena`.
    pub fn new(arena: Arc<Arena>, cmp: Compare) -> Self {
        Self {
            arena,
            cmp,
            map: SkipMap::new(),
        }
    }

    /// Inserts an entry, copying the key and value bytes into the arena.
    ///
    /// Concurrent-safe. Entries inserted by a memtable are unique in
    /// `(user_key, trailer)` because sequence numbers are never reused.
    pub fn add(&self, key: InternalKey<'_>, value: &[u8]) -> Result<(), ArenaFull> {
        let (k, v) = self.arena.copy_pair(key.user_key, value)?;
        self.map.insert(
            NodeKey {
                ptr: k.as_ptr(),
                len: k.len() as u32,
                trailer: key.trailer,
                cmp: self.cmp,
            },
            NodeValue {
                ptr: v.as_ptr(),
                len: v.len() as u32,
            },
        );
        Ok(())
    }

    /// The shared arena's allocation high-water mark.
    pub fn size(&self) -> u32 {
        self.arena.size()
    }

    /// The arena this skiplist allocates from.
    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    /// Whether this skiplist holds no entries. Note that `size()` reports
    /// the shared arena, which other skiplists may have allocated from.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns an unpositioned iterator honoring optional user-key bounds
    /// (`lower` inclusive, `upper` exclusive).
    pub fn new_iter(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Iter<'_> {
        Iter {
            skl: self,
            lower: lower.map(<[u8]>::to_vec),
            upper: upper.map(<[u8]>::to_vec),
            entry: None,
        }
    }

    /// Returns an unpositioned iterator over the whole skiplist, used when
    /// flushing a memtable or materializing its span cache.
    pub fn new_flush_iter(&self) -> Iter<'_> {
        self.new_iter(None, None)
    }

    /// A transient key used only for the duration of a lookup; never stored.
    fn probe(&self, user_key: &[u8]) -> NodeKey {
        NodeKey {
            ptr: user_key.as_ptr(),
            len: user_key.len() as u32,
            // MAX sorts before every real trailer of the same user key.
            trailer: Trailer::MAX,
            cmp: self.cmp,
        }
    }
}

impl std::fmt::Debug for Skiplist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skiplist")
            .field("len", &self.map.len())
            .field("arena", &self.arena)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Iterator
// ------------------------------------------------------------------------------------------------

type MapEntry<'a> = Entry<'a, NodeKey, NodeValue>;

/// A bidirectional iterator over a [`Skiplist`].
///
/// Starts unpositioned; position with `first`, `last`, `seek_ge`, or
/// `seek_lt`. Every positioning method returns the entry it landed on, if
/// any. Returned key and value slices live in the arena and stay valid for
/// the iterator's full borrow of the skiplist.
pub struct Iter<'a> {
    skl: &'a Skiplist,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    entry: Option<MapEntry<'a>>,
}

impl<'a> Iter<'a> {
    /// Positions at the first entry within bounds.
    pub fn first(&mut self) -> Option<(InternalKey<'a>, &'a [u8])> {
        self.entry = match self.lower.as_deref() {
            Some(lower) => self.entry_ge(lower),
            None => self.skl.map.front(),
        };
        self.clamp_upper();
        self.current()
    }

    /// Positions at the last entry within bounds.
    pub fn last(&mut self) -> Option<(InternalKey<'a>, &'a [u8])> {
        self.entry = match self.upper.as_deref() {
            Some(upper) => self.entry_lt(upper),
            None => self.skl.map.back(),
        };
        self.clamp_lower();
        self.current()
    }

    /// Positions at the first entry whose user key is `>= key`.
    pub fn seek_ge(&mut self, key: &[u8]) -> Option<(InternalKey<'a>, &'a [u8])> {
        let key = match self.lower.as_deref() {
            Some(lower) if (self.skl.cmp)(key, lower) == CmpOrdering::Less => lower,
            _ => key,
        };
        self.entry = self.entry_ge(key);
        self.clamp_upper();
        self.current()
    }

    /// Positions at the last entry whose user key is `< key`.
    pub fn seek_lt(&mut self, key: &[u8]) -> Option<(InternalKey<'a>, &'a [u8])> {
        let key = match self.upper.as_deref() {
            Some(upper) if (self.skl.cmp)(key, upper) == CmpOrdering::Greater => upper,
            _ => key,
        };
        self.entry = self.entry_lt(key);
        self.clamp_lower();
        self.current()
    }

    /// Advances to the next entry.
    pub fn next(&mut self) -> Option<(InternalKey<'a>, &'a [u8])> {
        self.entry = self.entry.as_ref().and_then(|e| e.next());
        self.clamp_upper();
        self.current()
    }

    /// Steps back to the previous entry.
    pub fn prev(&mut self) -> Option<(InternalKey<'a>, &'a [u8])> {
        self.entry = self.entry.as_ref().and_then(|e| e.prev());
        self.clamp_lower();
        self.current()
    }

    /// The entry at the current position, if positioned.
    pub fn current(&self) -> Option<(InternalKey<'a>, &'a [u8])> {
        self.entry.as_ref().map(|e| {
            let k = e.key();
            let v = e.value();
            // SAFETY: both slices live in the arena owned (transitively) by
            // `self.skl`, which the `'a` borrow keeps alive.
            unsafe {
                (
                    InternalKey {
                        user_key: slice::from_raw_parts(k.ptr, k.len as usize),
                        trailer: k.trailer,
                    },
                    slice::from_raw_parts(v.ptr, v.len as usize),
                )
            }
        })
    }

    fn entry_ge(&self, user_key: &[u8]) -> Option<MapEntry<'a>> {
        let probe = self.skl.probe(user_key);
        self.skl.map.lower_bound(Bound::Included(&probe))
    }

    fn entry_lt(&self, user_key: &[u8]) -> Option<MapEntry<'a>> {
        let probe = self.skl.probe(user_key);
        self.skl.map.upper_bound(Bound::Excluded(&probe))
    }

    fn clamp_upper(&mut self) {
        if let (Some(e), Some(upper)) = (self.entry.as_ref(), self.upper.as_deref()) {
            if (self.skl.cmp)(e.key().user_key(), upper) != CmpOrdering::Less {
                self.entry = None;
            }
        }
    }

    fn clamp_lower(&mut self) {
        if let (Some(e), Some(lower)) = (self.entry.as_ref(), self.lower.as_deref()) {
            if (self.skl.cmp)(e.key().user_key(), lower) == CmpOrdering::Less {
                self.entry = None;
            }
        }
    }
}
