//! # Arena Module
//!
//! A fixed-capacity byte arena with a lock-free bump allocator. The arena
//! backs a memtable's skiplists: key and value bytes are copied into it on
//! insert, and its high-water mark is the authoritative measure of how much
//! of the memtable's budget is in use.
//!
//! ## Concurrency
//!
//! Allocation is a single atomic fetch-add; each successful allocation hands
//! its caller an exclusive, disjoint region of the buffer. Once written, a
//! region is immutable and may be read from any thread.
//!
//! ## Capacity
//!
//! The buffer is allocated once at construction and never grows. When an
//! allocation does not fit, [`ArenaFull`] is returned and the caller is
//! expected to rotate to a fresh memtable.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// The arena does not have room for the requested allocation.
///
/// Recoverable: the commit pipeline reacts by rotating to a new memtable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("arena full")]
pub struct ArenaFull;

// ------------------------------------------------------------------------------------------------
// Arena
// ------------------------------------------------------------------------------------------------

/// Worst-case per-entry bookkeeping of the skiplist layered on top of the
/// arena (node header plus a full-height tower). Charged by
/// [`Arena::max_node_size`] so batch reservations stay pessimistic relative
/// to the bytes an insert actually consumes.
const MAX_NODE_OVERHEAD: u64 = 192;

/// A fixed-capacity bump arena.
pub struct Arena {
    cap: u32,
    /// Allocation high-water mark. Kept as a `u64` so failed allocations
    /// past the end cannot wrap the counter.
    len: AtomicU64,
    ptr: *mut u8,
}

// SAFETY: the buffer behind `ptr` is owned by the arena for its whole
// lifetime. `alloc` hands out disjoint regions exactly once, writes happen
// only through `copy_slice`/`copy_pair` into a region's single owner, and
// regions are immutable afterwards.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Allocates a new arena with a buffer of exactly `capacity` bytes.
    pub fn new(capacity: u32) -> Self {
        let buf = vec![0u8; capacity as usize].into_boxed_slice();
        let ptr = Box::into_raw(buf).cast::<u8>();
        Self {
            cap: capacity,
            len: AtomicU64::new(0),
            ptr,
        }
    }

    /// Reserves `size` bytes, returning the offset of the new region.
    pub fn alloc(&self, size: u32) -> Result<u32, ArenaFull> {
        let offset = self.len.fetch_add(u64::from(size), Ordering::Relaxed);
        if offset + u64::from(size) > u64::from(self.cap) {
            return Err(ArenaFull);
        }
        Ok(offset as u32)
    }

    /// Copies `data` into a freshly allocated region and returns the
    /// arena-resident slice.
    pub fn copy_slice(&self, data: &[u8]) -> Result<&[u8], ArenaFull> {
        let offset = self.alloc(data.len() as u32)?;
        // SAFETY: `alloc` made `[offset, offset + len)` exclusively ours.
        unsafe {
            let dst = self.ptr.add(offset as usize);
            ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
            Ok(slice::from_raw_parts(dst, data.len()))
        }
    }

    /// Copies two slices into one contiguous region, returning both
    /// arena-resident slices. Used by the skiplist to keep an entry's key
    /// and value adjacent.
    pub fn copy_pair<'a>(&'a self, a: &[u8], b: &[u8]) -> Result<(&'a [u8], &'a [u8]), ArenaFull> {
        let total = a.len() + b.len();
        let offset = self.alloc(total as u32)?;
        // SAFETY: as in `copy_slice`; the two copies target disjoint halves
        // of the region.
        unsafe {
            let dst_a = self.ptr.add(offset as usize);
            let dst_b = dst_a.add(a.len());
            ptr::copy_nonoverlapping(a.as_ptr(), dst_a, a.len());
            ptr::copy_nonoverlapping(b.as_ptr(), dst_b, b.len());
            Ok((
                slice::from_raw_parts(dst_a, a.len()),
                slice::from_raw_parts(dst_b, b.len()),
            ))
        }
    }

    /// Bytes allocated so far, clamped to the capacity.
    pub fn size(&self) -> u32 {
        self.len
            .load(Ordering::Acquire)
            .min(u64::from(self.cap)) as u32
    }

    /// Total buffer size in bytes.
    pub fn capacity(&self) -> u32 {
        self.cap
    }

    /// Pessimistic upper bound on the footprint of inserting one entry with
    /// the given key and value sizes, including skiplist bookkeeping.
    ///
    /// Batch size accounting sums this over all entries; the estimate is
    /// always at least the bytes the insert actually takes out of the arena.
    pub fn max_node_size(key_size: u32, value_size: u32) -> u64 {
        u64::from(key_size) + u64::from(value_size) + MAX_NODE_OVERHEAD
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `Box::into_raw` of a `cap`-sized boxed
        // slice in `new`, and is released exactly once here.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.ptr,
                self.cap as usize,
            )));
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.cap)
            .field("size", &self.size())
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_copy_slice_round_trips() {
        let arena = Arena::new(1024);
        let s = arena.copy_slice(b"hello arena").unwrap();
        assert_eq!(s, b"hello arena");
        assert_eq!(arena.size(), 11);
    }

    #[test]
    fn test_copy_pair_is_contiguous_but_disjoint() {
        let arena = Arena::new(1024);
        let (k, v) = arena.copy_pair(b"key", b"value").unwrap();
        assert_eq!(k, b"key");
        assert_eq!(v, b"value");
        assert_eq!(arena.size(), 8);
    }

    #[test]
    fn test_alloc_past_capacity_fails() {
        let arena = Arena::new(16);
        assert!(arena.copy_slice(&[0u8; 12]).is_ok());
        assert_eq!(arena.copy_slice(&[0u8; 8]), Err(ArenaFull));
        // A failed allocation leaves the arena full for good.
        assert_eq!(arena.size(), 16);
    }

    #[test]
    fn test_concurrent_allocations_are_disjoint() {
        let arena = Arc::new(Arena::new(64 * 1024));
        let mut handles = Vec::new();
        for t in 0..8u8 {
            let arena = Arc::clone(&arena);
            handles.push(thread::spawn(move || {
                let payload = [t; 64];
                for _ in 0..100 {
                    let s = arena.copy_slice(&payload).unwrap();
                    assert!(s.iter().all(|&b| b == t));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(arena.size(), 8 * 100 * 64);
    }

    #[test]
    fn test_max_node_size_dominates_actual_usage() {
        let arena = Arena::new(4096);
        let before = arena.size();
        arena.copy_pair(b"some-key", b"some-value").unwrap();
        let used = u64::from(arena.size() - before);
        assert!(Arena::max_node_size(8 + 8, 10) >= used);
    }
}
