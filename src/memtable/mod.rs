//! # Memtable Module
//!
//! The mutable, in-memory write buffer of the storage engine.
//!
//! A memtable is implemented on top of lock-free skiplists sharing one
//! fixed-capacity [`Arena`]: a point skiplist, a range-tombstone skiplist,
//! and a range-key skiplist. Memory consumption is fixed at creation (with
//! the exception of the cached fragmented span snapshots). Records are added
//! but never removed; deletion is expressed through tombstones resolved by
//! higher layers.
//!
//! ## Write protocol
//!
//! A batch is applied in two steps: `prepare(batch)` then `apply(batch,
//! seq_num)`. Preparation is **not** thread-safe — the commit pipeline
//! serializes it — and pessimistically reserves space for the batch while
//! taking a writer reference. Application may run concurrently with other
//! applications. The caller must call [`Memtable::writer_unref`] after the
//! batch has been applied.
//!
//! ## Flush readiness
//!
//! `writer_refs` starts at 1, the reference held while the memtable is the
//! current mutable one. Each `prepare` adds one, each post-apply
//! `writer_unref` drops one; the memtable becomes flushable exactly when the
//! count reaches zero.
//!
//! ## Span caches
//!
//! Fragmenting range spans on every iterator creation would be wasteful, so
//! the fragmented view of each span skiplist is cached. Writers invalidate
//! the cache monotonically as they insert spans; the first reader of a
//! snapshot materializes it once through the [`Fragmenter`].

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam::epoch::{self, Atomic, Owned};
use thiserror::Error;
use tracing::{error, info, trace};

use crate::arena::{Arena, ArenaFull};
use crate::base::{
    Compare, Comparer, Corruption, FormatKey, InternalKey, InternalKeyKind, SeqNum,
};
use crate::batch::Batch;
use crate::keyspan::{self, Fragmenter, Key, KeysOrder, Span};
use crate::rangekey;
use crate::skiplist::{Iter, Skiplist};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Represents possible errors returned by [`Memtable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// The arena cannot absorb the batch; the commit pipeline should rotate
    /// to a fresh memtable and retry there.
    #[error(transparent)]
    ArenaFull(#[from] ArenaFull),

    /// The batch or a stored span value violates an engine invariant.
    #[error(transparent)]
    Corruption(#[from] Corruption),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Default arena capacity (4 MiB).
pub const DEFAULT_MEMTABLE_SIZE: u32 = 4 << 20;

/// Configuration for a [`Memtable`].
pub struct MemtableOptions {
    /// Arena capacity in bytes.
    pub size: u32,

    /// Floor on the sequence numbers of entries applied to this memtable.
    pub log_seq_num: SeqNum,

    /// User-key comparator bundle.
    pub comparer: Comparer,

    /// Invoked exactly once when the memtable is dropped, releasing the
    /// memory-accounting reservation taken out when it was created.
    pub release_accounting_reservation: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Default for MemtableOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_MEMTABLE_SIZE,
            log_seq_num: 0,
            comparer: Comparer::default(),
            release_accounting_reservation: None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Memtable Core
// ------------------------------------------------------------------------------------------------

/// Arena bytes resident in a fresh memtable. The skiplists allocate nodes
/// lazily, so a new arena's high-water mark is zero.
const MEMTABLE_EMPTY_SIZE: u32 = 0;

/// The mutable, in-memory write buffer of the storage engine.
///
/// It is safe to call `apply`, the iterator constructors, and the byte
/// accounting methods concurrently. `prepare` requires external
/// serialization.
pub struct Memtable {
    comparer: Comparer,
    skl: Skiplist,
    range_del_skl: Skiplist,
    range_key_skl: Skiplist,

    /// Space used by the memtable: resident data plus in-flight batch
    /// reservations. Incremented pessimistically by `prepare`; tightened to
    /// the true arena high-water by `avail_bytes` when no applies are in
    /// flight.
    reserved: AtomicU32,

    /// Write references: one held while this is the current mutable
    /// memtable, plus one per prepared-but-not-yet-retired batch. The
    /// memtable cannot be flushed until this drops to zero.
    writer_refs: AtomicI32,

    tombstones: KeySpanCache,
    range_keys: KeySpanCache,

    /// The commit pipeline's sequence number floor at creation time; every
    /// entry applied here carries a sequence number at or above it.
    log_seq_num: SeqNum,

    release_accounting_reservation: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Memtable {
    /// Creates a memtable with a freshly allocated arena.
    pub fn new(opts: MemtableOptions) -> Self {
        let MemtableOptions {
            size,
            log_seq_num,
            comparer,
            release_accounting_reservation,
        } = opts;

        let arena = Arc::new(Arena::new(size));
        let skl = Skiplist::new(Arc::clone(&arena), comparer.compare);
        let range_del_skl = Skiplist::new(Arc::clone(&arena), comparer.compare);
        let range_key_skl = Skiplist::new(Arc::clone(&arena), comparer.compare);
        let reserved = AtomicU32::new(arena.size());

        info!("memtable created: capacity={size} log_seq_num={log_seq_num}");

        Self {
            comparer,
            skl,
            range_del_skl,
            range_key_skl,
            reserved,
            writer_refs: AtomicI32::new(1),
            tombstones: KeySpanCache::new(
                comparer.compare,
                comparer.format_key,
                range_del_construct_span,
            ),
            range_keys: KeySpanCache::new(comparer.compare, comparer.format_key, rangekey::decode),
            log_seq_num,
            release_accounting_reservation,
        }
    }

    /// Reserves space for `batch` and takes a writer reference, preventing
    /// the memtable from being flushed until the batch is applied and
    /// unreferenced.
    ///
    /// Not thread-safe; the commit pipeline serializes calls. O(1).
    pub fn prepare(&self, batch: &Batch) -> Result<(), MemtableError> {
        let avail = self.avail_bytes();
        if batch.memtable_size() > u64::from(avail) {
            trace!(
                "prepare rejected: batch needs {} bytes, {avail} available",
                batch.memtable_size()
            );
            return Err(ArenaFull.into());
        }
        self.reserved
            .fetch_add(batch.memtable_size() as u32, Ordering::Relaxed);
        self.writer_ref();
        Ok(())
    }

    /// Applies `batch`, assigning sequence numbers from `seq_num` upward,
    /// one per seq-consuming record. Safe to call concurrently with other
    /// `apply` calls on the same memtable.
    ///
    /// # Panics
    ///
    /// If the batch contains ingest or excise records; those kinds must
    /// never reach a memtable.
    pub fn apply(&self, batch: &Batch, seq_num: SeqNum) -> Result<(), MemtableError> {
        if seq_num < self.log_seq_num {
            error!(
                "apply rejected: batch seqnum {seq_num} below memtable creation seqnum {}",
                self.log_seq_num
            );
            return Err(Corruption::new(format!(
                "batch seqnum {seq_num} is less than memtable creation seqnum {}",
                self.log_seq_num
            ))
            .into());
        }

        let start_seq = seq_num;
        let mut seq = seq_num;
        let mut tombstone_count = 0u32;
        let mut range_key_count = 0u32;

        let mut reader = batch.reader();
        while let Some((kind, user_key, value)) = reader.next()? {
            let ikey = InternalKey::new(user_key, seq, kind);
            match kind {
                InternalKeyKind::RangeDelete => {
                    self.range_del_skl.add(ikey, value)?;
                    tombstone_count += 1;
                }
                InternalKeyKind::RangeKeySet
                | InternalKeyKind::RangeKeyUnset
                | InternalKeyKind::RangeKeyDelete => {
                    self.range_key_skl.add(ikey, value)?;
                    range_key_count += 1;
                }
                InternalKeyKind::LogData => {
                    // Not materialized and consumes no sequence number.
                    continue;
                }
                InternalKeyKind::IngestSst | InternalKeyKind::Excise => {
                    panic!("cannot apply ingested sstable or excise keys to a memtable");
                }
                _ => self.skl.add(ikey, value)?,
            }
            seq += 1;
        }

        if seq != start_seq + SeqNum::from(batch.count()) {
            error!(
                "apply detected inconsistent batch count: applied {} vs declared {}",
                seq - start_seq,
                batch.count()
            );
            return Err(Corruption::new(format!(
                "inconsistent batch count: applied {} entries, batch declares {}",
                seq - start_seq,
                batch.count()
            ))
            .into());
        }

        if tombstone_count != 0 {
            self.tombstones.invalidate(tombstone_count);
        }
        if range_key_count != 0 {
            self.range_keys.invalidate(range_key_count);
        }
        trace!(
            "applied batch: seq=[{start_seq},{seq}) tombstones={tombstone_count} range_keys={range_key_count}"
        );
        Ok(())
    }

    fn writer_ref(&self) {
        let v = self.writer_refs.fetch_add(1, Ordering::SeqCst) + 1;
        if v <= 1 {
            panic!("inconsistent writer reference count: {v}");
        }
    }

    /// Drops a writer reference; returns true iff this call dropped the last
    /// one, making the memtable flushable.
    pub fn writer_unref(&self) -> bool {
        let v = self.writer_refs.fetch_sub(1, Ordering::SeqCst) - 1;
        if v < 0 {
            panic!("inconsistent writer reference count: {v}");
        }
        v == 0
    }

    /// Whether all writer references have been dropped.
    pub fn ready_for_flush(&self) -> bool {
        self.writer_refs.load(Ordering::SeqCst) == 0
    }

    /// Bytes still available for reservation.
    pub fn avail_bytes(&self) -> u32 {
        let arena = self.skl.arena();
        if self.writer_refs.load(Ordering::SeqCst) == 1 {
            // One ref is held as long as this is the current mutable
            // memtable, so a count of 1 means no applies are in flight and
            // the pessimistic reservation can be tightened to the bytes
            // actually allocated.
            self.reserved.store(arena.size(), Ordering::Relaxed);
        }
        arena
            .capacity()
            .saturating_sub(self.reserved.load(Ordering::Relaxed))
    }

    /// Returns an unpositioned point iterator honoring the given bounds.
    pub fn new_iter(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Iter<'_> {
        self.skl.new_iter(lower, upper)
    }

    /// Returns an unbounded point iterator for flushing.
    pub fn new_flush_iter(&self) -> Iter<'_> {
        self.skl.new_flush_iter()
    }

    /// Returns an iterator over the fragmented range tombstones, or `None`
    /// if no range tombstone was ever applied.
    pub fn new_range_del_iter(&self) -> Option<keyspan::Iter> {
        let tombstones = self.tombstones.get(&self.range_del_skl)?;
        Some(keyspan::Iter::new(self.comparer.compare, tombstones))
    }

    /// Returns an iterator over the fragmented range keys, or `None` if no
    /// range key was ever applied.
    pub fn new_range_key_iter(&self) -> Option<keyspan::Iter> {
        let range_keys = self.range_keys.get(&self.range_key_skl)?;
        Some(keyspan::Iter::new(self.comparer.compare, range_keys))
    }

    /// Whether any range key has been applied to this memtable.
    pub fn contains_range_keys(&self) -> bool {
        self.range_keys.span_count() > 0
    }

    /// Bytes of live data in the memtable.
    pub fn inuse_bytes(&self) -> u64 {
        u64::from(self.skl.size() - MEMTABLE_EMPTY_SIZE)
    }

    /// Total arena capacity.
    pub fn total_bytes(&self) -> u64 {
        u64::from(self.skl.arena().capacity())
    }

    /// Whether the memtable holds no entries of any kind.
    pub fn is_empty(&self) -> bool {
        self.skl.size() == MEMTABLE_EMPTY_SIZE
    }

    /// The sequence number floor this memtable was created with.
    pub fn log_seq_num(&self) -> SeqNum {
        self.log_seq_num
    }
}

impl Drop for Memtable {
    fn drop(&mut self) {
        // The arena buffer is released when the skiplists drop their handles.
        if let Some(release) = self.release_accounting_reservation.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Memtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memtable")
            .field("capacity", &self.skl.arena().capacity())
            .field("reserved", &self.reserved.load(Ordering::Relaxed))
            .field("writer_refs", &self.writer_refs.load(Ordering::SeqCst))
            .field("log_seq_num", &self.log_seq_num)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Span construction
// ------------------------------------------------------------------------------------------------

/// Decodes a stored span entry into a [`Span`].
type ConstructSpan = for<'a> fn(InternalKey<'a>, &'a [u8]) -> Result<Span, Corruption>;

/// A range tombstone's value is its end key; the span carries exactly one
/// key holding the tombstone's trailer.
fn range_del_construct_span(ikey: InternalKey<'_>, value: &[u8]) -> Result<Span, Corruption> {
    Ok(Span {
        start: ikey.user_key.to_vec(),
        end: value.to_vec(),
        keys: vec![Key {
            trailer: ikey.trailer,
            suffix: Vec::new(),
            value: Vec::new(),
        }],
        keys_order: KeysOrder::ByTrailerDesc,
    })
}

// ------------------------------------------------------------------------------------------------
// Span cache
// ------------------------------------------------------------------------------------------------

/// The fragmented state of one span skiplist at the moment `count` spans of
/// its kind existed in the memtable.
///
/// The span count only grows, so it serves as a logical clock: a snapshot
/// built while more spans were present than its `count` records is still
/// correct — it reflects *at least* the insertions visible at invalidation
/// time.
struct KeySpanFrags {
    count: u32,
    spans: OnceLock<Arc<[Span]>>,
}

impl KeySpanFrags {
    fn new(count: u32) -> Self {
        Self {
            count,
            spans: OnceLock::new(),
        }
    }

    /// Returns the fragmented spans, materializing them on the first call.
    /// Concurrent readers of the same snapshot block only until the first
    /// finishes the scan.
    fn get(
        &self,
        skl: &Skiplist,
        cmp: Compare,
        format_key: FormatKey,
        construct_span: ConstructSpan,
    ) -> Arc<[Span]> {
        self.spans
            .get_or_init(|| {
                let mut spans: Vec<Span> = Vec::new();
                {
                    let mut frag = Fragmenter::new(cmp, format_key, |s| spans.push(s));
                    let mut it = skl.new_flush_iter();
                    let mut kv = it.first();
                    while let Some((ikey, value)) = kv {
                        // The write path validated this entry when it was
                        // inserted; failing to decode it here is a bug.
                        let span = match construct_span(ikey, value) {
                            Ok(span) => span,
                            Err(err) => panic!("undecodable span entry in memtable: {err}"),
                        };
                        frag.add(span);
                        kv = it.next();
                    }
                    frag.finish();
                }
                Arc::from(spans)
            })
            .clone()
    }
}

/// A cache of one span skiplist's fragmented view.
///
/// Writers bump `count` and publish a fresh, empty [`KeySpanFrags`] through a
/// CAS loop; readers load the current snapshot and materialize it lazily.
/// Retired snapshots are reclaimed through epoch deferral once no reader can
/// still hold them.
struct KeySpanCache {
    count: AtomicU32,
    frags: Atomic<KeySpanFrags>,
    cmp: Compare,
    format_key: FormatKey,
    construct_span: ConstructSpan,
}

impl KeySpanCache {
    fn new(cmp: Compare, format_key: FormatKey, construct_span: ConstructSpan) -> Self {
        Self {
            count: AtomicU32::new(0),
            frags: Atomic::null(),
            cmp,
            format_key,
            construct_span,
        }
    }

    /// Invalidates the cached spans, recording that `added` spans were
    /// inserted. If a concurrent invalidation already published a snapshot
    /// with a count at or above ours, it subsumes this one.
    fn invalidate(&self, added: u32) {
        let new_count = self.count.fetch_add(added, Ordering::SeqCst) + added;
        let guard = epoch::pin();
        let mut fresh: Option<Owned<KeySpanFrags>> = None;

        loop {
            let current = self.frags.load(Ordering::Acquire, &guard);
            // SAFETY: `current` was loaded under `guard`; a retired snapshot
            // cannot be reclaimed while the guard is live.
            if let Some(frags) = unsafe { current.as_ref() } {
                if frags.count >= new_count {
                    return;
                }
            }
            let owned = fresh
                .take()
                .unwrap_or_else(|| Owned::new(KeySpanFrags::new(new_count)));
            match self.frags.compare_exchange(
                current,
                owned,
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    if !current.is_null() {
                        // SAFETY: `current` was just unlinked by the CAS and
                        // can no longer be reached by new readers.
                        unsafe { guard.defer_destroy(current) };
                    }
                    return;
                }
                Err(err) => fresh = Some(err.new),
            }
        }
    }

    /// Returns the fragmented spans of the current snapshot, or `None` if no
    /// span was ever inserted.
    fn get(&self, skl: &Skiplist) -> Option<Arc<[Span]>> {
        let guard = epoch::pin();
        let current = self.frags.load(Ordering::Acquire, &guard);
        // SAFETY: as in `invalidate`.
        unsafe { current.as_ref() }
            .map(|frags| frags.get(skl, self.cmp, self.format_key, self.construct_span))
    }

    /// Total spans recorded by invalidations so far.
    fn span_count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Drop for KeySpanCache {
    fn drop(&mut self) {
        // SAFETY: `&mut self` proves no concurrent reader exists, so the
        // unprotected guard and the immediate destruction are sound.
        unsafe {
            let guard = epoch::unprotected();
            let current = self.frags.load(Ordering::Relaxed, guard);
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}
