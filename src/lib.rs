//! # fluxmem
//!
//! The concurrent, in-memory write path of an **LSM-tree storage engine**:
//! arena-backed memtables, range-span fragmentation, lazy span caching, and
//! the readahead heuristic used by the read paths layered on top.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     Commit pipeline (external)             │
//! │        prepare ──► seq_num assignment ──► apply            │
//! └────────────┬───────────────────────────────┬───────────────┘
//!              │                               │
//! ┌────────────▼───────────────────────────────▼───────────────┐
//! │                         Memtable                           │
//! │  ┌───────────┐   ┌──────────────┐   ┌──────────────┐      │
//! │  │  points   │   │ range dels   │   │  range keys  │      │
//! │  │ skiplist  │   │  skiplist    │   │   skiplist   │      │
//! │  └─────┬─────┘   └──────┬───────┘   └──────┬───────┘      │
//! │        │                │    shared arena  │              │
//! │        │         ┌──────▼───────┐  ┌───────▼──────┐       │
//! │        │         │ span cache   │  │ span cache   │       │
//! │        │         │ (fragmented) │  │ (fragmented) │       │
//! │        │         └──────────────┘  └──────────────┘       │
//! └────────┼───────────────────────────────────────────────────┘
//!          │ flush iterators
//! ┌────────▼───────────────────────────────────────────────────┐
//! │            SSTable writer / WAL / compaction (external)    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`memtable`] | Arena-backed write buffer: batch prepare/apply, writer refs, span caches |
//! | [`keyspan`] | Range spans, the overlap fragmenter, and fragment iteration |
//! | [`skiplist`] | Lock-free ordered map of internal keys over a shared arena |
//! | [`arena`] | Fixed-capacity bump arena with lock-free allocation |
//! | [`batch`] | Ordered mutation batches with pessimistic size accounting |
//! | [`rangekey`] | Range-key span value encodings |
//! | [`base`] | Internal keys, kinds, trailers, comparators |
//! | [`bytealloc`] | Chunked bump allocation of short-lived byte slices |
//! | [`readahead`] | Sequential-read detector with geometric prefetch growth |
//! | [`writable`] | Scoped buffered writing with explicit finish/abort |
//!
//! ## Key Properties
//!
//! - **Fixed memory footprint** — a memtable's arena is allocated once;
//!   running out of room is a recoverable signal to rotate memtables.
//! - **Concurrent application** — batches apply in parallel on lock-free
//!   skiplists; only space reservation is serialized.
//! - **Iterable range spans** — overlapping range tombstones and range keys
//!   are fragmented into non-overlapping spans, cached per memtable, and
//!   invalidated monotonically by writers.
//! - **Flush readiness by reference counting** — a memtable becomes
//!   flushable exactly when its last writer reference is dropped.
//!
//! ## Quick Start
//!
//! ```rust
//! use fluxmem::batch::Batch;
//! use fluxmem::memtable::{Memtable, MemtableOptions};
//!
//! let memtable = Memtable::new(MemtableOptions::default());
//!
//! let mut batch = Batch::new();
//! batch.set(b"hello", b"world");
//! batch.delete_range(b"a", b"c");
//!
//! memtable.prepare(&batch).unwrap();
//! memtable.apply(&batch, 1).unwrap();
//! memtable.writer_unref();
//!
//! // Point lookups and scans go through the point iterator.
//! let mut iter = memtable.new_iter(None, None);
//! let (key, value) = iter.first().unwrap();
//! assert_eq!(key.user_key, b"hello");
//! assert_eq!(value, b"world");
//!
//! // Range tombstones surface as non-overlapping fragments.
//! let mut tombstones = memtable.new_range_del_iter().unwrap();
//! let span = tombstones.first().unwrap();
//! assert_eq!((span.start.as_slice(), span.end.as_slice()), (&b"a"[..], &b"c"[..]));
//! ```

pub mod arena;
pub mod base;
pub mod batch;
pub mod bytealloc;
pub mod keyspan;
pub mod memtable;
pub mod rangekey;
pub mod readahead;
pub mod skiplist;
pub mod writable;
