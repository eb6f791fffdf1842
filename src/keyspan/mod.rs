//! # Keyspan Module
//!
//! Range spans and their fragmentation.
//!
//! A [`Span`] is a half-open user-key interval `[start, end)` carrying one or
//! more [`Key`]s (range tombstones or range keys). Spans written by clients
//! may overlap arbitrarily; before they can be iterated alongside point keys
//! they must be *fragmented* into non-overlapping intervals. The
//! [`Fragmenter`] performs that transformation on a start-sorted stream of
//! spans, and [`Iter`] provides seekable iteration over an immutable snapshot
//! of fragments.
//!
//! ## Design Invariants
//!
//! - Spans are added to the fragmenter in non-decreasing start-key order.
//! - A span's keys are sorted by descending trailer before it is added.
//! - Emitted fragments appear in non-decreasing start-key order; fragments
//!   sharing a start key never overlap.
//! - Emitted key slices are independent copies; consumers may retain them
//!   indefinitely.
//!
//! Violations of the first two are programmer errors and panic.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::mem;
use std::sync::Arc;

use crate::base::{Compare, FormatKey, InternalKeyKind, SeqNum, Trailer};

// ------------------------------------------------------------------------------------------------
// Spans and keys
// ------------------------------------------------------------------------------------------------

/// A single keyed payload of a span: the trailer plus an optional suffix and
/// value. Range tombstones carry neither; range keys may carry both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    /// Packed `(seq_num, kind)`.
    pub trailer: Trailer,

    /// Range-key suffix; empty for range tombstones.
    pub suffix: Vec<u8>,

    /// Range-key value; empty for range tombstones and unsets.
    pub value: Vec<u8>,
}

impl Key {
    /// The sequence number component.
    pub fn seq_num(&self) -> SeqNum {
        self.trailer.seq_num()
    }

    /// The kind component.
    pub fn kind(&self) -> InternalKeyKind {
        self.trailer.kind()
    }
}

/// The ordering of a span's `keys` sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeysOrder {
    /// Sorted by descending trailer: newest first. Required on fragmenter
    /// input and guaranteed on fragmenter output.
    #[default]
    ByTrailerDesc,

    /// Sorted by ascending suffix; used by range-key coalescing above this
    /// layer.
    BySuffixAsc,
}

/// A half-open user-key interval `[start, end)` and the keys applying over
/// its entirety.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Span {
    /// Inclusive start of the interval.
    pub start: Vec<u8>,

    /// Exclusive end of the interval.
    pub end: Vec<u8>,

    /// The keyed payloads; every key applies to the whole interval.
    pub keys: Vec<Key>,

    /// How `keys` is ordered.
    pub keys_order: KeysOrder,
}

impl Span {
    /// Whether the span carries no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The largest sequence number among the span's keys. For a span in
    /// descending-trailer order this is the first key's.
    pub fn largest_seq_num(&self) -> Option<SeqNum> {
        self.keys.iter().map(Key::seq_num).max()
    }
}

/// Sorts keys by descending trailer, preserving input order for equal
/// trailers.
pub fn sort_keys_by_trailer_desc(keys: &mut [Key]) {
    keys.sort_by(|a, b| b.trailer.cmp(&a.trailer));
}

/// Sorts spans by ascending end key, preserving input order for ties.
pub fn sort_spans_by_end_key(cmp: Compare, spans: &mut [Span]) {
    spans.sort_by(|a, b| cmp(&a.end, &b.end));
}

// ------------------------------------------------------------------------------------------------
// Fragmenter
// ------------------------------------------------------------------------------------------------

/// Fragments a start-sorted stream of possibly overlapping spans into
/// non-overlapping fragments, handed to the `emit` callback in
/// non-decreasing start-key order.
///
/// Given the spans
///
/// ```text
/// a---e
///   c---g
///   c-----i
///          j---n
///          j-l
/// ```
///
/// the emitted fragments are
///
/// ```text
/// a-c-e
///   c-e-g
///   c-e-g-i
///          j-l-n
///          j-l
/// ```
///
/// Once a start key has been seen, no smaller start key can arrive, so all
/// pending fragments lying before it are flushed. Within each emitted
/// fragment, keys are sorted by descending trailer, and the key slice is an
/// independent copy the consumer may keep.
pub struct Fragmenter<F: FnMut(Span)> {
    cmp: Compare,
    format_key: FormatKey,
    emit: F,
    /// Spans sharing the same start key, not yet fragmented on their end
    /// keys. That happens as they are flushed.
    pending: Vec<Span>,
    /// The key up to which fragments have been emitted. Any later `add` must
    /// have a start key at or after it.
    flushed_key: Option<Vec<u8>>,
    finished: bool,
}

impl<F: FnMut(Span)> Fragmenter<F> {
    /// Creates a fragmenter emitting fragments through `emit`.
    pub fn new(cmp: Compare, format_key: FormatKey, emit: F) -> Self {
        Self {
            cmp,
            format_key,
            emit,
            pending: Vec::new(),
            flushed_key: None,
            finished: false,
        }
    }

    /// Adds a span. Spans may overlap; they must arrive in non-decreasing
    /// start-key order with keys sorted by descending trailer. Empty spans
    /// (`start >= end`) are dropped.
    ///
    /// # Panics
    ///
    /// If the fragmenter is finished, the span's keys are not in descending
    /// trailer order, or its start key regresses below an earlier start or
    /// the flushed key.
    pub fn add(&mut self, span: Span) {
        if self.finished {
            panic!("span fragmenter already finished");
        }
        if span.keys_order != KeysOrder::ByTrailerDesc {
            panic!("span keys not in trailer descending order");
        }
        if let Some(flushed) = &self.flushed_key {
            if (self.cmp)(&span.start, flushed) == Ordering::Less {
                panic!(
                    "start key ({}) < flushed key ({})",
                    (self.format_key)(&span.start),
                    (self.format_key)(flushed)
                );
            }
        }
        if (self.cmp)(&span.start, &span.end) != Ordering::Less {
            // An empty span; nothing to fragment.
            return;
        }

        if !self.pending.is_empty() {
            // All pending spans share a start key; comparing against the
            // first suffices.
            match (self.cmp)(&self.pending[0].start, &span.start) {
                Ordering::Greater => panic!(
                    "spans must be added in start key order: {} > {}",
                    (self.format_key)(&self.pending[0].start),
                    (self.format_key)(&span.start)
                ),
                Ordering::Equal => {
                    self.pending.push(span);
                    return;
                }
                // The new start key is past the pending cluster; flush it.
                Ordering::Less => self.truncate_and_flush(&span.start),
            }
        }

        self.pending.push(span);
    }

    /// Whether all spans added so far have been flushed.
    pub fn is_empty(&self) -> bool {
        self.finished || self.pending.is_empty()
    }

    /// The shared start key of the pending spans, if any.
    pub fn start(&self) -> Option<&[u8]> {
        self.pending.first().map(|s| s.start.as_slice())
    }

    /// Flushes all pending fragments lying before `key` (exclusive),
    /// retaining the parts of spans that continue at or past it.
    pub fn truncate(&mut self, key: &[u8]) {
        if !self.pending.is_empty() {
            self.truncate_and_flush(key);
        }
    }

    /// Flushes all remaining fragments. Adding spans afterwards is a
    /// programmer error.
    pub fn finish(&mut self) {
        if self.finished {
            panic!("span fragmenter already finished");
        }
        let pending = mem::take(&mut self.pending);
        self.flush(pending, None);
        self.finished = true;
    }

    fn truncate_and_flush(&mut self, key: &[u8]) {
        self.flushed_key = Some(key.to_vec());
        let pending = mem::take(&mut self.pending);
        let mut done = Vec::new();

        for span in pending {
            if (self.cmp)(key, &span.end) == Ordering::Less {
                //   span: a--+--e
                //    key:    c
                if (self.cmp)(&span.start, key) == Ordering::Less {
                    done.push(Span {
                        start: span.start.clone(),
                        end: key.to_vec(),
                        keys: span.keys.clone(),
                        keys_order: KeysOrder::ByTrailerDesc,
                    });
                }
                self.pending.push(Span {
                    start: key.to_vec(),
                    end: span.end,
                    keys: span.keys,
                    keys_order: KeysOrder::ByTrailerDesc,
                });
            } else {
                //   span: a-----e
                //    key:       e
                done.push(span);
            }
        }

        self.flush(done, None);
    }

    /// Flushes a group of spans sharing a start key, splitting them on their
    /// end keys. The smallest remaining end key is always the next split
    /// point; spans that do not end there contribute their keys to the
    /// current fragment and survive, re-anchored, into the next iteration.
    /// With a `last_key`, flushing stops once a split point moves past it.
    fn flush(&mut self, mut buf: Vec<Span>, last_key: Option<&[u8]>) {
        sort_spans_by_end_key(self.cmp, &mut buf);

        while !buf.is_empty() {
            // A prefix of spans ends at the split point; `remove` counts it.
            let mut remove = 1;
            let split = buf[0].end.clone();
            let mut flush_buf = buf[0].keys.clone();

            for span in &buf[1..] {
                if (self.cmp)(&split, &span.end) == Ordering::Equal {
                    remove += 1;
                }
                flush_buf.extend(span.keys.iter().cloned());
            }

            sort_keys_by_trailer_desc(&mut flush_buf);

            (self.emit)(Span {
                start: buf[0].start.clone(),
                end: split.clone(),
                keys: flush_buf,
                keys_order: KeysOrder::ByTrailerDesc,
            });

            if let Some(last) = last_key {
                if (self.cmp)(&split, last) == Ordering::Greater {
                    break;
                }
            }

            buf.drain(..remove);
            for span in &mut buf {
                span.start = split.clone();
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Fragment iterator
// ------------------------------------------------------------------------------------------------

/// A seekable iterator over an immutable, start-sorted snapshot of
/// non-overlapping fragments.
///
/// Starts unpositioned; `next` from the unpositioned state lands on the
/// first fragment.
pub struct Iter {
    cmp: Compare,
    spans: Arc<[Span]>,
    pos: isize,
}

impl Iter {
    /// Creates an iterator over a fragment snapshot.
    pub fn new(cmp: Compare, spans: Arc<[Span]>) -> Self {
        Self {
            cmp,
            spans,
            pos: -1,
        }
    }

    /// Number of fragments in the snapshot.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Whether the snapshot holds no fragments.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Positions at the first fragment.
    pub fn first(&mut self) -> Option<&Span> {
        self.pos = 0;
        self.get()
    }

    /// Positions at the last fragment.
    pub fn last(&mut self) -> Option<&Span> {
        self.pos = self.spans.len() as isize - 1;
        self.get()
    }

    /// Advances to the next fragment.
    pub fn next(&mut self) -> Option<&Span> {
        if self.pos < self.spans.len() as isize {
            self.pos += 1;
        }
        self.get()
    }

    /// Steps back to the previous fragment.
    pub fn prev(&mut self) -> Option<&Span> {
        if self.pos >= 0 {
            self.pos -= 1;
        }
        self.get()
    }

    /// Positions at the first fragment whose interval covers a key `>= key`,
    /// i.e. the first fragment with `end > key`.
    pub fn seek_ge(&mut self, key: &[u8]) -> Option<&Span> {
        self.pos = self
            .spans
            .partition_point(|s| (self.cmp)(&s.end, key) != Ordering::Greater)
            as isize;
        self.get()
    }

    /// Positions at the last fragment with `start < key`.
    pub fn seek_lt(&mut self, key: &[u8]) -> Option<&Span> {
        self.pos = self
            .spans
            .partition_point(|s| (self.cmp)(&s.start, key) == Ordering::Less)
            as isize
            - 1;
        self.get()
    }

    fn get(&self) -> Option<&Span> {
        if self.pos >= 0 && (self.pos as usize) < self.spans.len() {
            Some(&self.spans[self.pos as usize])
        } else {
            None
        }
    }
}
