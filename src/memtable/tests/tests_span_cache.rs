#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::arena::Arena;
    use crate::base::{Comparer, InternalKey, InternalKeyKind, SeqNum};
    use crate::batch::Batch;
    use crate::memtable::{KeySpanCache, Memtable, MemtableOptions, range_del_construct_span};
    use crate::skiplist::Skiplist;

    fn range_del_skl() -> Skiplist {
        Skiplist::new(Arc::new(Arena::new(64 * 1024)), Comparer::default().compare)
    }

    fn cache() -> KeySpanCache {
        let cmp = Comparer::default();
        KeySpanCache::new(cmp.compare, cmp.format_key, range_del_construct_span)
    }

    fn add_range_del(skl: &Skiplist, start: &[u8], end: &[u8], seq: SeqNum) {
        skl.add(
            InternalKey::new(start, seq, InternalKeyKind::RangeDelete),
            end,
        )
        .unwrap();
    }

    #[test]
    fn test_get_before_any_invalidation_is_none() {
        let skl = range_del_skl();
        let c = cache();
        assert!(c.get(&skl).is_none());
        assert_eq!(c.span_count(), 0);
    }

    #[test]
    fn test_lazy_materialization_fragments_spans() {
        let skl = range_del_skl();
        let c = cache();

        add_range_del(&skl, b"a", b"e", 10);
        add_range_del(&skl, b"c", b"g", 9);
        c.invalidate(2);

        let spans = c.get(&skl).unwrap();
        let got: Vec<(&[u8], &[u8])> = spans
            .iter()
            .map(|s| (s.start.as_slice(), s.end.as_slice()))
            .collect();
        assert_eq!(
            got,
            vec![
                (&b"a"[..], &b"c"[..]),
                (&b"c"[..], &b"e"[..]),
                (&b"e"[..], &b"g"[..]),
            ]
        );
        assert_eq!(spans[1].keys.len(), 2);
    }

    #[test]
    fn test_snapshot_is_materialized_once() {
        let skl = range_del_skl();
        let c = cache();
        add_range_del(&skl, b"a", b"c", 1);
        c.invalidate(1);

        let first = c.get(&skl).unwrap();
        let second = c.get(&skl).unwrap();
        // Same snapshot, same allocation.
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_invalidation_publishes_new_snapshot_and_keeps_old_valid() {
        let skl = range_del_skl();
        let c = cache();

        add_range_del(&skl, b"a", b"c", 1);
        c.invalidate(1);
        let old = c.get(&skl).unwrap();
        assert_eq!(old.len(), 1);

        add_range_del(&skl, b"x", b"z", 2);
        c.invalidate(1);

        let new = c.get(&skl).unwrap();
        assert_eq!(new.len(), 2);
        // The stale snapshot a reader may still hold is untouched.
        assert_eq!(old.len(), 1);
        assert!(!Arc::ptr_eq(&old, &new));
    }

    #[test]
    fn test_span_count_is_monotone() {
        let skl = range_del_skl();
        let c = cache();
        let mut last = c.span_count();
        for i in 0..10 {
            add_range_del(&skl, &[b'a' + i], &[b'a' + i + 1], SeqNum::from(i) + 1);
            c.invalidate(1);
            let count = c.span_count();
            assert!(count > last);
            last = count;
        }
        assert_eq!(last, 10);
    }

    #[test]
    fn test_memtable_range_del_iter() {
        let m = Memtable::new(MemtableOptions {
            size: 64 * 1024,
            ..MemtableOptions::default()
        });
        assert!(m.new_range_del_iter().is_none());

        let mut batch = Batch::new();
        batch.delete_range(b"a", b"e");
        batch.delete_range(b"c", b"i");
        m.prepare(&batch).unwrap();
        m.apply(&batch, 5).unwrap();
        m.writer_unref();

        let mut it = m.new_range_del_iter().unwrap();
        let s = it.first().unwrap();
        assert_eq!((s.start.as_slice(), s.end.as_slice()), (&b"a"[..], &b"c"[..]));
        assert_eq!(s.keys[0].seq_num(), 5);
        let s = it.next().unwrap();
        assert_eq!((s.start.as_slice(), s.end.as_slice()), (&b"c"[..], &b"e"[..]));
        assert_eq!(s.keys.len(), 2);
        let s = it.next().unwrap();
        assert_eq!((s.start.as_slice(), s.end.as_slice()), (&b"e"[..], &b"i"[..]));
        assert_eq!(s.keys[0].seq_num(), 6);
        assert!(it.next().is_none());
    }

    #[test]
    fn test_memtable_range_key_iter_decodes_payloads() {
        let m = Memtable::new(MemtableOptions {
            size: 64 * 1024,
            ..MemtableOptions::default()
        });
        assert!(m.new_range_key_iter().is_none());

        let mut batch = Batch::new();
        batch.range_key_set(b"a", b"m", b"@5", b"fruit");
        batch.range_key_unset(b"a", b"m", b"@3");
        m.prepare(&batch).unwrap();
        m.apply(&batch, 20).unwrap();
        m.writer_unref();

        let mut it = m.new_range_key_iter().unwrap();
        let s = it.first().unwrap();
        assert_eq!((s.start.as_slice(), s.end.as_slice()), (&b"a"[..], &b"m"[..]));
        assert_eq!(s.keys.len(), 2);
        // Descending trailer: the unset (seq 21) precedes the set (seq 20).
        assert_eq!(s.keys[0].kind(), crate::base::InternalKeyKind::RangeKeyUnset);
        assert_eq!(s.keys[0].suffix, b"@3");
        assert_eq!(s.keys[1].kind(), crate::base::InternalKeyKind::RangeKeySet);
        assert_eq!(s.keys[1].suffix, b"@5");
        assert_eq!(s.keys[1].value, b"fruit");
        assert!(it.next().is_none());
    }
}
