#[cfg(test)]
mod tests {
    use crate::base::{Comparer, InternalKeyKind, SeqNum, Trailer};
    use crate::keyspan::{Fragmenter, Key, KeysOrder, Span};

    /// A range-tombstone span carrying one key per sequence number, newest
    /// first.
    fn span(start: &[u8], end: &[u8], seqs: &[SeqNum]) -> Span {
        Span {
            start: start.to_vec(),
            end: end.to_vec(),
            keys: seqs
                .iter()
                .map(|&seq| Key {
                    trailer: Trailer::new(seq, InternalKeyKind::RangeDelete),
                    suffix: Vec::new(),
                    value: Vec::new(),
                })
                .collect(),
            keys_order: KeysOrder::ByTrailerDesc,
        }
    }

    fn seqs(s: &Span) -> Vec<SeqNum> {
        s.keys.iter().map(Key::seq_num).collect()
    }

    fn fragment(input: Vec<Span>) -> Vec<Span> {
        let cmp = Comparer::default();
        let mut out = Vec::new();
        let mut frag = Fragmenter::new(cmp.compare, cmp.format_key, |s| out.push(s));
        for s in input {
            frag.add(s);
        }
        frag.finish();
        out
    }

    #[test]
    fn test_overlapping_spans_fragment_at_overlap_points() {
        let out = fragment(vec![
            span(b"a", b"e", &[10]),
            span(b"c", b"g", &[9]),
            span(b"c", b"i", &[8]),
            span(b"j", b"n", &[7]),
            span(b"j", b"l", &[6]),
        ]);

        let got: Vec<(&[u8], &[u8], Vec<SeqNum>)> = out
            .iter()
            .map(|s| (s.start.as_slice(), s.end.as_slice(), seqs(s)))
            .collect();
        assert_eq!(
            got,
            vec![
                (&b"a"[..], &b"c"[..], vec![10]),
                (&b"c"[..], &b"e"[..], vec![10, 9, 8]),
                (&b"e"[..], &b"g"[..], vec![9, 8]),
                (&b"g"[..], &b"i"[..], vec![8]),
                (&b"j"[..], &b"l"[..], vec![7, 6]),
                (&b"l"[..], &b"n"[..], vec![7]),
            ]
        );
    }

    #[test]
    fn test_truncate_splits_pending_spans() {
        let cmp = Comparer::default();
        let out = std::cell::RefCell::new(Vec::new());
        let mut frag =
            Fragmenter::new(cmp.compare, cmp.format_key, |s| out.borrow_mut().push(s));

        frag.add(span(b"a", b"z", &[5]));
        frag.truncate(b"m");
        {
            let emitted = out.borrow();
            assert_eq!(emitted.len(), 1);
            assert_eq!(emitted[0].start, b"a");
            assert_eq!(emitted[0].end, b"m");
            assert_eq!(seqs(&emitted[0]), vec![5]);
        }

        frag.finish();
        drop(frag);
        let emitted = out.into_inner();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[1].start, b"m");
        assert_eq!(emitted[1].end, b"z");
        assert_eq!(seqs(&emitted[1]), vec![5]);
    }

    #[test]
    fn test_empty_span_is_dropped() {
        let out = fragment(vec![span(b"c", b"c", &[3]), span(b"c", b"a", &[2])]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_identical_bounds_merge_into_one_fragment() {
        let out = fragment(vec![span(b"a", b"d", &[4]), span(b"a", b"d", &[2])]);
        assert_eq!(out.len(), 1);
        assert_eq!(seqs(&out[0]), vec![4, 2]);
    }

    #[test]
    fn test_disjoint_spans_pass_through() {
        let out = fragment(vec![span(b"a", b"b", &[1]), span(b"x", b"z", &[2])]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].start, b"a");
        assert_eq!(out[1].start, b"x");
    }

    #[test]
    fn test_emitted_keys_are_owned_copies() {
        let out = fragment(vec![span(b"a", b"e", &[10]), span(b"c", b"g", &[9])]);
        let mut mutated = out.clone();

        // Mutating one fragment's keys must not affect another fragment
        // built from the same source span.
        mutated[1].keys.clear();
        assert_eq!(seqs(&out[1]), vec![10, 9]);
        assert_eq!(seqs(&out[2]), vec![9]);
    }

    #[test]
    fn test_is_empty_and_start_track_pending() {
        let cmp = Comparer::default();
        let mut frag = Fragmenter::new(cmp.compare, cmp.format_key, |_| {});
        assert!(frag.is_empty());
        assert_eq!(frag.start(), None);

        frag.add(span(b"k", b"p", &[1]));
        assert!(!frag.is_empty());
        assert_eq!(frag.start(), Some(&b"k"[..]));

        frag.finish();
        assert!(frag.is_empty());
    }

    #[test]
    #[should_panic(expected = "already finished")]
    fn test_add_after_finish_panics() {
        let cmp = Comparer::default();
        let mut frag = Fragmenter::new(cmp.compare, cmp.format_key, |_| {});
        frag.finish();
        frag.add(span(b"a", b"b", &[1]));
    }

    #[test]
    #[should_panic(expected = "start key order")]
    fn test_start_key_regression_panics() {
        let cmp = Comparer::default();
        let mut frag = Fragmenter::new(cmp.compare, cmp.format_key, |_| {});
        frag.add(span(b"m", b"p", &[2]));
        frag.add(span(b"a", b"b", &[1]));
    }

    #[test]
    #[should_panic(expected = "flushed key")]
    fn test_start_below_flushed_key_panics() {
        let cmp = Comparer::default();
        let mut frag = Fragmenter::new(cmp.compare, cmp.format_key, |_| {});
        frag.add(span(b"a", b"z", &[2]));
        frag.truncate(b"m");
        frag.add(span(b"c", b"d", &[1]));
    }

    #[test]
    #[should_panic(expected = "trailer descending")]
    fn test_wrong_keys_order_panics() {
        let cmp = Comparer::default();
        let mut frag = Fragmenter::new(cmp.compare, cmp.format_key, |_| {});
        let mut s = span(b"a", b"b", &[1]);
        s.keys_order = KeysOrder::BySuffixAsc;
        frag.add(s);
    }
}
