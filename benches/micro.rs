//! Micro-benchmarks for the write-path core.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro               # run all micro-benchmarks
//! cargo bench --bench micro -- fragment   # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};

use fluxmem::base::{Comparer, InternalKeyKind, Trailer};
use fluxmem::batch::Batch;
use fluxmem::keyspan::{Fragmenter, Key, KeysOrder, Span};
use fluxmem::memtable::{Memtable, MemtableOptions};
use fluxmem::readahead::ReadaheadState;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Default value payload (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xAB; 128];

/// Format a zero-padded key.
fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

/// Build `count` overlapping range-tombstone spans in start order.
fn make_spans(count: u64) -> Vec<Span> {
    (0..count)
        .map(|i| Span {
            start: make_key(i),
            end: make_key(i + 16),
            keys: vec![Key {
                trailer: Trailer::new(count - i, InternalKeyKind::RangeDelete),
                suffix: Vec::new(),
                value: Vec::new(),
            }],
            keys_order: KeysOrder::ByTrailerDesc,
        })
        .collect()
}

// ================================================================================================
// Fragmenter benchmarks
// ================================================================================================

fn bench_fragmenter(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmenter");
    let cmp = Comparer::default();

    for count in [64u64, 512, 4096] {
        let spans = make_spans(count);
        group.throughput(Throughput::Elements(count));
        group.bench_function(format!("overlapping/{count}"), |b| {
            b.iter_batched(
                || spans.clone(),
                |spans| {
                    let mut out = 0usize;
                    let mut frag =
                        Fragmenter::new(cmp.compare, cmp.format_key, |s| out += s.keys.len());
                    for s in spans {
                        frag.add(s);
                    }
                    frag.finish();
                    black_box(out)
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

// ================================================================================================
// Memtable benchmarks
// ================================================================================================

fn bench_memtable_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable");

    for batch_len in [16u64, 256] {
        let mut batch = Batch::new();
        for i in 0..batch_len {
            batch.set(&make_key(i), VALUE_128B);
        }
        group.throughput(Throughput::Elements(batch_len));
        group.bench_function(format!("apply/{batch_len}"), |b| {
            b.iter_batched(
                || {
                    Memtable::new(MemtableOptions {
                        size: 64 << 20,
                        ..MemtableOptions::default()
                    })
                },
                |m| {
                    m.prepare(&batch).unwrap();
                    m.apply(&batch, 1).unwrap();
                    m.writer_unref();
                    black_box(m.inuse_bytes())
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_range_del_materialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("span_cache");

    let mut batch = Batch::new();
    for i in 0..256u64 {
        batch.delete_range(&make_key(i), &make_key(i + 8));
    }
    group.throughput(Throughput::Elements(256));
    group.bench_function("materialize/256", |b| {
        b.iter_batched(
            || {
                let m = Memtable::new(MemtableOptions {
                    size: 16 << 20,
                    ..MemtableOptions::default()
                });
                m.prepare(&batch).unwrap();
                m.apply(&batch, 1).unwrap();
                m.writer_unref();
                m
            },
            |m| {
                let mut it = m.new_range_del_iter().unwrap();
                let mut count = 0;
                let mut span = it.first();
                while span.is_some() {
                    count += 1;
                    span = it.next();
                }
                black_box(count)
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

// ================================================================================================
// Readahead benchmarks
// ================================================================================================

fn bench_readahead(c: &mut Criterion) {
    let mut group = c.benchmark_group("readahead");
    group.throughput(Throughput::Elements(1024));
    group.bench_function("sequential_scan/1024", |b| {
        b.iter(|| {
            let mut rs = ReadaheadState::new(1 << 20);
            let mut issued = 0u64;
            for i in 0..1024u64 {
                if let Some(size) = rs.maybe_readahead(i * 4096, 4096) {
                    issued += size;
                }
            }
            black_box(issued)
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_fragmenter,
    bench_memtable_apply,
    bench_range_del_materialization,
    bench_readahead
);
criterion_main!(benches);
