//! Benchmark for segmented-array growth.

use criterion::{criterion_group, criterion_main, Criterion};
use loam_gc::{GcConfig, GcHeap, Mutator, NoRoots, SegmentedArray, Value};

fn push_n(n: u32) {
    let mut heap = GcHeap::new(
        GcConfig::default()
            .with_strict(false)
            .with_initial_heap_size(32 << 20),
    );
    let mut roots = NoRoots;
    let scope = heap.enter_scope();
    let array = SegmentedArray::create(&mut Mutator::new(&mut heap, &mut roots), 0).unwrap();
    let this = heap.make_handle(Value::Cell(array));
    for i in 0..n {
        SegmentedArray::push_back(
            &mut Mutator::new(&mut heap, &mut roots),
            this,
            Value::Number(f64::from(i)),
        )
        .unwrap();
    }
    heap.exit_scope(scope);
}

fn bench_push(c: &mut Criterion) {
    c.bench_function("segmented_array_push_10k", |b| {
        b.iter(|| push_n(std::hint::black_box(10_000)));
    });
    c.bench_function("segmented_array_push_inline_only", |b| {
        b.iter(|| push_n(std::hint::black_box(4)));
    });
}

criterion_group!(benches, bench_push);
criterion_main!(benches);
