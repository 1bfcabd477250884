//! Arena allocation benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vmarena::alloc::{Allocator, Heap};
use vmarena::arena::{Arena, ArenaConfig};
use vmarena::scratch::Scratch;

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_push_pop");

    for size in [16usize, 256, 4096] {
        let mut arena = Arena::from_vmem(64 << 20, ArenaConfig::lazy()).unwrap();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let marker = arena.scope();
                std::hint::black_box(arena.push_bytes(size, 16, false));
                arena.pop_to(marker);
            });
        });
    }

    group.finish();
}

fn bench_allocator_backends(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator_alloc_dealloc");
    group.throughput(Throughput::Elements(1));

    let mut arena = Arena::from_vmem(64 << 20, ArenaConfig::lazy()).unwrap();
    group.bench_function("arena", |b| {
        b.iter(|| {
            let buffer = arena.alloc(256);
            arena.dealloc(std::hint::black_box(buffer));
        });
    });

    let mut heap = Heap;
    group.bench_function("heap", |b| {
        b.iter(|| {
            let buffer = heap.alloc(256);
            heap.dealloc(std::hint::black_box(buffer));
        });
    });

    group.finish();
}

fn bench_scratch_scope(c: &mut Criterion) {
    let mut group = c.benchmark_group("scratch_scope");
    group.throughput(Throughput::Elements(1));

    Scratch::preallocate(1 << 20, 1);
    group.bench_function("acquire_push_release", |b| {
        b.iter(|| {
            let scratch = Scratch::acquire(4096, &[]);
            std::hint::black_box(scratch.push_bytes(1024, 16, false));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_push_pop,
    bench_allocator_backends,
    bench_scratch_scope
);
criterion_main!(benches);
