use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::Rng;
use std::sync::Arc;

// Reference the main crate
extern crate pagebuf;

use pagebuf::config::BufferConfig;
use pagebuf::{FaultHandler, MappedMemory, PageEngine};

const PAGE: usize = 4096;

fn bench_config(buffer_size: usize) -> BufferConfig {
    BufferConfig {
        buffer_size,
        num_fillers: 2,
        num_evictors: 2,
        ..BufferConfig::default()
    }
}

fn engine_over(num_pages: usize, buffer_size: usize) -> (PageEngine, Arc<MappedMemory>) {
    let memory = Arc::new(MappedMemory::reserve(num_pages * PAGE).unwrap());
    let fault: Arc<dyn FaultHandler> = memory.clone();
    let engine = PageEngine::new(bench_config(buffer_size), fault).unwrap();
    engine.map_region(memory.base(), num_pages * PAGE, None, 0).unwrap();
    (engine, memory)
}

// Faults on pages that are already resident
pub fn bench_resident_faults(c: &mut Criterion) {
    let (engine, memory) = engine_over(64, 128);
    for n in 0..64 {
        engine.handle_fault(memory.base() + n * PAGE, false).unwrap();
    }

    let mut rng = rand::thread_rng();
    c.bench_function("resident_fault", |b: &mut criterion::Bencher| {
        b.iter(|| {
            let n = rng.gen_range(0..64);
            engine.handle_fault(black_box(memory.base() + n * PAGE), false).unwrap()
        })
    });
    engine.shutdown();
}

// Faults over a region eight times the buffer, forcing steady eviction
pub fn bench_evicting_faults(c: &mut Criterion) {
    let (engine, memory) = engine_over(2048, 256);

    let mut rng = rand::thread_rng();
    let mut group = c.benchmark_group("EvictingFaults");
    group.bench_function("read", |b: &mut criterion::Bencher| {
        b.iter(|| {
            let n = rng.gen_range(0..2048);
            engine.handle_fault(black_box(memory.base() + n * PAGE), false).unwrap()
        })
    });
    group.bench_function("write", |b: &mut criterion::Bencher| {
        b.iter(|| {
            let n = rng.gen_range(0..2048);
            engine.handle_fault(black_box(memory.base() + n * PAGE), true).unwrap()
        })
    });
    group.finish();
    engine.shutdown();
}

criterion_group!(benches, bench_resident_faults, bench_evicting_faults);
criterion_main!(benches);
