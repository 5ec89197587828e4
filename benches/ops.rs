//! Micro-operation benchmarks for the cache policies.
//!
//! Run with: `cargo bench --bench ops`
//!
//! Measures per-operation latency for get and insert across the policies
//! under identical conditions, plus the memoizer's hit path.

use std::hint::black_box;
use std::time::{Duration, Instant};

use boxcache::memo::Memoized;
use boxcache::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const CAPACITY: usize = 16_384;
const OPS: u64 = 100_000;

// ============================================================================
// Get Hit Latency (ns/op)
// ============================================================================

fn bench_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_hit_ns");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("fifo", |b| {
        b.iter_custom(|iters| {
            let cache = FifoCache::new(CAPACITY);
            for i in 0..CAPACITY as u64 {
                cache.insert(i, i);
            }
            let start = Instant::now();
            for _ in 0..iters {
                for i in 0..OPS {
                    black_box(cache.get(&(i % CAPACITY as u64)));
                }
            }
            start.elapsed()
        })
    });

    group.bench_function("lru", |b| {
        b.iter_custom(|iters| {
            let cache = LruCache::new(CAPACITY);
            for i in 0..CAPACITY as u64 {
                cache.insert(i, i);
            }
            let start = Instant::now();
            for _ in 0..iters {
                for i in 0..OPS {
                    black_box(cache.get(&(i % CAPACITY as u64)));
                }
            }
            start.elapsed()
        })
    });

    group.bench_function("lfu", |b| {
        b.iter_custom(|iters| {
            let cache = LfuCache::new(CAPACITY);
            for i in 0..CAPACITY as u64 {
                cache.insert(i, i);
            }
            let start = Instant::now();
            for _ in 0..iters {
                for i in 0..OPS {
                    black_box(cache.get(&(i % CAPACITY as u64)));
                }
            }
            start.elapsed()
        })
    });

    group.bench_function("ttl", |b| {
        b.iter_custom(|iters| {
            let cache = TtlCache::new(CAPACITY, Duration::from_secs(3600));
            for i in 0..CAPACITY as u64 {
                cache.insert(i, i);
            }
            let start = Instant::now();
            for _ in 0..iters {
                for i in 0..OPS {
                    black_box(cache.get(&(i % CAPACITY as u64)));
                }
            }
            start.elapsed()
        })
    });

    group.finish();
}

// ============================================================================
// Insert With Eviction (ns/op)
// ============================================================================

fn bench_insert_evict(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_evict_ns");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("fifo", |b| {
        b.iter_custom(|iters| {
            let cache = FifoCache::new(CAPACITY);
            let start = Instant::now();
            for round in 0..iters {
                for i in 0..OPS {
                    cache.insert(round * OPS + i, i);
                }
            }
            start.elapsed()
        })
    });

    group.bench_function("lru", |b| {
        b.iter_custom(|iters| {
            let cache = LruCache::new(CAPACITY);
            let start = Instant::now();
            for round in 0..iters {
                for i in 0..OPS {
                    cache.insert(round * OPS + i, i);
                }
            }
            start.elapsed()
        })
    });

    group.bench_function("rr", |b| {
        b.iter_custom(|iters| {
            let cache = RrCache::new(CAPACITY);
            let start = Instant::now();
            for round in 0..iters {
                for i in 0..OPS {
                    cache.insert(round * OPS + i, i);
                }
            }
            start.elapsed()
        })
    });

    group.finish();
}

// ============================================================================
// Zipfian-ish Mixed Workload
// ============================================================================

fn bench_mixed_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_workload_ns");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("lru_90_read", |b| {
        b.iter_custom(|iters| {
            let cache = LruCache::new(CAPACITY);
            let mut rng = StdRng::seed_from_u64(0x5eed);
            let keys: Vec<u64> = (0..OPS).map(|_| rng.gen_range(0..OPS / 4)).collect();
            let start = Instant::now();
            for _ in 0..iters {
                for (i, &key) in keys.iter().enumerate() {
                    if i % 10 == 0 {
                        cache.insert(key, key);
                    } else {
                        black_box(cache.get(&key));
                    }
                }
            }
            start.elapsed()
        })
    });

    group.finish();
}

// ============================================================================
// Memoizer Hit Path
// ============================================================================

fn bench_memo_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("memo_hit_ns");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("fifo_backed", |b| {
        b.iter_custom(|iters| {
            let memo = Memoized::new(FifoCache::new(CAPACITY), |n: &u64| n * 2);
            memo.call(7);
            let start = Instant::now();
            for _ in 0..iters {
                for _ in 0..OPS {
                    black_box(memo.call(7));
                }
            }
            start.elapsed()
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_get_hit,
    bench_insert_evict,
    bench_mixed_workload,
    bench_memo_hit
);
criterion_main!(benches);
