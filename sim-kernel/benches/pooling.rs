// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Benchmarks for object pooling
//!
//! Measures acquire/release cycles of pooled buffers against allocating a
//! fresh buffer every time, and the cost of going through the keyed registry.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use glam::DVec3;
use sim_kernel::pool::{ObjectPool, PoolConfig, PoolRegistry};

const TRAIL_LEN: usize = 64;

fn trail_pool(config: PoolConfig) -> ObjectPool<Vec<DVec3>> {
    ObjectPool::new(
        "trails",
        || Vec::with_capacity(TRAIL_LEN),
        |trail: &mut Vec<DVec3>| trail.clear(),
        config,
    )
}

fn fill(trail: &mut Vec<DVec3>) {
    for i in 0..TRAIL_LEN {
        trail.push(DVec3::splat(i as f64));
    }
}

fn bench_pool_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_cycle");

    for burst in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*burst as u64));

        group.bench_with_input(BenchmarkId::new("pooled", burst), burst, |b, &burst| {
            let mut pool = trail_pool(PoolConfig::new(burst, burst));
            let mut handles = Vec::with_capacity(burst);
            b.iter(|| {
                for _ in 0..burst {
                    let handle = pool.acquire().unwrap();
                    if let Some(trail) = pool.get_mut(handle) {
                        fill(trail);
                    }
                    handles.push(handle);
                }
                for handle in handles.drain(..) {
                    pool.release(handle).unwrap();
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("allocating", burst), burst, |b, &burst| {
            let mut live = Vec::with_capacity(burst);
            b.iter(|| {
                for _ in 0..burst {
                    let mut trail = Vec::with_capacity(TRAIL_LEN);
                    fill(&mut trail);
                    live.push(trail);
                }
                black_box(live.len());
                live.clear();
            });
        });
    }

    group.finish();
}

fn bench_pool_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_pressure");

    // bursts twice the pool size, half served by overflow instances
    for max_size in [16, 256].iter() {
        group.bench_with_input(
            BenchmarkId::new("overflow", max_size),
            max_size,
            |b, &max_size| {
                let mut pool = trail_pool(PoolConfig::new(max_size, max_size));
                let mut handles = Vec::with_capacity(max_size * 2);
                b.iter(|| {
                    for _ in 0..max_size * 2 {
                        handles.push(pool.acquire().unwrap());
                    }
                    for handle in handles.drain(..) {
                        pool.release(handle).unwrap();
                    }
                });
                black_box(pool.stats());
            },
        );
    }

    group.finish();
}

fn bench_registry_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_registry");

    let mut pools = PoolRegistry::new();
    for key in ["bullets", "sparks", "debris", "trails"] {
        pools
            .create_pool(key, || [0.0f64; 8], |v: &mut [f64; 8]| *v = [0.0; 8], PoolConfig::default())
            .unwrap();
    }

    group.bench_function("get_release", |b| {
        b.iter(|| {
            let handle = pools.get::<[f64; 8]>(black_box("debris")).unwrap();
            pools.release("debris", handle).unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    pooling_benches,
    bench_pool_cycle,
    bench_pool_pressure,
    bench_registry_lookup
);
criterion_main!(pooling_benches);
