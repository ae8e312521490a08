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
//! Benchmarks for component storage
//!
//! These benchmarks measure:
//! - Slot allocation on a cold store
//! - Churn: freeing and reclaiming slots through the freelist
//! - Columnar iteration against per-entity reads
//! - Compaction after heavy fragmentation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use glam::DVec3;
use sim_kernel::ecs::components::{Collider, Transform, TransformStore, transform_cols};
use sim_kernel::ecs::{ComponentStorage, DenseStore, Entity};

fn filled_transforms(count: usize) -> TransformStore {
    let mut store = TransformStore::with_capacity(count);
    for i in 0..count {
        store
            .insert(
                Entity::new(i as u64, 0),
                Transform::from_position(DVec3::new(i as f64, 0.0, 0.0)),
            )
            .unwrap();
    }
    store
}

/// Benchmark: insert N components into a fresh store
fn bench_storage_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_insert");

    for entity_count in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*entity_count as u64));

        group.bench_with_input(
            BenchmarkId::new("columnar_transform", entity_count),
            entity_count,
            |b, &count| {
                b.iter(|| black_box(filled_transforms(count)));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("dense_collider", entity_count),
            entity_count,
            |b, &count| {
                b.iter(|| {
                    let mut store = DenseStore::<Collider>::with_capacity(count);
                    for i in 0..count {
                        store
                            .insert(Entity::new(i as u64, 0), Collider::sphere(1.0))
                            .unwrap();
                    }
                    black_box(store);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: free half the slots and reclaim them for new generations
fn bench_storage_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_churn");

    for entity_count in [1000, 10000].iter() {
        group.throughput(Throughput::Elements(*entity_count as u64 / 2));

        group.bench_with_input(
            BenchmarkId::new("free_and_reclaim", entity_count),
            entity_count,
            |b, &count| {
                let mut store = filled_transforms(count);
                let mut generation = 0;
                b.iter(|| {
                    for i in (0..count).step_by(2) {
                        store.free(Entity::new(i as u64, generation));
                    }
                    generation += 1;
                    for i in (0..count).step_by(2) {
                        store
                            .allocate(Entity::new(i as u64, generation))
                            .unwrap();
                    }
                    black_box(store.len());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: sum X positions through the column versus per-entity reads
fn bench_storage_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_iteration");

    for entity_count in [1000, 10000, 100000].iter() {
        group.throughput(Throughput::Elements(*entity_count as u64));
        let store = filled_transforms(*entity_count);

        group.bench_with_input(
            BenchmarkId::new("column", entity_count),
            entity_count,
            |b, _| {
                b.iter(|| {
                    let sum: f64 = store.column(transform_cols::PX).iter().sum();
                    black_box(sum)
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("read_per_entity", entity_count),
            entity_count,
            |b, &count| {
                b.iter(|| {
                    let mut sum = 0.0;
                    for i in 0..count {
                        if let Some(t) = store.read(Entity::new(i as u64, 0)) {
                            sum += t.position.x;
                        }
                    }
                    black_box(sum)
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: compact a store with every third slot freed
fn bench_storage_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_compact");

    for entity_count in [1000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::new("fragmented", entity_count),
            entity_count,
            |b, &count| {
                b.iter_batched(
                    || {
                        let mut store = filled_transforms(count);
                        for i in (0..count).step_by(3) {
                            store.free(Entity::new(i as u64, 0));
                        }
                        store
                    },
                    |mut store| black_box(store.compact()),
                    criterion::BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(
    storage_benches,
    bench_storage_insert,
    bench_storage_churn,
    bench_storage_iteration,
    bench_storage_compact
);
criterion_main!(storage_benches);
