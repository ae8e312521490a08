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
//! Benchmarks for whole-world ticks
//!
//! An asteroid field of N bodies spread over a cube whose volume grows with N,
//! so the contact density stays roughly constant. Measures a full tick
//! (movement, broad phase, narrow phase, events) and the bare spatial query.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use glam::DVec3;
use sim_kernel::ecs::components::{Collider, Rigidbody, Transform};
use sim_kernel::ecs::{World, WorldConfig};
use sim_kernel::spatial::{SpatialConfig, SpatialIndex};
use sim_kernel::Entity;

/// Cheap deterministic scatter, good enough for placement
fn scatter(i: usize, extent: f64) -> DVec3 {
    let h = |k: u64| {
        let x = (i as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15 ^ k);
        (x >> 11) as f64 / (1u64 << 53) as f64
    };
    DVec3::new(h(1), h(2), h(3)) * extent - DVec3::splat(extent * 0.5)
}

fn asteroid_field(count: usize) -> World {
    let mut world = World::new(WorldConfig::default().with_integrity_check_interval(0));
    world.add_physics_systems().unwrap();
    let extent = (count as f64).cbrt() * 6.0;

    for i in 0..count {
        let rock = world.create_entity(["asteroid"]).unwrap();
        world
            .entity_mut(rock)
            .unwrap()
            .insert(Transform::from_position(scatter(i, extent)))
            .unwrap()
            .insert(Rigidbody::new(1.0 + (i % 7) as f64).with_velocity(scatter(i + count, 4.0)))
            .unwrap()
            .insert(Collider::sphere(0.5 + (i % 3) as f64 * 0.25))
            .unwrap();
    }
    world
}

fn bench_world_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_tick");
    group.sample_size(30);

    for count in [100, 1000, 5000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("asteroids", count), count, |b, &count| {
            let mut world = asteroid_field(count);
            b.iter(|| black_box(world.update(1.0 / 60.0).unwrap()));
        });
    }

    group.finish();
}

fn bench_spatial_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial_query");

    for count in [1000, 10000].iter() {
        let extent = (*count as f64).cbrt() * 6.0;
        let mut index = SpatialIndex::new(SpatialConfig::default().with_cell_size(4.0));
        for i in 0..*count {
            index.insert(Entity::new(i as u64, 0), scatter(i, extent), 1.0);
        }

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("nearby_into", count), count, |b, &count| {
            let mut out = Vec::new();
            b.iter(|| {
                let mut found = 0;
                for i in 0..count {
                    index.query_nearby_into(scatter(i, extent), 2.0, &mut out);
                    found += out.len();
                }
                black_box(found)
            });
        });
    }

    group.finish();
}

criterion_group!(tick_benches, bench_world_tick, bench_spatial_query);
criterion_main!(tick_benches);
