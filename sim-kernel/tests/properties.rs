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
//! Property tests for the kernel's bookkeeping
//!
//! Randomized operation sequences checked against simple models: the spatial
//! grid never misses an overlapping registration, handles never resurrect,
//! compaction keeps every value and pools never hand out one instance twice.

use glam::DVec3;
use proptest::prelude::*;
use sim_kernel::bus::MessageBus;
use sim_kernel::ecs::components::Transform;
use sim_kernel::ecs::{ComponentStorage, Entity, EntityConfig, EntityManager, Tag};
use sim_kernel::pool::{ObjectPool, PoolConfig, PoolHandle};
use sim_kernel::spatial::{SpatialConfig, SpatialIndex};
use std::collections::{HashMap, HashSet};

fn point() -> impl Strategy<Value = DVec3> {
    (-200.0f64..200.0, -200.0f64..200.0, -200.0f64..200.0).prop_map(|(x, y, z)| DVec3::new(x, y, z))
}

#[derive(Debug, Clone)]
enum Op {
    Create,
    Destroy(usize),
    Attach(usize, f64),
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            3 => Just(Op::Create),
            2 => any::<usize>().prop_map(Op::Destroy),
            2 => (any::<usize>(), -10.0f64..10.0).prop_map(|(i, x)| Op::Attach(i, x)),
        ],
        1..120,
    )
}

proptest! {
    #[test]
    fn spatial_query_finds_every_overlapping_sphere(
        spheres in prop::collection::vec((point(), 0.0f64..30.0), 1..60),
        cell_size in 1.0f64..40.0,
        probe in point(),
        reach in 0.0f64..50.0,
    ) {
        let mut index = SpatialIndex::new(SpatialConfig::default().with_cell_size(cell_size));
        for (i, (center, radius)) in spheres.iter().enumerate() {
            index.insert(Entity::new(i as u64, 0), *center, *radius);
        }

        let found: HashSet<Entity> = index.query_nearby(probe, reach).into_iter().collect();
        for (i, (center, radius)) in spheres.iter().enumerate() {
            if center.distance(probe) <= radius + reach {
                prop_assert!(
                    found.contains(&Entity::new(i as u64, 0)),
                    "sphere {} at {:?} r {} missed", i, center, radius
                );
            }
        }
    }

    #[test]
    fn spatial_swept_registration_covers_the_path(
        from in point(),
        to in point(),
        radius in 0.1f64..3.0,
        t in 0.0f64..=1.0,
    ) {
        let mut index = SpatialIndex::new(SpatialConfig::default().with_cell_size(5.0));
        let bullet = Entity::new(0, 0);
        index.insert_swept(bullet, from, to, radius);
        // a second entry keeps queries off the full-scan path
        index.insert(Entity::new(1, 0), DVec3::splat(10_000.0), 1.0);

        let on_path = from.lerp(to, t);
        prop_assert!(index.query_nearby(on_path, 0.0).contains(&bullet));
    }

    #[test]
    fn spatial_moves_keep_the_index_consistent(
        moves in prop::collection::vec((0usize..8, point()), 1..80),
    ) {
        let mut index = SpatialIndex::new(SpatialConfig::default());
        let mut latest: HashMap<usize, DVec3> = HashMap::new();
        for (who, to) in moves {
            index.update(Entity::new(who as u64, 0), to, 1.0);
            latest.insert(who, to);
        }

        prop_assert_eq!(index.len(), latest.len());
        for (who, at) in latest {
            prop_assert!(index.query_nearby(at, 1.0).contains(&Entity::new(who as u64, 0)));
        }
    }

    #[test]
    fn handles_never_resurrect(ops in ops(), recycle in 0usize..8) {
        let mut entities = EntityManager::new(
            MessageBus::new(),
            EntityConfig::default().with_recycle_capacity(recycle),
        );
        let mut live: Vec<Entity> = Vec::new();
        let mut dead: Vec<Entity> = Vec::new();

        for op in ops {
            match op {
                Op::Create => {
                    let e = entities.create(Vec::<Tag>::new()).unwrap();
                    prop_assert!(!live.contains(&e));
                    prop_assert!(!dead.contains(&e));
                    live.push(e);
                }
                Op::Destroy(i) if !live.is_empty() => {
                    let e = live.swap_remove(i % live.len());
                    entities.destroy(e).unwrap();
                    dead.push(e);
                }
                Op::Attach(i, x) if !live.is_empty() => {
                    let e = live[i % live.len()];
                    entities
                        .add_component(e, Transform::from_position(DVec3::new(x, 0.0, 0.0)))
                        .unwrap();
                }
                _ => {}
            }
        }

        prop_assert_eq!(entities.live_count(), live.len());
        prop_assert!(entities.recycled_count() <= recycle);
        for e in &dead {
            prop_assert!(!entities.is_alive(*e));
            prop_assert!(entities.get_component::<Transform>(*e).is_none());
        }
        for e in &live {
            prop_assert!(entities.is_alive(*e));
        }
        let holders = entities.registry().transforms().len();
        prop_assert!(holders <= live.len());
        prop_assert!(entities.check_integrity(false).is_empty());
    }

    #[test]
    fn compaction_preserves_values(ops in ops()) {
        let mut entities = EntityManager::new(MessageBus::new(), EntityConfig::default());
        let mut live: Vec<Entity> = Vec::new();
        let mut expected: HashMap<Entity, f64> = HashMap::new();

        for op in ops {
            match op {
                Op::Create => live.push(entities.create(Vec::<Tag>::new()).unwrap()),
                Op::Destroy(i) if !live.is_empty() => {
                    let e = live.swap_remove(i % live.len());
                    entities.destroy(e).unwrap();
                    expected.remove(&e);
                }
                Op::Attach(i, x) if !live.is_empty() => {
                    let e = live[i % live.len()];
                    entities
                        .add_component(e, Transform::from_position(DVec3::new(x, 0.0, 0.0)))
                        .unwrap();
                    expected.insert(e, x);
                }
                _ => {}
            }
        }

        entities.registry_mut().compact();

        let transforms = entities.registry().transforms();
        prop_assert_eq!(transforms.len(), expected.len());
        prop_assert!(transforms.capacity() >= transforms.len());
        for (e, x) in expected {
            let slot = transforms.slot(e);
            prop_assert!(slot.is_some_and(|s| s < transforms.len()));
            prop_assert_eq!(entities.get_component::<Transform>(e).map(|t| t.position.x), Some(x));
        }
    }

    #[test]
    fn pools_never_share_an_instance(script in prop::collection::vec(any::<bool>(), 1..200)) {
        let mut pool = ObjectPool::new(
            "ids",
            || 0u32,
            |n: &mut u32| *n = 0,
            PoolConfig::new(4, 16),
        );
        let mut held: Vec<(PoolHandle, u32)> = Vec::new();
        let mut next = 1u32;

        for acquire in script {
            if acquire || held.is_empty() {
                let handle = pool.acquire().unwrap();
                let value = pool.get_mut(handle).unwrap();
                prop_assert_eq!(*value, 0, "instance came back dirty");
                *value = next;
                held.push((handle, next));
                next += 1;
            } else {
                let (handle, _) = held.remove(0);
                pool.release(handle).unwrap();
                prop_assert!(!pool.is_live(handle));
            }

            for (handle, value) in &held {
                prop_assert_eq!(pool.get(*handle), Some(value));
            }
        }

        let stats = pool.stats();
        prop_assert_eq!(stats.in_use, held.len());
        prop_assert!(stats.hit_rate() >= 0.0 && stats.hit_rate() <= 100.0);
    }
}
