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
//! Asteroid field simulation
//!
//! Drifting asteroids collide and bounce; a gameplay system listens for
//! collision events and spawns pooled spark effects at each contact point.
//! Demonstrates:
//! - Movement and collision systems driven by the world tick
//! - Collision events delivered over the bus
//! - A keyed object pool shared through the system context
//! - Frame reports and subsystem statistics

use glam::DVec3;
use sim_kernel::bus::topics;
use sim_kernel::ecs::components::{Collider, Rigidbody, Transform};
use sim_kernel::ecs::{priorities, Entity, System, SystemContext, World, WorldConfig};
use sim_kernel::physics::{CollisionEvent, CollisionSystem};
use sim_kernel::pool::{PoolConfig, PoolHandle};
use sim_kernel::Result;
use std::cell::RefCell;
use std::rc::Rc;

const ASTEROIDS: usize = 200;
const FIELD: f64 = 40.0;
const SPARK_LIFETIME: u32 = 20;

#[derive(Debug, Default)]
struct Spark {
    origin: DVec3,
    ticks_left: u32,
}

/// Turns queued collision events into short-lived pooled sparks
struct Sparks {
    inbox: Rc<RefCell<Vec<CollisionEvent>>>,
    active: Vec<PoolHandle>,
    spawned: usize,
}

impl System for Sparks {
    fn name(&self) -> &str {
        "sparks"
    }

    fn priority(&self) -> i32 {
        priorities::RENDER_SYNC
    }

    fn initialize(&mut self, ctx: &mut SystemContext<'_>) -> Result<()> {
        ctx.pools.create_pool(
            "sparks",
            Spark::default,
            |spark: &mut Spark| *spark = Spark::default(),
            PoolConfig::new(32, 128).with_logging(),
        )?;
        Ok(())
    }

    fn update(&mut self, _entities: &[Entity], ctx: &mut SystemContext<'_>) -> Result<()> {
        let mut expired = Vec::new();
        for &handle in &self.active {
            if let Some(spark) = ctx.pools.instance_mut::<Spark>("sparks", handle) {
                spark.ticks_left = spark.ticks_left.saturating_sub(1);
                if spark.ticks_left == 0 {
                    log::trace!("spark at {:?} faded", spark.origin);
                    expired.push(handle);
                }
            }
        }
        for handle in expired {
            self.active.retain(|&h| h != handle);
            ctx.pools.release("sparks", handle)?;
        }

        for event in self.inbox.borrow_mut().drain(..) {
            if event.trigger {
                continue;
            }
            let Some(a) = ctx.entities.get_component::<Transform>(event.entity_a) else {
                continue;
            };
            let handle = ctx.pools.get::<Spark>("sparks")?;
            if let Some(spark) = ctx.pools.instance_mut::<Spark>("sparks", handle) {
                spark.origin = a.position + event.normal;
                spark.ticks_left = SPARK_LIFETIME;
            }
            self.active.push(handle);
            self.spawned += 1;
            log::debug!("{} sparks spawned, {} active", self.spawned, self.active.len());
        }
        Ok(())
    }
}

fn scatter(i: usize, salt: u64) -> f64 {
    let x = (i as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15 ^ salt);
    (x >> 11) as f64 / (1u64 << 53) as f64
}

fn main() -> Result<()> {
    env_logger::init();

    println!("=== Asteroid Field Simulation ===\n");

    let mut world = World::new(WorldConfig::default());
    world.add_physics_systems()?;

    let inbox = Rc::new(RefCell::new(Vec::new()));
    let sink = inbox.clone();
    world.bus().subscribe(topics::COLLISION_DETECTED, move |msg| {
        if let Some(event) = msg.payload.collision() {
            sink.borrow_mut().push(event.clone());
        }
    });
    world.add_system(Sparks {
        inbox,
        active: Vec::new(),
        spawned: 0,
    })?;

    println!("Spawning {} asteroids in a {}m cube...", ASTEROIDS, FIELD);
    for i in 0..ASTEROIDS {
        let position = DVec3::new(scatter(i, 1), scatter(i, 2), scatter(i, 3)) * FIELD
            - DVec3::splat(FIELD * 0.5);
        let velocity = (DVec3::new(scatter(i, 4), scatter(i, 5), scatter(i, 6)) - 0.5) * 6.0;
        let radius = 0.5 + scatter(i, 7) * 1.5;

        let rock = world.create_entity(["asteroid"])?;
        world
            .entity_mut(rock)?
            .insert(Transform::from_position(position))?
            .insert(
                Rigidbody::new(radius.powi(3) * 4.0)
                    .with_velocity(velocity)
                    .with_angular_velocity(velocity.cross(DVec3::Y) * 0.1),
            )?
            .insert(Collider::sphere(radius).with_restitution(0.6))?;
    }

    // a station nobody can push around
    let station = world.create_entity(Vec::<&'static str>::new())?;
    world
        .entity_mut(station)?
        .insert(Transform::default())?
        .insert(Collider::sphere(5.0).with_restitution(0.9))?;

    println!("Simulating 10 seconds at 60 Hz...\n");
    let dt = 1.0 / 60.0;
    for second in 1..=10 {
        let mut failures = 0;
        for _ in 0..60 {
            failures += world.update(dt)?.failures.len();
        }

        let energy: f64 = world
            .get_entities_by_tag("asteroid")
            .into_iter()
            .filter_map(|rock| world.get_component::<Rigidbody>(rock))
            .map(|body| 0.5 * body.mass * body.velocity.length_squared())
            .sum();
        let collision = world
            .systems()
            .stats::<CollisionSystem>()
            .map(|s| s.last_duration)
            .unwrap_or_default();
        println!(
            "  t={:>2}s  kinetic energy {:>10.2} J  collision pass {:>8.1?}  failures {}",
            second, energy, collision, failures
        );
    }

    let spatial = world.spatial().stats();
    println!("\n--- Spatial index ---");
    println!("  registrations:  {}", spatial.registrations);
    println!("  occupied cells: {}", spatial.occupied_cells);
    println!("  oversized:      {}", spatial.oversized);

    if let Some(sparks) = world.pools().stats("sparks") {
        println!("\n--- Spark pool ---");
        println!("  hits:       {}", sparks.hits);
        println!("  misses:     {}", sparks.misses);
        println!("  overflow:   {}", sparks.overflow_allocations);
        println!("  in use:     {}", sparks.in_use);
        println!("  hit rate:   {:.1}%", sparks.hit_rate());
    }

    let bus = world.bus().stats();
    println!("\n--- Bus ---");
    println!("  published:  {} ({} fast path)", bus.published, bus.fast_path);
    println!("  delivered:  {}", bus.delivered);

    println!("\nSimulation completed successfully!");
    Ok(())
}
