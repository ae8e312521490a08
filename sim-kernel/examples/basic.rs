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
//! Basic example demonstrating the ECS structure
//!
//! Creates a world, registers a gameplay component and system, spawns a few
//! tagged entities and listens to lifecycle events on the bus.
//!
//! Run with `RUST_LOG=debug cargo run --example basic` to see kernel logs.

use glam::DVec3;
use sim_kernel::bus::topics;
use sim_kernel::ecs::components::{Rigidbody, Transform};
use sim_kernel::ecs::{
    Component, ComponentRegistry, DenseStore, Entity, Query, System, SystemContext, World,
    WorldConfig,
};
use sim_kernel::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Lifetime {
    remaining: f64,
}

impl Component for Lifetime {
    const NAME: &'static str = "lifetime";
    type Storage = DenseStore<Lifetime>;

    fn storage(registry: &ComponentRegistry) -> Option<&Self::Storage> {
        registry.dense::<Lifetime>()
    }

    fn storage_mut(registry: &mut ComponentRegistry) -> Option<&mut Self::Storage> {
        registry.dense_mut::<Lifetime>()
    }
}

/// Counts lifetimes down and destroys expired entities
struct Expiry;

impl System for Expiry {
    fn name(&self) -> &str {
        "expiry"
    }

    fn query(&self) -> Query {
        Query::new().with::<Lifetime>()
    }

    fn process_entity(&mut self, entity: Entity, ctx: &mut SystemContext<'_>) -> Result<()> {
        let dt = ctx.delta();
        ctx.entities
            .update_component::<Lifetime, _>(entity, |l| l.remaining -= dt)?;
        let expired = ctx
            .entities
            .get_component::<Lifetime>(entity)
            .is_some_and(|l| l.remaining <= 0.0);
        if expired {
            ctx.entities.destroy(entity)?;
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::init();

    println!("Simulation Kernel - Basic ECS Example");
    println!("=====================================\n");

    let mut world = World::new(WorldConfig::default());
    world.register_component::<Lifetime>()?;
    world.add_physics_systems()?;
    world.add_system(Expiry)?;
    println!("Created world with {} systems", world.systems().system_count());

    world.bus().subscribe("entity.*", |msg| {
        if let Some(entity) = msg.payload.entity() {
            println!("  [bus] {} {}", msg.topic, entity);
        }
    });

    let ship = world.create_entity(["player"])?;
    world
        .entity_mut(ship)?
        .insert(Transform::default())?
        .insert(Rigidbody::new(10.0).with_velocity(DVec3::new(2.0, 0.0, 0.0)))?;

    let mut flares = Vec::new();
    for i in 0..3 {
        let flare = world.create_entity(["projectile"])?;
        world
            .entity_mut(flare)?
            .insert(Transform::from_position(DVec3::new(0.0, i as f64, 0.0)))?
            .insert(Lifetime {
                remaining: 0.05 * (i + 1) as f64,
            })?;
        flares.push(flare);
    }

    println!("\nLive entities: {}", world.entities().live_count());
    println!("Projectiles:   {:?}", world.get_entities_by_tag("projectile"));

    println!("\nRunning 10 ticks at 60 Hz...");
    for _ in 0..10 {
        let report = world.update(1.0 / 60.0)?;
        for failure in &report.failures {
            println!("  system {} failed: {}", failure.system, failure.error);
        }
    }

    let position = world
        .get_component::<Transform>(ship)
        .map(|t| t.position)
        .unwrap_or_default();
    println!("\nShip position after {:.3}s: {:?}", world.frame().elapsed, position);
    println!("Projectiles left: {}", world.get_entities_by_tag("projectile").len());
    println!(
        "Destroyed so far: {} (recycled ids waiting: {})",
        world.entities().stats().destroyed,
        world.entities().recycled_count()
    );

    let bus = world.bus().stats();
    println!("\nBus: {} published, {} delivered", bus.published, bus.delivered);
    println!(
        "Listening on `{}`: {} handler(s)",
        topics::ENTITY_CREATED,
        world.bus().subscriber_count(topics::ENTITY_CREATED)
    );

    println!("\nExample completed successfully!");
    Ok(())
}
