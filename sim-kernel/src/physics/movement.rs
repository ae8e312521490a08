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
//! Motion integration
//!
//! Semi-implicit Euler in two passes. The velocity pass runs column by column
//! over the rigidbody store (in parallel above a size threshold when the
//! `parallel` feature is on). The position pass then walks the bodies that
//! also have a transform, moves them by `v·dt` and composes their rotation
//! with the quaternion of `ω·dt`.

use crate::ecs::components::FREEZE_ROTATION;
use crate::ecs::priorities;
use crate::ecs::{ComponentStorage, Entity, System, SystemContext};
use crate::error::Result;
use glam::{DQuat, DVec3};

/// Integrates forces, drag, positions and rotations
#[derive(Debug, Default)]
pub struct MovementSystem {
    rejected: u64,
}

impl MovementSystem {
    /// Create the system
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-finite results discarded so far
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl System for MovementSystem {
    fn name(&self) -> &str {
        "movement"
    }

    fn priority(&self) -> i32 {
        priorities::MOVEMENT
    }

    fn update(&mut self, _entities: &[Entity], ctx: &mut SystemContext<'_>) -> Result<()> {
        let dt = ctx.delta();
        let (transforms, bodies, _) = ctx.entities.registry_mut().physics_mut();

        let rejected = bodies.integrate_velocities(dt);
        if rejected > 0 {
            self.rejected += rejected as u64;
            log::warn!("discarded {} non-finite velocity components", rejected);
        }

        for (body_slot, owner) in bodies.slots().owners().iter().enumerate() {
            let Some(entity) = *owner else { continue };
            let Some(slot) = transforms.slot(entity) else {
                continue;
            };

            let position = transforms.position(slot);
            transforms.set_previous_position(slot, position);

            let next = position + bodies.velocity(body_slot) * dt;
            if next.is_finite() {
                transforms.move_to(slot, next);
            } else {
                self.rejected += 1;
                log::warn!("{} would move to a non-finite position, kept in place", entity);
            }

            if bodies.flags(body_slot) & FREEZE_ROTATION != 0 {
                continue;
            }
            let spin = bodies.angular_velocity(body_slot) * dt;
            if spin == DVec3::ZERO {
                continue;
            }
            let rotation = (DQuat::from_scaled_axis(spin) * transforms.rotation(slot)).normalize();
            if rotation.is_finite() {
                transforms.set_rotation(slot, rotation);
            } else {
                self.rejected += 1;
                log::warn!("{} would reach a non-finite rotation, kept", entity);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::ecs::components::{Rigidbody, Transform};
    use crate::ecs::{EntityConfig, EntityManager, FrameInfo};
    use crate::pool::PoolRegistry;
    use crate::spatial::{SpatialConfig, SpatialIndex};
    use std::f64::consts::FRAC_PI_2;

    fn step(entities: &mut EntityManager, dt: f64) {
        let bus = entities.bus().clone();
        let mut spatial = SpatialIndex::new(SpatialConfig::default());
        let mut pools = PoolRegistry::new();
        let mut ctx = SystemContext {
            entities,
            bus: &bus,
            spatial: &mut spatial,
            pools: &mut pools,
            frame: FrameInfo {
                frame: 0,
                delta: dt,
                elapsed: 0.0,
            },
        };
        MovementSystem::new().update(&[], &mut ctx).unwrap();
    }

    fn body(entities: &mut EntityManager, rb: Rigidbody) -> Entity {
        let e = entities.create(Vec::<&'static str>::new()).unwrap();
        entities.add_component(e, Transform::default()).unwrap();
        entities.add_component(e, rb).unwrap();
        e
    }

    #[test]
    fn test_constant_velocity() {
        let mut em = EntityManager::new(MessageBus::new(), EntityConfig::default());
        let e = body(&mut em, Rigidbody::new(1.0).with_velocity(DVec3::X));

        step(&mut em, 1.0);

        let t = em.get_component::<Transform>(e).unwrap();
        assert!((t.position - DVec3::X).length() < 1e-12);
        let slot = em.registry().transforms().slot(e).unwrap();
        assert_eq!(em.registry().transforms().previous_position(slot), DVec3::ZERO);
    }

    #[test]
    fn test_force_then_position() {
        let mut em = EntityManager::new(MessageBus::new(), EntityConfig::default());
        let e = body(&mut em, Rigidbody::new(2.0));
        em.update_component::<Rigidbody, _>(e, |b| b.force = DVec3::new(0.0, 4.0, 0.0))
            .unwrap();

        step(&mut em, 0.5);

        // v = 4 / 2 * 0.5 = 1, p = 1 * 0.5
        let rb = em.get_component::<Rigidbody>(e).unwrap();
        assert!((rb.velocity.y - 1.0).abs() < 1e-12);
        assert_eq!(rb.force, DVec3::ZERO);
        let t = em.get_component::<Transform>(e).unwrap();
        assert!((t.position.y - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rotation_uses_quaternions() {
        let mut em = EntityManager::new(MessageBus::new(), EntityConfig::default());
        let e = body(
            &mut em,
            Rigidbody::new(1.0).with_angular_velocity(DVec3::new(0.0, 0.0, FRAC_PI_2)),
        );

        for _ in 0..4 {
            step(&mut em, 0.25);
        }

        let rotation = em.get_component::<Transform>(e).unwrap().rotation;
        let expected = DQuat::from_rotation_z(FRAC_PI_2);
        assert!(rotation.abs_diff_eq(expected, 1e-9) || rotation.abs_diff_eq(-expected, 1e-9));
        assert!((rotation.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_frozen_rotation_and_kinematic_bodies() {
        let mut em = EntityManager::new(MessageBus::new(), EntityConfig::default());
        let frozen = body(
            &mut em,
            Rigidbody::new(1.0).with_angular_velocity(DVec3::Z).freeze_rotation(),
        );
        let kinematic = body(&mut em, Rigidbody::new(1.0).with_velocity(DVec3::X).kinematic());
        em.update_component::<Rigidbody, _>(kinematic, |b| b.force = DVec3::splat(100.0))
            .unwrap();

        step(&mut em, 1.0);

        assert_eq!(em.get_component::<Transform>(frozen).unwrap().rotation, DQuat::IDENTITY);
        let t = em.get_component::<Transform>(kinematic).unwrap();
        assert!((t.position - DVec3::X).length() < 1e-12);
    }

    #[test]
    fn test_body_without_transform_is_ignored() {
        let mut em = EntityManager::new(MessageBus::new(), EntityConfig::default());
        let e = em.create(Vec::<&'static str>::new()).unwrap();
        em.add_component(e, Rigidbody::new(1.0).with_velocity(DVec3::X)).unwrap();

        step(&mut em, 1.0);
        assert_eq!(em.get_component::<Rigidbody>(e).unwrap().velocity, DVec3::X);
    }
}
