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
//! Sphere collision detection and response
//!
//! Each tick the system keeps the spatial index in sync with the colliders,
//! asks it for candidates around every collider, and tests each unordered
//! pair once. Bodies that moved further than their radius get a swept test
//! on the relative motion so thin gaps cannot be skipped; a swept hit
//! rewinds the dynamic bodies to the time of impact before resolving.
//!
//! Solid contacts are resolved with an impulse along the contact normal and
//! a positional correction that removes most of the remaining overlap.
//! Every contact, solid or trigger, is published on
//! [`topics::COLLISION_DETECTED`].

use crate::bus::{topics, Payload};
use crate::ecs::components::{Collider, RigidbodyStore, Transform, TransformStore};
use crate::ecs::priorities;
use crate::ecs::{ComponentStorage, Entity, EntityManager, Query, System, SystemContext};
use crate::error::Result;
use glam::DVec3;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const EPSILON: f64 = 1e-12;

/// A contact between two colliders
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionEvent {
    /// The lower entity of the pair
    pub entity_a: Entity,
    /// The higher entity of the pair
    pub entity_b: Entity,
    /// Unit contact normal pointing from `entity_a` to `entity_b`
    pub normal: DVec3,
    /// Magnitude of the relative velocity before resolution
    pub relative_speed: f64,
    /// Overlap depth at detection; 0 for swept hits
    pub penetration: f64,
    /// Whether either collider is a trigger
    pub trigger: bool,
}

/// Collision response tuning
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollisionConfig {
    /// Penetration left uncorrected to avoid jitter
    pub slop: f64,
    /// Fraction of the remaining penetration corrected per tick
    pub correction_percent: f64,
    /// Enable the swept test for fast movers
    pub swept: bool,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        CollisionConfig {
            slop: 0.01,
            correction_percent: 0.8,
            swept: true,
        }
    }
}

impl CollisionConfig {
    /// Set the penetration slop
    pub fn with_slop(mut self, slop: f64) -> Self {
        self.slop = slop;
        self
    }

    /// Set the correction percentage
    pub fn with_correction_percent(mut self, percent: f64) -> Self {
        self.correction_percent = percent;
        self
    }

    /// Enable or disable swept tests
    pub fn with_swept(mut self, swept: bool) -> Self {
        self.swept = swept;
        self
    }
}

/// Counters accumulated since the system was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollisionStats {
    /// Candidate pairs that reached the narrow phase
    pub pairs_tested: u64,
    /// Solid contacts resolved
    pub contacts: u64,
    /// Trigger overlaps reported
    pub triggers: u64,
    /// Contacts found only by the swept test
    pub swept_hits: u64,
    /// Stale registrations pruned from the index
    pub pruned: u64,
}

/// Broad phase, narrow phase and impulse response for sphere colliders
#[derive(Debug, Default)]
pub struct CollisionSystem {
    config: CollisionConfig,
    stats: CollisionStats,
    live: Vec<Entity>,
    candidates: Vec<Entity>,
}

impl CollisionSystem {
    /// Create the system with default tuning
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the system with the given tuning
    pub fn with_config(config: CollisionConfig) -> Self {
        CollisionSystem {
            config,
            ..Default::default()
        }
    }

    /// The tuning in use
    pub fn config(&self) -> &CollisionConfig {
        &self.config
    }

    /// Counters snapshot
    pub fn stats(&self) -> CollisionStats {
        self.stats
    }
}

impl System for CollisionSystem {
    fn name(&self) -> &str {
        "collision"
    }

    fn priority(&self) -> i32 {
        priorities::COLLISION
    }

    fn query(&self) -> Query {
        Query::new().with::<Transform>().with::<Collider>()
    }

    fn update(&mut self, entities: &[Entity], ctx: &mut SystemContext<'_>) -> Result<()> {
        let manager: &EntityManager = &*ctx.entities;
        self.live.clear();
        self.live
            .extend(entities.iter().copied().filter(|&e| manager.is_alive(e)));

        let pruned = ctx.spatial.retain(|e| {
            manager.is_alive(e)
                && manager.has_component::<Transform>(e)
                && manager.has_component::<Collider>(e)
        });
        if pruned > 0 {
            self.stats.pruned += pruned as u64;
            log::debug!("pruned {} stale spatial registrations", pruned);
        }

        let cell_size = ctx.spatial.config().cell_size;
        let (transforms, bodies, colliders) = ctx.entities.registry_mut().physics_mut();

        for &entity in &self.live {
            let (Some(slot), Some(collider)) = (transforms.slot(entity), colliders.get(entity))
            else {
                continue;
            };
            let position = transforms.position(slot);
            let previous = transforms.previous_position(slot);
            if previous.distance(position) > cell_size {
                ctx.spatial
                    .update_swept(entity, previous, position, collider.radius);
            } else {
                ctx.spatial.update(entity, position, collider.radius);
            }
        }

        for index in 0..self.live.len() {
            let a = self.live[index];
            let (Some(slot_a), Some(&collider_a)) = (transforms.slot(a), colliders.get(a)) else {
                continue;
            };
            let from = transforms.previous_position(slot_a);
            let to = transforms.position(slot_a);
            let center = (from + to) * 0.5;
            let reach = collider_a.radius + from.distance(to) * 0.5;
            ctx.spatial
                .query_nearby_into(center, reach, &mut self.candidates);

            for &b in &self.candidates {
                if b <= a {
                    continue;
                }
                let (Some(slot_b), Some(&collider_b)) = (transforms.slot(b), colliders.get(b))
                else {
                    continue;
                };
                if !collider_a.interacts_with(&collider_b) {
                    continue;
                }
                self.stats.pairs_tested += 1;

                let pair = Pair {
                    a: Side::new(a, slot_a, collider_a, bodies),
                    b: Side::new(b, slot_b, collider_b, bodies),
                };
                let Some(contact) = self.detect(&pair, transforms) else {
                    continue;
                };

                let trigger = collider_a.trigger || collider_b.trigger;
                let event = CollisionEvent {
                    entity_a: a,
                    entity_b: b,
                    normal: contact.normal,
                    relative_speed: (pair.b.velocity - pair.a.velocity).length(),
                    penetration: contact.penetration,
                    trigger,
                };

                if trigger {
                    self.stats.triggers += 1;
                } else {
                    self.stats.contacts += 1;
                    if contact.time_of_impact.is_some() {
                        self.stats.swept_hits += 1;
                    }
                    self.resolve(&pair, &contact, transforms, bodies);
                }
                ctx.bus
                    .fast_publish(topics::COLLISION_DETECTED, Payload::Collision(event));
            }
        }

        // colliders without a body are not refreshed by movement
        for &entity in &self.live {
            if bodies.slot(entity).is_some() {
                continue;
            }
            if let Some(slot) = transforms.slot(entity) {
                let position = transforms.position(slot);
                transforms.set_previous_position(slot, position);
            }
        }
        Ok(())
    }
}

struct Side {
    slot: usize,
    body: Option<usize>,
    collider: Collider,
    velocity: DVec3,
    inverse_mass: f64,
}

impl Side {
    fn new(entity: Entity, slot: usize, collider: Collider, bodies: &RigidbodyStore) -> Self {
        let body = bodies.slot(entity);
        Side {
            slot,
            body,
            collider,
            velocity: body.map_or(DVec3::ZERO, |b| bodies.velocity(b)),
            inverse_mass: body.map_or(0.0, |b| bodies.inverse_mass(b)),
        }
    }
}

struct Pair {
    a: Side,
    b: Side,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Contact {
    normal: DVec3,
    penetration: f64,
    // positions at impact, for swept hits
    time_of_impact: Option<(DVec3, DVec3)>,
}

impl CollisionSystem {
    fn detect(&self, pair: &Pair, transforms: &TransformStore) -> Option<Contact> {
        let radius_sum = pair.a.collider.radius + pair.b.collider.radius;
        let a_to = transforms.position(pair.a.slot);
        let b_to = transforms.position(pair.b.slot);

        if let Some((normal, penetration)) = sphere_contact(a_to, b_to, radius_sum) {
            return Some(Contact {
                normal,
                penetration,
                time_of_impact: None,
            });
        }
        if !self.config.swept {
            return None;
        }

        let a_from = transforms.previous_position(pair.a.slot);
        let b_from = transforms.previous_position(pair.b.slot);
        let fast = a_from.distance(a_to) > pair.a.collider.radius
            || b_from.distance(b_to) > pair.b.collider.radius;
        if !fast {
            return None;
        }

        let t = swept_contact(a_from, a_to, b_from, b_to, radius_sum)?;
        if t <= 0.0 {
            // overlapping at the start of the tick; nothing to rewind
            return Some(Contact {
                normal: contact_normal(b_from - a_from),
                penetration: 0.0,
                time_of_impact: None,
            });
        }
        let a_hit = a_from.lerp(a_to, t);
        let b_hit = b_from.lerp(b_to, t);
        Some(Contact {
            normal: contact_normal(b_hit - a_hit),
            penetration: 0.0,
            time_of_impact: Some((a_hit, b_hit)),
        })
    }

    fn resolve(
        &self,
        pair: &Pair,
        contact: &Contact,
        transforms: &mut TransformStore,
        bodies: &mut RigidbodyStore,
    ) {
        let inverse_sum = pair.a.inverse_mass + pair.b.inverse_mass;
        if inverse_sum <= 0.0 {
            return;
        }
        let n = contact.normal;

        if let Some((a_hit, b_hit)) = contact.time_of_impact {
            if pair.a.inverse_mass > 0.0 {
                transforms.move_to(pair.a.slot, a_hit);
            }
            if pair.b.inverse_mass > 0.0 {
                transforms.move_to(pair.b.slot, b_hit);
            }
        }

        let approach = (pair.b.velocity - pair.a.velocity).dot(n);
        if approach < 0.0 {
            let restitution = pair
                .a
                .collider
                .restitution
                .min(pair.b.collider.restitution)
                .clamp(0.0, 1.0);
            let impulse = -(1.0 + restitution) * approach / inverse_sum;
            if let Some(slot) = pair.a.body.filter(|_| pair.a.inverse_mass > 0.0) {
                bodies.set_velocity(slot, pair.a.velocity - n * (impulse * pair.a.inverse_mass));
            }
            if let Some(slot) = pair.b.body.filter(|_| pair.b.inverse_mass > 0.0) {
                bodies.set_velocity(slot, pair.b.velocity + n * (impulse * pair.b.inverse_mass));
            }
        }

        let correction = (contact.penetration - self.config.slop).max(0.0) / inverse_sum
            * self.config.correction_percent;
        if correction > 0.0 {
            let a = transforms.position(pair.a.slot);
            let b = transforms.position(pair.b.slot);
            transforms.move_to(pair.a.slot, a - n * (correction * pair.a.inverse_mass));
            transforms.move_to(pair.b.slot, b + n * (correction * pair.b.inverse_mass));
        }
    }
}

fn contact_normal(offset: DVec3) -> DVec3 {
    let length = offset.length();
    if length > EPSILON {
        offset / length
    } else {
        DVec3::Y
    }
}

/// Overlap test between two spheres; returns the normal from `a` to `b` and
/// the penetration depth
fn sphere_contact(a: DVec3, b: DVec3, radius_sum: f64) -> Option<(DVec3, f64)> {
    let offset = b - a;
    let distance = offset.length();
    if distance < radius_sum {
        Some((contact_normal(offset), radius_sum - distance))
    } else {
        None
    }
}

/// Earliest time in `[0, 1]` at which two linearly moving spheres touch
fn swept_contact(
    a_from: DVec3,
    a_to: DVec3,
    b_from: DVec3,
    b_to: DVec3,
    radius_sum: f64,
) -> Option<f64> {
    let start = b_from - a_from;
    let motion = (b_to - b_from) - (a_to - a_from);
    let b = 2.0 * start.dot(motion);
    let c = start.length_squared() - radius_sum * radius_sum;
    if c < 0.0 {
        // already overlapping: only a closing pair is in contact
        return (b < 0.0).then_some(0.0);
    }
    let a = motion.length_squared();
    if a < EPSILON {
        return None;
    }
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return None;
    }
    let t = (-b - discriminant.sqrt()) / (2.0 * a);
    (0.0..=1.0).contains(&t).then_some(t)
}
