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
//! World management
//!
//! The World is the composition root of a simulation. It owns the entity
//! manager, the system manager, the spatial index, the object pools and the
//! frame clock, and shares one message bus between all of them. Every tick
//! goes through [`World::update`].

use crate::bus::{topics, BusConfig, MessageBus, Payload};
use crate::ecs::component::{Component, ComponentId, DenseStore};
use crate::ecs::manager::{EntityConfig, EntityManager};
use crate::ecs::scheduler::{SystemFailure, SystemManager};
use crate::ecs::system::{Query, System, SystemContext};
use crate::ecs::tag::{Tag, TagSet};
use crate::ecs::Entity;
use crate::error::{KernelError, Result};
use crate::physics::{CollisionSystem, MovementSystem};
use crate::pool::PoolRegistry;
use crate::spatial::{SpatialConfig, SpatialIndex};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timing of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameInfo {
    /// Tick number, starting at 1 for the first update
    pub frame: u64,
    /// Clamped delta in seconds
    pub delta: f64,
    /// Simulated seconds including this tick
    pub elapsed: f64,
}

/// World configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorldConfig {
    /// Upper bound on a tick's delta, in seconds
    pub max_delta: f64,
    /// Entity manager settings
    pub entities: EntityConfig,
    /// Message bus settings; ignored when the bus is supplied
    pub bus: BusConfig,
    /// Spatial index settings
    pub spatial: SpatialConfig,
    /// Run the integrity check every this many ticks; 0 disables it
    pub integrity_check_interval: u64,
    /// Fail the tick on an integrity mismatch instead of repairing it
    pub strict_integrity: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            max_delta: 0.1,
            entities: EntityConfig::default(),
            bus: BusConfig::default(),
            spatial: SpatialConfig::default(),
            integrity_check_interval: if cfg!(debug_assertions) { 60 } else { 0 },
            strict_integrity: false,
        }
    }
}

impl WorldConfig {
    /// Set the delta clamp
    pub fn with_max_delta(mut self, max_delta: f64) -> Self {
        self.max_delta = max_delta;
        self
    }

    /// Set the entity manager settings
    pub fn with_entities(mut self, entities: EntityConfig) -> Self {
        self.entities = entities;
        self
    }

    /// Set the message bus settings
    pub fn with_bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }

    /// Set the spatial index settings
    pub fn with_spatial(mut self, spatial: SpatialConfig) -> Self {
        self.spatial = spatial;
        self
    }

    /// Set the integrity check interval
    pub fn with_integrity_check_interval(mut self, ticks: u64) -> Self {
        self.integrity_check_interval = ticks;
        self
    }

    /// Make integrity mismatches fail the tick
    pub fn strict(mut self) -> Self {
        self.strict_integrity = true;
        self
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Timing of the tick
    pub frame: FrameInfo,
    /// Whether the requested delta was clamped or sanitized
    pub clamped: bool,
    /// Systems that failed during the tick
    pub failures: Vec<SystemFailure>,
    /// Mismatches found (and repaired) by the integrity check
    pub integrity: Vec<KernelError>,
}

#[derive(Debug, Clone, Default)]
struct FrameClock {
    current: FrameInfo,
}

impl FrameClock {
    fn advance(&mut self, requested: f64, max_delta: f64) -> (FrameInfo, bool) {
        let (delta, clamped) = if !requested.is_finite() || requested < 0.0 {
            log::warn!("invalid delta {}, using 0", requested);
            (0.0, true)
        } else if requested > max_delta {
            log::debug!("delta {:.4}s clamped to {:.4}s", requested, max_delta);
            (max_delta, true)
        } else {
            (requested, false)
        };

        self.current = FrameInfo {
            frame: self.current.frame + 1,
            delta,
            elapsed: self.current.elapsed + delta,
        };
        (self.current, clamped)
    }
}

/// The simulation container
///
/// # Examples
///
/// ```
/// use sim_kernel::ecs::{World, WorldConfig};
/// use sim_kernel::ecs::components::{Rigidbody, Transform};
/// use glam::DVec3;
///
/// let mut world = World::new(WorldConfig::default());
/// world.add_physics_systems().unwrap();
///
/// let ship = world.create_entity(["player"]).unwrap();
/// world
///     .entity_mut(ship)
///     .unwrap()
///     .insert(Transform::default())
///     .unwrap()
///     .insert(Rigidbody::new(1.0).with_velocity(DVec3::X))
///     .unwrap();
///
/// world.update(0.05).unwrap();
/// let position = world.get_component::<Transform>(ship).unwrap().position;
/// assert!((position.x - 0.05).abs() < 1e-12);
/// ```
pub struct World {
    config: WorldConfig,
    bus: MessageBus,
    entities: EntityManager,
    systems: SystemManager,
    spatial: SpatialIndex,
    pools: PoolRegistry,
    clock: FrameClock,
}

impl World {
    /// Create a world with its own bus
    pub fn new(config: WorldConfig) -> Self {
        let bus = MessageBus::with_config(config.bus.clone());
        Self::with_bus(bus, config)
    }

    /// Create a world around an externally supplied bus
    pub fn with_bus(bus: MessageBus, config: WorldConfig) -> Self {
        World {
            entities: EntityManager::new(bus.clone(), config.entities.clone()),
            systems: SystemManager::new(&bus),
            spatial: SpatialIndex::new(config.spatial.clone()),
            pools: PoolRegistry::new(),
            clock: FrameClock::default(),
            bus,
            config,
        }
    }

    /// Advance the simulation by one tick
    ///
    /// The delta is sanitized and clamped to `max_delta`. System failures are
    /// contained and reported; only a strict integrity check returns `Err`.
    pub fn update(&mut self, delta: f64) -> Result<FrameReport> {
        let (frame, clamped) = self.clock.advance(delta, self.config.max_delta);
        self.bus
            .publish(topics::WORLD_PRE_UPDATE, Payload::Frame(frame));

        let failures = {
            let mut ctx = SystemContext {
                entities: &mut self.entities,
                bus: &self.bus,
                spatial: &mut self.spatial,
                pools: &mut self.pools,
                frame,
            };
            self.systems.update(&mut ctx)
        };

        self.bus
            .publish(topics::WORLD_POST_UPDATE, Payload::Frame(frame));

        let interval = self.config.integrity_check_interval;
        let integrity = if interval > 0 && frame.frame % interval == 0 {
            let strict = self.config.strict_integrity;
            let mut issues = self.entities.check_integrity(!strict);
            if strict && !issues.is_empty() {
                log::error!("frame {}: {} integrity violations", frame.frame, issues.len());
                return Err(issues.swap_remove(0));
            }
            issues
        } else {
            Vec::new()
        };

        Ok(FrameReport {
            frame,
            clamped,
            failures,
            integrity,
        })
    }

    /// Create an entity with the given tags
    pub fn create_entity<I>(&mut self, tags: I) -> Result<Entity>
    where
        I: IntoIterator,
        I::Item: Into<Tag>,
    {
        self.entities.create(tags)
    }

    /// Destroy an entity and drop it from the spatial index
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<()> {
        self.entities.destroy(entity)?;
        self.spatial.remove(entity);
        Ok(())
    }

    /// Check whether a handle refers to a live entity
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Mutable view of one live entity
    pub fn entity_mut(&mut self, entity: Entity) -> Result<EntityMut<'_>> {
        if !self.entities.is_alive(entity) {
            return Err(KernelError::InvalidEntity(entity));
        }
        Ok(EntityMut {
            world: self,
            entity,
        })
    }

    /// Copy of an entity's component
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<T> {
        self.entities.get_component(entity)
    }

    /// Live entities carrying a tag
    pub fn get_entities_by_tag(&self, tag: impl Into<Tag>) -> Vec<Entity> {
        self.entities.get_by_tag(&tag.into())
    }

    /// Live entities matching a query
    pub fn query(&self, query: &Query) -> Result<Vec<Entity>> {
        let resolved = query.resolve(self.entities.registry())?;
        let mut out = Vec::new();
        if !resolved.is_empty() {
            self.entities
                .query_into(resolved.mask, &resolved.tags, &mut out);
        }
        Ok(out)
    }

    /// Register a user component type
    pub fn register_component<T>(&mut self) -> Result<ComponentId>
    where
        T: Component<Storage = DenseStore<T>>,
    {
        self.entities.register_component::<T>()
    }

    /// Register a system and run its initialization
    pub fn add_system<S: System>(&mut self, system: S) -> Result<()> {
        let mut ctx = SystemContext {
            entities: &mut self.entities,
            bus: &self.bus,
            spatial: &mut self.spatial,
            pools: &mut self.pools,
            frame: self.clock.current,
        };
        self.systems.register(system, &mut ctx)
    }

    /// Remove a system by type
    pub fn remove_system<S: System>(&mut self) -> bool {
        self.systems.unregister::<S>()
    }

    /// Enable or disable a system by type; `false` if it is not registered
    pub fn set_system_enabled<S: System>(&mut self, enabled: bool) -> bool {
        self.systems.set_enabled::<S>(enabled)
    }

    /// Register the built-in movement and collision systems
    pub fn add_physics_systems(&mut self) -> Result<()> {
        self.add_system(MovementSystem::new())?;
        self.add_system(CollisionSystem::new())
    }

    /// Run the integrity check now
    pub fn check_integrity(&mut self, repair: bool) -> Vec<KernelError> {
        self.entities.check_integrity(repair)
    }

    /// Destroy every entity and empty the index and pools; systems stay
    pub fn clear(&mut self) -> Result<()> {
        self.entities.clear()?;
        self.spatial.clear();
        self.pools.clear_all();
        Ok(())
    }

    /// The shared message bus
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Entity manager
    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    /// Entity manager, mutably
    pub fn entities_mut(&mut self) -> &mut EntityManager {
        &mut self.entities
    }

    /// System manager
    pub fn systems(&self) -> &SystemManager {
        &self.systems
    }

    /// System manager, mutably
    pub fn systems_mut(&mut self) -> &mut SystemManager {
        &mut self.systems
    }

    /// Spatial index
    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    /// Spatial index, mutably
    pub fn spatial_mut(&mut self) -> &mut SpatialIndex {
        &mut self.spatial
    }

    /// Object pools
    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    /// Object pools, mutably
    pub fn pools_mut(&mut self) -> &mut PoolRegistry {
        &mut self.pools
    }

    /// Timing of the last tick
    pub fn frame(&self) -> FrameInfo {
        self.clock.current
    }

    /// The configuration in use
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new(WorldConfig::default())
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("frame", &self.clock.current)
            .field("entities", &self.entities.live_count())
            .field("systems", &self.systems.system_count())
            .field("spatial", &self.spatial.len())
            .finish()
    }
}

/// Mutable access to one entity of a [`World`]
///
/// Methods that change the entity return `&mut Self` so they can be chained.
pub struct EntityMut<'w> {
    world: &'w mut World,
    entity: Entity,
}

impl EntityMut<'_> {
    /// The entity handle
    pub fn id(&self) -> Entity {
        self.entity
    }

    /// Attach or overwrite a component
    pub fn insert<T: Component>(&mut self, value: T) -> Result<&mut Self> {
        self.world.entities.add_component(self.entity, value)?;
        Ok(self)
    }

    /// Detach a component, returning whether the entity had one
    pub fn remove<T: Component>(&mut self) -> Result<bool> {
        self.world.entities.remove_component::<T>(self.entity)
    }

    /// Copy of a component
    pub fn get<T: Component>(&self) -> Option<T> {
        self.world.entities.get_component(self.entity)
    }

    /// Check whether the entity has a component
    pub fn has<T: Component>(&self) -> bool {
        self.world.entities.has_component::<T>(self.entity)
    }

    /// Modify a component in place, returning `false` if the entity has none
    pub fn update<T: Component>(&mut self, f: impl FnOnce(&mut T)) -> Result<bool> {
        self.world.entities.update_component::<T, _>(self.entity, f)
    }

    /// Add a tag
    pub fn tag(&mut self, tag: impl Into<Tag>) -> Result<&mut Self> {
        self.world.entities.add_tag(self.entity, tag)?;
        Ok(self)
    }

    /// Remove a tag, returning whether it was present
    pub fn untag(&mut self, tag: impl Into<Tag>) -> Result<bool> {
        self.world.entities.remove_tag(self.entity, tag)
    }

    /// Check whether the entity carries a tag
    pub fn has_tag(&self, tag: impl Into<Tag>) -> bool {
        self.world.entities.has_tag(self.entity, &tag.into())
    }

    /// The entity's tags
    pub fn tags(&self) -> Option<&TagSet> {
        self.world.entities.tags(self.entity)
    }

    /// Destroy the entity
    pub fn destroy(self) -> Result<()> {
        self.world.destroy_entity(self.entity)
    }
}
