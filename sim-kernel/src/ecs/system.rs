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
//! System trait and queries
//!
//! A system declares which entities it cares about through a [`Query`]; the
//! [`SystemManager`](crate::ecs::SystemManager) resolves it once and keeps the
//! matching entity list cached until a membership event invalidates it.

use crate::bus::MessageBus;
use crate::ecs::component::{Component, ComponentMask};
use crate::ecs::manager::EntityManager;
use crate::ecs::registry::ComponentRegistry;
use crate::ecs::{Entity, FrameInfo, Tag};
use crate::error::{KernelError, Result};
use crate::pool::PoolRegistry;
use crate::spatial::SpatialIndex;
use std::any::TypeId;

/// Entity filter declared by a system
///
/// An empty query matches no entities; systems that only do batch work over
/// the stores leave it empty and override [`System::update`].
///
/// # Examples
///
/// ```
/// use sim_kernel::ecs::Query;
/// use sim_kernel::ecs::components::{Collider, Transform};
///
/// let query = Query::new().with::<Transform>().with::<Collider>().tagged("asteroid");
/// assert!(!query.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Query {
    components: Vec<(TypeId, &'static str)>,
    tags: Vec<Tag>,
}

impl Query {
    /// Create an empty query
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a component type
    pub fn with<T: Component>(mut self) -> Self {
        self.components.push((TypeId::of::<T>(), T::NAME));
        self
    }

    /// Require a tag
    pub fn tagged(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Check whether the query has no requirement
    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.tags.is_empty()
    }

    pub(crate) fn resolve(&self, registry: &ComponentRegistry) -> Result<ResolvedQuery> {
        let mut mask = ComponentMask::EMPTY;
        for &(type_id, name) in &self.components {
            let id = registry
                .id_of_type(type_id)
                .ok_or(KernelError::UnregisteredComponent(name))?;
            mask.insert(id);
        }
        Ok(ResolvedQuery {
            mask,
            tags: self.tags.clone(),
        })
    }
}

/// A query with component types mapped to ids
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedQuery {
    pub(crate) mask: ComponentMask,
    pub(crate) tags: Vec<Tag>,
}

impl ResolvedQuery {
    pub(crate) fn is_empty(&self) -> bool {
        self.mask.is_empty() && self.tags.is_empty()
    }
}

/// Everything a system may touch during a tick
pub struct SystemContext<'a> {
    /// Entities, tags and component stores
    pub entities: &'a mut EntityManager,
    /// The world's bus
    pub bus: &'a MessageBus,
    /// Broad-phase index
    pub spatial: &'a mut SpatialIndex,
    /// Object pools
    pub pools: &'a mut PoolRegistry,
    /// Timing of the current tick
    pub frame: FrameInfo,
}

impl SystemContext<'_> {
    /// Clamped delta of the current tick, in seconds
    pub fn delta(&self) -> f64 {
        self.frame.delta
    }
}

/// A unit of per-tick behavior
///
/// Lower priorities run first; ties keep registration order. The default
/// [`System::update`] walks the cached entity list and calls
/// [`System::process_entity`] for each entity still alive.
pub trait System: 'static {
    /// Name used in logs, stats and failure reports
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Execution priority
    fn priority(&self) -> i32 {
        0
    }

    /// Entities this system processes
    fn query(&self) -> Query {
        Query::new()
    }

    /// Called once, after registration and before the first update
    fn initialize(&mut self, _ctx: &mut SystemContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Run one tick over the matching entities
    fn update(&mut self, entities: &[Entity], ctx: &mut SystemContext<'_>) -> Result<()> {
        for &entity in entities {
            // destroyed by an earlier system this tick
            if !ctx.entities.is_alive(entity) {
                continue;
            }
            self.process_entity(entity, ctx)?;
        }
        Ok(())
    }

    /// Per-entity hook used by the default [`System::update`]
    fn process_entity(&mut self, _entity: Entity, _ctx: &mut SystemContext<'_>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::components::{Rigidbody, Transform};
    use crate::ecs::registry::builtin;

    #[derive(Debug, Clone, Copy, Default)]
    struct Unregistered;

    impl Component for Unregistered {
        const NAME: &'static str = "unregistered";
        type Storage = crate::ecs::DenseStore<Unregistered>;

        fn storage(registry: &ComponentRegistry) -> Option<&Self::Storage> {
            registry.dense::<Unregistered>()
        }

        fn storage_mut(registry: &mut ComponentRegistry) -> Option<&mut Self::Storage> {
            registry.dense_mut::<Unregistered>()
        }
    }

    #[test]
    fn test_query_resolution() {
        let registry = ComponentRegistry::with_capacity(4);
        let resolved = Query::new()
            .with::<Transform>()
            .with::<Rigidbody>()
            .tagged("enemy")
            .resolve(&registry)
            .unwrap();

        assert!(resolved.mask.contains(builtin::TRANSFORM));
        assert!(resolved.mask.contains(builtin::RIGIDBODY));
        assert!(!resolved.mask.contains(builtin::COLLIDER));
        assert_eq!(resolved.tags, vec![Tag::Enemy]);
    }

    #[test]
    fn test_unregistered_component_in_query() {
        let registry = ComponentRegistry::with_capacity(4);
        let err = Query::new().with::<Unregistered>().resolve(&registry).unwrap_err();
        assert_eq!(err, KernelError::UnregisteredComponent("unregistered"));
    }

    #[test]
    fn test_empty_query() {
        let registry = ComponentRegistry::with_capacity(4);
        assert!(Query::new().is_empty());
        assert!(Query::new().resolve(&registry).unwrap().is_empty());
    }
}
