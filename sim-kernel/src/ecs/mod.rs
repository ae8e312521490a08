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
//! Entity Component System (ECS) core implementation
//!
//! This module provides the foundational ECS architecture including:
//! - Generational entity handles and tags
//! - Component storage with slot reuse, columnar layouts for the physics types
//! - System scheduling by priority with cached entity lists
//! - The [`World`] composition root

mod component;
pub mod components;
mod entity;
mod manager;
mod registry;
mod scheduler;
mod system;
mod tag;
mod world;

pub use component::{Component, ComponentId, ComponentMask, ComponentStorage, DenseStore, SlotIndex};
pub use entity::{Entity, EntityId};
pub use manager::{EntityConfig, EntityManager, EntityStats};
pub use registry::{builtin, ComponentRegistry};
pub use scheduler::{priorities, SystemFailure, SystemManager, SystemStats};
pub use system::{Query, System, SystemContext};
pub use tag::{Tag, TagSet};
pub use world::{EntityMut, FrameInfo, FrameReport, World, WorldConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_creation() {
        let world = World::default();
        assert_eq!(world.entities().live_count(), 0);
        assert_eq!(world.frame(), FrameInfo::default());
    }

    #[test]
    fn test_entity_creation() {
        let mut world = World::default();
        let entity = world.create_entity(["player"]).unwrap();
        assert_eq!(world.entities().live_count(), 1);
        assert!(world.is_alive(entity));
    }
}
