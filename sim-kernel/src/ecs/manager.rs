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
//! Entity lifecycle, tags and component membership
//!
//! The manager owns the per-entity tables (generation, live flag, component
//! mask, tag set), the tag index and the component registry. Every membership
//! change is published on the bus so systems can invalidate cached entity
//! lists instead of rescanning each tick.
//!
//! Destroyed ids go to a bounded FIFO recycle pool. An id is pushed there only
//! after every component slot was freed and every tag cleared; ids that find
//! the pool full are retired for good.

use crate::bus::{topics, MessageBus, Payload};
use crate::ecs::component::{Component, ComponentId, ComponentMask, ComponentStorage, DenseStore};
use crate::ecs::registry::ComponentRegistry;
use crate::ecs::tag::{Tag, TagSet, KNOWN_TAG_COUNT};
use crate::ecs::Entity;
use crate::error::{KernelError, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Entity manager configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityConfig {
    /// Destroyed ids kept for reuse; further ids are retired
    pub recycle_capacity: usize,
    /// Hard limit of every component store
    pub component_capacity: usize,
    /// Number of ids that may ever be minted
    pub max_entities: usize,
}

impl EntityConfig {
    /// Set the recycle pool capacity
    pub fn with_recycle_capacity(mut self, capacity: usize) -> Self {
        self.recycle_capacity = capacity;
        self
    }

    /// Set the per-store component capacity
    pub fn with_component_capacity(mut self, capacity: usize) -> Self {
        self.component_capacity = capacity;
        self
    }

    /// Set the id limit
    pub fn with_max_entities(mut self, max: usize) -> Self {
        self.max_entities = max;
        self
    }
}

impl Default for EntityConfig {
    fn default() -> Self {
        EntityConfig {
            recycle_capacity: 100,
            component_capacity: 65_536,
            max_entities: 1 << 20,
        }
    }
}

/// Lifecycle counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityStats {
    /// Entities created
    pub created: u64,
    /// Entities destroyed
    pub destroyed: u64,
    /// Creations served from the recycle pool
    pub recycled: u64,
    /// Ids dropped because the recycle pool was full
    pub retired: u64,
}

/// Tag → entities index
#[derive(Debug, Default)]
struct TagIndex {
    known: [BTreeSet<Entity>; KNOWN_TAG_COUNT],
    named: HashMap<Cow<'static, str>, BTreeSet<Entity>>,
}

impl TagIndex {
    fn set(&self, tag: &Tag) -> Option<&BTreeSet<Entity>> {
        match (tag.bit(), tag) {
            (Some(bit), _) => self.known.get(bit as usize),
            (None, Tag::Named(name)) => self.named.get(name),
            (None, _) => None,
        }
    }

    fn set_mut(&mut self, tag: &Tag) -> Option<&mut BTreeSet<Entity>> {
        match (tag.bit(), tag) {
            (Some(bit), _) => self.known.get_mut(bit as usize),
            (None, Tag::Named(name)) => Some(self.named.entry(name.clone()).or_default()),
            (None, _) => None,
        }
    }

    fn insert(&mut self, tag: &Tag, entity: Entity) {
        if let Some(set) = self.set_mut(tag) {
            set.insert(entity);
        }
    }

    fn remove(&mut self, tag: &Tag, entity: Entity) {
        match (tag.bit(), tag) {
            (Some(bit), _) => {
                self.known[bit as usize].remove(&entity);
            }
            (None, Tag::Named(name)) => {
                if let Some(set) = self.named.get_mut(name) {
                    set.remove(&entity);
                    if set.is_empty() {
                        self.named.remove(name);
                    }
                }
            }
            (None, _) => {}
        }
    }

    fn contains(&self, tag: &Tag, entity: Entity) -> bool {
        self.set(tag).is_some_and(|set| set.contains(&entity))
    }

    fn entries(&self) -> Vec<(Tag, Entity)> {
        let mut entries = Vec::new();
        for (bit, set) in self.known.iter().enumerate() {
            if let Some(tag) = Tag::from_bit(bit as u32) {
                entries.extend(set.iter().map(|&e| (tag.clone(), e)));
            }
        }
        for (name, set) in &self.named {
            entries.extend(set.iter().map(|&e| (Tag::Named(name.clone()), e)));
        }
        entries
    }
}

/// Owner of entity identity, tags and component membership
#[derive(Debug)]
pub struct EntityManager {
    config: EntityConfig,
    bus: MessageBus,
    registry: ComponentRegistry,
    generations: Vec<u32>,
    alive: Vec<bool>,
    masks: Vec<ComponentMask>,
    tags: Vec<TagSet>,
    tag_index: TagIndex,
    recycled: VecDeque<u64>,
    live: usize,
    stats: EntityStats,
}

impl EntityManager {
    /// Create a manager publishing on `bus`
    pub fn new(bus: MessageBus, config: EntityConfig) -> Self {
        EntityManager {
            registry: ComponentRegistry::with_capacity(config.component_capacity),
            config,
            bus,
            generations: Vec::new(),
            alive: Vec::new(),
            masks: Vec::new(),
            tags: Vec::new(),
            tag_index: TagIndex::default(),
            recycled: VecDeque::new(),
            live: 0,
            stats: EntityStats::default(),
        }
    }

    /// Create an entity, reusing a recycled id when one is available
    ///
    /// Publishes `entity.created`, then `tag.added` for each initial tag.
    pub fn create<I>(&mut self, tags: I) -> Result<Entity>
    where
        I: IntoIterator,
        I::Item: Into<Tag>,
    {
        let index = match self.recycled.pop_front() {
            Some(id) => {
                self.stats.recycled += 1;
                id as usize
            }
            None => {
                let next = self.generations.len();
                if next >= self.config.max_entities {
                    return Err(KernelError::CapacityExceeded {
                        store: "entities".to_string(),
                        capacity: self.config.max_entities,
                    });
                }
                self.generations.push(0);
                self.alive.push(false);
                self.masks.push(ComponentMask::EMPTY);
                self.tags.push(TagSet::new());
                next
            }
        };

        self.alive[index] = true;
        self.live += 1;
        self.stats.created += 1;
        let entity = Entity::new(index as u64, self.generations[index]);
        log::trace!("created {}", entity);
        self.bus.publish(topics::ENTITY_CREATED, Payload::Entity(entity));

        for tag in tags {
            self.add_tag(entity, tag)?;
        }
        Ok(entity)
    }

    /// Tear an entity down
    ///
    /// Frees every component (publishing `component.removed`), clears its tags
    /// (`tag.removed`), bumps the id's generation, offers the id to the recycle
    /// pool and publishes `entity.destroyed` with the now-dead handle.
    pub fn destroy(&mut self, entity: Entity) -> Result<()> {
        self.ensure_alive(entity)?;
        let index = entity.index();

        // the mask can lag behind stores written through `registry_mut`
        self.masks[index] = ComponentMask::EMPTY;
        let ids: Vec<ComponentId> = self.registry.ids().collect();
        for id in ids {
            if self.registry.free(id, entity) {
                self.publish_component(topics::COMPONENT_REMOVED, entity, id);
            }
        }

        let tags = std::mem::take(&mut self.tags[index]);
        for tag in tags.iter() {
            self.tag_index.remove(&tag, entity);
            self.bus
                .publish(topics::TAG_REMOVED, Payload::Tag { entity, tag });
        }

        self.alive[index] = false;
        self.generations[index] = entity.successor().generation();
        self.live -= 1;
        self.stats.destroyed += 1;

        if self.recycled.len() < self.config.recycle_capacity {
            self.recycled.push_back(index as u64);
        } else {
            self.stats.retired += 1;
            log::debug!("recycle pool full, retiring id {}", index);
        }

        log::trace!("destroyed {}", entity);
        self.bus
            .publish(topics::ENTITY_DESTROYED, Payload::Entity(entity));
        Ok(())
    }

    /// Check whether a handle refers to a live entity
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        let index = entity.index();
        index < self.alive.len() && self.alive[index] && self.generations[index] == entity.generation()
    }

    fn ensure_alive(&self, entity: Entity) -> Result<()> {
        if self.is_alive(entity) {
            Ok(())
        } else {
            Err(KernelError::InvalidEntity(entity))
        }
    }

    /// Register a user component type
    pub fn register_component<T>(&mut self) -> Result<ComponentId>
    where
        T: Component<Storage = DenseStore<T>>,
    {
        self.registry.register::<T>()
    }

    /// Attach or overwrite a component
    ///
    /// Publishes `component.added` only when the entity did not have one.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        self.ensure_alive(entity)?;
        let id = self.registry.id_of::<T>()?;
        let store =
            T::storage_mut(&mut self.registry).ok_or(KernelError::UnregisteredComponent(T::NAME))?;
        let had = store.has(entity);
        store.insert(entity, value)?;

        if !had {
            self.masks[entity.index()].insert(id);
            self.publish_component(topics::COMPONENT_ADDED, entity, id);
        }
        Ok(())
    }

    /// Detach a component, returning whether it was present
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<bool> {
        self.ensure_alive(entity)?;
        let id = self.registry.id_of::<T>()?;
        let removed = T::storage_mut(&mut self.registry).is_some_and(|store| store.free(entity));

        if removed {
            self.masks[entity.index()].remove(id);
            self.publish_component(topics::COMPONENT_REMOVED, entity, id);
        }
        Ok(removed)
    }

    /// Copy of an entity's component
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<T> {
        T::storage(&self.registry)?.read(entity)
    }

    /// Check whether an entity has a component
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        T::storage(&self.registry).is_some_and(|store| store.has(entity))
    }

    /// Modify a component in place, returning `false` if the entity has none
    pub fn update_component<T, F>(&mut self, entity: Entity, f: F) -> Result<bool>
    where
        T: Component,
        F: FnOnce(&mut T),
    {
        self.ensure_alive(entity)?;
        let store =
            T::storage_mut(&mut self.registry).ok_or(KernelError::UnregisteredComponent(T::NAME))?;
        match store.read(entity) {
            Some(mut value) => {
                f(&mut value);
                Ok(store.write(entity, value))
            }
            None => Ok(false),
        }
    }

    fn publish_component(&self, topic: &'static str, entity: Entity, component: ComponentId) {
        let name = self.registry.name_of(component).unwrap_or("unknown");
        self.bus.publish(
            topic,
            Payload::Component {
                entity,
                component,
                name,
            },
        );
    }

    /// Add a tag, returning whether it was new
    pub fn add_tag(&mut self, entity: Entity, tag: impl Into<Tag>) -> Result<bool> {
        self.ensure_alive(entity)?;
        let tag = tag.into();
        if !self.tags[entity.index()].insert(&tag) {
            return Ok(false);
        }
        self.tag_index.insert(&tag, entity);
        self.bus
            .publish(topics::TAG_ADDED, Payload::Tag { entity, tag });
        Ok(true)
    }

    /// Remove a tag, returning whether it was present
    pub fn remove_tag(&mut self, entity: Entity, tag: impl Into<Tag>) -> Result<bool> {
        self.ensure_alive(entity)?;
        let tag = tag.into();
        if !self.tags[entity.index()].remove(&tag) {
            return Ok(false);
        }
        self.tag_index.remove(&tag, entity);
        self.bus
            .publish(topics::TAG_REMOVED, Payload::Tag { entity, tag });
        Ok(true)
    }

    /// Check whether a live entity carries a tag
    pub fn has_tag(&self, entity: Entity, tag: &Tag) -> bool {
        self.is_alive(entity) && self.tags[entity.index()].contains(tag)
    }

    /// Tags of a live entity
    pub fn tags(&self, entity: Entity) -> Option<&TagSet> {
        if self.is_alive(entity) {
            Some(&self.tags[entity.index()])
        } else {
            None
        }
    }

    /// Component mask of a live entity
    pub fn mask(&self, entity: Entity) -> Option<ComponentMask> {
        if self.is_alive(entity) {
            Some(self.masks[entity.index()])
        } else {
            None
        }
    }

    /// Entities carrying a tag, in id order
    pub fn get_by_tag(&self, tag: &Tag) -> Vec<Entity> {
        self.tag_index
            .set(tag)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Entities holding every component in `mask`, in id order
    pub fn get_with_components(&self, mask: ComponentMask) -> Vec<Entity> {
        let mut out = Vec::new();
        self.query_into(mask, &[], &mut out);
        out
    }

    /// Collect entities matching a component mask and a tag list into `out`
    ///
    /// Walks the smallest candidate list (a tag set or a component type's
    /// holders) and filters the rest by the cached mask and tag bits. An
    /// empty mask with no tags matches nothing. Output is sorted by id.
    pub fn query_into(&self, mask: ComponentMask, tags: &[Tag], out: &mut Vec<Entity>) {
        out.clear();

        let smallest_holders = mask
            .ids()
            .filter_map(|id| self.registry.holders(id))
            .min_by_key(|holders| holders.len());
        let smallest_tag = tags
            .iter()
            .map(|tag| self.tag_index.set(tag))
            .min_by_key(|set| set.map_or(0, BTreeSet::len));

        let matches = |entity: &Entity| {
            self.is_alive(*entity)
                && self.masks[entity.index()].contains_all(mask)
                && tags.iter().all(|tag| self.tags[entity.index()].contains(tag))
        };

        match (smallest_holders, smallest_tag) {
            // a tag with no index entry at all
            (_, Some(None)) => {}
            (Some(holders), Some(Some(set))) if holders.len() < set.len() => {
                out.extend(holders.entities().filter(matches));
                out.sort_unstable();
            }
            (_, Some(Some(set))) => out.extend(set.iter().copied().filter(matches)),
            (Some(holders), None) => {
                out.extend(holders.entities().filter(matches));
                out.sort_unstable();
            }
            (None, None) => {}
        }
    }

    /// Live entities in id order
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(index, _)| Entity::new(index as u64, self.generations[index]))
    }

    /// Number of live entities
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Ids waiting in the recycle pool
    pub fn recycled_count(&self) -> usize {
        self.recycled.len()
    }

    /// Lifecycle counters
    pub fn stats(&self) -> EntityStats {
        self.stats
    }

    /// The configuration in use
    pub fn config(&self) -> &EntityConfig {
        &self.config
    }

    /// The bus membership events are published on
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Component stores
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Mutable component stores
    ///
    /// For in-place value writes by batch systems. Attaching or detaching
    /// through the stores directly bypasses the masks and events; use
    /// [`EntityManager::add_component`] and friends for that.
    pub fn registry_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.registry
    }

    /// Destroy every live entity
    pub fn clear(&mut self) -> Result<()> {
        let live: Vec<Entity> = self.entities().collect();
        for entity in live {
            self.destroy(entity)?;
        }
        Ok(())
    }

    /// Compare the cached per-entity tag bits and component masks with the
    /// tag index and the component stores
    ///
    /// Returns one [`KernelError::TagInconsistency`] per mismatch. With
    /// `repair`, a tag present on either side is restored on both for live
    /// entities, masks are rebuilt from the stores, and index entries or
    /// component slots held by dead handles are dropped.
    pub fn check_integrity(&mut self, repair: bool) -> Vec<KernelError> {
        let mut issues = Vec::new();

        // cached tags missing from the index
        let live: Vec<Entity> = self.entities().collect();
        for &entity in &live {
            let missing: Vec<Tag> = self.tags[entity.index()]
                .iter()
                .filter(|tag| !self.tag_index.contains(tag, entity))
                .collect();
            for tag in missing {
                issues.push(KernelError::TagInconsistency {
                    entity,
                    detail: format!("tag `{}` missing from index", tag),
                });
                if repair {
                    self.tag_index.insert(&tag, entity);
                }
            }
        }

        // index entries not reflected in the cache
        for (tag, entity) in self.tag_index.entries() {
            if !self.is_alive(entity) {
                issues.push(KernelError::TagInconsistency {
                    entity,
                    detail: format!("index holds dead handle under `{}`", tag),
                });
                if repair {
                    self.tag_index.remove(&tag, entity);
                }
            } else if !self.tags[entity.index()].contains(&tag) {
                issues.push(KernelError::TagInconsistency {
                    entity,
                    detail: format!("tag `{}` missing from entity flags", tag),
                });
                if repair {
                    self.tags[entity.index()].insert(&tag);
                }
            }
        }

        // component masks against the stores
        let ids: Vec<ComponentId> = self.registry.ids().collect();
        for id in ids {
            let name = self.registry.name_of(id).unwrap_or("unknown");
            let holders: Vec<Entity> = self
                .registry
                .holders(id)
                .map(|slots| slots.entities().collect())
                .unwrap_or_default();

            for &entity in &holders {
                if !self.is_alive(entity) {
                    issues.push(KernelError::TagInconsistency {
                        entity,
                        detail: format!("dead handle holds a `{}` slot", name),
                    });
                    if repair {
                        self.registry.free(id, entity);
                    }
                } else if !self.masks[entity.index()].contains(id) {
                    issues.push(KernelError::TagInconsistency {
                        entity,
                        detail: format!("mask lacks `{}`", name),
                    });
                    if repair {
                        self.masks[entity.index()].insert(id);
                    }
                }
            }

            for &entity in &live {
                let in_store = self.registry.holders(id).is_some_and(|s| s.slot(entity).is_some());
                if self.masks[entity.index()].contains(id) && !in_store {
                    issues.push(KernelError::TagInconsistency {
                        entity,
                        detail: format!("mask claims `{}` without a slot", name),
                    });
                    if repair {
                        self.masks[entity.index()].remove(id);
                    }
                }
            }
        }

        for issue in &issues {
            log::warn!("integrity check: {}", issue);
        }
        issues
    }

    #[cfg(test)]
    pub(crate) fn corrupt_tag_cache(&mut self, entity: Entity, tag: &Tag, present: bool) {
        if present {
            self.tags[entity.index()].insert(tag);
        } else {
            self.tags[entity.index()].remove(tag);
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_mask(&mut self, entity: Entity, mask: ComponentMask) {
        self.masks[entity.index()] = mask;
    }
}
