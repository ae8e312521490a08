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
//! Component storage and management
//!
//! Components are plain data attached to entities. Each component type lives
//! in one store that exclusively owns its backing memory; entities and systems
//! address it only through the entity→slot map, never by reference held across
//! calls, so a store can be compacted or grown freely.
//!
//! Every store shares the same slot bookkeeping ([`SlotIndex`]):
//!
//! - allocation pops a freelist before extending the backing arrays
//! - the backing arrays never grow past a fixed capacity
//!   ([`KernelError::CapacityExceeded`] instead)
//! - freed slots are reset to the component's default before reuse
//!
//! Row-major types use [`DenseStore`]. The hot physics types use columnar
//! stores (see [`crate::ecs::components`]).

use crate::ecs::registry::ComponentRegistry;
use crate::ecs::Entity;
use crate::error::{KernelError, Result};
use std::any::Any;

/// Trait that all components must implement
///
/// Components are plain `Copy` data with a `Default` that represents a zeroed
/// slot. The associated storage and accessor functions give compile-time
/// checked access through the [`ComponentRegistry`].
///
/// # Examples
///
/// ```
/// use sim_kernel::ecs::{Component, ComponentRegistry, DenseStore};
///
/// #[derive(Debug, Clone, Copy, Default, PartialEq)]
/// struct Health(f32);
///
/// impl Component for Health {
///     const NAME: &'static str = "health";
///     type Storage = DenseStore<Health>;
///
///     fn storage(registry: &ComponentRegistry) -> Option<&DenseStore<Health>> {
///         registry.dense::<Health>()
///     }
///
///     fn storage_mut(registry: &mut ComponentRegistry) -> Option<&mut DenseStore<Health>> {
///         registry.dense_mut::<Health>()
///     }
/// }
/// ```
pub trait Component: Copy + Default + 'static {
    /// Name used in logs and errors
    const NAME: &'static str;

    /// The store that holds this component type
    type Storage: ComponentStorage<Component = Self> + 'static;

    /// Look up this type's store
    fn storage(registry: &ComponentRegistry) -> Option<&Self::Storage>;

    /// Look up this type's store mutably
    fn storage_mut(registry: &mut ComponentRegistry) -> Option<&mut Self::Storage>;
}

/// Index of a registered component type, also its bit in a [`ComponentMask`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u8);

impl ComponentId {
    /// Maximum number of component types a registry can hold
    pub const MAX: usize = 64;

    /// Raw index
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Bitset of component types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ComponentMask(u64);

impl ComponentMask {
    /// The empty mask
    pub const EMPTY: ComponentMask = ComponentMask(0);

    /// Mask with one additional component type
    pub fn with(self, id: ComponentId) -> Self {
        ComponentMask(self.0 | (1 << id.0))
    }

    /// Set a component bit
    pub fn insert(&mut self, id: ComponentId) {
        self.0 |= 1 << id.0;
    }

    /// Clear a component bit
    pub fn remove(&mut self, id: ComponentId) {
        self.0 &= !(1 << id.0);
    }

    /// Check a single component bit
    pub fn contains(&self, id: ComponentId) -> bool {
        self.0 & (1 << id.0) != 0
    }

    /// Check that every bit of `other` is set here
    pub fn contains_all(&self, other: ComponentMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether the masks share a bit
    pub fn intersects(&self, other: ComponentMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Check if no bit is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate the component ids in the mask
    pub fn ids(&self) -> impl Iterator<Item = ComponentId> {
        let bits = self.0;
        (0..ComponentId::MAX as u8).filter(move |i| bits & (1 << *i) != 0).map(ComponentId)
    }
}

const VACANT: u32 = u32::MAX;

/// Outcome of claiming a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// Backing arrays must grow by one element
    Fresh(usize),
    /// A freelist slot, already reset
    Reused(usize),
}

/// Entity→slot bookkeeping shared by every store
///
/// `sparse` is indexed by entity id and holds a slot number; `owners` is
/// indexed by slot and holds the full handle, so a stale generation never
/// resolves to a slot.
#[derive(Debug, Clone)]
pub struct SlotIndex {
    sparse: Vec<u32>,
    owners: Vec<Option<Entity>>,
    free: Vec<u32>,
    capacity: usize,
    len: usize,
}

impl SlotIndex {
    /// Create slot bookkeeping for at most `capacity` slots
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(VACANT as usize);
        SlotIndex {
            sparse: Vec::new(),
            owners: Vec::new(),
            free: Vec::new(),
            capacity,
            len: 0,
        }
    }

    /// Slot owned by `entity`, if any
    #[inline]
    pub fn slot(&self, entity: Entity) -> Option<usize> {
        let slot = *self.sparse.get(entity.index())?;
        if slot == VACANT {
            return None;
        }
        match self.owners.get(slot as usize) {
            Some(Some(owner)) if *owner == entity => Some(slot as usize),
            _ => None,
        }
    }

    /// Owner of a slot, if it is live
    pub fn owner(&self, slot: usize) -> Option<Entity> {
        self.owners.get(slot).copied().flatten()
    }

    /// Slot owners in slot order; `None` marks a freed slot
    pub fn owners(&self) -> &[Option<Entity>] {
        &self.owners
    }

    /// Iterate live entities in slot order
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.owners.iter().flatten().copied()
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no slot is live
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hard slot limit
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Length of the backing arrays, live or free
    pub fn high_water(&self) -> usize {
        self.owners.len()
    }

    /// Number of freed slots awaiting reuse
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn claim(&mut self, entity: Entity) -> Option<Claim> {
        let claim = if let Some(slot) = self.free.pop() {
            Claim::Reused(slot as usize)
        } else if self.owners.len() < self.capacity {
            self.owners.push(None);
            Claim::Fresh(self.owners.len() - 1)
        } else {
            return None;
        };

        let slot = match claim {
            Claim::Fresh(slot) | Claim::Reused(slot) => slot,
        };
        self.owners[slot] = Some(entity);
        let index = entity.index();
        if index >= self.sparse.len() {
            self.sparse.resize(index + 1, VACANT);
        }
        self.sparse[index] = slot as u32;
        self.len += 1;
        Some(claim)
    }

    pub(crate) fn release(&mut self, entity: Entity) -> Option<usize> {
        let slot = self.slot(entity)?;
        self.owners[slot] = None;
        self.sparse[entity.index()] = VACANT;
        self.free.push(slot as u32);
        self.len -= 1;
        Some(slot)
    }

    /// Move live slots into the holes below `len`
    ///
    /// Returns the `(from, to)` moves performed, highest occupied slot first.
    /// The backing arrays must be truncated to `len()` afterwards.
    pub(crate) fn compact(&mut self) -> Vec<(usize, usize)> {
        let live = self.len;
        let mut moves = Vec::new();
        let mut from = self.owners.len();

        for to in 0..live {
            if self.owners[to].is_some() {
                continue;
            }
            // every hole in the live prefix is matched by an owner above it
            while from > live {
                from -= 1;
                if let Some(entity) = self.owners[from].take() {
                    self.owners[to] = Some(entity);
                    self.sparse[entity.index()] = to as u32;
                    moves.push((from, to));
                    break;
                }
            }
        }

        self.owners.truncate(live);
        self.free.clear();
        moves
    }

    pub(crate) fn clear(&mut self) {
        self.sparse.clear();
        self.owners.clear();
        self.free.clear();
        self.len = 0;
    }
}

/// Storage interface for components
///
/// Implementors supply the slot bookkeeping and four backing-array hooks; the
/// allocation protocol (freelist first, hard capacity, reset on free) is
/// provided here so every store follows it.
pub trait ComponentStorage {
    /// The component type this storage manages
    type Component: Component;

    /// Slot bookkeeping
    fn slots(&self) -> &SlotIndex;

    /// Mutable slot bookkeeping
    fn slots_mut(&mut self) -> &mut SlotIndex;

    /// Append one default element to every backing array
    fn push_slot(&mut self);

    /// Reset a slot's data to the default value
    fn reset_slot(&mut self, slot: usize);

    /// Copy slot data from `from` to `to`
    fn move_slot(&mut self, from: usize, to: usize);

    /// Shrink every backing array to `len` elements
    fn truncate_slots(&mut self, len: usize);

    /// Copy the component out of a slot
    fn read_slot(&self, slot: usize) -> Self::Component;

    /// Overwrite a slot with a component value
    fn write_slot(&mut self, slot: usize, value: Self::Component);

    /// Claim a slot for `entity`, returning the existing one if already held
    fn allocate(&mut self, entity: Entity) -> Result<usize> {
        if let Some(slot) = self.slots().slot(entity) {
            return Ok(slot);
        }
        match self.slots_mut().claim(entity) {
            Some(Claim::Fresh(slot)) => {
                self.push_slot();
                Ok(slot)
            }
            Some(Claim::Reused(slot)) => Ok(slot),
            None => Err(KernelError::CapacityExceeded {
                store: Self::Component::NAME.to_string(),
                capacity: self.slots().capacity(),
            }),
        }
    }

    /// Release the entity's slot, resetting its data
    fn free(&mut self, entity: Entity) -> bool {
        match self.slots_mut().release(entity) {
            Some(slot) => {
                self.reset_slot(slot);
                true
            }
            None => false,
        }
    }

    /// Slot held by `entity`
    fn slot(&self, entity: Entity) -> Option<usize> {
        self.slots().slot(entity)
    }

    /// Check if an entity has this component
    fn has(&self, entity: Entity) -> bool {
        self.slots().slot(entity).is_some()
    }

    /// Allocate if needed and write the value
    fn insert(&mut self, entity: Entity, value: Self::Component) -> Result<usize> {
        let slot = self.allocate(entity)?;
        self.write_slot(slot, value);
        Ok(slot)
    }

    /// Copy the entity's component out
    fn read(&self, entity: Entity) -> Option<Self::Component> {
        self.slot(entity).map(|slot| self.read_slot(slot))
    }

    /// Overwrite the entity's component, returning `false` if it has none
    fn write(&mut self, entity: Entity, value: Self::Component) -> bool {
        match self.slot(entity) {
            Some(slot) => {
                self.write_slot(slot, value);
                true
            }
            None => false,
        }
    }

    /// Number of live components
    fn len(&self) -> usize {
        self.slots().len()
    }

    /// Check if the store is empty
    fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    /// Hard slot limit
    fn capacity(&self) -> usize {
        self.slots().capacity()
    }

    /// Pack live slots into a dense prefix, returning how many moved
    fn compact(&mut self) -> usize {
        let moves = self.slots_mut().compact();
        for &(from, to) in &moves {
            self.move_slot(from, to);
        }
        let live = self.slots().len();
        self.truncate_slots(live);
        moves.len()
    }

    /// Remove every component
    fn clear(&mut self) {
        self.slots_mut().clear();
        self.truncate_slots(0);
    }
}

/// Object-safe view of a store, used for teardown and indexing
pub(crate) trait ErasedStorage {
    fn slot_index(&self) -> &SlotIndex;
    fn free_entity(&mut self, entity: Entity) -> bool;
    fn compact_all(&mut self) -> usize;
    fn clear_all(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<S: ComponentStorage + 'static> ErasedStorage for S {
    fn slot_index(&self) -> &SlotIndex {
        self.slots()
    }

    fn free_entity(&mut self, entity: Entity) -> bool {
        self.free(entity)
    }

    fn compact_all(&mut self) -> usize {
        self.compact()
    }

    fn clear_all(&mut self) {
        self.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Row-major component storage
///
/// One `Vec<T>` indexed by slot. Used for heterogeneous component types where
/// batch passes read whole records rather than single fields.
#[derive(Debug, Clone)]
pub struct DenseStore<T: Component> {
    slots: SlotIndex,
    data: Vec<T>,
}

impl<T: Component> DenseStore<T> {
    /// Create a store holding at most `capacity` components
    pub fn with_capacity(capacity: usize) -> Self {
        DenseStore {
            slots: SlotIndex::with_capacity(capacity),
            data: Vec::new(),
        }
    }

    /// Get a reference to a component for the given entity
    pub fn get(&self, entity: Entity) -> Option<&T> {
        let slot = self.slots.slot(entity)?;
        Some(&self.data[slot])
    }

    /// Get a mutable reference to a component for the given entity
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        let slot = self.slots.slot(entity)?;
        Some(&mut self.data[slot])
    }

    /// Iterate live components with their owners
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        self.slots
            .owners()
            .iter()
            .zip(self.data.iter())
            .filter_map(|(owner, value)| owner.map(|entity| (entity, value)))
    }

    /// The backing array, freed slots included
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T: Component> ComponentStorage for DenseStore<T> {
    type Component = T;

    fn slots(&self) -> &SlotIndex {
        &self.slots
    }

    fn slots_mut(&mut self) -> &mut SlotIndex {
        &mut self.slots
    }

    fn push_slot(&mut self) {
        self.data.push(T::default());
    }

    fn reset_slot(&mut self, slot: usize) {
        self.data[slot] = T::default();
    }

    fn move_slot(&mut self, from: usize, to: usize) {
        self.data[to] = self.data[from];
    }

    fn truncate_slots(&mut self, len: usize) {
        self.data.truncate(len);
    }

    fn read_slot(&self, slot: usize) -> T {
        self.data[slot]
    }

    fn write_slot(&mut self, slot: usize, value: T) {
        self.data[slot] = value;
    }
}
