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
//! Typed component registry
//!
//! The registry owns one store per component type. Built-in physics types are
//! fixed fields; user types are registered at runtime and kept behind
//! `TypeId`. Each type gets a [`ComponentId`] that doubles as its bit in a
//! [`ComponentMask`].

use crate::ecs::component::{
    Component, ComponentId, ComponentMask, ComponentStorage, DenseStore, ErasedStorage, SlotIndex,
};
use crate::ecs::components::{Collider, Rigidbody, RigidbodyStore, Transform, TransformStore};
use crate::error::{KernelError, Result};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

/// Well-known ids of the built-in component types
pub mod builtin {
    use crate::ecs::component::ComponentId;

    /// [`Transform`](crate::ecs::components::Transform)
    pub const TRANSFORM: ComponentId = ComponentId(0);
    /// [`Rigidbody`](crate::ecs::components::Rigidbody)
    pub const RIGIDBODY: ComponentId = ComponentId(1);
    /// [`Collider`](crate::ecs::components::Collider)
    pub const COLLIDER: ComponentId = ComponentId(2);
}

/// Owner of every component store
pub struct ComponentRegistry {
    transforms: TransformStore,
    bodies: RigidbodyStore,
    colliders: DenseStore<Collider>,
    custom: HashMap<TypeId, Box<dyn ErasedStorage>>,
    ids: HashMap<TypeId, ComponentId>,
    types: Vec<TypeId>,
    names: Vec<&'static str>,
    capacity: usize,
}

impl ComponentRegistry {
    /// Create a registry whose stores each hold at most `capacity` components
    pub fn with_capacity(capacity: usize) -> Self {
        let mut registry = ComponentRegistry {
            transforms: TransformStore::with_capacity(capacity),
            bodies: RigidbodyStore::with_capacity(capacity),
            colliders: DenseStore::with_capacity(capacity),
            custom: HashMap::new(),
            ids: HashMap::new(),
            types: Vec::new(),
            names: Vec::new(),
            capacity,
        };
        registry.record::<Transform>();
        registry.record::<Rigidbody>();
        registry.record::<Collider>();
        registry
    }

    fn record<T: Component>(&mut self) -> ComponentId {
        let id = ComponentId(self.types.len() as u8);
        self.ids.insert(TypeId::of::<T>(), id);
        self.types.push(TypeId::of::<T>());
        self.names.push(T::NAME);
        id
    }

    /// Register a user component type backed by a [`DenseStore`]
    pub fn register<T>(&mut self) -> Result<ComponentId>
    where
        T: Component<Storage = DenseStore<T>>,
    {
        if self.ids.contains_key(&TypeId::of::<T>()) {
            return Err(KernelError::DuplicateRegistration(format!(
                "component `{}`",
                T::NAME
            )));
        }
        if self.types.len() >= ComponentId::MAX {
            return Err(KernelError::CapacityExceeded {
                store: "component registry".to_string(),
                capacity: ComponentId::MAX,
            });
        }
        self.custom.insert(
            TypeId::of::<T>(),
            Box::new(DenseStore::<T>::with_capacity(self.capacity)),
        );
        let id = self.record::<T>();
        log::debug!("registered component `{}` as {:?}", T::NAME, id);
        Ok(id)
    }

    /// Check whether a component type is registered
    pub fn is_registered<T: Component>(&self) -> bool {
        self.ids.contains_key(&TypeId::of::<T>())
    }

    /// Id of a registered component type
    pub fn id_of<T: Component>(&self) -> Result<ComponentId> {
        self.id_of_type(TypeId::of::<T>())
            .ok_or(KernelError::UnregisteredComponent(T::NAME))
    }

    pub(crate) fn id_of_type(&self, type_id: TypeId) -> Option<ComponentId> {
        self.ids.get(&type_id).copied()
    }

    /// Name of a registered component type
    pub fn name_of(&self, id: ComponentId) -> Option<&'static str> {
        self.names.get(id.index()).copied()
    }

    /// Number of registered component types, built-ins included
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Always false; the built-in types are registered at construction
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Ids of every registered type
    pub fn ids(&self) -> impl Iterator<Item = ComponentId> {
        (0..self.types.len() as u8).map(ComponentId)
    }

    /// Mask with every registered type set
    pub fn all(&self) -> ComponentMask {
        self.ids().fold(ComponentMask::EMPTY, ComponentMask::with)
    }

    /// Store of a user component type
    pub fn dense<T: Component>(&self) -> Option<&DenseStore<T>> {
        self.custom
            .get(&TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<DenseStore<T>>()
    }

    /// Mutable store of a user component type
    pub fn dense_mut<T: Component>(&mut self) -> Option<&mut DenseStore<T>> {
        self.custom
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<DenseStore<T>>()
    }

    /// Transform store
    pub fn transforms(&self) -> &TransformStore {
        &self.transforms
    }

    /// Mutable transform store
    pub fn transforms_mut(&mut self) -> &mut TransformStore {
        &mut self.transforms
    }

    /// Rigidbody store
    pub fn bodies(&self) -> &RigidbodyStore {
        &self.bodies
    }

    /// Mutable rigidbody store
    pub fn bodies_mut(&mut self) -> &mut RigidbodyStore {
        &mut self.bodies
    }

    /// Collider store
    pub fn colliders(&self) -> &DenseStore<Collider> {
        &self.colliders
    }

    /// Mutable collider store
    pub fn colliders_mut(&mut self) -> &mut DenseStore<Collider> {
        &mut self.colliders
    }

    /// Split borrow of the physics stores
    pub fn physics_mut(
        &mut self,
    ) -> (&mut TransformStore, &mut RigidbodyStore, &DenseStore<Collider>) {
        (&mut self.transforms, &mut self.bodies, &self.colliders)
    }

    fn erased(&self, id: ComponentId) -> Option<&dyn ErasedStorage> {
        match id {
            builtin::TRANSFORM => Some(&self.transforms),
            builtin::RIGIDBODY => Some(&self.bodies),
            builtin::COLLIDER => Some(&self.colliders),
            _ => {
                let type_id = self.types.get(id.index())?;
                self.custom.get(type_id).map(|store| store.as_ref())
            }
        }
    }

    fn erased_mut(&mut self, id: ComponentId) -> Option<&mut (dyn ErasedStorage + 'static)> {
        match id {
            builtin::TRANSFORM => Some(&mut self.transforms),
            builtin::RIGIDBODY => Some(&mut self.bodies),
            builtin::COLLIDER => Some(&mut self.colliders),
            _ => {
                let type_id = self.types.get(id.index())?;
                self.custom.get_mut(type_id).map(|store| store.as_mut())
            }
        }
    }

    /// Slot bookkeeping of one type; its owners are the type's holder list
    pub fn holders(&self, id: ComponentId) -> Option<&SlotIndex> {
        self.erased(id).map(|store| store.slot_index())
    }

    pub(crate) fn free(&mut self, id: ComponentId, entity: crate::ecs::Entity) -> bool {
        self.erased_mut(id)
            .map(|store| store.free_entity(entity))
            .unwrap_or(false)
    }

    /// Compact every store, returning the total number of moved slots
    pub fn compact(&mut self) -> usize {
        let mut moved = self.transforms.compact() + self.bodies.compact() + self.colliders.compact();
        for store in self.custom.values_mut() {
            moved += store.compact_all();
        }
        moved
    }

    /// Drop every component of every type
    pub fn clear(&mut self) {
        self.transforms.clear();
        self.bodies.clear();
        self.colliders.clear();
        for store in self.custom.values_mut() {
            store.clear_all();
        }
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for id in self.ids() {
            let len = self.holders(id).map(SlotIndex::len).unwrap_or(0);
            map.entry(&self.names[id.index()], &len);
        }
        map.finish()
    }
}

impl Component for Transform {
    const NAME: &'static str = "transform";
    type Storage = TransformStore;

    fn storage(registry: &ComponentRegistry) -> Option<&TransformStore> {
        Some(&registry.transforms)
    }

    fn storage_mut(registry: &mut ComponentRegistry) -> Option<&mut TransformStore> {
        Some(&mut registry.transforms)
    }
}

impl Component for Rigidbody {
    const NAME: &'static str = "rigidbody";
    type Storage = RigidbodyStore;

    fn storage(registry: &ComponentRegistry) -> Option<&RigidbodyStore> {
        Some(&registry.bodies)
    }

    fn storage_mut(registry: &mut ComponentRegistry) -> Option<&mut RigidbodyStore> {
        Some(&mut registry.bodies)
    }
}

impl Component for Collider {
    const NAME: &'static str = "collider";
    type Storage = DenseStore<Collider>;

    fn storage(registry: &ComponentRegistry) -> Option<&DenseStore<Collider>> {
        Some(&registry.colliders)
    }

    fn storage_mut(registry: &mut ComponentRegistry) -> Option<&mut DenseStore<Collider>> {
        Some(&mut registry.colliders)
    }
}
