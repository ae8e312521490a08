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
//! Entity handles
//!
//! Entities own no data. An [`Entity`] is an id plus a generation counter; the
//! id indexes every per-entity table and component slot map, the generation
//! lets the kernel reject handles that outlived a destroy.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw entity identifier, reused after the entity is torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct EntityId(u64);

impl EntityId {
    /// Wrap a raw id
    pub fn new(id: u64) -> Self {
        EntityId(id)
    }

    /// The raw id
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Generational entity handle
///
/// Two handles are equal only if both id and generation match, so a handle
/// kept past a destroy never aliases the entity that later reuses its id.
/// Handles order by id first, which the collision system relies on to visit
/// each unordered pair once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Entity {
    id: EntityId,
    generation: u32,
}

impl Entity {
    /// Build a handle from its parts
    pub fn new(id: u64, generation: u32) -> Self {
        Entity {
            id: EntityId::new(id),
            generation,
        }
    }

    /// The recyclable id
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// How many times the id was destroyed before this handle was issued
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// The handle the next holder of this id will receive
    pub fn successor(&self) -> Entity {
        Entity {
            id: self.id,
            generation: self.generation.wrapping_add(1),
        }
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.id.0 as usize
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.id, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_parts() {
        let entity = Entity::new(42, 1);
        assert_eq!(entity.id().raw(), 42);
        assert_eq!(entity.generation(), 1);
        assert_eq!(entity.index(), 42);
        assert_eq!(entity.to_string(), "#42v1");
    }

    #[test]
    fn test_successor_never_aliases() {
        let first = Entity::new(1, 0);
        let next = first.successor();
        assert_eq!(next.id(), first.id());
        assert_ne!(next, first);
        assert_eq!(Entity::new(1, u32::MAX).successor().generation(), 0);
    }

    #[test]
    fn test_ordering_by_id() {
        let mut handles = vec![Entity::new(5, 0), Entity::new(2, 7), Entity::new(2, 1)];
        handles.sort();
        assert_eq!(handles, vec![Entity::new(2, 1), Entity::new(2, 7), Entity::new(5, 0)]);
    }
}
