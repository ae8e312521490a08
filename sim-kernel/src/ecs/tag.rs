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
//! Entity tags
//!
//! Hot tags that gameplay code filters on every frame live in a fixed bitset.
//! Anything else falls back to an open set of names, so new tags need no
//! kernel change.

use std::borrow::Cow;
use std::fmt;

/// Number of tags stored in the fixed bitset
pub(crate) const KNOWN_TAG_COUNT: usize = 6;

/// An entity tag
///
/// String conversion normalizes known names, so `Tag::from("player")` is
/// `Tag::Player` and never a `Named` duplicate of it.
///
/// # Examples
///
/// ```
/// use sim_kernel::ecs::Tag;
///
/// assert_eq!(Tag::from("projectile"), Tag::Projectile);
/// assert_eq!(Tag::from("loot").as_str(), "loot");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    /// The player-controlled ship
    Player,
    /// Hostile agents
    Enemy,
    /// Short-lived projectiles
    Projectile,
    /// Asteroids and other field debris
    Asteroid,
    /// Collectable items
    Pickup,
    /// Entities drawn from a pool of reusable instances
    Pooled,
    /// Any other tag, stored by name
    Named(Cow<'static, str>),
}

impl Tag {
    /// Build a tag from a name, mapping known names onto their fixed variants
    pub fn named(name: impl Into<Cow<'static, str>>) -> Tag {
        let name = name.into();
        match &*name {
            "player" => Tag::Player,
            "enemy" => Tag::Enemy,
            "projectile" => Tag::Projectile,
            "asteroid" => Tag::Asteroid,
            "pickup" => Tag::Pickup,
            "pooled" => Tag::Pooled,
            _ => Tag::Named(name),
        }
    }

    /// Bit position in the fixed tag set, `None` for named tags
    pub fn bit(&self) -> Option<u32> {
        match self {
            Tag::Player => Some(0),
            Tag::Enemy => Some(1),
            Tag::Projectile => Some(2),
            Tag::Asteroid => Some(3),
            Tag::Pickup => Some(4),
            Tag::Pooled => Some(5),
            Tag::Named(_) => None,
        }
    }

    /// The tag's name
    pub fn as_str(&self) -> &str {
        match self {
            Tag::Player => "player",
            Tag::Enemy => "enemy",
            Tag::Projectile => "projectile",
            Tag::Asteroid => "asteroid",
            Tag::Pickup => "pickup",
            Tag::Pooled => "pooled",
            Tag::Named(name) => name,
        }
    }

    pub(crate) fn from_bit(bit: u32) -> Option<Tag> {
        match bit {
            0 => Some(Tag::Player),
            1 => Some(Tag::Enemy),
            2 => Some(Tag::Projectile),
            3 => Some(Tag::Asteroid),
            4 => Some(Tag::Pickup),
            5 => Some(Tag::Pooled),
            _ => None,
        }
    }
}

impl From<&'static str> for Tag {
    fn from(name: &'static str) -> Self {
        Tag::named(name)
    }
}

impl From<String> for Tag {
    fn from(name: String) -> Self {
        Tag::named(name)
    }
}

impl From<&Tag> for Tag {
    fn from(tag: &Tag) -> Self {
        tag.clone()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of tags carried by one entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    bits: u32,
    named: Vec<Cow<'static, str>>,
}

impl TagSet {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag, returning `true` if it was not present
    pub fn insert(&mut self, tag: &Tag) -> bool {
        match (tag.bit(), tag) {
            (Some(bit), _) => {
                let mask = 1 << bit;
                let added = self.bits & mask == 0;
                self.bits |= mask;
                added
            }
            (None, Tag::Named(name)) => {
                if self.named.iter().any(|n| n == name) {
                    false
                } else {
                    self.named.push(name.clone());
                    true
                }
            }
            (None, _) => false,
        }
    }

    /// Remove a tag, returning `true` if it was present
    pub fn remove(&mut self, tag: &Tag) -> bool {
        match (tag.bit(), tag) {
            (Some(bit), _) => {
                let mask = 1 << bit;
                let present = self.bits & mask != 0;
                self.bits &= !mask;
                present
            }
            (None, Tag::Named(name)) => match self.named.iter().position(|n| n == name) {
                Some(pos) => {
                    self.named.swap_remove(pos);
                    true
                }
                None => false,
            },
            (None, _) => false,
        }
    }

    /// Check membership
    pub fn contains(&self, tag: &Tag) -> bool {
        match (tag.bit(), tag) {
            (Some(bit), _) => self.bits & (1 << bit) != 0,
            (None, Tag::Named(name)) => self.named.iter().any(|n| n == name),
            (None, _) => false,
        }
    }

    /// Raw bitset of the known tags
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of tags in the set
    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize + self.named.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.bits == 0 && self.named.is_empty()
    }

    /// Remove every tag
    pub fn clear(&mut self) {
        self.bits = 0;
        self.named.clear();
    }

    /// Iterate the tags, known tags first
    pub fn iter(&self) -> impl Iterator<Item = Tag> + '_ {
        (0..KNOWN_TAG_COUNT as u32)
            .filter(move |bit| self.bits & (1 << *bit) != 0)
            .filter_map(Tag::from_bit)
            .chain(self.named.iter().cloned().map(Tag::Named))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_names_normalize() {
        assert_eq!(Tag::from("player"), Tag::Player);
        assert_eq!(Tag::from("pooled".to_string()), Tag::Pooled);
        assert_eq!(Tag::from("cargo"), Tag::Named(Cow::Borrowed("cargo")));
        assert_eq!(Tag::Enemy.as_str(), "enemy");
    }

    #[test]
    fn test_tag_set_known_and_named() {
        let mut tags = TagSet::new();
        assert!(tags.insert(&Tag::Player));
        assert!(!tags.insert(&Tag::Player));
        assert!(tags.insert(&Tag::from("docked")));
        assert!(!tags.insert(&Tag::from("docked")));

        assert_eq!(tags.len(), 2);
        assert!(tags.contains(&Tag::Player));
        assert!(tags.contains(&Tag::from("docked")));
        assert!(!tags.contains(&Tag::Enemy));
        assert_eq!(tags.bits(), 1);

        assert!(tags.remove(&Tag::from("docked")));
        assert!(!tags.remove(&Tag::from("docked")));
        assert_eq!(tags.len(), 1);

        tags.clear();
        assert!(tags.is_empty());
    }

    #[test]
    fn test_tag_set_iteration_order() {
        let mut tags = TagSet::new();
        tags.insert(&Tag::from("beacon"));
        tags.insert(&Tag::Pooled);
        tags.insert(&Tag::Enemy);

        let collected: Vec<Tag> = tags.iter().collect();
        assert_eq!(collected, vec![Tag::Enemy, Tag::Pooled, Tag::from("beacon")]);
    }
}
