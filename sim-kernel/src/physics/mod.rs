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
//! Built-in physics systems
//!
//! [`MovementSystem`] runs at priority 100 and integrates bodies;
//! [`CollisionSystem`] runs at priority 200 and resolves the resulting
//! contacts. Gameplay systems at the default priority run before both.

pub mod collision;
pub mod movement;

pub use collision::{CollisionConfig, CollisionEvent, CollisionStats, CollisionSystem};
pub use movement::MovementSystem;
