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
//! # Simulation Kernel
//!
//! A single-threaded ECS simulation kernel for real-time games, with a queued
//! event bus, a uniform-grid broad phase and allocation-free pooling.
//!
//! ## Features
//!
//! - **ECS Architecture**: generational entities, bitset tags, slot-reusing
//!   component stores with columnar layouts for the physics types
//! - **Message Bus**: topic pub/sub with queued, re-entrancy-safe dispatch
//! - **Physics**: semi-implicit Euler movement, sphere and swept collision with
//!   impulse response
//! - **Spatial Index**: uniform grid with sweep registration for fast movers
//! - **Pooling**: generational object pools with factory and reset hooks
//! - **Parallelization**: optional Rayon integration for the velocity pass
//!
//! ## Example
//!
//! ```rust
//! use sim_kernel::ecs::{World, WorldConfig};
//! use sim_kernel::ecs::components::{Collider, Rigidbody, Transform};
//! use glam::DVec3;
//!
//! let mut world = World::new(WorldConfig::default());
//! world.add_physics_systems().unwrap();
//!
//! let rock = world.create_entity(["asteroid"]).unwrap();
//! world
//!     .entity_mut(rock)
//!     .unwrap()
//!     .insert(Transform::from_position(DVec3::new(0.0, 10.0, 0.0)))
//!     .unwrap()
//!     .insert(Rigidbody::new(5.0).with_velocity(DVec3::new(0.0, -1.0, 0.0)))
//!     .unwrap()
//!     .insert(Collider::sphere(1.5))
//!     .unwrap();
//!
//! for _ in 0..10 {
//!     world.update(1.0 / 60.0).unwrap();
//! }
//! assert_eq!(world.get_entities_by_tag("asteroid"), vec![rock]);
//! ```

#![warn(missing_docs)]

/// Topic-keyed message bus
pub mod bus;

/// Entity Component System implementation
pub mod ecs;

/// Kernel error taxonomy
pub mod error;

/// Built-in movement and collision systems
pub mod physics;

/// Object pooling for reducing allocation churn
pub mod pool;

/// Uniform-grid broad phase
pub mod spatial;

pub use ecs::{Entity, World};
pub use error::{KernelError, Result};
