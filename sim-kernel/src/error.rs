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
//! Kernel error taxonomy
//!
//! Every fallible kernel operation returns [`Result`]. Errors raised inside a
//! system's update are caught by the scheduler, logged and recorded; they never
//! abort the remaining systems of the tick.

use crate::ecs::Entity;
use thiserror::Error;

/// Errors produced by the simulation kernel
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    /// A component store, entity table or pool reached its hard limit
    #[error("{store} is at capacity ({capacity})")]
    CapacityExceeded {
        /// Name of the exhausted store or pool
        store: String,
        /// The configured hard limit
        capacity: usize,
    },

    /// Operation on a destroyed or never-created entity
    #[error("{0} is not alive")]
    InvalidEntity(Entity),

    /// A system type registered twice, a component type registered twice,
    /// or a pooled instance released twice
    #[error("duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// Cached per-entity flags disagree with the authoritative index
    #[error("index inconsistency for {entity}: {detail}")]
    TagInconsistency {
        /// The entity whose cached flags were wrong
        entity: Entity,
        /// What disagreed
        detail: String,
    },

    /// A component type was used before being registered with the world
    #[error("component `{0}` is not registered")]
    UnregisteredComponent(&'static str),

    /// No pool exists under the given key
    #[error("no pool registered under `{0}`")]
    UnknownPool(String),

    /// A handle was released to a pool that did not hand it out
    #[error("pool `{pool}` does not own this instance")]
    ForeignInstance {
        /// The pool the handle was released to
        pool: String,
    },

    /// A keyed pool was accessed with the wrong instance type
    #[error("pool `{pool}` does not hold `{requested}` instances")]
    PoolTypeMismatch {
        /// The pool key
        pool: String,
        /// The type that was requested
        requested: &'static str,
    },

    /// A system panicked during its update and was contained by the scheduler
    #[error("system `{system}` panicked: {message}")]
    SystemPanicked {
        /// Name of the system that panicked
        system: String,
        /// The panic payload, when it was a string
        message: String,
    },
}

/// Result alias used throughout the kernel
pub type Result<T> = std::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = KernelError::CapacityExceeded {
            store: "transform".to_string(),
            capacity: 16,
        };
        assert_eq!(err.to_string(), "transform is at capacity (16)");

        let err = KernelError::InvalidEntity(Entity::new(3, 1));
        assert_eq!(err.to_string(), "#3v1 is not alive");

        let err = KernelError::UnregisteredComponent("health");
        assert!(err.to_string().contains("health"));
    }
}
