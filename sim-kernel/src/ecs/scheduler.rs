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
//! Priority-ordered system scheduler
//!
//! Systems run sequentially, lowest priority first, and every system sees the
//! writes of the ones before it in the same tick. Each system's entity list is
//! cached and rebuilt only after a membership event (`entity.*`,
//! `component.*`, `tag.*`) moved the relevant epoch.
//!
//! A system that returns an error or panics is contained: the failure is
//! logged and recorded, and the next system still runs.

use crate::bus::{MessageBus, Subscription};
use crate::ecs::system::{ResolvedQuery, System, SystemContext};
use crate::ecs::Entity;
use crate::error::{KernelError, Result};
use std::any::TypeId;
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Standard priorities for the built-in ordering
///
/// Gameplay logic runs before movement, movement before collision, and
/// collision before anything that mirrors positions to the outside world.
pub mod priorities {
    /// Gameplay logic and force producers
    pub const GAMEPLAY: i32 = 0;
    /// Motion integration
    pub const MOVEMENT: i32 = 100;
    /// Broad and narrow phase, contact resolution
    pub const COLLISION: i32 = 200;
    /// Publishing state to render or audio collaborators
    pub const RENDER_SYNC: i32 = 300;
}

/// Most recent failures kept by the manager
const FAILURE_LOG_CAPACITY: usize = 64;

/// Per-system run statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemStats {
    /// Completed updates
    pub runs: u64,
    /// Updates that returned an error or panicked
    pub failures: u64,
    /// Entities handed to the last update
    pub entity_count: usize,
    /// Wall time of the last update
    pub last_duration: Duration,
}

/// A contained system failure
#[derive(Debug, Clone, PartialEq)]
pub struct SystemFailure {
    /// Name of the failing system
    pub system: String,
    /// Frame number of the tick
    pub frame: u64,
    /// What went wrong
    pub error: KernelError,
}

#[derive(Debug, Default)]
struct Epochs {
    components: Cell<u64>,
    tags: Cell<u64>,
}

impl Epochs {
    fn bump_components(&self) {
        self.components.set(self.components.get() + 1);
    }

    fn bump_tags(&self) {
        self.tags.set(self.tags.get() + 1);
    }
}

struct ScheduledSystem {
    system: Box<dyn System>,
    type_id: TypeId,
    name: String,
    priority: i32,
    enabled: bool,
    query: ResolvedQuery,
    cache: Vec<Entity>,
    // (components, tags) epochs the cache was built at
    cached_at: Option<(u64, u64)>,
    stats: SystemStats,
}

impl ScheduledSystem {
    fn is_stale(&self, epochs: &Epochs) -> bool {
        match self.cached_at {
            None => true,
            Some((components, tags)) => {
                (!self.query.mask.is_empty() && components != epochs.components.get())
                    || (!self.query.tags.is_empty() && tags != epochs.tags.get())
            }
        }
    }
}

/// Runs registered systems in priority order
pub struct SystemManager {
    systems: Vec<ScheduledSystem>,
    epochs: Rc<Epochs>,
    subscriptions: Vec<Subscription>,
    failures: VecDeque<SystemFailure>,
}

impl SystemManager {
    /// Create a manager that invalidates caches from events on `bus`
    pub fn new(bus: &MessageBus) -> Self {
        let epochs = Rc::new(Epochs::default());

        let e = epochs.clone();
        let components = bus.subscribe("component.*", move |_| e.bump_components());
        let e = epochs.clone();
        let tags = bus.subscribe("tag.*", move |_| e.bump_tags());
        let e = epochs.clone();
        let entities = bus.subscribe("entity.*", move |_| {
            e.bump_components();
            e.bump_tags();
        });

        SystemManager {
            systems: Vec::new(),
            epochs,
            subscriptions: vec![components, tags, entities],
            failures: VecDeque::new(),
        }
    }

    /// Register a system
    ///
    /// Rejects a second system of the same type, resolves its query and calls
    /// [`System::initialize`]. A failed initialization leaves the system
    /// unregistered.
    pub fn register<S: System>(&mut self, mut system: S, ctx: &mut SystemContext<'_>) -> Result<()> {
        let type_id = TypeId::of::<S>();
        let name = system.name().to_string();
        if self.systems.iter().any(|s| s.type_id == type_id) {
            return Err(KernelError::DuplicateRegistration(format!("system `{}`", name)));
        }

        let query = system.query().resolve(ctx.entities.registry())?;
        system.initialize(ctx)?;

        let priority = system.priority();
        // after every system with the same or lower priority
        let position = self.systems.partition_point(|s| s.priority <= priority);
        log::debug!("registered system `{}` at priority {}", name, priority);
        self.systems.insert(
            position,
            ScheduledSystem {
                system: Box::new(system),
                type_id,
                name,
                priority,
                enabled: true,
                query,
                cache: Vec::new(),
                cached_at: None,
                stats: SystemStats::default(),
            },
        );
        Ok(())
    }

    /// Remove a system by type, returning whether it was registered
    pub fn unregister<S: System>(&mut self) -> bool {
        let before = self.systems.len();
        self.systems.retain(|s| s.type_id != TypeId::of::<S>());
        before != self.systems.len()
    }

    /// Enable or disable a system by type; `false` if it is not registered
    pub fn set_enabled<S: System>(&mut self, enabled: bool) -> bool {
        match self.systems.iter_mut().find(|s| s.type_id == TypeId::of::<S>()) {
            Some(slot) => {
                slot.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Enable or disable a system by name; `false` if none has that name
    pub fn set_enabled_by_name(&mut self, name: &str, enabled: bool) -> bool {
        match self.systems.iter_mut().find(|s| s.name == name) {
            Some(slot) => {
                slot.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Whether a system is enabled, `None` if it is not registered
    pub fn is_enabled<S: System>(&self) -> Option<bool> {
        self.systems
            .iter()
            .find(|s| s.type_id == TypeId::of::<S>())
            .map(|s| s.enabled)
    }

    /// Run statistics of a system
    pub fn stats<S: System>(&self) -> Option<SystemStats> {
        self.systems
            .iter()
            .find(|s| s.type_id == TypeId::of::<S>())
            .map(|s| s.stats)
    }

    /// Run statistics of a system by name
    pub fn stats_by_name(&self, name: &str) -> Option<SystemStats> {
        self.systems.iter().find(|s| s.name == name).map(|s| s.stats)
    }

    /// System names in execution order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.systems.iter().map(|s| s.name.as_str())
    }

    /// Number of registered systems
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Most recent contained failures, oldest first
    pub fn failures(&self) -> impl Iterator<Item = &SystemFailure> {
        self.failures.iter()
    }

    /// Run one tick of every enabled system
    ///
    /// Returns the failures contained during this tick.
    pub fn update(&mut self, ctx: &mut SystemContext<'_>) -> Vec<SystemFailure> {
        let mut failures = Vec::new();

        for slot in self.systems.iter_mut() {
            if !slot.enabled {
                continue;
            }

            if slot.is_stale(&self.epochs) {
                if slot.query.is_empty() {
                    slot.cache.clear();
                } else {
                    ctx.entities
                        .query_into(slot.query.mask, &slot.query.tags, &mut slot.cache);
                }
                slot.cached_at = Some((self.epochs.components.get(), self.epochs.tags.get()));
            }

            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                slot.system.update(&slot.cache, ctx)
            }));
            slot.stats.last_duration = started.elapsed();
            slot.stats.entity_count = slot.cache.len();

            let error = match outcome {
                Ok(Ok(())) => {
                    slot.stats.runs += 1;
                    continue;
                }
                Ok(Err(error)) => error,
                Err(payload) => KernelError::SystemPanicked {
                    system: slot.name.clone(),
                    message: panic_message(payload.as_ref()),
                },
            };

            slot.stats.failures += 1;
            log::error!("system `{}` failed in frame {}: {}", slot.name, ctx.frame.frame, error);
            failures.push(SystemFailure {
                system: slot.name.clone(),
                frame: ctx.frame.frame,
                error,
            });
        }

        for failure in &failures {
            if self.failures.len() == FAILURE_LOG_CAPACITY {
                self.failures.pop_front();
            }
            self.failures.push_back(failure.clone());
        }
        failures
    }

    /// Remove every system
    pub fn clear(&mut self) {
        self.systems.clear();
    }
}

impl Drop for SystemManager {
    fn drop(&mut self) {
        for subscription in &self.subscriptions {
            subscription.cancel();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
