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
//! Object pooling for reducing allocation churn
//!
//! An [`ObjectPool`] owns its instances and hands out generational
//! [`PoolHandle`]s. Releasing a handle runs the pool's reset hook and bumps the
//! slot generation, so a stale copy of the handle can no longer reach the
//! instance or release it a second time.
//!
//! [`PoolRegistry`] keeps pools of different instance types under string keys
//! for code that only knows a pool by name.
//!
//! # Examples
//!
//! ```
//! use sim_kernel::pool::{ObjectPool, PoolConfig};
//!
//! let mut pool = ObjectPool::new(
//!     "scratch",
//!     || Vec::<u32>::with_capacity(16),
//!     |buffer: &mut Vec<u32>| buffer.clear(),
//!     PoolConfig::default().with_initial_size(2),
//! );
//!
//! let handle = pool.acquire().unwrap();
//! pool.get_mut(handle).unwrap().push(7);
//! pool.release(handle).unwrap();
//!
//! let again = pool.acquire().unwrap();
//! assert!(pool.get(again).unwrap().is_empty());
//! assert_eq!(pool.stats().hits, 2);
//! ```

use crate::error::{KernelError, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(0);

/// What a bounded pool does when every instance is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OverflowPolicy {
    /// Create a temporary instance, dropped instead of pooled on release
    #[default]
    Allocate,
    /// Refuse with [`KernelError::CapacityExceeded`]
    Fail,
}

/// Configuration for object pool behavior
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfig {
    /// Instances created up front
    pub initial_size: usize,
    /// Maximum number of pooled instances; 0 means unbounded
    pub max_size: usize,
    /// Behavior once `max_size` instances are in use
    pub overflow: OverflowPolicy,
    /// Whether to log when the pool grows
    pub log_growth: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            initial_size: 0,
            max_size: 0,
            overflow: OverflowPolicy::Allocate,
            log_growth: false,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given sizes
    pub fn new(initial_size: usize, max_size: usize) -> Self {
        PoolConfig {
            initial_size,
            max_size,
            ..Default::default()
        }
    }

    /// Set the number of pre-warmed instances
    pub fn with_initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    /// Set the pooled instance limit
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the overflow policy
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Enable logging for growth events
    pub fn with_logging(mut self) -> Self {
        self.log_growth = true;
        self
    }
}

/// Statistics for monitoring pool performance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Acquisitions served by an idle instance
    pub hits: usize,
    /// Acquisitions that had to create a pooled instance
    pub misses: usize,
    /// Temporary instances created past `max_size`
    pub overflow_allocations: usize,
    /// Releases refused as foreign, stale or duplicate
    pub rejected_releases: usize,
    /// Instances currently handed out
    pub in_use: usize,
    /// Idle instances ready for reuse
    pub available: usize,
}

impl PoolStats {
    /// Calculate the hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.overflow_allocations;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Identity of a pool, unique within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u32);

/// Generational reference to a pooled instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle {
    pool: PoolId,
    slot: u32,
    generation: u32,
}

impl PoolHandle {
    /// The pool that handed out this handle
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// Generation of the slot when the handle was issued
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Entry<T> {
    value: Option<T>,
    generation: u32,
    in_use: bool,
    overflow: bool,
}

/// A pool of reusable instances with factory and reset hooks
pub struct ObjectPool<T> {
    id: PoolId,
    name: String,
    config: PoolConfig,
    factory: Box<dyn FnMut() -> T>,
    reset: Box<dyn FnMut(&mut T)>,
    entries: Vec<Entry<T>>,
    // idle pooled instances, most recently released last
    idle: Vec<u32>,
    // slots whose instance was dropped
    vacant: Vec<u32>,
    pooled: usize,
    stats: PoolStats,
}

impl<T: 'static> ObjectPool<T> {
    /// Create a pool and pre-warm `config.initial_size` instances
    pub fn new(
        name: impl Into<String>,
        factory: impl FnMut() -> T + 'static,
        reset: impl FnMut(&mut T) + 'static,
        config: PoolConfig,
    ) -> Self {
        let mut pool = ObjectPool {
            id: PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            factory: Box::new(factory),
            reset: Box::new(reset),
            entries: Vec::new(),
            idle: Vec::new(),
            vacant: Vec::new(),
            pooled: 0,
            stats: PoolStats::default(),
            config,
        };
        pool.prewarm();
        pool
    }

    fn prewarm(&mut self) {
        let target = match self.config.max_size {
            0 => self.config.initial_size,
            max => self.config.initial_size.min(max),
        };
        self.entries.reserve(target);
        while self.pooled < target {
            let slot = self.store(false);
            self.idle.push(slot);
        }
        self.stats.available = self.idle.len();
    }

    /// Identity of this pool
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Name used in logs and errors
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration in use
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Counters snapshot
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Take an instance out of the pool
    ///
    /// Reuses an idle instance when there is one, otherwise creates one. Never
    /// blocks: once `max_size` instances are out the overflow policy decides.
    pub fn acquire(&mut self) -> Result<PoolHandle> {
        let slot = if let Some(slot) = self.idle.pop() {
            self.stats.hits += 1;
            slot
        } else if self.config.max_size == 0 || self.pooled < self.config.max_size {
            self.stats.misses += 1;
            if self.config.log_growth {
                log::debug!(
                    "pool `{}` growing to {} instances (hit rate: {:.1}%)",
                    self.name,
                    self.pooled + 1,
                    self.stats.hit_rate()
                );
            }
            self.store(false)
        } else {
            match self.config.overflow {
                OverflowPolicy::Allocate => {
                    self.stats.overflow_allocations += 1;
                    log::warn!(
                        "pool `{}` exhausted ({} in use), allocating a temporary instance",
                        self.name,
                        self.stats.in_use
                    );
                    self.store(true)
                }
                OverflowPolicy::Fail => {
                    return Err(KernelError::CapacityExceeded {
                        store: self.name.clone(),
                        capacity: self.config.max_size,
                    });
                }
            }
        };

        let entry = &mut self.entries[slot as usize];
        entry.in_use = true;
        self.stats.in_use += 1;
        self.stats.available = self.idle.len();
        Ok(PoolHandle {
            pool: self.id,
            slot,
            generation: entry.generation,
        })
    }

    fn store(&mut self, overflow: bool) -> u32 {
        let value = (self.factory)();
        if !overflow {
            self.pooled += 1;
        }
        match self.vacant.pop() {
            Some(slot) => {
                let entry = &mut self.entries[slot as usize];
                entry.value = Some(value);
                entry.overflow = overflow;
                slot
            }
            None => {
                self.entries.push(Entry {
                    value: Some(value),
                    generation: 0,
                    in_use: false,
                    overflow,
                });
                (self.entries.len() - 1) as u32
            }
        }
    }

    fn entry(&self, handle: PoolHandle) -> Option<&Entry<T>> {
        if handle.pool != self.id {
            return None;
        }
        self.entries
            .get(handle.slot as usize)
            .filter(|entry| entry.in_use && entry.generation == handle.generation)
    }

    /// The instance behind a live handle
    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        self.entry(handle).and_then(|entry| entry.value.as_ref())
    }

    /// Mutable access to the instance behind a live handle
    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        self.entry(handle)?;
        self.entries[handle.slot as usize].value.as_mut()
    }

    /// Check whether a handle still refers to an instance in use
    pub fn is_live(&self, handle: PoolHandle) -> bool {
        self.entry(handle).is_some()
    }

    /// Return an instance to the pool
    ///
    /// Runs the reset hook and invalidates `handle`. Temporary overflow
    /// instances are dropped instead.
    pub fn release(&mut self, handle: PoolHandle) -> Result<()> {
        if handle.pool != self.id {
            self.stats.rejected_releases += 1;
            log::error!("pool `{}` was handed an instance it does not own", self.name);
            return Err(KernelError::ForeignInstance {
                pool: self.name.clone(),
            });
        }
        if self.entry(handle).is_none() {
            self.stats.rejected_releases += 1;
            log::error!(
                "pool `{}`: instance {} (gen {}) released twice",
                self.name,
                handle.slot,
                handle.generation
            );
            return Err(KernelError::DuplicateRegistration(format!(
                "pool `{}` instance {} released twice",
                self.name, handle.slot
            )));
        }

        let entry = &mut self.entries[handle.slot as usize];
        entry.in_use = false;
        entry.generation = entry.generation.wrapping_add(1);
        self.stats.in_use -= 1;
        if entry.overflow {
            entry.value = None;
            self.vacant.push(handle.slot);
        } else {
            if let Some(value) = entry.value.as_mut() {
                (self.reset)(value);
            }
            self.idle.push(handle.slot);
        }
        self.stats.available = self.idle.len();
        Ok(())
    }

    /// Drop every instance, in use or idle
    ///
    /// Outstanding handles become stale. The pool refills on demand.
    pub fn clear(&mut self) {
        self.idle.clear();
        self.vacant.clear();
        for (slot, entry) in self.entries.iter_mut().enumerate() {
            if entry.value.take().is_some() || entry.in_use {
                entry.generation = entry.generation.wrapping_add(1);
            }
            entry.in_use = false;
            self.vacant.push(slot as u32);
        }
        self.pooled = 0;
        self.stats.in_use = 0;
        self.stats.available = 0;
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("name", &self.name)
            .field("type", &type_name::<T>())
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}

trait ErasedPool {
    fn release(&mut self, handle: PoolHandle) -> Result<()>;
    fn clear(&mut self);
    fn stats(&self) -> PoolStats;
    fn type_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> ErasedPool for ObjectPool<T> {
    fn release(&mut self, handle: PoolHandle) -> Result<()> {
        ObjectPool::release(self, handle)
    }

    fn clear(&mut self) {
        ObjectPool::clear(self)
    }

    fn stats(&self) -> PoolStats {
        ObjectPool::stats(self)
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Object pools of any instance type, keyed by name
#[derive(Default)]
pub struct PoolRegistry {
    pools: HashMap<String, Box<dyn ErasedPool>>,
}

impl PoolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool under `key`
    pub fn create_pool<T: 'static>(
        &mut self,
        key: impl Into<String>,
        factory: impl FnMut() -> T + 'static,
        reset: impl FnMut(&mut T) + 'static,
        config: PoolConfig,
    ) -> Result<PoolId> {
        let key = key.into();
        if self.pools.contains_key(&key) {
            return Err(KernelError::DuplicateRegistration(format!("pool `{}`", key)));
        }
        let pool = ObjectPool::new(key.clone(), factory, reset, config);
        let id = pool.id();
        log::debug!("created pool `{}` of {}", key, type_name::<T>());
        self.pools.insert(key, Box::new(pool));
        Ok(id)
    }

    /// Check whether a pool exists under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.pools.contains_key(key)
    }

    /// Number of pools
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Check if no pool has been created
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// The typed pool under `key`
    pub fn pool<T: 'static>(&self, key: &str) -> Result<&ObjectPool<T>> {
        let erased = self
            .pools
            .get(key)
            .ok_or_else(|| KernelError::UnknownPool(key.to_string()))?;
        erased
            .as_any()
            .downcast_ref::<ObjectPool<T>>()
            .ok_or_else(|| KernelError::PoolTypeMismatch {
                pool: key.to_string(),
                requested: type_name::<T>(),
            })
    }

    /// The typed pool under `key`, mutably
    pub fn pool_mut<T: 'static>(&mut self, key: &str) -> Result<&mut ObjectPool<T>> {
        let erased = self
            .pools
            .get_mut(key)
            .ok_or_else(|| KernelError::UnknownPool(key.to_string()))?;
        erased
            .as_any_mut()
            .downcast_mut::<ObjectPool<T>>()
            .ok_or_else(|| KernelError::PoolTypeMismatch {
                pool: key.to_string(),
                requested: type_name::<T>(),
            })
    }

    /// Acquire an instance from the pool under `key`
    pub fn get<T: 'static>(&mut self, key: &str) -> Result<PoolHandle> {
        self.pool_mut::<T>(key)?.acquire()
    }

    /// The instance behind a handle from the pool under `key`
    pub fn instance<T: 'static>(&self, key: &str, handle: PoolHandle) -> Option<&T> {
        self.pool::<T>(key).ok()?.get(handle)
    }

    /// Mutable access to the instance behind a handle
    pub fn instance_mut<T: 'static>(&mut self, key: &str, handle: PoolHandle) -> Option<&mut T> {
        self.pool_mut::<T>(key).ok()?.get_mut(handle)
    }

    /// Return an instance to the pool under `key`
    pub fn release(&mut self, key: &str, handle: PoolHandle) -> Result<()> {
        self.pools
            .get_mut(key)
            .ok_or_else(|| KernelError::UnknownPool(key.to_string()))?
            .release(handle)
    }

    /// Statistics of the pool under `key`
    pub fn stats(&self, key: &str) -> Option<PoolStats> {
        self.pools.get(key).map(|pool| pool.stats())
    }

    /// Drop every instance of every pool, keeping the pools
    pub fn clear_all(&mut self) {
        for pool in self.pools.values_mut() {
            pool.clear();
        }
    }

    /// Remove every pool
    pub fn clear(&mut self) {
        self.pools.clear();
    }
}

impl fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, pool) in &self.pools {
            map.entry(key, &pool.type_name());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "serde")]
    #[test]
    fn test_configs_are_serializable() {
        fn serde_bound<T: Serialize + for<'de> Deserialize<'de>>() {}
        serde_bound::<PoolConfig>();
        serde_bound::<OverflowPolicy>();
    }

    #[derive(Debug, Default, PartialEq)]
    struct Particle {
        life: f64,
        frames: u32,
    }

    fn particles(config: PoolConfig) -> ObjectPool<Particle> {
        ObjectPool::new(
            "particles",
            Particle::default,
            |p: &mut Particle| *p = Particle::default(),
            config,
        )
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.initial_size, 0);
        assert_eq!(config.max_size, 0);
        assert_eq!(config.overflow, OverflowPolicy::Allocate);
        assert!(!config.log_growth);
    }

    #[test]
    fn test_prewarm() {
        let pool = particles(PoolConfig::new(4, 0));
        let stats = pool.stats();
        assert_eq!(stats.available, 4);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_prewarm_respects_max_size() {
        let pool = particles(PoolConfig::new(10, 3));
        assert_eq!(pool.stats().available, 3);
    }

    #[test]
    fn test_acquire_release_resets() {
        let mut pool = particles(PoolConfig::new(1, 0));

        let handle = pool.acquire().unwrap();
        {
            let p = pool.get_mut(handle).unwrap();
            p.life = 2.5;
            p.frames = 30;
        }
        pool.release(handle).unwrap();

        let again = pool.acquire().unwrap();
        assert_eq!(pool.get(again), Some(&Particle::default()));
        assert_ne!(again, handle);
        assert_eq!(pool.stats().hits, 2);
        assert_eq!(pool.stats().hit_rate(), 100.0);
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let mut pool = particles(PoolConfig::default());
        let handle = pool.acquire().unwrap();
        pool.release(handle).unwrap();

        assert!(pool.get(handle).is_none());
        assert!(!pool.is_live(handle));
        assert!(matches!(
            pool.release(handle),
            Err(KernelError::DuplicateRegistration(_))
        ));
        assert_eq!(pool.stats().rejected_releases, 1);
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let mut a = particles(PoolConfig::default());
        let mut b = particles(PoolConfig::default());
        let handle = a.acquire().unwrap();

        assert!(b.get(handle).is_none());
        assert_eq!(
            b.release(handle),
            Err(KernelError::ForeignInstance {
                pool: "particles".to_string()
            })
        );
        assert!(a.release(handle).is_ok());
    }

    #[test]
    fn test_overflow_allocate_drops_on_release() {
        let mut pool = particles(PoolConfig::new(0, 1));
        let first = pool.acquire().unwrap();
        let extra = pool.acquire().unwrap();
        assert_eq!(pool.stats().overflow_allocations, 1);
        assert_eq!(pool.stats().in_use, 2);

        pool.release(extra).unwrap();
        pool.release(first).unwrap();
        // only the pooled instance is kept
        assert_eq!(pool.stats().available, 1);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_overflow_fail() {
        let mut pool = particles(PoolConfig::new(1, 1).with_overflow(OverflowPolicy::Fail));
        let _held = pool.acquire().unwrap();
        assert_eq!(
            pool.acquire(),
            Err(KernelError::CapacityExceeded {
                store: "particles".to_string(),
                capacity: 1
            })
        );
    }

    #[test]
    fn test_clear_invalidates_handles() {
        let mut pool = particles(PoolConfig::new(2, 0));
        let handle = pool.acquire().unwrap();
        pool.clear();

        assert!(pool.get(handle).is_none());
        assert_eq!(pool.stats().available, 0);

        let fresh = pool.acquire().unwrap();
        assert!(pool.get(fresh).is_some());
        assert_ne!(fresh, handle);
    }

    #[test]
    fn test_registry_typed_access() {
        let mut pools = PoolRegistry::new();
        pools
            .create_pool("bullets", || [0.0f64; 3], |b| *b = [0.0; 3], PoolConfig::new(2, 8))
            .unwrap();

        let handle = pools.get::<[f64; 3]>("bullets").unwrap();
        pools.instance_mut::<[f64; 3]>("bullets", handle).unwrap()[0] = 4.0;
        assert_eq!(pools.instance::<[f64; 3]>("bullets", handle), Some(&[4.0, 0.0, 0.0]));

        pools.release("bullets", handle).unwrap();
        assert_eq!(pools.stats("bullets").unwrap().available, 2);
    }

    #[test]
    fn test_registry_errors() {
        let mut pools = PoolRegistry::new();
        pools
            .create_pool("names", String::new, String::clear, PoolConfig::default())
            .unwrap();

        assert!(matches!(
            pools.create_pool("names", String::new, String::clear, PoolConfig::default()),
            Err(KernelError::DuplicateRegistration(_))
        ));
        assert_eq!(
            pools.get::<String>("missing"),
            Err(KernelError::UnknownPool("missing".to_string()))
        );
        assert!(matches!(
            pools.get::<u32>("names"),
            Err(KernelError::PoolTypeMismatch { .. })
        ));
        assert!(pools.stats("missing").is_none());
    }

    #[test]
    fn test_registry_clear_all() {
        let mut pools = PoolRegistry::new();
        pools
            .create_pool("a", Vec::<u8>::new, Vec::clear, PoolConfig::new(3, 0))
            .unwrap();
        pools
            .create_pool("b", Vec::<u16>::new, Vec::clear, PoolConfig::new(1, 0))
            .unwrap();

        pools.clear_all();
        assert_eq!(pools.stats("a").unwrap().available, 0);
        assert_eq!(pools.stats("b").unwrap().available, 0);
        assert_eq!(pools.len(), 2);
    }
}
