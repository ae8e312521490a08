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
//! Uniform-grid broad phase
//!
//! World space is cut into cubic cells of a fixed size. Every registration
//! covers the cells overlapped by its bounding sphere, padded by the move
//! threshold so that moves below the threshold can skip re-registration and
//! still be found. A fast mover can be registered along its whole sweep for
//! the tick, which keeps it from tunnelling between cells.
//!
//! Queries return a sorted, deduplicated superset of the entities whose
//! registered bounds overlap the query box. Two escape hatches keep the work
//! bounded:
//!
//! - registrations spanning more than `max_cells_per_entity` cells are kept in
//!   an oversized list checked by every query
//! - a query spanning more cells than there are registrations scans the
//!   registrations directly
//!
//! # Examples
//!
//! ```
//! use sim_kernel::ecs::Entity;
//! use sim_kernel::spatial::{SpatialConfig, SpatialIndex};
//! use glam::DVec3;
//!
//! let mut index = SpatialIndex::new(SpatialConfig::default());
//! let rock = Entity::new(1, 0);
//! index.insert(rock, DVec3::new(4.0, 0.0, 0.0), 1.0);
//!
//! assert_eq!(index.query_nearby(DVec3::ZERO, 3.5), vec![rock]);
//! ```

use crate::ecs::Entity;
use glam::DVec3;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashMap;

/// Spatial index configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialConfig {
    /// Edge length of a grid cell
    pub cell_size: f64,
    /// Moves shorter than this keep the existing registration; capped at half a cell
    pub move_threshold: f64,
    /// Registrations covering more cells go to the oversized list
    pub max_cells_per_entity: usize,
}

impl SpatialConfig {
    /// Set the cell size
    pub fn with_cell_size(mut self, cell_size: f64) -> Self {
        self.cell_size = cell_size;
        self
    }

    /// Set the move threshold
    pub fn with_move_threshold(mut self, threshold: f64) -> Self {
        self.move_threshold = threshold;
        self
    }

    /// Set the per-registration cell limit
    pub fn with_max_cells_per_entity(mut self, max: usize) -> Self {
        self.max_cells_per_entity = max;
        self
    }
}

impl Default for SpatialConfig {
    fn default() -> Self {
        SpatialConfig {
            cell_size: 10.0,
            move_threshold: 2.5,
            max_cells_per_entity: 64,
        }
    }
}

/// Integer coordinate of a grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    /// Cell x
    pub x: i32,
    /// Cell y
    pub y: i32,
    /// Cell z
    pub z: i32,
}

impl CellCoord {
    /// Cell containing a point
    pub fn containing(point: DVec3, cell_size: f64) -> Self {
        let scaled = (point / cell_size).floor();
        // `as` saturates, and maps NaN to 0
        CellCoord {
            x: scaled.x as i32,
            y: scaled.y as i32,
            z: scaled.z as i32,
        }
    }
}

/// Index counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpatialStats {
    /// Registered entities
    pub registrations: usize,
    /// Cells holding at least one entity
    pub occupied_cells: usize,
    /// Registrations in the oversized list
    pub oversized: usize,
    /// Empty buckets kept for reuse
    pub spare_buckets: usize,
    /// Queries served
    pub queries: u64,
    /// Queries answered by scanning registrations
    pub scans: u64,
}

#[derive(Debug, Clone)]
struct Registration {
    center: DVec3,
    radius: f64,
    swept: bool,
    min: DVec3,
    max: DVec3,
    // empty when oversized
    cells: Vec<CellCoord>,
    oversized: bool,
}

/// Uniform-grid spatial hash over entity bounding spheres
#[derive(Debug)]
pub struct SpatialIndex {
    config: SpatialConfig,
    cells: HashMap<CellCoord, Vec<Entity>>,
    entries: HashMap<Entity, Registration>,
    oversized: Vec<Entity>,
    spare_buckets: Vec<Vec<Entity>>,
    spare_cell_lists: Vec<Vec<CellCoord>>,
    queries: Cell<u64>,
    scans: Cell<u64>,
}

impl SpatialIndex {
    /// Create an empty index
    pub fn new(config: SpatialConfig) -> Self {
        let config = if config.cell_size.is_finite() && config.cell_size > 0.0 {
            config
        } else {
            log::warn!("invalid cell size {}, using default", config.cell_size);
            SpatialConfig {
                cell_size: SpatialConfig::default().cell_size,
                ..config
            }
        };
        SpatialIndex {
            config,
            cells: HashMap::new(),
            entries: HashMap::new(),
            oversized: Vec::new(),
            spare_buckets: Vec::new(),
            spare_cell_lists: Vec::new(),
            queries: Cell::new(0),
            scans: Cell::new(0),
        }
    }

    /// The configuration in use
    pub fn config(&self) -> &SpatialConfig {
        &self.config
    }

    // capped at half a cell so small cells do not balloon every registration
    fn padding(&self) -> f64 {
        self.config
            .move_threshold
            .max(0.0)
            .min(self.config.cell_size * 0.5)
    }

    /// Register an entity's bounding sphere, replacing any earlier registration
    pub fn insert(&mut self, entity: Entity, center: DVec3, radius: f64) {
        self.register(entity, center, center, radius, false);
    }

    /// Register an entity along the segment it swept this tick
    pub fn insert_swept(&mut self, entity: Entity, from: DVec3, to: DVec3, radius: f64) {
        self.register(entity, from, to, radius, true);
    }

    /// Move an entity's registration
    ///
    /// Returns `false` when the move stayed within the move threshold and the
    /// existing registration still covers the new bounds.
    pub fn update(&mut self, entity: Entity, center: DVec3, radius: f64) -> bool {
        if let Some(entry) = self.entries.get(&entity) {
            if !entry.swept
                && radius <= entry.radius
                && center.distance(entry.center) <= self.padding()
            {
                return false;
            }
        }
        self.register(entity, center, center, radius, false);
        true
    }

    /// Re-register an entity along its sweep
    pub fn update_swept(&mut self, entity: Entity, from: DVec3, to: DVec3, radius: f64) {
        self.register(entity, from, to, radius, true);
    }

    /// Remove an entity, returning whether it was registered
    pub fn remove(&mut self, entity: Entity) -> bool {
        match self.entries.remove(&entity) {
            Some(entry) => {
                self.unlink(entity, entry);
                true
            }
            None => false,
        }
    }

    /// Keep only the entities for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(Entity) -> bool) -> usize {
        let doomed: Vec<Entity> = self.entries.keys().copied().filter(|&e| !keep(e)).collect();
        for &entity in &doomed {
            self.remove(entity);
        }
        doomed.len()
    }

    /// Check whether an entity is registered
    pub fn contains(&self, entity: Entity) -> bool {
        self.entries.contains_key(&entity)
    }

    /// Center of an entity's registration (the end of its sweep)
    pub fn registered_center(&self, entity: Entity) -> Option<DVec3> {
        self.entries.get(&entity).map(|entry| entry.center)
    }

    /// Cells an entity is registered in; empty for oversized registrations
    pub fn cells_of(&self, entity: Entity) -> Option<&[CellCoord]> {
        self.entries.get(&entity).map(|entry| entry.cells.as_slice())
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no entity is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered entities, in no particular order
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entries.keys().copied()
    }

    /// Remove every registration, keeping buckets for reuse
    pub fn clear(&mut self) {
        for (_, mut bucket) in self.cells.drain() {
            bucket.clear();
            self.spare_buckets.push(bucket);
        }
        for (_, mut entry) in self.entries.drain() {
            entry.cells.clear();
            self.spare_cell_lists.push(entry.cells);
        }
        self.oversized.clear();
    }

    /// Entities whose registered bounds may overlap the sphere
    pub fn query_nearby(&self, center: DVec3, radius: f64) -> Vec<Entity> {
        let mut out = Vec::new();
        self.query_nearby_into(center, radius, &mut out);
        out
    }

    /// Allocation-free form of [`SpatialIndex::query_nearby`]; clears `out`
    pub fn query_nearby_into(&self, center: DVec3, radius: f64, out: &mut Vec<Entity>) {
        out.clear();
        self.queries.set(self.queries.get() + 1);

        let radius = radius.max(0.0);
        let qmin = center - DVec3::splat(radius);
        let qmax = center + DVec3::splat(radius);
        let lo = CellCoord::containing(qmin, self.config.cell_size);
        let hi = CellCoord::containing(qmax, self.config.cell_size);

        let scan = !(qmin.is_finite() && qmax.is_finite())
            || cell_count(lo, hi) > self.entries.len() as u64;

        if scan {
            self.scans.set(self.scans.get() + 1);
            out.extend(
                self.entries
                    .iter()
                    .filter(|(_, entry)| overlaps(entry.min, entry.max, qmin, qmax))
                    .map(|(&entity, _)| entity),
            );
        } else {
            for x in lo.x..=hi.x {
                for y in lo.y..=hi.y {
                    for z in lo.z..=hi.z {
                        if let Some(bucket) = self.cells.get(&CellCoord { x, y, z }) {
                            out.extend_from_slice(bucket);
                        }
                    }
                }
            }
            out.extend(self.oversized.iter().copied().filter(|entity| {
                self.entries
                    .get(entity)
                    .is_some_and(|entry| overlaps(entry.min, entry.max, qmin, qmax))
            }));
        }

        out.sort_unstable();
        out.dedup();
    }

    /// Counters snapshot
    pub fn stats(&self) -> SpatialStats {
        SpatialStats {
            registrations: self.entries.len(),
            occupied_cells: self.cells.len(),
            oversized: self.oversized.len(),
            spare_buckets: self.spare_buckets.len(),
            queries: self.queries.get(),
            scans: self.scans.get(),
        }
    }

    fn register(&mut self, entity: Entity, from: DVec3, to: DVec3, radius: f64, swept: bool) {
        let reach = radius.max(0.0) + self.padding();
        let min = from.min(to) - DVec3::splat(reach);
        let max = from.max(to) + DVec3::splat(reach);

        if let Some(old) = self.entries.remove(&entity) {
            // same cell box, nothing to relink
            if !swept && !old.swept && !old.oversized && min.is_finite() && max.is_finite() {
                let size = self.config.cell_size;
                if CellCoord::containing(min, size) == CellCoord::containing(old.min, size)
                    && CellCoord::containing(max, size) == CellCoord::containing(old.max, size)
                {
                    self.entries.insert(
                        entity,
                        Registration {
                            center: to,
                            radius,
                            min,
                            max,
                            ..old
                        },
                    );
                    return;
                }
            }
            self.unlink(entity, old);
        }

        let mut cells = self.spare_cell_lists.pop().unwrap_or_default();
        let oversized = !(min.is_finite() && max.is_finite())
            || !self.cover(from, to, reach, swept, &mut cells);

        let (min, max) = if min.is_finite() && max.is_finite() {
            (min, max)
        } else {
            log::warn!("{} registered with non-finite bounds", entity);
            (DVec3::NEG_INFINITY, DVec3::INFINITY)
        };

        if oversized {
            cells.clear();
            self.oversized.push(entity);
        } else {
            for &cell in &cells {
                let spare = &mut self.spare_buckets;
                self.cells
                    .entry(cell)
                    .or_insert_with(|| spare.pop().unwrap_or_default())
                    .push(entity);
            }
        }

        self.entries.insert(
            entity,
            Registration {
                center: to,
                radius,
                swept,
                min,
                max,
                cells,
                oversized,
            },
        );
    }

    /// Fill `cells` with the cells covering the (possibly swept) sphere
    ///
    /// Returns `false` if the cover exceeds the per-entity limit.
    fn cover(
        &self,
        from: DVec3,
        to: DVec3,
        reach: f64,
        swept: bool,
        cells: &mut Vec<CellCoord>,
    ) -> bool {
        let size = self.config.cell_size;
        let limit = self.config.max_cells_per_entity as u64;
        cells.clear();

        let length = from.distance(to);
        if !swept || length <= f64::EPSILON {
            let lo = CellCoord::containing(to - DVec3::splat(reach), size);
            let hi = CellCoord::containing(to + DVec3::splat(reach), size);
            if cell_count(lo, hi) > limit {
                return false;
            }
            push_box(lo, hi, cells);
            return true;
        }

        // boxes around samples at most half a cell apart, widened by half a
        // step so the whole capsule is covered
        let steps = (length / (size * 0.5)).ceil().max(1.0);
        if steps > limit as f64 {
            return false;
        }
        let steps = steps as u32;
        let half_step = length / steps as f64 * 0.5;
        let widened = DVec3::splat(reach + half_step);
        for i in 0..=steps {
            let point = from.lerp(to, i as f64 / steps as f64);
            let lo = CellCoord::containing(point - widened, size);
            let hi = CellCoord::containing(point + widened, size);
            push_box(lo, hi, cells);
            if cells.len() as u64 > limit * 8 {
                cells.sort_unstable();
                cells.dedup();
                if cells.len() as u64 > limit {
                    return false;
                }
            }
        }
        cells.sort_unstable();
        cells.dedup();
        cells.len() as u64 <= limit
    }

    fn unlink(&mut self, entity: Entity, mut entry: Registration) {
        if entry.oversized {
            if let Some(pos) = self.oversized.iter().position(|&e| e == entity) {
                self.oversized.swap_remove(pos);
            }
        } else {
            for cell in &entry.cells {
                if let Some(bucket) = self.cells.get_mut(cell) {
                    if let Some(pos) = bucket.iter().position(|&e| e == entity) {
                        bucket.swap_remove(pos);
                    }
                    if bucket.is_empty() {
                        if let Some(bucket) = self.cells.remove(cell) {
                            self.spare_buckets.push(bucket);
                        }
                    }
                }
            }
        }
        entry.cells.clear();
        self.spare_cell_lists.push(entry.cells);
    }
}

fn cell_count(lo: CellCoord, hi: CellCoord) -> u64 {
    let span = |a: i32, b: i32| (i64::from(b) - i64::from(a) + 1).max(0) as u64;
    span(lo.x, hi.x)
        .saturating_mul(span(lo.y, hi.y))
        .saturating_mul(span(lo.z, hi.z))
}

fn push_box(lo: CellCoord, hi: CellCoord, cells: &mut Vec<CellCoord>) {
    for x in lo.x..=hi.x {
        for y in lo.y..=hi.y {
            for z in lo.z..=hi.z {
                cells.push(CellCoord { x, y, z });
            }
        }
    }
}

fn overlaps(amin: DVec3, amax: DVec3, bmin: DVec3, bmax: DVec3) -> bool {
    amin.cmple(bmax).all() && bmin.cmple(amax).all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(id: u64) -> Entity {
        Entity::new(id, 0)
    }

    fn index() -> SpatialIndex {
        SpatialIndex::new(SpatialConfig::default().with_move_threshold(0.0))
    }

    #[test]
    fn test_cell_coord_floors() {
        assert_eq!(
            CellCoord::containing(DVec3::new(-0.5, 9.99, 10.0), 10.0),
            CellCoord { x: -1, y: 0, z: 1 }
        );
    }

    #[test]
    fn test_insert_and_query() {
        let mut index = index();
        index.insert(e(1), DVec3::ZERO, 1.0);
        index.insert(e(2), DVec3::new(1.5, 0.0, 0.0), 1.0);
        index.insert(e(3), DVec3::new(100.0, 0.0, 0.0), 1.0);

        assert_eq!(index.query_nearby(DVec3::ZERO, 2.0), vec![e(1), e(2)]);
        assert_eq!(index.query_nearby(DVec3::new(100.0, 0.0, 0.0), 1.0), vec![e(3)]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_straddling_sphere_spans_cells() {
        let mut index = index();
        index.insert(e(1), DVec3::new(10.0, 10.0, 10.0), 1.0);
        assert_eq!(index.cells_of(e(1)).unwrap().len(), 8);
        assert_eq!(index.query_nearby(DVec3::new(9.5, 9.5, 9.5), 0.1), vec![e(1)]);
    }

    #[test]
    fn test_update_moves_between_cells() {
        let mut index = index();
        index.insert(e(1), DVec3::new(5.0, 5.0, 5.0), 1.0);
        assert!(index.update(e(1), DVec3::new(55.0, 5.0, 5.0), 1.0));

        assert!(index.query_nearby(DVec3::new(5.0, 5.0, 5.0), 1.0).is_empty());
        assert_eq!(index.query_nearby(DVec3::new(55.0, 5.0, 5.0), 1.0), vec![e(1)]);
        assert_eq!(index.stats().occupied_cells, 1);
        // the emptied bucket was handed to the new cell
        assert_eq!(index.stats().spare_buckets, 0);
    }

    #[test]
    fn test_padding_is_capped_by_cell_size() {
        let mut index = SpatialIndex::new(SpatialConfig::default().with_cell_size(1.0));
        index.insert(e(1), DVec3::new(0.5, 0.5, 0.5), 0.25);

        // reach 0.75 instead of 2.75
        assert_eq!(index.cells_of(e(1)).unwrap().len(), 8);
        assert_eq!(index.stats().oversized, 0);
        assert!(!index.update(e(1), DVec3::new(0.9, 0.5, 0.5), 0.25));
        assert!(index.update(e(1), DVec3::new(1.5, 0.5, 0.5), 0.25));
    }

    #[test]
    fn test_small_moves_below_threshold_are_skipped() {
        let mut index = SpatialIndex::new(SpatialConfig::default().with_move_threshold(1.0));
        index.insert(e(1), DVec3::new(5.0, 5.0, 5.0), 1.0);

        assert!(!index.update(e(1), DVec3::new(5.5, 5.0, 5.0), 1.0));
        assert_eq!(index.registered_center(e(1)), Some(DVec3::new(5.0, 5.0, 5.0)));
        // still found at the new position
        assert_eq!(index.query_nearby(DVec3::new(7.0, 5.0, 5.0), 0.5), vec![e(1)]);

        assert!(index.update(e(1), DVec3::new(8.0, 5.0, 5.0), 1.0));
    }

    #[test]
    fn test_swept_registration_covers_path() {
        let mut index = index();
        let from = DVec3::new(0.5, 0.5, 0.5);
        let to = DVec3::new(95.5, 0.5, 0.5);
        index.insert_swept(e(1), from, to, 0.1);

        for x in [5.0, 25.0, 47.0, 71.0, 95.0] {
            assert_eq!(
                index.query_nearby(DVec3::new(x, 0.5, 0.5), 0.1),
                vec![e(1)],
                "missing at x = {}",
                x
            );
        }
        assert!(index.query_nearby(DVec3::new(50.0, 30.0, 0.5), 0.1).is_empty());
    }

    #[test]
    fn test_oversized_registration() {
        let mut index = SpatialIndex::new(
            SpatialConfig::default()
                .with_move_threshold(0.0)
                .with_max_cells_per_entity(8),
        );
        index.insert(e(1), DVec3::ZERO, 50.0);
        index.insert(e(2), DVec3::new(500.0, 0.0, 0.0), 1.0);

        assert_eq!(index.stats().oversized, 1);
        assert!(index.cells_of(e(1)).unwrap().is_empty());
        assert_eq!(index.query_nearby(DVec3::new(45.0, 0.0, 0.0), 1.0), vec![e(1)]);
        assert!(index.query_nearby(DVec3::new(500.0, 0.0, 0.0), 1.0) == vec![e(2)]);

        assert!(index.remove(e(1)));
        assert_eq!(index.stats().oversized, 0);
    }

    #[test]
    fn test_large_query_scans_registrations() {
        let mut index = index();
        index.insert(e(1), DVec3::new(300.0, 0.0, 0.0), 1.0);
        index.insert(e(2), DVec3::new(-300.0, 0.0, 0.0), 1.0);

        let found = index.query_nearby(DVec3::ZERO, 1000.0);
        assert_eq!(found, vec![e(1), e(2)]);
        assert_eq!(index.stats().scans, 1);
    }

    #[test]
    fn test_non_finite_position_stays_queryable() {
        let mut index = index();
        index.insert(e(1), DVec3::new(f64::NAN, 0.0, 0.0), 1.0);
        assert_eq!(index.stats().oversized, 1);
        assert_eq!(index.query_nearby(DVec3::ZERO, 1.0), vec![e(1)]);
    }

    #[test]
    fn test_remove_retain_and_clear() {
        let mut index = index();
        for i in 0..6 {
            index.insert(e(i), DVec3::new(i as f64 * 3.0, 0.0, 0.0), 1.0);
        }
        assert!(index.remove(e(0)));
        assert!(!index.remove(e(0)));
        assert!(!index.contains(e(0)));

        assert_eq!(index.retain(|entity| entity.id().raw() % 2 == 1), 2);
        assert_eq!(index.len(), 3);

        index.clear();
        assert!(index.is_empty());
        assert!(index.query_nearby(DVec3::ZERO, 100.0).is_empty());
        assert_eq!(index.stats().occupied_cells, 0);
    }

    #[test]
    fn test_query_results_are_deduplicated() {
        let mut index = index();
        index.insert(e(7), DVec3::new(10.0, 10.0, 10.0), 5.0);
        let found = index.query_nearby(DVec3::new(10.0, 10.0, 10.0), 5.0);
        assert_eq!(found, vec![e(7)]);
    }
}
