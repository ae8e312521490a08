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
//! Built-in physics components
//!
//! [`Transform`] and [`Rigidbody`] are touched by every tick of the physics
//! systems, so their stores are columnar: one contiguous `Vec<f64>` per scalar
//! field, indexed by slot. Batch passes walk a single field across every live
//! body without pulling the rest of the record through the cache.
//! [`Collider`] is read per pair in the narrow phase and stays row-major.
//!
//! All values are double precision, matching `glam`'s `DVec3`/`DQuat`.

use crate::ecs::component::{ComponentStorage, SlotIndex};
use glam::{DQuat, DVec3};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Position, orientation and scale of an entity
///
/// # Examples
///
/// ```
/// use sim_kernel::ecs::components::Transform;
/// use glam::DVec3;
///
/// let t = Transform::from_position(DVec3::new(1.0, 2.0, 3.0));
/// assert_eq!(t.position.y, 2.0);
/// assert!(t.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transform {
    /// World-space position
    pub position: DVec3,
    /// Orientation, kept normalized by the movement system
    pub rotation: DQuat,
    /// Per-axis scale
    pub scale: DVec3,
}

impl Transform {
    /// Transform at a position with identity rotation and unit scale
    pub fn from_position(position: DVec3) -> Self {
        Transform {
            position,
            ..Default::default()
        }
    }

    /// Set the rotation
    pub fn with_rotation(mut self, rotation: DQuat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Set the scale
    pub fn with_scale(mut self, scale: DVec3) -> Self {
        self.scale = scale;
        self
    }

    /// Check if all fields are finite
    pub fn is_valid(&self) -> bool {
        self.position.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform {
            position: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
            scale: DVec3::ONE,
        }
    }
}

/// Mass and motion state of a physics body
///
/// Forces and torques accumulate between ticks and are cleared by the
/// movement system once integrated. Angular inertia is approximated by the
/// mass, so torque divides by mass the same way force does.
///
/// # Examples
///
/// ```
/// use sim_kernel::ecs::components::Rigidbody;
/// use glam::DVec3;
///
/// let body = Rigidbody::new(2.0).with_velocity(DVec3::X);
/// assert_eq!(body.inverse_mass(), 0.5);
///
/// let platform = Rigidbody::new(2.0).kinematic();
/// assert_eq!(platform.inverse_mass(), 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rigidbody {
    /// Linear velocity in units per second
    pub velocity: DVec3,
    /// Angular velocity as a scaled axis, radians per second
    pub angular_velocity: DVec3,
    /// Force accumulated this tick
    pub force: DVec3,
    /// Torque accumulated this tick
    pub torque: DVec3,
    /// Mass; below [`Rigidbody::IMMOVABLE_THRESHOLD`] the body is immovable
    pub mass: f64,
    /// Linear drag coefficient per second
    pub drag: f64,
    /// Angular drag coefficient per second
    pub angular_drag: f64,
    /// Externally driven: no force integration, no impulse response
    pub kinematic: bool,
    /// Skip angular integration
    pub freeze_rotation: bool,
}

impl Rigidbody {
    /// Mass below which a body is treated as immovable
    pub const IMMOVABLE_THRESHOLD: f64 = 1e-10;

    /// Create a body at rest with the given mass
    pub fn new(mass: f64) -> Self {
        Rigidbody {
            mass,
            ..Default::default()
        }
    }

    /// Set the linear velocity
    pub fn with_velocity(mut self, velocity: DVec3) -> Self {
        self.velocity = velocity;
        self
    }

    /// Set the angular velocity
    pub fn with_angular_velocity(mut self, angular_velocity: DVec3) -> Self {
        self.angular_velocity = angular_velocity;
        self
    }

    /// Set the linear drag
    pub fn with_drag(mut self, drag: f64) -> Self {
        self.drag = drag;
        self
    }

    /// Set the angular drag
    pub fn with_angular_drag(mut self, angular_drag: f64) -> Self {
        self.angular_drag = angular_drag;
        self
    }

    /// Mark the body kinematic
    pub fn kinematic(mut self) -> Self {
        self.kinematic = true;
        self
    }

    /// Freeze the body's rotation
    pub fn freeze_rotation(mut self) -> Self {
        self.freeze_rotation = true;
        self
    }

    /// Inverse mass used by integration and collision response
    ///
    /// Returns 0.0 for kinematic and immovable bodies.
    pub fn inverse_mass(&self) -> f64 {
        inverse_mass(self.mass, self.kinematic)
    }
}

impl Default for Rigidbody {
    fn default() -> Self {
        Rigidbody {
            velocity: DVec3::ZERO,
            angular_velocity: DVec3::ZERO,
            force: DVec3::ZERO,
            torque: DVec3::ZERO,
            mass: 1.0,
            drag: 0.0,
            angular_drag: 0.0,
            kinematic: false,
            freeze_rotation: false,
        }
    }
}

fn inverse_mass(mass: f64, kinematic: bool) -> f64 {
    if kinematic || !mass.is_finite() || mass < Rigidbody::IMMOVABLE_THRESHOLD {
        0.0
    } else {
        1.0 / mass
    }
}

/// Bounding sphere used for collision detection
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Collider {
    /// Sphere radius
    pub radius: f64,
    /// Triggers report overlaps without a physical response
    pub trigger: bool,
    /// Restitution coefficient in `[0, 1]`
    pub restitution: f64,
    /// Layer bits this collider belongs to
    pub layer: u32,
    /// Layer bits this collider collides with
    pub mask: u32,
}

impl Collider {
    /// Solid sphere collider
    pub fn sphere(radius: f64) -> Self {
        Collider {
            radius,
            ..Default::default()
        }
    }

    /// Trigger sphere collider
    pub fn trigger(radius: f64) -> Self {
        Collider {
            radius,
            trigger: true,
            ..Default::default()
        }
    }

    /// Set the restitution
    pub fn with_restitution(mut self, restitution: f64) -> Self {
        self.restitution = restitution;
        self
    }

    /// Set layer membership and collision mask
    pub fn with_layers(mut self, layer: u32, mask: u32) -> Self {
        self.layer = layer;
        self.mask = mask;
        self
    }

    /// Check whether two colliders' layers allow contact, in both directions
    pub fn interacts_with(&self, other: &Collider) -> bool {
        self.mask & other.layer != 0 && other.mask & self.layer != 0
    }
}

impl Default for Collider {
    fn default() -> Self {
        Collider {
            radius: 1.0,
            trigger: false,
            restitution: 0.5,
            layer: 1,
            mask: u32::MAX,
        }
    }
}

/// Fixed set of parallel `f64` columns with per-column reset values
#[derive(Debug, Clone)]
pub(crate) struct Columns<const N: usize> {
    cols: [Vec<f64>; N],
    defaults: [f64; N],
}

impl<const N: usize> Columns<N> {
    pub(crate) fn new(defaults: [f64; N]) -> Self {
        Columns {
            cols: std::array::from_fn(|_| Vec::new()),
            defaults,
        }
    }

    pub(crate) fn push(&mut self) {
        for (col, default) in self.cols.iter_mut().zip(self.defaults) {
            col.push(default);
        }
    }

    pub(crate) fn reset(&mut self, slot: usize) {
        for (col, default) in self.cols.iter_mut().zip(self.defaults) {
            col[slot] = default;
        }
    }

    pub(crate) fn move_slot(&mut self, from: usize, to: usize) {
        for col in self.cols.iter_mut() {
            col[to] = col[from];
        }
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        for col in self.cols.iter_mut() {
            col.truncate(len);
        }
    }

    #[inline]
    pub(crate) fn get(&self, col: usize, slot: usize) -> f64 {
        self.cols[col][slot]
    }

    #[inline]
    pub(crate) fn set(&mut self, col: usize, slot: usize, value: f64) {
        self.cols[col][slot] = value;
    }

    #[inline]
    fn vec3(&self, first: usize, slot: usize) -> DVec3 {
        DVec3::new(
            self.cols[first][slot],
            self.cols[first + 1][slot],
            self.cols[first + 2][slot],
        )
    }

    #[inline]
    fn set_vec3(&mut self, first: usize, slot: usize, value: DVec3) {
        self.cols[first][slot] = value.x;
        self.cols[first + 1][slot] = value.y;
        self.cols[first + 2][slot] = value.z;
    }

    pub(crate) fn column(&self, col: usize) -> &[f64] {
        &self.cols[col]
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [Vec<f64>; N] {
        &mut self.cols
    }
}

/// Column indices of [`TransformStore`]
pub mod transform_cols {
    /// Position x
    pub const PX: usize = 0;
    /// Position y
    pub const PY: usize = 1;
    /// Position z
    pub const PZ: usize = 2;
    /// Rotation x
    pub const RX: usize = 3;
    /// Rotation y
    pub const RY: usize = 4;
    /// Rotation z
    pub const RZ: usize = 5;
    /// Rotation w
    pub const RW: usize = 6;
    /// Scale x
    pub const SX: usize = 7;
    /// Scale y
    pub const SY: usize = 8;
    /// Scale z
    pub const SZ: usize = 9;
    /// Previous-tick position x
    pub const PREV_X: usize = 10;
    /// Previous-tick position y
    pub const PREV_Y: usize = 11;
    /// Previous-tick position z
    pub const PREV_Z: usize = 12;
    /// Number of columns
    pub const COUNT: usize = 13;
}

/// Column indices of [`RigidbodyStore`]
pub mod body_cols {
    /// Linear velocity x
    pub const VX: usize = 0;
    /// Linear velocity y
    pub const VY: usize = 1;
    /// Linear velocity z
    pub const VZ: usize = 2;
    /// Angular velocity x
    pub const WX: usize = 3;
    /// Angular velocity y
    pub const WY: usize = 4;
    /// Angular velocity z
    pub const WZ: usize = 5;
    /// Force x
    pub const FX: usize = 6;
    /// Force y
    pub const FY: usize = 7;
    /// Force z
    pub const FZ: usize = 8;
    /// Torque x
    pub const TX: usize = 9;
    /// Torque y
    pub const TY: usize = 10;
    /// Torque z
    pub const TZ: usize = 11;
    /// Mass
    pub const MASS: usize = 12;
    /// Cached inverse mass, zero for kinematic or immovable bodies
    pub const INV_MASS: usize = 13;
    /// Linear drag
    pub const DRAG: usize = 14;
    /// Angular drag
    pub const ANGULAR_DRAG: usize = 15;
    /// Number of columns
    pub const COUNT: usize = 16;
}

use body_cols as b;
use transform_cols as t;

/// Columnar storage for [`Transform`]
///
/// Alongside the transform itself the store keeps the position from before
/// the last movement step, which the collision system uses to detect fast
/// movers and sweep them through the grid.
#[derive(Debug, Clone)]
pub struct TransformStore {
    slots: SlotIndex,
    columns: Columns<{ t::COUNT }>,
}

impl TransformStore {
    /// Create a store holding at most `capacity` transforms
    pub fn with_capacity(capacity: usize) -> Self {
        let mut defaults = [0.0; t::COUNT];
        defaults[t::RW] = 1.0;
        defaults[t::SX] = 1.0;
        defaults[t::SY] = 1.0;
        defaults[t::SZ] = 1.0;
        TransformStore {
            slots: SlotIndex::with_capacity(capacity),
            columns: Columns::new(defaults),
        }
    }

    /// Position in a slot
    #[inline]
    pub fn position(&self, slot: usize) -> DVec3 {
        self.columns.vec3(t::PX, slot)
    }

    /// Teleport a slot: the previous position follows, so no sweep is left behind
    #[inline]
    pub fn set_position(&mut self, slot: usize, position: DVec3) {
        self.columns.set_vec3(t::PX, slot, position);
        self.columns.set_vec3(t::PREV_X, slot, position);
    }

    /// Move a slot along a path, keeping the previous position for swept tests
    #[inline]
    pub(crate) fn move_to(&mut self, slot: usize, position: DVec3) {
        self.columns.set_vec3(t::PX, slot, position);
    }

    /// Position before the last movement step
    #[inline]
    pub fn previous_position(&self, slot: usize) -> DVec3 {
        self.columns.vec3(t::PREV_X, slot)
    }

    pub(crate) fn set_previous_position(&mut self, slot: usize, position: DVec3) {
        self.columns.set_vec3(t::PREV_X, slot, position);
    }

    /// Rotation in a slot
    #[inline]
    pub fn rotation(&self, slot: usize) -> DQuat {
        DQuat::from_xyzw(
            self.columns.get(t::RX, slot),
            self.columns.get(t::RY, slot),
            self.columns.get(t::RZ, slot),
            self.columns.get(t::RW, slot),
        )
    }

    /// Overwrite the rotation in a slot
    #[inline]
    pub fn set_rotation(&mut self, slot: usize, rotation: DQuat) {
        self.columns.set(t::RX, slot, rotation.x);
        self.columns.set(t::RY, slot, rotation.y);
        self.columns.set(t::RZ, slot, rotation.z);
        self.columns.set(t::RW, slot, rotation.w);
    }

    /// Scale in a slot
    pub fn scale(&self, slot: usize) -> DVec3 {
        self.columns.vec3(t::SX, slot)
    }

    /// One field across every slot, live or free
    pub fn column(&self, col: usize) -> &[f64] {
        self.columns.column(col)
    }
}

impl ComponentStorage for TransformStore {
    type Component = Transform;

    fn slots(&self) -> &SlotIndex {
        &self.slots
    }

    fn slots_mut(&mut self) -> &mut SlotIndex {
        &mut self.slots
    }

    fn push_slot(&mut self) {
        self.columns.push();
    }

    fn reset_slot(&mut self, slot: usize) {
        self.columns.reset(slot);
    }

    fn move_slot(&mut self, from: usize, to: usize) {
        self.columns.move_slot(from, to);
    }

    fn truncate_slots(&mut self, len: usize) {
        self.columns.truncate(len);
    }

    fn read_slot(&self, slot: usize) -> Transform {
        Transform {
            position: self.position(slot),
            rotation: self.rotation(slot),
            scale: self.scale(slot),
        }
    }

    fn write_slot(&mut self, slot: usize, value: Transform) {
        self.set_position(slot, value.position);
        self.set_rotation(slot, value.rotation);
        self.columns.set_vec3(t::SX, slot, value.scale);
    }
}

/// Flag bit: body is kinematic
pub const KINEMATIC: u8 = 1;
/// Flag bit: body's rotation is frozen
pub const FREEZE_ROTATION: u8 = 2;

/// Row count above which the velocity pass runs on the rayon pool
#[cfg(feature = "parallel")]
const PARALLEL_THRESHOLD: usize = 4096;

/// Columnar storage for [`Rigidbody`]
#[derive(Debug, Clone)]
pub struct RigidbodyStore {
    slots: SlotIndex,
    columns: Columns<{ b::COUNT }>,
    flags: Vec<u8>,
}

impl RigidbodyStore {
    /// Create a store holding at most `capacity` bodies
    pub fn with_capacity(capacity: usize) -> Self {
        let mut defaults = [0.0; b::COUNT];
        defaults[b::MASS] = 1.0;
        defaults[b::INV_MASS] = 1.0;
        RigidbodyStore {
            slots: SlotIndex::with_capacity(capacity),
            columns: Columns::new(defaults),
            flags: Vec::new(),
        }
    }

    /// Linear velocity in a slot
    #[inline]
    pub fn velocity(&self, slot: usize) -> DVec3 {
        self.columns.vec3(b::VX, slot)
    }

    /// Overwrite the linear velocity in a slot
    #[inline]
    pub fn set_velocity(&mut self, slot: usize, velocity: DVec3) {
        self.columns.set_vec3(b::VX, slot, velocity);
    }

    /// Angular velocity in a slot
    #[inline]
    pub fn angular_velocity(&self, slot: usize) -> DVec3 {
        self.columns.vec3(b::WX, slot)
    }

    /// Overwrite the angular velocity in a slot
    pub fn set_angular_velocity(&mut self, slot: usize, angular_velocity: DVec3) {
        self.columns.set_vec3(b::WX, slot, angular_velocity);
    }

    /// Cached inverse mass in a slot
    #[inline]
    pub fn inverse_mass(&self, slot: usize) -> f64 {
        self.columns.get(b::INV_MASS, slot)
    }

    /// Flag bits in a slot
    #[inline]
    pub fn flags(&self, slot: usize) -> u8 {
        self.flags[slot]
    }

    /// Accumulate a force for the next integration step
    pub fn add_force(&mut self, slot: usize, force: DVec3) {
        let current = self.columns.vec3(b::FX, slot);
        self.columns.set_vec3(b::FX, slot, current + force);
    }

    /// Accumulate a torque for the next integration step
    pub fn add_torque(&mut self, slot: usize, torque: DVec3) {
        let current = self.columns.vec3(b::TX, slot);
        self.columns.set_vec3(b::TX, slot, current + torque);
    }

    /// One field across every slot, live or free
    pub fn column(&self, col: usize) -> &[f64] {
        self.columns.column(col)
    }

    /// Integrate accumulated forces and drag into velocities, then clear them
    ///
    /// `v = (v + F·m⁻¹·dt)·max(0, 1 − drag·dt)` per axis, and likewise for the
    /// angular velocity with torque. Kinematic bodies keep their velocity;
    /// frozen bodies keep their angular velocity. Forces and torques are
    /// cleared for every slot. A result that is not finite is discarded and
    /// the old value kept; the number of discarded components is returned.
    pub fn integrate_velocities(&mut self, dt: f64) -> usize {
        let [vx, vy, vz, wx, wy, wz, fx, fy, fz, tx, ty, tz, _mass, inv_mass, drag, angular_drag] =
            self.columns.columns_mut();
        let (inv_mass, drag, angular_drag): (&[f64], &[f64], &[f64]) = (inv_mass, drag, angular_drag);
        let flags = &self.flags;

        let mut rejected = 0;
        for (v, f) in [(vx, fx), (vy, fy), (vz, fz)] {
            rejected += integrate_axis(v, f, inv_mass, drag, flags, KINEMATIC, dt);
        }
        for (w, torque) in [(wx, tx), (wy, ty), (wz, tz)] {
            rejected += integrate_axis(
                w,
                torque,
                inv_mass,
                angular_drag,
                flags,
                KINEMATIC | FREEZE_ROTATION,
                dt,
            );
        }
        rejected
    }
}

/// One velocity axis of the integration pass
fn integrate_axis(
    v: &mut [f64],
    f: &mut [f64],
    inv_mass: &[f64],
    drag: &[f64],
    flags: &[u8],
    skip: u8,
    dt: f64,
) -> usize {
    let step = |v: &mut f64, f: &mut f64, inv_mass: f64, drag: f64, flags: u8| -> usize {
        let force = std::mem::take(f);
        if flags & skip != 0 {
            return 0;
        }
        let damping = (1.0 - drag * dt).max(0.0);
        let next = (*v + force * inv_mass * dt) * damping;
        if next.is_finite() {
            *v = next;
            0
        } else {
            1
        }
    };

    #[cfg(feature = "parallel")]
    if v.len() >= PARALLEL_THRESHOLD {
        return v
            .par_iter_mut()
            .zip(f.par_iter_mut())
            .zip(inv_mass.par_iter())
            .zip(drag.par_iter())
            .zip(flags.par_iter())
            .map(|((((v, f), &inv), &d), &fl)| step(v, f, inv, d, fl))
            .sum();
    }

    v.iter_mut()
        .zip(f.iter_mut())
        .zip(inv_mass)
        .zip(drag)
        .zip(flags)
        .map(|((((v, f), &inv), &d), &fl)| step(v, f, inv, d, fl))
        .sum()
}

impl ComponentStorage for RigidbodyStore {
    type Component = Rigidbody;

    fn slots(&self) -> &SlotIndex {
        &self.slots
    }

    fn slots_mut(&mut self) -> &mut SlotIndex {
        &mut self.slots
    }

    fn push_slot(&mut self) {
        self.columns.push();
        self.flags.push(0);
    }

    fn reset_slot(&mut self, slot: usize) {
        self.columns.reset(slot);
        self.flags[slot] = 0;
    }

    fn move_slot(&mut self, from: usize, to: usize) {
        self.columns.move_slot(from, to);
        self.flags[to] = self.flags[from];
    }

    fn truncate_slots(&mut self, len: usize) {
        self.columns.truncate(len);
        self.flags.truncate(len);
    }

    fn read_slot(&self, slot: usize) -> Rigidbody {
        let flags = self.flags[slot];
        Rigidbody {
            velocity: self.velocity(slot),
            angular_velocity: self.angular_velocity(slot),
            force: self.columns.vec3(b::FX, slot),
            torque: self.columns.vec3(b::TX, slot),
            mass: self.columns.get(b::MASS, slot),
            drag: self.columns.get(b::DRAG, slot),
            angular_drag: self.columns.get(b::ANGULAR_DRAG, slot),
            kinematic: flags & KINEMATIC != 0,
            freeze_rotation: flags & FREEZE_ROTATION != 0,
        }
    }

    fn write_slot(&mut self, slot: usize, value: Rigidbody) {
        self.set_velocity(slot, value.velocity);
        self.set_angular_velocity(slot, value.angular_velocity);
        self.columns.set_vec3(b::FX, slot, value.force);
        self.columns.set_vec3(b::TX, slot, value.torque);
        self.columns.set(b::MASS, slot, value.mass);
        self.columns.set(b::INV_MASS, slot, value.inverse_mass());
        self.columns.set(b::DRAG, slot, value.drag);
        self.columns.set(b::ANGULAR_DRAG, slot, value.angular_drag);

        let mut flags = 0;
        if value.kinematic {
            flags |= KINEMATIC;
        }
        if value.freeze_rotation {
            flags |= FREEZE_ROTATION;
        }
        self.flags[slot] = flags;
    }
}
