// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fmt;
use std::sync::Arc;

use glam::{Mat3, Mat4, Vec3};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u32);

impl ObjectId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out object ids in increasing order, starting at 0.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> ObjectId {
        let id = ObjectId(self.next);
        self.next += 1;
        id
    }
}

/// Translation, per-axis scale and Tait-Bryan angles in radians, applied
/// as Y, then X, then Z.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub scale: Vec3,
    pub rotation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Vec3::ZERO,
        }
    }
}

impl Transform {
    fn rotation_matrix(&self) -> Mat3 {
        Mat3::from_rotation_y(self.rotation.y)
            * Mat3::from_rotation_x(self.rotation.x)
            * Mat3::from_rotation_z(self.rotation.z)
    }

    /// translate * Ry * Rx * Rz * scale
    pub fn matrix(&self) -> Mat4 {
        let linear = self.rotation_matrix() * Mat3::from_diagonal(self.scale);
        let mut m = Mat4::from_mat3(linear);
        m.w_axis = self.translation.extend(1.0);
        m
    }
}

/// Something drawable in the scene. Ids are unique per allocator and
/// objects are not `Clone`, so two live objects never share one.
#[derive(Debug)]
pub struct SceneObject<M> {
    id: ObjectId,
    pub model: Option<Arc<M>>,
    pub color: Vec3,
    pub transform: Transform,
}

impl<M> SceneObject<M> {
    pub fn new(ids: &mut IdAllocator) -> Self {
        Self {
            id: ids.allocate(),
            model: None,
            color: Vec3::ZERO,
            transform: Transform::default(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }
}
