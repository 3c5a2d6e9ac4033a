// SPDX-License-Identifier: CEPL-1.0
use std::f32::consts::TAU;

use ember_render_vk::Vertex;
use ember_scene::Transform;
use glam::{Mat4, Vec3};

/// Unit cube centred on the origin, one color per corner.
pub const CUBE_VERTICES: [Vertex; 8] = [
    Vertex::new([-0.5, -0.5, -0.5], [0.9, 0.9, 0.9]),
    Vertex::new([0.5, -0.5, -0.5], [0.8, 0.1, 0.1]),
    Vertex::new([0.5, 0.5, -0.5], [0.9, 0.6, 0.1]),
    Vertex::new([-0.5, 0.5, -0.5], [0.9, 0.9, 0.1]),
    Vertex::new([-0.5, -0.5, 0.5], [0.1, 0.1, 0.8]),
    Vertex::new([0.5, -0.5, 0.5], [0.8, 0.1, 0.8]),
    Vertex::new([0.5, 0.5, 0.5], [0.1, 0.8, 0.1]),
    Vertex::new([-0.5, 0.5, 0.5], [0.1, 0.8, 0.8]),
];

#[rustfmt::skip]
pub const CUBE_INDICES: [u32; 36] = [
    0, 1, 2,  0, 2, 3, // -z
    4, 6, 5,  4, 7, 6, // +z
    0, 4, 5,  0, 5, 1, // -y
    3, 2, 6,  3, 6, 7, // +y
    0, 3, 7,  0, 7, 4, // -x
    1, 5, 6,  1, 6, 2, // +x
];

/// Camera looking down -z from `distance` with a Vulkan clip space
/// (y down, depth 0..1).
pub fn view_projection(aspect: f32, distance: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(50f32.to_radians(), aspect, 0.1, 100.0);
    proj.y_axis.y *= -1.0;
    let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, distance), Vec3::ZERO, Vec3::Y);
    proj * view
}

/// Spin around y and x at fixed rates, `seconds` since start.
pub fn spin(transform: &mut Transform, seconds: f32) {
    transform.rotation.y = (seconds * 0.8) % TAU;
    transform.rotation.x = (seconds * 0.35) % TAU;
}
