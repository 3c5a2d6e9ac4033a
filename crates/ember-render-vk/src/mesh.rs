// SPDX-License-Identifier: CEPL-1.0
use std::mem::{offset_of, size_of};

use anyhow::{ensure, Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::debug;

use crate::context::VkContext;
use crate::resources::Buffer;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub const fn new(position: [f32; 3], color: [f32; 3]) -> Self {
        Self { position, color }
    }

    pub fn bindings() -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attributes() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

/// Geometry in device-local buffers, optionally indexed.
pub struct Mesh {
    vertices: Buffer,
    vertex_count: u32,
    indices: Option<(Buffer, u32)>,
}

/// Usage and memory of the two ends of a staged upload for a buffer that
/// will be used as `usage`.
fn staged_upload_flags(
    usage: vk::BufferUsageFlags,
) -> [(vk::BufferUsageFlags, vk::MemoryPropertyFlags); 2] {
    [
        (
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ),
        (
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ),
    ]
}

/// Copy `bytes` into a new device-local buffer through a staging buffer.
/// Blocks until the transfer has finished.
fn device_local_buffer(
    ctx: &VkContext,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<Buffer> {
    let size = bytes.len() as vk::DeviceSize;
    let [(src_usage, src_props), (dst_usage, dst_props)] = staged_upload_flags(usage);
    let staging =
        Buffer::new(&ctx.shared, size, src_usage, src_props).context("staging buffer")?;
    staging.write(bytes)?;

    let buffer = Buffer::new(&ctx.shared, size, dst_usage, dst_props)?;
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    ctx.shared
        .submit_one_shot(|device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, staging.raw, buffer.raw, std::slice::from_ref(&region));
        })
        .context("staging copy")?;
    Ok(buffer)
}

impl Mesh {
    pub fn new(ctx: &VkContext, vertices: &[Vertex], indices: &[u32]) -> Result<Self> {
        ensure!(vertices.len() >= 3, "mesh needs at least 3 vertices");

        let vertex_buffer = device_local_buffer(
            ctx,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )
        .context("vertex buffer")?;

        let indices = if indices.is_empty() {
            None
        } else {
            let buffer = device_local_buffer(
                ctx,
                bytemuck::cast_slice(indices),
                vk::BufferUsageFlags::INDEX_BUFFER,
            )
            .context("index buffer")?;
            Some((buffer, indices.len() as u32))
        };

        debug!(
            vertices = vertices.len(),
            indices = indices.as_ref().map_or(0, |(_, n)| *n),
            "mesh uploaded"
        );

        Ok(Self {
            vertices: vertex_buffer,
            vertex_count: vertices.len() as u32,
            indices,
        })
    }

    pub fn bind(&self, ctx: &VkContext, cmd: vk::CommandBuffer) {
        let device = ctx.device();
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.raw], &[0]);
            if let Some((buffer, _)) = &self.indices {
                device.cmd_bind_index_buffer(cmd, buffer.raw, 0, vk::IndexType::UINT32);
            }
        }
    }

    pub fn draw(&self, ctx: &VkContext, cmd: vk::CommandBuffer) {
        let device = ctx.device();
        unsafe {
            match &self.indices {
                Some((_, count)) => device.cmd_draw_indexed(cmd, *count, 1, 0, 0, 0),
                None => device.cmd_draw(cmd, self.vertex_count, 1, 0, 0),
            }
        }
    }
}
