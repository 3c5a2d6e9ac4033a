// SPDX-License-Identifier: CEPL-1.0
//! Per-frame global uniforms. One [`GlobalUbo`] slot per in-flight frame lives
//! in a single host-visible buffer, and each slot gets its own descriptor set
//! at set 0, binding 0.
use std::collections::BTreeMap;
use std::mem::size_of;
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use ember_render::{RenderResult, MAX_FRAMES_IN_FLIGHT};
use glam::Mat4;
use tracing::debug;

use crate::context::{DeviceShared, VkContext};
use crate::resources::{Buffer, DescriptorPool, DescriptorSetLayout};

/// Data shared by every draw in a frame, laid out as the shaders' `GlobalUbo`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GlobalUbo {
    pub view_projection: [[f32; 4]; 4],
}

impl GlobalUbo {
    pub fn new(view_projection: Mat4) -> Self {
        Self {
            view_projection: view_projection.to_cols_array_2d(),
        }
    }
}

/// Round `size` up to a multiple of `min_alignment`. Vulkan alignments are
/// powers of two; 0 means unconstrained.
pub(crate) fn aligned_size(size: vk::DeviceSize, min_alignment: vk::DeviceSize) -> vk::DeviceSize {
    if min_alignment > 0 {
        (size + min_alignment - 1) & !(min_alignment - 1)
    } else {
        size
    }
}

/// Binding table for a descriptor set layout, one descriptor per binding.
#[derive(Default)]
pub struct SetLayoutBuilder {
    bindings: BTreeMap<u32, vk::DescriptorSetLayoutBinding<'static>>,
}

impl SetLayoutBuilder {
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        let entry = vk::DescriptorSetLayoutBinding {
            binding,
            descriptor_type,
            descriptor_count: 1,
            stage_flags: stages,
            ..Default::default()
        };
        let previous = self.bindings.insert(binding, entry);
        assert!(previous.is_none(), "descriptor binding {binding} already in use");
        self
    }

    /// Bindings in ascending binding order.
    pub fn bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings.values().copied().collect()
    }

    /// Pool sizes for allocating `sets` sets of this layout.
    pub(crate) fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for b in self.bindings.values() {
            let count = b.descriptor_count * sets;
            match sizes.iter_mut().find(|s| s.ty == b.descriptor_type) {
                Some(s) => s.descriptor_count += count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: b.descriptor_type,
                    descriptor_count: count,
                }),
            }
        }
        sizes
    }

    pub(crate) fn build(&self, dev: &Arc<DeviceShared>) -> RenderResult<DescriptorSetLayout> {
        DescriptorSetLayout::new(dev, &self.bindings())
    }
}

/// Layout of the global set every pipeline binds at set 0.
pub(crate) fn global_set_layout() -> SetLayoutBuilder {
    SetLayoutBuilder::default().binding(
        0,
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::ShaderStageFlags::VERTEX,
    )
}

/// Ring of [`GlobalUbo`]s indexed by frame index.
///
/// Slot `i` may only be written while frame `i` is being recorded: the
/// renderer has then waited for the submission that last read it.
pub struct FrameUniforms {
    sets: Vec<vk::DescriptorSet>,
    // sets are freed with the pool
    _pool: DescriptorPool,
    layout: DescriptorSetLayout,
    buffer: Buffer,
    stride: vk::DeviceSize,
}

impl FrameUniforms {
    pub fn new(ctx: &VkContext) -> Result<Self> {
        let dev = &ctx.shared;
        let frames = MAX_FRAMES_IN_FLIGHT;
        let ubo_size = size_of::<GlobalUbo>() as vk::DeviceSize;
        let stride = aligned_size(ubo_size, dev.min_uniform_alignment);

        let builder = global_set_layout();
        let layout = builder.build(dev).context("global set layout")?;
        let buffer = Buffer::new(
            dev,
            stride * frames as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .context("uniform buffer")?;
        let pool = DescriptorPool::new(dev, frames as u32, &builder.pool_sizes(frames as u32))
            .context("descriptor pool")?;
        let sets = pool
            .allocate(&vec![layout.raw; frames])
            .context("global descriptor sets")?;

        let infos: Vec<vk::DescriptorBufferInfo> = (0..frames)
            .map(|i| vk::DescriptorBufferInfo {
                buffer: buffer.raw,
                offset: stride * i as vk::DeviceSize,
                range: ubo_size,
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = sets
            .iter()
            .zip(&infos)
            .map(|(&set, info)| vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: info,
                ..Default::default()
            })
            .collect();
        unsafe { dev.device.update_descriptor_sets(&writes, &[]) };

        debug!(frames, stride, "frame uniforms ready");
        Ok(Self {
            sets,
            _pool: pool,
            layout,
            buffer,
            stride,
        })
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.raw
    }

    pub fn set(&self, frame_index: usize) -> vk::DescriptorSet {
        self.sets[frame_index]
    }

    pub fn write(&self, frame_index: usize, ubo: &GlobalUbo) -> Result<()> {
        assert!(frame_index < self.sets.len(), "frame index {frame_index} out of range");
        let offset = self.stride * frame_index as vk::DeviceSize;
        self.buffer
            .write_at(offset, bytemuck::bytes_of(ubo))
            .context("write global ubo")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ubo_slots_round_up_to_device_alignment() {
        assert_eq!(aligned_size(64, 256), 256);
        assert_eq!(aligned_size(64, 64), 64);
        assert_eq!(aligned_size(80, 64), 128);
        assert_eq!(aligned_size(80, 0), 80);
        assert_eq!(aligned_size(257, 256), 512);
    }

    #[test]
    fn global_ubo_is_one_matrix() {
        assert_eq!(size_of::<GlobalUbo>(), 64);
        let ubo = GlobalUbo::new(Mat4::from_scale(glam::Vec3::splat(2.0)));
        assert_eq!(ubo.view_projection[0], [2.0, 0.0, 0.0, 0.0]);
        assert_eq!(ubo.view_projection[3], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn global_layout_has_one_vertex_uniform() {
        let bindings = global_set_layout().bindings();
        assert_eq!(bindings.len(), 1);
        let b = bindings[0];
        assert_eq!(b.binding, 0);
        assert_eq!(b.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(b.descriptor_count, 1);
        assert_eq!(b.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn bindings_come_out_sorted() {
        let builder = SetLayoutBuilder::default()
            .binding(
                2,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX);
        let order: Vec<u32> = builder.bindings().iter().map(|b| b.binding).collect();
        assert_eq!(order, vec![0, 2]);
    }

    #[test]
    #[should_panic(expected = "already in use")]
    fn duplicate_binding_panics() {
        let _ = SetLayoutBuilder::default()
            .binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)
            .binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn pool_sizes_scale_with_set_count() {
        let builder = SetLayoutBuilder::default()
            .binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)
            .binding(1, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT)
            .binding(
                2,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            );
        let sizes = builder.pool_sizes(2);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 4);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 2);
    }
}
