// SPDX-License-Identifier: CEPL-1.0
use std::mem::size_of;

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use ember_scene::SceneObject;
use glam::{Mat4, Vec4};

use crate::context::VkContext;
use crate::mesh::Mesh;
use crate::pipeline::{GraphicsPipeline, PipelineConfig};
use crate::resources::PipelineLayout;

const VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/simple.vert.spv"));
const FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/simple.frag.spv"));

const PUSH_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// Per-draw data, laid out as the shaders' `Push` block. `transform` is
/// the model matrix; view and projection come from the global set.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    pub transform: [[f32; 4]; 4],
    pub color: [f32; 4],
}

impl PushConstants {
    pub fn new(transform: Mat4, color: Vec4) -> Self {
        Self {
            transform: transform.to_cols_array_2d(),
            color: color.to_array(),
        }
    }
}

/// What a render system needs to record draws for the current frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameInfo {
    pub frame_index: usize,
    pub cmd: vk::CommandBuffer,
    /// Global set for `frame_index`, bound at set 0.
    pub global_set: vk::DescriptorSet,
}

/// Draws mesh objects with one push-constant block per object.
pub struct SimpleRenderSystem {
    // pipeline before the layout it was built with
    pipeline: GraphicsPipeline,
    layout: PipelineLayout,
}

impl SimpleRenderSystem {
    pub fn new(
        ctx: &VkContext,
        render_pass: vk::RenderPass,
        global_set_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let range = vk::PushConstantRange {
            stage_flags: PUSH_STAGES,
            offset: 0,
            size: size_of::<PushConstants>() as u32,
        };
        let layout = PipelineLayout::new(&ctx.shared, &[global_set_layout], &[range])
            .context("pipeline layout")?;
        let pipeline = GraphicsPipeline::new(
            ctx,
            render_pass,
            &layout,
            VERT_SPV,
            FRAG_SPV,
            &PipelineConfig::default(),
        )
        .context("simple pipeline")?;
        Ok(Self { pipeline, layout })
    }

    /// Record draws for every object that has a model.
    pub fn render_objects(
        &self,
        ctx: &VkContext,
        frame: &FrameInfo,
        objects: &[SceneObject<Mesh>],
    ) {
        let cmd = frame.cmd;
        self.pipeline.bind(ctx, cmd);
        unsafe {
            ctx.device().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout.raw,
                0,
                std::slice::from_ref(&frame.global_set),
                &[],
            );
        }
        for obj in objects {
            let Some(mesh) = &obj.model else { continue };
            let push = PushConstants::new(obj.transform.matrix(), obj.color.extend(1.0));
            unsafe {
                ctx.device().cmd_push_constants(
                    cmd,
                    self.layout.raw,
                    PUSH_STAGES,
                    0,
                    bytemuck::bytes_of(&push),
                );
            }
            mesh.bind(ctx, cmd);
            mesh.draw(ctx, cmd);
        }
    }
}
