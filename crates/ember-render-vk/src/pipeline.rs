// SPDX-License-Identifier: CEPL-1.0
use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;

use crate::context::VkContext;
use crate::mesh::Vertex;
use crate::resources::{Pipeline, PipelineLayout, ShaderModule};

/// Fixed-function choices for a graphics pipeline. Viewport and scissor are
/// always dynamic so pipelines survive surface resizes.
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_compare: vk::CompareOp,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test: true,
            depth_compare: vk::CompareOp::LESS,
        }
    }
}

/// Graphics pipeline for [`Vertex`] input, built against a render pass.
/// Any render pass with the same attachment formats is compatible.
pub struct GraphicsPipeline {
    pipeline: Pipeline,
}

impl GraphicsPipeline {
    pub fn new(
        ctx: &VkContext,
        render_pass: vk::RenderPass,
        layout: &PipelineLayout,
        vert_spv: &[u8],
        frag_spv: &[u8],
        config: &PipelineConfig,
    ) -> Result<Self> {
        let dev = &ctx.shared;
        let vs_code = read_spv(&mut Cursor::new(vert_spv)).context("read vertex spir-v")?;
        let fs_code = read_spv(&mut Cursor::new(frag_spv)).context("read fragment spir-v")?;
        // modules drop at the end of this function, after pipeline creation
        let vs = ShaderModule::new(dev, &vs_code)?;
        let fs = ShaderModule::new(dev, &fs_code)?;

        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs.raw,
                p_name: c"main".as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs.raw,
                p_name: c"main".as_ptr(),
                ..Default::default()
            },
        ];

        let bindings = Vertex::bindings();
        let attributes = Vertex::attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: bindings.len() as u32,
            p_vertex_binding_descriptions: bindings.as_ptr(),
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: config.topology,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: config.cull_mode,
            front_face: config.front_face,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let depth_flag = if config.depth_test { vk::TRUE } else { vk::FALSE };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: depth_flag,
            depth_write_enable: depth_flag,
            depth_compare_op: config.depth_compare,
            max_depth_bounds: 1.0,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: layout.raw,
            render_pass,
            subpass: 0,
            ..Default::default()
        };

        let pipelines = unsafe {
            dev.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&info),
                None,
            )
        }
        .map_err(|(_, err)| anyhow!("create_graphics_pipelines failed: {err:?}"))?;

        Ok(Self {
            pipeline: Pipeline::from_raw(dev, pipelines[0]),
        })
    }

    pub fn bind(&self, ctx: &VkContext, cmd: vk::CommandBuffer) {
        unsafe {
            ctx.device()
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.raw)
        };
    }
}
