// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_render::error::{RenderError, RenderResult, VkResultExt};
use ember_render::{ChainConfig, ClearValues, PresentStatus, RenderDevice, SurfaceSupport};

use crate::context::VkContext;
use crate::resources::{Fence, Semaphore};
use crate::targets::VkTargets;

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Map the non-fatal swapchain results onto [`PresentStatus`].
fn present_status(
    res: Result<bool, vk::Result>,
    op: &'static str,
) -> RenderResult<PresentStatus> {
    match res {
        Ok(false) => Ok(PresentStatus::Ok),
        Ok(true) => Ok(PresentStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
        Err(e) => Err(RenderError::vk(op, e)),
    }
}

impl RenderDevice for VkContext {
    type Semaphore = Semaphore;
    type Fence = Fence;
    type CommandBuffer = vk::CommandBuffer;
    type Targets = VkTargets;

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        let inst = &self.shared.instance;
        let phys = self.shared.phys;
        unsafe {
            Ok(SurfaceSupport {
                capabilities: inst
                    .surface_loader
                    .get_physical_device_surface_capabilities(phys, inst.surface)
                    .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                formats: inst
                    .surface_loader
                    .get_physical_device_surface_formats(phys, inst.surface)
                    .op("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                present_modes: inst
                    .surface_loader
                    .get_physical_device_surface_present_modes(phys, inst.surface)
                    .op("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            })
        }
    }

    fn depth_format(&self) -> RenderResult<vk::Format> {
        let instance = &self.shared.instance.instance;
        DEPTH_CANDIDATES
            .into_iter()
            .find(|&fmt| {
                let props = unsafe {
                    instance.get_physical_device_format_properties(self.shared.phys, fmt)
                };
                props
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .ok_or(RenderError::UnsupportedSurface("no usable depth format"))
    }

    fn create_targets(
        &self,
        config: &ChainConfig,
        previous: Option<&VkTargets>,
    ) -> RenderResult<VkTargets> {
        VkTargets::new(&self.shared, config, previous)
    }

    fn create_semaphore(&self) -> RenderResult<Semaphore> {
        Semaphore::new(&self.shared)
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<Fence> {
        Fence::new(&self.shared, signaled)
    }

    fn wait_for_fence(&self, fence: &Fence) -> RenderResult<()> {
        unsafe {
            self.shared
                .device
                .wait_for_fences(&[fence.raw], true, u64::MAX)
        }
        .op("vkWaitForFences")
    }

    fn reset_fence(&self, fence: &Fence) -> RenderResult<()> {
        unsafe { self.shared.device.reset_fences(&[fence.raw]) }.op("vkResetFences")
    }

    fn acquire_next_image(
        &self,
        targets: &VkTargets,
        signal: &Semaphore,
    ) -> RenderResult<(u32, PresentStatus)> {
        let res = unsafe {
            self.shared.swapchain_loader.acquire_next_image(
                targets.swapchain(),
                u64::MAX,
                signal.raw,
                vk::Fence::null(),
            )
        };
        match res {
            Ok((index, suboptimal)) => {
                let status = present_status(Ok(suboptimal), "vkAcquireNextImageKHR")?;
                Ok((index, status))
            }
            Err(e) => Ok((0, present_status(Err(e), "vkAcquireNextImageKHR")?)),
        }
    }

    fn submit(
        &self,
        cmd: vk::CommandBuffer,
        wait: &Semaphore,
        signal: &Semaphore,
        fence: &Fence,
    ) -> RenderResult<()> {
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait.raw,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal.raw,
            ..Default::default()
        };
        unsafe {
            self.shared.device.queue_submit(
                self.shared.graphics_queue,
                std::slice::from_ref(&submit),
                fence.raw,
            )
        }
        .op("vkQueueSubmit")
    }

    fn present(
        &self,
        targets: &VkTargets,
        image_index: u32,
        wait: &Semaphore,
    ) -> RenderResult<PresentStatus> {
        let swapchain = targets.swapchain();
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait.raw,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let res = unsafe {
            self.shared
                .swapchain_loader
                .queue_present(self.shared.present_queue, &present)
        };
        present_status(res, "vkQueuePresentKHR")
    }

    fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.shared.device.device_wait_idle() }.op("vkDeviceWaitIdle")
    }

    fn allocate_command_buffers(&self, count: usize) -> RenderResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.shared.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        unsafe { self.shared.device.allocate_command_buffers(&info) }
            .op("vkAllocateCommandBuffers")
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe {
            self.shared
                .device
                .free_command_buffers(self.shared.command_pool, buffers)
        };
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        // pool allows per-buffer reset; begin resets implicitly
        unsafe { self.shared.device.begin_command_buffer(cmd, &begin) }
            .op("vkBeginCommandBuffer")
    }

    fn end_commands(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        unsafe { self.shared.device.end_command_buffer(cmd) }.op("vkEndCommandBuffer")
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        targets: &VkTargets,
        image_index: u32,
        clear: &ClearValues,
    ) {
        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear.color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: clear.depth,
                    stencil: clear.stencil,
                },
            },
        ];
        let begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: targets.render_pass(),
            framebuffer: targets.framebuffer(image_index),
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: ember_render::RenderTargets::extent(targets),
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.shared
                .device
                .cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_set_viewport_and_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.shared.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.shared.device.cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.shared.device.cmd_end_render_pass(cmd) };
    }
}
