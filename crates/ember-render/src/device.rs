// SPDX-License-Identifier: CEPL-1.0
use std::fmt;

use ash::vk;

use crate::error::RenderResult;

/// Outcome of an acquire or present request that did not fail outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Ok,
    /// Still usable, but the surface has drifted from the chain.
    Suboptimal,
    /// Unusable until the chain is recreated.
    OutOfDate,
}

impl PresentStatus {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentStatus::Ok)
    }
}

/// What the surface supports, queried fresh before each chain is built.
#[derive(Clone, Debug)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Fully negotiated parameters handed to [`RenderDevice::create_targets`].
#[derive(Clone, Copy, Debug)]
pub struct ChainConfig {
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub depth_format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: [0.01, 0.01, 0.01, 1.0],
            depth: 1.0,
            stencil: 0,
        }
    }
}

/// The per-chain render targets built by a backend: presentable images and
/// their views, one depth buffer per image, the render pass and one
/// framebuffer per image. Dropping the value releases all of it.
pub trait RenderTargets {
    fn extent(&self) -> vk::Extent2D;
    fn color_format(&self) -> vk::Format;
    fn depth_format(&self) -> vk::Format;
    fn image_count(&self) -> usize;
    fn framebuffer_count(&self) -> usize;
}

/// Device-side operations the frame lifecycle drives.
///
/// Semaphores, fences and targets are owned values; dropping them destroys
/// the underlying objects, so a constructor that bails out with `?` never
/// leaks what it already built. Waits are unbounded.
pub trait RenderDevice {
    type Semaphore;
    type Fence;
    type CommandBuffer: Copy + PartialEq + fmt::Debug;
    type Targets: RenderTargets;

    fn surface_support(&self) -> RenderResult<SurfaceSupport>;
    fn depth_format(&self) -> RenderResult<vk::Format>;

    /// Build a chain's targets. `previous` names the chain being replaced so
    /// the platform can hand its images over.
    fn create_targets(
        &self,
        config: &ChainConfig,
        previous: Option<&Self::Targets>,
    ) -> RenderResult<Self::Targets>;

    fn create_semaphore(&self) -> RenderResult<Self::Semaphore>;
    fn create_fence(&self, signaled: bool) -> RenderResult<Self::Fence>;
    fn wait_for_fence(&self, fence: &Self::Fence) -> RenderResult<()>;
    fn reset_fence(&self, fence: &Self::Fence) -> RenderResult<()>;

    fn acquire_next_image(
        &self,
        targets: &Self::Targets,
        signal: &Self::Semaphore,
    ) -> RenderResult<(u32, PresentStatus)>;

    fn submit(
        &self,
        cmd: Self::CommandBuffer,
        wait: &Self::Semaphore,
        signal: &Self::Semaphore,
        fence: &Self::Fence,
    ) -> RenderResult<()>;

    fn present(
        &self,
        targets: &Self::Targets,
        image_index: u32,
        wait: &Self::Semaphore,
    ) -> RenderResult<PresentStatus>;

    fn wait_idle(&self) -> RenderResult<()>;

    fn allocate_command_buffers(&self, count: usize) -> RenderResult<Vec<Self::CommandBuffer>>;
    fn free_command_buffers(&self, buffers: &[Self::CommandBuffer]);
    fn begin_commands(&self, cmd: Self::CommandBuffer) -> RenderResult<()>;
    fn end_commands(&self, cmd: Self::CommandBuffer) -> RenderResult<()>;

    fn cmd_begin_render_pass(
        &self,
        cmd: Self::CommandBuffer,
        targets: &Self::Targets,
        image_index: u32,
        clear: &ClearValues,
    );
    fn cmd_set_viewport_and_scissor(&self, cmd: Self::CommandBuffer, extent: vk::Extent2D);
    fn cmd_end_render_pass(&self, cmd: Self::CommandBuffer);
}
