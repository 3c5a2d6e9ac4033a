// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use ember_render::{ChainConfig, RenderResult, RenderTargets};
use tracing::debug;

use crate::context::DeviceShared;
use crate::resources::{DepthImage, Framebuffer, ImageView, RenderPass, Swapchain};

/// Everything one surface chain renders into. Fields drop top to bottom:
/// framebuffers, then the pass and attachments they reference, then the
/// swapchain that owns the color images.
pub struct VkTargets {
    framebuffers: Vec<Framebuffer>,
    render_pass: RenderPass,
    depth: Vec<DepthImage>,
    color_views: Vec<ImageView>,
    images: Vec<vk::Image>,
    swapchain: Swapchain,

    extent: vk::Extent2D,
    color_format: vk::Format,
    depth_format: vk::Format,
}

impl VkTargets {
    pub(crate) fn new(
        dev: &Arc<DeviceShared>,
        config: &ChainConfig,
        previous: Option<&VkTargets>,
    ) -> RenderResult<Self> {
        let surface = dev.instance.surface;
        let families = dev.families();
        let (sharing_mode, family_count) = if families.len() > 1 {
            (vk::SharingMode::CONCURRENT, families.len() as u32)
        } else {
            (vk::SharingMode::EXCLUSIVE, 0)
        };

        let ci = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface,
            min_image_count: config.min_image_count,
            image_format: config.surface_format.format,
            image_color_space: config.surface_format.color_space,
            image_extent: config.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: families.as_ptr(),
            pre_transform: config.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: config.present_mode,
            clipped: vk::TRUE,
            old_swapchain: previous.map_or(vk::SwapchainKHR::null(), |p| p.swapchain.raw),
            ..Default::default()
        };
        let swapchain = Swapchain::new(dev, &ci)?;
        let images = swapchain.images()?;

        let color_format = config.surface_format.format;
        let color_views = images
            .iter()
            .map(|&img| ImageView::new(dev, img, color_format, vk::ImageAspectFlags::COLOR))
            .collect::<RenderResult<Vec<_>>>()?;
        let depth = images
            .iter()
            .map(|_| DepthImage::new(dev, config.extent, config.depth_format))
            .collect::<RenderResult<Vec<_>>>()?;

        let render_pass = RenderPass::new(dev, color_format, config.depth_format)?;
        let framebuffers = color_views
            .iter()
            .zip(&depth)
            .map(|(color, depth)| {
                Framebuffer::new(
                    dev,
                    &render_pass,
                    &[color.raw, depth.view().raw],
                    config.extent,
                )
            })
            .collect::<RenderResult<Vec<_>>>()?;

        debug!(
            images = images.len(),
            concurrent = families.len() > 1,
            "swapchain targets built"
        );

        Ok(Self {
            framebuffers,
            render_pass,
            depth,
            color_views,
            images,
            swapchain,
            extent: config.extent,
            color_format,
            depth_format: config.depth_format,
        })
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.raw
    }

    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize].raw
    }

    pub(crate) fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain.raw
    }
}

impl RenderTargets for VkTargets {
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn color_format(&self) -> vk::Format {
        self.color_format
    }

    fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }
}
