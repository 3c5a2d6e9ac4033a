// SPDX-License-Identifier: CEPL-1.0
//! Owned device handles. Each holds the device it came from and destroys
//! its handle on drop, so partially built objects unwind cleanly on `?`.
use std::sync::Arc;

use ash::vk;
use ember_render::error::{RenderError, RenderResult, VkResultExt};

use crate::context::DeviceShared;

macro_rules! owned_handle {
    ($(#[$meta:meta])* $name:ident, $raw:ty, $destroy:ident) => {
        $(#[$meta])*
        pub struct $name {
            pub(crate) raw: $raw,
            dev: Arc<DeviceShared>,
        }

        impl $name {
            pub fn raw(&self) -> $raw {
                self.raw
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                unsafe { self.dev.device.$destroy(self.raw, None) };
            }
        }
    };
}

owned_handle!(Semaphore, vk::Semaphore, destroy_semaphore);
owned_handle!(Fence, vk::Fence, destroy_fence);
owned_handle!(ImageView, vk::ImageView, destroy_image_view);
owned_handle!(RenderPass, vk::RenderPass, destroy_render_pass);
owned_handle!(Framebuffer, vk::Framebuffer, destroy_framebuffer);
owned_handle!(PipelineLayout, vk::PipelineLayout, destroy_pipeline_layout);
owned_handle!(Pipeline, vk::Pipeline, destroy_pipeline);
owned_handle!(
    DescriptorSetLayout,
    vk::DescriptorSetLayout,
    destroy_descriptor_set_layout
);
owned_handle!(
    /// Sets allocated from the pool are freed with it.
    DescriptorPool,
    vk::DescriptorPool,
    destroy_descriptor_pool
);
owned_handle!(
    /// Only needs to live until the pipelines using it are built.
    ShaderModule,
    vk::ShaderModule,
    destroy_shader_module
);

impl Semaphore {
    pub(crate) fn new(dev: &Arc<DeviceShared>) -> RenderResult<Self> {
        let ci = vk::SemaphoreCreateInfo::default();
        let raw = unsafe { dev.device.create_semaphore(&ci, None) }.op("vkCreateSemaphore")?;
        Ok(Self {
            raw,
            dev: dev.clone(),
        })
    }
}

impl Fence {
    pub(crate) fn new(dev: &Arc<DeviceShared>, signaled: bool) -> RenderResult<Self> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        let raw = unsafe { dev.device.create_fence(&ci, None) }.op("vkCreateFence")?;
        Ok(Self {
            raw,
            dev: dev.clone(),
        })
    }
}

impl ImageView {
    pub(crate) fn new(
        dev: &Arc<DeviceShared>,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
    ) -> RenderResult<Self> {
        let ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let raw = unsafe { dev.device.create_image_view(&ci, None) }.op("vkCreateImageView")?;
        Ok(Self {
            raw,
            dev: dev.clone(),
        })
    }
}

impl RenderPass {
    /// One color attachment that ends up presentable and one depth
    /// attachment, in a single subpass.
    pub(crate) fn new(
        dev: &Arc<DeviceShared>,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RenderResult<Self> {
        let attachments = [
            vk::AttachmentDescription {
                format: color_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                ..Default::default()
            },
            vk::AttachmentDescription {
                format: depth_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            },
        ];
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: &depth_ref,
            ..Default::default()
        };

        // wait for the acquire semaphore's stage before writing attachments
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stages,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: stages,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        };

        let ci = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let raw = unsafe { dev.device.create_render_pass(&ci, None) }.op("vkCreateRenderPass")?;
        Ok(Self {
            raw,
            dev: dev.clone(),
        })
    }
}

impl Framebuffer {
    pub(crate) fn new(
        dev: &Arc<DeviceShared>,
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let ci = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass: render_pass.raw,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        let raw = unsafe { dev.device.create_framebuffer(&ci, None) }.op("vkCreateFramebuffer")?;
        Ok(Self {
            raw,
            dev: dev.clone(),
        })
    }
}

impl PipelineLayout {
    pub(crate) fn new(
        dev: &Arc<DeviceShared>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> RenderResult<Self> {
        let ci = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: set_layouts.len() as u32,
            p_set_layouts: set_layouts.as_ptr(),
            push_constant_range_count: push_constants.len() as u32,
            p_push_constant_ranges: push_constants.as_ptr(),
            ..Default::default()
        };
        let raw =
            unsafe { dev.device.create_pipeline_layout(&ci, None) }.op("vkCreatePipelineLayout")?;
        Ok(Self {
            raw,
            dev: dev.clone(),
        })
    }
}

impl DescriptorSetLayout {
    pub(crate) fn new(
        dev: &Arc<DeviceShared>,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RenderResult<Self> {
        let ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe { dev.device.create_descriptor_set_layout(&ci, None) }
            .op("vkCreateDescriptorSetLayout")?;
        Ok(Self {
            raw,
            dev: dev.clone(),
        })
    }
}

impl DescriptorPool {
    pub(crate) fn new(
        dev: &Arc<DeviceShared>,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RenderResult<Self> {
        let ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe { dev.device.create_descriptor_pool(&ci, None) }
            .op("vkCreateDescriptorPool")?;
        Ok(Self {
            raw,
            dev: dev.clone(),
        })
    }

    /// One set per entry of `layouts`.
    pub(crate) fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RenderResult<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.raw,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        unsafe { self.dev.device.allocate_descriptor_sets(&info) }
            .op("vkAllocateDescriptorSets")
    }
}

impl Pipeline {
    pub(crate) fn from_raw(dev: &Arc<DeviceShared>, raw: vk::Pipeline) -> Self {
        Self {
            raw,
            dev: dev.clone(),
        }
    }
}

impl ShaderModule {
    pub(crate) fn new(dev: &Arc<DeviceShared>, code: &[u32]) -> RenderResult<Self> {
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            p_code: code.as_ptr(),
            code_size: std::mem::size_of_val(code),
            ..Default::default()
        };
        let raw =
            unsafe { dev.device.create_shader_module(&ci, None) }.op("vkCreateShaderModule")?;
        Ok(Self {
            raw,
            dev: dev.clone(),
        })
    }
}

/// Swapchain handle; images belong to it and need no separate cleanup.
pub struct Swapchain {
    pub(crate) raw: vk::SwapchainKHR,
    dev: Arc<DeviceShared>,
}

impl Swapchain {
    pub(crate) fn new(
        dev: &Arc<DeviceShared>,
        ci: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> RenderResult<Self> {
        let raw = unsafe { dev.swapchain_loader.create_swapchain(ci, None) }
            .op("vkCreateSwapchainKHR")?;
        Ok(Self {
            raw,
            dev: dev.clone(),
        })
    }

    pub(crate) fn images(&self) -> RenderResult<Vec<vk::Image>> {
        unsafe { self.dev.swapchain_loader.get_swapchain_images(self.raw) }
            .op("vkGetSwapchainImagesKHR")
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe { self.dev.swapchain_loader.destroy_swapchain(self.raw, None) };
    }
}

/// Image with its own bound allocation.
struct OwnedImage {
    image: vk::Image,
    memory: vk::DeviceMemory,
    dev: Arc<DeviceShared>,
}

impl Drop for OwnedImage {
    fn drop(&mut self) {
        unsafe {
            self.dev.device.destroy_image(self.image, None);
            if self.memory != vk::DeviceMemory::null() {
                self.dev.device.free_memory(self.memory, None);
            }
        }
    }
}

/// Device-local depth image plus its view.
pub struct DepthImage {
    // view before the image it looks at
    view: ImageView,
    _image: OwnedImage,
}

impl DepthImage {
    pub(crate) fn new(
        dev: &Arc<DeviceShared>,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> RenderResult<Self> {
        let ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = unsafe { dev.device.create_image(&ci, None) }.op("vkCreateImage")?;
        let mut owned = OwnedImage {
            image,
            memory: vk::DeviceMemory::null(),
            dev: dev.clone(),
        };

        let req = unsafe { dev.device.get_image_memory_requirements(image) };
        let type_index = dev
            .find_memory_type(req.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .ok_or_else(|| RenderError::Backend("no device-local memory for depth".into()))?;
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: type_index,
            ..Default::default()
        };
        owned.memory = unsafe { dev.device.allocate_memory(&alloc, None) }.op("vkAllocateMemory")?;
        unsafe { dev.device.bind_image_memory(image, owned.memory, 0) }.op("vkBindImageMemory")?;

        let view = ImageView::new(dev, image, format, vk::ImageAspectFlags::DEPTH)?;
        Ok(Self {
            view,
            _image: owned,
        })
    }

    pub fn view(&self) -> &ImageView {
        &self.view
    }
}

/// Buffer with its own bound allocation.
pub struct Buffer {
    pub(crate) raw: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    dev: Arc<DeviceShared>,
}

impl Buffer {
    pub(crate) fn new(
        dev: &Arc<DeviceShared>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> RenderResult<Self> {
        let ci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let raw = unsafe { dev.device.create_buffer(&ci, None) }.op("vkCreateBuffer")?;
        let mut buffer = Self {
            raw,
            memory: vk::DeviceMemory::null(),
            size,
            dev: dev.clone(),
        };

        let req = unsafe { dev.device.get_buffer_memory_requirements(raw) };
        let type_index = dev
            .find_memory_type(req.memory_type_bits, props)
            .ok_or_else(|| RenderError::Backend(format!("no memory type with {props:?}")))?;
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: type_index,
            ..Default::default()
        };
        buffer.memory =
            unsafe { dev.device.allocate_memory(&alloc, None) }.op("vkAllocateMemory")?;
        unsafe { dev.device.bind_buffer_memory(raw, buffer.memory, 0) }
            .op("vkBindBufferMemory")?;
        Ok(buffer)
    }

    /// Copy `bytes` to `offset` in a host-visible, host-coherent buffer.
    pub(crate) fn write_at(&self, offset: vk::DeviceSize, bytes: &[u8]) -> RenderResult<()> {
        let len = bytes.len() as vk::DeviceSize;
        assert!(offset + len <= self.size, "write past buffer end");
        unsafe {
            let ptr = self
                .dev
                .device
                .map_memory(self.memory, offset, len, vk::MemoryMapFlags::empty())
                .op("vkMapMemory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.dev.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    pub(crate) fn write(&self, bytes: &[u8]) -> RenderResult<()> {
        self.write_at(0, bytes)
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.dev.device.destroy_buffer(self.raw, None);
            if self.memory != vk::DeviceMemory::null() {
                self.dev.device.free_memory(self.memory, None);
            }
        }
    }
}
