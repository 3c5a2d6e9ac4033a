// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ember_render::error::{RenderResult, VkResultExt};
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, info, warn};

use crate::debug::DebugMessenger;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Debug)]
pub struct ContextOptions {
    pub app_name: String,
    /// Enable the Khronos validation layer and route its messages to
    /// `tracing`. Silently skipped when the layer is not installed.
    pub validation: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            app_name: "ember".into(),
            validation: cfg!(debug_assertions),
        }
    }
}

/// Instance-level objects. Destroyed last, after every device.
pub(crate) struct InstanceShared {
    pub(crate) entry: Entry,
    pub(crate) instance: Instance,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) debug: Option<DebugMessenger>,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        // messenger goes first, it reports on the destruction below otherwise
        self.debug = None;
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        debug!("vk instance destroyed");
    }
}

/// Logical device plus everything the RAII handles need to free themselves.
pub(crate) struct DeviceShared {
    pub(crate) device: ash::Device,
    pub(crate) swapchain_loader: swapchain::Device,
    pub(crate) phys: vk::PhysicalDevice,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) min_uniform_alignment: vk::DeviceSize,

    pub(crate) graphics_family: u32,
    pub(crate) present_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) command_pool: vk::CommandPool,

    pub(crate) instance: Arc<InstanceShared>,
}

impl DeviceShared {
    pub(crate) fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        let mem = &self.memory_properties;
        (0..mem.memory_type_count).find(|&i| {
            (type_bits & (1 << i)) != 0
                && mem.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
    }

    /// Record with `record`, submit to the graphics queue and wait for the
    /// queue to drain. For uploads outside the frame loop.
    pub(crate) fn submit_one_shot(
        &self,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> RenderResult<()> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmds = unsafe { self.device.allocate_command_buffers(&info) }
            .op("vkAllocateCommandBuffers")?;
        let cmd = cmds[0];

        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        let result = unsafe {
            self.device
                .begin_command_buffer(cmd, &begin)
                .op("vkBeginCommandBuffer")
                .and_then(|()| {
                    record(&self.device, cmd);
                    self.device.end_command_buffer(cmd).op("vkEndCommandBuffer")
                })
                .and_then(|()| {
                    self.device
                        .queue_submit(
                            self.graphics_queue,
                            std::slice::from_ref(&submit),
                            vk::Fence::null(),
                        )
                        .op("vkQueueSubmit")
                })
                .and_then(|()| {
                    self.device
                        .queue_wait_idle(self.graphics_queue)
                        .op("vkQueueWaitIdle")
                })
        };
        unsafe { self.device.free_command_buffers(self.command_pool, &cmds) };
        result
    }

    pub(crate) fn families(&self) -> Vec<u32> {
        if self.graphics_family == self.present_family {
            vec![self.graphics_family]
        } else {
            vec![self.graphics_family, self.present_family]
        }
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
        debug!("vk device destroyed");
    }
}

/// Queue families the engine needs. They may be the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

/// Pick a graphics family and a present family, preferring one family that
/// does both.
pub(crate) fn choose_queue_families(
    flags: &[vk::QueueFlags],
    can_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilies> {
    let graphics: Vec<u32> = flags
        .iter()
        .enumerate()
        .filter(|(_, f)| f.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i as u32)
        .collect();

    if let Some(&both) = graphics.iter().find(|&&i| can_present(i)) {
        return Some(QueueFamilies {
            graphics: both,
            present: both,
        });
    }
    let present = (0..flags.len() as u32).find(|&i| can_present(i))?;
    Some(QueueFamilies {
        graphics: *graphics.first()?,
        present,
    })
}

/// The Vulkan device context: instance, surface, logical device, queues and
/// the command pool the frame lifecycle allocates from.
pub struct VkContext {
    pub(crate) shared: Arc<DeviceShared>,
}

impl VkContext {
    pub fn new<W>(window: &W, options: &ContextOptions) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let dh = window
            .display_handle()
            .map_err(|e| anyhow!("display handle: {e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("window handle: {e}"))?
            .as_raw();

        let entry = Entry::linked();
        let validation = options.validation && has_validation_layer(&entry);
        if options.validation && !validation {
            warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }

        let instance = unsafe { create_instance(&entry, dh, &options.app_name, validation) }
            .context("create_instance")?;
        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) }
        {
            Ok(s) => s,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e).context("ash_window::create_surface");
            }
        };

        // from here the instance cleans up after itself on any early return
        let mut inst = InstanceShared {
            entry,
            instance,
            surface_loader,
            surface,
            debug: None,
        };
        if validation {
            let loader = debug_utils::Instance::new(&inst.entry, &inst.instance);
            inst.debug = Some(DebugMessenger::new(loader).context("create debug messenger")?);
        }
        let inst = Arc::new(inst);

        let (phys, families) = unsafe { pick_physical_device(&inst) }?;
        let shared = unsafe { create_device(inst, phys, families) }.context("create_device")?;

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.shared.device
    }
}

fn has_validation_layer(entry: &Entry) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str() == Ok(VALIDATION_LAYER))
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    app_name: &str,
    validation: bool,
) -> Result<Instance> {
    let app = std::ffi::CString::new(app_name).context("app name contains NUL")?;

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: c"ember".as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    Ok(unsafe { entry.create_instance(&create_info, None) }?)
}

unsafe fn supports_swapchain(instance: &Instance, phys: vk::PhysicalDevice) -> bool {
    unsafe { instance.enumerate_device_extension_properties(phys) }
        .unwrap_or_default()
        .iter()
        .any(|e| e.extension_name_as_c_str() == Ok(swapchain::NAME))
}

unsafe fn pick_physical_device(inst: &InstanceShared) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let instance = &inst.instance;
    let mut best: Option<(vk::PhysicalDevice, QueueFamilies, bool)> = None;

    for phys in unsafe { instance.enumerate_physical_devices() }? {
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let flags: Vec<vk::QueueFlags> =
            unsafe { instance.get_physical_device_queue_family_properties(phys) }
                .iter()
                .map(|q| q.queue_flags)
                .collect();
        let can_present = |i: u32| unsafe {
            inst.surface_loader
                .get_physical_device_surface_support(phys, i, inst.surface)
                .unwrap_or(false)
        };
        let Some(families) = choose_queue_families(&flags, can_present) else {
            debug!("skipping {name}: no graphics/present queues");
            continue;
        };
        if !unsafe { supports_swapchain(instance, phys) } {
            debug!("skipping {name}: no VK_KHR_swapchain");
            continue;
        }
        let formats = unsafe {
            inst.surface_loader
                .get_physical_device_surface_formats(phys, inst.surface)
        }
        .unwrap_or_default();
        if formats.is_empty() {
            debug!("skipping {name}: surface has no formats");
            continue;
        }

        let discrete = props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
        let better = match best {
            None => true,
            Some((_, _, was_discrete)) => discrete && !was_discrete,
        };
        if better {
            best = Some((phys, families, discrete));
        }
    }

    let (phys, families, _) = best.ok_or_else(|| anyhow!("no suitable physical device"))?;
    let props = unsafe { instance.get_physical_device_properties(phys) };
    info!(
        "vk device: {} (graphics family {}, present family {})",
        props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        families.graphics,
        families.present
    );
    Ok((phys, families))
}

unsafe fn create_device(
    inst: Arc<InstanceShared>,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<DeviceShared> {
    let priorities = [1.0_f32];
    let mut unique = vec![families.graphics];
    if families.present != families.graphics {
        unique.push(families.present);
    }
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique
        .iter()
        .map(|&family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    let instance = &inst.instance;
    let device = unsafe { instance.create_device(phys, &dinfo, None) }?;
    let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
    let present_queue = unsafe { device.get_device_queue(families.present, 0) };

    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: families.graphics,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
            | vk::CommandPoolCreateFlags::TRANSIENT,
        ..Default::default()
    };
    let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
        Ok(p) => p,
        Err(e) => {
            unsafe { device.destroy_device(None) };
            return Err(e).context("create_command_pool");
        }
    };

    let swapchain_loader = swapchain::Device::new(instance, &device);
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(phys) };
    let limits = unsafe { instance.get_physical_device_properties(phys) }.limits;

    Ok(DeviceShared {
        device,
        swapchain_loader,
        phys,
        memory_properties,
        min_uniform_alignment: limits.min_uniform_buffer_offset_alignment,
        graphics_family: families.graphics,
        present_family: families.present,
        graphics_queue,
        present_queue,
        command_pool,
        instance: inst,
    })
}
