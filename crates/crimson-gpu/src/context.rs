//! GPU context management: instance, device selection, logical device and queues.

use crate::capabilities::{GpuCapabilities, REQUIRED_DEVICE_EXTENSIONS};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, required_instance_extensions, DebugMessenger};
use crate::memory::GpuAllocator;
use crate::surface::SurfaceContext;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::collections::BTreeSet;
use std::ffi::c_char;
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
///
/// Created once at startup and destroyed last, after the device is idle.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) debug_messenger: Option<DebugMessenger>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,

    // Queue families and queues (may alias)
    pub(crate) queue_families: QueueFamilyIndices,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Swapchain extension loader.
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue (may equal the graphics queue).
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Selected queue family indices.
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.queue_families.graphics
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        // SAFETY: the device is alive for as long as self
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        // SAFETY: every resource created from this context has been destroyed by its owner
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            if let Some(messenger) = self.debug_messenger.take() {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Crimson".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build a context able to present to `window`, returning the window's surface too.
    pub fn build_for_window<W>(self, window: &W) -> Result<(GpuContext, SurfaceContext)>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();

        let (entry, instance, debug_messenger) = self.create_instance(Some(display))?;

        // SAFETY: instance was created with the window's surface extensions
        let surface = unsafe { SurfaceContext::from_window(&entry, &instance, window)? };

        let context = Self::create_context(entry, instance, debug_messenger, Some(&surface))?;
        Ok((context, surface))
    }

    /// Build a context without presentation support.
    pub fn build(self) -> Result<GpuContext> {
        let (entry, instance, debug_messenger) = self.create_instance(None)?;
        Self::create_context(entry, instance, debug_messenger, None)
    }

    fn create_instance(
        &self,
        display: Option<RawDisplayHandle>,
    ) -> Result<(ash::Entry, ash::Instance, Option<DebugMessenger>)> {
        // SAFETY: loading the system Vulkan library
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let extensions: Vec<*const c_char> =
            required_instance_extensions(display, self.enable_validation)?;

        // SAFETY: extension names are static C strings
        let instance = unsafe {
            create_instance(&entry, &self.app_name, &extensions, self.enable_validation)?
        };

        let debug_messenger = if self.enable_validation {
            // SAFETY: validation implies the debug utils extension is enabled
            Some(unsafe { DebugMessenger::new(&entry, &instance)? })
        } else {
            None
        };

        Ok((entry, instance, debug_messenger))
    }

    fn create_context(
        entry: ash::Entry,
        instance: ash::Instance,
        debug_messenger: Option<DebugMessenger>,
        surface: Option<&SurfaceContext>,
    ) -> Result<GpuContext> {
        // SAFETY: instance is valid; surface belongs to it
        let (physical_device, capabilities, queue_families) =
            unsafe { select_physical_device(&instance, surface)? };

        capabilities.log_details();

        // SAFETY: physical device was enumerated from this instance
        let (device, graphics_queue, present_queue) =
            unsafe { create_device(&instance, physical_device, queue_families)? };
        let device = Arc::new(device);

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        // SAFETY: all handles are valid and owned by the context being built
        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device)? };

        Ok(GpuContext {
            entry,
            instance,
            debug_messenger,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            swapchain_loader,
            queue_families,
            graphics_queue,
            present_queue,
        })
    }
}

/// Queue family indices chosen for the logical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Distinct family indices, one queue create info each.
    pub fn unique(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = [self.graphics, self.present].into_iter().collect();
        set.into_iter().collect()
    }
}

/// Pick graphics and present families from `(flags, can_present)` per family.
///
/// A single family doing both wins; otherwise the first graphics family is
/// paired with the first present-capable family.
pub fn select_queue_families(families: &[(vk::QueueFlags, bool)]) -> Option<QueueFamilyIndices> {
    let is_graphics = |flags: &vk::QueueFlags| flags.contains(vk::QueueFlags::GRAPHICS);

    if let Some(both) = families
        .iter()
        .position(|(flags, present)| is_graphics(flags) && *present)
    {
        let both = both as u32;
        return Some(QueueFamilyIndices {
            graphics: both,
            present: both,
        });
    }

    let graphics = families.iter().position(|(flags, _)| is_graphics(flags))?;
    let present = families.iter().position(|(_, present)| *present)?;

    Some(QueueFamilyIndices {
        graphics: graphics as u32,
        present: present as u32,
    })
}

/// Select the first physical device that satisfies every requirement.
///
/// # Safety
/// The instance must be valid and the surface, when given, must belong to it.
unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<&SurfaceContext>,
) -> Result<(vk::PhysicalDevice, GpuCapabilities, QueueFamilyIndices)> {
    // SAFETY: instance is valid
    let devices = unsafe { instance.enumerate_physical_devices()? };

    for device in devices {
        // SAFETY: device comes from this instance
        let capabilities = unsafe { GpuCapabilities::query(instance, device) };

        let missing = capabilities.missing_requirements();
        if !missing.is_empty() {
            tracing::debug!(
                "Skipping {}: missing {}",
                capabilities.device_name,
                missing.join(", ")
            );
            continue;
        }

        // SAFETY: device comes from this instance
        let family_props = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let mut families = Vec::with_capacity(family_props.len());
        for (index, props) in family_props.iter().enumerate() {
            let present = match surface {
                // SAFETY: surface belongs to this instance
                Some(surface) => unsafe { surface.supports_present(device, index as u32)? },
                None => props.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            };
            families.push((props.queue_flags, present));
        }

        match select_queue_families(&families) {
            Some(queue_families) => return Ok((device, capabilities, queue_families)),
            None => tracing::debug!(
                "Skipping {}: no graphics/present queue family",
                capabilities.device_name
            ),
        }
    }

    tracing::error!("Failed to find a suitable GPU");
    Err(GpuError::NoSuitableDevice)
}

/// Create the logical device and retrieve queues.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let mut extended_dynamic_state =
        vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::default().extended_dynamic_state(true);
    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);
    let mut vulkan_1_1_features =
        vk::PhysicalDeviceVulkan11Features::default().shader_draw_parameters(true);
    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_1_features)
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut extended_dynamic_state);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    // SAFETY: create info and its chain outlive the call
    let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
        .map_err(|e| {
            tracing::error!("Failed to create logical device: {e}");
            GpuError::from(e)
        })?;

    // SAFETY: both families were requested with one queue each
    let (graphics_queue, present_queue) = unsafe {
        (
            device.get_device_queue(queue_families.graphics, 0),
            device.get_device_queue(queue_families.present, 0),
        )
    };

    Ok((device, graphics_queue, present_queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPHICS: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
    const COMPUTE: vk::QueueFlags = vk::QueueFlags::COMPUTE;

    #[test]
    fn prefers_family_doing_both() {
        let families = [(GRAPHICS, false), (COMPUTE, true), (GRAPHICS, true)];
        let selected = select_queue_families(&families).unwrap();
        assert_eq!(selected.graphics, 2);
        assert_eq!(selected.present, 2);
        assert_eq!(selected.unique(), vec![2]);
    }

    #[test]
    fn falls_back_to_separate_families() {
        let families = [(COMPUTE, false), (GRAPHICS | COMPUTE, false), (COMPUTE, true)];
        let selected = select_queue_families(&families).unwrap();
        assert_eq!(selected.graphics, 1);
        assert_eq!(selected.present, 2);
        assert_eq!(selected.unique(), vec![1, 2]);
    }

    #[test]
    fn no_graphics_family_is_rejected() {
        assert!(select_queue_families(&[(COMPUTE, true)]).is_none());
        assert!(select_queue_families(&[(GRAPHICS, false)]).is_none());
        assert!(select_queue_families(&[]).is_none());
    }
}
