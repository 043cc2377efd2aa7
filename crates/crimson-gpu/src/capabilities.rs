//! GPU capability detection and device requirement checks.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// Device extensions the renderer cannot run without.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 4] = [
    ash::khr::swapchain::NAME,
    ash::khr::spirv_1_4::NAME,
    ash::khr::synchronization2::NAME,
    ash::khr::create_renderpass2::NAME,
];

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Feature bits the renderer depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSupport {
    pub dynamic_rendering: bool,
    pub synchronization2: bool,
    pub extended_dynamic_state: bool,
    pub sampler_anisotropy: bool,
}

/// One memory heap as reported by the device.
#[derive(Debug, Clone, Copy)]
pub struct MemoryHeapInfo {
    pub size_mb: f32,
    pub device_local: bool,
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Discrete, integrated, virtual...
    pub device_type: vk::PhysicalDeviceType,
    pub vendor_id: u32,
    pub device_id: u32,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,
    pub max_image_dimension_2d: u32,
    /// Upper bound for sampler anisotropy.
    pub max_sampler_anisotropy: f32,
    pub memory_heaps: Vec<MemoryHeapInfo>,
    pub features: FeatureSupport,
    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        // SAFETY: handles are valid per the caller contract
        let (properties, memory_properties, extensions) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_memory_properties(physical_device),
                instance
                    .enumerate_device_extension_properties(physical_device)
                    .unwrap_or_default(),
            )
        };

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                ext.extension_name_as_c_str()
                    .ok()
                    .and_then(|name| name.to_str().ok())
                    .map(String::from)
            })
            .collect();

        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let memory_heaps = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .map(|heap| MemoryHeapInfo {
                size_mb: heap.size as f32 / (1024.0 * 1024.0),
                device_local: heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
            })
            .collect();

        let mut vulkan_1_3 = vk::PhysicalDeviceVulkan13Features::default();
        let mut dynamic_state = vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::default();
        let sampler_anisotropy = {
            let mut features2 = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut vulkan_1_3)
                .push_next(&mut dynamic_state);
            // SAFETY: handles are valid and the chain outlives the call
            unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
            features2.features.sampler_anisotropy == vk::TRUE
        };

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            vendor_id: properties.vendor_id,
            device_id: properties.device_id,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
            memory_heaps,
            features: FeatureSupport {
                dynamic_rendering: vulkan_1_3.dynamic_rendering == vk::TRUE,
                synchronization2: vulkan_1_3.synchronization2 == vk::TRUE,
                extended_dynamic_state: dynamic_state.extended_dynamic_state == vk::TRUE,
                sampler_anisotropy,
            },
            available_extensions,
        }
    }

    /// List every unmet requirement; empty when the device qualifies.
    pub fn missing_requirements(&self) -> Vec<String> {
        let mut missing = Vec::new();

        let major = vk::api_version_major(self.api_version);
        let minor = vk::api_version_minor(self.api_version);
        if (major, minor) < (1, 3) {
            missing.push(format!("Vulkan 1.3 (device reports {major}.{minor})"));
        }

        for ext in REQUIRED_DEVICE_EXTENSIONS {
            let name = ext.to_string_lossy();
            if !self.available_extensions.contains(name.as_ref()) {
                missing.push(name.into_owned());
            }
        }

        let features = &self.features;
        for (supported, name) in [
            (features.dynamic_rendering, "dynamicRendering"),
            (features.synchronization2, "synchronization2"),
            (features.extended_dynamic_state, "extendedDynamicState"),
            (features.sampler_anisotropy, "samplerAnisotropy"),
        ] {
            if !supported {
                missing.push(name.to_string());
            }
        }

        missing
    }

    /// Check if the GPU meets minimum requirements for the renderer.
    pub fn meets_requirements(&self) -> bool {
        self.missing_requirements().is_empty()
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        let vram_mb: f32 = self
            .memory_heaps
            .iter()
            .filter(|heap| heap.device_local)
            .map(|heap| heap.size_mb)
            .sum();
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {:.0} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            vram_mb,
        )
    }

    /// Log the selected device in detail.
    pub fn log_details(&self) {
        tracing::info!("Selected physical device: {}", self.device_name);
        tracing::info!(
            "  - API version: {}.{}.{}",
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version)
        );
        tracing::info!("  - Type: {:?}", self.device_type);
        tracing::info!("  - Vendor ID: {:#x}", self.vendor_id);
        tracing::info!("  - Device ID: {:#x}", self.device_id);
        tracing::info!(
            "  - Max Texture2D size: {0}x{0}",
            self.max_image_dimension_2d
        );
        tracing::info!("Memory heaps ({} total):", self.memory_heaps.len());
        for (i, heap) in self.memory_heaps.iter().enumerate() {
            let local = if heap.device_local {
                " (device local)"
            } else {
                ""
            };
            tracing::info!("  - Heap {i}: {:.2} MB{local}", heap.size_mb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capable_device() -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Amd,
            device_name: "Test GPU".to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            vendor_id: 0x1002,
            device_id: 0x73bf,
            api_version: vk::make_api_version(0, 1, 3, 250),
            driver_version: 1,
            max_image_dimension_2d: 16384,
            max_sampler_anisotropy: 16.0,
            memory_heaps: vec![MemoryHeapInfo {
                size_mb: 8192.0,
                device_local: true,
            }],
            features: FeatureSupport {
                dynamic_rendering: true,
                synchronization2: true,
                extended_dynamic_state: true,
                sampler_anisotropy: true,
            },
            available_extensions: REQUIRED_DEVICE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string_lossy().into_owned())
                .collect(),
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn capable_device_meets_requirements() {
        assert!(capable_device().meets_requirements());
    }

    #[test]
    fn old_api_version_is_rejected() {
        let mut caps = capable_device();
        caps.api_version = vk::make_api_version(0, 1, 2, 0);
        let missing = caps.missing_requirements();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].starts_with("Vulkan 1.3"));
    }

    #[test]
    fn missing_extension_and_feature_are_reported() {
        let mut caps = capable_device();
        caps.available_extensions.remove("VK_KHR_swapchain");
        caps.features.sampler_anisotropy = false;

        let missing = caps.missing_requirements();
        assert!(missing.contains(&"VK_KHR_swapchain".to_string()));
        assert!(missing.contains(&"samplerAnisotropy".to_string()));
        assert!(!caps.meets_requirements());
    }
}
