//! Synchronization primitives.

use crate::error::Result;
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    // SAFETY: device is valid per the caller contract
    let semaphore = unsafe { device.create_semaphore(&create_info, None)? };
    Ok(semaphore)
}

/// Create a fence, optionally already signaled.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    // SAFETY: device is valid per the caller contract
    let fence = unsafe { device.create_fence(&create_info, None)? };
    Ok(fence)
}

/// Block until a fence is signaled.
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_for_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    // SAFETY: handles are valid per the caller contract
    unsafe { device.wait_for_fences(&[fence], true, u64::MAX)? };
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid and the fence not pending.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    // SAFETY: handles are valid per the caller contract
    unsafe { device.reset_fences(&[fence])? };
    Ok(())
}

/// Per-slot synchronization: acquire semaphore and in-flight fence.
///
/// Render-finished semaphores are indexed by swapchain image instead and
/// live with the swapchain.
pub struct FrameSync {
    /// Signaled when the acquired image is ready to be rendered to
    pub image_available: vk::Semaphore,
    /// Signaled when the slot's last submission completes
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create the slot's objects; the fence starts signaled so the first wait passes.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        // SAFETY: forwarded caller contract
        unsafe {
            Ok(Self {
                image_available: create_semaphore(device)?,
                in_flight: create_fence(device, true)?,
            })
        }
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        // SAFETY: caller guarantees the objects are idle
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}
