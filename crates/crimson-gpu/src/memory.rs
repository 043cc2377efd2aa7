//! GPU memory management.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use ash::prelude::VkResult;
use gpu_allocator::MemoryLocation;
use std::ops::Range;
use std::sync::Arc;

/// Index of the first memory type allowed by `type_filter` that has every
/// `required` property flag.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(i, memory_type)| {
            type_filter & (1 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
        .ok_or(GpuError::NoMatchingMemoryType {
            type_filter,
            properties: required,
        })
}

/// Allocator location matching requested memory properties.
pub fn memory_location(properties: vk::MemoryPropertyFlags) -> MemoryLocation {
    if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// Byte range of a `len`-byte write at `offset` into `capacity` bytes.
fn checked_write_range(capacity: u64, offset: u64, len: usize) -> Result<Range<usize>> {
    let end = offset
        .checked_add(len as u64)
        .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
    if end > capacity {
        return Err(GpuError::InvalidState(format!(
            "Write of {len} bytes at {offset} exceeds buffer size {capacity}"
        )));
    }
    Ok(offset as usize..end as usize)
}

/// Copy `data` into mapped memory at `offset`, rejecting out-of-range writes.
pub fn copy_to_mapped(mapped: &mut [u8], offset: u64, data: &[u8]) -> Result<()> {
    let range = checked_write_range(mapped.len() as u64, offset, data.len())?;
    mapped[range].copy_from_slice(data);
    Ok(())
}

/// Surface a failed memory bind after running `release` on the unbound resource.
fn bind_or_release(bound: VkResult<()>, release: impl FnOnce()) -> Result<()> {
    bound.map_err(|e| {
        release();
        GpuError::from(e)
    })
}

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        // SAFETY: handles are valid per the caller contract
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
            memory_properties,
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
    }

    /// Return an allocation that never got bound.
    fn release(&mut self, allocation: Allocation, name: &str) {
        match self.inner() {
            Ok(allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    tracing::error!("Failed to free allocation '{name}': {e}");
                }
            }
            Err(e) => tracing::error!("Leaking allocation '{name}': {e}"),
        }
    }

    /// Fail with a descriptive error when no memory type can back `requirements`.
    ///
    /// This only validates: gpu-allocator picks the actual memory type from
    /// the [`MemoryLocation`] derived from `properties`.
    fn check_memory_type(
        &self,
        requirements: &vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<()> {
        find_memory_type(
            &self.memory_properties,
            requirements.memory_type_bits,
            properties,
        )
        .map(|_| ())
        .inspect_err(|e| tracing::error!("No memory type for '{name}': {e}"))
    }

    /// Create a buffer backed by memory with the given properties.
    ///
    /// Host-visible buffers stay persistently mapped.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: device is valid while the allocator lives
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        // SAFETY: buffer was just created
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        if let Err(e) = self.check_memory_type(&requirements, properties, name) {
            // SAFETY: buffer is unbound and unused
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(e);
        }

        let allocation = match self.inner()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: memory_location(properties),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: buffer is unbound and unused
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(GpuError::AllocationFailed(e.to_string()));
            }
        };

        // SAFETY: allocation satisfies the buffer's requirements
        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        let mut allocation = Some(allocation);
        bind_or_release(bound, || {
            if let Some(allocation) = allocation.take() {
                self.release(allocation, name);
            }
            // SAFETY: buffer has no bound memory and was never used
            unsafe { self.device.destroy_buffer(buffer, None) };
        })?;

        Ok(GpuBuffer {
            buffer,
            allocation,
            size,
        })
    }

    /// Free a buffer allocation.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.inner()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }

        // SAFETY: caller guarantees the buffer is no longer in use
        unsafe { self.device.destroy_buffer(buffer.buffer, None) };
        buffer.buffer = vk::Buffer::null();

        Ok(())
    }

    /// Allocate an image.
    pub fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<GpuImage> {
        // SAFETY: device is valid while the allocator lives
        let image = unsafe { self.device.create_image(create_info, None)? };
        // SAFETY: image was just created
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        if let Err(e) = self.check_memory_type(&requirements, properties, name) {
            // SAFETY: image is unbound and unused
            unsafe { self.device.destroy_image(image, None) };
            return Err(e);
        }

        let allocation = match self.inner()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: memory_location(properties),
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: image is unbound and unused
                unsafe { self.device.destroy_image(image, None) };
                return Err(GpuError::AllocationFailed(e.to_string()));
            }
        };

        // SAFETY: allocation satisfies the image's requirements
        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        let mut allocation = Some(allocation);
        bind_or_release(bound, || {
            if let Some(allocation) = allocation.take() {
                self.release(allocation, name);
            }
            // SAFETY: image has no bound memory and was never used
            unsafe { self.device.destroy_image(image, None) };
        })?;

        Ok(GpuImage {
            image,
            allocation,
            format: create_info.format,
            extent: create_info.extent,
        })
    }

    /// Free an image allocation.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        if let Some(allocation) = image.allocation.take() {
            self.inner()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }

        // SAFETY: caller guarantees the image is no longer in use
        unsafe { self.device.destroy_image(image.image, None) };
        image.image = vk::Image::null();

        Ok(())
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A GPU buffer with its allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl GpuBuffer {
    /// Pointer to persistently mapped memory, if host-visible.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr() as *mut u8)
    }

    /// Mutable view of the persistently mapped memory, if host-visible.
    pub fn mapped_bytes_mut(&mut self) -> Option<&mut [u8]> {
        self.allocation.as_mut().and_then(Allocation::mapped_slice_mut)
    }

    /// Write data to the start of the buffer (must be host-visible).
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Write raw bytes to the buffer at the given offset (must be host-visible).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        let range = checked_write_range(self.size, offset, data.len())?;

        // SAFETY: range lies within the buffer, and the mapping covers the whole allocation
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(range.start), data.len());
        }

        Ok(())
    }
}

/// A GPU image with its allocation.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    #[test]
    fn finds_first_matching_type() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host, host]);

        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b100, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn filter_excludes_types() {
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert!(matches!(
            err,
            Err(GpuError::NoMatchingMemoryType { type_filter: 0b10, .. })
        ));
    }

    #[test]
    fn types_beyond_count_are_ignored() {
        let mut props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert!(find_memory_type(&props, !0, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }

    #[test]
    fn mapped_copy_lands_at_offset() {
        let mut mapped = [0u8; 8];
        copy_to_mapped(&mut mapped, 2, &[1, 2, 3]).unwrap();
        assert_eq!(mapped, [0, 0, 1, 2, 3, 0, 0, 0]);

        copy_to_mapped(&mut mapped, 5, &[9, 9, 9]).unwrap();
        assert_eq!(&mapped[5..], &[9, 9, 9]);
    }

    #[test]
    fn oversized_and_overflowing_writes_are_rejected() {
        let mut mapped = [7u8; 4];
        assert!(matches!(
            copy_to_mapped(&mut mapped, 2, &[0; 3]),
            Err(GpuError::InvalidState(_))
        ));
        assert!(matches!(
            checked_write_range(16, u64::MAX, 1),
            Err(GpuError::InvalidState(_))
        ));
        assert_eq!(mapped, [7; 4]);
        assert_eq!(checked_write_range(16, 12, 4).unwrap(), 12..16);
    }

    #[test]
    fn failed_bind_releases_resource() {
        let mut released = 0;
        let err = bind_or_release(Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY), || released += 1);
        assert!(matches!(
            err,
            Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert_eq!(released, 1);

        assert!(bind_or_release(Ok(()), || released += 1).is_ok());
        assert_eq!(released, 1);
    }

    #[test]
    fn host_visible_maps_to_upload_heap() {
        assert_eq!(
            memory_location(vk::MemoryPropertyFlags::HOST_VISIBLE),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            memory_location(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            MemoryLocation::GpuOnly
        );
    }
}
