//! Uniform buffer layouts and per-frame uniform storage.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use crimson_core::constants::MAX_BONES;
use crimson_gpu::memory::copy_to_mapped;
use crimson_gpu::{GpuBuffer, GpuContext, GpuError};
use glam::Mat4;
use std::marker::PhantomData;

use crate::error::Result;

/// Camera matrices (set 0, binding 0).
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraData {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

/// Object transform (set 0, binding 2).
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectData {
    pub model: [[f32; 4]; 4],
}

impl ObjectData {
    pub fn new(model: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
        }
    }
}

/// Skinning palette (set 0, binding 3).
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BoneData {
    pub bones: [[[f32; 4]; 4]; MAX_BONES],
}

impl Default for BoneData {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl BoneData {
    /// Copy up to `MAX_BONES` transforms; remaining slots stay zero.
    pub fn from_transforms(transforms: &[Mat4]) -> Self {
        let mut data = Self::zeroed();
        for (slot, transform) in data.bones.iter_mut().zip(transforms) {
            *slot = transform.to_cols_array_2d();
        }
        data
    }
}

/// Copy `data` to the start of a slot's mapped memory.
pub fn write_uniform<T: Pod>(mapped: &mut [u8], data: &T) -> Result<()> {
    copy_to_mapped(mapped, 0, bytemuck::bytes_of(data))?;
    Ok(())
}

/// One persistently mapped, host-coherent uniform buffer per frame slot.
///
/// Slot `i` is only written after slot `i`'s fence has been waited on.
pub struct UniformBuffers<T: Pod> {
    buffers: Vec<GpuBuffer>,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBuffers<T> {
    /// Allocate `frames` buffers of `size_of::<T>()` bytes.
    pub fn new(ctx: &GpuContext, frames: usize, name: &str) -> Result<Self> {
        let mut buffers = Vec::with_capacity(frames);
        for slot in 0..frames {
            let buffer = ctx.allocator().lock().create_buffer(
                Self::size(),
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                &format!("{name}_ubo_{slot}"),
            );
            match buffer {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    let mut allocator = ctx.allocator().lock();
                    for mut buffer in buffers {
                        allocator.free_buffer(&mut buffer)?;
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(Self {
            buffers,
            _marker: PhantomData,
        })
    }

    /// Byte size of one slot.
    pub const fn size() -> u64 {
        std::mem::size_of::<T>() as u64
    }

    /// Copy `data` into the slot's mapped memory.
    pub fn update(&mut self, data: &T, slot: usize) -> Result<()> {
        let mapped = self
            .buffers
            .get_mut(slot)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("Uniform slot {slot}")))?
            .mapped_bytes_mut()
            .ok_or_else(|| GpuError::InvalidState(format!("Uniform slot {slot} is not mapped")))?;
        write_uniform(mapped, data)
    }

    /// Raw buffer handle of a slot for descriptor writes.
    pub fn handle(&self, slot: usize) -> Option<vk::Buffer> {
        self.buffers.get(slot).map(|b| b.buffer)
    }

    /// Release every slot.
    pub fn destroy(&mut self, ctx: &GpuContext) -> Result<()> {
        let mut allocator = ctx.allocator().lock();
        for buffer in &mut self.buffers {
            allocator.free_buffer(buffer)?;
        }
        self.buffers.clear();
        Ok(())
    }
}
