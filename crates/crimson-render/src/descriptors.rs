//! The two descriptor set layouts and the shared pool.
//!
//! Set 0 holds per-frame uniforms (camera, object, bones) and is allocated
//! once per frame slot. Set 1 holds a material's texture and is allocated
//! once per material.

use ash::vk;
use crimson_core::constants::{
    BONES_BINDING, CAMERA_BINDING, MAX_MATERIAL_SETS, OBJECT_BINDING, TEXTURE_BINDING,
};
use crimson_gpu::{DescriptorPool, DescriptorSetLayoutBuilder};

use crate::error::Result;

/// Set 0: three vertex-stage uniform buffers.
pub fn per_frame_layout_builder<'a>() -> DescriptorSetLayoutBuilder<'a> {
    DescriptorSetLayoutBuilder::new()
        .uniform_buffer(CAMERA_BINDING, vk::ShaderStageFlags::VERTEX)
        .uniform_buffer(OBJECT_BINDING, vk::ShaderStageFlags::VERTEX)
        .uniform_buffer(BONES_BINDING, vk::ShaderStageFlags::VERTEX)
}

/// Set 1: one fragment-stage combined image sampler.
pub fn per_material_layout_builder<'a>() -> DescriptorSetLayoutBuilder<'a> {
    DescriptorSetLayoutBuilder::new()
        .combined_image_sampler(TEXTURE_BINDING, vk::ShaderStageFlags::FRAGMENT)
}

/// Pool capacity for `frames` per-frame sets plus every material set.
pub fn pool_sizes(frames: usize) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 3 * frames as u32,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: MAX_MATERIAL_SETS,
        },
    ]
}

pub fn max_sets(frames: usize) -> u32 {
    MAX_MATERIAL_SETS + frames as u32
}

/// Layouts and pool shared by the frame orchestrator and every material.
pub struct DescriptorContext {
    pub per_frame_layout: vk::DescriptorSetLayout,
    pub per_material_layout: vk::DescriptorSetLayout,
    pub pool: DescriptorPool,
}

impl DescriptorContext {
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, frames: usize) -> Result<Self> {
        // SAFETY: device is valid per the caller contract
        unsafe {
            let per_frame_layout = per_frame_layout_builder().build(device)?;
            let per_material_layout = match per_material_layout_builder().build(device) {
                Ok(layout) => layout,
                Err(e) => {
                    device.destroy_descriptor_set_layout(per_frame_layout, None);
                    return Err(e.into());
                }
            };
            let pool = match DescriptorPool::new(device, max_sets(frames), &pool_sizes(frames)) {
                Ok(pool) => pool,
                Err(e) => {
                    device.destroy_descriptor_set_layout(per_material_layout, None);
                    device.destroy_descriptor_set_layout(per_frame_layout, None);
                    return Err(e.into());
                }
            };

            Ok(Self {
                per_frame_layout,
                per_material_layout,
                pool,
            })
        }
    }

    /// Layouts in set-index order, as pipeline layouts expect them.
    pub fn set_layouts(&self) -> [vk::DescriptorSetLayout; 2] {
        [self.per_frame_layout, self.per_material_layout]
    }

    /// # Safety
    /// No set from the pool may be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        // SAFETY: caller guarantees the pool and layouts are idle
        unsafe {
            self.pool.destroy(device);
            device.destroy_descriptor_set_layout(self.per_material_layout, None);
            device.destroy_descriptor_set_layout(self.per_frame_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_frame_set_uses_camera_object_bone_bindings() {
        let builder = per_frame_layout_builder();
        let bindings: Vec<u32> = builder.bindings().iter().map(|b| b.binding).collect();
        assert_eq!(bindings, vec![0, 2, 3]);
        assert!(builder
            .bindings()
            .iter()
            .all(|b| b.descriptor_type == vk::DescriptorType::UNIFORM_BUFFER
                && b.stage_flags == vk::ShaderStageFlags::VERTEX));
    }

    #[test]
    fn per_material_set_is_one_sampler() {
        let builder = per_material_layout_builder();
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn pool_covers_frames_and_materials() {
        let sizes = pool_sizes(2);
        assert_eq!(sizes[0].descriptor_count, 6);
        assert_eq!(sizes[1].descriptor_count, MAX_MATERIAL_SETS);
        assert_eq!(max_sets(2), MAX_MATERIAL_SETS + 2);
    }
}
