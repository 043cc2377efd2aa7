//! Materials and the pipeline cache they draw from.

use ash::vk;
use crimson_core::constants::{PER_MATERIAL_SET, TEXTURE_BINDING};
use crimson_gpu::{
    write_combined_image_sampler, GpuError, GraphicsPipeline, PipelineConfig, RenderTargets, VertexLayout,
};
use hashbrown::HashMap;
use tracing::info;

use crate::descriptors::DescriptorContext;
use crate::error::Result;
use crate::texture::Texture;

/// One pipeline per distinct [`PipelineConfig`].
#[derive(Default)]
pub struct PipelineCache {
    pipelines: HashMap<PipelineConfig, GraphicsPipeline>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing pipeline for `config`, building it on first request.
    ///
    /// # Safety
    /// Device and set layouts must be valid.
    pub unsafe fn get_or_create(
        &mut self,
        device: &ash::Device,
        config: &PipelineConfig,
        vertex_layout: &VertexLayout,
        set_layouts: &[vk::DescriptorSetLayout],
        targets: RenderTargets,
    ) -> Result<&GraphicsPipeline> {
        if !self.pipelines.contains_key(config) {
            // SAFETY: forwarded caller contract
            let pipeline =
                unsafe { GraphicsPipeline::new(device, config, vertex_layout, set_layouts, targets)? };
            info!("Created pipeline for {}", config.shader_path.display());
            self.pipelines.insert(config.clone(), pipeline);
        }
        Ok(&self.pipelines[config])
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// # Safety
    /// No command buffer using these pipelines may be pending.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for (_, pipeline) in self.pipelines.drain() {
            // SAFETY: caller guarantees the pipelines are idle
            unsafe { pipeline.destroy(device) };
        }
    }
}

/// Pipeline plus the set-1 descriptor referencing one texture.
///
/// The descriptor is written once here and never updated afterwards.
pub struct Material {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    descriptor_set: vk::DescriptorSet,
    texture: usize,
}

impl Material {
    /// Allocate and write the material's descriptor set.
    ///
    /// `texture_index` identifies `texture` within the owning model.
    ///
    /// # Safety
    /// The pipeline, descriptor context and texture must outlive the material.
    pub unsafe fn new(
        device: &ash::Device,
        pipeline: &GraphicsPipeline,
        descriptors: &DescriptorContext,
        texture: &Texture,
        texture_index: usize,
    ) -> Result<Self> {
        // SAFETY: layouts and pool belong to this device
        let sets = unsafe {
            descriptors
                .pool
                .allocate(device, &[descriptors.per_material_layout])?
        };
        let descriptor_set = sets.first().copied().ok_or_else(|| {
            GpuError::ResourceNotFound("Material descriptor set".to_string())
        })?;

        // SAFETY: the set is fresh and the texture is live
        unsafe {
            write_combined_image_sampler(
                device,
                descriptor_set,
                TEXTURE_BINDING,
                texture.view(),
                texture.sampler(),
            );
        }

        Ok(Self {
            pipeline: pipeline.pipeline,
            layout: pipeline.layout,
            descriptor_set,
            texture: texture_index,
        })
    }

    /// Record the pipeline bind and the set-1 bind.
    ///
    /// # Safety
    /// `cmd` must be recording.
    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        // SAFETY: caller guarantees recording state; handles are live
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                PER_MATERIAL_SET,
                &[self.descriptor_set],
                &[],
            );
        }
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn texture_index(&self) -> usize {
        self.texture
    }

    /// Return the descriptor set to the pool.
    ///
    /// # Safety
    /// The set must not be in use by the GPU.
    pub unsafe fn destroy(&self, device: &ash::Device, descriptors: &DescriptorContext) -> Result<()> {
        // SAFETY: caller guarantees the set is idle
        unsafe { descriptors.pool.free(device, &[self.descriptor_set])? };
        Ok(())
    }
}
