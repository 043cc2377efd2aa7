//! GPU-resident model: meshes, materials, textures and animation state.

use ash::vk;
use crimson_gpu::{CommandPool, GpuContext, PipelineConfig, RenderTargets};
use glam::{Mat4, Vec3};
use hashbrown::HashMap;
use std::path::Path;
use tracing::{error, info, warn};

use crate::animation::Animator;
use crate::descriptors::DescriptorContext;
use crate::error::{RenderError, Result};
use crate::material::{Material, PipelineCache};
use crate::mesh::Mesh;
use crate::model_data::{prepare_scene, PreparedModel, TextureSource};
use crate::scene::SceneImporter;
use crate::texture::Texture;
use crate::vertex::Vertex;

/// Load lifecycle of a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelState {
    #[default]
    Unloaded,
    Loaded,
    Failed,
}

/// Borrowed device state needed to build a model's GPU resources.
pub struct ModelLoadContext<'a> {
    pub ctx: &'a GpuContext,
    pub pool: &'a CommandPool,
    pub descriptors: &'a DescriptorContext,
    pub targets: RenderTargets,
    pub pipeline: PipelineConfig,
}

/// A loaded scene ready to draw.
#[derive(Default)]
pub struct Model {
    state: ModelState,
    meshes: Vec<Mesh>,
    /// Material index per mesh.
    mesh_materials: Vec<usize>,
    materials: Vec<Material>,
    textures: Vec<Texture>,
    pipelines: PipelineCache,
    animator: Option<Animator>,
    normalization: Mat4,
    base_transform: Mat4,
}

impl Model {
    pub fn new() -> Self {
        Self {
            normalization: Mat4::IDENTITY,
            base_transform: Mat4::IDENTITY,
            ..Default::default()
        }
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ModelState::Loaded
    }

    /// Import `path` and upload everything it contains.
    ///
    /// Any earlier contents are released first. On failure the model is left
    /// empty in the `Failed` state.
    pub fn load(
        &mut self,
        load: &ModelLoadContext<'_>,
        importer: &dyn SceneImporter,
        path: &Path,
    ) -> Result<()> {
        self.release(load.ctx, load.descriptors)?;

        let result = importer
            .import(path)
            .and_then(|scene| {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                prepare_scene(scene, dir)
            })
            .and_then(|prepared| self.upload(load, prepared));

        match result {
            Ok(()) => {
                self.state = ModelState::Loaded;
                info!("Model loaded from: {}", path.display());
                Ok(())
            }
            Err(e) => {
                error!("Failed to load model {}: {e}", path.display());
                self.release(load.ctx, load.descriptors)?;
                self.state = ModelState::Failed;
                Err(e)
            }
        }
    }

    fn upload(&mut self, load: &ModelLoadContext<'_>, prepared: PreparedModel) -> Result<()> {
        let PreparedModel {
            meshes,
            materials,
            normalization,
            animator,
            ..
        } = prepared;

        let device = load.ctx.device();
        let set_layouts = load.descriptors.set_layouts();

        let mut texture_for: HashMap<TextureSource, usize> = HashMap::new();
        for source in &materials {
            let texture = self.texture_index(load, source, &mut texture_for)?;

            // SAFETY: layouts belong to this device
            let pipeline = unsafe {
                self.pipelines.get_or_create(
                    device,
                    &load.pipeline,
                    &Vertex::layout(),
                    &set_layouts,
                    load.targets,
                )?
            };
            // SAFETY: pipeline, pool and texture are owned by this model or outlive it
            let material = unsafe {
                Material::new(
                    device,
                    pipeline,
                    load.descriptors,
                    &self.textures[texture],
                    texture,
                )?
            };
            self.materials.push(material);
        }

        for mesh in &meshes {
            let gpu_mesh = Mesh::new(load.ctx, load.pool, &mesh.vertices, &mesh.indices, &mesh.name)?;
            self.meshes.push(gpu_mesh);
            self.mesh_materials.push(mesh.material);
        }

        self.normalization = normalization;
        self.animator = animator.has_animations().then_some(animator);
        Ok(())
    }

    /// Texture slot for a material source, loading it on first use.
    ///
    /// Unreadable files fall back to the shared placeholder.
    fn texture_index(
        &mut self,
        load: &ModelLoadContext<'_>,
        source: &TextureSource,
        loaded: &mut HashMap<TextureSource, usize>,
    ) -> Result<usize> {
        if let Some(&index) = loaded.get(source) {
            return Ok(index);
        }

        let texture = match source {
            TextureSource::File(path) => match Texture::from_file(load.ctx, load.pool, path) {
                Ok(texture) => Some(texture),
                Err(e) => {
                    warn!("Failed to load texture {}: {e}, using placeholder", path.display());
                    None
                }
            },
            TextureSource::Placeholder => None,
        };

        let index = match texture {
            Some(texture) => {
                self.textures.push(texture);
                self.textures.len() - 1
            }
            None => {
                if let Some(&index) = loaded.get(&TextureSource::Placeholder) {
                    index
                } else {
                    self.textures.push(Texture::placeholder(load.ctx, load.pool)?);
                    let index = self.textures.len() - 1;
                    loaded.insert(TextureSource::Placeholder, index);
                    index
                }
            }
        };

        loaded.insert(source.clone(), index);
        Ok(index)
    }

    /// Record binds and one indexed draw per mesh.
    ///
    /// # Safety
    /// `cmd` must be recording inside a rendering pass with set 0 bound.
    pub unsafe fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        for (mesh, &material) in self.meshes.iter().zip(&self.mesh_materials) {
            let Some(material) = self.materials.get(material) else {
                continue;
            };
            // SAFETY: forwarded caller contract
            unsafe {
                material.bind(device, cmd);
                mesh.bind(device, cmd);
                device.cmd_draw_indexed(cmd, mesh.index_count(), 1, 0, 0, 0);
            }
        }
    }

    /// Index count of every mesh in draw order.
    pub fn index_counts(&self) -> Vec<u32> {
        self.meshes.iter().map(Mesh::index_count).collect()
    }

    /// Layout compatible with set 0 for every material of this model.
    pub fn pipeline_layout(&self) -> Result<vk::PipelineLayout> {
        self.materials
            .first()
            .map(Material::pipeline_layout)
            .ok_or(RenderError::ModelNotLoaded)
    }

    pub fn has_animations(&self) -> bool {
        self.animator.is_some()
    }

    /// Select an animation by index; out-of-range indices are ignored.
    pub fn set_animation(&mut self, index: usize) {
        if let Some(animator) = &mut self.animator {
            if !animator.set_animation(index) {
                warn!(
                    "Animation {index} out of range ({} available)",
                    animator.animation_count()
                );
            }
        }
    }

    /// Advance the current animation by `dt` seconds.
    pub fn update_animation(&mut self, dt: f32) {
        if let Some(animator) = &mut self.animator {
            animator.update(dt);
        }
    }

    /// Final bone matrices; empty for static models.
    pub fn bone_transforms(&self) -> &[Mat4] {
        match &self.animator {
            Some(animator) => animator.bone_transforms(),
            None => &[],
        }
    }

    /// Rotation applied on top of the normalization transform.
    pub fn set_base_rotation(&mut self, degrees: f32, axis: Vec3) {
        self.base_transform = Mat4::from_axis_angle(axis.normalize_or_zero(), degrees.to_radians());
    }

    pub fn normalization_matrix(&self) -> Mat4 {
        self.normalization
    }

    /// Object-to-world transform written to the object uniform.
    pub fn model_matrix(&self) -> Mat4 {
        self.base_transform * self.normalization
    }

    fn release(&mut self, ctx: &GpuContext, descriptors: &DescriptorContext) -> Result<()> {
        let device = ctx.device();
        // SAFETY: callers only release after the GPU has gone idle
        unsafe {
            for material in self.materials.drain(..) {
                material.destroy(device, descriptors)?;
            }
            self.pipelines.destroy(device);
            for mut texture in self.textures.drain(..) {
                texture.destroy(ctx)?;
            }
            for mut mesh in self.meshes.drain(..) {
                mesh.destroy(ctx)?;
            }
        }
        self.mesh_materials.clear();
        self.animator = None;
        self.normalization = Mat4::IDENTITY;
        Ok(())
    }

    /// Free every GPU resource and return to `Unloaded`.
    ///
    /// # Safety
    /// The device must be idle with respect to this model.
    pub unsafe fn destroy(&mut self, ctx: &GpuContext, descriptors: &DescriptorContext) -> Result<()> {
        self.release(ctx, descriptors)?;
        self.state = ModelState::Unloaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn new_model_is_unloaded_and_static() {
        let model = Model::new();
        assert_eq!(model.state(), ModelState::Unloaded);
        assert!(!model.is_loaded());
        assert!(!model.has_animations());
        assert!(model.bone_transforms().is_empty());
        assert!(matches!(model.pipeline_layout(), Err(RenderError::ModelNotLoaded)));
    }

    #[test]
    fn base_rotation_applies_after_normalization() {
        let mut model = Model::new();
        model.normalization = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
        model.set_base_rotation(90.0, Vec3::Y);

        let p = model.model_matrix().transform_point3(Vec3::ZERO);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(p.z, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn animation_calls_are_ignored_without_animator() {
        let mut model = Model::new();
        model.set_animation(3);
        model.update_animation(0.5);
        assert!(model.bone_transforms().is_empty());
    }
}
