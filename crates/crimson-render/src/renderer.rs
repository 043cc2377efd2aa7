//! Vulkan frame orchestrator.
//!
//! [`Renderer`] owns the swapchain, the depth buffer, one command buffer and
//! synchronization pair per frame slot, the per-frame uniform buffers and the
//! model being shown. Frame ordering is delegated to [`FrameScheduler`]; this
//! module only supplies the device work behind [`FrameBackend`].

use ash::vk;
use crimson_core::constants::{
    BONES_BINDING, CAMERA_BINDING, MAX_FRAMES_IN_FLIGHT, OBJECT_BINDING, PER_FRAME_SET,
};
use crimson_gpu::image::aspect_for_layout;
use crimson_gpu::sync::{reset_fence, wait_for_fence};
use crimson_gpu::{
    record_image_barrier, write_uniform_buffer, CommandPool, DepthBuffer, FrameSync, GpuContext,
    GpuError, PipelineConfig, RenderTargets, SurfaceContext, Swapchain,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::camera::Camera;
use crate::descriptors::DescriptorContext;
use crate::error::Result;
use crate::frame::{AcquireResult, FrameBackend, FrameScheduler, FrameStatus};
use crate::model::{Model, ModelLoadContext};
use crate::scene::SceneImporter;
use crate::ubo::{BoneData, CameraData, ObjectData, UniformBuffers};

/// Renderer configuration.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub frames_in_flight: usize,
    pub vsync: bool,
    pub clear_color: [f32; 4],
    pub camera: Camera,
    pub pipeline: PipelineConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            vsync: false,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            camera: Camera::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force FIFO presentation instead of preferring mailbox.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Use the SPIR-V module at `path` for every material pipeline.
    pub fn with_shader(mut self, path: impl Into<PathBuf>) -> Self {
        self.pipeline.shader_path = path.into();
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_camera(mut self, camera: Camera) -> Self {
        self.camera = camera;
        self
    }
}

/// Everything sized by or rendered into the swapchain.
struct SwapchainTargets {
    swapchain: Swapchain,
    depth: DepthBuffer,
}

/// Per-slot command buffer and synchronization.
struct FrameSlot {
    command_buffer: vk::CommandBuffer,
    sync: FrameSync,
}

/// Resources indexed by frame slot.
struct FrameResources {
    slots: Vec<FrameSlot>,
    frame_sets: Vec<vk::DescriptorSet>,
    camera: UniformBuffers<CameraData>,
    object: UniformBuffers<ObjectData>,
    bones: UniformBuffers<BoneData>,
}

impl FrameResources {
    fn slot(&self, slot: usize) -> Result<&FrameSlot> {
        self.slots
            .get(slot)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("Frame slot {slot}")).into())
    }

    fn frame_set(&self, slot: usize) -> Result<vk::DescriptorSet> {
        self.frame_sets
            .get(slot)
            .copied()
            .ok_or_else(|| GpuError::ResourceNotFound(format!("Per-frame set {slot}")).into())
    }
}

/// Frame orchestrator for a single window.
pub struct Renderer {
    config: RendererConfig,
    command_pool: CommandPool,
    descriptors: DescriptorContext,
    targets: SwapchainTargets,
    frames: FrameResources,
    scheduler: FrameScheduler<vk::Fence>,
    model: Model,
    camera: Camera,
}

impl Renderer {
    /// Create swapchain, depth buffer and every per-slot resource.
    ///
    /// # Safety
    /// `surface` must belong to `ctx` and outlive the renderer.
    pub unsafe fn new(
        ctx: &GpuContext,
        surface: &SurfaceContext,
        framebuffer_size: (u32, u32),
        config: RendererConfig,
    ) -> Result<Self> {
        let device = ctx.device();
        let frames = config.frames_in_flight.max(1);

        // SAFETY: device and surface are valid per the caller contract
        let (command_pool, swapchain, descriptors) = unsafe {
            (
                CommandPool::new(device, ctx.graphics_queue_family())?,
                Swapchain::new(ctx, surface, extent_of(framebuffer_size), config.vsync)?,
                DescriptorContext::new(device, frames)?,
            )
        };
        let depth = DepthBuffer::new(ctx, swapchain.extent)?;

        // SAFETY: pool was created on this device
        let command_buffers = unsafe { command_pool.allocate_command_buffers(device, frames as u32)? };
        let mut slots = Vec::with_capacity(frames);
        for command_buffer in command_buffers {
            // SAFETY: device is valid
            let sync = unsafe { FrameSync::new(device)? };
            slots.push(FrameSlot {
                command_buffer,
                sync,
            });
        }

        let camera_ubo = UniformBuffers::<CameraData>::new(ctx, frames, "camera")?;
        let object_ubo = UniformBuffers::<ObjectData>::new(ctx, frames, "object")?;
        let bone_ubo = UniformBuffers::<BoneData>::new(ctx, frames, "bones")?;

        let layouts = vec![descriptors.per_frame_layout; frames];
        // SAFETY: layouts and pool belong to this device
        let frame_sets = unsafe { descriptors.pool.allocate(device, &layouts)? };
        for (slot, &set) in frame_sets.iter().enumerate() {
            let bindings = [
                (CAMERA_BINDING, camera_ubo.handle(slot), UniformBuffers::<CameraData>::size()),
                (OBJECT_BINDING, object_ubo.handle(slot), UniformBuffers::<ObjectData>::size()),
                (BONES_BINDING, bone_ubo.handle(slot), UniformBuffers::<BoneData>::size()),
            ];
            for (binding, buffer, range) in bindings {
                let buffer = buffer.ok_or_else(|| {
                    GpuError::ResourceNotFound(format!("Uniform buffer for slot {slot}"))
                })?;
                // SAFETY: set and buffer are live and not yet in use
                unsafe { write_uniform_buffer(device, set, binding, buffer, range) };
            }
        }

        let mut camera = config.camera.clone();
        camera.set_viewport(swapchain.extent.width, swapchain.extent.height);

        info!(
            "Renderer ready: {}x{}, {} swapchain images, {} frames in flight",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.image_count(),
            frames
        );

        let scheduler = FrameScheduler::new(frames, swapchain.image_count());

        Ok(Self {
            config,
            command_pool,
            descriptors,
            targets: SwapchainTargets { swapchain, depth },
            frames: FrameResources {
                slots,
                frame_sets,
                camera: camera_ubo,
                object: object_ubo,
                bones: bone_ubo,
            },
            scheduler,
            model: Model::new(),
            camera,
        })
    }

    /// Load a model, replacing the current one.
    ///
    /// The device is drained first so the old model's resources are idle.
    pub fn load_model(
        &mut self,
        ctx: &GpuContext,
        importer: &dyn SceneImporter,
        path: &Path,
    ) -> Result<()> {
        ctx.wait_idle()?;
        let load = ModelLoadContext {
            ctx,
            pool: &self.command_pool,
            descriptors: &self.descriptors,
            targets: RenderTargets {
                color_format: self.targets.swapchain.format,
                depth_format: self.targets.depth.format,
            },
            pipeline: self.config.pipeline.clone(),
        };
        self.model.load(&load, importer, path)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.targets.swapchain.extent
    }

    pub fn frame_count(&self) -> u64 {
        self.scheduler.frame_count()
    }

    /// Rebuild the swapchain before the next frame.
    pub fn request_resize(&mut self) {
        self.scheduler.request_recreate();
    }

    /// Render and present one frame.
    pub fn draw_frame(
        &mut self,
        ctx: &GpuContext,
        surface: &SurfaceContext,
        framebuffer_size: (u32, u32),
        dt: f32,
    ) -> Result<FrameStatus> {
        let mut backend = VulkanFrame {
            ctx,
            surface,
            framebuffer_size,
            vsync: self.config.vsync,
            clear_color: self.config.clear_color,
            targets: &mut self.targets,
            frames: &mut self.frames,
            model: &mut self.model,
            camera: &mut self.camera,
        };
        self.scheduler.draw_frame(&mut backend, dt)
    }

    /// Release every resource in reverse creation order.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, ctx: &GpuContext) -> Result<()> {
        let device = ctx.device();
        // SAFETY: caller guarantees the device is idle
        unsafe {
            self.model.destroy(ctx, &self.descriptors)?;
            self.frames.camera.destroy(ctx)?;
            self.frames.object.destroy(ctx)?;
            self.frames.bones.destroy(ctx)?;
            self.descriptors.destroy(device);
            for slot in self.frames.slots.drain(..) {
                slot.sync.destroy(device);
            }
            self.frames.frame_sets.clear();
            self.command_pool.destroy(device);
            self.targets.depth.destroy(ctx)?;
            self.targets
                .swapchain
                .destroy(device, ctx.swapchain_loader());
        }
        info!("Renderer destroyed");
        Ok(())
    }
}

fn extent_of((width, height): (u32, u32)) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

/// Borrowed view of the renderer driven by the scheduler for one call.
struct VulkanFrame<'a> {
    ctx: &'a GpuContext,
    surface: &'a SurfaceContext,
    framebuffer_size: (u32, u32),
    vsync: bool,
    clear_color: [f32; 4],
    targets: &'a mut SwapchainTargets,
    frames: &'a mut FrameResources,
    model: &'a mut Model,
    camera: &'a mut Camera,
}

impl VulkanFrame<'_> {
    /// # Safety
    /// `cmd` must be reset and the slot's previous submission complete.
    unsafe fn record_commands(&self, cmd: vk::CommandBuffer, slot: usize, image: u32) -> Result<()> {
        let device = self.ctx.device();
        let swapchain = &self.targets.swapchain;
        let depth = &self.targets.depth;
        let extent = swapchain.extent;

        let image_index = image as usize;
        let (Some(&color_image), Some(&color_view)) = (
            swapchain.images.get(image_index),
            swapchain.image_views.get(image_index),
        ) else {
            return Err(GpuError::ResourceNotFound(format!("Swapchain image {image}")).into());
        };
        let frame_set = self.frames.frame_set(slot)?;

        let depth_layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;

        // SAFETY: cmd is in the initial state per the caller contract
        unsafe {
            device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                .map_err(GpuError::from)?;

            record_image_barrier(
                device,
                cmd,
                color_image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageAspectFlags::COLOR,
                None,
            )?;
            record_image_barrier(
                device,
                cmd,
                depth.image.image,
                vk::ImageLayout::UNDEFINED,
                depth_layout,
                aspect_for_layout(depth_layout, depth.format),
                None,
            )?;
        }

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            });
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(depth.view)
            .image_layout(depth_layout)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });

        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment))
            .depth_attachment(&depth_attachment);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        // SAFETY: cmd is recording and every referenced handle is live
        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);

            if let Ok(layout) = self.model.pipeline_layout() {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    PER_FRAME_SET,
                    &[frame_set],
                    &[],
                );
                self.model.draw(device, cmd);
            }

            device.cmd_end_rendering(cmd);

            record_image_barrier(
                device,
                cmd,
                color_image,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
                vk::ImageAspectFlags::COLOR,
                None,
            )?;

            device.end_command_buffer(cmd).map_err(GpuError::from)?;
        }
        Ok(())
    }
}

impl FrameBackend for VulkanFrame<'_> {
    type Fence = vk::Fence;

    fn slot_fence(&self, slot: usize) -> vk::Fence {
        self.frames
            .slots
            .get(slot)
            .map_or_else(vk::Fence::null, |s| s.sync.in_flight)
    }

    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()> {
        // SAFETY: fence belongs to this device
        unsafe { wait_for_fence(self.ctx.device(), fence)? };
        Ok(())
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
        // SAFETY: the scheduler only resets fences it has waited on
        unsafe { reset_fence(self.ctx.device(), fence)? };
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> Result<AcquireResult> {
        let semaphore = self.frames.slot(slot)?.sync.image_available;
        // SAFETY: the slot's fence has been waited, so its semaphore is unsignaled
        let outcome = unsafe {
            self.targets
                .swapchain
                .acquire_next_image(self.ctx.swapchain_loader(), semaphore)?
        };
        Ok(match outcome {
            crimson_gpu::AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => AcquireResult::Image {
                index: image_index,
                suboptimal,
            },
            crimson_gpu::AcquireOutcome::OutOfDate => AcquireResult::OutOfDate,
        })
    }

    fn update(&mut self, slot: usize, dt: f32) -> Result<()> {
        self.model.update_animation(dt);

        let extent = self.targets.swapchain.extent;
        self.camera.set_viewport(extent.width, extent.height);

        self.frames.camera.update(&CameraData::from(&*self.camera), slot)?;
        self.frames
            .object
            .update(&ObjectData::new(self.model.model_matrix()), slot)?;
        self.frames
            .bones
            .update(&BoneData::from_transforms(self.model.bone_transforms()), slot)?;
        Ok(())
    }

    fn record(&mut self, slot: usize, image: u32) -> Result<()> {
        let cmd = self.frames.slot(slot)?.command_buffer;
        // SAFETY: the slot's fence was waited, so cmd is not pending
        unsafe {
            self.ctx
                .device()
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(GpuError::from)?;
            self.record_commands(cmd, slot, image)
        }
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<()> {
        let frame = self.frames.slot(slot)?;
        let signal = self
            .targets
            .swapchain
            .render_finished
            .get(image as usize)
            .copied()
            .ok_or_else(|| GpuError::ResourceNotFound(format!("Render-finished semaphore {image}")))?;

        let wait_semaphores = [frame.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [signal];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: cmd is executable and the fence was reset this frame
        unsafe {
            self.ctx
                .device()
                .queue_submit(self.ctx.graphics_queue(), &[submit_info], frame.sync.in_flight)
                .map_err(GpuError::from)?;
        }
        Ok(())
    }

    fn present(&mut self, image: u32) -> Result<bool> {
        // SAFETY: image was acquired this frame and its submission signals render_finished
        let stale = unsafe {
            self.targets.swapchain.present(
                self.ctx.swapchain_loader(),
                self.ctx.present_queue(),
                image,
            )?
        };
        Ok(stale)
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.framebuffer_size
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.ctx.wait_idle()?;
        Ok(())
    }

    fn recreate(&mut self) -> Result<usize> {
        let device = self.ctx.device();
        // SAFETY: the scheduler waits for the device to idle before recreating
        unsafe {
            self.targets.depth.destroy(self.ctx)?;
            self.targets
                .swapchain
                .destroy(device, self.ctx.swapchain_loader());
            self.targets.swapchain = Swapchain::new(
                self.ctx,
                self.surface,
                extent_of(self.framebuffer_size),
                self.vsync,
            )?;
        }

        let extent = self.targets.swapchain.extent;
        self.targets.depth = DepthBuffer::new(self.ctx, extent)?;
        self.camera.set_viewport(extent.width, extent.height);

        debug!(
            "Swapchain recreated: {}x{}, {} images",
            extent.width,
            extent.height,
            self.targets.swapchain.image_count()
        );
        Ok(self.targets.swapchain.image_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_frame_constants() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, MAX_FRAMES_IN_FLIGHT);
        assert!(!config.vsync);
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn default_config_prefers_mailbox() {
        use crimson_gpu::swapchain::select_present_mode;

        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let default = RendererConfig::default();
        assert_eq!(
            select_present_mode(&available, default.vsync),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO], default.vsync),
            vk::PresentModeKHR::FIFO
        );

        let forced = RendererConfig::new().with_vsync(true);
        assert_eq!(
            select_present_mode(&available, forced.vsync),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn builder_overrides_fields() {
        let config = RendererConfig::new()
            .with_vsync(true)
            .with_clear_color([0.1, 0.2, 0.3, 1.0])
            .with_shader("shaders/lit.spv");
        assert!(config.vsync);
        assert_eq!(config.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.pipeline.shader_path, PathBuf::from("shaders/lit.spv"));
    }

    #[test]
    fn extent_from_framebuffer_size() {
        let extent = extent_of((800, 600));
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }
}
