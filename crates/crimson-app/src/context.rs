//! Application context.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use crimson_gpu::{GpuContext, GpuContextBuilder, SurfaceContext};
use crimson_render::{FrameStatus, Renderer, RendererConfig, SceneImporter};
use tracing::{error, info};
use winit::window::Window;

/// Application context shared across all app methods.
///
/// Fields are declared so that the device outlives everything created from
/// it; explicit teardown happens in [`AppContext::cleanup`].
pub struct AppContext {
    /// The window handle.
    pub window: Arc<Window>,
    /// Frame orchestrator owning swapchain, frame slots and the model.
    pub renderer: Renderer,
    /// Surface for the window.
    pub surface: SurfaceContext,
    /// GPU context with device and queues.
    pub gpu: GpuContext,
    destroyed: bool,
}

impl AppContext {
    /// Create the device, surface and renderer for `window`.
    pub(crate) fn new(
        window: Arc<Window>,
        app_name: &str,
        validation: bool,
        renderer_config: RendererConfig,
    ) -> anyhow::Result<Self> {
        let (gpu, surface) = GpuContextBuilder::new()
            .app_name(app_name)
            .validation(validation)
            .build_for_window(window.as_ref())?;

        info!("GPU: {}", gpu.capabilities().summary());

        let size = window.inner_size();
        // SAFETY: surface was created from this context's instance and lives in self
        let renderer = match unsafe {
            Renderer::new(&gpu, &surface, (size.width, size.height), renderer_config)
        } {
            Ok(renderer) => renderer,
            Err(e) => {
                // SAFETY: the surface is not used again
                unsafe { surface.destroy() };
                return Err(e.into());
            }
        };

        Ok(Self {
            window,
            renderer,
            surface,
            gpu,
            destroyed: false,
        })
    }

    /// Current framebuffer size in pixels.
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.renderer.extent()
    }

    /// Load a model into the renderer, replacing the current one.
    pub fn load_model(&mut self, importer: &dyn SceneImporter, path: &Path) -> anyhow::Result<()> {
        self.renderer.load_model(&self.gpu, importer, path)?;
        Ok(())
    }

    /// Render and present one frame.
    pub(crate) fn draw_frame(&mut self, dt: f32) -> anyhow::Result<FrameStatus> {
        let size = self.framebuffer_size();
        let status = self.renderer.draw_frame(&self.gpu, &self.surface, size, dt)?;
        Ok(status)
    }

    /// Destroy the renderer and the surface; the device follows on drop.
    ///
    /// The caller must have waited for the device to go idle.
    pub(crate) fn cleanup(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        // SAFETY: the runner waits for device idle before cleanup
        unsafe {
            if let Err(e) = self.renderer.destroy(&self.gpu) {
                error!("Failed to destroy renderer: {e}");
            }
            self.surface.destroy();
        }
    }
}
