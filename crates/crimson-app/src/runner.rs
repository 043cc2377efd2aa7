//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crimson_render::{FrameStatus, RendererConfig};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::app::RenderApp;
use crate::context::AppContext;
use crate::stats::FrameStats;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Frame orchestrator settings.
    pub renderer: RendererConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Crimson Souls".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            validation: cfg!(debug_assertions),
            renderer: RendererConfig::default(),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.renderer.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_renderer(mut self, renderer: RendererConfig) -> Self {
        self.renderer = renderer;
        self
    }

    fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Run a `RenderApp` with the given configuration.
///
/// This function initializes logging, creates the window, GPU context and
/// renderer, and runs the event loop until the window closes. Initialization
/// and frame errors end the loop and are returned.
pub fn run_app<A: RenderApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: RenderApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    failure: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: RenderApp> {
    ctx: AppContext,
    app: A,
    target_frame_time: Option<Duration>,
    last_frame_time: Instant,
    stats: FrameStats,
}

impl<A: RenderApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &mut self.state {
            if state.app.on_event(&mut state.ctx, &event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.shutdown(event_loop);
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && event.logical_key == Key::Named(NamedKey::Escape) =>
            {
                info!("Escape pressed");
                self.shutdown(event_loop);
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.render_frame() {
                        error!("Render error: {e:#}");
                        self.failure = Some(e);
                        self.shutdown(event_loop);
                    }
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    debug!("Framebuffer resized to {}x{}", size.width, size.height);
                    state.ctx.renderer.request_resize();
                    if size.width > 0 && size.height > 0 {
                        state.ctx.window.request_redraw();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            let size = state.ctx.window.inner_size();
            if size.width == 0 || size.height == 0 {
                // Minimized: sleep until the next window event.
                event_loop.set_control_flow(ControlFlow::Wait);
            } else {
                event_loop.set_control_flow(ControlFlow::Poll);
                state.ctx.window.request_redraw();
            }
        }
    }
}

impl<A: RenderApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let mut ctx = AppContext::new(
            window,
            &self.config.title,
            self.config.validation,
            self.config.renderer.clone(),
        )?;

        let app = match A::init(&mut ctx) {
            Ok(app) => app,
            Err(e) => {
                if let Err(idle) = ctx.gpu.wait_idle() {
                    error!("Failed to wait idle: {idle}");
                }
                ctx.cleanup();
                return Err(e);
            }
        };

        Ok(AppState {
            ctx,
            app,
            target_frame_time: self.config.target_frame_time(),
            last_frame_time: Instant::now(),
            stats: FrameStats::new(),
        })
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        event_loop.exit();
    }
}

impl<A: RenderApp> AppState<A> {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let dt = frame_start.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = frame_start;

        self.app.update(&mut self.ctx, dt);

        match self.ctx.draw_frame(dt)? {
            FrameStatus::Presented => self.stats.record(dt),
            FrameStatus::Recreated => {
                let extent = self.ctx.extent();
                info!("Resized to {}x{}", extent.width, extent.height);
            }
            FrameStatus::Deferred => {}
        }

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        self.stats.log();

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        // Let the app cleanup first
        self.app.cleanup(&mut self.ctx);

        // Then the renderer, its model and the surface; the device drops last
        self.ctx.cleanup();

        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_window_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.title, "Crimson Souls");
        assert_eq!((config.width, config.height), (1280, 720));
        assert!(config.target_fps.is_none());
        assert!(!config.renderer.vsync);
        assert!(config.target_frame_time().is_none());
    }

    #[test]
    fn builder_sets_fields() {
        let config = AppConfig::new("Viewer")
            .with_size(800, 600)
            .with_vsync(true)
            .with_validation(true)
            .with_target_fps(50);

        assert_eq!(config.title, "Viewer");
        assert_eq!((config.width, config.height), (800, 600));
        assert!(config.renderer.vsync);
        assert!(config.validation);
        assert_eq!(config.target_frame_time(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn zero_target_fps_disables_pacing() {
        let config = AppConfig::default().with_target_fps(0);
        assert!(config.target_frame_time().is_none());
    }
}
