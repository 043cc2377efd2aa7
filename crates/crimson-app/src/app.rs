//! `RenderApp` trait definition.

use crate::context::AppContext;
use winit::event::WindowEvent;

/// Trait for Crimson applications.
///
/// The framework owns the window, the GPU context and the renderer; an
/// application decides what to load and how the scene changes over time.
/// Frame submission and presentation are handled by the framework.
pub trait RenderApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window, GPU context and renderer exist. This is
    /// where models are loaded.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before the renderer draws.
    ///
    /// # Arguments
    /// * `ctx` - Application context with GPU, window and renderer access
    /// * `dt` - Delta time in seconds since last frame
    #[allow(unused_variables)]
    fn update(&mut self, ctx: &mut AppContext, dt: f32) {}

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further.
    #[allow(unused_variables)]
    fn on_event(&mut self, ctx: &mut AppContext, event: &WindowEvent) -> bool {
        false
    }

    /// Release application-owned GPU resources.
    ///
    /// The device is idle when this is called; the renderer and its model are
    /// destroyed afterwards by the framework.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
