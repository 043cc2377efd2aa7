//! Application framework for the Crimson renderer.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Window creation and management
//! - GPU context and renderer initialization
//! - Resize tracking and swapchain recreation requests
//! - Event loop handling, frame pacing and shutdown ordering
//!
//! # Example
//!
//! ```no_run
//! use crimson_app::{run_app, AppConfig, AppContext, RenderApp};
//!
//! struct MyApp;
//!
//! impl RenderApp for MyApp {
//!     fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod context;
mod runner;
mod stats;

pub use app::RenderApp;
pub use context::AppContext;
pub use runner::{run_app, AppConfig};
pub use stats::FrameStats;

// Re-export commonly used types for convenience
pub use crimson_gpu::{GpuContext, GpuContextBuilder};
pub use crimson_render::{Camera, FrameStatus, ObjImporter, RendererConfig};
pub use winit::event::WindowEvent;
