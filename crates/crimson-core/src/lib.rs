//! Core types, math, and constants for the Crimson renderer.
//!
//! This crate provides the foundational pieces shared by every other crate:
//! - The canonical constants module (frame slots, bone limits, descriptor bindings)
//! - Bounding-box math and model normalization
//! - The engine-level error type

pub mod error;
pub mod math;

pub use error::{read_file, Error, Result};
pub use math::Aabb;

/// Engine-wide constants.
///
/// Every crate reads these values from here rather than redefining them.
pub mod constants {
    /// Number of frame slots the CPU may record ahead of the GPU.
    pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
    /// Lower bound on the number of swapchain images requested.
    pub const MIN_SWAPCHAIN_IMAGES: u32 = 3;
    /// Number of bone matrices in the bone uniform buffer.
    pub const MAX_BONES: usize = 100;
    /// Bone influences stored per vertex.
    pub const MAX_BONES_PER_VERTEX: usize = 4;
    /// Animation tick rate used when a clip does not declare one.
    pub const DEFAULT_TICKS_PER_SECOND: f64 = 25.0;

    /// Per-frame descriptor set index.
    pub const PER_FRAME_SET: u32 = 0;
    /// Per-material descriptor set index.
    pub const PER_MATERIAL_SET: u32 = 1;
    /// Camera uniform binding in the per-frame set.
    pub const CAMERA_BINDING: u32 = 0;
    /// Object transform uniform binding in the per-frame set.
    pub const OBJECT_BINDING: u32 = 2;
    /// Bone matrix uniform binding in the per-frame set.
    pub const BONES_BINDING: u32 = 3;
    /// Diffuse texture binding in the per-material set.
    pub const TEXTURE_BINDING: u32 = 0;
    /// Upper bound on material descriptor sets allocated from the shared pool.
    pub const MAX_MATERIAL_SETS: u32 = 100;
}
