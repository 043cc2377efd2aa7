//! Render error types.

use crimson_gpu::GpuError;
use thiserror::Error;

/// Errors raised while building or driving the renderer.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error("Scene import failed for {path}: {reason}")]
    Import { path: String, reason: String },

    #[error("Texture decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Scene has no meshes: {0}")]
    EmptyScene(String),

    #[error("Bone count {count} exceeds the limit of {max}")]
    TooManyBones { count: usize, max: usize },

    #[error("Mesh '{mesh}' references vertex {vertex} but has {count} vertices")]
    VertexOutOfRange {
        mesh: String,
        vertex: u32,
        count: usize,
    },

    #[error("Model is not loaded")]
    ModelNotLoaded,

    #[error("{0}")]
    Core(#[from] crimson_core::Error),
}

/// Result type for render operations.
pub type Result<T> = std::result::Result<T, RenderError>;
