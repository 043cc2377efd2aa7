//! Vulkan abstraction layer for the Crimson renderer.
//!
//! This crate provides:
//! - Vulkan instance, validation messaging and device selection
//! - GPU capability detection and requirement checks
//! - Memory allocation via gpu-allocator and staged uploads
//! - Command buffer and synchronization primitives
//! - Swapchain negotiation and recreation support
//! - Descriptor and graphics pipeline plumbing for dynamic rendering

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod image;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod upload;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::{execute_single_time_commands, CommandPool};
pub use context::{GpuContext, GpuContextBuilder, QueueFamilyIndices};
pub use descriptors::{
    write_combined_image_sampler, write_uniform_buffer, DescriptorPool,
    DescriptorSetLayoutBuilder,
};
pub use error::{GpuError, Result};
pub use image::{
    create_sampler, record_image_barrier, transition_image_layout, DepthBuffer, TransitionMasks,
};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{GraphicsPipeline, PipelineConfig, RenderTargets, VertexLayout};
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::{AcquireOutcome, Swapchain};
pub use sync::{create_fence, create_semaphore, FrameSync};
