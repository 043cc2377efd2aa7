//! Rendering layer for the Crimson renderer.
//!
//! This crate provides:
//! - Scene import (OBJ via tobj) into an importer-neutral scene graph
//! - Mesh preparation, bone weighting and model normalization
//! - Keyframe animation sampling and skeletal pose evaluation
//! - Textures, materials and a pipeline cache
//! - Per-frame uniform buffers and the camera
//! - The frame scheduler and its Vulkan backend

pub mod animation;
pub mod camera;
pub mod descriptors;
pub mod error;
pub mod frame;
pub mod material;
pub mod mesh;
pub mod model;
pub mod model_data;
pub mod obj_import;
pub mod renderer;
pub mod scene;
pub mod skeleton;
pub mod texture;
pub mod ubo;
pub mod vertex;

pub use animation::Animator;
pub use camera::Camera;
pub use descriptors::DescriptorContext;
pub use error::{RenderError, Result};
pub use frame::{AcquireResult, FrameBackend, FrameScheduler, FrameStatus};
pub use material::{Material, PipelineCache};
pub use mesh::Mesh;
pub use model::{Model, ModelLoadContext, ModelState};
pub use model_data::{prepare_scene, PreparedMesh, PreparedModel, TextureSource};
pub use obj_import::ObjImporter;
pub use renderer::{Renderer, RendererConfig};
pub use scene::{SceneData, SceneImporter, SceneMesh, SceneNode};
pub use skeleton::BoneMap;
pub use texture::{Texture, TextureData};
pub use ubo::{BoneData, CameraData, ObjectData, UniformBuffers};
pub use vertex::Vertex;
