//! Graphics pipeline creation for dynamic rendering.

use crate::error::{GpuError, Result};
use crate::shader::read_spirv;
use ash::vk;
use std::ffi::CString;
use std::path::PathBuf;

/// Fixed-function and shader choices that define a graphics pipeline.
///
/// Equal configurations produce interchangeable pipelines, so the record
/// doubles as a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineConfig {
    /// SPIR-V module holding both stages.
    pub shader_path: PathBuf,
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub blend_enable: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shader_path: PathBuf::from("assets/shaders/shader.spv"),
            vertex_entry: "vertMain".to_string(),
            fragment_entry: "fragMain".to_string(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            blend_enable: true,
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS,
        }
    }
}

impl PipelineConfig {
    /// Default configuration reading shaders from `path`.
    pub fn with_shader(path: impl Into<PathBuf>) -> Self {
        Self {
            shader_path: path.into(),
            ..Self::default()
        }
    }
}

/// Vertex input description for a pipeline.
#[derive(Debug, Clone, Default)]
pub struct VertexLayout {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// Attachment formats the pipeline renders into.
#[derive(Debug, Clone, Copy)]
pub struct RenderTargets {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
}

/// Create a pipeline layout over the given set layouts, without push constants.
///
/// # Safety
/// The device and set layouts must be valid.
pub unsafe fn create_pipeline_layout(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);

    // SAFETY: device is valid per the caller contract
    unsafe { device.create_pipeline_layout(&layout_info, None) }.map_err(|e| {
        tracing::error!("Failed to create pipeline layout: {e}");
        GpuError::PipelineCreation(e.to_string())
    })
}

fn blend_attachment(enabled: bool) -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(enabled)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

/// Graphics pipeline with its layout.
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Build a dynamic-rendering pipeline from `config`.
    ///
    /// Viewport and scissor are dynamic state.
    ///
    /// # Safety
    /// The device and set layouts must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        config: &PipelineConfig,
        vertex_layout: &VertexLayout,
        set_layouts: &[vk::DescriptorSetLayout],
        targets: RenderTargets,
    ) -> Result<Self> {
        let code = read_spirv(&config.shader_path)?;
        let vertex_entry = CString::new(config.vertex_entry.as_str())
            .map_err(|e| GpuError::PipelineCreation(format!("Vertex entry point: {e}")))?;
        let fragment_entry = CString::new(config.fragment_entry.as_str())
            .map_err(|e| GpuError::PipelineCreation(format!("Fragment entry point: {e}")))?;

        let shader_info = vk::ShaderModuleCreateInfo::default().code(&code);
        // SAFETY: code is a parsed SPIR-V word stream
        let shader_module = unsafe { device.create_shader_module(&shader_info, None) }
            .map_err(|e| {
                tracing::error!("Failed to create shader module: {e}");
                GpuError::ShaderCompilation(e.to_string())
            })?;

        // SAFETY: forwarded caller contract
        let layout = match unsafe { create_pipeline_layout(device, set_layouts) } {
            Ok(layout) => layout,
            Err(e) => {
                // SAFETY: module is unused
                unsafe { device.destroy_shader_module(shader_module, None) };
                return Err(e);
            }
        };

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(shader_module)
                .name(&vertex_entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(shader_module)
                .name(&fragment_entry),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_layout.bindings)
            .vertex_attribute_descriptions(&vertex_layout.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(config.topology)
            .primitive_restart_enable(false);

        // Viewport (dynamic)
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(config.polygon_mode)
            .cull_mode(config.cull_mode)
            .front_face(config.front_face)
            .depth_bias_enable(false)
            .depth_bias_slope_factor(1.0)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(config.depth_test)
            .depth_write_enable(config.depth_write)
            .depth_compare_op(config.depth_compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [blend_attachment(config.blend_enable)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [targets.color_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(targets.depth_format);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        // SAFETY: every referenced state struct outlives the call
        let result = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        // SAFETY: the module is only needed during pipeline creation
        unsafe { device.destroy_shader_module(shader_module, None) };

        let pipeline = match result {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, e)) => {
                tracing::error!("Failed to create graphics pipeline: {e}");
                None
            }
        };

        match pipeline {
            Some(pipeline) => Ok(Self { pipeline, layout }),
            None => {
                // SAFETY: layout is not referenced by any pipeline
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(GpuError::PipelineCreation(format!(
                    "Graphics pipeline from {}",
                    config.shader_path.display()
                )))
            }
        }
    }

    /// Bind for graphics work.
    ///
    /// # Safety
    /// `cmd` must be recording.
    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        // SAFETY: caller guarantees cmd is recording
        unsafe { device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline) };
    }

    /// Destroy the pipeline.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        // SAFETY: caller guarantees the pipeline is idle
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
