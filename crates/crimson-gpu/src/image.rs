//! Image helpers: layout transitions, views, depth buffers and samplers.

use crate::command::{execute_single_time_commands, CommandPool};
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::memory::GpuImage;
use ash::vk;

/// Stage and access masks on both sides of a layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// Barrier masks for the layout transitions the renderer performs.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    use vk::AccessFlags2 as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags2 as S;

    let masks = match (old, new) {
        // Source stage must equal the acquire semaphore's wait stage.
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => TransitionMasks {
            src_stage: S::COLOR_ATTACHMENT_OUTPUT,
            src_access: A::NONE,
            dst_stage: S::COLOR_ATTACHMENT_OUTPUT,
            dst_access: A::COLOR_ATTACHMENT_WRITE,
        },
        (L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL | L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => {
            // Depth is shared across frame slots; waits on prior depth writes.
            TransitionMasks {
                src_stage: S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                src_access: A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_stage: S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                dst_access: A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            }
        }
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => TransitionMasks {
            src_stage: S::COLOR_ATTACHMENT_OUTPUT,
            src_access: A::COLOR_ATTACHMENT_WRITE,
            dst_stage: S::BOTTOM_OF_PIPE,
            dst_access: A::NONE,
        },
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_stage: S::TOP_OF_PIPE,
            src_access: A::NONE,
            dst_stage: S::TRANSFER,
            dst_access: A::TRANSFER_WRITE,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_stage: S::TRANSFER,
            src_access: A::TRANSFER_WRITE,
            dst_stage: S::FRAGMENT_SHADER,
            dst_access: A::SHADER_READ,
        },
        (from, to) => return Err(GpuError::UnsupportedLayoutTransition { from, to }),
    };

    Ok(masks)
}

/// Whether a depth format also carries stencil bits.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Aspect flags for a full-image barrier on `layout`.
pub fn aspect_for_layout(layout: vk::ImageLayout, format: vk::Format) -> vk::ImageAspectFlags {
    match layout {
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            if has_stencil_component(format) {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            } else {
                vk::ImageAspectFlags::DEPTH
            }
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Masks for a supported transition, replaced by `overrides` when given.
///
/// Unsupported layout pairs are rejected even with explicit masks.
pub fn resolve_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    overrides: Option<TransitionMasks>,
) -> Result<TransitionMasks> {
    let derived = transition_masks(old, new)?;
    Ok(overrides.unwrap_or(derived))
}

/// Record a synchronization2 layout transition covering the whole image.
///
/// # Safety
/// `cmd` must be in the recording state and `image` must be valid.
pub unsafe fn record_image_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    aspect_mask: vk::ImageAspectFlags,
    masks: Option<TransitionMasks>,
) -> Result<()> {
    let masks = resolve_masks(old_layout, new_layout, masks)?;

    let barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(masks.src_stage)
        .src_access_mask(masks.src_access)
        .dst_stage_mask(masks.dst_stage)
        .dst_access_mask(masks.dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_mask)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    let barriers = [barrier];
    let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);

    // SAFETY: caller guarantees cmd is recording
    unsafe { device.cmd_pipeline_barrier2(cmd, &dependency_info) };
    Ok(())
}

/// Transition a color image, recording into `cmd` when given or into a
/// temporary one-shot buffer submitted on the graphics queue otherwise.
///
/// # Safety
/// The image must be valid; `cmd`, when given, must be recording.
pub unsafe fn transition_image_layout(
    ctx: &GpuContext,
    pool: &CommandPool,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    masks: Option<TransitionMasks>,
    cmd: Option<vk::CommandBuffer>,
) -> Result<()> {
    let device = ctx.device();
    let aspect = vk::ImageAspectFlags::COLOR;

    // SAFETY: forwarded caller contract
    unsafe {
        match cmd {
            Some(cmd) => record_image_barrier(device, cmd, image, old_layout, new_layout, aspect, masks),
            None => execute_single_time_commands(device, pool, ctx.graphics_queue(), |cmd| {
                record_image_barrier(device, cmd, image, old_layout, new_layout, aspect, masks)
            }),
        }
    }
}

/// Create a 2D view over the first mip level and layer.
///
/// # Safety
/// The device and image must be valid.
pub unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_mask)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    // SAFETY: caller guarantees valid handles
    let view = unsafe { device.create_image_view(&view_info, None)? };
    Ok(view)
}

/// Depth formats tried in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate whose properties for `tiling` include `features`.
pub fn find_supported_format<F>(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties_of: F,
) -> Result<vk::Format>
where
    F: Fn(vk::Format) -> vk::FormatProperties,
{
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties_of(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| GpuError::ResourceNotFound("No supported format".to_string()))
}

/// Pick the depth attachment format for the selected device.
pub fn find_depth_format(ctx: &GpuContext) -> Result<vk::Format> {
    find_supported_format(
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        |format| {
            // SAFETY: instance and physical device are owned by the context
            unsafe {
                ctx.instance()
                    .get_physical_device_format_properties(ctx.physical_device(), format)
            }
        },
    )
}

/// Depth attachment sized to the swapchain.
pub struct DepthBuffer {
    pub image: GpuImage,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

impl DepthBuffer {
    /// Allocate a device-local depth image and its view.
    pub fn new(ctx: &GpuContext, extent: vk::Extent2D) -> Result<Self> {
        let format = find_depth_format(ctx)?;

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image = ctx.allocator().lock().create_image(
            &create_info,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            "depth_buffer",
        )?;

        // SAFETY: image was just created on this device
        let view = match unsafe {
            create_image_view(
                ctx.device(),
                image.image,
                format,
                vk::ImageAspectFlags::DEPTH,
            )
        } {
            Ok(view) => view,
            Err(e) => {
                ctx.allocator().lock().free_image(&mut image)?;
                return Err(e);
            }
        };

        Ok(Self {
            image,
            view,
            format,
        })
    }

    /// Release the view and image.
    ///
    /// # Safety
    /// The depth buffer must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, ctx: &GpuContext) -> Result<()> {
        // SAFETY: caller guarantees the view is idle
        unsafe { ctx.device().destroy_image_view(self.view, None) };
        self.view = vk::ImageView::null();
        ctx.allocator().lock().free_image(&mut self.image)
    }
}

/// Linear, repeating sampler with the given anisotropy.
///
/// # Safety
/// The device must be valid and have sampler anisotropy enabled.
pub unsafe fn create_sampler(device: &ash::Device, max_anisotropy: f32) -> Result<vk::Sampler> {
    let create_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(true)
        .max_anisotropy(max_anisotropy)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS);

    // SAFETY: device is valid per the caller contract
    let sampler = unsafe { device.create_sampler(&create_info, None)? };
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_to_present_masks() {
        let masks = transition_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
        .unwrap();
        assert_eq!(masks.src_stage, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(masks.src_access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags2::BOTTOM_OF_PIPE);
    }

    #[test]
    fn color_attachment_transition_waits_on_acquire_stage() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_stage, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(masks.dst_access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn depth_transition_orders_after_previous_depth_writes() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        let tests = vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;
        assert_eq!(masks.src_stage, tests);
        assert_eq!(masks.src_access, vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE);
    }

    #[test]
    fn depth_attachment_masks_cover_both_test_stages() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert!(masks
            .dst_stage
            .contains(vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS));
        assert!(masks
            .dst_stage
            .contains(vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS));
        assert!(masks
            .dst_access
            .contains(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn unknown_transition_is_rejected() {
        let err = transition_masks(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert!(matches!(
            err,
            Err(GpuError::UnsupportedLayoutTransition { .. })
        ));
    }

    #[test]
    fn explicit_masks_override_but_do_not_widen() {
        let custom = TransitionMasks {
            src_stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            src_access: vk::AccessFlags2::MEMORY_WRITE,
            dst_stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            dst_access: vk::AccessFlags2::MEMORY_READ,
        };
        let resolved = resolve_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Some(custom),
        )
        .unwrap();
        assert_eq!(resolved, custom);

        assert!(resolve_masks(
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            Some(custom)
        )
        .is_err());
    }

    #[test]
    fn depth_aspect_includes_stencil_when_present() {
        let layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        assert_eq!(
            aspect_for_layout(layout, vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_layout(layout, vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_for_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn format_search_respects_order_and_tiling() {
        let props = |format: vk::Format| {
            if format == vk::Format::D32_SFLOAT {
                vk::FormatProperties {
                    linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            } else {
                vk::FormatProperties {
                    optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            }
        };

        let chosen = find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            props,
        )
        .unwrap();
        assert_eq!(chosen, vk::Format::D32_SFLOAT_S8_UINT);

        let none = find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::SAMPLED_IMAGE,
            props,
        );
        assert!(none.is_err());
    }
}
