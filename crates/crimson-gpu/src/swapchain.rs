//! Swapchain management.
//!
//! The swapchain owns everything indexed by swapchain image: the images,
//! their views and the "render finished" semaphores. All of it is created
//! and destroyed together so image count and per-image resources never
//! disagree.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::surface::SurfaceContext;
use crate::sync::create_semaphore;
use ash::vk;
use crimson_core::constants::MIN_SWAPCHAIN_IMAGES;

/// Result of asking the present engine for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready; `suboptimal` asks for recreation after this frame.
    Acquired { image_index: u32, suboptimal: bool },
    /// No image was acquired and the swapchain must be rebuilt.
    OutOfDate,
}

/// Swapchain wrapper.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    /// One per image, signaled by the submission rendering into that image.
    pub render_finished: Vec<vk::Semaphore>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create a swapchain sized to `desired_extent` (clamped to the surface).
    ///
    /// # Safety
    /// The surface must belong to the context's instance and no other
    /// swapchain may currently target it.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn new(
        ctx: &GpuContext,
        surface: &SurfaceContext,
        desired_extent: vk::Extent2D,
        vsync: bool,
    ) -> Result<Self> {
        let device = ctx.device();
        let loader = ctx.swapchain_loader();

        // SAFETY: physical device and surface share the instance
        let support = unsafe { surface.capabilities(ctx.physical_device())? };
        let caps = &support.capabilities;

        let surface_format = select_surface_format(&support.formats)?;
        let present_mode = select_present_mode(&support.present_modes, vsync);
        let extent = calculate_extent(caps, desired_extent.width, desired_extent.height);
        let image_count = choose_image_count(caps);

        let families = ctx.queue_families();
        let family_indices = [families.graphics, families.present];
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        create_info = if families.graphics != families.present {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        // SAFETY: create info references live data only
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }.map_err(|e| {
            tracing::error!("Failed to create swapchain: {e}");
            GpuError::SwapchainCreation(e.to_string())
        })?;

        let mut this = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            render_finished: Vec::new(),
            format: surface_format.format,
            extent,
            present_mode,
        };

        // Partially built state is torn down by destroy() on failure
        // SAFETY: swapchain was just created from this device
        if let Err(e) = unsafe { this.create_image_resources(device, loader) } {
            // SAFETY: nothing has been submitted yet
            unsafe { this.destroy(device, loader) };
            return Err(e);
        }

        tracing::info!(
            "Swapchain created: {}x{} {:?} {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            this.images.len()
        );

        Ok(this)
    }

    unsafe fn create_image_resources(
        &mut self,
        device: &ash::Device,
        loader: &ash::khr::swapchain::Device,
    ) -> Result<()> {
        // SAFETY: swapchain is valid
        self.images = unsafe { loader.get_swapchain_images(self.swapchain)? };

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            // SAFETY: image belongs to this swapchain
            self.image_views
                .push(unsafe { device.create_image_view(&view_info, None)? });
            // SAFETY: device is valid
            self.render_finished
                .push(unsafe { create_semaphore(device)? });
        }

        Ok(())
    }

    /// Number of images in the chain.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image, signaling `semaphore` when it is ready.
    ///
    /// # Safety
    /// All handles must be valid and `semaphore` unsignaled with no pending wait.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        // SAFETY: handles are valid per the caller contract
        let result = unsafe {
            swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => {
                tracing::error!("Failed to acquire swapchain image: {e}");
                Err(GpuError::from(e))
            }
        }
    }

    /// Present `image_index` after its render-finished semaphore signals.
    ///
    /// Returns `true` when the swapchain is stale (out of date or suboptimal).
    ///
    /// # Safety
    /// All handles must be valid and the image must have been acquired.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [self.render_finished[image_index as usize]];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: handles are valid per the caller contract
        match unsafe { swapchain_loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => {
                tracing::error!("Failed to present swapchain image: {e}");
                Err(GpuError::from(e))
            }
        }
    }

    /// Destroy semaphores, views and the swapchain.
    ///
    /// # Safety
    /// All handles must be valid and swapchain must not be in use.
    pub unsafe fn destroy(
        &mut self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        // SAFETY: caller guarantees the device is idle
        unsafe {
            for semaphore in self.render_finished.drain(..) {
                device.destroy_semaphore(semaphore, None);
            }
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                swapchain_loader.destroy_swapchain(self.swapchain, None);
            }
        }
        self.images.clear();
        self.swapchain = vk::SwapchainKHR::null();
    }
}

/// Select the best surface format: B8G8R8A8_SRGB with sRGB nonlinear, else the first.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
        .ok_or_else(|| GpuError::SwapchainCreation("Surface reports no formats".to_string()))
}

/// Select the present mode: mailbox unless vsync is forced, FIFO otherwise.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        // FIFO is always supported
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// At least three images, capped by the surface maximum when it has one.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = MIN_SWAPCHAIN_IMAGES.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_srgb_format() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = select_surface_format(&available).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let chosen = select_surface_format(&available).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert!(select_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_selection() {
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(select_present_mode(&both, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(select_present_mode(&both, true), vk::PresentModeKHR::FIFO);
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_clamps_only_when_surface_defers() {
        let mut c = caps(2, 8);
        assert_eq!(
            calculate_extent(&c, 8000, 1),
            vk::Extent2D {
                width: 4096,
                height: 16
            }
        );

        c.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(calculate_extent(&c, 8000, 1), c.current_extent);
    }

    #[test]
    fn image_count_is_at_least_three_and_capped() {
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(4, 8)), 4);
        assert_eq!(choose_image_count(&caps(2, 2)), 2);
        assert_eq!(choose_image_count(&caps(1, 0)), 3);
    }
}
