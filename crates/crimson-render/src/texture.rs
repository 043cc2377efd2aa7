//! Sampled 2D textures.

use ash::vk;
use crimson_gpu::image::create_image_view;
use crimson_gpu::upload::upload_image;
use crimson_gpu::{create_sampler, CommandPool, GpuContext, GpuImage};
use std::path::Path;
use tracing::debug;

use crate::error::Result;

/// Color textures are stored as sRGB RGBA8.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Decoded RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Decode any format the `image` crate understands.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        Ok(Self {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = crimson_core::read_file(path)?;
        Self::decode(&bytes)
    }

    /// Single opaque white texel.
    pub fn white() -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: vec![255; 4],
        }
    }
}

/// Device-local image, view and sampler.
pub struct Texture {
    image: GpuImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
}

impl Texture {
    /// Upload decoded pixels and create the view and sampler.
    pub fn new(ctx: &GpuContext, pool: &CommandPool, data: &TextureData, name: &str) -> Result<Self> {
        let extent = vk::Extent2D {
            width: data.width,
            height: data.height,
        };
        let mut image = upload_image(ctx, pool, &data.pixels, extent, TEXTURE_FORMAT, name)?;

        let device = ctx.device();
        // SAFETY: image was just created on this device
        let view = match unsafe {
            create_image_view(device, image.image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR)
        } {
            Ok(view) => view,
            Err(e) => {
                ctx.allocator().lock().free_image(&mut image)?;
                return Err(e.into());
            }
        };

        // SAFETY: anisotropy is a required device feature
        let sampler = match unsafe {
            create_sampler(device, ctx.capabilities().max_sampler_anisotropy)
        } {
            Ok(sampler) => sampler,
            Err(e) => {
                // SAFETY: view is unused
                unsafe { device.destroy_image_view(view, None) };
                ctx.allocator().lock().free_image(&mut image)?;
                return Err(e.into());
            }
        };

        debug!("Created texture '{name}' ({}x{})", data.width, data.height);
        Ok(Self {
            image,
            view,
            sampler,
        })
    }

    /// Decode and upload an image file.
    pub fn from_file(ctx: &GpuContext, pool: &CommandPool, path: &Path) -> Result<Self> {
        let data = TextureData::load(path)?;
        Self::new(ctx, pool, &data, &path.display().to_string())
    }

    /// 1x1 white texture bound for meshes without a diffuse map.
    pub fn placeholder(ctx: &GpuContext, pool: &CommandPool) -> Result<Self> {
        Self::new(ctx, pool, &TextureData::white(), "placeholder_texture")
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.image.extent
    }

    /// # Safety
    /// No descriptor set referencing this texture may be in use by the GPU.
    pub unsafe fn destroy(&mut self, ctx: &GpuContext) -> Result<()> {
        let device = ctx.device();
        // SAFETY: caller guarantees the GPU is done with the texture
        unsafe {
            device.destroy_sampler(self.sampler, None);
            device.destroy_image_view(self.view, None);
        }
        self.sampler = vk::Sampler::null();
        self.view = vk::ImageView::null();
        ctx.allocator().lock().free_image(&mut self.image)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    #[test]
    fn decode_expands_rgb_to_rgba() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 0, 255]));
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png).unwrap();

        let data = TextureData::decode(&png).unwrap();
        assert_eq!((data.width, data.height), (2, 1));
        assert_eq!(data.pixels, vec![255, 0, 0, 255, 0, 0, 255, 255]);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(TextureData::decode(b"not an image").is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = TextureData::load(Path::new("/nonexistent/tex.png")).unwrap_err();
        assert!(matches!(
            err,
            crate::error::RenderError::Core(crimson_core::Error::Io { .. })
        ));
    }

    #[test]
    fn placeholder_is_opaque_white() {
        let white = TextureData::white();
        assert_eq!(white.pixels.len(), 4);
        assert!(white.pixels.iter().all(|&c| c == 255));
    }
}
