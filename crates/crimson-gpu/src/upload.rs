//! Staged uploads into device-local memory.

use crate::command::{execute_single_time_commands, CommandPool};
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::image::transition_image_layout;
use crate::memory::{GpuBuffer, GpuImage};
use ash::vk;

fn host_visible() -> vk::MemoryPropertyFlags {
    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
}

fn create_staging(ctx: &GpuContext, bytes: &[u8], name: &str) -> Result<GpuBuffer> {
    let mut staging = ctx.allocator().lock().create_buffer(
        bytes.len() as u64,
        vk::BufferUsageFlags::TRANSFER_SRC,
        host_visible(),
        &format!("{name}_staging"),
    )?;

    if let Err(e) = staging.write_bytes(0, bytes) {
        ctx.allocator().lock().free_buffer(&mut staging)?;
        return Err(e);
    }
    Ok(staging)
}

/// Copy `data` into a new device-local buffer with `usage | TRANSFER_DST`.
///
/// Blocks until the copy has finished; the staging buffer is freed on return.
pub fn upload_buffer<T: bytemuck::Pod>(
    ctx: &GpuContext,
    pool: &CommandPool,
    data: &[T],
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<GpuBuffer> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    if bytes.is_empty() {
        return Err(GpuError::InvalidState(format!(
            "Refusing to upload empty buffer '{name}'"
        )));
    }
    let size = bytes.len() as u64;

    let mut staging = create_staging(ctx, bytes, name)?;

    let mut buffer = match ctx.allocator().lock().create_buffer(
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        name,
    ) {
        Ok(buffer) => buffer,
        Err(e) => {
            ctx.allocator().lock().free_buffer(&mut staging)?;
            return Err(e);
        }
    };

    let device = ctx.device();
    // SAFETY: both buffers are live and the pool belongs to the graphics family
    let copied = unsafe {
        execute_single_time_commands(device, pool, ctx.graphics_queue(), |cmd| {
            let region = vk::BufferCopy::default().size(size);
            device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
            Ok(())
        })
    };

    let mut allocator = ctx.allocator().lock();
    allocator.free_buffer(&mut staging)?;
    if let Err(e) = copied {
        allocator.free_buffer(&mut buffer)?;
        return Err(e);
    }

    Ok(buffer)
}

/// Upload tightly packed pixels into a new sampled image left in
/// `SHADER_READ_ONLY_OPTIMAL`.
pub fn upload_image(
    ctx: &GpuContext,
    pool: &CommandPool,
    pixels: &[u8],
    extent: vk::Extent2D,
    format: vk::Format,
    name: &str,
) -> Result<GpuImage> {
    let mut staging = create_staging(ctx, pixels, name)?;

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
        .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let mut image = match ctx.allocator().lock().create_image(
        &create_info,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        name,
    ) {
        Ok(image) => image,
        Err(e) => {
            ctx.allocator().lock().free_buffer(&mut staging)?;
            return Err(e);
        }
    };

    let device = ctx.device();
    // SAFETY: staging buffer and image are live; pool belongs to the graphics family
    let copied = unsafe {
        execute_single_time_commands(device, pool, ctx.graphics_queue(), |cmd| {
            transition_image_layout(
                ctx,
                pool,
                image.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                None,
                Some(cmd),
            )?;

            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_extent(create_info.extent);
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            transition_image_layout(
                ctx,
                pool,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                None,
                Some(cmd),
            )
        })
    };

    let mut allocator = ctx.allocator().lock();
    allocator.free_buffer(&mut staging)?;
    if let Err(e) = copied {
        allocator.free_image(&mut image)?;
        return Err(e);
    }

    Ok(image)
}
