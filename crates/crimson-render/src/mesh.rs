//! Immutable device-local geometry.

use ash::vk;
use crimson_gpu::upload::upload_buffer;
use crimson_gpu::{CommandPool, GpuBuffer, GpuContext};

use crate::error::Result;
use crate::vertex::Vertex;

/// One vertex buffer and one `u32` index buffer, uploaded once.
pub struct Mesh {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
}

impl Mesh {
    /// Upload both buffers through staging.
    pub fn new(
        ctx: &GpuContext,
        pool: &CommandPool,
        vertices: &[Vertex],
        indices: &[u32],
        name: &str,
    ) -> Result<Self> {
        let mut vertex_buffer = upload_buffer(
            ctx,
            pool,
            vertices,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &format!("{name}_vertices"),
        )?;

        let index_buffer = match upload_buffer(
            ctx,
            pool,
            indices,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &format!("{name}_indices"),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                ctx.allocator().lock().free_buffer(&mut vertex_buffer)?;
                return Err(e.into());
            }
        };

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }

    /// Record vertex buffer (binding 0) and index buffer binds.
    ///
    /// # Safety
    /// `cmd` must be in the recording state.
    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        // SAFETY: buffers are live for the lifetime of the mesh
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
        }
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// # Safety
    /// The GPU must be done with every command buffer that bound this mesh.
    pub unsafe fn destroy(&mut self, ctx: &GpuContext) -> Result<()> {
        let mut allocator = ctx.allocator().lock();
        allocator.free_buffer(&mut self.vertex_buffer)?;
        allocator.free_buffer(&mut self.index_buffer)?;
        Ok(())
    }
}
