//! Command pools and one-shot command submission.

use crate::error::{GpuError, Result};
use ash::vk;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        // SAFETY: device is valid per the caller contract
        let pool = unsafe { device.create_command_pool(&create_info, None)? };

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate `count` primary command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffers(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        // SAFETY: pool belongs to device
        let buffers = unsafe { device.allocate_command_buffers(&alloc_info)? };
        Ok(buffers)
    }

    /// Destroy the command pool and every buffer allocated from it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        // SAFETY: caller guarantees the pool is idle
        unsafe { device.destroy_command_pool(self.pool, None) };
    }
}

/// How far a one-shot command buffer got before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OneShotStage {
    Recording,
    Submitted,
    Completed,
}

impl OneShotStage {
    /// A submitted buffer whose queue wait failed may still be executing.
    fn can_free(self) -> bool {
        self != Self::Submitted
    }
}

/// Record a one-shot command buffer, submit it and wait for the queue to drain.
///
/// The buffer is freed when recording fails, and leaked if the queue wait
/// fails after a successful submit.
///
/// # Safety
/// All handles must be valid and the queue must belong to the pool's family.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    record: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    // SAFETY: forwarded caller contract
    let cmd = unsafe { pool.allocate_command_buffers(device, 1)? }
        .into_iter()
        .next()
        .ok_or_else(|| GpuError::InvalidState("No command buffer allocated".to_string()))?;

    let mut stage = OneShotStage::Recording;
    let result = (|| {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: cmd was freshly allocated from a valid pool
        unsafe { device.begin_command_buffer(cmd, &begin_info)? };
        record(cmd)?;
        // SAFETY: cmd is in the recording state
        unsafe { device.end_command_buffer(cmd)? };

        let cmd_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
        // SAFETY: queue is valid and cmd is executable
        unsafe { device.queue_submit(queue, &[submit_info], vk::Fence::null())? };
        stage = OneShotStage::Submitted;
        // SAFETY: queue is valid
        unsafe { device.queue_wait_idle(queue)? };
        stage = OneShotStage::Completed;
        Ok(())
    })();

    if stage.can_free() {
        // SAFETY: the queue is idle or cmd was never submitted
        unsafe { device.free_command_buffers(pool.handle(), &[cmd]) };
    } else {
        tracing::warn!("Leaking one-shot command buffer {cmd:?}: queue wait failed after submit");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_one_shot_buffer_is_never_freed() {
        assert!(OneShotStage::Recording.can_free());
        assert!(!OneShotStage::Submitted.can_free());
        assert!(OneShotStage::Completed.can_free());
    }
}
