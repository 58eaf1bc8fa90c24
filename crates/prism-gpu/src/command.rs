//! Command buffer management.

use crate::error::{GpuError, Result};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
    device: Arc<ash::Device>,
}

impl CommandPool {
    /// Create a new command pool.
    pub fn new(
        device: Arc<ash::Device>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = unsafe {
            device
                .create_command_pool(&create_info, None)
                .map_err(GpuError::creation("command pool"))?
        };

        Ok(Self {
            pool,
            queue_family,
            device,
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Device the pool was created on.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate primary command buffers.
    pub fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(GpuError::creation("command buffers"))
        }
    }

    /// Return command buffers to the pool.
    ///
    /// # Safety
    /// None of the buffers may be pending execution.
    pub unsafe fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            self.device.free_command_buffers(self.pool, buffers);
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// A transient command buffer being recorded for a single submission.
///
/// Obtained from [`begin_one_shot_commands`] and consumed by
/// [`end_one_shot_commands`]. Dropping it without ending returns the buffer
/// to the pool unsubmitted.
pub struct OneShotCommands<'a> {
    pool: &'a CommandPool,
    cmd: vk::CommandBuffer,
}

impl OneShotCommands<'_> {
    /// The command buffer to record into.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }
}

impl Drop for OneShotCommands<'_> {
    fn drop(&mut self) {
        unsafe {
            self.pool.free_command_buffers(&[self.cmd]);
        }
    }
}

/// Allocate a command buffer and begin it with the one-time-submit hint.
pub fn begin_one_shot_commands(pool: &CommandPool) -> Result<OneShotCommands<'_>> {
    let cmd = pool.allocate_command_buffers(1)?[0];
    let one_shot = OneShotCommands { pool, cmd };

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe {
        pool.device().begin_command_buffer(cmd, &begin_info)?;
    }

    Ok(one_shot)
}

/// End, submit, and block until `queue` is idle, then release the buffer.
///
/// Setup-time transfers favour simplicity over throughput here.
pub fn end_one_shot_commands(commands: OneShotCommands<'_>, queue: vk::Queue) -> Result<()> {
    let device = commands.pool.device();
    let cmd_buffers = [commands.cmd];
    let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);

    unsafe {
        device.end_command_buffer(commands.cmd)?;
        device.queue_submit(queue, &[submit_info], vk::Fence::null())?;
    }

    let waited = unsafe { device.queue_wait_idle(queue) };
    if let Err(e) = waited {
        // The submission may still be pending; never free it in that state
        if !can_release(&waited, || unsafe { device.device_wait_idle() }) {
            tracing::error!("Leaking one-shot command buffer after failed waits: {e}");
            std::mem::forget(commands);
        }
        return Err(e.into());
    }

    Ok(())
}

/// Whether a submitted buffer is safe to free after its queue wait returned
/// `waited`. `device_idle` runs only when that wait failed.
fn can_release(waited: &VkResult<()>, device_idle: impl FnOnce() -> VkResult<()>) -> bool {
    waited.is_ok() || device_idle().is_ok()
}

/// Record `f` into a one-shot command buffer and execute it synchronously.
pub fn execute_one_shot<F>(pool: &CommandPool, queue: vk::Queue, f: F) -> Result<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer),
{
    let commands = begin_one_shot_commands(pool)?;
    f(pool.device(), commands.command_buffer());
    end_one_shot_commands(commands, queue)
}

/// Submit command buffers to a queue.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn submit_command_buffers(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    wait_semaphores: &[vk::Semaphore],
    wait_stages: &[vk::PipelineStageFlags],
    signal_semaphores: &[vk::Semaphore],
    fence: vk::Fence,
) -> Result<()> {
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(command_buffers)
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
        .signal_semaphores(signal_semaphores);

    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_wait_releases_without_device_wait() {
        assert!(can_release(&Ok(()), || panic!("device wait not needed")));
    }

    #[test]
    fn failed_queue_wait_falls_back_to_device_wait() {
        let lost = Err(vk::Result::ERROR_DEVICE_LOST);
        assert!(can_release(&lost, || Ok(())));
        assert!(!can_release(&lost, || Err(vk::Result::ERROR_DEVICE_LOST)));
    }
}
