//! Per-frame synchronization primitives.

use crate::error::{GpuError, Result};
use ash::vk;
use std::sync::Arc;

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    device
        .create_semaphore(&create_info, None)
        .map_err(GpuError::creation("semaphore"))
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    device
        .create_fence(&create_info, None)
        .map_err(GpuError::creation("fence"))
}

/// Synchronization objects owned by one frame slot.
///
/// The fence starts signaled so the first wait on a fresh slot returns
/// immediately.
pub struct FrameSyncSet {
    /// Signaled when the acquired swapchain image is ready to be drawn.
    pub image_available: vk::Semaphore,
    /// Signaled when the slot's draw submission has finished.
    pub render_finished: vk::Semaphore,
    /// Signaled when the GPU has retired the slot's submission.
    pub in_flight: vk::Fence,
    device: Arc<ash::Device>,
}

impl FrameSyncSet {
    /// Create the semaphores and a signaled fence.
    pub fn new(device: Arc<ash::Device>) -> Result<Self> {
        // Build into a guard so a failure part-way releases what exists.
        let mut set = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            device,
        };
        unsafe {
            set.image_available = create_semaphore(&set.device)?;
            set.render_finished = create_semaphore(&set.device)?;
            set.in_flight = create_fence(&set.device, true)?;
        }
        Ok(set)
    }

    /// Block until the slot's previous submission has retired.
    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.in_flight], true, u64::MAX)?;
        }
        Ok(())
    }

    /// Return the fence to the unsignaled state ahead of a new submission.
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device.reset_fences(&[self.in_flight])?;
        }
        Ok(())
    }
}

impl Drop for FrameSyncSet {
    fn drop(&mut self) {
        unsafe {
            if self.in_flight != vk::Fence::null() {
                self.device.destroy_fence(self.in_flight, None);
            }
            if self.render_finished != vk::Semaphore::null() {
                self.device.destroy_semaphore(self.render_finished, None);
            }
            if self.image_available != vk::Semaphore::null() {
                self.device.destroy_semaphore(self.image_available, None);
            }
        }
    }
}

/// One [`FrameSyncSet`] per frame slot plus image-to-fence tracking.
///
/// `images_in_flight[i]` holds the fence of the slot that last submitted
/// work rendering into swapchain image `i`, so per-image resources are never
/// rewritten while an older submission still reads them.
pub struct FrameSyncManager {
    frames: Vec<FrameSyncSet>,
    images_in_flight: Vec<vk::Fence>,
    device: Arc<ash::Device>,
}

impl FrameSyncManager {
    /// Create `frames_in_flight` sync sets for a swapchain with `image_count` images.
    pub fn new(device: Arc<ash::Device>, frames_in_flight: usize, image_count: usize) -> Result<Self> {
        let frames = (0..frames_in_flight)
            .map(|_| FrameSyncSet::new(device.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            frames,
            images_in_flight: vec![vk::Fence::null(); image_count],
            device,
        })
    }

    /// Number of frame slots.
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Sync set for `slot`.
    pub fn frame(&self, slot: usize) -> &FrameSyncSet {
        &self.frames[slot % self.frames.len()]
    }

    /// Wait until no earlier submission still renders into `image_index`,
    /// then record that `slot` now owns it.
    pub fn claim_image(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let image = image_index as usize;
        let Some(&previous) = self.images_in_flight.get(image) else {
            return Err(GpuError::InvalidState(format!(
                "Image index {image_index} out of range for {} swapchain images",
                self.images_in_flight.len()
            )));
        };

        let own = self.frame(slot).in_flight;
        if previous != vk::Fence::null() && previous != own {
            unsafe {
                self.device.wait_for_fences(&[previous], true, u64::MAX)?;
            }
        }
        self.images_in_flight[image] = own;
        Ok(())
    }

    /// Forget image ownership after the swapchain was rebuilt.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight = vec![vk::Fence::null(); image_count];
    }
}
