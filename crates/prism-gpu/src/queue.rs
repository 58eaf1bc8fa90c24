//! Queue family discovery and sharing-mode decisions.

use crate::error::{GpuError, Result};
use ash::vk;

/// Queue family indices used by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Locate graphics and present families among `families`.
    ///
    /// A single family that does both is preferred; otherwise the first
    /// graphics-capable and the first present-capable families are used.
    /// `supports_present` is asked about each family index.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Result<Self> {
        let mut graphics = None;
        let mut present = None;

        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            if family.queue_count == 0 {
                continue;
            }

            let is_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let is_present = supports_present(i);

            if is_graphics && is_present {
                return Ok(Self {
                    graphics: i,
                    present: i,
                });
            }
            if is_graphics && graphics.is_none() {
                graphics = Some(i);
            }
            if is_present && present.is_none() {
                present = Some(i);
            }
        }

        Ok(Self {
            graphics: graphics.ok_or(GpuError::MissingQueueFamily("graphics"))?,
            present: present.ok_or(GpuError::MissingQueueFamily("present"))?,
        })
    }

    /// Whether graphics and present work run on different families.
    pub fn is_split(&self) -> bool {
        self.graphics != self.present
    }

    /// Deduplicated family indices, one queue is created per entry.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_split() {
            vec![self.graphics, self.present]
        } else {
            vec![self.graphics]
        }
    }

    /// Sharing mode and family list for resources touched by both queues.
    ///
    /// Concurrent sharing across both families when they differ, exclusive
    /// otherwise (the family list is then empty).
    pub fn sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.is_split() {
            (vk::SharingMode::CONCURRENT, self.unique())
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        }
    }
}
