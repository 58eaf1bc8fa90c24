//! Host-to-device uploads and image layout transitions.

use crate::command::{begin_one_shot_commands, end_one_shot_commands, execute_one_shot, CommandPool};
use crate::error::{GpuError, Result};
use crate::image::aspect_mask;
use crate::memory::{GpuAllocator, GpuBuffer, GpuImage, HOST_VISIBLE_COHERENT};
use ash::vk;
use std::sync::Arc;

/// Access masks and pipeline stages of one supported layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Look up the barrier masks for an `old -> new` transition.
///
/// Only three transitions are supported: undefined to transfer-dst,
/// transfer-dst to shader-read-only, and undefined to depth-stencil
/// attachment. Anything else is rejected.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    use vk::ImageLayout as L;

    let masks = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        },
        _ => return Err(GpuError::UnsupportedLayoutTransition { old, new }),
    };

    Ok(masks)
}

/// Transient command pool and queue used for setup-time GPU work.
pub struct TransferContext {
    pool: CommandPool,
    queue: vk::Queue,
    allocator: GpuAllocator,
}

impl TransferContext {
    /// Create a transient pool on `queue_family`, submitting to `queue`.
    pub fn new(
        device: Arc<ash::Device>,
        allocator: GpuAllocator,
        queue_family: u32,
        queue: vk::Queue,
    ) -> Result<Self> {
        let pool = CommandPool::new(device, queue_family, vk::CommandPoolCreateFlags::TRANSIENT)?;
        Ok(Self {
            pool,
            queue,
            allocator,
        })
    }

    /// Copy `data` into `dst` through a transient host-visible staging buffer.
    ///
    /// `dst` must have been created with `TRANSFER_DST` usage. Blocks until
    /// the copy has completed; the staging buffer is freed afterwards.
    pub fn upload_via_staging(&self, dst: &GpuBuffer, data: &[u8]) -> Result<()> {
        let size = data.len() as u64;
        if size > dst.size() {
            return Err(GpuError::InvalidState(format!(
                "Upload of {size} bytes exceeds buffer of {} bytes",
                dst.size()
            )));
        }

        let mut staging = self.allocator.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            HOST_VISIBLE_COHERENT,
            "staging",
        )?;
        staging.write_bytes(0, data)?;

        self.copy_buffer(&staging, dst, size)?;
        tracing::trace!("Uploaded {size} bytes via staging");

        Ok(())
    }

    /// Copy `size` bytes from the start of `src` to the start of `dst`.
    pub fn copy_buffer(&self, src: &GpuBuffer, dst: &GpuBuffer, size: u64) -> Result<()> {
        let region = vk::BufferCopy::default().size(size);
        execute_one_shot(&self.pool, self.queue, |device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, src.handle(), dst.handle(), &[region]);
        })
    }

    /// Copy tightly packed pixel data from `src` into the whole of `image`.
    ///
    /// The image must be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(&self, src: &GpuBuffer, image: &GpuImage) -> Result<()> {
        if image.layout() != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            return Err(GpuError::InvalidState(format!(
                "Image must be in TRANSFER_DST_OPTIMAL for a copy, found {:?}",
                image.layout()
            )));
        }

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D::default())
            .image_extent(image.extent());

        execute_one_shot(&self.pool, self.queue, |device, cmd| unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                src.handle(),
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        })
    }

    /// Fill a freshly created sampled image with tightly packed `pixels`.
    ///
    /// Stages the pixels, moves the image to `TRANSFER_DST_OPTIMAL`, copies,
    /// and leaves the image in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn upload_image(&self, image: &mut GpuImage, pixels: &[u8]) -> Result<()> {
        let mut staging = self.allocator.create_buffer(
            pixels.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            HOST_VISIBLE_COHERENT,
            "image staging",
        )?;
        staging.write_bytes(0, pixels)?;

        self.transition(image, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        self.copy_buffer_to_image(&staging, image)?;
        self.transition(image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }

    /// Transition a raw image between two layouts.
    ///
    /// The masks are looked up before any command buffer is allocated, so an
    /// unsupported pair fails without touching the GPU.
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        format: vk::Format,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> Result<()> {
        let masks = transition_masks(old, new)?;

        let subresource = vk::ImageSubresourceRange::default()
            .aspect_mask(aspect_mask(format))
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource)
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        let commands = begin_one_shot_commands(&self.pool)?;
        unsafe {
            self.pool.device().cmd_pipeline_barrier(
                commands.command_buffer(),
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        end_one_shot_commands(commands, self.queue)
    }

    /// Transition an allocated image from its tracked layout to `new`.
    pub fn transition(&self, image: &mut GpuImage, new: vk::ImageLayout) -> Result<()> {
        self.transition_image_layout(image.handle(), image.format(), image.layout(), new)?;
        image.set_layout(new);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::ImageLayout as L;

    #[test]
    fn supported_transitions_have_expected_stages() {
        let upload = transition_masks(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(upload.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(upload.dst_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(upload.dst_access, vk::AccessFlags::TRANSFER_WRITE);

        let sample = transition_masks(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(sample.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(sample.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(sample.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        let depth = transition_masks(L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(depth.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert!(depth
            .dst_access
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn unlisted_transitions_are_rejected() {
        let unlisted = [
            (L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL),
            (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL),
            (L::TRANSFER_DST_OPTIMAL, L::UNDEFINED),
            (L::UNDEFINED, L::PRESENT_SRC_KHR),
            (L::UNDEFINED, L::UNDEFINED),
            (L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, L::UNDEFINED),
        ];
        for (old, new) in unlisted {
            match transition_masks(old, new) {
                Err(GpuError::UnsupportedLayoutTransition { old: o, new: n }) => {
                    assert_eq!((o, n), (old, new));
                }
                other => panic!("{old:?} -> {new:?} should be rejected, got {other:?}"),
            }
        }
    }
}
