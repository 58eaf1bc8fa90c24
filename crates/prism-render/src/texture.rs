//! Sampled RGBA8 texture.

use ash::vk;
use image::RgbaImage;
use prism_gpu::memory::ImageDesc;
use prism_gpu::{GpuContext, GpuImage, ImageView, Sampler, TransferContext, DEVICE_LOCAL};
use std::path::Path;

use crate::error::{RenderError, Result};

/// Format textures are uploaded in.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Decode an image file into tightly packed RGBA8 pixels.
pub fn decode_rgba8(path: &Path) -> Result<RgbaImage> {
    let image = image::open(path).map_err(|source| RenderError::TextureLoad {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgba8())
}

/// A device-local texture in `SHADER_READ_ONLY_OPTIMAL` with its view and sampler.
pub struct Texture {
    sampler: Sampler,
    view: ImageView,
    image: GpuImage,
}

impl Texture {
    /// Load and upload the image at `path`.
    pub fn load(gpu: &GpuContext, transfer: &TransferContext, path: &Path) -> Result<Self> {
        let pixels = decode_rgba8(path)?;
        tracing::info!(
            "Loaded texture {} ({}x{})",
            path.display(),
            pixels.width(),
            pixels.height()
        );
        Self::from_rgba8(gpu, transfer, &pixels)
    }

    /// Upload already decoded pixels.
    pub fn from_rgba8(gpu: &GpuContext, transfer: &TransferContext, pixels: &RgbaImage) -> Result<Self> {
        let mut image = gpu.allocator().create_image(
            &ImageDesc {
                width: pixels.width(),
                height: pixels.height(),
                format: TEXTURE_FORMAT,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            },
            DEVICE_LOCAL,
            "texture",
        )?;
        transfer.upload_image(&mut image, pixels.as_raw())?;

        let view = ImageView::new(
            gpu.device_arc(),
            image.handle(),
            TEXTURE_FORMAT,
            vk::ImageAspectFlags::COLOR,
        )?;
        let sampler = Sampler::linear_repeat(
            gpu.device_arc(),
            gpu.capabilities().max_sampler_anisotropy,
        )?;

        Ok(Self {
            sampler,
            view,
            image,
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.image.extent()
    }
}
