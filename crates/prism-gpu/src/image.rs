//! Image views, samplers and format queries.

use crate::error::{GpuError, Result};
use ash::vk;
use std::sync::Arc;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Whether a depth format also carries a stencil channel.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// Aspect flags for an image of `format`.
pub fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        f if has_stencil_component(f) => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// First candidate whose tiling features contain `features`.
///
/// `format_features` reports `(linear, optimal)` tiling features per format.
pub fn select_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut format_features: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        let properties = format_features(format);
        match tiling {
            vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

/// Best supported depth format among [`DEPTH_FORMAT_CANDIDATES`].
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn find_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format> {
    select_supported_format(
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        |format| instance.get_physical_device_format_properties(physical_device, format),
    )
    .ok_or(GpuError::ResourceCreation {
        what: "depth attachment (no supported depth format)",
        result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
    })
}

/// Owned 2D image view.
pub struct ImageView {
    view: vk::ImageView,
    device: Arc<ash::Device>,
}

impl ImageView {
    /// Create a single-mip, single-layer 2D view of `image`.
    pub fn new(
        device: Arc<ash::Device>,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = unsafe {
            device
                .create_image_view(&view_info, None)
                .map_err(GpuError::creation("image view"))?
        };

        Ok(Self { view, device })
    }

    /// Raw view handle.
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

/// Owned texture sampler.
pub struct Sampler {
    sampler: vk::Sampler,
    device: Arc<ash::Device>,
}

impl Sampler {
    /// Linear, repeating sampler with anisotropic filtering up to `max_anisotropy`.
    pub fn linear_repeat(device: Arc<ash::Device>, max_anisotropy: f32) -> Result<Self> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(max_anisotropy.max(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = unsafe {
            device
                .create_sampler(&info, None)
                .map_err(GpuError::creation("sampler"))?
        };

        Ok(Self { sampler, device })
    }

    /// Raw sampler handle.
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimal(features: vk::FormatFeatureFlags) -> vk::FormatProperties {
        vk::FormatProperties {
            optimal_tiling_features: features,
            ..Default::default()
        }
    }

    #[test]
    fn depth_selection_follows_preference_order() {
        let selected = select_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| {
                if format == vk::Format::D32_SFLOAT {
                    optimal(vk::FormatFeatureFlags::empty())
                } else {
                    optimal(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
                }
            },
        );
        assert_eq!(selected, Some(vk::Format::D32_SFLOAT_S8_UINT));
    }

    #[test]
    fn linear_tiling_checks_linear_features() {
        let selected = select_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| optimal(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT),
        );
        assert_eq!(selected, None);
    }

    #[test]
    fn stencil_formats_get_stencil_aspect() {
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
        assert_eq!(
            aspect_mask(vk::Format::D32_SFLOAT_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_mask(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_mask(vk::Format::R8G8B8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
    }
}
