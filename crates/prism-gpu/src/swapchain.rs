//! Swapchain construction, acquisition and presentation.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::image::ImageView;
use crate::surface::SurfaceSupport;
use ash::vk;
use std::sync::Arc;

/// Format/color-space pair picked whenever the surface offers it.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Pick the surface format.
///
/// A single `UNDEFINED` entry means the surface accepts any format, in which
/// case the preferred pair is used directly.
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    match available {
        [] => Err(GpuError::SwapchainCreation(
            "Surface reports no formats".to_string(),
        )),
        [only] if only.format == vk::Format::UNDEFINED => Ok(PREFERRED_SURFACE_FORMAT),
        formats => Ok(formats
            .iter()
            .copied()
            .find(|f| {
                f.format == PREFERRED_SURFACE_FORMAT.format
                    && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
            })
            .unwrap_or(formats[0])),
    }
}

/// Pick the present mode: mailbox, then immediate, then FIFO.
pub fn choose_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Pick the swapchain extent.
///
/// A defined `current_extent` is used verbatim; `u32::MAX` width means the
/// window decides and `requested` is clamped into the surface bounds.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: requested.width.clamp(min.width, max.width.max(min.width)),
        height: requested.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// Whether either side of `extent` is zero, as for a minimized window.
pub fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// One more than the minimum, capped by a nonzero maximum.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Result of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; a suboptimal swapchain is still usable.
    Acquired { image_index: u32, suboptimal: bool },
    /// Nothing was acquired, the swapchain must be rebuilt.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the swapchain should be rebuilt after this present.
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Map the raw result of `vkAcquireNextImageKHR`.
pub fn classify_acquire(result: ash::prelude::VkResult<(u32, bool)>) -> Result<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(GpuError::Presentation(e)),
    }
}

/// Map the raw result of `vkQueuePresentKHR`.
pub fn classify_present(result: ash::prelude::VkResult<bool>) -> Result<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(GpuError::Presentation(e)),
    }
}

/// Presentable images, their views and the parameters they were built with.
///
/// Views are released before the swapchain itself on drop.
pub struct Swapchain {
    image_views: Vec<ImageView>,
    images: Vec<vk::Image>,
    swapchain: vk::SwapchainKHR,
    loader: ash::khr::swapchain::Device,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Extent a swapchain built now for `requested` would have.
    pub fn surface_extent(gpu: &GpuContext, requested: vk::Extent2D) -> Result<vk::Extent2D> {
        let capabilities = gpu.surface()?.support(gpu.physical_device())?.capabilities;
        Ok(choose_extent(&capabilities, requested))
    }

    /// Build a swapchain on the context's surface.
    ///
    /// Fails with [`GpuError::SwapchainInvalid`] while the surface extent
    /// is zero. `requested` is the window's framebuffer size and only
    /// matters when the surface leaves the extent to the application. `old`
    /// is retired by the driver once the new swapchain exists; the caller
    /// still drops it.
    pub fn build(
        gpu: &GpuContext,
        requested: vk::Extent2D,
        old: Option<&Swapchain>,
    ) -> Result<Self> {
        let surface = gpu.surface()?;
        let SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        } = surface.support(gpu.physical_device())?;

        let extent = choose_extent(&capabilities, requested);
        if is_zero_extent(extent) {
            tracing::debug!("Surface extent is {}x{}, not building", extent.width, extent.height);
            return Err(GpuError::SwapchainInvalid);
        }
        let surface_format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes);
        let image_count = choose_image_count(&capabilities);
        let (sharing_mode, family_indices) = gpu.queue_families().sharing();

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |s| s.swapchain));

        let loader = surface.swapchain_loader().clone();
        let swapchain = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?
        };

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(GpuError::SwapchainCreation(e.to_string()));
            }
        };

        // Views are pushed into the guard as they are created, so a failure
        // part-way still releases the earlier ones and the swapchain.
        let mut built = Self {
            image_views: Vec::with_capacity(images.len()),
            images,
            swapchain,
            loader,
            surface_format,
            present_mode,
            extent,
        };
        let device: Arc<ash::Device> = gpu.device_arc();
        for &image in &built.images {
            built.image_views.push(ImageView::new(
                device.clone(),
                image,
                surface_format.format,
                vk::ImageAspectFlags::COLOR,
            )?);
        }

        tracing::info!(
            "Swapchain built: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            built.images.len(),
            surface_format.format,
            present_mode
        );

        Ok(built)
    }

    /// Raw swapchain handle.
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Presentable images, indexed by the values acquisition returns.
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One color view per image.
    pub fn image_views(&self) -> &[ImageView] {
        &self.image_views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.surface_format.color_space
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Acquire the next image, signaling `image_available` when it is ready.
    ///
    /// Waits without a timeout.
    pub fn acquire_next_image(&self, image_available: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            )
        };
        let outcome = classify_acquire(result)?;

        if let AcquireOutcome::Acquired { image_index, .. } = outcome {
            if image_index as usize >= self.images.len() {
                return Err(GpuError::InvalidState(format!(
                    "Presentation engine returned image {image_index} of {}",
                    self.images.len()
                )));
            }
        }
        Ok(outcome)
    }

    /// Queue `image_index` for presentation once `render_finished` is signaled.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        render_finished: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        let wait_semaphores = [render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        classify_present(unsafe { self.loader.queue_present(queue, &present_info) })
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.image_views.clear();
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn preferred_format_wins_wherever_it_appears() {
        let others = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        for position in 0..=others.len() {
            let mut formats = others.to_vec();
            formats.insert(position, PREFERRED_SURFACE_FORMAT);
            assert_eq!(
                choose_surface_format(&formats).unwrap(),
                PREFERRED_SURFACE_FORMAT
            );
        }
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap(), formats[0]);
    }

    #[test]
    fn undefined_format_means_any() {
        let formats = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(
            choose_surface_format(&formats).unwrap(),
            PREFERRED_SURFACE_FORMAT
        );
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn mailbox_is_chosen_regardless_of_order() {
        use vk::PresentModeKHR as M;
        let lists: [&[M]; 3] = [
            &[M::MAILBOX, M::FIFO, M::IMMEDIATE],
            &[M::FIFO, M::IMMEDIATE, M::MAILBOX],
            &[M::IMMEDIATE, M::MAILBOX],
        ];
        for modes in lists {
            assert_eq!(choose_present_mode(modes), M::MAILBOX);
        }
    }

    #[test]
    fn immediate_then_fifo_fallbacks() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE]), M::IMMEDIATE);
        assert_eq!(choose_present_mode(&[M::FIFO, M::FIFO_RELAXED]), M::FIFO);
        assert_eq!(choose_present_mode(&[]), M::FIFO);
    }

    #[test]
    fn defined_current_extent_is_used_verbatim() {
        let caps = capabilities((1280, 720), (1, 1), (4096, 4096));
        for requested in [extent(1, 1), extent(1280, 720), extent(9999, 3)] {
            let chosen = choose_extent(&caps, requested);
            assert_eq!(chosen, extent(1280, 720));
            // Feeding the result back in changes nothing
            assert_eq!(choose_extent(&caps, chosen), chosen);
        }
    }

    #[test]
    fn undefined_current_extent_is_clamped() {
        let caps = capabilities((u32::MAX, u32::MAX), (200, 200), (4000, 4000));
        assert_eq!(choose_extent(&caps, extent(100, 5000)), extent(200, 4000));
        assert_eq!(choose_extent(&caps, extent(800, 600)), extent(800, 600));
    }

    #[test]
    fn minimized_surface_extent_is_zero() {
        // A defined (0, 0) current extent wins over any requested size
        let caps = capabilities((0, 0), (0, 0), (4096, 4096));
        let chosen = choose_extent(&caps, extent(800, 600));
        assert_eq!(chosen, extent(0, 0));
        assert!(is_zero_extent(chosen));
        assert!(is_zero_extent(extent(800, 0)));
        assert!(!is_zero_extent(extent(1, 1)));
    }

    #[test]
    fn image_count_respects_bounds() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn acquire_results_are_classified() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquireOutcome::Acquired {
                image_index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Ok((0, true))).unwrap(),
            AcquireOutcome::Acquired {
                image_index: 0,
                suboptimal: true
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(GpuError::Presentation(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn present_results_are_classified() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Suboptimal);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::OutOfDate
        );
        assert!(matches!(
            classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(GpuError::Presentation(_))
        ));
        assert!(!PresentOutcome::Presented.needs_rebuild());
        assert!(PresentOutcome::Suboptimal.needs_rebuild());
        assert!(PresentOutcome::OutOfDate.needs_rebuild());
    }
}
