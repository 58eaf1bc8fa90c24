//! Vulkan instance creation and adapter selection.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::queue::QueueFamilyIndices;
use ash::vk;
use std::ffi::{c_char, CStr, CString};

/// Validation layers to enable when validation is requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Device extensions the renderer cannot run without.
pub fn required_device_extensions(presentation: bool) -> Vec<&'static CStr> {
    let mut extensions = Vec::new();
    if presentation {
        extensions.push(ash::khr::swapchain::NAME);
    }
    extensions
}

/// Create a Vulkan instance.
///
/// `surface_extensions` are the platform surface extensions reported by the
/// windowing layer; pass an empty slice for a headless instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    surface_extensions: &[*const c_char],
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Initialization(format!("Invalid application name: {e}")))?;
    let engine_name = c"Prism";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_1);

    let mut extension_names: Vec<*const c_char> = surface_extensions.to_vec();
    if enable_validation {
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

    // Only request layers the loader actually knows about
    let layers: Vec<&CStr> = if enable_validation {
        let available = entry.enumerate_instance_layer_properties()?;
        validation_layers()
            .into_iter()
            .filter(|layer| {
                let found = available
                    .iter()
                    .any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == *layer);
                if !found {
                    tracing::warn!("Validation layer {:?} not available", layer);
                }
                found
            })
            .collect()
    } else {
        vec![]
    };

    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    entry.create_instance(&create_info, None).map_err(|e| match e {
        vk::Result::ERROR_EXTENSION_NOT_PRESENT | vk::Result::ERROR_LAYER_NOT_PRESENT => {
            GpuError::Initialization(format!("Instance creation failed: {e}"))
        }
        other => GpuError::Vulkan(other),
    })
}

/// The surface an adapter must be able to present to.
#[derive(Clone, Copy)]
pub struct PresentTarget<'a> {
    pub loader: &'a ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
}

/// An adapter that passed every suitability check.
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub capabilities: GpuCapabilities,
    pub queue_families: QueueFamilyIndices,
}

/// Select the best suitable physical device.
///
/// An adapter is suitable when it exposes a graphics queue family, a queue
/// family able to present to `target` (if any), the required device
/// extensions, at least one surface format and present mode, and anisotropic
/// sampling. Among suitable adapters the highest [`GpuCapabilities::score`]
/// wins; with `require_discrete` only discrete GPUs are considered.
///
/// # Safety
/// The instance and the surface in `target` must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    target: Option<PresentTarget<'_>>,
    require_discrete: bool,
) -> Result<SelectedDevice> {
    let devices = instance.enumerate_physical_devices()?;
    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }

    let extensions = required_device_extensions(target.is_some());
    let mut best: Option<SelectedDevice> = None;
    let mut queue_family_error = None;
    let mut rejected_for_other_reasons = false;

    for device in devices {
        let capabilities = GpuCapabilities::query(instance, device);

        if require_discrete && capabilities.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
            tracing::debug!("Skipping {}: not a discrete GPU", capabilities.device_name);
            rejected_for_other_reasons = true;
            continue;
        }

        let families = instance.get_physical_device_queue_family_properties(device);
        let queue_families = match QueueFamilyIndices::find(&families, |index| {
            target.map_or(true, |t| {
                t.loader
                    .get_physical_device_surface_support(device, index, t.surface)
                    .unwrap_or(false)
            })
        }) {
            Ok(indices) => indices,
            Err(e) => {
                tracing::debug!("Skipping {}: {e}", capabilities.device_name);
                queue_family_error = Some(e);
                continue;
            }
        };

        if !capabilities.meets_requirements(&extensions) {
            rejected_for_other_reasons = true;
            tracing::debug!(
                "Skipping {}: missing required extensions or features",
                capabilities.device_name
            );
            continue;
        }

        if let Some(t) = target {
            if !surface_adequate(t, device) {
                rejected_for_other_reasons = true;
                tracing::debug!(
                    "Skipping {}: no surface formats or present modes",
                    capabilities.device_name
                );
                continue;
            }
        }

        if best
            .as_ref()
            .map_or(true, |b| capabilities.score() > b.capabilities.score())
        {
            best = Some(SelectedDevice {
                physical_device: device,
                capabilities,
                queue_families,
            });
        }
    }

    match (best, queue_family_error) {
        (Some(selected), _) => Ok(selected),
        (None, Some(err)) if !rejected_for_other_reasons => Err(err),
        (None, _) => Err(GpuError::NoSuitableDevice),
    }
}

/// Whether the adapter reports at least one format and present mode for the surface.
unsafe fn surface_adequate(target: PresentTarget<'_>, device: vk::PhysicalDevice) -> bool {
    let formats = target
        .loader
        .get_physical_device_surface_formats(device, target.surface)
        .unwrap_or_default();
    let present_modes = target
        .loader
        .get_physical_device_surface_present_modes(device, target.surface)
        .unwrap_or_default();
    !formats.is_empty() && !present_modes.is_empty()
}
