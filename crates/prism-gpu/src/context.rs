//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::debug::DebugMessenger;
use crate::error::{GpuError, Result};
use crate::instance::{
    create_instance, required_device_extensions, select_physical_device, PresentTarget,
    SelectedDevice,
};
use crate::memory::GpuAllocator;
use crate::queue::QueueFamilyIndices;
use crate::surface::{create_surface, SurfaceContext};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
///
/// Everything built from the context (swapchains, buffers, pipelines) must be
/// dropped before it.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    surface: Option<SurfaceContext>,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: GpuAllocator,
    queue_families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared device handle for RAII wrappers.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        self.device.clone()
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Graphics and present family indices.
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue. Same handle as the graphics queue when the
    /// families coincide.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get the GPU allocator.
    pub fn allocator(&self) -> &GpuAllocator {
        &self.allocator
    }

    /// The presentation surface, or `InvalidState` for a headless context.
    pub fn surface(&self) -> Result<&SurfaceContext> {
        self.surface
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Context was created without a surface".into()))
    }

    /// Validation messages received so far as `(errors, warnings)`, if
    /// validation is enabled.
    pub fn validation_counts(&self) -> Option<(u64, u64)> {
        self.debug
            .as_ref()
            .map(|d| (d.sink().error_count(), d.sink().warning_count()))
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            // This frees all VkDeviceMemory allocations
            self.allocator.shutdown();

            self.device.destroy_device(None);
            drop(self.surface.take());
            if let Some((errors, warnings)) = self.validation_counts() {
                tracing::debug!("Validation totals: {errors} errors, {warnings} warnings");
            }
            drop(self.debug.take());
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    require_discrete: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Prism".to_string(),
            enable_validation: cfg!(debug_assertions),
            require_discrete: false,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Only accept discrete GPUs instead of merely preferring them.
    pub fn require_discrete(mut self, require: bool) -> Self {
        self.require_discrete = require;
        self
    }

    /// Build a context without a surface, for offscreen work.
    pub fn build(self) -> Result<GpuContext> {
        let entry = load_entry()?;
        let instance = unsafe { create_instance(&entry, &self.app_name, &[], self.enable_validation) }?;
        let mut partial = PartialInstance::new(instance);
        partial.debug = self.debug_messenger(&entry, partial.instance()?)?;

        let selected =
            unsafe { select_physical_device(partial.instance()?, None, self.require_discrete) }?;
        self.finish(entry, partial, selected, false)
    }

    /// Build a context presenting to `window`.
    pub fn build_for_window<W>(self, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let entry = load_entry()?;

        let display = window
            .display_handle()
            .map_err(|e| GpuError::Initialization(format!("Failed to get display handle: {e}")))?;
        let surface_extensions: &[*const c_char] =
            ash_window::enumerate_required_extensions(display.as_raw()).map_err(|e| {
                GpuError::Initialization(format!("Surface extensions unavailable: {e}"))
            })?;

        let instance = unsafe {
            create_instance(
                &entry,
                &self.app_name,
                surface_extensions,
                self.enable_validation,
            )
        }?;
        let mut partial = PartialInstance::new(instance);
        partial.debug = self.debug_messenger(&entry, partial.instance()?)?;

        let loader = ash::khr::surface::Instance::new(&entry, partial.instance()?);
        let surface = unsafe { create_surface(&entry, partial.instance()?, window) }?;
        partial.surface = Some((loader, surface));

        let selected = {
            let (loader, surface) = partial
                .surface
                .as_ref()
                .ok_or_else(|| GpuError::InvalidState("Surface missing".into()))?;
            let target = PresentTarget {
                loader,
                surface: *surface,
            };
            unsafe { select_physical_device(partial.instance()?, Some(target), self.require_discrete) }?
        };

        self.finish(entry, partial, selected, true)
    }

    fn debug_messenger(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<Option<DebugMessenger>> {
        if !self.enable_validation {
            return Ok(None);
        }
        let messenger = unsafe { DebugMessenger::new(entry, instance, self.app_name.clone()) }?;
        Ok(Some(messenger))
    }

    fn finish(
        self,
        entry: ash::Entry,
        mut partial: PartialInstance,
        selected: SelectedDevice,
        presentation: bool,
    ) -> Result<GpuContext> {
        let SelectedDevice {
            physical_device,
            capabilities,
            queue_families,
        } = selected;
        tracing::info!("Selected GPU: {}", capabilities.summary());

        let device = unsafe {
            create_device(
                partial.instance()?,
                physical_device,
                &queue_families,
                presentation,
            )
        }?;
        let device = Arc::new(device);
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let allocator =
            match unsafe { GpuAllocator::new(partial.instance()?, device.clone(), physical_device) } {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe { device.destroy_device(None) };
                    return Err(e);
                }
            };

        let (instance, debug, surface) = partial.disarm()?;
        let surface = surface.map(|(loader, surface)| {
            let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
            SurfaceContext::new(surface, loader, swapchain_loader)
        });

        if queue_families.is_split() {
            tracing::info!(
                "Graphics family {} and present family {} differ, using concurrent sharing",
                queue_families.graphics,
                queue_families.present
            );
        }

        Ok(GpuContext {
            entry,
            instance,
            debug,
            surface,
            physical_device,
            device,
            capabilities,
            allocator,
            queue_families,
            graphics_queue,
            present_queue,
        })
    }
}

fn load_entry() -> Result<ash::Entry> {
    unsafe { ash::Entry::load() }
        .map_err(|e| GpuError::Initialization(format!("Failed to load Vulkan: {e}")))
}

/// Instance-level objects created before the device exists.
///
/// Releases whatever it holds if construction bails out early.
struct PartialInstance {
    instance: Option<ash::Instance>,
    debug: Option<DebugMessenger>,
    surface: Option<(ash::khr::surface::Instance, vk::SurfaceKHR)>,
}

impl PartialInstance {
    fn new(instance: ash::Instance) -> Self {
        Self {
            instance: Some(instance),
            debug: None,
            surface: None,
        }
    }

    fn instance(&self) -> Result<&ash::Instance> {
        self.instance
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Instance already released".into()))
    }

    /// Hand the instance-level objects over to the finished context.
    #[allow(clippy::type_complexity)]
    fn disarm(
        mut self,
    ) -> Result<(
        ash::Instance,
        Option<DebugMessenger>,
        Option<(ash::khr::surface::Instance, vk::SurfaceKHR)>,
    )> {
        let instance = self
            .instance
            .take()
            .ok_or_else(|| GpuError::InvalidState("Instance already released".into()))?;
        Ok((instance, self.debug.take(), self.surface.take()))
    }
}

impl Drop for PartialInstance {
    fn drop(&mut self) {
        if let Some((loader, surface)) = self.surface.take() {
            unsafe { loader.destroy_surface(surface, None) };
        }
        drop(self.debug.take());
        if let Some(instance) = self.instance.take() {
            unsafe { instance.destroy_instance(None) };
        }
    }
}

/// Create the logical device with one queue per unique family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
    presentation: bool,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const c_char> = required_device_extensions(presentation)
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(|e| match e {
            vk::Result::ERROR_EXTENSION_NOT_PRESENT | vk::Result::ERROR_FEATURE_NOT_PRESENT => {
                GpuError::Initialization(format!("Device creation failed: {e}"))
            }
            other => GpuError::Vulkan(other),
        })
}
