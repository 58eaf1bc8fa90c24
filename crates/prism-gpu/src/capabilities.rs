//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected adapter capabilities relevant to adapter selection.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Discrete, integrated, virtual, CPU...
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,
    /// Anisotropic sampling support
    pub supports_sampler_anisotropy: bool,
    /// Largest anisotropy a sampler may request
    pub max_sampler_anisotropy: f32,
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    /// Available device extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let features = instance.get_physical_device_features(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            supports_sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
            device_local_memory_mb,
            available_extensions,
        }
    }

    /// Whether every extension in `required` is available.
    pub fn supports_extensions(&self, required: &[&CStr]) -> bool {
        required.iter().all(|ext| {
            ext.to_str()
                .is_ok_and(|name| self.available_extensions.contains(name))
        })
    }

    /// Check the feature and extension requirements of the renderer.
    pub fn meets_requirements(&self, required_extensions: &[&CStr]) -> bool {
        self.supports_sampler_anisotropy && self.supports_extensions(required_extensions)
    }

    /// Selection score; higher is better.
    ///
    /// Discrete GPUs dominate, then integrated, then virtual. Within a class,
    /// each GB of device-local memory adds one point.
    pub fn score(&self) -> u64 {
        let class = match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
            _ => 1,
        };
        class + self.device_local_memory_mb / 1024
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(device_type: vk::PhysicalDeviceType, vram_mb: u64) -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Other(0),
            device_name: "test".to_string(),
            device_type,
            api_version: vk::API_VERSION_1_0,
            driver_version: 0,
            supports_sampler_anisotropy: true,
            max_sampler_anisotropy: 16.0,
            device_local_memory_mb: vram_mb,
            available_extensions: HashSet::from(["VK_KHR_swapchain".to_string()]),
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn discrete_beats_integrated_with_more_memory() {
        let discrete = caps(vk::PhysicalDeviceType::DISCRETE_GPU, 2048);
        let integrated = caps(vk::PhysicalDeviceType::INTEGRATED_GPU, 32 * 1024);
        assert!(discrete.score() > integrated.score());
    }

    #[test]
    fn requirements_need_anisotropy_and_extensions() {
        let mut c = caps(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        assert!(c.meets_requirements(&[ash::khr::swapchain::NAME]));
        assert!(!c.meets_requirements(&[ash::ext::debug_utils::NAME]));

        c.supports_sampler_anisotropy = false;
        assert!(!c.meets_requirements(&[ash::khr::swapchain::NAME]));
    }
}
