//! GPU memory management.
//!
//! Buffers and images are created through [`GpuAllocator`]. Every resource
//! gets a dedicated allocation bound at offset 0, and the memory type is
//! checked against both the hardware type filter and the requested property
//! flags before and after allocation. Resources free themselves on drop.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

/// Property set for device-local resources (vertex, index, texture, depth).
pub const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

/// Property set for CPU-written resources (staging, uniforms).
pub const HOST_VISIBLE_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Index of the first memory type allowed by `type_filter` whose property
/// flags are a superset of `required`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(i, memory_type)| {
            type_filter & (1 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
        .ok_or(GpuError::NoSuitableMemoryType {
            type_filter,
            properties: required,
        })
}

/// Restrict `requirements` to the single memory type `memory_type`.
///
/// The allocator then has no room to prefer a different type than the one
/// [`find_memory_type`] picked.
pub fn pin_memory_type(
    requirements: vk::MemoryRequirements,
    memory_type: u32,
) -> vk::MemoryRequirements {
    vk::MemoryRequirements {
        memory_type_bits: requirements.memory_type_bits & (1 << memory_type),
        ..requirements
    }
}

/// Allocator location matching a set of requested property flags.
pub fn memory_location(required: vk::MemoryPropertyFlags) -> MemoryLocation {
    if required.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        if required.contains(vk::MemoryPropertyFlags::HOST_CACHED) {
            MemoryLocation::GpuToCpu
        } else {
            MemoryLocation::CpuToGpu
        }
    } else {
        MemoryLocation::GpuOnly
    }
}

struct AllocatorShared {
    allocator: Mutex<Option<Allocator>>,
    device: Arc<ash::Device>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl AllocatorShared {
    fn free(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().as_mut() {
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free GPU allocation: {e}");
            }
        }
    }
}

/// GPU memory allocator wrapper.
///
/// Cheap to clone; every clone and every resource it created share the same
/// underlying allocator.
#[derive(Clone)]
pub struct GpuAllocator {
    shared: Arc<AllocatorShared>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::Allocation(e.to_string()))?;

        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        Ok(Self {
            shared: Arc::new(AllocatorShared {
                allocator: Mutex::new(Some(allocator)),
                device,
                memory_properties,
            }),
        })
    }

    /// Memory heaps and types of the adapter.
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.shared.memory_properties
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
        linear: bool,
        allocation_scheme: AllocationScheme,
    ) -> Result<Allocation> {
        let memory_type = find_memory_type(
            &self.shared.memory_properties,
            requirements.memory_type_bits,
            properties,
        )?;

        let allocation = self
            .shared
            .allocator
            .lock()
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator already shut down".to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements: pin_memory_type(requirements, memory_type),
                location: memory_location(properties),
                linear,
                allocation_scheme,
            })
            .map_err(|e| GpuError::Allocation(format!("{name}: {e}")))?;

        let expected = self.shared.memory_properties.memory_types[memory_type as usize].property_flags;
        if allocation.memory_properties() != expected {
            self.shared.free(allocation);
            return Err(GpuError::NoSuitableMemoryType {
                type_filter: requirements.memory_type_bits,
                properties,
            });
        }

        tracing::trace!(
            "Allocated {} bytes for '{name}' in memory type {memory_type}",
            requirements.size
        );

        Ok(allocation)
    }

    /// Create a buffer with its own memory allocation.
    pub fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        if size == 0 {
            return Err(GpuError::InvalidState(format!(
                "Buffer '{name}' must not be empty"
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe {
            self.shared
                .device
                .create_buffer(&buffer_info, None)
                .map_err(GpuError::creation("buffer"))?
        };

        // Owns the handle from here on, so early returns clean up
        let mut buffer = GpuBuffer {
            buffer: handle,
            allocation: None,
            size,
            properties,
            shared: self.shared.clone(),
        };

        let requirements = unsafe { self.shared.device.get_buffer_memory_requirements(handle) };
        let allocation = self.allocate(
            name,
            requirements,
            properties,
            true,
            AllocationScheme::DedicatedBuffer(handle),
        )?;

        let bound = unsafe {
            self.shared
                .device
                .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            self.shared.free(allocation);
            return Err(GpuError::creation("buffer memory binding")(e));
        }
        buffer.allocation = Some(allocation);

        Ok(buffer)
    }

    /// Create a 2D, single-mip, single-layer, single-sample image.
    pub fn create_image(
        &self,
        desc: &ImageDesc,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<GpuImage> {
        let extent = vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: 1,
        };
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe {
            self.shared
                .device
                .create_image(&create_info, None)
                .map_err(GpuError::creation("image"))?
        };

        let mut image = GpuImage {
            image: handle,
            allocation: None,
            format: desc.format,
            extent,
            layout: vk::ImageLayout::UNDEFINED,
            shared: self.shared.clone(),
        };

        let requirements = unsafe { self.shared.device.get_image_memory_requirements(handle) };
        let allocation = self.allocate(
            name,
            requirements,
            properties,
            desc.tiling == vk::ImageTiling::LINEAR,
            AllocationScheme::DedicatedImage(handle),
        )?;

        let bound = unsafe {
            self.shared
                .device
                .bind_image_memory(handle, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            self.shared.free(allocation);
            return Err(GpuError::creation("image memory binding")(e));
        }
        image.allocation = Some(allocation);

        Ok(image)
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&self) {
        if let Some(allocator) = self.shared.allocator.lock().take() {
            drop(allocator);
        }
    }
}

/// Parameters of a 2D image.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
}

/// A GPU buffer with its allocation.
pub struct GpuBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
    properties: vk::MemoryPropertyFlags,
    shared: Arc<AllocatorShared>,
}

impl GpuBuffer {
    /// Raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes requested at creation.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Property flags requested at creation.
    pub fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    /// Write raw bytes at `offset` (must be host-visible).
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(
                "Data range too large for buffer".to_string(),
            ));
        }

        let mapped = self
            .allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Write typed data at the start of the buffer (must be host-visible).
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Read back the buffer contents (must be host-visible).
    pub fn read_bytes(&self) -> Result<&[u8]> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_slice)
            .map(|bytes| &bytes[..self.size as usize])
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.shared.free(allocation);
        }
    }
}

/// A GPU image with its allocation and tracked layout.
pub struct GpuImage {
    image: vk::Image,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent3D,
    layout: vk::ImageLayout,
    shared: Arc<AllocatorShared>,
}

impl GpuImage {
    /// Raw image handle.
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Image format.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Image extent (depth is always 1).
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    /// Layout after the last recorded transition.
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    pub(crate) fn set_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = layout;
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.shared.free(allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    #[test]
    fn picks_first_type_matching_filter_and_flags() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST_VISIBLE_COHERENT,
            HOST_VISIBLE_COHERENT | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(find_memory_type(&props, 0b111, DEVICE_LOCAL).unwrap(), 0);
        assert_eq!(
            find_memory_type(&props, 0b111, HOST_VISIBLE_COHERENT).unwrap(),
            1
        );
        // Type 1 excluded by the filter, type 2 is a superset
        assert_eq!(
            find_memory_type(&props, 0b101, HOST_VISIBLE_COHERENT).unwrap(),
            2
        );
    }

    #[test]
    fn lowest_superset_type_wins() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST_VISIBLE_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | HOST_VISIBLE_COHERENT,
            HOST_VISIBLE_COHERENT | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(find_memory_type(&props, 0b1110, HOST_VISIBLE_COHERENT).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b1100, HOST_VISIBLE_COHERENT).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b1101, DEVICE_LOCAL).unwrap(), 0);
        assert_eq!(find_memory_type(&props, 0b1100, DEVICE_LOCAL).unwrap(), 2);
    }

    #[test]
    fn pinned_requirements_allow_only_the_chosen_type() {
        let requirements = vk::MemoryRequirements {
            size: 256,
            alignment: 64,
            memory_type_bits: 0b0110,
        };
        let pinned = pin_memory_type(requirements, 1);
        assert_eq!(pinned.memory_type_bits, 0b0010);
        assert_eq!(pinned.size, 256);
        assert_eq!(pinned.alignment, 64);

        // A device-local host-visible type 2 is no longer reachable
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST_VISIBLE_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | HOST_VISIBLE_COHERENT,
        ]);
        let chosen = find_memory_type(&props, requirements.memory_type_bits, HOST_VISIBLE_COHERENT).unwrap();
        assert_eq!(pin_memory_type(requirements, chosen).memory_type_bits, 1 << chosen);
    }

    #[test]
    fn no_matching_type_is_an_error() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b1, HOST_VISIBLE_COHERENT).unwrap_err();
        assert!(matches!(err, GpuError::NoSuitableMemoryType { .. }));

        // Matching flags but filtered out
        let err = find_memory_type(&props, 0b10, DEVICE_LOCAL).unwrap_err();
        assert!(matches!(err, GpuError::NoSuitableMemoryType { .. }));
    }

    #[test]
    fn types_past_the_count_are_ignored() {
        let mut props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[1].property_flags = HOST_VISIBLE_COHERENT;
        assert!(find_memory_type(&props, u32::MAX, HOST_VISIBLE_COHERENT).is_err());
    }

    #[test]
    fn location_follows_requested_properties() {
        assert_eq!(memory_location(DEVICE_LOCAL), MemoryLocation::GpuOnly);
        assert_eq!(
            memory_location(HOST_VISIBLE_COHERENT),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            memory_location(HOST_VISIBLE_COHERENT | vk::MemoryPropertyFlags::HOST_CACHED),
            MemoryLocation::GpuToCpu
        );
    }
}
