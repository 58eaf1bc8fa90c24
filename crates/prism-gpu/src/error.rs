//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Everything except [`GpuError::SwapchainInvalid`] is fatal: the frame
/// scheduler absorbs swapchain invalidation by rebuilding, and every other
/// variant unwinds to the application's run loop.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Raw Vulkan error with no more specific classification.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Missing API support, layer or extension at startup.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// No adapter satisfies the device requirements.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Graphics or present support could not be located among queue families.
    #[error("Missing queue family: {0}")]
    MissingQueueFamily(&'static str),

    /// Buffer, image, view, sampler, framebuffer or descriptor creation failed.
    #[error("Failed to create {what}: {result}")]
    ResourceCreation {
        what: &'static str,
        result: vk::Result,
    },

    /// No memory type matches both the type filter and the requested properties.
    #[error("No memory type matches filter {type_filter:#b} with properties {properties:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    Allocation(String),

    /// The requested image layout transition is not in the transition table.
    #[error("Unsupported image layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// The swapchain no longer matches the surface and must be rebuilt.
    #[error("Swapchain is out of date")]
    SwapchainInvalid,

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Acquire or present returned a non-recoverable result.
    #[error("Presentation failed: {0}")]
    Presentation(vk::Result),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl GpuError {
    /// Whether the error is recovered by rebuilding the swapchain.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SwapchainInvalid)
    }

    pub(crate) fn creation(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::ResourceCreation { what, result }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_swapchain_invalid_is_recoverable() {
        assert!(GpuError::SwapchainInvalid.is_recoverable());
        assert!(!GpuError::NoSuitableDevice.is_recoverable());
        assert!(!GpuError::Presentation(vk::Result::ERROR_DEVICE_LOST).is_recoverable());
    }

    #[test]
    fn creation_helper_names_the_resource() {
        let err = GpuError::creation("sampler")(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(err.to_string().starts_with("Failed to create sampler"));
    }
}
