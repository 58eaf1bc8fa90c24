//! Vulkan layer for the Prism renderer.
//!
//! This crate provides:
//! - Instance, adapter and logical device management
//! - GPU capability detection and validation message routing
//! - Memory allocation via gpu-allocator with explicit memory type checks
//! - Staged uploads and image layout transitions
//! - Swapchain handling and per-frame synchronization
//! - Render pass, pipeline and descriptor construction

pub mod capabilities;
pub mod command;
pub mod context;
pub mod debug;
pub mod descriptors;
pub mod error;
pub mod image;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod queue;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod transfer;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::CommandPool;
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{
    uniform_and_sampler_layout, write_combined_image_sampler, write_uniform_buffer,
    DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder,
};
pub use error::{GpuError, Result};
pub use image::{find_depth_format, ImageView, Sampler};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage, ImageDesc, DEVICE_LOCAL, HOST_VISIBLE_COHERENT};
pub use pipeline::{Framebuffer, GraphicsPipeline, GraphicsPipelineConfig, RenderPass};
pub use queue::QueueFamilyIndices;
pub use surface::{SurfaceContext, SurfaceSupport};
pub use swapchain::{is_zero_extent, AcquireOutcome, PresentOutcome, Swapchain};
pub use sync::{FrameSyncManager, FrameSyncSet, MAX_FRAMES_IN_FLIGHT};
pub use transfer::TransferContext;
