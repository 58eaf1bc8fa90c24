//! Per-swapchain-image framebuffers, command buffers and bindings.

use ash::vk;
use prism_gpu::descriptors::{write_combined_image_sampler, write_uniform_buffer};
use prism_gpu::memory::ImageDesc;
use prism_gpu::image::aspect_mask;
use prism_gpu::{
    CommandPool, DescriptorPool, DescriptorSetLayout, Framebuffer, GpuBuffer, GpuContext,
    GpuError, GpuImage, GraphicsPipeline, ImageView, RenderPass, Swapchain, TransferContext,
    DEVICE_LOCAL, HOST_VISIBLE_COHERENT,
};

use crate::error::Result;
use crate::mesh::MeshBuffers;
use crate::texture::Texture;
use crate::uniforms::UniformFrameData;

/// Background color behind the mesh.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Depth attachment shared by every framebuffer of a swapchain.
pub struct DepthBuffer {
    view: ImageView,
    image: GpuImage,
}

impl DepthBuffer {
    pub fn new(
        gpu: &GpuContext,
        transfer: &TransferContext,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut image = gpu.allocator().create_image(
            &ImageDesc {
                width: extent.width,
                height: extent.height,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            },
            DEVICE_LOCAL,
            "depth buffer",
        )?;
        let view = ImageView::new(
            gpu.device_arc(),
            image.handle(),
            format,
            aspect_mask(format),
        )?;
        transfer.transition(&mut image, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)?;

        Ok(Self { view, image })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }
}

/// Everything whose count or size follows the swapchain.
///
/// Index `i` of every per-image vector belongs to swapchain image `i`.
/// Dropping releases the depth buffer, then framebuffers, then command
/// buffers.
pub struct FrameResources {
    depth: DepthBuffer,
    framebuffers: Vec<Framebuffer>,
    command_pool: CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    descriptor_pool: DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    uniform_buffers: Vec<GpuBuffer>,
}

/// Inputs to [`FrameResources::new`] that outlive a single swapchain.
pub struct FrameInputs<'a> {
    pub gpu: &'a GpuContext,
    pub transfer: &'a TransferContext,
    pub swapchain: &'a Swapchain,
    pub render_pass: &'a RenderPass,
    pub pipeline: &'a GraphicsPipeline,
    pub descriptor_layout: &'a DescriptorSetLayout,
    pub mesh: &'a MeshBuffers,
    pub texture: &'a Texture,
    pub depth_format: vk::Format,
}

impl FrameResources {
    /// Build and record everything for `inputs.swapchain`.
    pub fn new(inputs: &FrameInputs<'_>) -> Result<Self> {
        let gpu = inputs.gpu;
        let extent = inputs.swapchain.extent();
        let image_count = inputs.swapchain.image_count();

        let depth = DepthBuffer::new(gpu, inputs.transfer, inputs.depth_format, extent)?;

        let framebuffers = inputs
            .swapchain
            .image_views()
            .iter()
            .map(|view| {
                Framebuffer::new(
                    gpu.device_arc(),
                    inputs.render_pass,
                    &[view.handle(), depth.view()],
                    extent,
                )
            })
            .collect::<prism_gpu::Result<Vec<_>>>()?;

        let uniform_buffers = (0..image_count)
            .map(|i| -> prism_gpu::Result<GpuBuffer> {
                let mut buffer = gpu.allocator().create_buffer(
                    UniformFrameData::SIZE,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    HOST_VISIBLE_COHERENT,
                    &format!("uniforms[{i}]"),
                )?;
                buffer.write(&[UniformFrameData::at(0.0, extent)])?;
                Ok(buffer)
            })
            .collect::<prism_gpu::Result<Vec<_>>>()?;

        let layout_sizes = prism_gpu::uniform_and_sampler_layout().pool_sizes(image_count as u32);
        let descriptor_pool =
            DescriptorPool::new(gpu.device_arc(), image_count as u32, &layout_sizes)?;
        let descriptor_sets = descriptor_pool.allocate(inputs.descriptor_layout, image_count)?;
        for (set, buffer) in descriptor_sets.iter().zip(&uniform_buffers) {
            unsafe {
                write_uniform_buffer(
                    gpu.device(),
                    *set,
                    0,
                    buffer.handle(),
                    0,
                    UniformFrameData::SIZE,
                );
                write_combined_image_sampler(
                    gpu.device(),
                    *set,
                    1,
                    inputs.texture.view(),
                    inputs.texture.sampler(),
                );
            }
        }

        let command_pool = CommandPool::new(
            gpu.device_arc(),
            gpu.queue_families().graphics,
            vk::CommandPoolCreateFlags::empty(),
        )?;
        let command_buffers = command_pool.allocate_command_buffers(image_count as u32)?;

        let resources = Self {
            depth,
            framebuffers,
            command_pool,
            command_buffers,
            descriptor_pool,
            descriptor_sets,
            uniform_buffers,
        };
        resources.record(inputs)?;

        tracing::debug!("Frame resources built for {image_count} images");
        Ok(resources)
    }

    /// Record the draw for every swapchain image.
    fn record(&self, inputs: &FrameInputs<'_>) -> Result<()> {
        let device = self.command_pool.device();
        let extent = inputs.swapchain.extent();
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        for ((&cmd, framebuffer), &set) in self
            .command_buffers
            .iter()
            .zip(&self.framebuffers)
            .zip(&self.descriptor_sets)
        {
            let begin_info = vk::CommandBufferBeginInfo::default();
            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(inputs.render_pass.handle())
                .framebuffer(framebuffer.handle())
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);

            unsafe {
                device
                    .begin_command_buffer(cmd, &begin_info)
                    .map_err(GpuError::from)?;
                device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    inputs.pipeline.handle(),
                );
                device.cmd_bind_vertex_buffers(cmd, 0, &[inputs.mesh.vertex_buffer()], &[0]);
                device.cmd_bind_index_buffer(
                    cmd,
                    inputs.mesh.index_buffer(),
                    0,
                    MeshBuffers::index_type(),
                );
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    inputs.pipeline.layout(),
                    0,
                    &[set],
                    &[],
                );
                device.cmd_draw_indexed(cmd, inputs.mesh.index_count(), 1, 0, 0, 0);
                device.cmd_end_render_pass(cmd);
                device.end_command_buffer(cmd).map_err(GpuError::from)?;
            }
        }

        Ok(())
    }

    /// Number of swapchain images covered.
    pub fn image_count(&self) -> usize {
        self.command_buffers.len()
    }

    /// Pre-recorded draw for `image_index`.
    pub fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.command_buffers.get(image_index as usize).copied()
    }

    /// Write `data` into the uniform buffer of `image_index`.
    ///
    /// The caller must ensure no submission still reads that buffer.
    pub fn write_uniforms(&mut self, image_index: u32, data: &UniformFrameData) -> Result<()> {
        let count = self.uniform_buffers.len();
        let buffer = self
            .uniform_buffers
            .get_mut(image_index as usize)
            .ok_or_else(|| {
                GpuError::InvalidState(format!(
                    "No uniform buffer for image {image_index} of {count}"
                ))
            })?;
        buffer.write(std::slice::from_ref(data))?;
        Ok(())
    }
}
