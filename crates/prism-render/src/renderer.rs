//! The textured-mesh renderer: owns every GPU object and drives frames.

use ash::vk;
use prism_gpu::{
    command, find_depth_format, is_zero_extent, uniform_and_sampler_layout, AcquireOutcome,
    DescriptorSetLayout, FrameSyncManager, GpuContext, GpuError, GraphicsPipeline,
    GraphicsPipelineConfig, PresentOutcome, RenderPass, Swapchain, TransferContext,
    MAX_FRAMES_IN_FLIGHT,
};
use std::path::PathBuf;

use crate::error::Result;
use crate::frame_resources::{FrameInputs, FrameResources};
use crate::mesh::{Mesh, MeshBuffers, Vertex};
use crate::scheduler::FrameBackend;
use crate::shader::ShaderPair;
use crate::texture::Texture;
use crate::uniforms::UniformFrameData;

/// Files the renderer reads at start-up.
#[derive(Debug, Clone)]
pub struct RendererAssets {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub texture: PathBuf,
}

/// Everything rebuilt together with the swapchain.
///
/// Fields drop top to bottom: frame resources, pipeline, render pass and
/// finally the swapchain with its views.
struct PresentationState {
    frames: FrameResources,
    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    swapchain: Swapchain,
}

/// Renders the demo mesh into a window surface.
///
/// Field order is destruction order; the context goes last.
pub struct Renderer {
    sync: FrameSyncManager,
    presentation: Option<PresentationState>,
    descriptor_layout: DescriptorSetLayout,
    mesh: MeshBuffers,
    texture: Texture,
    transfer: TransferContext,
    shaders: ShaderPair,
    depth_format: vk::Format,
    gpu: GpuContext,
}

impl Renderer {
    /// Load assets, upload the mesh and texture and build the swapchain.
    ///
    /// `gpu` must have been created for a window.
    pub fn new(gpu: GpuContext, assets: &RendererAssets, extent: vk::Extent2D) -> Result<Self> {
        let shaders = ShaderPair::load(&assets.vertex_shader, &assets.fragment_shader)?;

        let transfer = TransferContext::new(
            gpu.device_arc(),
            gpu.allocator().clone(),
            gpu.queue_families().graphics,
            gpu.graphics_queue(),
        )?;
        let mesh = MeshBuffers::upload(&gpu, &transfer, &Mesh::demo())?;
        let texture = Texture::load(&gpu, &transfer, &assets.texture)?;
        let descriptor_layout = uniform_and_sampler_layout().build(gpu.device_arc())?;
        let depth_format = unsafe { find_depth_format(gpu.instance(), gpu.physical_device())? };
        tracing::debug!("Depth format: {depth_format:?}");

        let mut renderer = Self {
            sync: FrameSyncManager::new(gpu.device_arc(), MAX_FRAMES_IN_FLIGHT, 0)?,
            presentation: None,
            descriptor_layout,
            mesh,
            texture,
            transfer,
            shaders,
            depth_format,
            gpu,
        };
        renderer.build_presentation(extent, None)?;

        Ok(renderer)
    }

    /// Build the swapchain and its dependents, retiring `old` if given.
    fn build_presentation(&mut self, extent: vk::Extent2D, old: Option<Swapchain>) -> Result<()> {
        let swapchain = Swapchain::build(&self.gpu, extent, old.as_ref())?;
        drop(old);

        let render_pass = RenderPass::new(self.gpu.device_arc(), swapchain.format(), self.depth_format)?;
        let pipeline = GraphicsPipeline::new(
            self.gpu.device_arc(),
            &GraphicsPipelineConfig {
                vertex_shader: self.shaders.vertex.clone(),
                fragment_shader: self.shaders.fragment.clone(),
                vertex_bindings: Vertex::binding_descriptions(),
                vertex_attributes: Vertex::attribute_descriptions(),
                extent: swapchain.extent(),
                ..Default::default()
            },
            &render_pass,
            &[self.descriptor_layout.handle()],
        )?;
        let frames = FrameResources::new(&FrameInputs {
            gpu: &self.gpu,
            transfer: &self.transfer,
            swapchain: &swapchain,
            render_pass: &render_pass,
            pipeline: &pipeline,
            descriptor_layout: &self.descriptor_layout,
            mesh: &self.mesh,
            texture: &self.texture,
            depth_format: self.depth_format,
        })?;

        self.sync.reset_images(swapchain.image_count());
        tracing::info!(
            "Swapchain ready: {}x{}, {} images, {:?}, {:?}",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.image_count(),
            swapchain.format(),
            swapchain.present_mode()
        );

        self.presentation = Some(PresentationState {
            frames,
            pipeline,
            render_pass,
            swapchain,
        });
        Ok(())
    }

    fn presentation(&self) -> Result<&PresentationState> {
        self.presentation
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("No swapchain".to_string()).into())
    }

    fn presentation_mut(&mut self) -> Result<&mut PresentationState> {
        self.presentation
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("No swapchain".to_string()).into())
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Current swapchain extent, if a swapchain exists.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.presentation.as_ref().map(|p| p.swapchain.extent())
    }

    /// Current swapchain image count, zero without a swapchain.
    pub fn image_count(&self) -> usize {
        self.presentation
            .as_ref()
            .map_or(0, |p| p.swapchain.image_count())
    }
}

impl FrameBackend for Renderer {
    fn frames_in_flight(&self) -> usize {
        self.sync.frames_in_flight()
    }

    fn wait_for_frame(&mut self, slot: usize) -> Result<()> {
        self.sync.frame(slot).wait()?;
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.sync.frame(slot).image_available;
        Ok(self.presentation()?.swapchain.acquire_next_image(semaphore)?)
    }

    fn update_uniforms(&mut self, slot: usize, image_index: u32, elapsed: f32) -> Result<()> {
        self.sync.claim_image(slot, image_index)?;
        let state = self.presentation_mut()?;
        let data = UniformFrameData::at(elapsed, state.swapchain.extent());
        state.frames.write_uniforms(image_index, &data)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let state = self.presentation()?;
        let cmd = state.frames.command_buffer(image_index).ok_or_else(|| {
            GpuError::InvalidState(format!("No command buffer for image {image_index}"))
        })?;
        let frame = self.sync.frame(slot);

        // Reset only once a submission is certain to follow
        frame.reset()?;
        unsafe {
            command::submit_command_buffers(
                self.gpu.device(),
                self.gpu.graphics_queue(),
                &[cmd],
                &[frame.image_available],
                &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                &[frame.render_finished],
                frame.in_flight,
            )?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let render_finished = self.sync.frame(slot).render_finished;
        Ok(self.presentation()?.swapchain.present(
            self.gpu.present_queue(),
            image_index,
            render_finished,
        )?)
    }

    fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> Result<vk::Extent2D> {
        self.gpu.wait_idle()?;

        // Keep the current state while the surface has nothing to present to
        let target = Swapchain::surface_extent(&self.gpu, extent)?;
        if is_zero_extent(target) {
            return Err(GpuError::SwapchainInvalid.into());
        }

        let old = self.presentation.take().map(|state| {
            let PresentationState {
                frames,
                pipeline,
                render_pass,
                swapchain,
            } = state;
            drop(frames);
            drop(pipeline);
            drop(render_pass);
            swapchain
        });

        self.build_presentation(extent, old)?;
        self.presentation().map(|state| state.swapchain.extent())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.gpu.wait_idle()?;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            tracing::error!("Failed to wait for device idle before teardown: {e}");
        }
        tracing::info!("Renderer shutting down");
    }
}
