//! Rendering layer for Prism.
//!
//! Builds the per-swapchain frame resources on top of `prism-gpu`, and drives
//! acquire/submit/present through a [`FrameScheduler`] that rebuilds the
//! swapchain when the presentation engine reports it stale.

pub mod error;
pub mod frame_resources;
pub mod mesh;
pub mod renderer;
pub mod scheduler;
pub mod shader;
pub mod texture;
pub mod uniforms;

pub use error::{RenderError, Result};
pub use frame_resources::{FrameInputs, FrameResources};
pub use mesh::{Mesh, MeshBuffers, Vertex};
pub use renderer::{Renderer, RendererAssets};
pub use scheduler::{FrameBackend, FramePhase, FrameScheduler, FrameStatus};
pub use shader::ShaderPair;
pub use texture::Texture;
pub use uniforms::UniformFrameData;
