//! Renderer error types.

use prism_gpu::GpuError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building or driving the renderer.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// A compiled shader blob is missing or malformed.
    #[error("Failed to load shader {}: {source}", path.display())]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The texture image could not be read or decoded.
    #[error("Failed to load texture {}: {source}", path.display())]
    TextureLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl RenderError {
    /// Whether a swapchain rebuild recovers from this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Gpu(e) if e.is_recoverable())
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;
