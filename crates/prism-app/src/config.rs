//! Application configuration.

use std::path::PathBuf;

use prism_render::RendererAssets;

/// Locations of the compiled shaders and the texture, relative to the
/// working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPaths {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub texture: PathBuf,
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
            texture: PathBuf::from("textures/texture.png"),
        }
    }
}

impl From<&AssetPaths> for RendererAssets {
    fn from(paths: &AssetPaths) -> Self {
        Self {
            vertex_shader: paths.vertex_shader.clone(),
            fragment_shader: paths.fragment_shader.clone(),
            texture: paths.texture.clone(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title, also reported to the driver as the application name.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    pub assets: AssetPaths,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Prism".to_string(),
            width: 800,
            height: 600,
            target_fps: None,
            validation: cfg!(debug_assertions),
            assets: AssetPaths::default(),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS. Zero removes the cap.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = (fps > 0).then_some(fps);
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_assets(mut self, assets: AssetPaths) -> Self {
        self.assets = assets;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn defaults_point_at_the_bundled_assets() {
        let config = AppConfig::default();
        assert_eq!(config.assets.vertex_shader, Path::new("shaders/vert.spv"));
        assert_eq!(config.assets.fragment_shader, Path::new("shaders/frag.spv"));
        assert_eq!(config.assets.texture, Path::new("textures/texture.png"));
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.target_fps, None);
        assert_eq!(config.validation, cfg!(debug_assertions));
    }

    #[test]
    fn builders_override_fields() {
        let config = AppConfig::new("Test")
            .with_size(1024, 768)
            .with_target_fps(60)
            .with_validation(true);
        assert_eq!(config.title, "Test");
        assert_eq!((config.width, config.height), (1024, 768));
        assert_eq!(config.target_fps, Some(60));
        assert!(config.validation);

        assert_eq!(config.with_target_fps(0).target_fps, None);
    }

    #[test]
    fn asset_paths_carry_over_to_the_renderer() {
        let paths = AssetPaths {
            texture: PathBuf::from("other.png"),
            ..AssetPaths::default()
        };
        let assets = RendererAssets::from(&paths);
        assert_eq!(assets.texture, Path::new("other.png"));
        assert_eq!(assets.vertex_shader, paths.vertex_shader);
    }
}
