//! Compiled SPIR-V loading.

use crate::error::{RenderError, Result};
use std::fs::File;
use std::path::Path;

/// Read a SPIR-V binary from `path` as 32-bit words.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let to_error = |source| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(to_error)?;
    let words = ash::util::read_spv(&mut file).map_err(to_error)?;
    tracing::debug!("Loaded shader {} ({} words)", path.display(), words.len());
    Ok(words)
}

/// Vertex and fragment stage binaries.
#[derive(Debug, Clone)]
pub struct ShaderPair {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderPair {
    /// Load both stages; either missing file is fatal.
    pub fn load(vertex: &Path, fragment: &Path) -> Result<Self> {
        Ok(Self {
            vertex: load_spirv(vertex)?,
            fragment: load_spirv(fragment)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_file(name: &str, bytes: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join("prism-render-shader-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn missing_file_is_a_shader_load_error() {
        let path = Path::new("definitely/not/here.spv");
        match load_spirv(path) {
            Err(RenderError::ShaderLoad { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected ShaderLoad, got {other:?}"),
        }
    }

    #[test]
    fn words_are_read_little_endian() {
        let mut bytes = 0x0723_0203u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let path = scratch_file("valid.spv", &bytes);

        let words = load_spirv(&path).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
    }

    #[test]
    fn truncated_binary_is_rejected() {
        let path = scratch_file("truncated.spv", &[0x03, 0x02, 0x23]);
        assert!(matches!(
            load_spirv(&path),
            Err(RenderError::ShaderLoad { .. })
        ));
    }

    #[test]
    fn pair_reports_the_missing_stage() {
        let vertex = scratch_file("pair.vert.spv", &0x0723_0203u32.to_le_bytes());
        let fragment = Path::new("missing/frag.spv");
        match ShaderPair::load(&vertex, fragment) {
            Err(RenderError::ShaderLoad { path, .. }) => assert_eq!(path, fragment),
            other => panic!("expected ShaderLoad, got {other:?}"),
        }
    }
}
