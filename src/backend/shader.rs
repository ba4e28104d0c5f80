// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. The bytecode is opaque to us: a
// word-aligned blob read from disk and handed to the driver as-is.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use crate::error::RendererError;

/// Read a SPIR-V file into words.
///
/// A missing, empty or mis-sized file is a fatal error: creating a pipeline
/// from empty bytecode violates the API contract.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read shader {:?}", path))?;
    let words = parse_spirv(path, &bytes)?;

    log::debug!("Loaded {:?} ({} words)", path, words.len());
    Ok(words)
}

/// Validate and convert raw bytes to SPIR-V words
pub fn parse_spirv(path: &Path, bytes: &[u8]) -> Result<Vec<u32>, RendererError> {
    let invalid = |reason: String| RendererError::InvalidShaderBytecode {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.is_empty() {
        return Err(invalid("file is empty".to_string()));
    }
    if bytes.len() % 4 != 0 {
        return Err(invalid(format!("{} bytes is not a multiple of 4", bytes.len())));
    }

    // read_spv handles alignment and endianness via the magic number
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| invalid(e.to_string()))
}

/// Shader module destroyed when dropped.
///
/// Pipelines copy what they need at creation, so modules only live for the
/// duration of a build.
pub struct ShaderModule<'a> {
    device: &'a ash::Device,
    pub module: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    pub fn new(device: &'a ash::Device, code: &[u32]) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let module = unsafe { device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self { device, module })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn header_bytes() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0000, 0, 8, 0]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect()
    }

    #[test]
    fn parses_word_aligned_bytecode() {
        let words = parse_spirv(Path::new("ok.spv"), &header_bytes()).unwrap();

        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn rejects_empty_bytecode() {
        let err = parse_spirv(Path::new("empty.spv"), &[]).unwrap_err();
        assert!(matches!(err, RendererError::InvalidShaderBytecode { .. }));
    }

    #[test]
    fn rejects_missized_bytecode() {
        let mut bytes = header_bytes();
        bytes.pop();

        let err = parse_spirv(Path::new("short.spv"), &bytes).unwrap_err();

        assert!(err.to_string().contains("not a multiple of 4"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_spirv(&dir.path().join("missing.spv")).is_err());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&header_bytes()).unwrap();

        let words = load_spirv(file.path()).unwrap();

        assert_eq!(words.len(), 5);
    }
}
