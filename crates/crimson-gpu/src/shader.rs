//! SPIR-V loading.

use crate::error::{GpuError, Result};
use std::io::{Read, Seek};
use std::path::Path;

/// Decode SPIR-V words from any seekable reader.
pub fn parse_spirv<R: Read + Seek>(reader: &mut R) -> Result<Vec<u32>> {
    ash::util::read_spv(reader).map_err(|e| GpuError::ShaderCompilation(e.to_string()))
}

/// Read a compiled SPIR-V module from disk.
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = std::fs::File::open(path).map_err(|e| {
        tracing::error!("Failed to open shader {}: {e}", path.display());
        GpuError::ShaderCompilation(format!("{}: {e}", path.display()))
    })?;
    parse_spirv(&mut file)
}
