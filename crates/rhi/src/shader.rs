//! Shader module management.
//!
//! The layer consumes precompiled SPIR-V blobs only; turning shader source
//! into SPIR-V is an external collaborator's job. A [`Shader`] wraps the
//! native module; the pipeline stage it serves is declared when it is handed
//! to the pipeline builder.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::shader::Shader;
//!
//! # fn example(device: Arc<Device>, spirv: &[u8]) -> Result<(), lumen_rhi::Error> {
//! let shader = Shader::from_spirv_bytes(&device, spirv)?;
//! # Ok(())
//! # }
//! ```

use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{Error, Result};

/// Entry point every shader module in this layer uses.
const ENTRY_POINT: &CStr = c"main";

/// A compiled shader module.
pub struct Shader {
    /// The device this module belongs to.
    device: BackRef<Device>,
    /// Vulkan shader module handle.
    module: vk::ShaderModule,
}

impl Shader {
    /// Creates a shader module from a SPIR-V blob.
    ///
    /// The blob is opaque to this layer beyond the 4-byte alignment the
    /// format requires; the driver rejects anything else at pipeline build.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShaderError`] for a misaligned blob, or a native
    /// error if module creation fails.
    pub fn from_spirv_bytes(device: &Arc<Device>, bytes: &[u8]) -> Result<Self> {
        let code = spirv_words(bytes)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        debug!("created shader module ({} bytes)", bytes.len());

        Ok(Self {
            device: BackRef::new(device),
            module,
        })
    }

    /// Creates a shader module from a SPIR-V file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShaderError`] if the file cannot be read, plus the
    /// errors of [`from_spirv_bytes`](Self::from_spirv_bytes).
    pub fn from_spirv_file(device: &Arc<Device>, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::ShaderError(format!("failed to read {path:?}: {e}")))?;
        Self::from_spirv_bytes(device, &bytes)
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Returns the entry point name.
    #[inline]
    pub fn entry_point(&self) -> &'static CStr {
        ENTRY_POINT
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(device) => unsafe {
                device.handle().destroy_shader_module(self.module, None);
            },
            Err(_) => error!("shader module outlived its device; skipping native destruction"),
        }
    }
}

/// Converts a SPIR-V byte blob into code words.
fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(Error::ShaderError(format!(
            "SPIR-V code must be a non-empty multiple of 4 bytes, got {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_little_endian() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        let words = spirv_words(&bytes).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
    }

    #[test]
    fn misaligned_blob_is_rejected() {
        assert!(spirv_words(&[0u8; 5]).is_err());
        assert!(spirv_words(&[0u8; 3]).is_err());
    }

    #[test]
    fn empty_blob_is_rejected() {
        assert!(spirv_words(&[]).is_err());
    }
}
