//! Crate-wide error types.

use thiserror::Error;

/// Error type for all fallible operations in this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// Failed to load the Vulkan library
    #[error("failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// A back-referenced parent object was destroyed before its dependent
    #[error(transparent)]
    Expired(#[from] lumen_core::Expired),

    /// The native API rejected the logical device configuration
    #[error("device creation failed: {0}")]
    DeviceCreationFailed(String),

    /// The allocator rejected a memory request
    #[error("out of device memory")]
    OutOfDeviceMemory,

    /// No memory type satisfies the resource's requirements
    #[error("no memory type matches type bits {type_bits:#x} with {properties:?}")]
    NoSuitableMemoryType {
        /// Acceptable memory type bits from the resource's requirements.
        type_bits: u32,
        /// Properties the allocation was asked for.
        properties: ash::vk::MemoryPropertyFlags,
    },

    /// Host write attempted on an allocation without a mapped pointer
    #[error("allocation is not host-visible")]
    NotHostVisible,

    /// Render pass builder validation or native creation failure
    #[error("render pass build failed: {0}")]
    RenderPassBuildFailed(String),

    /// Pipeline builder validation or native creation failure
    #[error("pipeline build failed: {0}")]
    PipelineBuildFailed(String),

    /// Shader blob rejected before reaching the driver
    #[error("shader error: {0}")]
    ShaderError(String),

    /// Surface creation or query error
    #[error("surface error: {0}")]
    SurfaceError(String),

    /// Swapchain creation or presentation error
    #[error("swapchain error: {0}")]
    SwapchainError(String),

    /// An operation was issued in a state that does not allow it
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;
