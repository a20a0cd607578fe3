//! Vulkan resource-lifetime and command-recording layer.
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Instance and logical device creation with explicit queue requests
//! - Dedicated memory allocation for buffers and images
//! - Implicit image-layout tracking with automatic barrier insertion
//! - Render pass, framebuffer, and pipeline construction via builders
//! - Queue submission and swapchain presentation
//!
//! Every native handle wrapper records which object it logically depends on
//! through a [`lumen_core::BackRef`], so use-after-destroy of a parent is
//! reported as [`Error::Expired`] instead of touching freed driver state.
//! The layer never keeps a parent alive on a child's behalf: destroying
//! objects in dependency order remains the caller's contract.

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod image;
pub mod image_view;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod queue;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{Error, Result};

// Re-export ash types that users might need
pub use ash::vk;
