//! Host-visible synchronization primitives.
//!
//! The only synchronization object this layer needs is the [`Fence`]: each
//! [`Queue`](crate::queue::Queue) owns one to observe completion of its own
//! prior submission. There is no semaphore plumbing because recording and
//! submission are single-threaded per queue and presentation is sequenced by
//! the same fence.

use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::{debug, error};

use crate::device::Device;
use crate::error::Result;

/// Vulkan fence wrapper.
///
/// Fences are the GPU-to-CPU completion signal: the host blocks on the fence
/// to learn that previously submitted work has finished.
pub struct Fence {
    /// The device this fence belongs to.
    device: BackRef<Device>,
    /// Vulkan fence handle.
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - If true, creates the fence in the signaled state. A
    ///   fence that is waited on before the first submission that would
    ///   signal it must start signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: &Arc<Device>, signaled: bool) -> Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        debug!(
            "created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self {
            device: BackRef::new(device),
            fence,
        })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` (nanoseconds) expires.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait times out or fails, or if the owning
    /// device has been destroyed.
    pub fn wait(&self, timeout: u64) -> Result<()> {
        let device = self.device.upgrade()?;
        let fences = [self.fence];
        unsafe { device.handle().wait_for_fences(&fences, true, timeout)? };
        Ok(())
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be in use by an in-flight submission.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails or the owning device has been
    /// destroyed.
    pub fn reset(&self) -> Result<()> {
        let device = self.device.upgrade()?;
        let fences = [self.fence];
        unsafe { device.handle().reset_fences(&fences)? };
        Ok(())
    }

    /// Returns true if the fence is currently signaled. Non-blocking.
    pub fn is_signaled(&self) -> bool {
        let Ok(device) = self.device.upgrade() else {
            return false;
        };
        let result = unsafe { device.handle().get_fence_status(self.fence) };
        matches!(result, Ok(true))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(device) => unsafe {
                device.handle().destroy_fence(self.fence, None);
            },
            Err(_) => error!("fence outlived its device; skipping native destruction"),
        }
    }
}
