//! Queue acquisition, submission, and completion waits.
//!
//! # Overview
//!
//! A [`Queue`] is an ordered channel for recorded command sequences. Each
//! queue owns a private submission fence, created signaled, which
//! [`submit`](Queue::submit) resets and the device signals on completion;
//! [`wait_until_idle`](Queue::wait_until_idle) blocks the calling thread on
//! it. Submission is the only path that transfers recorded work to the
//! device.
//!
//! Submission is not re-entrant: pipelining a second submission on the same
//! queue before the first completes leaves the fence meaningless, so callers
//! must interleave `submit` and `wait_until_idle` (or widen to one queue per
//! stream).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::command::{CommandBuffer, CommandPool};
//! use lumen_rhi::queue::Queue;
//!
//! # fn example(queue: Arc<Queue>) -> Result<(), lumen_rhi::Error> {
//! let pool = CommandPool::new(&queue, true)?;
//! let mut cmd = CommandBuffer::new(&pool)?;
//!
//! cmd.begin(true)?;
//! // ... record ...
//! cmd.end()?;
//!
//! queue.submit(&cmd)?;
//! queue.wait_until_idle()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::debug;

use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::Result;
use crate::sync::Fence;

/// A command-submission queue with its private completion fence.
pub struct Queue {
    /// The device this queue belongs to.
    device: BackRef<Device>,
    /// Vulkan queue handle.
    queue: vk::Queue,
    /// Queue family this queue was created in.
    family_index: u32,
    /// Signals completion of this queue's most recent submission.
    submission_fence: Fence,
}

impl Queue {
    /// Retrieves a queue created with the device. Called through
    /// [`Device::queue`].
    pub(crate) fn new(device: &Arc<Device>, family_index: u32, index: u32) -> Result<Arc<Self>> {
        let queue = unsafe { device.handle().get_device_queue(family_index, index) };

        // Signaled so the first wait_until_idle returns immediately.
        let submission_fence = Fence::new(device, true)?;

        debug!("queue {index} retrieved from family {family_index}");

        Ok(Arc::new(Self {
            device: BackRef::new(device),
            queue,
            family_index,
            submission_fence,
        }))
    }

    /// Returns the Vulkan queue handle.
    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.queue
    }

    /// Returns the queue family index.
    #[inline]
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Returns the device this queue belongs to.
    ///
    /// # Errors
    ///
    /// Returns an error if the device has been destroyed.
    pub fn device(&self) -> Result<Arc<Device>> {
        Ok(self.device.upgrade()?)
    }

    /// Submits a recorded command buffer.
    ///
    /// Resets the submission fence and hands the buffer to the device; the
    /// fence signals when execution completes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`](crate::Error::InvalidState) when the
    /// buffer has not been [`end`](CommandBuffer::end)ed, or an error if the
    /// native submission fails.
    pub fn submit(&self, command_buffer: &CommandBuffer) -> Result<()> {
        command_buffer.require_executable()?;

        let device = self.device.upgrade()?;
        self.submission_fence.reset()?;

        let buffers = [command_buffer.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);

        unsafe {
            device
                .handle()
                .queue_submit(self.queue, &[submit_info], self.submission_fence.handle())?;
        }

        Ok(())
    }

    /// Blocks the calling thread until the last submission completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the fence wait fails.
    pub fn wait_until_idle(&self) -> Result<()> {
        self.submission_fence.wait(u64::MAX)
    }
}
