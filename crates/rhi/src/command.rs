//! Command pools and command buffers with implicit layout tracking.
//!
//! # Overview
//!
//! - [`CommandPool`] owns a recording arena tied to one queue family.
//! - [`CommandBuffer`] is the append-only recording surface, exclusively
//!   owned by the caller, stepping through
//!   `Initial → Recording → Executable` (and back to `Initial` via
//!   [`reset`](CommandBuffer::reset)).
//!
//! Operations that touch an image follow one rule: before recording the
//! operation, compare the image's recorded layout with the layout the
//! operation requires; if they differ, record a barrier transitioning
//! recorded → required, then store the required layout (and the recording
//! queue family) on the image. Layout bookkeeping is thereby implicit and
//! monotonic within one linear recording stream: an operation requiring the
//! layout the image is already in records nothing.
//!
//! The recorded layout is a property of the *image*, not of the command
//! buffer. Recording two command buffers against the same image without an
//! intervening submission and wait races on that metadata; serializing
//! access (record, submit, wait) is the caller's obligation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::buffer::Buffer;
//! use lumen_rhi::command::{CommandBuffer, CommandPool};
//! use lumen_rhi::image::Image;
//! use lumen_rhi::queue::Queue;
//! use lumen_rhi::vk;
//!
//! # fn example(
//! #     queue: Arc<Queue>,
//! #     staging: Arc<Buffer>,
//! #     texture: Arc<Image>,
//! # ) -> Result<(), lumen_rhi::Error> {
//! let pool = CommandPool::new(&queue, true)?;
//! let mut cmd = CommandBuffer::new(&pool)?;
//!
//! cmd.begin(true)?;
//! cmd.copy_buffer_to_image(&staging, &*texture)?;
//! cmd.image_memory_barrier(
//!     &*texture,
//!     vk::ImageAspectFlags::COLOR,
//!     vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
//! )?;
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
use tracing::{debug, error};

use crate::buffer::Buffer;
use crate::descriptor::DescriptorSet;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::framebuffer::Framebuffer;
use crate::image::ImageState;
use crate::pipeline::Pipeline;
use crate::queue::Queue;
use crate::render_pass::{RENDER_LAYOUT, RenderPass};
use crate::swapchain::Swapchain;

/// Recording lifecycle of a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    /// Freshly allocated or reset; ready for `begin`.
    Initial,
    /// Between `begin` and `end`; accepts recorded operations.
    Recording,
    /// Ended; ready for submission.
    Executable,
}

impl RecordingState {
    /// State after `begin`; `None` when the transition is illegal.
    fn on_begin(self) -> Option<Self> {
        (self == Self::Initial).then_some(Self::Recording)
    }

    /// State after `end`; `None` when the transition is illegal.
    fn on_end(self) -> Option<Self> {
        (self == Self::Recording).then_some(Self::Executable)
    }
}

/// Decides the transition an operation requiring `required` needs, given the
/// image's recorded layout. `None` means the image is already there.
fn plan_layout_transition(
    current: vk::ImageLayout,
    required: vk::ImageLayout,
) -> Option<(vk::ImageLayout, vk::ImageLayout)> {
    (current != required).then_some((current, required))
}

/// A recording arena tied to one queue family.
pub struct CommandPool {
    /// The device this pool belongs to.
    device: BackRef<Device>,
    /// The queue this pool records for.
    queue: BackRef<Queue>,
    /// Vulkan command pool handle.
    pool: vk::CommandPool,
    /// Queue family index of the owning queue.
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a command pool for `queue`'s family.
    ///
    /// With `resettable`, command buffers allocated from the pool can be
    /// individually reset and re-recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue's device has been destroyed or pool
    /// creation fails.
    pub fn new(queue: &Arc<Queue>, resettable: bool) -> Result<Arc<Self>> {
        let device = queue.device()?;

        let flags = if resettable {
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
        } else {
            vk::CommandPoolCreateFlags::empty()
        };

        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family_index())
            .flags(flags);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        debug!("command pool created for queue family {}", queue.family_index());

        Ok(Arc::new(Self {
            device: BackRef::new(&device),
            queue: BackRef::new(queue),
            pool,
            queue_family_index: queue.family_index(),
        }))
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Returns the queue family this pool records for.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns the queue this pool records for.
    #[inline]
    pub fn queue(&self) -> &BackRef<Queue> {
        &self.queue
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(device) => unsafe {
                device.handle().destroy_command_pool(self.pool, None);
            },
            Err(_) => error!("command pool outlived its device; skipping native destruction"),
        }
        debug!(
            "command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// An append-only command recording surface.
pub struct CommandBuffer {
    /// The device this buffer records against.
    device: BackRef<Device>,
    /// The pool this buffer was allocated from.
    pool: BackRef<CommandPool>,
    /// Vulkan command buffer handle.
    buffer: vk::CommandBuffer,
    /// Queue family of the owning pool; barriers name it on both sides.
    queue_family_index: u32,
    /// Recording lifecycle state.
    state: RecordingState,
}

impl CommandBuffer {
    /// Allocates a primary command buffer from `pool`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool's device has been destroyed or the
    /// allocation fails.
    pub fn new(pool: &Arc<CommandPool>) -> Result<Self> {
        let device = pool.queue().upgrade()?.device()?;

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.handle())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = unsafe { device.handle().allocate_command_buffers(&allocate_info)?[0] };

        Ok(Self {
            device: BackRef::new(&device),
            pool: BackRef::new(pool),
            buffer,
            queue_family_index: pool.queue_family_index(),
            state: RecordingState::Initial,
        })
    }

    /// Returns the Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Returns the current recording state.
    #[inline]
    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Fails unless the buffer has been `end`ed; used by queue submission.
    pub(crate) fn require_executable(&self) -> Result<()> {
        if self.state != RecordingState::Executable {
            return Err(Error::InvalidState(format!(
                "command buffer submitted in {:?} state, expected Executable",
                self.state
            )));
        }
        Ok(())
    }

    /// Upgrades the device after checking the buffer is recording.
    fn recording_device(&self) -> Result<Arc<Device>> {
        if self.state != RecordingState::Recording {
            return Err(Error::InvalidState(format!(
                "operation recorded in {:?} state, expected Recording",
                self.state
            )));
        }
        Ok(self.device.upgrade()?)
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording. `one_time_submit` marks the stream as submitted
    /// once and discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the buffer is in the `Initial`
    /// state.
    pub fn begin(&mut self, one_time_submit: bool) -> Result<()> {
        let next = self.state.on_begin().ok_or_else(|| {
            Error::InvalidState(format!("begin called in {:?} state", self.state))
        })?;
        let device = self.device.upgrade()?;

        let flags = if one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);

        unsafe {
            device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }

        self.state = next;
        Ok(())
    }

    /// Ends recording; the buffer becomes submittable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the buffer is recording.
    pub fn end(&mut self) -> Result<()> {
        let next = self.state.on_end().ok_or_else(|| {
            Error::InvalidState(format!("end called in {:?} state", self.state))
        })?;
        let device = self.device.upgrade()?;

        unsafe {
            device.handle().end_command_buffer(self.buffer)?;
        }

        self.state = next;
        Ok(())
    }

    /// Returns the buffer to the `Initial` state for re-recording.
    ///
    /// The pool must have been created resettable.
    ///
    /// # Errors
    ///
    /// Returns an error if the native reset fails.
    pub fn reset(&mut self) -> Result<()> {
        let device = self.device.upgrade()?;

        unsafe {
            device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }

        self.state = RecordingState::Initial;
        Ok(())
    }

    // =========================================================================
    // Binding and Drawing
    // =========================================================================

    /// Binds a graphics pipeline.
    pub fn bind_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let device = self.recording_device()?;
        unsafe {
            device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.handle(),
            );
        }
        Ok(())
    }

    /// Binds `buffer` as the vertex buffer at `binding`, from its start.
    pub fn bind_vertex_buffer(&self, binding: u32, buffer: &Buffer) -> Result<()> {
        let device = self.recording_device()?;
        let buffers = [buffer.handle()];
        let offsets = [0];
        unsafe {
            device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, binding, &buffers, &offsets);
        }
        Ok(())
    }

    /// Binds a descriptor set at set index `set` of `pipeline`'s layout.
    pub fn bind_descriptor_set(
        &self,
        pipeline: &Pipeline,
        set: u32,
        descriptor_set: &DescriptorSet,
    ) -> Result<()> {
        let device = self.recording_device()?;
        let sets = [descriptor_set.handle()];
        unsafe {
            device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout_handle(),
                set,
                &sets,
                &[],
            );
        }
        Ok(())
    }

    /// Writes `bytes` into the push-constant block at `offset`, visible to
    /// `stages`.
    pub fn push_constants(
        &self,
        pipeline: &Pipeline,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) -> Result<()> {
        let device = self.recording_device()?;
        unsafe {
            device.handle().cmd_push_constants(
                self.buffer,
                pipeline.layout_handle(),
                stages,
                offset,
                bytes,
            );
        }
        Ok(())
    }

    /// Records a non-indexed draw.
    pub fn draw(
        &self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        let device = self.recording_device()?;
        unsafe {
            device.handle().cmd_draw(
                self.buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
        Ok(())
    }

    // =========================================================================
    // Image State and Transfers
    // =========================================================================

    /// Transitions `image` into `target_layout`, from its recorded layout.
    ///
    /// Records nothing when the image is already in `target_layout`; the
    /// recorded layout and owning family are updated otherwise.
    pub fn image_memory_barrier(
        &self,
        image: &impl ImageState,
        aspect: vk::ImageAspectFlags,
        target_layout: vk::ImageLayout,
    ) -> Result<()> {
        let device = self.recording_device()?;
        self.transition_image(&device, image, aspect, target_layout);
        Ok(())
    }

    /// Clears `image` to `clear_color`, transitioning it to `GENERAL` first
    /// when needed.
    pub fn clear_color_image(&self, image: &impl ImageState, clear_color: [f32; 4]) -> Result<()> {
        let device = self.recording_device()?;
        self.transition_image(&device, image, vk::ImageAspectFlags::COLOR, vk::ImageLayout::GENERAL);

        let color = vk::ClearColorValue {
            float32: clear_color,
        };
        let range = full_subresource_range(vk::ImageAspectFlags::COLOR);

        unsafe {
            device.handle().cmd_clear_color_image(
                self.buffer,
                image.native_handle(),
                vk::ImageLayout::GENERAL,
                &color,
                &[range],
            );
        }
        Ok(())
    }

    /// Copies tightly packed texels from `buffer` into the whole of `image`,
    /// transitioning the image to `TRANSFER_DST_OPTIMAL` first when needed.
    pub fn copy_buffer_to_image(&self, buffer: &Buffer, image: &impl ImageState) -> Result<()> {
        let device = self.recording_device()?;
        self.transition_image(
            &device,
            image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        let extent = image.extent();
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: color_subresource_layers(),
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };

        unsafe {
            device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                buffer.handle(),
                image.native_handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    }

    /// Blits `image` into the swapchain's current ring image, stretched to
    /// the swapchain extent with nearest filtering (no aspect-ratio
    /// correction).
    ///
    /// The source transitions to `TRANSFER_SRC_OPTIMAL` through its tracked
    /// state. The swapchain image is presentation-engine owned and not
    /// tracked: it gets a raw `UNDEFINED → TRANSFER_DST_OPTIMAL` barrier.
    pub fn copy_image_to_swapchain(
        &self,
        image: &impl ImageState,
        swapchain: &Swapchain,
    ) -> Result<()> {
        let device = self.recording_device()?;
        self.transition_image(
            &device,
            image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );

        let target = swapchain.next_image();
        self.emit_image_barrier(
            &device,
            target,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        let src = image.extent();
        let dst = swapchain.extent();
        let region = vk::ImageBlit {
            src_subresource: color_subresource_layers(),
            src_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: src.width as i32,
                    y: src.height as i32,
                    z: 1,
                },
            ],
            dst_subresource: color_subresource_layers(),
            dst_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: dst.width as i32,
                    y: dst.height as i32,
                    z: 1,
                },
            ],
        };

        unsafe {
            device.handle().cmd_blit_image(
                self.buffer,
                image.native_handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                target,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::NEAREST,
            );
        }
        Ok(())
    }

    // =========================================================================
    // Render Passes
    // =========================================================================

    /// Begins `render_pass` against `framebuffer`.
    ///
    /// Every framebuffer attachment (color, depth, stencil) is transitioned
    /// to its render layout first, in attachment-index order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Expired`](crate::Error::Expired) when an attachment
    /// image has been destroyed.
    pub fn begin_render_pass(
        &self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
    ) -> Result<()> {
        let device = self.recording_device()?;

        for slot in framebuffer.attachment_slots() {
            let image = slot.image.upgrade()?;
            self.transition_image(&device, &*image, slot.aspect, RENDER_LAYOUT);
        }

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: framebuffer.extent(),
            })
            .clear_values(render_pass.clear_values());

        unsafe {
            device
                .handle()
                .cmd_begin_render_pass(self.buffer, &begin_info, vk::SubpassContents::INLINE);
        }
        Ok(())
    }

    /// Ends the current render pass.
    pub fn end_render_pass(&self) -> Result<()> {
        let device = self.recording_device()?;
        unsafe {
            device.handle().cmd_end_render_pass(self.buffer);
        }
        Ok(())
    }

    // =========================================================================
    // Barrier plumbing
    // =========================================================================

    /// Applies the implicit-transition rule to a tracked image.
    fn transition_image(
        &self,
        device: &Device,
        image: &dyn ImageState,
        aspect: vk::ImageAspectFlags,
        required: vk::ImageLayout,
    ) {
        if let Some((old, new)) = plan_layout_transition(image.current_layout(), required) {
            self.emit_image_barrier(device, image.native_handle(), aspect, old, new);
            image.set_current_layout(new);
            image.set_owning_family(self.queue_family_index);
        }
    }

    /// Records a layout-transition barrier with no ownership transfer.
    fn emit_image_barrier(
        &self,
        device: &Device,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(self.queue_family_index)
            .dst_queue_family_index(self.queue_family_index)
            .image(image)
            .subresource_range(full_subresource_range(aspect));

        unsafe {
            device.handle().cmd_pipeline_barrier(
                self.buffer,
                vk::PipelineStageFlags::ALL_GRAPHICS,
                vk::PipelineStageFlags::ALL_GRAPHICS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        let (Ok(device), Ok(pool)) = (self.device.upgrade(), self.pool.upgrade()) else {
            error!("command buffer outlived its pool; skipping native free");
            return;
        };
        unsafe {
            device
                .handle()
                .free_command_buffers(pool.handle(), &[self.buffer]);
        }
    }
}

/// Covers every mip level and array layer of one aspect.
fn full_subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

fn color_subresource_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_accepts_legal_transitions() {
        assert_eq!(
            RecordingState::Initial.on_begin(),
            Some(RecordingState::Recording)
        );
        assert_eq!(
            RecordingState::Recording.on_end(),
            Some(RecordingState::Executable)
        );
    }

    #[test]
    fn state_machine_rejects_illegal_transitions() {
        assert_eq!(RecordingState::Recording.on_begin(), None);
        assert_eq!(RecordingState::Executable.on_begin(), None);
        assert_eq!(RecordingState::Initial.on_end(), None);
        assert_eq!(RecordingState::Executable.on_end(), None);
    }

    #[test]
    fn transition_is_skipped_when_layout_matches() {
        assert_eq!(
            plan_layout_transition(vk::ImageLayout::GENERAL, vk::ImageLayout::GENERAL),
            None
        );
    }

    #[test]
    fn transition_uses_recorded_layout_as_source() {
        assert_eq!(
            plan_layout_transition(
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            ),
            Some((
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            ))
        );
    }

    #[test]
    fn upload_then_sample_plans_exactly_two_barriers() {
        // An image created undefined, copied into, then made sampleable:
        // dst-optimal first, sampling-ready second, nothing redundant.
        let mut recorded = vk::ImageLayout::UNDEFINED;
        let mut barriers = Vec::new();

        for required in [
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,     // copy_buffer_to_image
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, // explicit barrier
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, // repeat requirement
        ] {
            if let Some((old, new)) = plan_layout_transition(recorded, required) {
                barriers.push((old, new));
                recorded = new;
            }
        }

        assert_eq!(
            barriers,
            vec![
                (
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL
                ),
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                ),
            ]
        );
        assert_eq!(recorded, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn full_range_covers_all_levels_and_layers() {
        let range = full_subresource_range(vk::ImageAspectFlags::COLOR);
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.layer_count, vk::REMAINING_ARRAY_LAYERS);
    }
}
