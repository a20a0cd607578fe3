//! Framebuffers binding image views to render pass attachment slots.
//!
//! A [`Framebuffer`] pairs a render pass with the concrete [`ImageView`]s
//! that fill its attachment slots, at a fixed size. It keeps a
//! back-reference to each attachment's source image (plus the view's aspect)
//! so that the recording layer can transition every attachment into its
//! render layout, in attachment-index order, when the pass begins. The views
//! and images themselves remain caller-owned: destroying one before the
//! framebuffer's last use leaves the framebuffer logically invalid.

use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::image_view::ImageView;
use crate::render_pass::RenderPass;

/// One bound attachment: the source image and the aspect its view covers.
pub(crate) struct AttachmentSlot {
    pub(crate) image: BackRef<Image>,
    pub(crate) aspect: vk::ImageAspectFlags,
}

/// Concrete image views bound to a render pass's attachment slots.
pub struct Framebuffer {
    /// The device this framebuffer belongs to.
    device: BackRef<Device>,
    /// Vulkan framebuffer handle.
    framebuffer: vk::Framebuffer,
    /// The render pass this framebuffer was created against.
    render_pass: BackRef<RenderPass>,
    /// Bound attachments in slot order.
    attachments: Vec<AttachmentSlot>,
    /// Fixed size.
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Binds `attachments` to the slots of `render_pass` at `extent`.
    ///
    /// Attachment order must match the render pass's attachment order.
    ///
    /// # Errors
    ///
    /// Returns an error if the attachment count does not match the render
    /// pass, if the device has been destroyed, or if native creation fails.
    pub fn new(
        render_pass: &Arc<RenderPass>,
        attachments: &[&ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        if attachments.len() != render_pass.attachment_count() {
            return Err(Error::InvalidState(format!(
                "framebuffer binds {} attachment(s), render pass declares {}",
                attachments.len(),
                render_pass.attachment_count()
            )));
        }

        let device_ref = render_pass.device_ref();
        let device = device_ref.upgrade()?;

        let view_handles: Vec<vk::ImageView> =
            attachments.iter().map(|view| view.handle()).collect();

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(&view_handles)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };

        let attachments = attachments
            .iter()
            .map(|view| AttachmentSlot {
                image: view.image().clone(),
                aspect: view.aspect(),
            })
            .collect();

        debug!(
            "created framebuffer: {}x{}, {} attachment(s)",
            extent.width,
            extent.height,
            render_pass.attachment_count()
        );

        Ok(Self {
            device: device_ref,
            framebuffer,
            render_pass: BackRef::new(render_pass),
            attachments,
            extent,
        })
    }

    /// Returns the Vulkan framebuffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Returns the fixed size.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the render pass this framebuffer was created against.
    #[inline]
    pub fn render_pass(&self) -> &BackRef<RenderPass> {
        &self.render_pass
    }

    /// Bound attachments in slot order, for the recording layer.
    #[inline]
    pub(crate) fn attachment_slots(&self) -> &[AttachmentSlot] {
        &self.attachments
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(device) => unsafe {
                device.handle().destroy_framebuffer(self.framebuffer, None);
            },
            Err(_) => error!("framebuffer outlived its device; skipping native destruction"),
        }
        debug!(
            "destroyed framebuffer ({}x{})",
            self.extent.width, self.extent.height
        );
    }
}
