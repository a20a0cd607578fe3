//! Render pass construction.
//!
//! # Overview
//!
//! A [`RenderPass`] describes an ordered set of attachment slots with their
//! load/store policy and clear values, plus the subpasses writing them.
//! It is assembled with a staged builder:
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::render_pass::{RenderPass, SubpassDescription};
//! use lumen_rhi::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), lumen_rhi::Error> {
//! let render_pass = RenderPass::builder(&device)
//!     .with_color_attachment(
//!         vk::Format::R32G32B32A32_SFLOAT,
//!         vk::AttachmentLoadOp::CLEAR,
//!         vk::AttachmentStoreOp::STORE,
//!         [0.0, 0.0, 0.0, 1.0],
//!     )
//!     .with_subpass(SubpassDescription::new().with_color_attachment(0))
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! Attachments render in `GENERAL` layout; the recording layer transitions
//! each framebuffer attachment into it before the pass begins, so attachment
//! descriptions declare `GENERAL` for both initial and final layout and the
//! tracked image state stays truthful across the pass.

use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{Error, Result};

/// Layout attachments are used in while a render pass executes.
pub(crate) const RENDER_LAYOUT: vk::ImageLayout = vk::ImageLayout::GENERAL;

/// Which attachment slots one subpass writes.
#[derive(Clone, Debug, Default)]
pub struct SubpassDescription {
    color_attachments: Vec<u32>,
    depth_attachment: Option<u32>,
}

impl SubpassDescription {
    /// Creates an empty subpass description.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a color attachment slot, by attachment index.
    pub fn with_color_attachment(mut self, index: u32) -> Self {
        self.color_attachments.push(index);
        self
    }

    /// Sets the depth/stencil attachment slot, by attachment index.
    pub fn with_depth_attachment(mut self, index: u32) -> Self {
        self.depth_attachment = Some(index);
        self
    }

    /// Returns the color attachment indices.
    #[inline]
    pub fn color_attachments(&self) -> &[u32] {
        &self.color_attachments
    }

    /// Returns the depth attachment index, if any.
    #[inline]
    pub fn depth_attachment(&self) -> Option<u32> {
        self.depth_attachment
    }
}

/// One attachment slot accumulated by the builder.
struct AttachmentInfo {
    format: vk::Format,
    load_op: vk::AttachmentLoadOp,
    store_op: vk::AttachmentStoreOp,
    clear_value: vk::ClearValue,
}

/// An ordered set of attachment slots and the subpasses writing them.
pub struct RenderPass {
    /// The device this render pass belongs to.
    device: BackRef<Device>,
    /// Vulkan render pass handle.
    render_pass: vk::RenderPass,
    /// Clear values in attachment order.
    clear_values: Vec<vk::ClearValue>,
    /// Number of attachment slots.
    attachment_count: usize,
    /// Color slots written by the first subpass; pipelines target it.
    subpass_color_count: u32,
}

impl RenderPass {
    /// Starts building a render pass on `device`.
    pub fn builder(device: &Arc<Device>) -> RenderPassBuilder {
        RenderPassBuilder {
            device: Arc::clone(device),
            attachments: Vec::new(),
            subpasses: Vec::new(),
        }
    }

    /// Returns the Vulkan render pass handle.
    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Returns the clear values in attachment order.
    #[inline]
    pub fn clear_values(&self) -> &[vk::ClearValue] {
        &self.clear_values
    }

    /// Returns the number of attachment slots.
    #[inline]
    pub fn attachment_count(&self) -> usize {
        self.attachment_count
    }

    #[inline]
    pub(crate) fn subpass_color_count(&self) -> u32 {
        self.subpass_color_count
    }

    pub(crate) fn device_ref(&self) -> BackRef<Device> {
        self.device.clone()
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(device) => unsafe {
                device.handle().destroy_render_pass(self.render_pass, None);
            },
            Err(_) => {
                tracing::error!("render pass outlived its device; skipping native destruction")
            }
        }
        debug!("destroyed render pass");
    }
}

/// Staged construction of a [`RenderPass`].
pub struct RenderPassBuilder {
    device: Arc<Device>,
    attachments: Vec<AttachmentInfo>,
    subpasses: Vec<SubpassDescription>,
}

impl RenderPassBuilder {
    /// Adds a color attachment slot.
    pub fn with_color_attachment(
        mut self,
        format: vk::Format,
        load_op: vk::AttachmentLoadOp,
        store_op: vk::AttachmentStoreOp,
        clear_color: [f32; 4],
    ) -> Self {
        self.attachments.push(AttachmentInfo {
            format,
            load_op,
            store_op,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
        });
        self
    }

    /// Adds a depth/stencil attachment slot.
    pub fn with_depth_stencil_attachment(
        mut self,
        format: vk::Format,
        load_op: vk::AttachmentLoadOp,
        store_op: vk::AttachmentStoreOp,
        clear_depth: f32,
        clear_stencil: u32,
    ) -> Self {
        self.attachments.push(AttachmentInfo {
            format,
            load_op,
            store_op,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: clear_depth,
                    stencil: clear_stencil,
                },
            },
        });
        self
    }

    /// Adds a subpass.
    pub fn with_subpass(mut self, subpass: SubpassDescription) -> Self {
        self.subpasses.push(subpass);
        self
    }

    /// Creates the render pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RenderPassBuildFailed`] when no attachment or
    /// subpass was added, when a subpass references an attachment index out
    /// of range, or when native creation fails.
    pub fn build(self) -> Result<Arc<RenderPass>> {
        validate_subpasses(self.attachments.len(), &self.subpasses)
            .map_err(Error::RenderPassBuildFailed)?;

        let vk_attachments: Vec<vk::AttachmentDescription> = self
            .attachments
            .iter()
            .map(|attachment| {
                vk::AttachmentDescription::default()
                    .format(attachment.format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(attachment.load_op)
                    .store_op(attachment.store_op)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(RENDER_LAYOUT)
                    .final_layout(RENDER_LAYOUT)
            })
            .collect();

        let color_refs: Vec<Vec<vk::AttachmentReference>> = self
            .subpasses
            .iter()
            .map(|subpass| {
                subpass
                    .color_attachments
                    .iter()
                    .map(|&index| vk::AttachmentReference {
                        attachment: index,
                        layout: RENDER_LAYOUT,
                    })
                    .collect()
            })
            .collect();

        let depth_refs: Vec<Option<vk::AttachmentReference>> = self
            .subpasses
            .iter()
            .map(|subpass| {
                subpass.depth_attachment.map(|index| vk::AttachmentReference {
                    attachment: index,
                    layout: RENDER_LAYOUT,
                })
            })
            .collect();

        let vk_subpasses: Vec<vk::SubpassDescription> = self
            .subpasses
            .iter()
            .enumerate()
            .map(|(index, _)| {
                let mut description = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&color_refs[index]);
                if let Some(depth) = depth_refs[index].as_ref() {
                    description = description.depth_stencil_attachment(depth);
                }
                description
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&vk_attachments)
            .subpasses(&vk_subpasses);

        let render_pass = unsafe {
            self.device
                .handle()
                .create_render_pass(&create_info, None)
                .map_err(|e| {
                    Error::RenderPassBuildFailed(format!("native creation rejected: {e:?}"))
                })?
        };

        info!(
            "render pass created with {} attachment(s), {} subpass(es)",
            self.attachments.len(),
            self.subpasses.len()
        );

        let clear_values = self
            .attachments
            .iter()
            .map(|attachment| attachment.clear_value)
            .collect();

        Ok(Arc::new(RenderPass {
            device: BackRef::new(&self.device),
            render_pass,
            clear_values,
            attachment_count: self.attachments.len(),
            subpass_color_count: self.subpasses[0].color_attachments.len() as u32,
        }))
    }
}

/// Checks that every subpass only references existing attachment slots.
fn validate_subpasses(
    attachment_count: usize,
    subpasses: &[SubpassDescription],
) -> std::result::Result<(), String> {
    if attachment_count == 0 {
        return Err("at least one attachment is required".to_string());
    }
    if subpasses.is_empty() {
        return Err("at least one subpass is required".to_string());
    }

    for (subpass_index, subpass) in subpasses.iter().enumerate() {
        let out_of_range = subpass
            .color_attachments
            .iter()
            .copied()
            .chain(subpass.depth_attachment)
            .find(|&index| index as usize >= attachment_count);

        if let Some(index) = out_of_range {
            return Err(format!(
                "subpass {subpass_index} references attachment {index}, \
                 but only {attachment_count} attachment(s) exist"
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subpass_accumulates_attachments_in_order() {
        let subpass = SubpassDescription::new()
            .with_color_attachment(0)
            .with_color_attachment(2)
            .with_depth_attachment(1);

        assert_eq!(subpass.color_attachments(), &[0, 2]);
        assert_eq!(subpass.depth_attachment(), Some(1));
    }

    #[test]
    fn validation_accepts_in_range_references() {
        let subpasses = [SubpassDescription::new()
            .with_color_attachment(0)
            .with_color_attachment(1)];
        assert!(validate_subpasses(2, &subpasses).is_ok());
    }

    #[test]
    fn validation_rejects_out_of_range_color_reference() {
        let subpasses = [SubpassDescription::new().with_color_attachment(3)];
        let message = validate_subpasses(2, &subpasses).unwrap_err();
        assert!(message.contains("attachment 3"));
    }

    #[test]
    fn validation_rejects_out_of_range_depth_reference() {
        let subpasses = [SubpassDescription::new()
            .with_color_attachment(0)
            .with_depth_attachment(5)];
        assert!(validate_subpasses(1, &subpasses).is_err());
    }

    #[test]
    fn validation_requires_attachments_and_subpasses() {
        assert!(validate_subpasses(0, &[SubpassDescription::new()]).is_err());
        assert!(validate_subpasses(1, &[]).is_err());
    }
}
