//! Descriptor set layouts and binding tables.
//!
//! # Overview
//!
//! - [`DescriptorSetLayout`] is a plain accumulator describing one set's
//!   bindings; the pipeline builder turns it into native layouts and sizes a
//!   descriptor pool from it.
//! - [`DescriptorSet`] is a mutable binding table allocated from a
//!   pipeline's pool via
//!   [`Pipeline::allocate_descriptor_set`](crate::pipeline::Pipeline::allocate_descriptor_set).
//!   Its setters issue immediate descriptor writes; the command buffer
//!   references the set at bind time.
//!
//! # Example
//!
//! ```no_run
//! use lumen_rhi::descriptor::DescriptorSetLayout;
//! use lumen_rhi::vk;
//!
//! // One combined image sampler visible to the fragment stage.
//! let layout = DescriptorSetLayout::new().with_binding(
//!     vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
//!     1,
//!     vk::ShaderStageFlags::FRAGMENT,
//! );
//! assert_eq!(layout.bindings().len(), 1);
//! ```

use ash::vk;
use lumen_core::BackRef;
use tracing::error;

use crate::buffer::Buffer;
use crate::device::Device;
use crate::error::Result;
use crate::image_view::ImageView;
use crate::pipeline::Pipeline;
use crate::sampler::Sampler;

/// One binding slot in a descriptor set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutBinding {
    /// Kind of resource bound at this slot.
    pub descriptor_type: vk::DescriptorType,
    /// Number of descriptors in the slot (arrays).
    pub count: u32,
    /// Shader stages that can see the slot.
    pub stages: vk::ShaderStageFlags,
}

/// Accumulated layout of one descriptor set.
///
/// Binding indices are assigned by insertion order.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetLayout {
    bindings: Vec<LayoutBinding>,
}

impl DescriptorSetLayout {
    /// Creates an empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a binding slot; its index is the number of slots added
    /// before it.
    pub fn with_binding(
        mut self,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(LayoutBinding {
            descriptor_type,
            count,
            stages,
        });
        self
    }

    /// Returns the accumulated bindings in index order.
    #[inline]
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    /// Builds the native binding descriptions.
    pub(crate) fn vk_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .iter()
            .enumerate()
            .map(|(index, binding)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(index as u32)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
            })
            .collect()
    }
}

/// A mutable binding table mapping slot indices to concrete resources.
///
/// Owned by the caller; freed back to the pipeline's pool on drop.
pub struct DescriptorSet {
    device: BackRef<Device>,
    pipeline: BackRef<Pipeline>,
    set: vk::DescriptorSet,
}

impl DescriptorSet {
    pub(crate) fn new(
        device: BackRef<Device>,
        pipeline: BackRef<Pipeline>,
        set: vk::DescriptorSet,
    ) -> Self {
        Self {
            device,
            pipeline,
            set,
        }
    }

    /// Returns the Vulkan descriptor set handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Binds a sampled texture at `binding`.
    ///
    /// `layout` is the layout the image will be in when shaders read it.
    ///
    /// # Errors
    ///
    /// Returns an error if the device has been destroyed.
    pub fn set_uniform_texture(
        &self,
        sampler: &Sampler,
        view: &ImageView,
        layout: vk::ImageLayout,
        binding: u32,
    ) -> Result<()> {
        let device = self.device.upgrade()?;

        let image_info = [vk::DescriptorImageInfo {
            sampler: sampler.handle(),
            image_view: view.handle(),
            image_layout: layout,
        }];

        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);

        unsafe {
            device.handle().update_descriptor_sets(&[write], &[]);
        }

        Ok(())
    }

    /// Binds `range` bytes of `buffer` starting at `offset` as a uniform
    /// buffer at `binding`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device has been destroyed.
    pub fn set_uniform_buffer(
        &self,
        buffer: &Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
        binding: u32,
    ) -> Result<()> {
        let device = self.device.upgrade()?;

        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: buffer.handle(),
            offset,
            range,
        }];

        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info);

        unsafe {
            device.handle().update_descriptor_sets(&[write], &[]);
        }

        Ok(())
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        let (Ok(device), Ok(pipeline)) = (self.device.upgrade(), self.pipeline.upgrade()) else {
            error!("descriptor set outlived its pipeline; skipping native free");
            return;
        };
        unsafe {
            if let Err(e) = device
                .handle()
                .free_descriptor_sets(pipeline.descriptor_pool(), &[self.set])
            {
                error!("failed to free descriptor set: {e:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_indices_follow_insertion_order() {
        let layout = DescriptorSetLayout::new()
            .with_binding(
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )
            .with_binding(
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                2,
                vk::ShaderStageFlags::FRAGMENT,
            );

        let native = layout.vk_bindings();
        assert_eq!(native[0].binding, 0);
        assert_eq!(
            native[0].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(native[1].binding, 1);
        assert_eq!(native[1].descriptor_count, 2);
        assert_eq!(native[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn empty_layout_has_no_bindings() {
        assert!(DescriptorSetLayout::new().bindings().is_empty());
        assert!(DescriptorSetLayout::new().vk_bindings().is_empty());
    }
}
