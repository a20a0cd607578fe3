//! Vertex input layout declarations.
//!
//! The caller declares how its vertex bytes are laid out: a stride per
//! binding, and `(location, format, byte offset)` triples per attribute.
//! The declaration must match what the vertex shader expects; mismatches
//! are the driver's to detect, not this layer's.
//!
//! # Example
//!
//! ```
//! use lumen_rhi::vertex::VertexInputDescription;
//! use lumen_rhi::vk;
//!
//! // Six packed 3-float positions.
//! let layout = VertexInputDescription::new()
//!     .binding(3 * size_of::<f32>() as u32)
//!     .attribute(0, vk::Format::R32G32B32_SFLOAT, 0);
//!
//! assert_eq!(layout.bindings().len(), 1);
//! assert_eq!(layout.attributes().len(), 1);
//! ```

use ash::vk;

/// Caller-declared vertex buffer layout.
///
/// A staged accumulator: [`binding`](Self::binding) opens a new binding slot
/// and [`attribute`](Self::attribute) attaches attributes to the most recent
/// one.
#[derive(Clone, Debug, Default)]
pub struct VertexInputDescription {
    bindings: Vec<vk::VertexInputBindingDescription>,
    attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexInputDescription {
    /// Creates an empty description.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a per-vertex binding with the given stride. The binding index
    /// is the number of bindings added before it.
    pub fn binding(mut self, stride: u32) -> Self {
        let binding = self.bindings.len() as u32;
        self.bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate: vk::VertexInputRate::VERTEX,
        });
        self
    }

    /// Appends a per-instance binding with the given stride.
    pub fn instance_binding(mut self, stride: u32) -> Self {
        let binding = self.bindings.len() as u32;
        self.bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate: vk::VertexInputRate::INSTANCE,
        });
        self
    }

    /// Attaches an attribute to the most recently added binding.
    pub fn attribute(mut self, location: u32, format: vk::Format, offset: u32) -> Self {
        let binding = self.bindings.len().saturating_sub(1) as u32;
        self.attributes.push(vk::VertexInputAttributeDescription {
            location,
            binding,
            format,
            offset,
        });
        self
    }

    /// Returns the accumulated binding descriptions.
    #[inline]
    pub fn bindings(&self) -> &[vk::VertexInputBindingDescription] {
        &self.bindings
    }

    /// Returns the accumulated attribute descriptions.
    #[inline]
    pub fn attributes(&self) -> &[vk::VertexInputAttributeDescription] {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_indices_are_sequential() {
        let layout = VertexInputDescription::new().binding(12).binding(32);

        assert_eq!(layout.bindings()[0].binding, 0);
        assert_eq!(layout.bindings()[0].stride, 12);
        assert_eq!(layout.bindings()[1].binding, 1);
        assert_eq!(layout.bindings()[1].stride, 32);
    }

    #[test]
    fn attributes_attach_to_latest_binding() {
        let layout = VertexInputDescription::new()
            .binding(24)
            .attribute(0, vk::Format::R32G32B32_SFLOAT, 0)
            .attribute(1, vk::Format::R32G32B32_SFLOAT, 12)
            .binding(8)
            .attribute(2, vk::Format::R32G32_SFLOAT, 0);

        assert_eq!(layout.attributes()[0].binding, 0);
        assert_eq!(layout.attributes()[1].binding, 0);
        assert_eq!(layout.attributes()[1].offset, 12);
        assert_eq!(layout.attributes()[2].binding, 1);
        assert_eq!(layout.attributes()[2].location, 2);
    }

    #[test]
    fn instance_binding_sets_input_rate() {
        let layout = VertexInputDescription::new().instance_binding(64);
        assert_eq!(
            layout.bindings()[0].input_rate,
            vk::VertexInputRate::INSTANCE
        );
    }

    #[test]
    fn packed_vertex_layout_matches_declaration() {
        // 3 floats per vertex, tightly packed.
        let stride = 3 * size_of::<f32>() as u32;
        let layout = VertexInputDescription::new()
            .binding(stride)
            .attribute(0, vk::Format::R32G32B32_SFLOAT, 0);

        assert_eq!(layout.bindings()[0].stride, 12);
        assert_eq!(layout.attributes()[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(layout.attributes()[0].offset, 0);
    }
}
