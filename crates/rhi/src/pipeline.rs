//! Graphics pipeline construction.
//!
//! # Overview
//!
//! A [`Pipeline`] is an immutable compiled configuration: shader stages,
//! vertex input layout, push-constant ranges, and descriptor-set layouts,
//! bound to one render pass and one device. It is assembled with a staged
//! builder and never mutated after [`build`](PipelineBuilder::build).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::descriptor::DescriptorSetLayout;
//! use lumen_rhi::pipeline::Pipeline;
//! use lumen_rhi::render_pass::RenderPass;
//! use lumen_rhi::shader::Shader;
//! use lumen_rhi::vertex::VertexInputDescription;
//! use lumen_rhi::vk;
//!
//! # fn example(
//! #     render_pass: Arc<RenderPass>,
//! #     vertex_shader: Shader,
//! #     fragment_shader: Shader,
//! # ) -> Result<(), lumen_rhi::Error> {
//! let pipeline = Pipeline::builder(&render_pass)
//!     .with_shader_stage(vk::ShaderStageFlags::VERTEX, vertex_shader)
//!     .with_shader_stage(vk::ShaderStageFlags::FRAGMENT, fragment_shader)
//!     .with_vertex_input(
//!         VertexInputDescription::new()
//!             .binding(3 * size_of::<f32>() as u32)
//!             .attribute(0, vk::Format::R32G32B32_SFLOAT, 0),
//!     )
//!     .with_primitive_topology(vk::PrimitiveTopology::TRIANGLE_LIST)
//!     .with_viewport(vk::Offset2D { x: 0, y: 0 }, vk::Extent2D { width: 1920, height: 1080 })
//!     .with_push_constant_range(vk::ShaderStageFlags::VERTEX, 64, 0)
//!     .with_descriptor_set_layout(
//!         DescriptorSetLayout::new().with_binding(
//!             vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
//!             1,
//!             vk::ShaderStageFlags::FRAGMENT,
//!         ),
//!     )
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::{debug, info};

use crate::descriptor::{DescriptorSet, DescriptorSetLayout};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::render_pass::RenderPass;
use crate::shader::Shader;
use crate::vertex::VertexInputDescription;

/// An immutable compiled pipeline configuration.
pub struct Pipeline {
    /// The device this pipeline belongs to.
    device: BackRef<Device>,
    /// The render pass this pipeline targets.
    render_pass: BackRef<RenderPass>,
    /// Vulkan pipeline handle.
    pipeline: vk::Pipeline,
    /// Vulkan pipeline layout handle.
    layout: vk::PipelineLayout,
    /// Native descriptor set layouts, in set order.
    set_layouts: Vec<vk::DescriptorSetLayout>,
    /// Pool the pipeline's descriptor sets are allocated from; null when the
    /// pipeline declares no sets.
    descriptor_pool: vk::DescriptorPool,
}

impl Pipeline {
    /// Starts building a pipeline targeting `render_pass`.
    pub fn builder(render_pass: &Arc<RenderPass>) -> PipelineBuilder {
        PipelineBuilder {
            render_pass: Arc::clone(render_pass),
            stages: Vec::new(),
            vertex_input: VertexInputDescription::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            viewport_offset: vk::Offset2D::default(),
            viewport_extent: vk::Extent2D::default(),
            push_constant_ranges: Vec::new(),
            set_layouts: Vec::new(),
        }
    }

    /// Returns the Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Returns the Vulkan pipeline layout handle.
    #[inline]
    pub fn layout_handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Returns the render pass this pipeline targets.
    #[inline]
    pub fn render_pass(&self) -> &BackRef<RenderPass> {
        &self.render_pass
    }

    #[inline]
    pub(crate) fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.descriptor_pool
    }

    /// Allocates a binding table for descriptor set `set_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline declares no such set, the device has
    /// been destroyed, or the pool is exhausted.
    pub fn allocate_descriptor_set(self: &Arc<Self>, set_index: usize) -> Result<DescriptorSet> {
        let layout = *self.set_layouts.get(set_index).ok_or_else(|| {
            Error::InvalidState(format!(
                "pipeline declares {} descriptor set(s), set {set_index} requested",
                self.set_layouts.len()
            ))
        })?;

        let device = self.device.upgrade()?;

        let layouts = [layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);

        let set = unsafe { device.handle().allocate_descriptor_sets(&allocate_info)?[0] };

        debug!("allocated descriptor set {set_index}");

        Ok(DescriptorSet::new(
            self.device.clone(),
            BackRef::new(self),
            set,
        ))
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(device) => unsafe {
                if self.descriptor_pool != vk::DescriptorPool::null() {
                    device
                        .handle()
                        .destroy_descriptor_pool(self.descriptor_pool, None);
                }
                for &layout in &self.set_layouts {
                    device.handle().destroy_descriptor_set_layout(layout, None);
                }
                device.handle().destroy_pipeline_layout(self.layout, None);
                device.handle().destroy_pipeline(self.pipeline, None);
            },
            Err(_) => {
                tracing::error!("pipeline outlived its device; skipping native destruction")
            }
        }
        info!("pipeline destroyed");
    }
}

/// Staged construction of a [`Pipeline`].
pub struct PipelineBuilder {
    render_pass: Arc<RenderPass>,
    stages: Vec<(vk::ShaderStageFlags, Shader)>,
    vertex_input: VertexInputDescription,
    topology: vk::PrimitiveTopology,
    viewport_offset: vk::Offset2D,
    viewport_extent: vk::Extent2D,
    push_constant_ranges: Vec<vk::PushConstantRange>,
    set_layouts: Vec<DescriptorSetLayout>,
}

impl PipelineBuilder {
    /// Adds a shader stage from a compiled binary module.
    pub fn with_shader_stage(mut self, stage: vk::ShaderStageFlags, shader: Shader) -> Self {
        self.stages.push((stage, shader));
        self
    }

    /// Declares the vertex buffer layout.
    pub fn with_vertex_input(mut self, vertex_input: VertexInputDescription) -> Self {
        self.vertex_input = vertex_input;
        self
    }

    /// Sets the primitive topology (default triangle list).
    pub fn with_primitive_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Sets the fixed viewport and scissor.
    pub fn with_viewport(mut self, offset: vk::Offset2D, extent: vk::Extent2D) -> Self {
        self.viewport_offset = offset;
        self.viewport_extent = extent;
        self
    }

    /// Adds a push-constant range of `size` bytes at `offset`, visible to
    /// `stages`.
    pub fn with_push_constant_range(
        mut self,
        stages: vk::ShaderStageFlags,
        size: u32,
        offset: u32,
    ) -> Self {
        self.push_constant_ranges.push(vk::PushConstantRange {
            stage_flags: stages,
            offset,
            size,
        });
        self
    }

    /// Appends a descriptor set layout; its set index is the number of
    /// layouts added before it.
    pub fn with_descriptor_set_layout(mut self, layout: DescriptorSetLayout) -> Self {
        self.set_layouts.push(layout);
        self
    }

    /// Compiles the accumulated configuration into an immutable pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipelineBuildFailed`] when stage coverage is
    /// incomplete (a vertex and a fragment stage are required), the viewport
    /// is unset, push-constant ranges overlap or exceed the device limit, or
    /// the native API rejects the configuration. Returns
    /// [`Error::Expired`](crate::Error::Expired) when the render pass or
    /// device has been destroyed.
    pub fn build(self) -> Result<Arc<Pipeline>> {
        let stage_flags: Vec<vk::ShaderStageFlags> =
            self.stages.iter().map(|(stage, _)| *stage).collect();
        validate_stage_coverage(&stage_flags).map_err(Error::PipelineBuildFailed)?;

        if self.viewport_extent.width == 0 || self.viewport_extent.height == 0 {
            return Err(Error::PipelineBuildFailed(
                "a non-empty viewport is required".to_string(),
            ));
        }

        let device = self.render_pass.device_ref().upgrade()?;

        validate_push_constant_ranges(
            &self.push_constant_ranges,
            device.max_push_constants_size(),
        )
        .map_err(Error::PipelineBuildFailed)?;

        // Native descriptor set layouts, unwound on any later failure.
        let mut set_layout_handles: Vec<vk::DescriptorSetLayout> = Vec::new();
        for layout in &self.set_layouts {
            let bindings = layout.vk_bindings();
            let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            match unsafe { device.handle().create_descriptor_set_layout(&create_info, None) } {
                Ok(handle) => set_layout_handles.push(handle),
                Err(e) => {
                    destroy_set_layouts(&device, &set_layout_handles);
                    return Err(Error::PipelineBuildFailed(format!(
                        "descriptor set layout rejected: {e:?}"
                    )));
                }
            }
        }

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layout_handles)
            .push_constant_ranges(&self.push_constant_ranges);

        let layout = match unsafe { device.handle().create_pipeline_layout(&layout_info, None) }
        {
            Ok(layout) => layout,
            Err(e) => {
                destroy_set_layouts(&device, &set_layout_handles);
                return Err(Error::PipelineBuildFailed(format!(
                    "pipeline layout rejected: {e:?}"
                )));
            }
        };

        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = self
            .stages
            .iter()
            .map(|(stage, shader)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(*stage)
                    .module(shader.handle())
                    .name(shader.entry_point())
            })
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(self.vertex_input.bindings())
            .vertex_attribute_descriptions(self.vertex_input.attributes());

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: self.viewport_offset.x as f32,
            y: self.viewport_offset.y as f32,
            width: self.viewport_extent.width as f32,
            height: self.viewport_extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: self.viewport_offset,
            extent: self.viewport_extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default();

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0..self
            .render_pass
            .subpass_color_count())
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .layout(layout)
            .render_pass(self.render_pass.handle())
            .subpass(0);

        let pipeline = match unsafe {
            device.handle().create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        } {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.handle().destroy_pipeline_layout(layout, None) };
                destroy_set_layouts(&device, &set_layout_handles);
                return Err(Error::PipelineBuildFailed(format!(
                    "native pipeline creation rejected: {e:?}"
                )));
            }
        };

        let descriptor_pool = if self.set_layouts.is_empty() {
            vk::DescriptorPool::null()
        } else {
            let pool_sizes = descriptor_pool_sizes(&self.set_layouts);
            let pool_info = vk::DescriptorPoolCreateInfo::default()
                .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                .max_sets(self.set_layouts.len() as u32)
                .pool_sizes(&pool_sizes);

            match unsafe { device.handle().create_descriptor_pool(&pool_info, None) } {
                Ok(pool) => pool,
                Err(e) => {
                    unsafe {
                        device.handle().destroy_pipeline(pipeline, None);
                        device.handle().destroy_pipeline_layout(layout, None);
                    }
                    destroy_set_layouts(&device, &set_layout_handles);
                    return Err(Error::PipelineBuildFailed(format!(
                        "descriptor pool rejected: {e:?}"
                    )));
                }
            }
        };

        info!(
            "graphics pipeline created: {} stage(s), {} push-constant range(s), {} set(s)",
            self.stages.len(),
            self.push_constant_ranges.len(),
            self.set_layouts.len()
        );

        Ok(Arc::new(Pipeline {
            device: self.render_pass.device_ref(),
            render_pass: BackRef::new(&self.render_pass),
            pipeline,
            layout,
            set_layouts: set_layout_handles,
            descriptor_pool,
        }))
    }
}

fn destroy_set_layouts(device: &Device, layouts: &[vk::DescriptorSetLayout]) {
    for &layout in layouts {
        unsafe {
            device.handle().destroy_descriptor_set_layout(layout, None);
        }
    }
}

/// Sums per-type descriptor counts across all set layouts.
fn descriptor_pool_sizes(set_layouts: &[DescriptorSetLayout]) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();

    for layout in set_layouts {
        for binding in layout.bindings() {
            match sizes
                .iter_mut()
                .find(|size| size.ty == binding.descriptor_type)
            {
                Some(size) => size.descriptor_count += binding.count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: binding.count,
                }),
            }
        }
    }

    sizes
}

/// A pipeline needs at least one vertex and one fragment stage.
fn validate_stage_coverage(
    stages: &[vk::ShaderStageFlags],
) -> std::result::Result<(), String> {
    let has_vertex = stages
        .iter()
        .any(|stage| stage.contains(vk::ShaderStageFlags::VERTEX));
    let has_fragment = stages
        .iter()
        .any(|stage| stage.contains(vk::ShaderStageFlags::FRAGMENT));

    match (has_vertex, has_fragment) {
        (true, true) => Ok(()),
        (false, _) => Err("a vertex stage is required".to_string()),
        (_, false) => Err("a fragment stage is required".to_string()),
    }
}

/// Push-constant ranges may not overlap (whatever their stages) and must fit
/// the device's push-constant block.
fn validate_push_constant_ranges(
    ranges: &[vk::PushConstantRange],
    limit: u32,
) -> std::result::Result<(), String> {
    for range in ranges {
        if range.size == 0 {
            return Err(format!(
                "push-constant range at offset {} has zero size",
                range.offset
            ));
        }
        if range.offset + range.size > limit {
            return Err(format!(
                "push-constant range {}..{} exceeds the device limit of {limit} bytes",
                range.offset,
                range.offset + range.size
            ));
        }
    }

    for (position, a) in ranges.iter().enumerate() {
        for b in &ranges[position + 1..] {
            if a.offset < b.offset + b.size && b.offset < a.offset + a.size {
                return Err(format!(
                    "push-constant ranges {}..{} and {}..{} overlap",
                    a.offset,
                    a.offset + a.size,
                    b.offset,
                    b.offset + b.size
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(stages: vk::ShaderStageFlags, offset: u32, size: u32) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: stages,
            offset,
            size,
        }
    }

    #[test]
    fn stage_coverage_requires_vertex_and_fragment() {
        assert!(validate_stage_coverage(&[
            vk::ShaderStageFlags::VERTEX,
            vk::ShaderStageFlags::FRAGMENT
        ])
        .is_ok());

        assert!(validate_stage_coverage(&[vk::ShaderStageFlags::VERTEX]).is_err());
        assert!(validate_stage_coverage(&[vk::ShaderStageFlags::FRAGMENT]).is_err());
        assert!(validate_stage_coverage(&[]).is_err());
    }

    #[test]
    fn disjoint_push_constant_ranges_are_accepted() {
        // The vertex stage takes a matrix, the fragment stage a color after it.
        let ranges = [
            range(vk::ShaderStageFlags::VERTEX, 0, 64),
            range(vk::ShaderStageFlags::FRAGMENT, 64, 12),
        ];
        assert!(validate_push_constant_ranges(&ranges, 128).is_ok());
    }

    #[test]
    fn overlapping_push_constant_ranges_are_rejected() {
        let ranges = [
            range(vk::ShaderStageFlags::VERTEX, 0, 64),
            range(vk::ShaderStageFlags::FRAGMENT, 60, 12),
        ];
        let message = validate_push_constant_ranges(&ranges, 256).unwrap_err();
        assert!(message.contains("overlap"));
    }

    #[test]
    fn ranges_beyond_the_device_limit_are_rejected() {
        let ranges = [range(vk::ShaderStageFlags::VERTEX, 64, 128)];
        assert!(validate_push_constant_ranges(&ranges, 128).is_err());
        assert!(validate_push_constant_ranges(&ranges, 192).is_ok());
    }

    #[test]
    fn zero_sized_range_is_rejected() {
        let ranges = [range(vk::ShaderStageFlags::VERTEX, 0, 0)];
        assert!(validate_push_constant_ranges(&ranges, 128).is_err());
    }

    #[test]
    fn pool_sizes_accumulate_across_layouts() {
        let layouts = [
            DescriptorSetLayout::new()
                .with_binding(
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    1,
                    vk::ShaderStageFlags::FRAGMENT,
                )
                .with_binding(
                    vk::DescriptorType::UNIFORM_BUFFER,
                    1,
                    vk::ShaderStageFlags::VERTEX,
                ),
            DescriptorSetLayout::new().with_binding(
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                2,
                vk::ShaderStageFlags::FRAGMENT,
            ),
        ];

        let sizes = descriptor_pool_sizes(&layouts);
        assert_eq!(sizes.len(), 2);

        let samplers = sizes
            .iter()
            .find(|size| size.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .unwrap();
        assert_eq!(samplers.descriptor_count, 3);

        let uniforms = sizes
            .iter()
            .find(|size| size.ty == vk::DescriptorType::UNIFORM_BUFFER)
            .unwrap();
        assert_eq!(uniforms.descriptor_count, 1);
    }
}
