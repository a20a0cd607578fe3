//! Typed views over images.
//!
//! An [`ImageView`] reinterprets a region of an [`Image`] for sampling or
//! attachment use. The view holds a back-reference to its source image, not
//! ownership: destroying the image first leaves the view logically invalid,
//! and the caller must not use it past that point.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::image::Image;
//! use lumen_rhi::image_view::ImageView;
//! use lumen_rhi::vk;
//!
//! # fn example(texture: Arc<Image>) -> Result<(), lumen_rhi::Error> {
//! let view = ImageView::builder(&texture)
//!     .view_type(vk::ImageViewType::TYPE_2D)
//!     .format(vk::Format::R8G8B8A8_SRGB)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::{debug, error};

use crate::device::Device;
use crate::error::Result;
use crate::image::Image;

/// A typed view over a region of an image.
pub struct ImageView {
    /// The device the view belongs to.
    device: BackRef<Device>,
    /// The image this view interprets.
    image: BackRef<Image>,
    /// Vulkan image view handle.
    view: vk::ImageView,
    /// Aspect the view covers.
    aspect: vk::ImageAspectFlags,
    /// Format the view reads the image as.
    format: vk::Format,
}

impl ImageView {
    /// Starts building a view over `image`.
    pub fn builder(image: &Arc<Image>) -> ImageViewBuilder {
        ImageViewBuilder {
            image: Arc::clone(image),
            view_type: vk::ImageViewType::TYPE_2D,
            format: None,
            aspect: None,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    /// Returns the Vulkan image view handle.
    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }

    /// Returns the aspect the view covers.
    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    /// Returns the format the view reads the image as.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the back-reference to the source image.
    #[inline]
    pub fn image(&self) -> &BackRef<Image> {
        &self.image
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(device) => unsafe {
                device.handle().destroy_image_view(self.view, None);
            },
            Err(_) => error!("image view outlived its device; skipping native destruction"),
        }
    }
}

/// Staged construction of an [`ImageView`].
pub struct ImageViewBuilder {
    image: Arc<Image>,
    view_type: vk::ImageViewType,
    format: Option<vk::Format>,
    aspect: Option<vk::ImageAspectFlags>,
    base_mip_level: u32,
    level_count: u32,
    base_array_layer: u32,
    layer_count: u32,
}

impl ImageViewBuilder {
    /// Sets the view dimensionality (default `TYPE_2D`).
    pub fn view_type(mut self, view_type: vk::ImageViewType) -> Self {
        self.view_type = view_type;
        self
    }

    /// Sets the view format (defaults to the image's format).
    pub fn format(mut self, format: vk::Format) -> Self {
        self.format = Some(format);
        self
    }

    /// Overrides the aspect (defaults to one derived from the format).
    pub fn aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = Some(aspect);
        self
    }

    /// Restricts the view to a mip range (default level 0, count 1).
    pub fn mip_range(mut self, base: u32, count: u32) -> Self {
        self.base_mip_level = base;
        self.level_count = count;
        self
    }

    /// Restricts the view to an array-layer range (default layer 0, count 1).
    pub fn layer_range(mut self, base: u32, count: u32) -> Self {
        self.base_array_layer = base;
        self.layer_count = count;
        self
    }

    /// Creates the view.
    ///
    /// # Errors
    ///
    /// Returns an error if the image's device has been destroyed or native
    /// creation fails.
    pub fn build(self) -> Result<ImageView> {
        let device_ref = self.image.device_ref();
        let device = device_ref.upgrade()?;

        let format = self.format.unwrap_or_else(|| self.image.format());
        let aspect = self.aspect.unwrap_or_else(|| aspect_for_format(format));

        let create_info = vk::ImageViewCreateInfo::default()
            .image(self.image.handle())
            .view_type(self.view_type)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(self.base_mip_level)
                    .level_count(self.level_count)
                    .base_array_layer(self.base_array_layer)
                    .layer_count(self.layer_count),
            );

        let view = unsafe { device.handle().create_image_view(&create_info, None)? };

        debug!("created image view ({format:?}, {aspect:?})");

        Ok(ImageView {
            device: device_ref,
            image: BackRef::new(&self.image),
            view,
            aspect,
            format,
        })
    }
}

/// Derives the natural aspect for `format`.
fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_formats_map_to_color_aspect() {
        assert_eq!(
            aspect_for_format(vk::Format::R8G8B8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            aspect_for_format(vk::Format::B8G8R8A8_UNORM),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            aspect_for_format(vk::Format::R32G32B32A32_SFLOAT),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn depth_formats_map_to_depth_aspect() {
        assert_eq!(
            aspect_for_format(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_format(vk::Format::D16_UNORM),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn combined_formats_map_to_both_aspects() {
        let aspect = aspect_for_format(vk::Format::D24_UNORM_S8_UINT);
        assert!(aspect.contains(vk::ImageAspectFlags::DEPTH));
        assert!(aspect.contains(vk::ImageAspectFlags::STENCIL));
    }

    #[test]
    fn stencil_only_format_maps_to_stencil() {
        assert_eq!(
            aspect_for_format(vk::Format::S8_UINT),
            vk::ImageAspectFlags::STENCIL
        );
    }
}
