//! GPU images with recorded-layout tracking.
//!
//! # Overview
//!
//! An [`Image`] is a memory-backed resource like a buffer, with two extra
//! pieces of mutable state the command-recording layer maintains for it:
//!
//! - `current_layout`: the last layout a recording stream transitioned the
//!   image into. Operations that require a specific layout consult it and
//!   insert a barrier only when it differs, which makes layout bookkeeping
//!   implicit within one linear recording stream.
//! - `owning_family`: the queue family that last had access.
//!
//! Both live in `Cell`s: the state belongs to the image, not to any command
//! buffer, and two streams recorded against the same image without an
//! intervening submission and wait would race on it. `Image` is therefore
//! deliberately not `Sync`; record, submit, and wait before reusing an
//! image in another stream.
//!
//! The recording layer reaches this state through the narrow [`ImageState`]
//! capability trait rather than privileged field access.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::image::Image;
//! use lumen_rhi::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), lumen_rhi::Error> {
//! let texture = Image::new(
//!     &device,
//!     vk::Extent2D { width: 512, height: 512 },
//!     vk::Format::R8G8B8A8_SRGB,
//!     vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
//! )?;
//! assert_eq!(texture.format(), vk::Format::R8G8B8A8_SRGB);
//! # Ok(())
//! # }
//! ```

use std::cell::Cell;
use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::{debug, error};

use crate::device::Device;
use crate::error::Result;
use crate::memory::DeviceMemory;

/// Narrow capability surface the recording layer uses to track image state.
///
/// Exposes exactly what barrier insertion needs: the native handle, the
/// extent, and the recorded layout / owning family accessors.
pub trait ImageState {
    /// Returns the native image handle.
    fn native_handle(&self) -> vk::Image;
    /// Returns the image extent.
    fn extent(&self) -> vk::Extent2D;
    /// Returns the last recorded layout.
    fn current_layout(&self) -> vk::ImageLayout;
    /// Records a new layout.
    fn set_current_layout(&self, layout: vk::ImageLayout);
    /// Returns the queue family that last had access.
    fn owning_family(&self) -> u32;
    /// Records the queue family taking access.
    fn set_owning_family(&self, family: u32);
}

/// A memory-backed image resource.
pub struct Image {
    /// The device this image belongs to.
    device: BackRef<Device>,
    /// Vulkan image handle.
    image: vk::Image,
    /// The dedicated allocation backing this image.
    memory: DeviceMemory,
    /// Image extent.
    extent: vk::Extent2D,
    /// Pixel format.
    format: vk::Format,
    /// Number of mip levels.
    mip_levels: u32,
    /// Number of array layers.
    array_layers: u32,
    /// Last layout recorded by a command stream.
    current_layout: Cell<vk::ImageLayout>,
    /// Queue family that last had access.
    owning_family: Cell<u32>,
}

impl Image {
    /// Creates a 2D image in `UNDEFINED` layout with optimal tiling, one mip
    /// level, and one array layer.
    ///
    /// # Errors
    ///
    /// Returns an error if image creation or the dedicated allocation fails.
    pub fn new(
        device: &Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Arc<Self>> {
        Self::with_options(
            device,
            extent,
            format,
            usage,
            1,
            1,
            vk::ImageTiling::OPTIMAL,
            vk::ImageLayout::UNDEFINED,
        )
    }

    /// Creates a 2D image with explicit mip/layer counts, tiling, and
    /// initial layout.
    ///
    /// # Errors
    ///
    /// Returns an error if image creation or the dedicated allocation fails.
    #[allow(clippy::too_many_arguments)]
    pub fn with_options(
        device: &Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mip_levels: u32,
        array_layers: u32,
        tiling: vk::ImageTiling,
        initial_layout: vk::ImageLayout,
    ) -> Result<Arc<Self>> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(array_layers)
            .format(format)
            .tiling(tiling)
            .initial_layout(initial_layout)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.handle().create_image(&create_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let memory = DeviceMemory::new(
            device,
            requirements.size,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        unsafe {
            device
                .handle()
                .bind_image_memory(image, memory.handle(), 0)?;
        }

        debug!(
            "created image: {}x{} {format:?}, {mip_levels} mip(s), {array_layers} layer(s)",
            extent.width, extent.height
        );

        Ok(Arc::new(Self {
            device: BackRef::new(device),
            image,
            memory,
            extent,
            format,
            mip_levels,
            array_layers,
            current_layout: Cell::new(initial_layout),
            // Adopted by the first recording stream that transitions the image.
            owning_family: Cell::new(vk::QUEUE_FAMILY_IGNORED),
        }))
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Returns the pixel format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the number of mip levels.
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Returns the number of array layers.
    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    /// Returns the backing allocation.
    #[inline]
    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    pub(crate) fn device_ref(&self) -> BackRef<Device> {
        self.device.clone()
    }
}

impl ImageState for Image {
    #[inline]
    fn native_handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    fn current_layout(&self) -> vk::ImageLayout {
        self.current_layout.get()
    }

    #[inline]
    fn set_current_layout(&self, layout: vk::ImageLayout) {
        self.current_layout.set(layout);
    }

    #[inline]
    fn owning_family(&self) -> u32 {
        self.owning_family.get()
    }

    #[inline]
    fn set_owning_family(&self, family: u32) {
        self.owning_family.set(family);
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(device) => unsafe {
                device.handle().destroy_image(self.image, None);
            },
            Err(_) => error!("image outlived its device; skipping native destruction"),
        }
        debug!(
            "destroyed image ({}x{} {:?})",
            self.extent.width, self.extent.height, self.format
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_is_send() {
        // An image may move to another thread, but the Cell-tracked layout
        // keeps it from being shared (`Image` is not `Sync`).
        fn assert_send<T: Send>() {}
        assert_send::<Image>();
    }

    #[test]
    fn tracked_state_round_trips() {
        // Exercise the capability accessors through a stand-in; the real
        // image needs a device, but the contract is the same.
        struct Tracked {
            layout: Cell<vk::ImageLayout>,
            family: Cell<u32>,
        }

        impl ImageState for Tracked {
            fn native_handle(&self) -> vk::Image {
                vk::Image::null()
            }
            fn extent(&self) -> vk::Extent2D {
                vk::Extent2D::default()
            }
            fn current_layout(&self) -> vk::ImageLayout {
                self.layout.get()
            }
            fn set_current_layout(&self, layout: vk::ImageLayout) {
                self.layout.set(layout);
            }
            fn owning_family(&self) -> u32 {
                self.family.get()
            }
            fn set_owning_family(&self, family: u32) {
                self.family.set(family);
            }
        }

        let tracked = Tracked {
            layout: Cell::new(vk::ImageLayout::UNDEFINED),
            family: Cell::new(vk::QUEUE_FAMILY_IGNORED),
        };

        tracked.set_current_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        tracked.set_owning_family(0);

        assert_eq!(
            tracked.current_layout(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(tracked.owning_family(), 0);
    }
}
