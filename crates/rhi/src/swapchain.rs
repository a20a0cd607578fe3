//! Swapchain creation and presentation.
//!
//! # Overview
//!
//! A [`Swapchain`] owns a ring of presentable images. The requested extent
//! and image count are clamped to what the surface actually supports, never
//! assumed. [`next_image`](Swapchain::next_image) returns the image at the
//! current ring position without blocking for availability;
//! [`present`](Swapchain::present) hands that slot back to the presentation
//! engine and advances the position modulo ring size. Sequencing acquisition
//! with rendering (record, submit, wait, present) is the caller's
//! obligation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::queue::Queue;
//! use lumen_rhi::surface::Surface;
//! use lumen_rhi::swapchain::Swapchain;
//! use lumen_rhi::vk;
//!
//! # fn example(queue: Arc<Queue>, surface: Surface) -> Result<(), lumen_rhi::Error> {
//! let swapchain = Swapchain::new(
//!     &queue,
//!     &surface,
//!     vk::Extent2D { width: 1920, height: 1080 },
//! )?;
//!
//! // After submitting a frame that filled the current ring image:
//! swapchain.present(&queue)?;
//! # Ok(())
//! # }
//! ```

use std::cell::Cell;
use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::queue::Queue;
use crate::surface::Surface;

/// A ring of presentable images owned by the presentation engine.
pub struct Swapchain {
    /// The device this swapchain belongs to.
    device: BackRef<Device>,
    /// Swapchain extension loader.
    loader: ash::khr::swapchain::Device,
    /// Vulkan swapchain handle.
    swapchain: vk::SwapchainKHR,
    /// The ring of presentable images (owned by the swapchain).
    images: Vec<vk::Image>,
    /// Image format.
    format: vk::Format,
    /// Extent the ring was created at.
    extent: vk::Extent2D,
    /// Current ring position.
    position: Cell<u32>,
}

impl Swapchain {
    /// Creates a swapchain for `surface`, presented on `queue`.
    ///
    /// The requested `extent` is clamped to the surface's capabilities.
    /// Images carry `COLOR_ATTACHMENT` and `TRANSFER_DST` usage so frames
    /// can be rendered directly or blitted in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SwapchainError`] when the surface reports no usable
    /// format, or a native error if creation fails.
    pub fn new(queue: &Arc<Queue>, surface: &Surface, extent: vk::Extent2D) -> Result<Self> {
        let device = queue.device()?;
        let physical_device = device.physical_device();

        let capabilities = surface.capabilities(physical_device)?;
        let formats = surface.formats(physical_device)?;
        if formats.is_empty() {
            return Err(Error::SwapchainError(
                "surface reports no formats".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&formats);
        let extent = clamp_extent(&capabilities, extent);
        let image_count = clamp_image_count(&capabilities);

        info!(
            "creating swapchain: {}x{}, {:?}, {} image(s)",
            extent.width, extent.height, surface_format.format, image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);

        let loader = device.swapchain_loader().clone();
        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
        let images = unsafe { loader.get_swapchain_images(swapchain)? };

        info!("swapchain created with {} image(s)", images.len());

        Ok(Self {
            device: BackRef::new(&device),
            loader,
            swapchain,
            images,
            format: surface_format.format,
            extent,
            position: Cell::new(0),
        })
    }

    /// Returns the Vulkan swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the extent the ring was created at.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the ring size.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Returns the image at the current ring position, without blocking.
    #[inline]
    pub fn next_image(&self) -> vk::Image {
        self.images[self.position.get() as usize]
    }

    /// Returns the current ring position.
    #[inline]
    pub fn next_image_index(&self) -> u32 {
        self.position.get()
    }

    /// Hands the current ring image to the presentation engine and advances
    /// the ring position.
    ///
    /// # Errors
    ///
    /// Returns an error if native presentation fails; an out-of-date
    /// swapchain surfaces as [`Error::Vulkan`] with
    /// `ERROR_OUT_OF_DATE_KHR`.
    pub fn present(&self, queue: &Queue) -> Result<()> {
        let swapchains = [self.swapchain];
        let image_indices = [self.position.get()];

        let present_info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe { self.loader.queue_present(queue.handle(), &present_info)? };
        if suboptimal {
            warn!("swapchain is suboptimal for the surface");
        }

        self.position
            .set(advance_ring(self.position.get(), self.image_count()));
        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(_) => unsafe {
                self.loader.destroy_swapchain(self.swapchain, None);
            },
            Err(_) => {
                tracing::error!("swapchain outlived its device; skipping native destruction")
            }
        }
        debug!(
            "swapchain destroyed (was {}x{}, {} image(s))",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// Advances a ring position, wrapping modulo ring size.
fn advance_ring(position: u32, count: u32) -> u32 {
    (position + 1) % count
}

/// Chooses the surface format, preferring B8G8R8A8 sRGB.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        return format;
    }

    warn!(
        "preferred surface format unavailable, using {:?}",
        formats[0].format
    );
    formats[0]
}

/// Clamps the requested extent to the surface's supported window.
fn clamp_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    // A defined current extent is mandatory for the surface.
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Picks one image more than the minimum, bounded by the maximum when set.
fn clamp_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_position_cycles_deterministically() {
        let mut position = 0;
        let mut visited = Vec::new();
        for _ in 0..7 {
            visited.push(position);
            position = advance_ring(position, 3);
        }
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn single_image_ring_stays_at_zero() {
        assert_eq!(advance_ring(0, 1), 0);
    }

    #[test]
    fn surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn extent_uses_surface_current_extent_when_defined() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let extent = clamp_extent(
            &capabilities,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn extent_clamps_request_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let too_big = clamp_extent(
            &capabilities,
            vk::Extent2D {
                width: 3000,
                height: 3000,
            },
        );
        assert_eq!(too_big.width, 2000);

        let too_small = clamp_extent(
            &capabilities,
            vk::Extent2D {
                width: 50,
                height: 50,
            },
        );
        assert_eq!(too_small.height, 100);

        let in_range = clamp_extent(
            &capabilities,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!(in_range.width, 800);
        assert_eq!(in_range.height, 600);
    }

    #[test]
    fn image_count_respects_surface_maximum() {
        let bounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(clamp_image_count(&bounded), 2);

        let roomy = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(clamp_image_count(&roomy), 3);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(clamp_image_count(&unbounded), 3);
    }
}
