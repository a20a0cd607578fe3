//! Texture samplers.

use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::{debug, error};

use crate::device::Device;
use crate::error::Result;

/// Filtering configuration for sampled images.
pub struct Sampler {
    /// The device this sampler belongs to.
    device: BackRef<Device>,
    /// Vulkan sampler handle.
    sampler: vk::Sampler,
}

impl Sampler {
    /// Creates a sampler with the given filters, repeat addressing, and no
    /// anisotropy.
    ///
    /// # Errors
    ///
    /// Returns an error if sampler creation fails.
    pub fn new(
        device: &Arc<Device>,
        mag_filter: vk::Filter,
        min_filter: vk::Filter,
    ) -> Result<Self> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(mag_filter)
            .min_filter(min_filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };

        debug!("created sampler ({mag_filter:?}/{min_filter:?})");

        Ok(Self {
            device: BackRef::new(device),
            sampler,
        })
    }

    /// Returns the Vulkan sampler handle.
    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(device) => unsafe {
                device.handle().destroy_sampler(self.sampler, None);
            },
            Err(_) => error!("sampler outlived its device; skipping native destruction"),
        }
    }
}
