//! Window surfaces.
//!
//! Window creation itself is an external collaborator: the caller hands over
//! the raw display and window handles of whatever windowing library it uses,
//! and this layer creates the `VkSurfaceKHR` from them. The instance must
//! have been created with that display's surface extensions (see
//! [`Instance::new`](crate::instance::Instance::new)).

use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::instance::Instance;

/// A presentable window surface.
pub struct Surface {
    /// The instance this surface belongs to.
    instance: BackRef<Instance>,
    /// Surface extension loader.
    loader: ash::khr::surface::Instance,
    /// Vulkan surface handle.
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Creates a surface for a caller-owned window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SurfaceError`] when native surface creation fails.
    pub fn new(
        instance: &Arc<Instance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self> {
        let surface = unsafe {
            ash_window::create_surface(instance.entry(), instance.handle(), display, window, None)
                .map_err(|e| Error::SurfaceError(format!("native creation rejected: {e:?}")))?
        };

        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        debug!("window surface created");

        Ok(Self {
            instance: BackRef::new(instance),
            loader,
            surface,
        })
    }

    /// Returns the Vulkan surface handle.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Queries what the surface supports on `physical_device`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        let capabilities = unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?
        };
        Ok(capabilities)
    }

    /// Queries the format/color-space pairs the surface supports.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>> {
        let formats = unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)?
        };
        Ok(formats)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        match self.instance.upgrade() {
            Ok(_) => unsafe {
                self.loader.destroy_surface(self.surface, None);
            },
            Err(_) => error!("surface outlived its instance; skipping native destruction"),
        }
        debug!("window surface destroyed");
    }
}
