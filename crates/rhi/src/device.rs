//! Vulkan logical device management.
//!
//! This module handles VkDevice creation from explicit queue requests and
//! hands out the [`Queue`]s the caller asked for.
//!
//! # Overview
//!
//! The [`Device`] struct owns the logical connection to one physical
//! accelerator. It is constructed as an `Arc` so that every dependent object
//! (memory, buffers, images, pipelines, command pools) can hold a
//! [`BackRef`] to it: dependents never keep the device alive, and touching
//! one after the device has been destroyed reports
//! [`Expired`](lumen_core::Expired) instead of corrupting driver state.
//! Destroying the device before its dependents violates the layer's
//! destruction-order contract.
//!
//! # Example
//!
//! ```no_run
//! use lumen_rhi::device::{Device, QueueRequest};
//! use lumen_rhi::instance::Instance;
//! use lumen_rhi::vk;
//!
//! let instance = Instance::new(false, None).expect("failed to create instance");
//! let gpus = instance.physical_devices().expect("no devices");
//!
//! let family = gpus[0]
//!     .search_queue_families(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)[0];
//!
//! let device = Device::new(
//!     &instance,
//!     &gpus[0],
//!     &[QueueRequest { family_index: family, count: 1 }],
//! )
//! .expect("failed to create logical device");
//!
//! let queue = device.queue(family, 0).expect("queue not requested");
//! ```

use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::physical_device::{self, PhysicalDevice};
use crate::queue::Queue;

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// A request for `count` queues from one queue family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueRequest {
    /// Queue family to draw from.
    pub family_index: u32,
    /// Number of queues to create in that family.
    pub count: u32,
}

/// Vulkan logical device wrapper.
///
/// Owns the `VkDevice` and the configuration needed by dependent resources:
/// the physical device's memory properties for dedicated allocations and its
/// limits for pipeline validation.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device this logical device was created from.
    physical_device: vk::PhysicalDevice,
    /// Memory properties captured for allocation decisions.
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Push-constant block size limit.
    max_push_constants_size: u32,
    /// Queue set requested at creation.
    queue_requests: Vec<QueueRequest>,
    /// Swapchain extension loader.
    swapchain_loader: ash::khr::swapchain::Device,
    /// The instance this device descends from.
    instance: BackRef<Instance>,
}

impl Device {
    /// Creates a logical device with the requested queue set.
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `physical` - The physical device to open
    /// * `queue_requests` - Families and queue counts to create
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceCreationFailed`] when the configuration is
    /// unsupported (unknown family, more queues than the family has,
    /// duplicate families) or the native API rejects it.
    pub fn new(
        instance: &Arc<Instance>,
        physical: &PhysicalDevice,
        queue_requests: &[QueueRequest],
    ) -> Result<Arc<Self>> {
        if queue_requests.is_empty() {
            return Err(Error::DeviceCreationFailed(
                "at least one queue request is required".to_string(),
            ));
        }

        for (position, request) in queue_requests.iter().enumerate() {
            let available = physical.queue_count(request.family_index).ok_or_else(|| {
                Error::DeviceCreationFailed(format!(
                    "queue family {} does not exist on {}",
                    request.family_index,
                    physical.name()
                ))
            })?;
            if request.count == 0 || request.count > available {
                return Err(Error::DeviceCreationFailed(format!(
                    "queue family {} supports {} queue(s), {} requested",
                    request.family_index, available, request.count
                )));
            }
            if queue_requests[..position]
                .iter()
                .any(|earlier| earlier.family_index == request.family_index)
            {
                return Err(Error::DeviceCreationFailed(format!(
                    "queue family {} requested more than once",
                    request.family_index
                )));
            }
        }

        let priorities: Vec<Vec<f32>> = queue_requests
            .iter()
            .map(|request| vec![1.0; request.count as usize])
            .collect();

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_requests
            .iter()
            .zip(&priorities)
            .map(|(request, priorities)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(request.family_index)
                    .queue_priorities(priorities)
            })
            .collect();

        debug!(
            "creating {} queue famil(ies) on {}",
            queue_create_infos.len(),
            physical.name()
        );

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical.handle(), &create_info, None)
                .map_err(|e| {
                    Error::DeviceCreationFailed(format!(
                        "native device creation rejected: {e:?}"
                    ))
                })?
        };

        info!(
            "logical device created on {} with {} extension(s)",
            physical.name(),
            DEVICE_EXTENSIONS.len()
        );

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);

        Ok(Arc::new(Self {
            device,
            physical_device: physical.handle(),
            memory_properties: *physical.memory_properties(),
            max_push_constants_size: physical.max_push_constants_size(),
            queue_requests: queue_requests.to_vec(),
            swapchain_loader,
            instance: BackRef::new(instance),
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the instance this device descends from.
    #[inline]
    pub fn instance(&self) -> &BackRef<Instance> {
        &self.instance
    }

    /// Returns the swapchain extension loader.
    #[inline]
    pub(crate) fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Returns the push-constant block size limit.
    #[inline]
    pub fn max_push_constants_size(&self) -> u32 {
        self.max_push_constants_size
    }

    /// Finds a memory type matching `type_bits` with all of `properties`.
    pub(crate) fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        physical_device::find_memory_type(&self.memory_properties, type_bits, properties)
    }

    /// Acquires one of the queues requested at device creation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceCreationFailed`] when `(family_index, index)`
    /// was not part of the creation-time queue requests.
    pub fn queue(self: &Arc<Self>, family_index: u32, index: u32) -> Result<Arc<Queue>> {
        let requested = self
            .queue_requests
            .iter()
            .find(|request| request.family_index == family_index)
            .is_some_and(|request| index < request.count);
        if !requested {
            return Err(Error::DeviceCreationFailed(format!(
                "queue {index} of family {family_index} was not requested at device creation"
            )));
        }

        Queue::new(self, family_index, index)
    }

    /// Blocks until all queues on this device are idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("failed to wait for device idle during drop: {e:?}");
            }
            self.device.destroy_device(None);
        }
        info!("logical device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_extensions_include_swapchain() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn queue_request_is_copy() {
        let request = QueueRequest {
            family_index: 0,
            count: 1,
        };
        let copied = request;
        assert_eq!(request, copied);
    }
}
