//! Physical device (GPU) queries.
//!
//! This module captures the per-GPU data the rest of the layer needs:
//! queue-family capabilities for device creation, memory properties for
//! dedicated allocations, and the device limits that bound pipeline
//! construction.
//!
//! # Example
//!
//! ```no_run
//! use lumen_rhi::instance::Instance;
//! use lumen_rhi::vk;
//!
//! let instance = Instance::new(false, None).expect("failed to create instance");
//! let gpus = instance.physical_devices().expect("no devices");
//!
//! let families = gpus[0].search_queue_families(
//!     vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
//! );
//! println!("graphics+transfer families: {families:?}");
//! ```

use std::ffi::CStr;

use ash::vk;

/// A physical accelerator together with the properties this layer queries.
#[derive(Clone)]
pub struct PhysicalDevice {
    handle: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    queue_families: Vec<vk::QueueFamilyProperties>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl PhysicalDevice {
    /// Captures the properties of `handle`.
    pub(crate) fn query(instance: &ash::Instance, handle: vk::PhysicalDevice) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(handle) };

        Self {
            handle,
            properties,
            queue_families,
            memory_properties,
        }
    }

    /// Returns the native physical device handle.
    #[inline]
    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    /// Returns the device name reported by the driver.
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Returns the indices of every queue family supporting all of `flags`.
    ///
    /// Mirrors the order the driver reports families in, so index 0 is a
    /// stable default choice.
    pub fn search_queue_families(&self, flags: vk::QueueFlags) -> Vec<u32> {
        search_queue_families(&self.queue_families, flags)
    }

    /// Returns the number of queues in `family`, or `None` for an unknown
    /// family index.
    pub fn queue_count(&self, family: u32) -> Option<u32> {
        self.queue_families
            .get(family as usize)
            .map(|props| props.queue_count)
    }

    /// Finds a memory type matching `type_bits` with all of `properties`.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        find_memory_type(&self.memory_properties, type_bits, properties)
    }

    /// Returns the memory properties of this device.
    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Returns the size in bytes of the push-constant block.
    #[inline]
    pub fn max_push_constants_size(&self) -> u32 {
        self.properties.limits.max_push_constants_size
    }
}

impl std::fmt::Debug for PhysicalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDevice")
            .field("name", &self.name())
            .field("queue_families", &self.queue_families.len())
            .finish()
    }
}

/// Returns the indices of queue families whose flags contain all of `flags`.
fn search_queue_families(
    families: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
) -> Vec<u32> {
    families
        .iter()
        .enumerate()
        .filter(|(_, props)| props.queue_flags.contains(flags))
        .map(|(index, _)| index as u32)
        .collect()
}

/// Classic memory-type search: the type must be acceptable to the resource
/// (`type_bits`) and carry all requested property flags.
pub(crate) fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&index| {
        let supported = type_bits & (1 << index) != 0;
        let flags = memory_properties.memory_types[index as usize].property_flags;
        supported && flags.contains(properties)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn search_finds_families_with_all_flags() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::TRANSFER, 1),
            family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                4,
            ),
        ];

        let graphics = search_queue_families(&families, vk::QueueFlags::GRAPHICS);
        assert_eq!(graphics, vec![0, 2]);

        let transfer_only = search_queue_families(&families, vk::QueueFlags::TRANSFER);
        assert_eq!(transfer_only, vec![0, 1, 2]);

        let compute = search_queue_families(&families, vk::QueueFlags::COMPUTE);
        assert_eq!(compute, vec![2]);
    }

    #[test]
    fn search_returns_empty_when_unsupported() {
        let families = [family(vk::QueueFlags::TRANSFER, 1)];
        assert!(search_queue_families(&families, vk::QueueFlags::GRAPHICS).is_empty());
    }

    #[test]
    fn memory_type_search_respects_type_bits_and_flags() {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        memory_properties.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        memory_properties.memory_types[1] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };
        memory_properties.memory_types[2] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE,
            heap_index: 0,
        };

        // All types acceptable: first host-visible match is index 1.
        assert_eq!(
            find_memory_type(
                &memory_properties,
                0b111,
                vk::MemoryPropertyFlags::HOST_VISIBLE
            ),
            Some(1)
        );

        // Resource only accepts type 2.
        assert_eq!(
            find_memory_type(
                &memory_properties,
                0b100,
                vk::MemoryPropertyFlags::HOST_VISIBLE
            ),
            Some(2)
        );

        // No type carries lazily-allocated memory.
        assert_eq!(
            find_memory_type(
                &memory_properties,
                0b111,
                vk::MemoryPropertyFlags::LAZILY_ALLOCATED
            ),
            None
        );
    }
}
