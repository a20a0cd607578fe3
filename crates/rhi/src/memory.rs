//! Dedicated device memory allocations.
//!
//! Every buffer and image in this layer owns exactly one [`DeviceMemory`]
//! sized to fit it; there is no sub-allocation or pooling. Host-visible
//! allocations are persistently mapped at construction so uploads are a
//! plain memcpy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::memory::DeviceMemory;
//! use lumen_rhi::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), lumen_rhi::Error> {
//! let memory = DeviceMemory::new(
//!     &device,
//!     256,
//!     u32::MAX,
//!     vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
//! )?;
//!
//! memory.set_data(&[0u8; 256])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{Error, Result};

/// One dedicated allocation of device memory.
///
/// The size is fixed at construction; there is no resize. The allocation is
/// exclusively owned by the buffer or image it was created for.
pub struct DeviceMemory {
    /// The device this allocation belongs to.
    device: BackRef<Device>,
    /// Vulkan memory handle.
    memory: vk::DeviceMemory,
    /// Allocation size in bytes.
    size: vk::DeviceSize,
    /// Persistently mapped pointer; null when the allocation is not
    /// host-visible.
    mapped_ptr: *mut u8,
}

// The mapped pointer refers to driver-owned memory, not to data this struct
// can race on by being moved between threads.
unsafe impl Send for DeviceMemory {}

impl DeviceMemory {
    /// Allocates `size` bytes from a memory type matching `type_bits` and
    /// `properties`.
    ///
    /// If `properties` includes `HOST_VISIBLE` the allocation is mapped for
    /// the lifetime of the object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuitableMemoryType`] when no memory type matches,
    /// and [`Error::OutOfDeviceMemory`] when the allocator rejects the
    /// request.
    pub fn new(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let memory_type_index = device
            .find_memory_type(type_bits, properties)
            .ok_or(Error::NoSuitableMemoryType {
                type_bits,
                properties,
            })?;

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        let memory = unsafe {
            device
                .handle()
                .allocate_memory(&allocate_info, None)
                .map_err(|e| match e {
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                    | vk::Result::ERROR_OUT_OF_HOST_MEMORY => Error::OutOfDeviceMemory,
                    other => Error::Vulkan(other),
                })?
        };

        let mapped_ptr = if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            unsafe {
                device
                    .handle()
                    .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())?
                    .cast::<u8>()
            }
        } else {
            std::ptr::null_mut()
        };

        debug!(
            "allocated {size} bytes of device memory (type {memory_type_index}{})",
            if mapped_ptr.is_null() { "" } else { ", mapped" }
        );

        Ok(Self {
            device: BackRef::new(device),
            memory,
            size,
            mapped_ptr,
        })
    }

    /// Returns the Vulkan memory handle.
    #[inline]
    pub(crate) fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Returns the allocation size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns true when the allocation is persistently mapped.
    #[inline]
    pub fn is_host_visible(&self) -> bool {
        !self.mapped_ptr.is_null()
    }

    /// Copies `bytes` to the start of the allocation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotHostVisible`] when the allocation has no mapped
    /// pointer, and [`Error::InvalidState`] when `bytes` does not fit.
    pub fn set_data(&self, bytes: &[u8]) -> Result<()> {
        if self.mapped_ptr.is_null() {
            return Err(Error::NotHostVisible);
        }
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(Error::InvalidState(format!(
                "write of {} bytes exceeds allocation of {} bytes",
                bytes.len(),
                self.size
            )));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped_ptr, bytes.len());
        }

        Ok(())
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(device) => unsafe {
                if !self.mapped_ptr.is_null() {
                    device.handle().unmap_memory(self.memory);
                }
                device.handle().free_memory(self.memory, None);
            },
            Err(_) => error!("device memory outlived its device; skipping native free"),
        }
        debug!("freed {} bytes of device memory", self.size);
    }
}
