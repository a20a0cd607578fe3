//! GPU buffers and typed buffer views.
//!
//! # Overview
//!
//! - [`Buffer`] is a memory-backed resource: a `VkBuffer` bound to its own
//!   dedicated, host-visible [`DeviceMemory`] so the caller can upload with
//!   [`set_data`](Buffer::set_data).
//! - [`BufferView`] reinterprets a region of a buffer under a texel format.
//!   It holds a back-reference to its source and becomes logically invalid
//!   (not auto-nulled) if the source is destroyed first.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::buffer::Buffer;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), lumen_rhi::Error> {
//! let vertices: [f32; 18] = [0.0; 18];
//! let buffer = Buffer::new(
//!     &device,
//!     (vertices.len() * size_of::<f32>()) as u64,
//!     vk::BufferUsageFlags::VERTEX_BUFFER,
//! )?;
//! buffer.set_data(bytemuck::cast_slice(&vertices))?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use lumen_core::BackRef;
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::memory::DeviceMemory;

/// A memory-backed buffer resource.
pub struct Buffer {
    /// The device this buffer belongs to.
    device: BackRef<Device>,
    /// Vulkan buffer handle.
    buffer: vk::Buffer,
    /// The dedicated allocation backing this buffer.
    memory: DeviceMemory,
    /// Buffer size in bytes.
    size: vk::DeviceSize,
    /// Declared usage.
    usage: vk::BufferUsageFlags,
}

impl Buffer {
    /// Creates a buffer of `size` bytes with its own host-visible allocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero, buffer creation fails, or no
    /// suitable memory is available.
    pub fn new(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Arc<Self>> {
        if size == 0 {
            return Err(Error::InvalidState(
                "buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let memory = DeviceMemory::new(
            device,
            requirements.size,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, memory.handle(), 0)?;
        }

        debug!("created buffer: {size} bytes, {usage:?}");

        Ok(Arc::new(Self {
            device: BackRef::new(device),
            buffer,
            memory,
            size,
            usage,
        }))
    }

    /// Creates a buffer and uploads `data` into it.
    ///
    /// # Errors
    ///
    /// Returns an error if creation or the upload fails.
    pub fn new_with_data(
        device: &Arc<Device>,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> Result<Arc<Self>> {
        let buffer = Self::new(device, data.len() as vk::DeviceSize, usage)?;
        buffer.set_data(data)?;
        Ok(buffer)
    }

    /// Copies `data` to the start of the buffer's allocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the data does not fit.
    pub fn set_data(&self, data: &[u8]) -> Result<()> {
        self.memory.set_data(data)
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the declared usage.
    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
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

impl Drop for Buffer {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(device) => unsafe {
                device.handle().destroy_buffer(self.buffer, None);
            },
            Err(_) => error!("buffer outlived its device; skipping native destruction"),
        }
        debug!("destroyed buffer ({} bytes)", self.size);
    }
}

/// A typed reinterpretation of a buffer region.
pub struct BufferView {
    /// The device the view belongs to.
    device: BackRef<Device>,
    /// The buffer this view reads from.
    buffer: BackRef<Buffer>,
    /// Vulkan buffer view handle.
    view: vk::BufferView,
    /// Texel format the region is read as.
    format: vk::Format,
}

impl BufferView {
    /// Creates a view over `range` bytes of `buffer` starting at `offset`,
    /// read as `format` texels.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is out of bounds or native creation
    /// fails.
    pub fn new(
        buffer: &Arc<Buffer>,
        format: vk::Format,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<Self> {
        if offset + range > buffer.size() {
            return Err(Error::InvalidState(format!(
                "view region {offset}+{range} exceeds buffer of {} bytes",
                buffer.size()
            )));
        }

        let device_ref = buffer.device_ref();
        let device = device_ref.upgrade()?;

        let create_info = vk::BufferViewCreateInfo::default()
            .buffer(buffer.handle())
            .format(format)
            .offset(offset)
            .range(range);

        let view = unsafe { device.handle().create_buffer_view(&create_info, None)? };

        debug!("created buffer view: {range} bytes at {offset} as {format:?}");

        Ok(Self {
            device: device_ref,
            buffer: BackRef::new(buffer),
            view,
            format,
        })
    }

    /// Returns the Vulkan buffer view handle.
    #[inline]
    pub fn handle(&self) -> vk::BufferView {
        self.view
    }

    /// Returns the texel format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the back-reference to the source buffer.
    #[inline]
    pub fn buffer(&self) -> &BackRef<Buffer> {
        &self.buffer
    }
}

impl Drop for BufferView {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Ok(device) => unsafe {
                device.handle().destroy_buffer_view(self.view, None);
            },
            Err(_) => error!("buffer view outlived its device; skipping native destruction"),
        }
    }
}
