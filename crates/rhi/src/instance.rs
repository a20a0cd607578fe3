//! Vulkan instance management.
//!
//! This module handles VkInstance creation, validation layers, and debug
//! messengers, plus enumeration of the physical devices the instance sees.
//!
//! # Overview
//!
//! The [`Instance`] struct provides a safe abstraction over the Vulkan
//! instance, including optional validation layer support for debugging.
//! Window-system integration stays outside this layer: when the caller wants
//! to present, it passes the display handle of its windowing library so the
//! matching surface extensions can be enabled.
//!
//! # Example
//!
//! ```no_run
//! use lumen_rhi::instance::Instance;
//!
//! // Headless instance with validation layers in debug builds.
//! let instance = Instance::new(cfg!(debug_assertions), None)
//!     .expect("failed to create Vulkan instance");
//!
//! let gpus = instance.physical_devices().expect("no Vulkan devices");
//! println!("first GPU: {}", gpus[0].name());
//! ```

use std::ffi::CStr;
use std::sync::Arc;

use ash::{Entry, vk};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::physical_device::PhysicalDevice;

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with optional validation layer support.
///
/// This struct manages the lifetime of the Vulkan instance and its associated
/// debug utilities. All other objects in this crate ultimately descend from
/// an `Arc<Instance>`.
pub struct Instance {
    /// Vulkan entry point loader
    entry: Entry,
    /// Vulkan instance handle
    instance: ash::Instance,
    /// Debug utils extension loader (only present when validation is enabled)
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    /// Debug messenger handle (only present when validation is enabled)
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Arguments
    ///
    /// * `enable_validation` - If true, enables validation layers and a debug
    ///   messenger when the layer is installed
    /// * `display` - Display handle of the caller's windowing library; `None`
    ///   creates a headless instance without surface extensions
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Vulkan library cannot be loaded
    /// - Required surface extensions are not available for `display`
    /// - Instance creation fails
    pub fn new(enable_validation: bool, display: Option<RawDisplayHandle>) -> Result<Arc<Self>> {
        let entry = unsafe { Entry::load()? };

        let validation_available =
            enable_validation && Self::is_validation_layer_available(&entry)?;
        if enable_validation && !validation_available {
            warn!("validation layer requested but not available, proceeding without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"lumen")
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"lumen")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extensions: Vec<*const std::ffi::c_char> = Vec::new();
        if let Some(display) = display {
            extensions.extend_from_slice(
                ash_window::enumerate_required_extensions(display)
                    .map_err(|e| Error::SurfaceError(format!("surface extensions: {e:?}")))?,
            );
        }
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Vulkan instance created with {} extension(s), validation {}",
            extensions.len(),
            if validation_available { "on" } else { "off" }
        );

        let (debug_utils, debug_messenger) = if validation_available {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));

            let messenger =
                unsafe { loader.create_debug_utils_messenger(&messenger_info, None)? };
            debug!("debug messenger installed");
            (Some(loader), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Arc::new(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        }))
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Enumerates the physical devices visible to this instance.
    ///
    /// # Errors
    ///
    /// Returns an error if enumeration fails or no device is present.
    pub fn physical_devices(&self) -> Result<Vec<PhysicalDevice>> {
        let handles = unsafe { self.instance.enumerate_physical_devices()? };
        if handles.is_empty() {
            return Err(Error::DeviceCreationFailed(
                "no Vulkan-capable physical device found".to_string(),
            ));
        }

        let devices: Vec<PhysicalDevice> = handles
            .into_iter()
            .map(|handle| PhysicalDevice::query(&self.instance, handle))
            .collect();

        debug!("enumerated {} physical device(s)", devices.len());
        Ok(devices)
    }

    fn is_validation_layer_available(entry: &Entry) -> Result<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties()? };
        Ok(layers.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name == VALIDATION_LAYER_NAME
        }))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(loader), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Routes validation messages into the tracing pipeline.
unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = unsafe {
        let p_message = (*p_callback_data).p_message;
        if p_message.is_null() {
            String::new()
        } else {
            CStr::from_ptr(p_message).to_string_lossy().into_owned()
        }
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{message}");
    } else {
        warn!(target: "vulkan", "{message}");
    }

    vk::FALSE
}
