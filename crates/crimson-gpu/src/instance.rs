//! Vulkan instance creation and validation messaging.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, c_void, CStr, CString};

/// Validation layer enabled when validation is requested.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance extensions needed to present to `display` plus debug utils when
/// validation is enabled.
pub fn required_instance_extensions(
    display: Option<RawDisplayHandle>,
    enable_validation: bool,
) -> Result<Vec<*const c_char>> {
    let mut extensions = match display {
        Some(display) => ash_window::enumerate_required_extensions(display)
            .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?
            .to_vec(),
        None => Vec::new(),
    };

    if enable_validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[cfg(target_os = "macos")]
    extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());

    Ok(extensions)
}

/// Create a Vulkan instance.
///
/// Fails when the validation layer or any required extension is missing.
///
/// # Safety
/// The entry must be a valid Vulkan entry point and every pointer in
/// `extension_names` must reference a nul-terminated string that outlives the call.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    extension_names: &[*const c_char],
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("Application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(c"Crimson")
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_3);

    let layers: Vec<&CStr> = if enable_validation {
        vec![VALIDATION_LAYER]
    } else {
        Vec::new()
    };

    // SAFETY: entry is valid per the caller contract
    let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
    for layer in &layers {
        let found = available_layers
            .iter()
            .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == *layer));
        if !found {
            tracing::error!("Required layer {} is not available", layer.to_string_lossy());
            return Err(GpuError::LayerNotSupported(
                layer.to_string_lossy().into_owned(),
            ));
        }
    }

    // SAFETY: entry is valid per the caller contract
    let available_extensions = unsafe { entry.enumerate_instance_extension_properties(None)? };
    for &ext in extension_names {
        // SAFETY: caller guarantees nul-terminated extension names
        let ext = unsafe { CStr::from_ptr(ext) };
        let found = available_extensions
            .iter()
            .any(|props| props.extension_name_as_c_str().is_ok_and(|name| name == ext));
        if !found {
            tracing::error!("Required instance extension not supported: {}", ext.to_string_lossy());
            return Err(GpuError::ExtensionNotSupported(
                ext.to_string_lossy().into_owned(),
            ));
        }
    }

    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    // SAFETY: all pointers in create_info live until this call returns
    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        tracing::error!("Failed to create instance: {e}");
        GpuError::from(e)
    })?;

    tracing::debug!("Vulkan instance created");
    Ok(instance)
}

/// Validation-layer messenger that forwards messages into `tracing`.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Install the messenger.
    ///
    /// # Safety
    /// The instance must have been created with the debug utils extension.
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            )
            .pfn_user_callback(Some(debug_callback));

        // SAFETY: loader was created from a valid instance
        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };

        Ok(Self { loader, messenger })
    }

    /// Remove the messenger.
    ///
    /// # Safety
    /// Must run before the owning instance is destroyed.
    pub unsafe fn destroy(&self) {
        // SAFETY: caller guarantees the instance is still alive
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }

    // SAFETY: the loader passes a valid callback struct for the duration of the call
    let message_ptr = unsafe { (*callback_data).p_message };
    let message = if message_ptr.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        // SAFETY: non-null p_message is a nul-terminated string
        unsafe { CStr::from_ptr(message_ptr) }.to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!("[{message_type:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!("[{message_type:?}] {message}");
    } else {
        tracing::trace!("[{message_type:?}] {message}");
    }

    vk::FALSE
}
