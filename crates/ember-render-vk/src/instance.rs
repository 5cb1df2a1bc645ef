// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr, CString};
use std::ops::Deref;

use ash::ext::debug_utils as ext_debug;
use ash::{vk, Entry, Instance};
use tracing::{debug, error, info, trace, warn};

use crate::error::{GpuError, VkResultExt};

const APP_NAME: &CStr = c"ember";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{types:?}: {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{types:?}: {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{types:?}: {msg}");
    } else {
        trace!(target: "vulkan", "{types:?}: {msg}");
    }
    vk::FALSE
}

/// Validation messages routed into `tracing` for the lifetime of the instance.
pub struct DebugMessenger {
    loader: ext_debug::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self, GpuError> {
        let loader = ext_debug::Instance::new(entry, instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let messenger = loader
            .create_debug_utils_messenger(&ci, None)
            .call("vkCreateDebugUtilsMessengerEXT")?;
        Ok(DebugMessenger { loader, messenger })
    }

    /// Must run before the instance is destroyed.
    unsafe fn destroy(&self) {
        self.loader
            .destroy_debug_utils_messenger(self.messenger, None);
    }
}

/// Owns the instance and its optional debug messenger. Dropping it destroys
/// the messenger, then the instance, so a bring-up that fails after this
/// point leaves nothing behind.
pub struct InstanceOwner {
    pub entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
}

impl InstanceOwner {
    /// `extensions` are the WSI extensions the surface needs; debug utils is
    /// added when `layers` is non-empty.
    pub unsafe fn new(
        entry: Entry,
        extensions: &[*const c_char],
        layers: &[String],
    ) -> Result<Self, GpuError> {
        let instance = create_instance(&entry, extensions, layers)?;
        let mut owner = InstanceOwner {
            entry,
            instance,
            debug: None,
        };
        if !layers.is_empty() {
            owner.debug = Some(DebugMessenger::new(&owner.entry, &owner.instance)?);
        }
        Ok(owner)
    }
}

impl Deref for InstanceOwner {
    type Target = Instance;

    fn deref(&self) -> &Instance {
        &self.instance
    }
}

impl Drop for InstanceOwner {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
        info!("vk: instance destroyed");
    }
}

unsafe fn available_layers(entry: &Entry) -> Result<Vec<CString>, GpuError> {
    let props = entry
        .enumerate_instance_layer_properties()
        .call("vkEnumerateInstanceLayerProperties")?;
    Ok(props
        .iter()
        .map(|l| CStr::from_ptr(l.layer_name.as_ptr()).to_owned())
        .collect())
}

unsafe fn available_extensions(entry: &Entry) -> Result<Vec<CString>, GpuError> {
    let props = entry
        .enumerate_instance_extension_properties(None)
        .call("vkEnumerateInstanceExtensionProperties")?;
    Ok(props
        .iter()
        .map(|e| CStr::from_ptr(e.extension_name.as_ptr()).to_owned())
        .collect())
}

/// Every requested name must be present in `available`; the first missing one
/// is reported.
pub fn check_names<'a>(
    requested: impl IntoIterator<Item = &'a CStr>,
    available: &[CString],
) -> Result<(), &'a CStr> {
    for name in requested {
        if !available.iter().any(|a| a.as_c_str() == name) {
            return Err(name);
        }
    }
    Ok(())
}

/// Creates the instance with `extensions`, plus debug utils and the requested
/// layers when `layers` is non-empty.
unsafe fn create_instance(
    entry: &Entry,
    extensions: &[*const c_char],
    layers: &[String],
) -> Result<Instance, GpuError> {
    let validation = !layers.is_empty();

    let layer_names = layers
        .iter()
        .map(|l| CString::new(l.as_str()).map_err(|_| GpuError::MissingLayer(l.clone())))
        .collect::<Result<Vec<_>, _>>()?;
    if validation {
        let have = available_layers(entry)?;
        check_names(layer_names.iter().map(CString::as_c_str), &have)
            .map_err(|missing| GpuError::MissingLayer(missing.to_string_lossy().into_owned()))?;
    }

    let mut ext_vec = extensions.to_vec();
    if validation {
        ext_vec.push(ext_debug::NAME.as_ptr());
    }
    let have = available_extensions(entry)?;
    check_names(ext_vec.iter().map(|&p| CStr::from_ptr(p)), &have)
        .map_err(|missing| GpuError::MissingExtension(missing.to_string_lossy().into_owned()))?;

    let layer_ptrs: Vec<_> = layer_names.iter().map(|l| l.as_ptr()).collect();

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: vk::make_api_version(0, 0, 1, 0),
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: vk::make_api_version(0, 0, 1, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };
    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .call("vkCreateInstance")?;
    info!(
        "vk: instance created ({} extensions, layers: {:?})",
        ext_vec.len(),
        layers
    );
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_first_missing_name() {
        let have = vec![
            CString::new("VK_KHR_surface").unwrap(),
            CString::new("VK_EXT_debug_utils").unwrap(),
        ];
        assert!(check_names([c"VK_KHR_surface", c"VK_EXT_debug_utils"], &have).is_ok());
        let missing = check_names(
            [c"VK_KHR_surface", c"VK_KHR_xlib_surface", c"VK_KHR_wayland_surface"],
            &have,
        )
        .unwrap_err();
        assert_eq!(missing, c"VK_KHR_xlib_surface");
    }

    #[test]
    fn nothing_requested_always_passes() {
        assert!(check_names(std::iter::empty(), &[]).is_ok());
    }

    #[test]
    #[ignore = "needs a Vulkan loader"]
    fn unknown_layer_fails_before_any_handle_exists() {
        let layers = vec!["VK_LAYER_ember_does_not_exist".to_owned()];
        let err = unsafe { InstanceOwner::new(Entry::linked(), &[], &layers) }
            .err()
            .unwrap();
        assert!(matches!(err, GpuError::MissingLayer(ref l) if l == &layers[0]));
    }

    #[test]
    #[ignore = "needs a Vulkan driver"]
    fn headless_instance_is_released_on_drop() {
        let owner = unsafe { InstanceOwner::new(Entry::linked(), &[], &[]) }.unwrap();
        assert_ne!(owner.handle(), vk::Instance::null());
        let devices = unsafe { owner.enumerate_physical_devices() }.unwrap();
        drop(owner);
        // a second instance after teardown must come up cleanly
        let again = unsafe { InstanceOwner::new(Entry::linked(), &[], &[]) }.unwrap();
        assert_eq!(
            unsafe { again.enumerate_physical_devices() }.unwrap().len(),
            devices.len()
        );
    }
}
