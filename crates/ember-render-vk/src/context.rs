// SPDX-License-Identifier: CEPL-1.0
use ash::khr::{surface, swapchain};
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::info;

use crate::device::{self, EnabledFeatures, QueueFamilies};
use crate::error::{GpuError, VkResultExt};
use crate::instance::InstanceOwner;

/// Owns the presentation surface. Must drop before the instance it was
/// created from.
pub struct SurfaceOwner {
    pub loader: surface::Instance,
    pub handle: vk::SurfaceKHR,
}

impl SurfaceOwner {
    unsafe fn new(
        instance: &InstanceOwner,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self, GpuError> {
        let loader = surface::Instance::new(&instance.entry, instance);
        let handle = ash_window::create_surface(&instance.entry, instance, display, window, None)
            .call("vkCreateSurfaceKHR")?;
        Ok(SurfaceOwner { loader, handle })
    }
}

impl Drop for SurfaceOwner {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

/// Everything that lives exactly as long as the window: instance, surface,
/// physical + logical device and its queues. Swapchain recreation never
/// touches any of it.
pub struct DeviceContext {
    pub phys: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub features: EnabledFeatures,
    pub families: QueueFamilies,
    pub device: ash::Device,
    pub swapchain_loader: swapchain::Device,
    pub graphics_queue: vk::Queue,
    /// May be the same queue as `graphics_queue`.
    pub present_queue: vk::Queue,
    // drop order: surface, then instance
    pub surface: SurfaceOwner,
    pub instance: InstanceOwner,
}

impl DeviceContext {
    // STRICT ORDER:
    // 1) instance (WSI + optional debug utils)
    // 2) surface from THIS instance
    // 3) physical device/queues queried AGAINST THIS surface
    // 4) logical device
    // Each step owns what it created, so an early `?` unwinds steps 1-2.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation_layers: &[String],
    ) -> Result<Self, GpuError> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        let wsi = ash_window::enumerate_required_extensions(dh)
            .call("vkEnumerateInstanceExtensionProperties")?;
        let instance = InstanceOwner::new(Entry::linked(), wsi, validation_layers)?;
        let surface = SurfaceOwner::new(&instance, dh, wh)?;

        let choice = device::pick_physical_device(&instance, &surface.loader, surface.handle)?;
        let memory_properties = instance.get_physical_device_memory_properties(choice.phys);
        let device = device::create_logical_device(&instance, &choice)?;
        let graphics_queue = device.get_device_queue(choice.families.graphics, 0);
        let present_queue = device.get_device_queue(choice.families.present, 0);
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        info!(
            "vk: device ready, {} memory types, sample shading {}",
            memory_properties.memory_type_count,
            if choice.features.sample_rate_shading {
                "on"
            } else {
                "off"
            }
        );

        Ok(DeviceContext {
            phys: choice.phys,
            properties: choice.properties,
            memory_properties,
            features: choice.features,
            families: choice.families,
            device,
            swapchain_loader,
            graphics_queue,
            present_queue,
            surface,
            instance,
        })
    }

    pub unsafe fn depth_format(&self) -> Result<vk::Format, GpuError> {
        device::pick_depth_format(&self.instance, self.phys)
    }

    pub fn max_samples(&self) -> vk::SampleCountFlags {
        device::max_usable_sample_count(&self.properties.limits)
    }

    pub unsafe fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        self.instance
            .get_physical_device_format_properties(self.phys, format)
    }

    pub unsafe fn wait_idle(&self) -> Result<(), GpuError> {
        self.device.device_wait_idle().call("vkDeviceWaitIdle")
    }
}

// Owners of device-level objects must be gone before this runs. The device
// goes here; the surface and instance fields follow in declaration order.
impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe { self.device.destroy_device(None) };
    }
}
