// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;

use ash::khr::{surface, swapchain};
use ash::{vk, Instance};
use tracing::{debug, info};

use crate::error::{GpuError, VkResultExt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// First graphics-capable family; presentation from the same family when
    /// it can, otherwise the first family that can present.
    pub fn select(
        props: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Option<Self> {
        let graphics = props
            .iter()
            .position(|q| q.queue_count > 0 && q.queue_flags.contains(vk::QueueFlags::GRAPHICS))?
            as u32;
        let present = if supports_present(graphics) {
            graphics
        } else {
            (0..props.len() as u32).find(|&i| supports_present(i))?
        };
        Some(QueueFamilies { graphics, present })
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Optional features that were found and enabled on the logical device.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnabledFeatures {
    pub sample_rate_shading: bool,
}

pub struct PhysicalChoice {
    pub phys: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub families: QueueFamilies,
    pub features: EnabledFeatures,
}

unsafe fn has_swapchain_extension(instance: &Instance, phys: vk::PhysicalDevice) -> bool {
    instance
        .enumerate_device_extension_properties(phys)
        .map(|props| {
            props
                .iter()
                .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME)
        })
        .unwrap_or(false)
}

unsafe fn suitable_families(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Option<QueueFamilies> {
    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let families = QueueFamilies::select(&qprops, |i| {
        surf_i
            .get_physical_device_surface_support(phys, i, surface)
            .unwrap_or(false)
    })?;

    if !has_swapchain_extension(instance, phys) {
        return None;
    }
    // at least one format and one present mode
    let formats = surf_i
        .get_physical_device_surface_formats(phys, surface)
        .unwrap_or_default();
    let modes = surf_i
        .get_physical_device_surface_present_modes(phys, surface)
        .unwrap_or_default();
    if formats.is_empty() || modes.is_empty() {
        return None;
    }

    let feats = instance.get_physical_device_features(phys);
    if feats.sampler_anisotropy != vk::TRUE {
        return None;
    }
    Some(families)
}

/// Picks a device that can render and present to `surface`. Discrete GPUs
/// win over everything else; otherwise the first suitable device.
pub unsafe fn pick_physical_device(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<PhysicalChoice, GpuError> {
    let mut best: Option<PhysicalChoice> = None;
    for phys in instance
        .enumerate_physical_devices()
        .call("vkEnumeratePhysicalDevices")?
    {
        let properties = instance.get_physical_device_properties(phys);
        let name = CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy();
        let Some(families) = suitable_families(instance, surf_i, surface, phys) else {
            debug!("vk: skipping unsuitable device {name}");
            continue;
        };
        let feats = instance.get_physical_device_features(phys);
        let choice = PhysicalChoice {
            phys,
            properties,
            families,
            features: EnabledFeatures {
                sample_rate_shading: feats.sample_rate_shading == vk::TRUE,
            },
        };
        let discrete = properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
        let replace = match &best {
            None => true,
            Some(b) => {
                discrete && b.properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU
            }
        };
        if replace {
            best = Some(choice);
        }
    }

    let choice = best.ok_or(GpuError::NoSuitableDevice)?;
    info!(
        "vk: using {} ({:?}), graphics family {}, present family {}",
        CStr::from_ptr(choice.properties.device_name.as_ptr()).to_string_lossy(),
        choice.properties.device_type,
        choice.families.graphics,
        choice.families.present
    );
    Ok(choice)
}

pub unsafe fn create_logical_device(
    instance: &Instance,
    choice: &PhysicalChoice,
) -> Result<ash::Device, GpuError> {
    let priorities = [1.0_f32];
    let qinfos: Vec<_> = choice
        .families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: vk::TRUE,
        sample_rate_shading: if choice.features.sample_rate_shading {
            vk::TRUE
        } else {
            vk::FALSE
        },
        ..Default::default()
    };
    let device_exts = [swapchain::NAME.as_ptr()];

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: qinfos.len() as u32,
        p_queue_create_infos: qinfos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };
    instance
        .create_device(choice.phys, &dinfo, None)
        .call("vkCreateDevice")
}

/// Highest sample count usable for both color and depth framebuffers.
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts =
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&c| counts.contains(c))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate whose optimal-tiling features include depth attachments.
pub fn choose_depth_format(
    optimal_features: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> Result<vk::Format, GpuError> {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&f| optimal_features(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
        .ok_or(GpuError::NoDepthFormat)
}

pub unsafe fn pick_depth_format(
    instance: &Instance,
    phys: vk::PhysicalDevice,
) -> Result<vk::Format, GpuError> {
    choose_depth_format(|f| {
        instance
            .get_physical_device_format_properties(phys, f)
            .optimal_tiling_features
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn same_family_preferred_for_present() {
        let props = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let q = QueueFamilies::select(&props, |_| true).unwrap();
        assert_eq!(q, QueueFamilies { graphics: 1, present: 1 });
        assert!(q.is_shared());
        assert_eq!(q.unique(), vec![1]);
    }

    #[test]
    fn split_families_when_graphics_cannot_present() {
        let props = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let q = QueueFamilies::select(&props, |i| i == 1).unwrap();
        assert_eq!(q, QueueFamilies { graphics: 0, present: 1 });
        assert_eq!(q.unique(), vec![0, 1]);
    }

    #[test]
    fn no_present_or_no_graphics_is_unsuitable() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilies::select(&props, |_| false).is_none());
        let props = [family(vk::QueueFlags::COMPUTE)];
        assert!(QueueFamilies::select(&props, |_| true).is_none());
    }

    #[test]
    fn sample_count_is_highest_common_bit() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_4);

        let single = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&single), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn depth_format_follows_candidate_order() {
        let only_d24 = |f| {
            if f == vk::Format::D24_UNORM_S8_UINT || f == vk::Format::D32_SFLOAT_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            }
        };
        assert_eq!(
            choose_depth_format(only_d24).unwrap(),
            vk::Format::D32_SFLOAT_S8_UINT
        );
        assert!(matches!(
            choose_depth_format(|_| vk::FormatFeatureFlags::empty()),
            Err(GpuError::NoDepthFormat)
        ));
    }
}
