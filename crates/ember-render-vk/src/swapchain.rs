// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use ember_render::RenderSize;
use tracing::info;

use crate::context::DeviceContext;
use crate::device::QueueFamilies;
use crate::error::{GpuError, VkResultExt};
use crate::memory::create_image_view;

/// What the surface currently allows; re-queried on every (re)creation.
#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn query(ctx: &DeviceContext) -> Result<Self, GpuError> {
        let s = &ctx.surface.loader;
        Ok(SwapchainSupport {
            caps: s
                .get_physical_device_surface_capabilities(ctx.phys, ctx.surface.handle)
                .call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
            formats: s
                .get_physical_device_surface_formats(ctx.phys, ctx.surface.handle)
                .call("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
            present_modes: s
                .get_physical_device_surface_present_modes(ctx.phys, ctx.surface.handle)
                .call("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
        })
    }
}

const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// BGRA8 UNORM in sRGB-nonlinear when offered. A lone UNDEFINED entry means
/// the surface takes anything, so the preferred pair is used. Otherwise the
/// first entry.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return PREFERRED_FORMAT;
        }
    }
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
        .unwrap_or(PREFERRED_FORMAT)
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// `requested` raised to `min` and, unless `max` is 0 (no limit), capped at `max`.
pub fn choose_image_count(min: u32, max: u32, requested: u32) -> u32 {
    let count = requested.max(min);
    if max == 0 {
        count
    } else {
        count.min(max)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing_mode: vk::SharingMode,
    /// Only meaningful for CONCURRENT sharing.
    pub queue_families: Vec<u32>,
}

impl SwapchainPlan {
    pub fn from_support(
        support: &SwapchainSupport,
        families: QueueFamilies,
        want: RenderSize,
    ) -> Self {
        let caps = &support.caps;
        let format = choose_surface_format(&support.formats);
        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };
        let (sharing_mode, queue_families) = if families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, families.unique())
        };
        SwapchainPlan {
            format: format.format,
            color_space: format.color_space,
            present_mode: choose_present_mode(&support.present_modes),
            extent: extent_from_caps(caps, want),
            image_count: choose_image_count(
                caps.min_image_count,
                caps.max_image_count,
                caps.min_image_count + 1,
            ),
            pre_transform,
            sharing_mode,
            queue_families,
        }
    }
}

/// The presentable images and one color view per image.
pub struct Swapchain {
    device: ash::Device,
    loader: swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// `old` may be null; when it is not, the caller destroys it after this
    /// returns.
    pub unsafe fn new(
        ctx: &DeviceContext,
        support: &SwapchainSupport,
        want: RenderSize,
        old: vk::SwapchainKHR,
    ) -> Result<Self, GpuError> {
        let plan = SwapchainPlan::from_support(support, ctx.families, want);

        info!(
            "vk: swapchain format {:?}/{:?}, present_mode {:?}, extent {}x{}, images(min={} max={} picked={})",
            plan.format,
            plan.color_space,
            plan.present_mode,
            plan.extent.width,
            plan.extent.height,
            support.caps.min_image_count,
            support.caps.max_image_count,
            plan.image_count
        );

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface.handle,
            min_image_count: plan.image_count,
            image_format: plan.format,
            image_color_space: plan.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: plan.sharing_mode,
            queue_family_index_count: plan.queue_families.len() as u32,
            p_queue_family_indices: plan.queue_families.as_ptr(),
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };

        let loader = ctx.swapchain_loader.clone();
        let handle = loader
            .create_swapchain(&swap_info, None)
            .call("vkCreateSwapchainKHR")?;
        let mut out = Swapchain {
            device: ctx.device.clone(),
            loader,
            handle,
            images: Vec::new(),
            views: Vec::new(),
            format: plan.format,
            extent: plan.extent,
        };
        out.images = out
            .loader
            .get_swapchain_images(handle)
            .call("vkGetSwapchainImagesKHR")?;
        for &img in &out.images {
            let view =
                create_image_view(&out.device, img, out.format, vk::ImageAspectFlags::COLOR, 1)?;
            out.views.push(view);
        }
        Ok(out)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

// Views before the swapchain that owns their images.
impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &iv in &self.views {
                self.device.destroy_image_view(iv, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn support() -> SwapchainSupport {
        SwapchainSupport {
            caps: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![
                fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    const SHARED: QueueFamilies = QueueFamilies {
        graphics: 0,
        present: 0,
    };

    #[test]
    fn format_prefers_bgra_unorm_srgb() {
        let f = choose_surface_format(&support().formats);
        assert_eq!(f.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(f.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn undefined_only_means_free_choice() {
        let f = choose_surface_format(&[fmt(
            vk::Format::UNDEFINED,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )]);
        assert_eq!(f.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn format_falls_back_to_first() {
        let f = choose_surface_format(&[
            fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ]);
        assert_eq!(f.format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn present_mode_order() {
        use vk::PresentModeKHR as P;
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE, P::MAILBOX]), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE]), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO]), P::FIFO);
        assert_eq!(choose_present_mode(&[]), P::FIFO);
    }

    #[test]
    fn extent_uses_current_when_definite() {
        let mut caps = support().caps;
        caps.current_extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let e = extent_from_caps(&caps, RenderSize { width: 10, height: 10 });
        assert_eq!((e.width, e.height), (1280, 720));
    }

    #[test]
    fn extent_clamps_requested_when_free() {
        let caps = support().caps;
        let e = extent_from_caps(
            &caps,
            RenderSize {
                width: 10_000,
                height: 0,
            },
        );
        assert_eq!((e.width, e.height), (4096, 1));
    }

    #[test]
    fn image_count_respects_bounds() {
        assert_eq!(choose_image_count(2, 0, 3), 3);
        assert_eq!(choose_image_count(2, 2, 3), 2);
        assert_eq!(choose_image_count(3, 8, 2), 3);
    }

    #[test]
    fn sharing_mode_follows_queue_families() {
        let s = support();
        let want = RenderSize {
            width: 800,
            height: 600,
        };
        let shared = SwapchainPlan::from_support(&s, SHARED, want);
        assert_eq!(shared.sharing_mode, vk::SharingMode::EXCLUSIVE);
        assert!(shared.queue_families.is_empty());

        let split = SwapchainPlan::from_support(
            &s,
            QueueFamilies {
                graphics: 0,
                present: 2,
            },
            want,
        );
        assert_eq!(split.sharing_mode, vk::SharingMode::CONCURRENT);
        assert_eq!(split.queue_families, vec![0, 2]);
    }

    #[test]
    fn rebuilding_from_unchanged_support_is_identical() {
        let s = support();
        let want = RenderSize {
            width: 800,
            height: 600,
        };
        let first = SwapchainPlan::from_support(&s, SHARED, want);
        for _ in 0..3 {
            assert_eq!(SwapchainPlan::from_support(&s, SHARED, want), first);
        }
        assert_eq!(first.image_count, 3);
        assert_eq!(first.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!((first.extent.width, first.extent.height), (800, 600));
    }
}
