// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::context::DeviceContext;
use crate::error::{GpuError, VkResultExt};
use crate::memory::{GpuImage, ImageDesc};
use crate::swapchain::Swapchain;
use crate::transfer::transition_image_layout;

/// Size-dependent attachments plus one framebuffer per swapchain image.
pub struct RenderTargets {
    device: ash::Device,
    pub framebuffers: Vec<vk::Framebuffer>,
    /// Multisampled color target; absent when rendering single-sampled.
    pub color: Option<GpuImage>,
    pub depth: GpuImage,
}

impl RenderTargets {
    pub unsafe fn new(
        ctx: &DeviceContext,
        pool: vk::CommandPool,
        swapchain: &Swapchain,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<Self, GpuError> {
        let extent = swapchain.extent;
        let color = if samples != vk::SampleCountFlags::TYPE_1 {
            let mut img = GpuImage::new(
                ctx,
                ImageDesc {
                    width: extent.width,
                    height: extent.height,
                    mip_levels: 1,
                    samples,
                    format: swapchain.format,
                    usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                        | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                },
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;
            img.create_view(vk::ImageAspectFlags::COLOR)?;
            transition_image_layout(
                ctx,
                pool,
                img.image,
                img.format,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                1,
            )?;
            Some(img)
        } else {
            None
        };

        let mut depth = GpuImage::new(
            ctx,
            ImageDesc {
                width: extent.width,
                height: extent.height,
                mip_levels: 1,
                samples,
                format: depth_format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        // the view addresses depth only, even for stencil formats
        depth.create_view(vk::ImageAspectFlags::DEPTH)?;
        transition_image_layout(
            ctx,
            pool,
            depth.image,
            depth_format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            1,
        )?;

        let mut out = RenderTargets {
            device: ctx.device.clone(),
            framebuffers: Vec::with_capacity(swapchain.image_count()),
            color,
            depth,
        };
        for &swap_view in &swapchain.views {
            let attachments = out.attachments_for(swap_view);
            let ci = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = ctx
                .device
                .create_framebuffer(&ci, None)
                .call("vkCreateFramebuffer")?;
            out.framebuffers.push(fb);
        }
        Ok(out)
    }

    /// Attachment order must match the render pass: color, depth, resolve.
    fn attachments_for(&self, swap_view: vk::ImageView) -> Vec<vk::ImageView> {
        match &self.color {
            Some(color) => vec![color.view, self.depth.view, swap_view],
            None => vec![swap_view, self.depth.view],
        }
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        unsafe {
            for &fb in &self.framebuffers {
                self.device.destroy_framebuffer(fb, None);
            }
        }
    }
}
