// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_assets::TextureData;
use tracing::info;

use crate::context::DeviceContext;
use crate::error::{GpuError, VkResultExt};
use crate::memory::{GpuImage, ImageDesc};
use crate::mipmap::{generate_mips, mip_level_count};
use crate::transfer::{copy_pixels_to_image, transition_image_layout};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Sampled, fully mipmapped RGBA8 texture and its sampler.
pub struct Texture {
    device: ash::Device,
    pub sampler: vk::Sampler,
    pub image: GpuImage,
}

impl Texture {
    pub unsafe fn upload(
        ctx: &DeviceContext,
        pool: vk::CommandPool,
        data: &TextureData,
    ) -> Result<Self, GpuError> {
        let mip_levels = mip_level_count(data.width, data.height);
        let mut image = GpuImage::new(
            ctx,
            ImageDesc {
                width: data.width,
                height: data.height,
                mip_levels,
                samples: vk::SampleCountFlags::TYPE_1,
                format: TEXTURE_FORMAT,
                // TRANSFER_SRC: lower levels are blitted from higher ones
                usage: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        transition_image_layout(
            ctx,
            pool,
            image.image,
            TEXTURE_FORMAT,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            mip_levels,
        )?;
        copy_pixels_to_image(ctx, pool, &image, &data.pixels)?;
        // leaves every level in SHADER_READ_ONLY_OPTIMAL
        generate_mips(ctx, pool, &image)?;
        image.create_view(vk::ImageAspectFlags::COLOR)?;

        let sampler = create_sampler(ctx, mip_levels)?;
        info!(
            "vk: texture {}x{} uploaded with {} mip levels",
            data.width, data.height, mip_levels
        );
        Ok(Texture {
            device: ctx.device.clone(),
            sampler,
            image,
        })
    }
}

unsafe fn create_sampler(ctx: &DeviceContext, mip_levels: u32) -> Result<vk::Sampler, GpuError> {
    let ci = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: vk::TRUE,
        max_anisotropy: ctx.properties.limits.max_sampler_anisotropy,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        unnormalized_coordinates: vk::FALSE,
        compare_enable: vk::FALSE,
        compare_op: vk::CompareOp::ALWAYS,
        mip_lod_bias: 0.0,
        min_lod: 0.0,
        max_lod: mip_levels as f32,
        ..Default::default()
    };
    ctx.device
        .create_sampler(&ci, None)
        .call("vkCreateSampler")
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}
