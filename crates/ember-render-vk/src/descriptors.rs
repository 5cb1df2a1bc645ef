// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_math::UniformBlock;

use crate::context::DeviceContext;
use crate::error::{GpuError, VkResultExt};
use crate::memory::GpuBuffer;
use crate::texture::Texture;

/// One host-visible uniform buffer and one descriptor set per swapchain
/// image. Set `i` points at buffer `i` and the shared texture.
pub struct UniformSet {
    device: ash::Device,
    pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
    pub buffers: Vec<GpuBuffer>,
}

impl UniformSet {
    pub unsafe fn new(
        ctx: &DeviceContext,
        set_layout: vk::DescriptorSetLayout,
        image_count: usize,
        texture: &Texture,
    ) -> Result<Self, GpuError> {
        let n = image_count as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: n,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: n,
            },
        ];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: n,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        let pool = ctx
            .device
            .create_descriptor_pool(&pool_ci, None)
            .call("vkCreateDescriptorPool")?;
        let mut out = UniformSet {
            device: ctx.device.clone(),
            pool,
            sets: Vec::new(),
            buffers: Vec::with_capacity(image_count),
        };

        for _ in 0..image_count {
            out.buffers.push(GpuBuffer::host_visible(
                ctx,
                UniformBlock::SIZE as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?);
        }

        let layouts = vec![set_layout; image_count];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: pool,
            descriptor_set_count: n,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        out.sets = ctx
            .device
            .allocate_descriptor_sets(&alloc)
            .call("vkAllocateDescriptorSets")?;

        let image_info = vk::DescriptorImageInfo {
            sampler: texture.sampler,
            image_view: texture.image.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        for (set, buf) in out.sets.iter().zip(&out.buffers) {
            let buffer_info = vk::DescriptorBufferInfo {
                buffer: buf.buffer,
                offset: 0,
                range: UniformBlock::SIZE as vk::DeviceSize,
            };
            let writes = [
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: *set,
                    dst_binding: 0,
                    dst_array_element: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: &buffer_info,
                    ..Default::default()
                },
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: *set,
                    dst_binding: 1,
                    dst_array_element: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    p_image_info: &image_info,
                    ..Default::default()
                },
            ];
            ctx.device.update_descriptor_sets(&writes, &[]);
        }
        Ok(out)
    }

    /// Map, copy, unmap into the buffer of swapchain image `image`. The
    /// caller guarantees no submission still reads it.
    pub unsafe fn write(&self, image: usize, block: &UniformBlock) -> Result<(), GpuError> {
        self.buffers[image].write_with(UniformBlock::SIZE, |dst| block.write_to(dst))
    }
}

// Sets are freed with their pool; buffers drop afterwards as fields.
impl Drop for UniformSet {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}
