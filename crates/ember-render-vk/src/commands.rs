// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{GpuError, VkResultExt};
use crate::mesh::GpuMesh;

/// Everything one swapchain image's command buffer draws with.
pub struct DrawInputs<'a> {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub extent: vk::Extent2D,
    pub clear: [f32; 4],
    pub framebuffers: &'a [vk::Framebuffer],
    pub sets: &'a [vk::DescriptorSet],
    pub mesh: &'a GpuMesh,
}

/// Primary command buffers, one per swapchain image, freed back to their pool.
pub struct CommandBuffers {
    device: ash::Device,
    pool: vk::CommandPool,
    pub bufs: Vec<vk::CommandBuffer>,
}

impl CommandBuffers {
    pub unsafe fn allocate(
        device: &ash::Device,
        pool: vk::CommandPool,
        count: usize,
    ) -> Result<Self, GpuError> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        let bufs = device
            .allocate_command_buffers(&alloc_info)
            .call("vkAllocateCommandBuffers")?;
        Ok(CommandBuffers {
            device: device.clone(),
            pool,
            bufs,
        })
    }

    /// Records every buffer once. They are resubmitted each frame unchanged
    /// until the next recreation or clear-color change.
    pub unsafe fn record(&self, inputs: &DrawInputs<'_>) -> Result<(), GpuError> {
        for (i, &cmd) in self.bufs.iter().enumerate() {
            self.record_one(cmd, inputs, i)?;
        }
        Ok(())
    }

    unsafe fn record_one(
        &self,
        cmd: vk::CommandBuffer,
        inputs: &DrawInputs<'_>,
        image_index: usize,
    ) -> Result<(), GpuError> {
        let d = &self.device;
        d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .call("vkResetCommandBuffer")?;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &begin)
            .call("vkBeginCommandBuffer")?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: inputs.clear,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: inputs.render_pass,
            framebuffer: inputs.framebuffers[image_index],
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: inputs.extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
        d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, inputs.pipeline);
        d.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            inputs.layout,
            0,
            std::slice::from_ref(&inputs.sets[image_index]),
            &[],
        );
        inputs.mesh.bind_and_draw(d, cmd);
        d.cmd_end_render_pass(cmd);

        d.end_command_buffer(cmd).call("vkEndCommandBuffer")
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        unsafe {
            if !self.bufs.is_empty() {
                self.device.free_command_buffers(self.pool, &self.bufs);
            }
        }
    }
}
