// SPDX-License-Identifier: CEPL-1.0
//! One-shot command submission and staged uploads into device-local memory.
//! Everything here blocks on `vkQueueWaitIdle` and is meant for start-up.
use ash::vk;
use tracing::warn;

use crate::context::DeviceContext;
use crate::error::{GpuError, VkResultExt};
use crate::layout::LayoutTransition;
use crate::memory::{GpuBuffer, GpuImage};

/// A primary command buffer that is recorded, submitted once to the graphics
/// queue, waited on and freed.
pub struct OneShot<'a> {
    ctx: &'a DeviceContext,
    pool: vk::CommandPool,
    pub cmd: vk::CommandBuffer,
}

impl<'a> OneShot<'a> {
    pub unsafe fn begin(ctx: &'a DeviceContext, pool: vk::CommandPool) -> Result<Self, GpuError> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = ctx
            .device
            .allocate_command_buffers(&ai)
            .call("vkAllocateCommandBuffers")?[0];
        let shot = OneShot { ctx, pool, cmd };
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        ctx.device
            .begin_command_buffer(cmd, &bi)
            .call("vkBeginCommandBuffer")?;
        Ok(shot)
    }

    /// End, submit and wait for the queue to drain.
    pub unsafe fn submit_and_wait(self) -> Result<(), GpuError> {
        let d = &self.ctx.device;
        d.end_command_buffer(self.cmd)
            .call("vkEndCommandBuffer")?;
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &self.cmd,
            ..Default::default()
        };
        d.queue_submit(
            self.ctx.graphics_queue,
            std::slice::from_ref(&si),
            vk::Fence::null(),
        )
        .call("vkQueueSubmit")?;
        let waited = d
            .queue_wait_idle(self.ctx.graphics_queue)
            .call("vkQueueWaitIdle");
        drain_on_failure(waited, || {
            warn!("vk: queue wait failed, draining device before freeing one-shot");
            d.device_wait_idle().ok();
        })
    }
}

/// Runs `drain` when `waited` failed, so Drop never frees a command buffer
/// the queue may still hold.
fn drain_on_failure(waited: Result<(), GpuError>, drain: impl FnOnce()) -> Result<(), GpuError> {
    if waited.is_err() {
        drain();
    }
    waited
}

impl Drop for OneShot<'_> {
    fn drop(&mut self) {
        unsafe {
            self.ctx
                .device
                .free_command_buffers(self.pool, std::slice::from_ref(&self.cmd));
        }
    }
}

unsafe fn staging_with(ctx: &DeviceContext, data: &[u8]) -> Result<GpuBuffer, GpuError> {
    let staging = GpuBuffer::host_visible(
        ctx,
        data.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
    )?;
    staging.write(data)?;
    Ok(staging)
}

/// Copies `data` into a new device-local buffer with `usage | TRANSFER_DST`.
/// The staging buffer never outlives this call.
pub unsafe fn upload_to_device_local(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer, GpuError> {
    let size = data.len() as vk::DeviceSize;
    let staging = staging_with(ctx, data)?;
    let dst = GpuBuffer::new(
        ctx,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let shot = OneShot::begin(ctx, pool)?;
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    ctx.device.cmd_copy_buffer(
        shot.cmd,
        staging.buffer,
        dst.buffer,
        std::slice::from_ref(&region),
    );
    shot.submit_and_wait()?;
    Ok(dst)
}

/// Records one layout transition over every level of `image` in its own
/// one-shot buffer. Unsupported pairs fail before anything is recorded.
pub unsafe fn transition_image_layout(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    image: vk::Image,
    format: vk::Format,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    mip_levels: u32,
) -> Result<(), GpuError> {
    let transition = LayoutTransition::lookup(old, new)?;
    let shot = OneShot::begin(ctx, pool)?;
    transition.record(&ctx.device, shot.cmd, image, format, mip_levels);
    shot.submit_and_wait()
}

/// Fills level 0 of `image` (already in TRANSFER_DST_OPTIMAL) from `pixels`.
pub unsafe fn copy_pixels_to_image(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    image: &GpuImage,
    pixels: &[u8],
) -> Result<(), GpuError> {
    let staging = staging_with(ctx, pixels)?;
    let shot = OneShot::begin(ctx, pool)?;
    let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: vk::Extent3D {
            width: image.extent.width,
            height: image.extent.height,
            depth: 1,
        },
    };
    ctx.device.cmd_copy_buffer_to_image(
        shot.cmd,
        staging.buffer,
        image.image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        std::slice::from_ref(&region),
    );
    shot.submit_and_wait()
}

/// Resettable command pool on one queue family.
pub struct CommandPool {
    device: ash::Device,
    pub handle: vk::CommandPool,
}

impl CommandPool {
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self, GpuError> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let handle = device
            .create_command_pool(&pool_info, None)
            .call("vkCreateCommandPool")?;
        Ok(CommandPool {
            device: device.clone(),
            handle,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_wait_drains_before_returning() {
        let mut drained = false;
        let lost = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST).call("vkQueueWaitIdle");
        let err = drain_on_failure(lost, || drained = true).unwrap_err();
        assert!(drained);
        assert!(matches!(
            err,
            GpuError::Vk {
                call: "vkQueueWaitIdle",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        ));
    }

    #[test]
    fn successful_wait_skips_drain() {
        let mut drained = false;
        drain_on_failure(Ok(()), || drained = true).unwrap();
        assert!(!drained);
    }
}
