// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_assets::MeshData;
use tracing::info;

use crate::context::DeviceContext;
use crate::error::GpuError;
use crate::memory::GpuBuffer;
use crate::transfer::upload_to_device_local;

/// Device-local vertex and 32-bit index buffers.
pub struct GpuMesh {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
}

impl GpuMesh {
    pub unsafe fn upload(
        ctx: &DeviceContext,
        pool: vk::CommandPool,
        mesh: &MeshData,
    ) -> Result<Self, GpuError> {
        let vertices = upload_to_device_local(
            ctx,
            pool,
            mesh.vertex_bytes(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let indices = upload_to_device_local(
            ctx,
            pool,
            mesh.index_bytes(),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        info!(
            "vk: mesh uploaded, {} vertices / {} indices",
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(GpuMesh {
            vertices,
            indices,
            index_count: mesh.indices.len() as u32,
        })
    }

    pub unsafe fn bind_and_draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.buffer], &[0]);
        device.cmd_bind_index_buffer(cmd, self.indices.buffer, 0, vk::IndexType::UINT32);
        device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
    }
}
