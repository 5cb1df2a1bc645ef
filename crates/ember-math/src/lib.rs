// SPDX-License-Identifier: CEPL-1.0
//! Plain-old-data types shared between the asset loaders and the GPU side.
pub use glam::{Mat4, Vec3};

use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

/// One interleaved vertex as laid out in the vertex buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const STRIDE: u32 = size_of::<Vertex>() as u32;
    pub const POS_OFFSET: u32 = offset_of!(Vertex, pos) as u32;
    pub const NORMAL_OFFSET: u32 = offset_of!(Vertex, normal) as u32;
    pub const UV_OFFSET: u32 = offset_of!(Vertex, uv) as u32;

    pub const fn new(pos: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Vertex { pos, normal, uv }
    }
}

/// Model, view and projection matrices, column-major, 64 bytes each.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformBlock {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl Default for UniformBlock {
    fn default() -> Self {
        UniformBlock {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }
}

impl UniformBlock {
    pub const SIZE: usize = size_of::<UniformBlock>();
    pub const MODEL_OFFSET: usize = offset_of!(UniformBlock, model);
    pub const VIEW_OFFSET: usize = offset_of!(UniformBlock, view);
    pub const PROJ_OFFSET: usize = offset_of!(UniformBlock, proj);

    /// Slow turntable around +Z, seen from a fixed eye, Vulkan clip space
    /// (depth 0..1, y down).
    pub fn turntable(aspect: f32, seconds: f32) -> Self {
        let model = Mat4::from_rotation_z(seconds * std::f32::consts::FRAC_PI_4);
        let view = Mat4::look_at_rh(Vec3::new(2.0, 2.0, 2.0), Vec3::ZERO, Vec3::Z);
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect.max(1e-4), 0.1, 100.0);
        proj.y_axis.y *= -1.0;
        UniformBlock { model, view, proj }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Copies the block into a mapped region at least [`Self::SIZE`] bytes long.
    pub fn write_to(&self, dst: &mut [u8]) {
        dst[..Self::SIZE].copy_from_slice(self.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_floats(m: &Mat4) -> Vec<u8> {
        m.to_cols_array()
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect()
    }

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(Vertex::STRIDE, 32);
        assert_eq!(Vertex::POS_OFFSET, 0);
        assert_eq!(Vertex::NORMAL_OFFSET, 12);
        assert_eq!(Vertex::UV_OFFSET, 24);
    }

    #[test]
    fn uniform_block_is_192_bytes_with_fixed_offsets() {
        assert_eq!(UniformBlock::SIZE, 192);
        assert_eq!(UniformBlock::MODEL_OFFSET, 0);
        assert_eq!(UniformBlock::VIEW_OFFSET, 64);
        assert_eq!(UniformBlock::PROJ_OFFSET, 128);
    }

    #[test]
    fn mapped_bytes_round_trip() {
        let ubo = UniformBlock {
            model: Mat4::from_translation(Vec3::new(1.0, -5.0, 0.5)),
            view: Mat4::from_scale(Vec3::new(2.0, 3.0, 4.0)),
            proj: Mat4::from_cols_array(&std::array::from_fn(|i| i as f32 * 0.25)),
        };

        // stands in for the host-visible mapping
        let mut mapped = vec![0xAAu8; UniformBlock::SIZE];
        ubo.write_to(&mut mapped);

        assert_eq!(&mapped[0..64], le_floats(&ubo.model).as_slice());
        assert_eq!(&mapped[64..128], le_floats(&ubo.view).as_slice());
        assert_eq!(&mapped[128..192], le_floats(&ubo.proj).as_slice());

        let back: UniformBlock = bytemuck::pod_read_unaligned(&mapped);
        assert_eq!(back, ubo);
    }

    #[test]
    fn turntable_flips_y_for_vulkan() {
        let ubo = UniformBlock::turntable(800.0 / 600.0, 0.0);
        assert!(ubo.proj.y_axis.y < 0.0);
        assert_eq!(ubo.model, Mat4::IDENTITY);
    }
}
