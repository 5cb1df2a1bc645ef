// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::GpuError;

/// The only image layout transitions this renderer performs. Each one maps to
/// a fixed access mask / pipeline stage pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutTransition {
    UndefinedToTransferDst,
    TransferDstToShaderRead,
    UndefinedToDepthAttachment,
    UndefinedToColorAttachment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    pub fn lookup(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<Self, GpuError> {
        use vk::ImageLayout as L;
        match (old, new) {
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => Ok(Self::UndefinedToTransferDst),
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
                Ok(Self::TransferDstToShaderRead)
            }
            (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => {
                Ok(Self::UndefinedToDepthAttachment)
            }
            (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => Ok(Self::UndefinedToColorAttachment),
            _ => Err(GpuError::UnsupportedLayoutTransition { old, new }),
        }
    }

    pub fn layouts(self) -> (vk::ImageLayout, vk::ImageLayout) {
        use vk::ImageLayout as L;
        match self {
            Self::UndefinedToTransferDst => (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
            Self::TransferDstToShaderRead => (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            Self::UndefinedToDepthAttachment => (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            Self::UndefinedToColorAttachment => (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL),
        }
    }

    pub fn masks(self) -> BarrierMasks {
        use vk::AccessFlags as A;
        use vk::PipelineStageFlags as S;
        match self {
            Self::UndefinedToTransferDst => BarrierMasks {
                src_access: A::empty(),
                dst_access: A::TRANSFER_WRITE,
                src_stage: S::TOP_OF_PIPE,
                dst_stage: S::TRANSFER,
            },
            Self::TransferDstToShaderRead => BarrierMasks {
                src_access: A::TRANSFER_WRITE,
                dst_access: A::SHADER_READ,
                src_stage: S::TRANSFER,
                dst_stage: S::FRAGMENT_SHADER,
            },
            Self::UndefinedToDepthAttachment => BarrierMasks {
                src_access: A::empty(),
                dst_access: A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                src_stage: S::TOP_OF_PIPE,
                dst_stage: S::EARLY_FRAGMENT_TESTS,
            },
            Self::UndefinedToColorAttachment => BarrierMasks {
                src_access: A::empty(),
                dst_access: A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
                src_stage: S::TOP_OF_PIPE,
                dst_stage: S::COLOR_ATTACHMENT_OUTPUT,
            },
        }
    }

    pub fn aspect(self, format: vk::Format) -> vk::ImageAspectFlags {
        match self {
            Self::UndefinedToDepthAttachment if has_stencil(format) => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            Self::UndefinedToDepthAttachment => vk::ImageAspectFlags::DEPTH,
            _ => vk::ImageAspectFlags::COLOR,
        }
    }

    /// Barrier covering every mip level of `image`.
    pub fn barrier(
        self,
        image: vk::Image,
        format: vk::Format,
        mip_levels: u32,
    ) -> vk::ImageMemoryBarrier<'static> {
        let (old_layout, new_layout) = self.layouts();
        let masks = self.masks();
        vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask: masks.src_access,
            dst_access_mask: masks.dst_access,
            old_layout,
            new_layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: self.aspect(format),
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        }
    }

    pub unsafe fn record(
        self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        format: vk::Format,
        mip_levels: u32,
    ) {
        let masks = self.masks();
        let barrier = self.barrier(image, format, mip_levels);
        device.cmd_pipeline_barrier(
            cmd,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&barrier),
        );
    }
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    #[test]
    fn whitelisted_pairs_map_to_documented_masks() {
        let cases = [
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL, A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER),
            (
                L::TRANSFER_DST_OPTIMAL,
                L::SHADER_READ_ONLY_OPTIMAL,
                A::TRANSFER_WRITE,
                A::SHADER_READ,
                S::TRANSFER,
                S::FRAGMENT_SHADER,
            ),
            (
                L::UNDEFINED,
                L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                A::empty(),
                A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                S::TOP_OF_PIPE,
                S::EARLY_FRAGMENT_TESTS,
            ),
            (
                L::UNDEFINED,
                L::COLOR_ATTACHMENT_OPTIMAL,
                A::empty(),
                A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
                S::TOP_OF_PIPE,
                S::COLOR_ATTACHMENT_OUTPUT,
            ),
        ];
        for (old, new, src_access, dst_access, src_stage, dst_stage) in cases {
            let t = LayoutTransition::lookup(old, new).unwrap();
            assert_eq!(t.layouts(), (old, new));
            assert_eq!(
                t.masks(),
                BarrierMasks {
                    src_access,
                    dst_access,
                    src_stage,
                    dst_stage
                }
            );
        }
    }

    #[test]
    fn other_pairs_are_rejected() {
        for (old, new) in [
            (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL),
            (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL),
            (L::UNDEFINED, L::PRESENT_SRC_KHR),
            (L::UNDEFINED, L::UNDEFINED),
        ] {
            match LayoutTransition::lookup(old, new) {
                Err(GpuError::UnsupportedLayoutTransition { old: o, new: n }) => {
                    assert_eq!((o, n), (old, new))
                }
                other => panic!("{old:?} -> {new:?} gave {other:?}"),
            }
        }
    }

    #[test]
    fn depth_aspect_includes_stencil_only_for_stencil_formats() {
        let t = LayoutTransition::UndefinedToDepthAttachment;
        assert_eq!(t.aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            t.aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            LayoutTransition::UndefinedToTransferDst.aspect(vk::Format::R8G8B8A8_UNORM),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn barrier_covers_all_levels() {
        let b = LayoutTransition::UndefinedToTransferDst.barrier(
            vk::Image::null(),
            vk::Format::R8G8B8A8_UNORM,
            9,
        );
        assert_eq!(b.subresource_range.base_mip_level, 0);
        assert_eq!(b.subresource_range.level_count, 9);
        assert_eq!(b.old_layout, L::UNDEFINED);
        assert_eq!(b.new_layout, L::TRANSFER_DST_OPTIMAL);
        assert_eq!(b.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }
}
