// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::context::DeviceContext;
use crate::error::GpuError;
use crate::memory::GpuImage;
use crate::transfer::OneShot;

/// `floor(log2(max(w, h))) + 1`
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

fn half(v: i32) -> i32 {
    (v / 2).max(1)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelBarrier {
    pub level: u32,
    pub old: vk::ImageLayout,
    pub new: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MipStep {
    Barrier(LevelBarrier),
    Blit {
        src_level: u32,
        src_extent: (i32, i32),
        dst_level: u32,
        dst_extent: (i32, i32),
    },
}

/// Ordered barriers and blits that fill levels 1.. from level 0 and leave
/// every level in SHADER_READ_ONLY_OPTIMAL. All levels start in
/// TRANSFER_DST_OPTIMAL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MipPlan {
    pub steps: Vec<MipStep>,
}

impl MipPlan {
    pub fn new(width: u32, height: u32, levels: u32) -> Self {
        use vk::AccessFlags as A;
        use vk::ImageLayout as L;
        use vk::PipelineStageFlags as S;

        let mut steps = Vec::with_capacity(levels as usize * 3);
        let (mut w, mut h) = (width as i32, height as i32);

        for i in 1..levels {
            steps.push(MipStep::Barrier(LevelBarrier {
                level: i - 1,
                old: L::TRANSFER_DST_OPTIMAL,
                new: L::TRANSFER_SRC_OPTIMAL,
                src_access: A::TRANSFER_WRITE,
                dst_access: A::TRANSFER_READ,
                src_stage: S::TRANSFER,
                dst_stage: S::TRANSFER,
            }));
            steps.push(MipStep::Blit {
                src_level: i - 1,
                src_extent: (w, h),
                dst_level: i,
                dst_extent: (half(w), half(h)),
            });
            steps.push(MipStep::Barrier(LevelBarrier {
                level: i - 1,
                old: L::TRANSFER_SRC_OPTIMAL,
                new: L::SHADER_READ_ONLY_OPTIMAL,
                src_access: A::TRANSFER_READ,
                dst_access: A::SHADER_READ,
                src_stage: S::TRANSFER,
                dst_stage: S::FRAGMENT_SHADER,
            }));
            w = half(w);
            h = half(h);
        }

        steps.push(MipStep::Barrier(LevelBarrier {
            level: levels.saturating_sub(1),
            old: L::TRANSFER_DST_OPTIMAL,
            new: L::SHADER_READ_ONLY_OPTIMAL,
            src_access: A::TRANSFER_WRITE,
            dst_access: A::SHADER_READ,
            src_stage: S::TRANSFER,
            dst_stage: S::FRAGMENT_SHADER,
        }));

        MipPlan { steps }
    }

    pub unsafe fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image) {
        for step in &self.steps {
            match *step {
                MipStep::Barrier(b) => {
                    let barrier = vk::ImageMemoryBarrier {
                        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                        src_access_mask: b.src_access,
                        dst_access_mask: b.dst_access,
                        old_layout: b.old,
                        new_layout: b.new,
                        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                        image,
                        subresource_range: vk::ImageSubresourceRange {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: b.level,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: 1,
                        },
                        ..Default::default()
                    };
                    device.cmd_pipeline_barrier(
                        cmd,
                        b.src_stage,
                        b.dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        std::slice::from_ref(&barrier),
                    );
                }
                MipStep::Blit {
                    src_level,
                    src_extent,
                    dst_level,
                    dst_extent,
                } => {
                    let layers = |mip_level| vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level,
                        base_array_layer: 0,
                        layer_count: 1,
                    };
                    let blit = vk::ImageBlit {
                        src_subresource: layers(src_level),
                        src_offsets: [
                            vk::Offset3D::default(),
                            vk::Offset3D {
                                x: src_extent.0,
                                y: src_extent.1,
                                z: 1,
                            },
                        ],
                        dst_subresource: layers(dst_level),
                        dst_offsets: [
                            vk::Offset3D::default(),
                            vk::Offset3D {
                                x: dst_extent.0,
                                y: dst_extent.1,
                                z: 1,
                            },
                        ],
                    };
                    device.cmd_blit_image(
                        cmd,
                        image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        std::slice::from_ref(&blit),
                        vk::Filter::LINEAR,
                    );
                }
            }
        }
    }
}

/// Fills every mip level of `image` by successive linear blits. Level 0 must
/// already hold the pixels and all levels must be in TRANSFER_DST_OPTIMAL.
pub unsafe fn generate_mips(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    image: &GpuImage,
) -> Result<(), GpuError> {
    let props = ctx.format_properties(image.format);
    if !props
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    {
        return Err(GpuError::LinearBlitUnsupported(image.format));
    }

    let plan = MipPlan::new(image.extent.width, image.extent.height, image.mip_levels);
    let shot = OneShot::begin(ctx, pool)?;
    plan.record(&ctx.device, shot.cmd, image.image);
    shot.submit_and_wait()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays the plan against a per-level layout table, panicking on any
    /// barrier whose `old` does not match the tracked state.
    fn replay(plan: &MipPlan, levels: u32) -> (Vec<vk::ImageLayout>, Vec<(u32, (i32, i32))>) {
        let mut layouts = vec![vk::ImageLayout::TRANSFER_DST_OPTIMAL; levels as usize];
        let mut blits = Vec::new();
        for step in &plan.steps {
            match *step {
                MipStep::Barrier(b) => {
                    let slot = &mut layouts[b.level as usize];
                    assert_eq!(*slot, b.old, "level {} barrier", b.level);
                    *slot = b.new;
                }
                MipStep::Blit {
                    src_level,
                    dst_level,
                    dst_extent,
                    ..
                } => {
                    assert_eq!(layouts[src_level as usize], vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
                    assert_eq!(layouts[dst_level as usize], vk::ImageLayout::TRANSFER_DST_OPTIMAL);
                    blits.push((dst_level, dst_extent));
                }
            }
        }
        (layouts, blits)
    }

    #[test]
    fn level_count_matches_log2() {
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(512, 3), 10);
        assert_eq!(mip_level_count(3, 5), 3);
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn square_power_of_two_halves_down_to_one() {
        let plan = MipPlan::new(256, 256, 9);
        let (layouts, blits) = replay(&plan, 9);
        assert!(layouts
            .iter()
            .all(|&l| l == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
        let sizes: Vec<_> = blits.iter().map(|&(_, (w, _))| w).collect();
        assert_eq!(sizes, vec![128, 64, 32, 16, 8, 4, 2, 1]);
        assert!(blits.iter().all(|&(_, (w, h))| w == h));
    }

    #[test]
    fn odd_sizes_floor_with_minimum_one() {
        let plan = MipPlan::new(3, 5, 3);
        let (layouts, blits) = replay(&plan, 3);
        assert_eq!(blits, vec![(1, (1, 2)), (2, (1, 1))]);
        assert!(layouts
            .iter()
            .all(|&l| l == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
    }

    #[test]
    fn single_level_only_transitions_for_sampling() {
        let plan = MipPlan::new(64, 64, 1);
        assert_eq!(plan.steps.len(), 1);
        let (layouts, blits) = replay(&plan, 1);
        assert!(blits.is_empty());
        assert_eq!(layouts, vec![vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL]);
    }

    #[test]
    fn each_blit_reads_the_previous_destination_extent() {
        let plan = MipPlan::new(40, 10, mip_level_count(40, 10));
        let mut prev = (40, 10);
        for step in &plan.steps {
            if let MipStep::Blit {
                src_extent,
                dst_extent,
                ..
            } = *step
            {
                assert_eq!(src_extent, prev);
                prev = dst_extent;
            }
        }
        assert_eq!(prev, (1, 1));
    }
}
