// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device bring-up, resource upload, the swapchain and its
//! dependents, and the frames-in-flight render loop.
use std::time::Instant;

use anyhow::{Context, Result};
use ash::vk;
use ember_math::UniformBlock;
use ember_render::{RenderSize, Renderer, SceneAssets};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

pub mod cache;
pub mod commands;
pub mod context;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod layout;
pub mod memory;
pub mod mesh;
pub mod mipmap;
pub mod pipeline;
pub mod swapchain;
pub mod targets;
pub mod texture;
pub mod transfer;

pub use error::{ErrorClass, GpuError, VkResultExt};

use cache::{pipeline_cache_path, PipelineCache};
use commands::{CommandBuffers, DrawInputs};
use context::DeviceContext;
use descriptors::UniformSet;
use frame::{draw_frame, FrameOutcome, FrameState, FrameSync, FrameTarget};
use mesh::GpuMesh;
use pipeline::{FramePipeline, PipelineParams, SetLayout, ShaderSet};
use swapchain::{extent_from_caps, Swapchain, SwapchainSupport};
use targets::RenderTargets;
use texture::Texture;
use transfer::CommandPool;

#[derive(Clone, Debug)]
pub struct VkConfig {
    pub max_frames_in_flight: usize,
    /// Render at the device's highest usable sample count and resolve.
    pub msaa: bool,
    pub clear_color: [f32; 4],
    /// Empty disables validation and the debug messenger.
    pub validation_layers: Vec<String>,
    /// Persist the pipeline cache next to the working directory.
    pub pipeline_cache: bool,
}

impl Default for VkConfig {
    fn default() -> Self {
        VkConfig {
            max_frames_in_flight: 2,
            msaa: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            validation_layers: Vec::new(),
            pipeline_cache: false,
        }
    }
}

/// Everything rebuilt together when the swapchain is.
/// Field order is drop order: command buffers first, the swapchain last.
struct SwapchainBundle {
    commands: CommandBuffers,
    targets: RenderTargets,
    pipeline: FramePipeline,
    swapchain: Swapchain,
}

impl SwapchainBundle {
    /// Tears down the dependents and keeps the swapchain so it can be
    /// handed to the next one as `oldSwapchain`.
    fn into_swapchain(self) -> Swapchain {
        let SwapchainBundle {
            commands,
            targets,
            pipeline,
            swapchain,
        } = self;
        drop(commands);
        drop(targets);
        drop(pipeline);
        swapchain
    }

    unsafe fn record(
        &self,
        clear: [f32; 4],
        uniforms: &UniformSet,
        mesh: &GpuMesh,
    ) -> Result<(), GpuError> {
        self.commands.record(&DrawInputs {
            render_pass: self.pipeline.render_pass,
            pipeline: self.pipeline.pipeline,
            layout: self.pipeline.layout,
            extent: self.swapchain.extent,
            clear,
            framebuffers: &self.targets.framebuffers,
            sets: &uniforms.sets,
            mesh,
        })
    }
}

// STRICT TEARDOWN ORDER (fields drop top to bottom):
// swapchain bundle -> uniforms/descriptor sets -> sync objects -> texture/mesh
// -> pipeline cache -> set layout -> command pool
// -> device context (device, surface, instance).
pub struct VkRenderer {
    bundle: Option<SwapchainBundle>,
    /// One uniform buffer and descriptor set per swapchain image. Survives
    /// recreation unless the image count changes.
    uniforms: Option<UniformSet>,
    sync: FrameSync,
    texture: Texture,
    mesh: GpuMesh,
    pipeline_cache: PipelineCache,
    set_layout: SetLayout,
    cmd_pool: CommandPool,

    shaders: ShaderSet,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
    clear: [f32; 4],
    size: RenderSize,
    /// Zero-sized framebuffer; nothing is drawn until the next real resize.
    paused: bool,
    state: FrameState,
    started: Instant,

    ctx: DeviceContext,
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device_wait_idle().ok();
        }
    }
}

impl VkRenderer {
    unsafe fn create(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: VkConfig,
        assets: &SceneAssets,
    ) -> Result<Self, GpuError> {
        // Locals drop in reverse on early return, so the context goes last.
        let ctx = DeviceContext::new(window, display, &config.validation_layers)?;
        let cmd_pool = CommandPool::new(&ctx.device, ctx.families.graphics)?;
        let set_layout = SetLayout::new(&ctx.device)?;
        let cache_path = config
            .pipeline_cache
            .then(|| pipeline_cache_path(&ctx.properties));
        let pipeline_cache = PipelineCache::new(&ctx.device, cache_path)?;

        let mesh = GpuMesh::upload(&ctx, cmd_pool.handle, &assets.mesh)?;
        let texture = Texture::upload(&ctx, cmd_pool.handle, &assets.texture)?;
        let sync = FrameSync::new(&ctx.device, config.max_frames_in_flight.max(1))?;

        let depth_format = ctx.depth_format()?;
        let samples = if config.msaa {
            ctx.max_samples()
        } else {
            vk::SampleCountFlags::TYPE_1
        };
        info!(
            "vk: depth {:?}, samples {:?}, {} frames in flight",
            depth_format,
            samples,
            sync.slots.len()
        );

        let mut r = VkRenderer {
            bundle: None,
            uniforms: None,
            state: FrameState::new(sync.slots.len()),
            sync,
            texture,
            mesh,
            pipeline_cache,
            set_layout,
            cmd_pool,
            shaders: ShaderSet::new(
                assets.vertex_spirv.as_deref(),
                assets.fragment_spirv.as_deref(),
            ),
            depth_format,
            samples,
            clear: config.clear_color,
            size,
            paused: size.is_empty(),
            started: Instant::now(),
            ctx,
        };
        r.recreate_swapchain()?;
        Ok(r)
    }

    unsafe fn build_bundle(
        &self,
        swapchain: Swapchain,
        uniforms: &UniformSet,
    ) -> Result<SwapchainBundle, GpuError> {
        let pipeline = FramePipeline::new(
            &self.ctx.device,
            self.pipeline_cache.handle,
            self.set_layout.handle,
            &self.shaders,
            PipelineParams {
                color_format: swapchain.format,
                depth_format: self.depth_format,
                extent: swapchain.extent,
                samples: self.samples,
                sample_shading: self.ctx.features.sample_rate_shading,
            },
        )?;
        let targets = RenderTargets::new(
            &self.ctx,
            self.cmd_pool.handle,
            &swapchain,
            pipeline.render_pass,
            self.depth_format,
            self.samples,
        )?;
        let commands = CommandBuffers::allocate(
            &self.ctx.device,
            self.cmd_pool.handle,
            swapchain.image_count(),
        )?;

        let bundle = SwapchainBundle {
            commands,
            targets,
            pipeline,
            swapchain,
        };
        bundle.record(self.clear, uniforms, &self.mesh)?;
        Ok(bundle)
    }

    // STRICT ORDER:
    // 1) device idle, nothing in flight references the old objects
    // 2) old dependents destroyed, old swapchain kept for handoff
    // 3) new swapchain created from the old one, then the old one destroyed
    // 4) uniforms kept unless the image count changed
    // 5) dependents rebuilt and command buffers re-recorded
    unsafe fn recreate_swapchain(&mut self) -> Result<(), GpuError> {
        if self.size.is_empty() {
            self.paused = true;
            return Ok(());
        }
        let support = SwapchainSupport::query(&self.ctx)?;
        let extent = extent_from_caps(&support.caps, self.size);
        if extent.width == 0 || extent.height == 0 {
            debug!("vk: surface reports 0x0, deferring swapchain");
            self.paused = true;
            return Ok(());
        }

        self.ctx.wait_idle()?;
        let old = self.bundle.take().map(SwapchainBundle::into_swapchain);
        let old_handle = old
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |s| s.handle);
        let swapchain = Swapchain::new(&self.ctx, &support, self.size, old_handle)?;
        drop(old);

        let image_count = swapchain.image_count();
        let uniforms = match self.uniforms.take() {
            Some(u) if u.sets.len() == image_count => u,
            stale => {
                drop(stale);
                UniformSet::new(&self.ctx, self.set_layout.handle, image_count, &self.texture)?
            }
        };
        let bundle = self.build_bundle(swapchain, &uniforms)?;
        self.uniforms = Some(uniforms);
        self.sync.reset_images(image_count);
        info!(
            "vk: swapchain ready {}x{} ({} images)",
            bundle.swapchain.extent.width,
            bundle.swapchain.extent.height,
            bundle.swapchain.image_count()
        );
        self.bundle = Some(bundle);
        Ok(())
    }

    fn bundle(&self) -> Result<&SwapchainBundle, GpuError> {
        self.bundle.as_ref().ok_or(GpuError::OutOfDate)
    }
}

impl FrameTarget for VkRenderer {
    fn wait_slot(&mut self, slot: usize) -> Result<(), GpuError> {
        let fence = self.sync.slots[slot].in_flight;
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[fence], true, u64::MAX)
                .call("vkWaitForFences")
        }
    }

    fn acquire(&mut self, slot: usize) -> Result<(u32, bool), GpuError> {
        // no swapchain yet counts as out of date: the loop builds one
        let handle = self.bundle()?.swapchain.handle;
        let semaphore = self.sync.slots[slot].image_available;
        let acquired = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok(pair) => Ok(pair),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::OutOfDate),
            Err(result) => Err(GpuError::Vk {
                call: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    fn claim_image(&mut self, image: u32, slot: usize) -> Result<(), GpuError> {
        let fence = self.sync.slots[slot].in_flight;
        let Some(owner) = self.sync.images_in_flight.get_mut(image as usize) else {
            return Ok(());
        };
        if *owner != vk::Fence::null() && *owner != fence {
            unsafe {
                self.ctx
                    .device
                    .wait_for_fences(&[*owner], true, u64::MAX)
                    .call("vkWaitForFences")?;
            }
        }
        *owner = fence;
        Ok(())
    }

    fn update_uniforms(&mut self, image: u32) -> Result<(), GpuError> {
        let e = self.bundle()?.swapchain.extent;
        let uniforms = self.uniforms.as_ref().ok_or(GpuError::OutOfDate)?;
        let aspect = e.width as f32 / e.height.max(1) as f32;
        let block = UniformBlock::turntable(aspect, self.started.elapsed().as_secs_f32());
        unsafe { uniforms.write(image as usize, &block) }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), GpuError> {
        let fence = self.sync.slots[slot].in_flight;
        unsafe { self.ctx.device.reset_fences(&[fence]).call("vkResetFences") }
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<(), GpuError> {
        let bundle = self.bundle()?;
        let s = self.sync.slots[slot];
        let cmd = bundle.commands.bufs[image as usize];
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_finished,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(
                    self.ctx.graphics_queue,
                    std::slice::from_ref(&submit),
                    s.in_flight,
                )
                .call("vkQueueSubmit")
        }
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<bool, GpuError> {
        let handle = self.bundle()?.swapchain.handle;
        let wait = self.sync.slots[slot].render_finished;
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &handle,
            p_image_indices: &image,
            ..Default::default()
        };
        let presented = unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &present)
        };
        match presented {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::OutOfDate),
            Err(result) => Err(GpuError::Vk {
                call: "vkQueuePresentKHR",
                result,
            }),
        }
    }

    fn recreate(&mut self) -> Result<(), GpuError> {
        unsafe { self.recreate_swapchain() }
    }
}

impl Renderer for VkRenderer {
    type Config = VkConfig;

    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: VkConfig,
        assets: &SceneAssets,
    ) -> Result<Self> {
        unsafe { Self::create(window, display, size, config, assets) }
            .context("vulkan renderer init")
    }

    fn resize(&mut self, size: RenderSize) {
        if size == self.size && !self.paused {
            return;
        }
        self.size = size;
        if size.is_empty() {
            if !self.paused {
                info!("vk: minimized, rendering paused");
            }
            self.paused = true;
            return;
        }
        if self.paused {
            info!("vk: resumed at {}x{}", size.width, size.height);
        }
        self.paused = false;
        self.state.resize_pending = true;
    }

    fn render(&mut self) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        let mut state = self.state;
        let outcome = draw_frame(self, &mut state);
        self.state = state;
        if outcome.context("draw_frame")? == FrameOutcome::Skipped {
            debug!("vk: frame skipped, swapchain was out of date");
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.ctx.wait_idle() }.context("vkDeviceWaitIdle")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_two_frames_without_validation() {
        let c = VkConfig::default();
        assert_eq!(c.max_frames_in_flight, 2);
        assert!(c.validation_layers.is_empty());
        assert!(c.msaa);
    }
}
