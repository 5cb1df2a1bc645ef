// SPDX-License-Identifier: CEPL-1.0
//! Frames in flight and the per-frame wait / acquire / submit / present cycle.
use ash::vk;

use crate::error::{ErrorClass, GpuError, VkResultExt};

/// Synchronization for one frame in flight. The fence is signaled when the
/// slot's last submission has finished; only then may its semaphores be
/// reused.
#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

pub struct FrameSync {
    device: ash::Device,
    pub slots: Vec<FrameSlot>,
    /// Fence of the submission that last rendered to each swapchain image,
    /// or null.
    pub images_in_flight: Vec<vk::Fence>,
}

impl FrameSync {
    pub unsafe fn new(device: &ash::Device, frames_in_flight: usize) -> Result<Self, GpuError> {
        let mut out = FrameSync {
            device: device.clone(),
            slots: Vec::with_capacity(frames_in_flight),
            images_in_flight: Vec::new(),
        };
        let sem_ci = vk::SemaphoreCreateInfo::default();
        // signaled, so the first wait on every slot returns at once
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for _ in 0..frames_in_flight {
            let image_available = device
                .create_semaphore(&sem_ci, None)
                .call("vkCreateSemaphore")?;
            let render_finished = match device.create_semaphore(&sem_ci, None) {
                Ok(s) => s,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(GpuError::Vk {
                        call: "vkCreateSemaphore",
                        result: e,
                    });
                }
            };
            let in_flight = match device.create_fence(&fence_ci, None) {
                Ok(f) => f,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                    return Err(GpuError::Vk {
                        call: "vkCreateFence",
                        result: e,
                    });
                }
            };
            out.slots.push(FrameSlot {
                image_available,
                render_finished,
                in_flight,
            });
        }
        Ok(out)
    }

    /// Forget image ownership after the swapchain was rebuilt.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight
            .resize(image_count, vk::Fence::null());
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            for s in &self.slots {
                self.device.destroy_fence(s.in_flight, None);
                self.device.destroy_semaphore(s.render_finished, None);
                self.device.destroy_semaphore(s.image_available, None);
            }
        }
    }
}

/// The GPU-facing half of the render loop. `draw_frame` drives it; the
/// Vulkan renderer implements it for real and tests replace it.
pub trait FrameTarget {
    /// Block until the last submission from `slot` has completed.
    fn wait_slot(&mut self, slot: usize) -> Result<(), GpuError>;
    /// Acquire the next swapchain image, signaling the slot's
    /// image-available semaphore. Returns the index and whether the
    /// swapchain is suboptimal. Out-of-date surfaces as an error.
    fn acquire(&mut self, slot: usize) -> Result<(u32, bool), GpuError>;
    /// Block until no other in-flight submission renders to `image`, then
    /// mark it as owned by `slot`.
    fn claim_image(&mut self, image: u32, slot: usize) -> Result<(), GpuError>;
    fn update_uniforms(&mut self, image: u32) -> Result<(), GpuError>;
    fn reset_slot(&mut self, slot: usize) -> Result<(), GpuError>;
    /// Submit the prerecorded buffer of `image`, arming the slot fence.
    fn submit(&mut self, slot: usize, image: u32) -> Result<(), GpuError>;
    /// Queue `image` for presentation; `Ok(true)` when suboptimal.
    fn present(&mut self, slot: usize, image: u32) -> Result<bool, GpuError>;
    fn recreate(&mut self) -> Result<(), GpuError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameState {
    pub current: usize,
    pub frames_in_flight: usize,
    /// Set by window resizes; consumed after the next present.
    pub resize_pending: bool,
}

impl FrameState {
    pub fn new(frames_in_flight: usize) -> Self {
        FrameState {
            current: 0,
            frames_in_flight: frames_in_flight.max(1),
            resize_pending: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Acquire found the swapchain out of date; nothing was submitted.
    Skipped,
    /// Presented, then rebuilt the swapchain.
    PresentedAndRecreated,
}

/// One iteration of the render loop.
///
/// The slot fence is reset only after a successful acquire, right before
/// the submit that re-arms it. An out-of-date acquire therefore leaves the
/// fence signaled and the next wait on this slot cannot hang.
pub fn draw_frame<T: FrameTarget + ?Sized>(
    target: &mut T,
    state: &mut FrameState,
) -> Result<FrameOutcome, GpuError> {
    let slot = state.current;
    target.wait_slot(slot)?;

    let (image, acquire_suboptimal) = match target.acquire(slot) {
        Ok(v) => v,
        Err(e) if e.is_out_of_date() => {
            state.resize_pending = false;
            target.recreate()?;
            return Ok(FrameOutcome::Skipped);
        }
        Err(e) => return Err(e),
    };

    target.claim_image(image, slot)?;
    target.update_uniforms(image)?;
    target.reset_slot(slot)?;
    target.submit(slot, image)?;

    let recreate = match target.present(slot, image) {
        Ok(suboptimal) => suboptimal || acquire_suboptimal || state.resize_pending,
        Err(e) if e.class() == ErrorClass::Presentation => true,
        Err(e) => return Err(e),
    };

    state.current = (slot + 1) % state.frames_in_flight;

    if recreate {
        state.resize_pending = false;
        target.recreate()?;
        return Ok(FrameOutcome::PresentedAndRecreated);
    }
    Ok(FrameOutcome::Presented)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records the call sequence of a single frame.
    #[derive(Default)]
    struct Script {
        calls: Vec<&'static str>,
        acquire: Option<Result<(u32, bool), GpuError>>,
        present: Option<Result<bool, GpuError>>,
    }

    impl FrameTarget for Script {
        fn wait_slot(&mut self, _: usize) -> Result<(), GpuError> {
            self.calls.push("wait");
            Ok(())
        }
        fn acquire(&mut self, _: usize) -> Result<(u32, bool), GpuError> {
            self.calls.push("acquire");
            self.acquire.take().unwrap_or(Ok((0, false)))
        }
        fn claim_image(&mut self, _: u32, _: usize) -> Result<(), GpuError> {
            self.calls.push("claim");
            Ok(())
        }
        fn update_uniforms(&mut self, _: u32) -> Result<(), GpuError> {
            self.calls.push("update");
            Ok(())
        }
        fn reset_slot(&mut self, _: usize) -> Result<(), GpuError> {
            self.calls.push("reset");
            Ok(())
        }
        fn submit(&mut self, _: usize, _: u32) -> Result<(), GpuError> {
            self.calls.push("submit");
            Ok(())
        }
        fn present(&mut self, _: usize, _: u32) -> Result<bool, GpuError> {
            self.calls.push("present");
            self.present.take().unwrap_or(Ok(false))
        }
        fn recreate(&mut self) -> Result<(), GpuError> {
            self.calls.push("recreate");
            Ok(())
        }
    }

    #[test]
    fn happy_path_order() {
        let mut t = Script::default();
        let mut s = FrameState::new(2);
        assert_eq!(draw_frame(&mut t, &mut s).unwrap(), FrameOutcome::Presented);
        assert_eq!(
            t.calls,
            ["wait", "acquire", "claim", "update", "reset", "submit", "present"]
        );
        assert_eq!(s.current, 1);
        draw_frame(&mut t, &mut s).unwrap();
        assert_eq!(s.current, 0);
    }

    #[test]
    fn out_of_date_acquire_recreates_without_touching_the_fence() {
        let mut t = Script {
            acquire: Some(Err(GpuError::OutOfDate)),
            ..Default::default()
        };
        let mut s = FrameState::new(2);
        s.resize_pending = true;
        assert_eq!(draw_frame(&mut t, &mut s).unwrap(), FrameOutcome::Skipped);
        assert_eq!(t.calls, ["wait", "acquire", "recreate"]);
        assert_eq!(s.current, 0);
        assert!(!s.resize_pending);
    }

    #[test]
    fn suboptimal_acquire_recreates_after_present() {
        let mut t = Script {
            acquire: Some(Ok((1, true))),
            ..Default::default()
        };
        let mut s = FrameState::new(2);
        assert_eq!(
            draw_frame(&mut t, &mut s).unwrap(),
            FrameOutcome::PresentedAndRecreated
        );
        assert_eq!(t.calls.last(), Some(&"recreate"));
        assert_eq!(t.calls[t.calls.len() - 2], "present");
    }

    #[test]
    fn present_out_of_date_or_resize_flag_recreates() {
        let mut t = Script {
            present: Some(Err(GpuError::OutOfDate)),
            ..Default::default()
        };
        let mut s = FrameState::new(2);
        assert_eq!(
            draw_frame(&mut t, &mut s).unwrap(),
            FrameOutcome::PresentedAndRecreated
        );
        assert_eq!(s.current, 1);

        let mut t = Script::default();
        s.resize_pending = true;
        assert_eq!(
            draw_frame(&mut t, &mut s).unwrap(),
            FrameOutcome::PresentedAndRecreated
        );
        assert!(!s.resize_pending);
    }

    #[test]
    fn other_errors_are_fatal() {
        let mut t = Script {
            acquire: Some(Err(GpuError::Vk {
                call: "vkAcquireNextImageKHR",
                result: vk::Result::ERROR_DEVICE_LOST,
            })),
            ..Default::default()
        };
        let mut s = FrameState::new(2);
        let err = draw_frame(&mut t, &mut s).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Resource);
        assert_eq!(t.calls, ["wait", "acquire"]);

        let mut t = Script {
            present: Some(Err(GpuError::Vk {
                call: "vkQueuePresentKHR",
                result: vk::Result::ERROR_SURFACE_LOST_KHR,
            })),
            ..Default::default()
        };
        assert!(draw_frame(&mut t, &mut s).is_err());
        assert!(!t.calls.contains(&"recreate"));
    }
}
