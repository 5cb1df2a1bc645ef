// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpuError {
    /// A Vulkan entry point returned a failure code. `result` displays as
    /// the registry's description of the code.
    #[error("{call} failed: {result} ({result:?})")]
    Vk {
        call: &'static str,
        result: vk::Result,
    },
    #[error("swapchain is out of date")]
    OutOfDate,
    #[error("swapchain is suboptimal for the surface")]
    Suboptimal,
    #[error("required instance layer `{0}` is not available")]
    MissingLayer(String),
    #[error("required extension `{0}` is not available")]
    MissingExtension(String),
    #[error("no physical device can render and present to this surface")]
    NoSuitableDevice,
    #[error("no memory type in filter {type_filter:#034b} has {required:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        required: vk::MemoryPropertyFlags,
    },
    #[error("none of the candidate depth formats supports optimal-tiling depth attachments")]
    NoDepthFormat,
    #[error("format {0:?} does not support linear filtering for blits")]
    LinearBlitUnsupported(vk::Format),
    #[error("unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    #[error("write of {len} bytes exceeds buffer capacity {capacity}")]
    BufferOverflow {
        len: u64,
        capacity: u64,
    },
    #[error("invalid SPIR-V blob: {0}")]
    Spirv(#[source] std::io::Error),
    #[error("window handle unavailable: {0}")]
    Window(#[from] raw_window_handle::HandleError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The machine cannot run this renderer. Never retried.
    Configuration,
    /// The surface changed under the swapchain; recovered by recreation.
    Presentation,
    /// A resource-creation or submission call failed.
    Resource,
}

impl GpuError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GpuError::Vk { result, .. }
                if *result == vk::Result::ERROR_OUT_OF_DATE_KHR
                    || *result == vk::Result::SUBOPTIMAL_KHR =>
            {
                ErrorClass::Presentation
            }
            GpuError::OutOfDate | GpuError::Suboptimal => ErrorClass::Presentation,
            GpuError::Vk { .. } => ErrorClass::Resource,
            GpuError::Window(_) | GpuError::BufferOverflow { .. } => ErrorClass::Resource,
            GpuError::MissingLayer(_)
            | GpuError::MissingExtension(_)
            | GpuError::NoSuitableDevice
            | GpuError::NoSuitableMemoryType { .. }
            | GpuError::NoDepthFormat
            | GpuError::LinearBlitUnsupported(_)
            | GpuError::UnsupportedLayoutTransition { .. }
            | GpuError::Spirv(_) => ErrorClass::Configuration,
        }
    }

    pub fn is_out_of_date(&self) -> bool {
        match self {
            GpuError::OutOfDate => true,
            GpuError::Vk { result, .. } => *result == vk::Result::ERROR_OUT_OF_DATE_KHR,
            _ => false,
        }
    }
}

/// Tags a raw `VkResult` with the name of the call that produced it.
pub trait VkResultExt<T> {
    fn call(self, name: &'static str) -> Result<T, GpuError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn call(self, name: &'static str) -> Result<T, GpuError> {
        self.map_err(|result| GpuError::Vk { call: name, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_error_names_the_call() {
        let err: Result<(), _> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).call("vkAllocateMemory");
        let err = err.unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("vkAllocateMemory failed: "), "{msg}");
        assert!(msg.contains("ERROR_OUT_OF_DEVICE_MEMORY"), "{msg}");
        assert_eq!(err.class(), ErrorClass::Resource);
    }

    #[test]
    fn classification_follows_taxonomy() {
        let out_of_date = GpuError::Vk {
            call: "vkQueuePresentKHR",
            result: vk::Result::ERROR_OUT_OF_DATE_KHR,
        };
        assert_eq!(out_of_date.class(), ErrorClass::Presentation);
        assert!(out_of_date.is_out_of_date());

        assert_eq!(GpuError::Suboptimal.class(), ErrorClass::Presentation);
        assert!(!GpuError::Suboptimal.is_out_of_date());
        assert_eq!(GpuError::NoDepthFormat.class(), ErrorClass::Configuration);
        assert_eq!(
            GpuError::UnsupportedLayoutTransition {
                old: vk::ImageLayout::GENERAL,
                new: vk::ImageLayout::PRESENT_SRC_KHR,
            }
            .class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            GpuError::MissingLayer("VK_LAYER_KHRONOS_validation".into()).class(),
            ErrorClass::Configuration
        );
    }
}
