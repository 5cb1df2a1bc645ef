// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use winit::dpi::{LogicalSize, PhysicalSize};
use winit::window::WindowAttributes;

/// Resizable window, no GL context (the surface is created through Vulkan).
pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    WindowAttributes::default()
        .with_title(title)
        .with_inner_size(LogicalSize::new(width, height))
        .with_resizable(true)
}

/// A minimized window reports a zero-sized framebuffer; nothing can be
/// presented to it.
pub fn is_zero_sized(size: PhysicalSize<u32>) -> bool {
    size.width == 0 || size.height == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_detects_either_axis() {
        assert!(is_zero_sized(PhysicalSize::new(0, 600)));
        assert!(is_zero_sized(PhysicalSize::new(800, 0)));
        assert!(!is_zero_sized(PhysicalSize::new(1, 1)));
    }
}
