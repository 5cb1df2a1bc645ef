// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use ember_assets::{MeshData, TextureData};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Everything uploaded once at start-up.
#[derive(Clone, Debug)]
pub struct SceneAssets {
    pub mesh: MeshData,
    pub texture: TextureData,
    /// SPIR-V overrides; `None` uses the shaders built into the backend.
    pub vertex_spirv: Option<Vec<u8>>,
    pub fragment_spirv: Option<Vec<u8>>,
}

impl Default for SceneAssets {
    fn default() -> Self {
        SceneAssets {
            mesh: MeshData::quad(),
            texture: TextureData::checkerboard(256, 8),
            vertex_spirv: None,
            fragment_spirv: None,
        }
    }
}

pub trait Renderer {
    type Config;

    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: Self::Config,
        assets: &SceneAssets,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Records that the framebuffer changed size; the swapchain is rebuilt
    /// on the next frame.
    fn resize(&mut self, size: RenderSize);
    fn render(&mut self) -> Result<()>;
    /// Blocks until the GPU has finished all submitted work.
    fn wait_idle(&mut self) -> Result<()>;
}
