// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use ember_assets::{load_obj, load_shader_blob, load_texture};
use ember_core::{init_tracing, load_config, AppCfg, AssetCfg, RenderCfg};
use ember_platform::{is_zero_sized, window_attributes};
use ember_render::{RenderSize, Renderer, SceneAssets};
use ember_render_vk::{VkConfig, VkRenderer};
use tracing::{error, info};

use ember_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config; a missing file means defaults
    #[arg(long, default_value = "ember.toml")]
    config: PathBuf,
    /// Wavefront OBJ to draw instead of the built-in quad
    #[arg(long)]
    model: Option<PathBuf>,
    /// PNG/JPEG texture instead of the built-in checkerboard
    #[arg(long)]
    texture: Option<PathBuf>,
    #[arg(long)]
    frames_in_flight: Option<usize>,
    #[arg(long)]
    no_validation: bool,
}

impl Args {
    fn apply(&self, cfg: &mut AppCfg) {
        if let Some(p) = &self.model {
            cfg.assets.model = Some(p.clone());
        }
        if let Some(p) = &self.texture {
            cfg.assets.texture = Some(p.clone());
        }
        if let Some(n) = self.frames_in_flight {
            cfg.render.max_frames_in_flight = n;
        }
        if self.no_validation {
            cfg.render.validation = false;
        }
    }
}

fn vk_config(r: &RenderCfg) -> VkConfig {
    VkConfig {
        max_frames_in_flight: r.max_frames_in_flight,
        msaa: r.msaa,
        clear_color: r.clear_color,
        validation_layers: if r.validation {
            r.validation_layers.clone()
        } else {
            Vec::new()
        },
        pipeline_cache: r.pipeline_cache,
    }
}

fn load_assets(cfg: &AssetCfg) -> Result<SceneAssets> {
    let mut assets = SceneAssets::default();
    if let Some(p) = &cfg.model {
        assets.mesh = load_obj(p)?;
    }
    if let Some(p) = &cfg.texture {
        assets.texture = load_texture(p)?;
    }
    assets.vertex_spirv = cfg.vertex_shader.as_deref().map(load_shader_blob).transpose()?;
    assets.fragment_spirv = cfg
        .fragment_shader
        .as_deref()
        .map(load_shader_blob)
        .transpose()?;
    info!(
        "assets: {} vertices, {}x{} texture",
        assets.mesh.vertices.len(),
        assets.texture.width,
        assets.texture.height
    );
    Ok(assets)
}

struct App {
    cfg: AppCfg,
    assets: SceneAssets,
    // declared before the window: the surface must not outlive it
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    /// First fatal error; returned from `main` once the loop exits.
    failure: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg, assets: SceneAssets) -> Self {
        App {
            cfg,
            assets,
            renderer: None,
            window: None,
            failure: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure.get_or_insert(e);
        self.shutdown();
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        if let Some(r) = &mut self.renderer {
            if let Err(e) = r.wait_idle() {
                error!("wait_idle on shutdown: {e:#}");
            }
        }
        self.renderer = None;
        self.window = None;
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let w = &self.cfg.window;
        let window = event_loop
            .create_window(window_attributes(&w.title, w.width, w.height))
            .context("create_window")?;
        let size = window.inner_size();
        let renderer = VkRenderer::new(
            &window,
            &window,
            RenderSize {
                width: size.width,
                height: size.height,
            },
            vk_config(&self.cfg.render),
            &self.assets,
        )?;
        window.request_redraw();
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.open(event_loop) {
            self.fail(event_loop, e);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        info!("backend = vk");
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match &self.window {
            Some(window) if window.id() == window_id => {}
            _ => return,
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                info!("Resized → {}x{}", new_size.width, new_size.height);
                if let Some(r) = &mut self.renderer {
                    r.resize(RenderSize {
                        width: new_size.width,
                        height: new_size.height,
                    });
                }
                event_loop.set_control_flow(if is_zero_sized(new_size) {
                    ControlFlow::Wait
                } else {
                    ControlFlow::Poll
                });
            }

            WindowEvent::RedrawRequested => {
                let Some(r) = &mut self.renderer else {
                    return;
                };
                match r.render() {
                    Ok(()) => self.frames = self.frames.saturating_add(1),
                    Err(e) => self.fail(event_loop, e.context("render")),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        let Some(window) = &self.window else {
            return;
        };
        if !is_zero_sized(window.inner_size()) {
            window.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_config(&args.config)?;
    args.apply(&mut cfg);
    cfg.validate()?;
    let assets = load_assets(&cfg.assets)?;

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, assets);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
