//! Renderer crate for Rays And Such.
//!
//! A compute program traces one ray per pixel into two storage images; a
//! render program then samples those images onto a full-screen quad. The
//! overall flow is:
//!
//! ```text
//!   CLI / raysuch
//!          │ RendererConfig
//!          ▼
//!   Renderer::run ──▶ WindowState ──▶ winit event loop ──▶ FrameLoop::run_frame()
//!                                                              │
//!            InputState ─▶ Camera ─▶ ComputeStage ─▶ barrier ─▶ PresentStage ─▶ surface
//! ```
//!
//! `WindowState` owns the window, the GPU context and the swapchain, while
//! [`frame::FrameLoop`] owns the camera, both stages and both images. Nothing
//! here is shared across threads.

pub mod camera;
pub mod capture;
pub mod frame;
pub mod gpu;
pub mod input;
pub mod runtime;
pub mod types;
mod window;

use anyhow::Result;

pub use camera::{Camera, CameraParams, LookToggle, MovementIntent, PITCH_LIMIT_DEGREES};
pub use frame::{
    FrameContext, FrameError, FrameInput, FrameLoop, FrameLoopDesc, FramePhase, FrameReport, OffscreenTarget,
    PresentTarget, SurfaceFrame,
};
pub use input::{parse_key_code, Action, BindingError, InputState, KeyBindings};
pub use runtime::{FrameClock, TimeSource};
pub use types::{AdapterProfile, RendererConfig, ShaderPaths, TileSize};

/// High-level entry point that owns the chosen configuration.
pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Opens the window and renders until the user quits or closes it.
    ///
    /// Fails when no window or GPU device can be created, or when the surface
    /// runs out of memory mid-run.
    pub fn run(&mut self) -> Result<()> {
        window::run_window(self.config.clone())
    }
}
