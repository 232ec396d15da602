//! Per-frame orchestration.
//!
//! One call to [`FrameLoop::run_frame`] walks the whole cycle on the calling
//! thread:
//!
//! ```text
//!   input ─▶ Camera ─▶ ComputeStage (dispatch) ─▶ barrier ─▶ PresentStage (draw) ─▶ present
//!   Idle     Idle      Dispatching                Barrier    Presenting             Idle
//! ```
//!
//! Both passes are recorded into a single command encoder. The barrier is the
//! end of the compute pass: wgpu makes every storage write of a pass visible
//! to the passes recorded after it, so the present pass is only begun once
//! the compute pass has been closed. [`FramePhase`] tracks the cycle and
//! rejects anything out of order, including a resize in the middle of it.

use std::path::Path;

use glam::Vec2;
use thiserror::Error;

use crate::camera::{Camera, MovementIntent};
use crate::gpu::{
    BufferError, ComputeParams, ComputeStage, GpuContext, GpuImage, ImageError, PixelFormat,
    PresentParams, PresentStage, StageKind, StageSources,
};
use crate::runtime::{clamp_elapsed, instantaneous_fps};
use crate::types::{RendererConfig, TileSize};

/// Where a frame is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    #[default]
    Idle,
    Dispatching,
    Barrier,
    Presenting,
}

impl FramePhase {
    /// The only phase this one may advance to.
    pub fn successor(self) -> Self {
        match self {
            FramePhase::Idle => FramePhase::Dispatching,
            FramePhase::Dispatching => FramePhase::Barrier,
            FramePhase::Barrier => FramePhase::Presenting,
            FramePhase::Presenting => FramePhase::Idle,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame cannot move from {from:?} to {to:?}")]
    OutOfOrder { from: FramePhase, to: FramePhase },
    #[error("resize requested while the frame is {phase:?}")]
    ResizeDuringFrame { phase: FramePhase },
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Enforces the Idle → Dispatching → Barrier → Presenting → Idle order.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    phase: FramePhase,
}

impl PhaseTracker {
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn advance(&mut self, to: FramePhase) -> Result<(), FrameError> {
        if self.phase.successor() != to {
            return Err(FrameError::OutOfOrder {
                from: self.phase,
                to,
            });
        }
        tracing::trace!(from = ?self.phase, ?to, "frame phase");
        self.phase = to;
        Ok(())
    }

    /// Returns to `Idle` after an aborted frame.
    pub fn reset(&mut self) {
        self.phase = FramePhase::Idle;
    }
}

/// Counter and timing of the frame being built.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameContext {
    /// Seed for the compute program; wraps at `u32::MAX`.
    pub frame_no: u32,
    /// Seconds since the previous frame, never zero.
    pub elapsed: f32,
}

/// What the window gathered since the previous frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameInput {
    pub intent: MovementIntent,
    pub pointer_delta: Vec2,
}

/// Outcome of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    /// Counter value the compute program saw.
    pub frame_no: u32,
    pub elapsed: f32,
    pub fps: f32,
    /// Look mode consumed a pointer delta; the caller recenters the pointer.
    pub recenter_pointer: bool,
    pub dispatched: bool,
    pub presented: bool,
}

/// Something the present pass can draw into and hand off.
pub trait PresentTarget {
    fn view(&self) -> &wgpu::TextureView;

    /// Hands the drawn frame to its consumer. Called after submission.
    fn present(self)
    where
        Self: Sized;
}

/// A swapchain image.
pub struct SurfaceFrame {
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

impl SurfaceFrame {
    pub fn new(texture: wgpu::SurfaceTexture) -> Self {
        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

impl PresentTarget for SurfaceFrame {
    fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    fn present(self) {
        self.texture.present();
    }
}

/// A render-target image, for captures and headless frames.
pub struct OffscreenTarget<'a> {
    image: &'a GpuImage,
    view: &'a wgpu::TextureView,
}

impl<'a> OffscreenTarget<'a> {
    /// `None` when the image has no storage.
    pub fn new(image: &'a GpuImage) -> Option<Self> {
        image.view().map(|view| Self { image, view })
    }
}

impl PresentTarget for OffscreenTarget<'_> {
    fn view(&self) -> &wgpu::TextureView {
        self.view
    }

    fn present(self) {
        tracing::trace!(image = self.image.label(), "offscreen frame complete");
    }
}

/// Everything a [`FrameLoop`] is built from besides the programs.
#[derive(Debug, Clone)]
pub struct FrameLoopDesc {
    pub size: (u32, u32),
    pub tile: TileSize,
    pub image_format: PixelFormat,
    /// Format of whatever the present pass draws into.
    pub present_format: wgpu::TextureFormat,
    pub camera: Camera,
    /// Degrees per pixel of pointer travel.
    pub sensitivity: f32,
}

/// Sole owner of the per-frame graph: camera, both stages, both images.
pub struct FrameLoop {
    camera: Camera,
    sensitivity: f32,
    compute: ComputeStage,
    present: PresentStage,
    color: GpuImage,
    normal: GpuImage,
    phase: PhaseTracker,
    frame: FrameContext,
    warned_remainder: bool,
}

impl FrameLoop {
    pub fn new(
        context: &GpuContext,
        desc: FrameLoopDesc,
        compute_sources: StageSources,
        present_sources: StageSources,
    ) -> Result<Self, BufferError> {
        let (width, height) = desc.size;
        let compute = ComputeStage::new(context, compute_sources, desc.tile, desc.image_format);
        let present = PresentStage::new(context, present_sources, desc.present_format)?;
        let color = allocate_or_invalid(context, "color image", width, height, desc.image_format);
        let normal = allocate_or_invalid(context, "normal image", width, height, desc.image_format);

        let mut camera = desc.camera;
        if height > 0 {
            camera.set_aspect_ratio(width as f32 / height as f32);
        }

        let mut frame_loop = Self {
            camera,
            sensitivity: desc.sensitivity,
            compute,
            present,
            color,
            normal,
            phase: PhaseTracker::default(),
            frame: FrameContext::default(),
            warned_remainder: false,
        };
        frame_loop.note_remainder(width, height);
        Ok(frame_loop)
    }

    /// Builds the loop from a renderer configuration, loading the programs
    /// from the configured paths.
    pub fn from_config(
        context: &GpuContext,
        config: &RendererConfig,
        size: (u32, u32),
        present_format: wgpu::TextureFormat,
    ) -> Result<Self, BufferError> {
        let camera = Camera::new(config.camera)
            .with_look_toggle(config.look_toggle)
            .with_look_enabled(config.look_enabled);
        let compute_sources = StageSources::load([(StageKind::Compute, &config.shaders.compute)]);
        let present_sources = StageSources::load([
            (StageKind::Vertex, &config.shaders.vertex),
            (StageKind::Fragment, &config.shaders.fragment),
        ]);
        Self::new(
            context,
            FrameLoopDesc {
                size,
                tile: config.tile,
                image_format: config.image_format,
                present_format,
                camera,
                sensitivity: config.sensitivity,
            },
            compute_sources,
            present_sources,
        )
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn phase(&self) -> FramePhase {
        self.phase.phase()
    }

    /// Counter value the next frame will use.
    pub fn frame_no(&self) -> u32 {
        self.frame.frame_no
    }

    pub fn frame_context(&self) -> FrameContext {
        self.frame
    }

    pub fn color_image(&self) -> &GpuImage {
        &self.color
    }

    pub fn normal_image(&self) -> &GpuImage {
        &self.normal
    }

    pub fn compute_stage(&self) -> &ComputeStage {
        &self.compute
    }

    pub fn present_stage(&self) -> &PresentStage {
        &self.present
    }

    /// Reallocates both images at the new size and updates the aspect ratio.
    ///
    /// Only allowed between frames. A zero dimension (a minimised window) is
    /// ignored.
    pub fn resize(&mut self, context: &GpuContext, width: u32, height: u32) -> Result<(), FrameError> {
        if self.phase.phase() != FramePhase::Idle {
            return Err(FrameError::ResizeDuringFrame {
                phase: self.phase.phase(),
            });
        }
        if width == 0 || height == 0 {
            tracing::debug!(width, height, "ignoring zero-sized resize");
            return Ok(());
        }
        if self.color.dimensions() == (width, height) && self.color.is_valid() && self.normal.is_valid() {
            return Ok(());
        }

        self.camera.set_aspect_ratio(width as f32 / height as f32);
        let color = self.color.resize(context, width, height);
        let normal = self.normal.resize(context, width, height);
        self.note_remainder(width, height);
        color?;
        normal?;
        tracing::info!(width, height, "resized render images");
        Ok(())
    }

    fn note_remainder(&mut self, width: u32, height: u32) {
        let tile = self.compute.tile();
        if !self.warned_remainder && !tile.divides(width, height) {
            self.warned_remainder = true;
            tracing::info!(
                width,
                height,
                tile = %format!("{}x{}", tile.x, tile.y),
                "resolution is not a multiple of the tile; edge workgroups are partially outside the image"
            );
        }
    }

    /// Runs one full frame and hands it to `target`.
    ///
    /// Broken programs do not fail the frame: the affected stage is skipped
    /// and the report says so. Only a phase violation is an error.
    pub fn run_frame(
        &mut self,
        context: &GpuContext,
        input: FrameInput,
        elapsed_seconds: f32,
        target: impl PresentTarget,
    ) -> Result<FrameReport, FrameError> {
        let result = self.record_and_submit(context, input, elapsed_seconds, target);
        if result.is_err() {
            self.phase.reset();
        }
        result
    }

    fn record_and_submit(
        &mut self,
        context: &GpuContext,
        input: FrameInput,
        elapsed_seconds: f32,
        target: impl PresentTarget,
    ) -> Result<FrameReport, FrameError> {
        if self.phase.phase() != FramePhase::Idle {
            return Err(FrameError::OutOfOrder {
                from: self.phase.phase(),
                to: FramePhase::Dispatching,
            });
        }

        let elapsed = clamp_elapsed(elapsed_seconds);
        self.camera.advance_position(elapsed, input.intent);
        let recenter_pointer = self.camera.update_orientation(input.pointer_delta, self.sensitivity);

        let projection = self.camera.projection_matrix();
        let frame_no = self.frame.frame_no;
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });

        self.phase.advance(FramePhase::Dispatching)?;
        let dispatched = self.compute.execute(
            context,
            &mut encoder,
            &ComputeParams {
                view: self.camera.origin_centered_view_matrix(),
                projection,
                position: self.camera.position(),
                frame_no,
            },
            &self.color,
            &self.normal,
        );

        // The compute pass is closed by now; its image writes are visible to
        // every pass recorded after this point.
        self.phase.advance(FramePhase::Barrier)?;

        self.phase.advance(FramePhase::Presenting)?;
        let presented = self.present.execute(
            context,
            &mut encoder,
            &PresentParams {
                view: self.camera.view_matrix(),
                projection,
            },
            &self.color,
            &self.normal,
            target.view(),
        );
        context.queue.submit(Some(encoder.finish()));
        target.present();

        self.phase.advance(FramePhase::Idle)?;
        self.frame = FrameContext {
            frame_no: frame_no.wrapping_add(1),
            elapsed,
        };

        Ok(FrameReport {
            frame_no,
            elapsed,
            fps: instantaneous_fps(elapsed),
            recenter_pointer,
            dispatched,
            presented,
        })
    }

    /// Writes the current colour image to `path` as PNG.
    pub fn capture(&self, context: &GpuContext, path: &Path) -> anyhow::Result<()> {
        crate::capture::save_png(context, &self.color, path)
    }
}

fn allocate_or_invalid(
    context: &GpuContext,
    label: &str,
    width: u32,
    height: u32,
    format: PixelFormat,
) -> GpuImage {
    GpuImage::new(context, label, width, height, format).unwrap_or_else(|error| {
        tracing::error!(image = label, %error, "render image unavailable; frames will skip it");
        GpuImage::unallocated(label, width, height, format)
    })
}
