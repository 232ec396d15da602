use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use glam::Vec2;
use tracing::{debug, error, info, warn};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::{Window, WindowBuilder};

use crate::frame::{FrameInput, FrameLoop, FrameReport, SurfaceFrame};
use crate::gpu::{GpuContext, SurfaceTarget};
use crate::input::{Action, InputState, KeyBindings};
use crate::runtime::FrameClock;
use crate::types::RendererConfig;

/// Everything the windowed path owns.
///
/// Field order matters: the frame loop and surface are dropped before the
/// window whose handles they were created from.
struct WindowState {
    frame_loop: FrameLoop,
    surface: SurfaceTarget,
    context: GpuContext,
    window: Arc<Window>,
    input: InputState,
    bindings: KeyBindings,
    clock: FrameClock,
    title: String,
    pending_resize: Option<PhysicalSize<u32>>,
    pending_capture: Option<PathBuf>,
    cursor_hidden: bool,
}

enum RedrawOutcome {
    Presented(FrameReport),
    Skipped,
    Exit,
}

impl WindowState {
    fn new(window: Arc<Window>, config: &RendererConfig) -> Result<Self> {
        let size = window.inner_size();
        let (context, surface) =
            GpuContext::with_surface(window.as_ref(), (size.width, size.height), config.vsync)
                .context("failed to initialise the GPU device")?;
        let profile = &context.adapter_profile;
        info!(
            adapter = %profile.name,
            backend = ?profile.backend,
            device_type = ?profile.device_type,
            surface_format = ?surface.format(),
            present_mode = ?surface.present_mode(),
            "renderer ready"
        );
        if profile.is_software() {
            warn!(adapter = %profile.name, "software rasterizer detected; expect low frame rates");
        }

        let frame_loop = FrameLoop::from_config(&context, config, surface.size(), surface.format())
            .context("failed to build the frame loop")?;

        Ok(Self {
            frame_loop,
            surface,
            context,
            window,
            input: InputState::new(),
            bindings: config.bindings.clone(),
            clock: FrameClock::system(),
            title: config.title.clone(),
            pending_resize: None,
            pending_capture: config.capture.clone(),
            cursor_hidden: false,
        })
    }

    fn window(&self) -> &Window {
        self.window.as_ref()
    }

    fn center(&self) -> Vec2 {
        let size = self.window.inner_size();
        Vec2::new(size.width as f32 / 2.0, size.height as f32 / 2.0)
    }

    fn handle_key(&mut self, event: &KeyEvent) {
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };
        let pressed = event.state == ElementState::Pressed;
        if let Some(action) = self.input.handle_key(&self.bindings, code, pressed) {
            if !event.repeat {
                debug!(%action, pressed, "key");
            }
        }
    }

    fn handle_cursor_moved(&mut self, position: PhysicalPosition<f64>) {
        let anchor = self
            .frame_loop
            .camera()
            .can_look()
            .then(|| self.center());
        self.input
            .handle_pointer(Vec2::new(position.x as f32, position.y as f32), anchor);
    }

    fn apply_pending_resize(&mut self) {
        let Some(size) = self.pending_resize.take() else {
            return;
        };
        self.surface.resize(&self.context, size.width, size.height);
        if let Err(err) = self.frame_loop.resize(&self.context, size.width, size.height) {
            error!(error = %err, "failed to resize render images");
        }
    }

    fn redraw(&mut self) -> RedrawOutcome {
        if self.input.quit_requested() {
            return RedrawOutcome::Exit;
        }
        self.apply_pending_resize();

        let texture = match self.surface.acquire() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("surface lost or outdated; reconfiguring");
                self.surface.reconfigure(&self.context);
                return RedrawOutcome::Skipped;
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                error!("surface out of memory; exiting");
                return RedrawOutcome::Exit;
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("surface timeout; retrying next frame");
                return RedrawOutcome::Skipped;
            }
            Err(other) => {
                warn!(error = ?other, "surface error; retrying next frame");
                return RedrawOutcome::Skipped;
            }
        };

        let elapsed = self.clock.tick();
        let input = FrameInput {
            intent: self.input.movement_intent(),
            pointer_delta: self.input.take_pointer_delta(),
        };
        match self
            .frame_loop
            .run_frame(&self.context, input, elapsed, SurfaceFrame::new(texture))
        {
            Ok(report) => RedrawOutcome::Presented(report),
            Err(err) => {
                error!(error = %err, "frame aborted");
                RedrawOutcome::Skipped
            }
        }
    }

    fn after_present(&mut self, report: &FrameReport) {
        if report.recenter_pointer {
            let center = self.center();
            let position = PhysicalPosition::new(f64::from(center.x), f64::from(center.y));
            match self.window.set_cursor_position(position) {
                Ok(()) => self.input.recentered(center),
                Err(err) => debug!(error = %err, "cursor warp unsupported"),
            }
        }

        let look = self.frame_loop.camera().can_look();
        if look != self.cursor_hidden {
            self.window.set_cursor_visible(!look);
            self.cursor_hidden = look;
            info!(look_enabled = look, "look mode");
        }

        self.window
            .set_title(&format!("{} | FPS: {:.0}", self.title, report.fps));

        if let Some(path) = self.pending_capture.take() {
            if let Err(err) = self.frame_loop.capture(&self.context, &path) {
                error!(error = ?err, "capture failed");
            }
        }
    }
}

/// Opens the window and drives frames until the user quits.
pub(crate) fn run_window(config: RendererConfig) -> Result<()> {
    let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = WindowBuilder::new()
        .with_title(config.title.as_str())
        .with_inner_size(PhysicalSize::new(config.surface_size.0, config.surface_size.1))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create window: {err}"))?;
    let window = Arc::new(window);

    let mut state = WindowState::new(window, &config)?;
    state.window().request_redraw();

    let fatal: Rc<RefCell<Option<anyhow::Error>>> = Rc::new(RefCell::new(None));
    let fatal_in_loop = Rc::clone(&fatal);

    event_loop
        .run(move |event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);
            match event {
                Event::WindowEvent { window_id, event } if window_id == state.window().id() => match event {
                    WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
                    WindowEvent::KeyboardInput { event, .. } => {
                        state.handle_key(&event);
                        if state.input.is_held(Action::Quit) {
                            elwt.exit();
                        }
                    }
                    WindowEvent::CursorMoved { position, .. } => state.handle_cursor_moved(position),
                    WindowEvent::Focused(false) => state.input.release_all(),
                    WindowEvent::Resized(size) => state.pending_resize = Some(size),
                    WindowEvent::RedrawRequested => match state.redraw() {
                        RedrawOutcome::Presented(report) => state.after_present(&report),
                        RedrawOutcome::Skipped => {}
                        RedrawOutcome::Exit => {
                            if !state.input.quit_requested() {
                                *fatal_in_loop.borrow_mut() = Some(anyhow!("surface ran out of memory"));
                            }
                            elwt.exit();
                        }
                    },
                    _ => {}
                },
                Event::AboutToWait => state.window().request_redraw(),
                Event::LoopExiting => {
                    state.context.wait_idle();
                    info!(frames = state.frame_loop.frame_no(), "renderer shutting down");
                }
                _ => {}
            }
        })
        .map_err(|err| anyhow!("window event loop error: {err}"))?;

    exit_result(&fatal)
}

/// Turns the error recorded inside the event loop, if any, into the result
/// of the run.
fn exit_result(fatal: &RefCell<Option<anyhow::Error>>) -> Result<()> {
    match fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
