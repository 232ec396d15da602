use anyhow::{anyhow, Context as AnyhowContext, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::types::AdapterProfile;

/// Explicit device context threaded through every stage.
///
/// Holds the instance, device and queue plus what the adapter reported. The
/// swapchain lives in [`SurfaceTarget`].
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_profile: AdapterProfile,
    pub features: wgpu::Features,
    pub limits: wgpu::Limits,
}

impl GpuContext {
    /// Creates a device able to present to `target` and the surface for it.
    pub fn with_surface<T>(
        target: &T,
        initial_size: (u32, u32),
        vsync: bool,
    ) -> Result<(Self, SurfaceTarget)>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let instance = new_instance();

        let window_handle = target
            .window_handle()
            .map_err(|err| anyhow!("failed to acquire window handle: {err}"))?;
        let display_handle = target
            .display_handle()
            .map_err(|err| anyhow!("failed to acquire display handle: {err}"))?;

        // SAFETY: the window outlives the surface; the runtime drops the
        // surface before the window when the event loop exits.
        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }
        .context("failed to create rendering surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let context = Self::from_adapter(instance, adapter)?;
        let surface = SurfaceTarget::new(&context, surface, initial_size, vsync)?;
        Ok((context, surface))
    }

    /// Creates a device with no presentation surface, for offscreen frames.
    pub fn headless() -> Result<Self> {
        let instance = new_instance();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;
        Self::from_adapter(instance, adapter)
    }

    fn from_adapter(instance: wgpu::Instance, adapter: wgpu::Adapter) -> Result<Self> {
        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        let adapter_profile = AdapterProfile::from_wgpu(&adapter_info, &limits);
        tracing::debug!(
            name = %adapter_profile.name,
            backend = ?adapter_profile.backend,
            device_type = ?adapter_profile.device_type,
            is_software = adapter_profile.is_software(),
            "selected GPU adapter"
        );

        let mut required_features = wgpu::Features::empty();
        if adapter
            .features()
            .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
        {
            required_features |= wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("raysuch device"),
            required_features,
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        device.on_uncaptured_error(Box::new(|error| {
            tracing::error!(%error, "uncaptured GPU error");
        }));

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            adapter_profile,
            features: required_features,
            limits,
        })
    }

    /// Runs `create` inside validation and out-of-memory error scopes.
    ///
    /// Returns the created value together with the first error wgpu reported
    /// for it, so callers can turn a failed creation into a diagnostic.
    pub fn scoped<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        (value, out_of_memory.or(validation))
    }

    /// Blocks until all submitted work has finished.
    pub fn wait_idle(&self) {
        if let Err(err) = self.device.poll(wgpu::PollType::Wait) {
            tracing::warn!(error = %err, "device poll failed");
        }
    }
}

fn new_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}

/// Swapchain for a window.
pub struct SurfaceTarget {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    caps: wgpu::SurfaceCapabilities,
}

impl SurfaceTarget {
    fn new(
        context: &GpuContext,
        surface: wgpu::Surface<'static>,
        initial_size: (u32, u32),
        vsync: bool,
    ) -> Result<Self> {
        let (width, height) = initial_size;
        let max_dimension = context.limits.max_texture_dimension_2d;
        if width > max_dimension || height > max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max_dimension}, requested surface is {width}x{height}"
            );
        }

        let caps = surface.get_capabilities(&context.adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("surface reports no supported formats")?;
        if format.is_srgb() {
            tracing::warn!(?format, "no linear surface format available; colours will be sRGB-encoded");
        }
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let present_mode = choose_present_mode(&caps.present_modes, vsync);
        tracing::debug!(?format, ?present_mode, "configuring surface");

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&context.device, &config);

        Ok(Self {
            surface,
            config,
            caps,
        })
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    pub fn present_mode(&self) -> wgpu::PresentMode {
        self.config.present_mode
    }

    /// Reconfigures the swapchain; zero-sized requests (minimised windows)
    /// are ignored.
    pub fn resize(&mut self, context: &GpuContext, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&context.device, &self.config);
    }

    /// Reapplies the current configuration after the surface was lost.
    pub fn reconfigure(&self, context: &GpuContext) {
        self.surface.configure(&context.device, &self.config);
    }

    pub fn set_vsync(&mut self, context: &GpuContext, enabled: bool) {
        let target_mode = choose_present_mode(&self.caps.present_modes, enabled);
        if target_mode != self.config.present_mode {
            self.config.present_mode = target_mode;
            self.surface.configure(&context.device, &self.config);
            tracing::debug!(?target_mode, vsync_enabled = enabled, "reconfigured surface present mode");
        }
    }

    pub fn acquire(&self) -> Result<wgpu::SurfaceTexture, wgpu::SurfaceError> {
        self.surface.get_current_texture()
    }
}

/// FIFO when vsync is requested; otherwise Immediate, then Mailbox, then
/// whatever the surface offers first.
fn choose_present_mode(available: &[wgpu::PresentMode], vsync: bool) -> wgpu::PresentMode {
    let find = |wanted: wgpu::PresentMode| available.iter().copied().find(|mode| *mode == wanted);
    let fallback = find(wgpu::PresentMode::Fifo)
        .or_else(|| available.first().copied())
        .unwrap_or(wgpu::PresentMode::Fifo);
    if vsync {
        fallback
    } else {
        find(wgpu::PresentMode::Immediate)
            .or_else(|| find(wgpu::PresentMode::Mailbox))
            .unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vsync_prefers_fifo() {
        let modes = [wgpu::PresentMode::Immediate, wgpu::PresentMode::Fifo];
        assert_eq!(choose_present_mode(&modes, true), wgpu::PresentMode::Fifo);
        assert_eq!(choose_present_mode(&modes, false), wgpu::PresentMode::Immediate);
    }

    #[test]
    fn without_vsync_falls_back_through_mailbox() {
        let modes = [wgpu::PresentMode::Fifo, wgpu::PresentMode::Mailbox];
        assert_eq!(choose_present_mode(&modes, false), wgpu::PresentMode::Mailbox);
        assert_eq!(choose_present_mode(&[wgpu::PresentMode::Fifo], false), wgpu::PresentMode::Fifo);
        assert_eq!(choose_present_mode(&[], true), wgpu::PresentMode::Fifo);
    }
}
