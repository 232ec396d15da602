use std::path::PathBuf;

use glam::Vec3;

use crate::camera::{CameraParams, LookToggle};
use crate::gpu::PixelFormat;
use crate::input::KeyBindings;

/// Size of one compute workgroup tile in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSize {
    pub x: u32,
    pub y: u32,
}

impl TileSize {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Number of workgroups needed to cover `width x height` pixels.
    ///
    /// Partial tiles at the right and bottom edges round up; invocations that
    /// land outside the image must be discarded by the compute program.
    pub fn workgroups_for(self, width: u32, height: u32) -> [u32; 3] {
        [
            width.div_ceil(self.x.max(1)),
            height.div_ceil(self.y.max(1)),
            1,
        ]
    }

    pub fn divides(self, width: u32, height: u32) -> bool {
        self.x != 0 && self.y != 0 && width % self.x == 0 && height % self.y == 0
    }
}

impl Default for TileSize {
    fn default() -> Self {
        Self::new(16, 16)
    }
}

/// File locations of the three programs the frame loop drives.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderPaths {
    pub compute: PathBuf,
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self {
            compute: PathBuf::from("shaders/compute/raytrace.comp"),
            vertex: PathBuf::from("shaders/present/quad.vert"),
            fragment: PathBuf::from("shaders/present/quad.frag"),
        }
    }
}

/// Summary of the adapter wgpu picked, kept for logging.
#[derive(Debug, Clone)]
pub struct AdapterProfile {
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
    pub max_texture_dimension: u32,
}

impl AdapterProfile {
    pub(crate) fn from_wgpu(info: &wgpu::AdapterInfo, limits: &wgpu::Limits) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
            max_texture_dimension: limits.max_texture_dimension_2d,
        }
    }

    pub fn is_software(&self) -> bool {
        matches!(self.device_type, wgpu::DeviceType::Cpu)
    }
}

/// Immutable configuration passed to the renderer at start-up.
///
/// `RendererConfig` is assembled by the binary from the settings file and CLI
/// overrides. The window is created at `surface_size`; the two render images
/// follow the window size from then on.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window title; the instantaneous FPS is appended every frame.
    pub title: String,
    /// Initial window size in physical pixels.
    pub surface_size: (u32, u32),
    /// Prefer a tear-free FIFO present mode.
    pub vsync: bool,
    /// Compute workgroup tile the dispatch grid is computed from.
    pub tile: TileSize,
    /// Pixel format shared by the colour and normal images.
    pub image_format: PixelFormat,
    /// Programs to load at start-up.
    pub shaders: ShaderPaths,
    /// Initial camera pose and lens.
    pub camera: CameraParams,
    /// Degrees of rotation per pixel of pointer travel.
    pub sensitivity: f32,
    /// Whether mouse-look starts enabled.
    pub look_enabled: bool,
    /// How the toggle-look key flips look mode.
    pub look_toggle: LookToggle,
    /// Physical key to logical action mapping.
    pub bindings: KeyBindings,
    /// Write the first presented colour image to this PNG path.
    pub capture: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "Rays And Such".into(),
            surface_size: (1600, 1200),
            vsync: true,
            tile: TileSize::default(),
            image_format: PixelFormat::RGBA8,
            shaders: ShaderPaths::default(),
            camera: CameraParams {
                position: Vec3::ZERO,
                direction: Vec3::NEG_Z,
                speed: 5.0,
                fov_degrees: 100.0,
                aspect_ratio: 4.0 / 3.0,
                near: 0.1,
                far: 100.0,
            },
            sensitivity: 0.1,
            look_enabled: false,
            look_toggle: LookToggle::default(),
            bindings: KeyBindings::default(),
            capture: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroups_cover_exact_multiples() {
        let tile = TileSize::new(16, 16);
        assert_eq!(tile.workgroups_for(1600, 1200), [100, 75, 1]);
        assert!(tile.divides(1600, 1200));
    }

    #[test]
    fn workgroups_round_up_partial_tiles() {
        let tile = TileSize::new(16, 16);
        assert_eq!(tile.workgroups_for(1601, 1199), [101, 75, 1]);
        assert_eq!(tile.workgroups_for(1, 1), [1, 1, 1]);
        assert!(!tile.divides(1601, 1199));
    }

    #[test]
    fn zero_sized_target_dispatches_nothing() {
        assert_eq!(TileSize::new(8, 8).workgroups_for(0, 0), [0, 0, 1]);
    }
}
