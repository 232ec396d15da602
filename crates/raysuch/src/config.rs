use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glam::Vec3;
use renderer::gpu::PixelFormat;
use renderer::{CameraParams, KeyBindings, LookToggle, RendererConfig, ShaderPaths, TileSize};
use settings::{ImageFormatSetting, LookToggleSetting, Settings};

use crate::cli::RunArgs;
use crate::paths::AppPaths;

/// Where the settings came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsOrigin {
    File(PathBuf),
    Defaults,
}

/// Loads `--config FILE` when given, otherwise `raysuch.toml` from the config
/// directory when it exists, otherwise the built-in defaults.
pub fn load_settings(explicit: Option<&Path>, paths: &AppPaths) -> Result<(Settings, SettingsOrigin)> {
    let candidate = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Some(paths.config_file()).filter(|path| path.is_file()),
    };
    match candidate {
        Some(path) => {
            let settings = Settings::load(&path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?;
            Ok((settings, SettingsOrigin::File(path)))
        }
        None => Ok((Settings::default(), SettingsOrigin::Defaults)),
    }
}

/// Applies command-line overrides on top of the loaded settings and
/// revalidates the result.
pub fn apply_overrides(settings: &mut Settings, args: &RunArgs) -> Result<()> {
    if let Some(size) = args.size {
        settings.window.width = size.width;
        settings.window.height = size.height;
    }
    if let Some(tile) = args.tile {
        settings.render.tile = tile;
    }
    if let Some(mode) = args.look_toggle {
        settings.input.look_toggle = mode;
    }
    if let Some(dir) = args.shader_dir.as_deref() {
        settings.shaders.compute = dir.join("compute/raytrace.comp");
        settings.shaders.vertex = dir.join("present/quad.vert");
        settings.shaders.fragment = dir.join("present/quad.frag");
    }
    if args.no_vsync {
        settings.window.vsync = false;
    }
    settings
        .validate()
        .context("command-line overrides produced an invalid configuration")?;
    Ok(())
}

/// Translates validated settings into what the renderer consumes.
pub fn renderer_config(settings: &Settings, capture: Option<PathBuf>) -> Result<RendererConfig> {
    let bindings = KeyBindings::from_names(settings.input.bindings()).context("invalid [input] key bindings")?;
    let window = &settings.window;
    let camera = &settings.camera;

    Ok(RendererConfig {
        title: window.title.clone(),
        surface_size: (window.width, window.height),
        vsync: window.vsync,
        tile: TileSize::new(settings.render.tile.width, settings.render.tile.height),
        image_format: match settings.render.image_format {
            ImageFormatSetting::Rgba8 => PixelFormat::RGBA8,
            ImageFormatSetting::Rgba16f => PixelFormat::RGBA16F,
        },
        shaders: ShaderPaths {
            compute: settings.shaders.compute.clone(),
            vertex: settings.shaders.vertex.clone(),
            fragment: settings.shaders.fragment.clone(),
        },
        camera: CameraParams {
            position: Vec3::from_array(camera.position),
            direction: Vec3::from_array(camera.direction),
            speed: camera.speed,
            fov_degrees: camera.fov,
            aspect_ratio: window.width as f32 / window.height as f32,
            near: camera.near,
            far: camera.far,
        },
        sensitivity: camera.sensitivity,
        look_enabled: camera.look_enabled,
        look_toggle: match settings.input.look_toggle {
            LookToggleSetting::Edge => LookToggle::Edge,
            LookToggleSetting::Level => LookToggle::Level,
        },
        bindings,
        capture,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use settings::Extent;
    use tempfile::TempDir;

    #[test]
    fn defaults_map_onto_the_renderer_defaults() {
        let config = renderer_config(&Settings::default(), None).unwrap();
        let expected = RendererConfig::default();
        assert_eq!(config.title, expected.title);
        assert_eq!(config.surface_size, (1600, 1200));
        assert_eq!(config.tile, TileSize::new(16, 16));
        assert_eq!(config.image_format, PixelFormat::RGBA8);
        assert_eq!(config.shaders, expected.shaders);
        assert_eq!(config.camera.direction, Vec3::NEG_Z);
        assert_eq!(config.camera.aspect_ratio, 4.0 / 3.0);
        assert_eq!(config.look_toggle, LookToggle::Edge);
        assert_eq!(config.bindings, KeyBindings::default());
    }

    #[test]
    fn overrides_replace_loaded_values() {
        let mut settings = Settings::default();
        let args = RunArgs {
            size: Some(Extent {
                width: 640,
                height: 480,
            }),
            tile: Some(Extent { width: 8, height: 4 }),
            look_toggle: Some(LookToggleSetting::Level),
            shader_dir: Some(PathBuf::from("/opt/shaders")),
            no_vsync: true,
            ..RunArgs::default()
        };
        apply_overrides(&mut settings, &args).unwrap();

        let config = renderer_config(&settings, Some(PathBuf::from("shot.png"))).unwrap();
        assert_eq!(config.surface_size, (640, 480));
        assert_eq!(config.tile, TileSize::new(8, 4));
        assert_eq!(config.look_toggle, LookToggle::Level);
        assert!(!config.vsync);
        assert_eq!(config.shaders.compute, PathBuf::from("/opt/shaders/compute/raytrace.comp"));
        assert_eq!(config.shaders.fragment, PathBuf::from("/opt/shaders/present/quad.frag"));
        assert_eq!(config.capture, Some(PathBuf::from("shot.png")));
    }

    #[test]
    fn conflicting_key_names_fail() {
        let mut settings = Settings::default();
        settings.input.backward = settings.input.forward.clone();
        assert!(renderer_config(&settings, None).is_err());
    }

    #[test]
    fn explicit_file_wins_and_missing_default_falls_back() {
        let dir = TempDir::new().unwrap();
        let paths_root = dir.path().join("config");
        let file = dir.path().join("custom.toml");
        std::fs::write(&file, "[window]\nwidth = 800\nheight = 600\n").unwrap();

        let paths = crate::paths::AppPaths::at(paths_root);
        let (settings, origin) = load_settings(Some(&file), &paths).unwrap();
        assert_eq!(settings.window.width, 800);
        assert_eq!(origin, SettingsOrigin::File(file.clone()));
        assert_eq!(settings.shaders.compute, dir.path().join("shaders/compute/raytrace.comp"));

        let (settings, origin) = load_settings(None, &paths).unwrap();
        assert_eq!(origin, SettingsOrigin::Defaults);
        assert_eq!(settings, Settings::default());
    }
}
