use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Root of the TOML configuration file.
///
/// Every section is optional; missing keys fall back to the values the
/// viewer has always shipped with (a 1600x1200 window, 16x16 tiles, a camera
/// at the origin looking down -Z).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub window: WindowSettings,
    pub render: RenderSettings,
    pub camera: CameraSettings,
    pub input: InputSettings,
    pub shaders: ShaderSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: "Rays And Such".into(),
            width: 1600,
            height: 1200,
            vsync: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderSettings {
    #[serde(
        deserialize_with = "deserialize_extent",
        serialize_with = "serialize_extent"
    )]
    pub tile: Extent,
    pub image_format: ImageFormatSetting,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            tile: Extent {
                width: 16,
                height: 16,
            },
            image_format: ImageFormatSetting::Rgba8,
        }
    }
}

/// Width/height pair written either as `"16x16"` or `[16, 16]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormatSetting {
    Rgba8,
    Rgba16f,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraSettings {
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub speed: f32,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub sensitivity: f32,
    pub look_enabled: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 0.0],
            direction: [0.0, 0.0, -1.0],
            speed: 5.0,
            fov: 100.0,
            near: 0.1,
            far: 100.0,
            sensitivity: 0.1,
            look_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookToggleSetting {
    /// Flip look mode once per key press.
    Edge,
    /// Flip look mode on every frame the key is held.
    Level,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputSettings {
    pub look_toggle: LookToggleSetting,
    pub forward: String,
    pub backward: String,
    pub left: String,
    pub right: String,
    pub up: String,
    pub down: String,
    pub toggle_look: String,
    pub quit: String,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            look_toggle: LookToggleSetting::Edge,
            forward: "KeyW".into(),
            backward: "KeyS".into(),
            left: "KeyA".into(),
            right: "KeyD".into(),
            up: "Space".into(),
            down: "ControlLeft".into(),
            toggle_look: "KeyQ".into(),
            quit: "Escape".into(),
        }
    }
}

impl InputSettings {
    /// Action name / key name pairs in a stable order.
    pub fn bindings(&self) -> [(&'static str, &str); 8] {
        [
            ("forward", self.forward.as_str()),
            ("backward", self.backward.as_str()),
            ("left", self.left.as_str()),
            ("right", self.right.as_str()),
            ("up", self.up.as_str()),
            ("down", self.down.as_str()),
            ("toggle_look", self.toggle_look.as_str()),
            ("quit", self.quit.as_str()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShaderSettings {
    pub compute: PathBuf,
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderSettings {
    fn default() -> Self {
        Self {
            compute: PathBuf::from("shaders/compute/raytrace.comp"),
            vertex: PathBuf::from("shaders/present/quad.vert"),
            fragment: PathBuf::from("shaders/present/quad.frag"),
        }
    }
}

impl ShaderSettings {
    /// Rebases relative shader paths onto `base`; absolute paths are kept.
    pub fn resolve_against(&mut self, base: &Path) {
        for path in [&mut self.compute, &mut self.vertex, &mut self.fragment] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

fn deserialize_extent<'de, D>(deserializer: D) -> Result<Extent, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Extent;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("an extent as \"WIDTHxHEIGHT\" or [width, height]")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            parse_extent(v).map_err(E::custom)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let width: u32 = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(0, &self))?;
            let height: u32 = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(1, &self))?;
            if seq.next_element::<u32>()?.is_some() {
                return Err(de::Error::invalid_length(3, &self));
            }
            Ok(Extent { width, height })
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn serialize_extent<S>(extent: &Extent, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(extent)
}

/// Parses `WIDTHxHEIGHT` (either `x` or `X` as the separator).
pub fn parse_extent(value: &str) -> Result<Extent, String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid extent '{value}'; expected WIDTHxHEIGHT"))?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width in '{value}'"))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height in '{value}'"))?;
    Ok(Extent { width, height })
}

impl Settings {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: Settings = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates a config file, rebasing relative shader paths onto
    /// the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_toml_str(&contents)?;
        if let Some(dir) = path.parent() {
            settings.shaders.resolve_against(dir);
        }
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|err| ConfigError::Invalid(format!("failed to serialize settings: {err}")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if self.render.tile.width == 0 || self.render.tile.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "render.tile must be non-zero, got {}",
                self.render.tile
            )));
        }

        let camera = &self.camera;
        if !(camera.fov > 0.0 && camera.fov < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "camera.fov must be within (0, 180) degrees, got {}",
                camera.fov
            )));
        }

        if !(camera.near > 0.0 && camera.near < camera.far) {
            return Err(ConfigError::Invalid(format!(
                "camera planes must satisfy 0 < near < far, got near={} far={}",
                camera.near, camera.far
            )));
        }

        if !camera.speed.is_finite() || camera.speed < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "camera.speed must be a finite non-negative number, got {}",
                camera.speed
            )));
        }

        if !camera.sensitivity.is_finite() {
            return Err(ConfigError::Invalid(
                "camera.sensitivity must be finite".into(),
            ));
        }

        if camera.position.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::Invalid(
                "camera.position must be finite".into(),
            ));
        }

        let [x, y, z] = camera.direction;
        let length = (x * x + y * y + z * z).sqrt();
        if !length.is_finite() || length <= f32::EPSILON {
            return Err(ConfigError::Invalid(
                "camera.direction must be a non-zero vector".into(),
            ));
        }
        if (x * x + z * z).sqrt() / length <= 1e-4 {
            return Err(ConfigError::Invalid(
                "camera.direction must not be parallel to the world up axis".into(),
            ));
        }

        for (action, key) in self.input.bindings() {
            if key.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "input.{action} must name a key"
                )));
            }
        }

        for (stage, path) in [
            ("compute", &self.shaders.compute),
            ("vertex", &self.shaders.vertex),
            ("fragment", &self.shaders.fragment),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "shaders.{stage} must not be empty"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[window]
title = "Preview"
width = 1280
height = 720
vsync = false

[render]
tile = "8x8"
image_format = "rgba16f"

[camera]
position = [1.0, 2.0, 3.0]
speed = 2.5
fov = 75

[input]
look_toggle = "level"
toggle_look = "KeyE"

[shaders]
compute = "/abs/trace.comp"
"#;

    #[test]
    fn parses_sample_config() {
        let settings = Settings::from_toml_str(SAMPLE).expect("parse settings");
        assert_eq!(settings.window.width, 1280);
        assert!(!settings.window.vsync);
        assert_eq!(
            settings.render.tile,
            Extent {
                width: 8,
                height: 8
            }
        );
        assert_eq!(settings.render.image_format, ImageFormatSetting::Rgba16f);
        assert_eq!(settings.camera.position, [1.0, 2.0, 3.0]);
        assert_eq!(settings.camera.direction, [0.0, 0.0, -1.0]);
        assert_eq!(settings.input.look_toggle, LookToggleSetting::Level);
        assert_eq!(settings.input.toggle_look, "KeyE");
        assert_eq!(settings.input.forward, "KeyW");
    }

    #[test]
    fn empty_config_matches_defaults() {
        let settings = Settings::from_toml_str("").expect("parse empty");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.window.width, 1600);
        assert_eq!(settings.window.height, 1200);
        assert_eq!(settings.render.tile.to_string(), "16x16");
    }

    #[test]
    fn tile_accepts_array_form() {
        let settings = Settings::from_toml_str("[render]\ntile = [32, 8]\n").unwrap();
        assert_eq!(
            settings.render.tile,
            Extent {
                width: 32,
                height: 8
            }
        );
    }

    #[test]
    fn rejects_zero_tile() {
        let err = Settings::from_toml_str("[render]\ntile = \"0x16\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_planes() {
        let err = Settings::from_toml_str("[camera]\nnear = 10.0\nfar = 1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_vertical_direction() {
        let err =
            Settings::from_toml_str("[camera]\ndirection = [0.0, 1.0, 0.0]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_toggle_mode() {
        let err = Settings::from_toml_str("[input]\nlook_toggle = \"sometimes\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn resolves_relative_shader_paths() {
        let mut shaders = ShaderSettings {
            compute: PathBuf::from("/abs/trace.comp"),
            ..ShaderSettings::default()
        };
        shaders.resolve_against(Path::new("/etc/raysuch"));
        assert_eq!(shaders.compute, PathBuf::from("/abs/trace.comp"));
        assert_eq!(
            shaders.vertex,
            PathBuf::from("/etc/raysuch/shaders/present/quad.vert")
        );
    }

    #[test]
    fn serialized_settings_round_trip_through_parser() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let text = settings.to_toml_string().unwrap();
        let reparsed = Settings::from_toml_str(&text).unwrap();
        assert_eq!(reparsed, settings);
    }
}
