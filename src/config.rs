use crate::controller::{InstancingSettings, ModeSettings};
use crate::decode::DebugMode;
use crate::texture::FloatTextureFormat;
use crate::time::PlaybackClock;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/vat_player.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { title: "VAT Player".to_string(), width: 1280, height: 720, vsync: true, fullscreen: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "PlaybackConfig::default_speed")]
    pub speed: f32,
    #[serde(default = "PlaybackConfig::default_autoplay")]
    pub autoplay: bool,
    /// Unset follows the position texture's extension.
    #[serde(default)]
    pub flip_v: Option<bool>,
    #[serde(default)]
    pub use_offset: bool,
    #[serde(default = "PlaybackConfig::default_use_normal_texture")]
    pub use_normal_texture: bool,
    #[serde(default)]
    pub debug_mode: u32,
}

impl PlaybackConfig {
    const fn default_speed() -> f32 {
        1.0
    }
    const fn default_autoplay() -> bool {
        false
    }
    const fn default_use_normal_texture() -> bool {
        true
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: Self::default_speed(),
            autoplay: Self::default_autoplay(),
            flip_v: None,
            use_offset: false,
            use_normal_texture: Self::default_use_normal_texture(),
            debug_mode: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstancingConfig {
    pub enabled: bool,
    pub count: u32,
    pub spacing: f32,
}

impl Default for InstancingConfig {
    fn default() -> Self {
        let defaults = InstancingSettings::default();
        Self { enabled: defaults.enabled, count: defaults.count, spacing: defaults.spacing }
    }
}

/// Files loaded at startup and on reload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub mesh: Option<PathBuf>,
    pub position_texture: Option<PathBuf>,
    pub normal_texture: Option<PathBuf>,
    pub metadata: Option<PathBuf>,
}

impl AssetsConfig {
    pub fn is_empty(&self) -> bool {
        self.mesh.is_none()
            && self.position_texture.is_none()
            && self.normal_texture.is_none()
            && self.metadata.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    pub float_format: FloatTextureFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub instancing: InstancingConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub texture: TextureConfig,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vsync: Option<bool>,
    pub mesh: Option<PathBuf>,
    pub position_texture: Option<PathBuf>,
    pub normal_texture: Option<PathBuf>,
    pub metadata: Option<PathBuf>,
    pub instances: Option<u32>,
    pub spacing: Option<f32>,
    pub speed: Option<f32>,
    pub flip_v: Option<bool>,
    pub use_offset: Option<bool>,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!("Config load error: {err:#}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) {
        if let Some(width) = overrides.width {
            self.window.width = width;
        }
        if let Some(height) = overrides.height {
            self.window.height = height;
        }
        if let Some(vsync) = overrides.vsync {
            self.window.vsync = vsync;
        }
        if let Some(mesh) = &overrides.mesh {
            self.assets.mesh = Some(mesh.clone());
        }
        if let Some(texture) = &overrides.position_texture {
            self.assets.position_texture = Some(texture.clone());
        }
        if let Some(texture) = &overrides.normal_texture {
            self.assets.normal_texture = Some(texture.clone());
        }
        if let Some(metadata) = &overrides.metadata {
            self.assets.metadata = Some(metadata.clone());
        }
        if let Some(count) = overrides.instances {
            self.instancing.count = count;
            self.instancing.enabled = count > 1;
        }
        if let Some(spacing) = overrides.spacing {
            self.instancing.spacing = spacing;
        }
        if let Some(speed) = overrides.speed {
            self.playback.speed = speed;
        }
        if let Some(flip_v) = overrides.flip_v {
            self.playback.flip_v = Some(flip_v);
        }
        if let Some(use_offset) = overrides.use_offset {
            self.playback.use_offset = use_offset;
        }
    }

    pub fn mode_settings(&self) -> ModeSettings {
        let debug_mode = DebugMode::from_index(self.playback.debug_mode).unwrap_or_else(|| {
            tracing::warn!(debug_mode = self.playback.debug_mode, "unknown debug mode; using shaded");
            DebugMode::Shaded
        });
        ModeSettings {
            flip_v: self.playback.flip_v,
            use_offset: self.playback.use_offset,
            use_normal_texture: self.playback.use_normal_texture,
            debug_mode,
            encoding_override: None,
        }
    }

    pub fn instancing_settings(&self) -> InstancingSettings {
        InstancingSettings {
            enabled: self.instancing.enabled,
            count: self.instancing.count,
            spacing: self.instancing.spacing,
        }
    }

    pub fn playback_clock(&self) -> PlaybackClock {
        let mut clock = PlaybackClock::new(self.playback.speed);
        if self.playback.autoplay {
            clock.play();
        }
        clock
    }
}

impl AppConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.applied_fields().is_empty()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.width.is_some() {
            fields.push("width");
        }
        if self.height.is_some() {
            fields.push("height");
        }
        if self.vsync.is_some() {
            fields.push("vsync");
        }
        if self.mesh.is_some() {
            fields.push("mesh");
        }
        if self.position_texture.is_some() {
            fields.push("position_texture");
        }
        if self.normal_texture.is_some() {
            fields.push("normal_texture");
        }
        if self.metadata.is_some() {
            fields.push("metadata");
        }
        if self.instances.is_some() {
            fields.push("instances");
        }
        if self.spacing.is_some() {
            fields.push("spacing");
        }
        if self.speed.is_some() {
            fields.push("speed");
        }
        if self.flip_v.is_some() {
            fields.push("flip_v");
        }
        if self.use_offset.is_some() {
            fields.push("use_offset");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.playback.speed, 1.0);
        assert!(!cfg.playback.autoplay);
        assert!(!AppConfig::default().playback_clock().is_playing());
        assert_eq!(cfg.instancing.count, 100);
        assert_eq!(cfg.texture.float_format, FloatTextureFormat::Rgba16F);
        assert!(cfg.assets.is_empty());
    }

    #[test]
    fn partial_sections_fill_missing_fields() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{
                "instancing": {"count": 400},
                "texture": {"float_format": "rgba32f"},
                "playback": {"flip_v": true}
            }"#,
        )
        .expect("parse");
        assert_eq!(cfg.instancing.count, 400);
        assert_eq!(cfg.instancing.spacing, 3.0);
        assert_eq!(cfg.texture.float_format, FloatTextureFormat::Rgba32F);
        assert_eq!(cfg.mode_settings().flip_v, Some(true));
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut cfg = AppConfig::default();
        let overrides = AppConfigOverrides {
            width: Some(1920),
            instances: Some(64),
            mesh: Some(PathBuf::from("crowd.glb")),
            speed: Some(0.5),
            ..AppConfigOverrides::default()
        };
        cfg.apply_overrides(&overrides);
        assert_eq!(cfg.window.width, 1920);
        assert!(cfg.instancing.enabled);
        assert_eq!(cfg.instancing.count, 64);
        assert_eq!(cfg.assets.mesh.as_deref(), Some(Path::new("crowd.glb")));
        assert_eq!(cfg.playback_clock().speed(), 0.5);
        assert_eq!(overrides.applied_fields(), vec!["width", "mesh", "instances", "speed"]);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = AppConfig::load_or_default("does/not/exist.json");
        assert_eq!(cfg.window.title, "VAT Player");
    }
}
