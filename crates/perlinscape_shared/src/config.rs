use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::coords::ChunkDims;

pub const MIN_LAYER_COUNT: u32 = 1;
pub const MAX_LAYER_COUNT: u32 = 10;
const MIN_RENDER_DISTANCE: i32 = 0;
const MAX_RENDER_DISTANCE: i32 = 16;
const MIN_EXPAND_RANGE: i32 = 0;
const MAX_EXPAND_RANGE: i32 = 8;
const MIN_CHUNK_SIZE: u32 = 8;
const MAX_CHUNK_SIZE: u32 = 2048;
const MAX_WAIT_TIMEOUT_MS: u64 = 5_000;
const MIN_PATCH_COUNT: u32 = 1;
const MAX_PATCH_COUNT: u32 = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    ZeroLayerCount,
    TooManyLayers(u32),
    InvalidScale(f64),
    InvalidLacunarity(f64),
    InvalidAmplitude(f64),
    ZeroChunkSize { width: u32, height: u32 },
    NegativeRenderDistance(i32),
    NegativeExpandRange(i32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroLayerCount => write!(f, "layer_count must be at least {MIN_LAYER_COUNT}"),
            Self::TooManyLayers(count) => {
                write!(f, "layer_count {count} exceeds the maximum of {MAX_LAYER_COUNT}")
            }
            Self::InvalidScale(scale) => {
                write!(f, "scale must be finite and non-negative, got {scale}")
            }
            Self::InvalidLacunarity(value) => {
                write!(f, "layer_lacunarity must be finite and positive, got {value}")
            }
            Self::InvalidAmplitude(value) => {
                write!(f, "layer_amplitude must be finite and positive, got {value}")
            }
            Self::ZeroChunkSize { width, height } => {
                write!(f, "chunk size must be positive on both axes, got {width}x{height}")
            }
            Self::NegativeRenderDistance(distance) => {
                write!(f, "render_distance must not be negative, got {distance}")
            }
            Self::NegativeExpandRange(range) => {
                write!(f, "expand_range must not be negative, got {range}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parameters of the layered noise sum used to synthesize height fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseParams {
    #[serde(default = "default_seed")]
    pub seed: u32,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_layer_count")]
    pub layer_count: u32,
    #[serde(default = "default_layer_lacunarity")]
    pub layer_lacunarity: f64,
    #[serde(default = "default_layer_amplitude")]
    pub layer_amplitude: f64,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            scale: default_scale(),
            layer_count: default_layer_count(),
            layer_lacunarity: default_layer_lacunarity(),
            layer_amplitude: default_layer_amplitude(),
        }
    }
}

impl NoiseParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layer_count < MIN_LAYER_COUNT {
            return Err(ConfigError::ZeroLayerCount);
        }
        if self.layer_count > MAX_LAYER_COUNT {
            return Err(ConfigError::TooManyLayers(self.layer_count));
        }
        if !self.scale.is_finite() || self.scale < 0.0 {
            return Err(ConfigError::InvalidScale(self.scale));
        }
        if !self.layer_lacunarity.is_finite() || self.layer_lacunarity <= 0.0 {
            return Err(ConfigError::InvalidLacunarity(self.layer_lacunarity));
        }
        if !self.layer_amplitude.is_finite() || self.layer_amplitude <= 0.0 {
            return Err(ConfigError::InvalidAmplitude(self.layer_amplitude));
        }
        Ok(())
    }

    /// Sum of every layer's amplitude; the normalizing denominator.
    pub fn max_possible_height(&self) -> f64 {
        (0..self.layer_count)
            .map(|layer| self.layer_amplitude.powi(layer as i32))
            .sum()
    }

    fn sanitize(mut self) -> Self {
        let defaults = Self::default();
        self.layer_count = self.layer_count.clamp(MIN_LAYER_COUNT, MAX_LAYER_COUNT);
        if !self.scale.is_finite() || self.scale < 0.0 {
            self.scale = defaults.scale;
        }
        if !self.layer_lacunarity.is_finite() || self.layer_lacunarity <= 0.0 {
            self.layer_lacunarity = defaults.layer_lacunarity;
        }
        if !self.layer_amplitude.is_finite() || self.layer_amplitude <= 0.0 {
            self.layer_amplitude = defaults.layer_amplitude;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_render_distance")]
    pub render_distance: i32,
    /// Extra ring the loader pre-generates once its first sweep is done.
    #[serde(default = "default_expand_range")]
    pub expand_range: i32,
    #[serde(default = "default_chunk_size")]
    pub chunk_width: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_height: u32,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            render_distance: default_render_distance(),
            expand_range: default_expand_range(),
            chunk_width: default_chunk_size(),
            chunk_height: default_chunk_size(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl StreamSettings {
    pub fn dims(&self) -> ChunkDims {
        ChunkDims::new(self.chunk_width, self.chunk_height)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_width == 0 || self.chunk_height == 0 {
            return Err(ConfigError::ZeroChunkSize {
                width: self.chunk_width,
                height: self.chunk_height,
            });
        }
        if self.render_distance < 0 {
            return Err(ConfigError::NegativeRenderDistance(self.render_distance));
        }
        if self.expand_range < 0 {
            return Err(ConfigError::NegativeExpandRange(self.expand_range));
        }
        Ok(())
    }

    fn sanitize(mut self) -> Self {
        self.render_distance = self
            .render_distance
            .clamp(MIN_RENDER_DISTANCE, MAX_RENDER_DISTANCE);
        self.expand_range = self.expand_range.clamp(MIN_EXPAND_RANGE, MAX_EXPAND_RANGE);
        self.chunk_width = self.chunk_width.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self.chunk_height = self.chunk_height.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self.wait_timeout_ms = self.wait_timeout_ms.min(MAX_WAIT_TIMEOUT_MS);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Quads per chunk side in the shared terrain grid.
    #[serde(default = "default_patch_count")]
    pub patch_count: u32,
    #[serde(default = "default_height_scale")]
    pub height_scale: f32,
    #[serde(default = "default_move_speed")]
    pub move_speed: f32,
    #[serde(default = "default_mouse_sensitivity")]
    pub mouse_sensitivity: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            patch_count: default_patch_count(),
            height_scale: default_height_scale(),
            move_speed: default_move_speed(),
            mouse_sensitivity: default_mouse_sensitivity(),
        }
    }
}

impl RenderSettings {
    fn sanitize(mut self) -> Self {
        let defaults = Self::default();
        self.patch_count = self.patch_count.clamp(MIN_PATCH_COUNT, MAX_PATCH_COUNT);
        if !self.height_scale.is_finite() || self.height_scale <= 0.0 {
            self.height_scale = defaults.height_scale;
        }
        if !self.move_speed.is_finite() || self.move_speed <= 0.0 {
            self.move_speed = defaults.move_speed;
        }
        if !self.mouse_sensitivity.is_finite() || self.mouse_sensitivity <= 0.0 {
            self.mouse_sensitivity = defaults.mouse_sensitivity;
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerrainSettings {
    #[serde(default)]
    pub noise: NoiseParams,
    #[serde(default)]
    pub streaming: StreamSettings,
    #[serde(default)]
    pub render: RenderSettings,
}

impl TerrainSettings {
    pub fn sanitize(self) -> Self {
        Self {
            noise: self.noise.sanitize(),
            streaming: self.streaming.sanitize(),
            render: self.render.sanitize(),
        }
    }

    pub fn from_toml_str(contents: &str) -> io::Result<Self> {
        let parsed = toml::from_str::<Self>(contents).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to deserialize terrain settings: {e}"),
            )
        })?;
        Ok(parsed.sanitize())
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let settings = self.clone().sanitize();
        let serialized = toml::to_string_pretty(&settings).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to serialize terrain settings: {e}"),
            )
        })?;
        fs::write(path, serialized)
    }
}

pub fn load_or_create_settings(path: &Path) -> TerrainSettings {
    match TerrainSettings::load(path) {
        Ok(settings) => settings,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let settings = TerrainSettings::default();
            if let Err(save_err) = settings.save(path) {
                warn!(
                    "Failed to create default settings at {}: {save_err}",
                    path.display()
                );
            }
            settings
        }
        Err(err) => {
            warn!("Failed to load settings from {}: {err}", path.display());
            TerrainSettings::default()
        }
    }
}

fn default_seed() -> u32 {
    123_456
}

fn default_scale() -> f64 {
    0.0015
}

fn default_layer_count() -> u32 {
    5
}

fn default_layer_lacunarity() -> f64 {
    0.6
}

fn default_layer_amplitude() -> f64 {
    0.5
}

fn default_render_distance() -> i32 {
    3
}

fn default_expand_range() -> i32 {
    2
}

fn default_chunk_size() -> u32 {
    256
}

fn default_wait_timeout_ms() -> u64 {
    50
}

fn default_patch_count() -> u32 {
    64
}

fn default_height_scale() -> f32 {
    120.0
}

fn default_move_speed() -> f32 {
    150.0
}

fn default_mouse_sensitivity() -> f32 {
    0.0025
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{load_or_create_settings, ConfigError, NoiseParams, StreamSettings, TerrainSettings};

    #[test]
    fn defaults_match_reference_terrain() {
        let params = NoiseParams::default();
        assert_eq!(params.seed, 123_456);
        assert_eq!(params.scale, 0.0015);
        assert_eq!(params.layer_count, 5);
        assert_eq!(params.layer_lacunarity, 0.6);
        assert_eq!(params.layer_amplitude, 0.5);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn max_possible_height_is_geometric_sum() {
        let params = NoiseParams {
            layer_count: 4,
            layer_amplitude: 0.5,
            ..NoiseParams::default()
        };
        assert!((params.max_possible_height() - 1.875).abs() < 1e-12);

        let single = NoiseParams {
            layer_count: 1,
            ..NoiseParams::default()
        };
        assert_eq!(single.max_possible_height(), 1.0);
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        let zero_layers = NoiseParams {
            layer_count: 0,
            ..NoiseParams::default()
        };
        assert_eq!(zero_layers.validate(), Err(ConfigError::ZeroLayerCount));

        let negative_scale = NoiseParams {
            scale: -1.0,
            ..NoiseParams::default()
        };
        assert_eq!(negative_scale.validate(), Err(ConfigError::InvalidScale(-1.0)));

        let zero_scale = NoiseParams {
            scale: 0.0,
            ..NoiseParams::default()
        };
        assert!(zero_scale.validate().is_ok());
    }

    #[test]
    fn stream_settings_reject_empty_chunks_and_negative_rings() {
        assert!(StreamSettings::default().validate().is_ok());

        let zero_width = StreamSettings {
            chunk_width: 0,
            ..StreamSettings::default()
        };
        assert_eq!(
            zero_width.validate(),
            Err(ConfigError::ZeroChunkSize {
                width: 0,
                height: 256
            })
        );

        let behind = StreamSettings {
            render_distance: -1,
            ..StreamSettings::default()
        };
        assert_eq!(behind.validate(), Err(ConfigError::NegativeRenderDistance(-1)));

        let shrinking = StreamSettings {
            expand_range: -2,
            ..StreamSettings::default()
        };
        assert_eq!(shrinking.validate(), Err(ConfigError::NegativeExpandRange(-2)));

        let single_sample = StreamSettings {
            chunk_width: 1,
            chunk_height: 1,
            render_distance: 0,
            ..StreamSettings::default()
        };
        assert!(single_sample.validate().is_ok());
        assert!(TerrainSettings::default().sanitize().streaming.validate().is_ok());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults_and_clamps() {
        let settings = TerrainSettings::from_toml_str(
            r#"
            [noise]
            layer_count = 0
            scale = 0.01

            [streaming]
            render_distance = 99
            "#,
        )
        .expect("parse settings");

        assert_eq!(settings.noise.layer_count, 1);
        assert_eq!(settings.noise.scale, 0.01);
        assert_eq!(settings.noise.seed, 123_456);
        assert_eq!(settings.streaming.render_distance, 16);
        assert_eq!(settings.streaming.expand_range, 2);
        assert_eq!(settings.render, Default::default());
    }

    #[test]
    fn malformed_toml_is_invalid_data() {
        let err = TerrainSettings::from_toml_str("[noise\nscale = ").expect_err("must fail");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn load_or_create_writes_defaults_then_reads_them_back() {
        let dir = std::env::temp_dir().join(format!(
            "perlinscape-settings-{}-{}",
            std::process::id(),
            line!()
        ));
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("perlinscape.toml");
        let _ = fs::remove_file(&path);

        let created = load_or_create_settings(&path);
        assert_eq!(created, TerrainSettings::default());
        assert!(path.exists());

        let reloaded = TerrainSettings::load(&path).expect("reload settings");
        assert_eq!(reloaded, created);

        let _ = fs::remove_dir_all(&dir);
    }
}
