// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub scene: SceneConfig,
    pub assets: AssetConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Engine".to_string(),
            width: 1700,
            height: 900,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Upgrade FIFO to MAILBOX when the surface offers it
    pub prefer_mailbox: bool,
    /// Bound on fence waits and image acquisition, in nanoseconds
    pub frame_timeout_ns: u64,
    /// Set viewport/scissor per frame instead of baking them into the pipeline
    pub dynamic_viewport: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            prefer_mailbox: true,
            frame_timeout_ns: 1_000_000_000,
            dynamic_viewport: false,
        }
    }
}

/// Scene layout and camera
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub grid_radius: i32,
    pub spin_degrees_per_frame: f32,
    pub camera_position: [f32; 3],
    pub fov_y_degrees: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            grid_radius: 20,
            spin_degrees_per_frame: 0.4,
            camera_position: [0.0, -6.0, -10.0],
            fov_y_degrees: 70.0,
        }
    }
}

/// Where compiled SPIR-V lives
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub shader_dir: PathBuf,
    pub vertex_shader: String,
    pub fragment_shader: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            vertex_shader: "mesh.vert.spv".to_string(),
            fragment_shader: "colored.frag.spv".to_string(),
        }
    }
}

impl AssetConfig {
    pub fn vertex_shader_path(&self) -> PathBuf {
        self.shader_dir.join(&self.vertex_shader)
    }

    pub fn fragment_shader_path(&self) -> PathBuf {
        self.shader_dir.join(&self.fragment_shader)
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
        }
    }
}

impl DebugConfig {
    /// Parse the configured level, falling back to Info on typos
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Validation layers are a debug-build diagnostic only
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("nope.toml")).unwrap();

        assert_eq!(config.window.width, 1700);
        assert_eq!(config.window.height, 900);
        assert_eq!(config.graphics.frame_timeout_ns, 1_000_000_000);
        assert!(config.graphics.prefer_mailbox);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window]\nwidth = 800\n\n[graphics]\nprefer_mailbox = false").unwrap();

        let config = Config::load_from_path(file.path()).unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 900);
        assert!(!config.graphics.prefer_mailbox);
        assert_eq!(config.assets.vertex_shader, "mesh.vert.spv");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window\nwidth = ").unwrap();

        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn shader_paths_join_directory() {
        let assets = AssetConfig {
            shader_dir: PathBuf::from("assets/spv"),
            ..AssetConfig::default()
        };

        assert_eq!(
            assets.fragment_shader_path(),
            Path::new("assets/spv").join("colored.frag.spv")
        );
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let debug = DebugConfig {
            log_level: "loud".to_string(),
            ..DebugConfig::default()
        };
        assert_eq!(debug.level_filter(), log::LevelFilter::Info);

        let debug = DebugConfig {
            log_level: "trace".to_string(),
            ..DebugConfig::default()
        };
        assert_eq!(debug.level_filter(), log::LevelFilter::Trace);
    }
}
