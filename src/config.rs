//! Configuration management for lenscore
//!
//! Provides loading, saving and validation of the runtime policy knobs:
//! device-open retry, photo/night/video pipeline parameters, control step
//! sizes and fallback storage locations.

use crate::capability::CaptureMode;
use crate::errors::CameraError;
use crate::hardware::LensFacing;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub camera: CameraConfig,
    pub photo: PhotoConfig,
    pub night: NightConfig,
    pub video: VideoConfig,
    pub controls: ControlsConfig,
    pub storage: StorageConfig,
}

/// Device selection and open policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Device-open attempts before giving up
    pub reconnect_attempts: u32,
    /// Delay before the first retry in milliseconds
    pub reconnect_delay_ms: u64,
    /// Growth factor applied to the delay after every failed attempt
    pub backoff_multiplier: f64,
    pub default_facing: LensFacing,
    pub default_mode: CaptureMode,
}

/// Still capture pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoConfig {
    /// Preferred output aspect ratio (width / height)
    pub target_aspect_ratio: f32,
    pub aspect_tolerance: f32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Frames per burst (1-20)
    pub burst_count: u32,
    /// Exposure compensation per HDR bracket frame
    pub hdr_brackets: Vec<i32>,
    pub raw_enabled: bool,
}

/// Multi-frame night pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightConfig {
    pub frame_count: u32,
    /// Pause between bracket frames in milliseconds
    pub frame_interval_ms: u64,
    /// Sensitivity bias used when the unit supports manual sensor control
    pub iso: u32,
    pub exposure_time_ns: u64,
}

/// Record pipeline profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    pub bitrate: u32,
    pub fps: u32,
    pub resolution: [u32; 2],
}

/// Step sizes for the parameter controllers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlsConfig {
    pub zoom_step: f32,
    /// Edge length of the tap-to-focus metering square, in sensor pixels
    pub focus_region_size: u32,
    pub exposure_step: i32,
}

/// Fallback storage locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where captures land when the media store declines them
    pub fallback_directory: PathBuf,
    pub video_directory: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                reconnect_attempts: 3,
                reconnect_delay_ms: 250,
                backoff_multiplier: 2.0,
                default_facing: LensFacing::Back,
                default_mode: CaptureMode::Photo,
            },
            photo: PhotoConfig {
                target_aspect_ratio: 4.0 / 3.0,
                aspect_tolerance: 0.02,
                jpeg_quality: 95,
                burst_count: 1,
                hdr_brackets: vec![-2, 0, 2],
                raw_enabled: false,
            },
            night: NightConfig {
                frame_count: 5,
                frame_interval_ms: 200,
                iso: 1600,
                exposure_time_ns: 100_000_000,
            },
            video: VideoConfig {
                bitrate: 10_000_000,
                fps: 30,
                resolution: [1920, 1080],
            },
            controls: ControlsConfig {
                zoom_step: 0.5,
                focus_region_size: 200,
                exposure_step: 1,
            },
            storage: StorageConfig {
                fallback_directory: PathBuf::from("./captures"),
                video_directory: PathBuf::from("./captures/video"),
            },
        }
    }
}

impl CoreConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CameraError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: CoreConfig = toml::from_str(&contents)
            .map_err(|e| CameraError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Defaults, then the TOML file (if present), then `LENSCORE__SECTION__KEY`
    /// environment overrides.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| CameraError::ConfigError(format!("Failed to seed defaults: {}", e)))?;

        let layered = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("LENSCORE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CameraError::ConfigError(format!("Failed to build config: {}", e)))?;

        layered
            .try_deserialize()
            .map_err(|e| CameraError::ConfigError(format!("Failed to deserialize config: {}", e)))
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CameraError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CameraError::ConfigError(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("lenscore.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.camera.reconnect_attempts == 0 {
            return Err("Reconnect attempts must be at least 1".to_string());
        }
        if !(1.0..=10.0).contains(&self.camera.backoff_multiplier) {
            return Err("Backoff multiplier must be between 1.0 and 10.0".to_string());
        }

        if self.photo.target_aspect_ratio <= 0.0 {
            return Err("Target aspect ratio must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.photo.aspect_tolerance) {
            return Err("Aspect tolerance must be between 0.0 and 1.0".to_string());
        }
        if self.photo.jpeg_quality == 0 || self.photo.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }
        if self.photo.burst_count == 0 || self.photo.burst_count > 20 {
            return Err("Burst count must be between 1 and 20".to_string());
        }
        if self.photo.hdr_brackets.is_empty() || self.photo.hdr_brackets.len() > 10 {
            return Err("HDR brackets must hold between 1 and 10 entries".to_string());
        }

        if self.night.frame_count == 0 || self.night.frame_count > 16 {
            return Err("Night frame count must be between 1 and 16".to_string());
        }

        if self.video.fps == 0 || self.video.fps > 240 {
            return Err("Invalid video FPS (must be 1-240)".to_string());
        }
        if self.video.resolution[0] == 0 || self.video.resolution[1] == 0 {
            return Err("Invalid video resolution".to_string());
        }

        if self.controls.zoom_step <= 0.0 {
            return Err("Zoom step must be positive".to_string());
        }
        if self.controls.focus_region_size == 0 {
            return Err("Focus region size must be positive".to_string());
        }
        if self.controls.exposure_step <= 0 {
            return Err("Exposure step must be positive".to_string());
        }

        Ok(())
    }
}
