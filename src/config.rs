use crate::classifier::validate_threshold;
use crate::error::{EngineError, Result};
use crate::frame::{EncodedFormat, PixelFormat};
use crate::pipeline::{PreprocessingPipeline, PreprocessingStep};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub storage: StorageConfig,

    /// Modbus TCP endpoint used to signal verdicts; disabled when absent
    #[serde(default)]
    pub fieldbus: Option<FieldbusConfig>,

    /// Inspected cameras, in display order
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,

    /// Steps shared by every camera, applied to both standard and live frames
    #[serde(default)]
    pub preprocessing: Vec<PreprocessingStep>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Delay between comparison cycles in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Luminance difference that marks a pixel in the highlight overlay
    #[serde(default = "default_highlight_threshold")]
    pub highlight_threshold: u8,

    /// Produce a highlight overlay on every comparison
    #[serde(default = "default_highlight")]
    pub highlight: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    /// Directory for captured and highlighted images
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Encoding of stored images
    #[serde(default = "default_image_format")]
    pub format: EncodedFormat,

    /// JPEG quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Store the overlay of every anomalous frame
    #[serde(default = "default_save_anomalies")]
    pub save_anomalies: bool,

    /// Store the overlay of every compared frame
    #[serde(default = "default_save_all")]
    pub save_all: bool,

    /// Write a JSON sidecar next to each stored image
    #[serde(default = "default_save_metadata")]
    pub save_metadata: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FieldbusConfig {
    /// host:port of the controller
    pub address: String,

    /// Modbus unit identifier
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect and response timeout in milliseconds
    #[serde(default = "default_fieldbus_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Camera identity
    pub index: u32,

    #[serde(default)]
    pub description: Option<String>,

    /// MSE at or above which a frame is an anomaly
    #[serde(default = "default_camera_threshold")]
    pub threshold: f64,

    /// Path of the standard (reference) image
    #[serde(default)]
    pub standard_image: Option<String>,

    /// Path of the image file the acquisition process keeps current
    #[serde(default)]
    pub source: Option<String>,

    /// Holding register receiving 1 on anomaly and 0 on normal
    #[serde(default)]
    pub signal_register: Option<u16>,
}

impl AppConfig {
    /// Load configuration from the default file plus environment variables
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from_file("inspector.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Self::builder_with_defaults()?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("INSPECTOR")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;

        info!(
            "Configuration loaded: {} camera(s), {} preprocessing step(s)",
            config.cameras.len(),
            config.preprocessing.len()
        );
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Parse a TOML document, filling defaults
    pub fn from_toml_str(text: &str) -> std::result::Result<Self, ConfigError> {
        Self::builder_with_defaults()?
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn builder_with_defaults(
    ) -> std::result::Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("monitor.interval_ms", default_interval_ms() as i64)?
            .set_default(
                "monitor.highlight_threshold",
                default_highlight_threshold() as i64,
            )?
            .set_default("monitor.highlight", default_highlight())?
            .set_default("storage.path", default_storage_path())?
            .set_default("storage.format", "jpeg")?
            .set_default("storage.jpeg_quality", default_jpeg_quality() as i64)?
            .set_default("storage.save_anomalies", default_save_anomalies())?
            .set_default("storage.save_all", default_save_all())?
            .set_default("storage.save_metadata", default_save_metadata())
    }

    /// Write the configuration as TOML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), text)?;
        info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Eager validation of every value the engine would otherwise reject per frame
    pub fn validate(&self) -> std::result::Result<(), EngineError> {
        if self.monitor.interval_ms == 0 {
            return Err(EngineError::invalid_configuration(
                "monitor interval_ms must be greater than 0",
            ));
        }

        if self.storage.jpeg_quality == 0 || self.storage.jpeg_quality > 100 {
            return Err(EngineError::invalid_configuration(
                "storage jpeg_quality must be between 1 and 100",
            ));
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if !seen.insert(camera.index) {
                return Err(EngineError::invalid_configuration(format!(
                    "camera index {} is configured twice",
                    camera.index
                )));
            }
            validate_threshold(camera.threshold).map_err(|_| {
                EngineError::invalid_configuration(format!(
                    "camera {} threshold must be finite and non-negative, got {}",
                    camera.index, camera.threshold
                ))
            })?;
        }

        // Frames are decoded as BGR, so the chain has to accept that layout
        self.pipeline()?.output_format(PixelFormat::Bgr24)?;
        Ok(())
    }

    /// Build the validated preprocessing pipeline
    pub fn pipeline(&self) -> std::result::Result<PreprocessingPipeline, EngineError> {
        PreprocessingPipeline::new(self.preprocessing.clone())
    }

    pub fn camera(&self, index: u32) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.index == index)
    }

    pub fn camera_mut(&mut self, index: u32) -> Option<&mut CameraConfig> {
        self.cameras.iter_mut().find(|c| c.index == index)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig {
                interval_ms: default_interval_ms(),
                highlight_threshold: default_highlight_threshold(),
                highlight: default_highlight(),
            },
            storage: StorageConfig {
                path: default_storage_path(),
                format: default_image_format(),
                jpeg_quality: default_jpeg_quality(),
                save_anomalies: default_save_anomalies(),
                save_all: default_save_all(),
                save_metadata: default_save_metadata(),
            },
            fieldbus: None,
            cameras: Vec::new(),
            preprocessing: Vec::new(),
        }
    }
}

impl CameraConfig {
    pub fn new(index: u32, threshold: f64) -> Self {
        Self {
            index,
            description: None,
            threshold,
            standard_image: None,
            source: None,
            signal_register: None,
        }
    }
}

// Default value functions
fn default_interval_ms() -> u64 {
    100
}
fn default_highlight_threshold() -> u8 {
    30
}
fn default_highlight() -> bool {
    true
}

fn default_storage_path() -> String {
    "./captures".to_string()
}
fn default_image_format() -> EncodedFormat {
    EncodedFormat::Jpeg
}
fn default_jpeg_quality() -> u8 {
    90
}
fn default_save_anomalies() -> bool {
    true
}
fn default_save_all() -> bool {
    false
}
fn default_save_metadata() -> bool {
    true
}

fn default_unit_id() -> u8 {
    1
}
fn default_fieldbus_timeout_ms() -> u64 {
    2000
}

fn default_camera_threshold() -> f64 {
    100.0
}
