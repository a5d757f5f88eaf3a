//! Configuration for DrishtiIO
//!
//! Loads configuration from a TOML file. Every field carries a default so a
//! partial (or empty) file is valid; command-line flags are layered on top in
//! `main`.

use crate::core::types::{PicamPreset, SourceKind, KINECT_HEIGHT, KINECT_WIDTH};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Preset used when a requested name is not in the table
pub const FALLBACK_PRESET: &str = "high";

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub streams: StreamsConfig,
    pub capture: CaptureConfig,
    pub kinect: KinectConfig,
    pub picam: PicamConfig,
    pub logging: LoggingConfig,
}

/// Listening sockets and client policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface to bind every server on
    pub bind_address: String,
    /// HTTP MJPEG/status/viewer port
    pub http_port: u16,
    /// Raw length-prefixed JPEG port
    pub tcp_port: u16,
    /// Text control protocol port
    pub control_port: u16,
    /// Idle read / stalled write timeout for client connections
    pub client_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 5600,
            tcp_port: 5601,
            control_port: 5603,
            client_timeout_secs: 30,
        }
    }
}

impl NetworkConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    /// `bind_address:port` for a server
    pub fn endpoint(&self, port: u16) -> String {
        format!("{}:{}", self.bind_address, port)
    }
}

/// Which streams exist and which server exposes them
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamsConfig {
    /// Initial source of the `main` stream (None = pick by availability)
    pub main_source: Option<SourceKind>,
    /// Initial source of the `secondary` stream
    pub secondary_source: Option<SourceKind>,
    /// Stream served by the HTTP server's default MJPEG path
    pub http_stream: String,
    /// Stream served by the raw TCP server
    pub tcp_stream: String,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            main_source: None,
            secondary_source: None,
            http_stream: "main".to_string(),
            tcp_stream: "secondary".to_string(),
        }
    }
}

/// Capture loop cadence and initial per-stream settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub target_fps: u32,
    pub jpeg_quality: u8,
    pub scale_factor: f32,
    pub picam_preset: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: 15,
            jpeg_quality: 70,
            scale_factor: 1.0,
            picam_preset: FALLBACK_PRESET.to_string(),
        }
    }
}

impl CaptureConfig {
    /// Time budget of one capture cycle
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }
}

/// Kinect capture backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KinectBackend {
    /// No device attached; probing always fails
    #[default]
    None,
    /// Generated test pattern
    Synthetic,
}

/// Kinect failure policy and native geometry
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KinectConfig {
    pub backend: KinectBackend,
    /// Consecutive failed captures before the device is marked unavailable
    pub failure_threshold: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for KinectConfig {
    fn default() -> Self {
        Self {
            backend: KinectBackend::None,
            failure_threshold: 5,
            width: KINECT_WIDTH,
            height: KINECT_HEIGHT,
        }
    }
}

/// Pi Camera subprocess settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PicamConfig {
    /// Candidate camera commands, tried in order
    pub commands: Vec<String>,
    /// Grace period between terminate and kill
    pub stop_timeout_ms: u64,
    pub presets: BTreeMap<String, PicamPreset>,
}

impl Default for PicamConfig {
    fn default() -> Self {
        let presets = [
            ("low", PicamPreset::new(640, 480, 30)),
            ("medium", PicamPreset::new(1280, 720, 24)),
            ("high", PicamPreset::new(1280, 800, 24)),
            ("full", PicamPreset::new(1920, 1080, 15)),
        ]
        .into_iter()
        .map(|(name, preset)| (name.to_string(), preset))
        .collect();

        Self {
            commands: vec!["rpicam-vid".to_string(), "libcamera-vid".to_string()],
            stop_timeout_ms: 2000,
            presets,
        }
    }
}

impl PicamConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Look up a preset, falling back to `high` for unknown names
    pub fn resolve(&self, name: &str) -> Option<(&str, PicamPreset)> {
        self.presets
            .get_key_value(name)
            .or_else(|| self.presets.get_key_value(FALLBACK_PRESET))
            .map(|(k, v)| (k.as_str(), *v))
    }

    /// Preset names joined for help/usage text
    pub fn preset_names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use drishti_io::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("drishti.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Reject settings the runtime cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.capture.target_fps == 0 {
            return Err(Error::Config("capture.target_fps must be > 0".into()));
        }
        if !self.picam.presets.contains_key(FALLBACK_PRESET) {
            return Err(Error::Config(format!(
                "picam.presets must define '{}'",
                FALLBACK_PRESET
            )));
        }
        if !self.picam.presets.contains_key(&self.capture.picam_preset) {
            return Err(Error::Config(format!(
                "Unknown picam preset '{}'",
                self.capture.picam_preset
            )));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(Error::Config(format!(
                "capture.jpeg_quality {} outside 1..=100",
                self.capture.jpeg_quality
            )));
        }
        let net = &self.network;
        let ports = [net.http_port, net.tcp_port, net.control_port];
        for (i, port) in ports.iter().enumerate() {
            if ports[i + 1..].contains(port) {
                return Err(Error::Config(format!("Port {} assigned twice", port)));
            }
        }
        Ok(())
    }
}
