//! Core data types shared by sources, streams and servers.
//!
//! - [`SourceKind`]: Logical video origin a stream can select
//! - [`CaptureMode`]: Sensor mode requested from a capture device
//! - [`PicamPreset`]: Named Pi Camera resolution/framerate
//! - [`JpegFrame`]: Encoded frame shared between every stream fed by one capture

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Error;

/// Encoded JPEG bytes.
///
/// Reference counted so every stream selecting the same source holds the
/// identical buffer from one capture cycle.
pub type JpegFrame = Arc<[u8]>;

/// Kinect native frame width (fixed by the sync capture API)
pub const KINECT_WIDTH: u32 = 640;

/// Kinect native frame height
pub const KINECT_HEIGHT: u32 = 480;

/// Video sources a stream may select
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum SourceKind {
    /// Kinect color camera
    KinectRgb,
    /// Kinect infrared camera
    KinectIr,
    /// Kinect depth camera, false-colored
    KinectDepth,
    /// Raspberry Pi camera (MJPEG subprocess)
    Picam,
}

impl SourceKind {
    /// Every source in display order
    pub const ALL: [SourceKind; 4] = [
        SourceKind::KinectRgb,
        SourceKind::KinectIr,
        SourceKind::KinectDepth,
        SourceKind::Picam,
    ];

    /// Wire/config name of the source
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::KinectRgb => "kinect_rgb",
            SourceKind::KinectIr => "kinect_ir",
            SourceKind::KinectDepth => "kinect_depth",
            SourceKind::Picam => "picam",
        }
    }

    /// Whether the source is served by the Kinect
    pub fn is_kinect(self) -> bool {
        !matches!(self, SourceKind::Picam)
    }

    /// Capture mode requested from the device backing this source
    pub fn capture_mode(self) -> CaptureMode {
        match self {
            SourceKind::KinectRgb => CaptureMode::Rgb,
            SourceKind::KinectIr => CaptureMode::Ir,
            SourceKind::KinectDepth => CaptureMode::Depth,
            SourceKind::Picam => CaptureMode::Native,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::Protocol(format!("Unknown source '{}'", s)))
    }
}

/// Sensor mode requested from a capture device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureMode {
    /// Color image
    Rgb,
    /// 8-bit infrared image
    Ir,
    /// 11-bit depth samples
    Depth,
    /// Whatever the device natively emits (Pi Camera MJPEG)
    Native,
}

/// Pi Camera resolution/framerate preset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PicamPreset {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl PicamPreset {
    pub const fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    /// Resolution formatted as `WxH`
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Snapshot of a stream's configurable settings
#[derive(Clone, Debug, PartialEq)]
pub struct StreamSettings {
    pub source: SourceKind,
    pub jpeg_quality: u8,
    pub scale_factor: f32,
    pub picam_preset: String,
}

/// Kinect output resolution for native dimensions and a scale factor, formatted as `WxH`
pub fn kinect_resolution(width: u32, height: u32, scale: f32) -> String {
    let (w, h) = scaled_dimensions(width, height, scale);
    format!("{}x{}", w, h)
}

/// Scale native dimensions, truncating toward zero and never below one pixel
pub fn scaled_dimensions(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let w = (width as f32 * scale) as u32;
    let h = (height as f32 * scale) as u32;
    (w.max(1), h.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_names_round_trip() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("webcam".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_kinect_resolution_truncates() {
        assert_eq!(kinect_resolution(KINECT_WIDTH, KINECT_HEIGHT, 1.0), "640x480");
        assert_eq!(kinect_resolution(KINECT_WIDTH, KINECT_HEIGHT, 0.5), "320x240");
        assert_eq!(kinect_resolution(KINECT_WIDTH, KINECT_HEIGHT, 0.33), "211x158");
        assert_eq!(kinect_resolution(320, 240, 0.5), "160x120");
    }
}
