//! Kinect capture source
//!
//! The Kinect exposes one logical session shared by the RGB, IR and depth
//! modes. Raw sample arrays come from a [`KinectDevice`] and are converted,
//! scaled and false-colored here.
//!
//! # Failure Policy
//!
//! Every failed capture increments a counter and every success resets it.
//! When the counter reaches the configured threshold (5 by default) the source
//! is marked unavailable and stops touching the device. Only [`KinectSource::probe`]
//! brings it back; there is no background retry. Streams that select a Kinect
//! mode while it is unavailable simply get no frame.

pub mod synthetic;

use crate::codec;
use crate::config::KinectConfig;
use crate::core::source::{CapturedFrame, VideoSource};
use crate::core::types::{CaptureMode, StreamSettings};
use crate::error::{Error, Result};
use image::RgbImage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Raw sample access to a Kinect-like device
///
/// Each call captures one frame. `None` means the device produced nothing.
pub trait KinectDevice: Send {
    /// Interleaved RGB8, `width * height * 3` bytes
    fn get_rgb(&mut self) -> Option<Vec<u8>>;
    /// 8-bit infrared, `width * height` bytes
    fn get_ir(&mut self) -> Option<Vec<u8>>;
    /// 11-bit depth, `width * height` samples
    fn get_depth(&mut self) -> Option<Vec<u16>>;

    /// Release the device. A later capture may open it again.
    fn stop(&mut self) {}
}

/// Placeholder used when no Kinect backend is configured
pub struct NoDevice;

impl KinectDevice for NoDevice {
    fn get_rgb(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn get_ir(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn get_depth(&mut self) -> Option<Vec<u16>> {
        None
    }
}

/// Kinect source with failure-threshold availability tracking
pub struct KinectSource {
    device: Mutex<Box<dyn KinectDevice>>,
    available: AtomicBool,
    failures: AtomicU32,
    threshold: u32,
    width: u32,
    height: u32,
}

impl KinectSource {
    /// Wrap a device. The source starts unavailable until [`probe`](Self::probe) succeeds.
    pub fn new(device: Box<dyn KinectDevice>, config: &KinectConfig) -> Self {
        Self {
            device: Mutex::new(device),
            available: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            threshold: config.failure_threshold.max(1),
            width: config.width,
            height: config.height,
        }
    }

    /// Perform one RGB capture and set availability from the result
    pub fn probe(&self) -> bool {
        let ok = self.capture(CaptureMode::Rgb).is_ok();
        self.failures.store(0, Ordering::SeqCst);
        self.available.store(ok, Ordering::SeqCst);
        if ok {
            log::info!("Kinect detected ({}x{})", self.width, self.height);
        } else {
            log::warn!("Kinect not available");
        }
        ok
    }

    /// Native frame size delivered by the device
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Consecutive failed captures since the last success or probe
    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    fn capture(&self, mode: CaptureMode) -> Result<RgbImage> {
        let (w, h) = (self.width, self.height);
        let mut device = self.device.lock();
        let missing = || Error::HardwareUnavailable(format!("Kinect returned no {:?} frame", mode));
        match mode {
            CaptureMode::Rgb => {
                let samples = device.get_rgb().ok_or_else(missing)?;
                codec::rgb_from_samples(w, h, samples)
            }
            CaptureMode::Ir => {
                let samples = device.get_ir().ok_or_else(missing)?;
                codec::gray_from_samples(w, h, &samples)
            }
            CaptureMode::Depth => {
                let samples = device.get_depth().ok_or_else(missing)?;
                codec::depth_to_image(w, h, &samples)
            }
            CaptureMode::Native => Err(Error::HardwareUnavailable(
                "Kinect has no native encoded mode".into(),
            )),
        }
    }

    fn record_failure(&self, err: &Error) {
        let count = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("Kinect capture failed ({}/{}): {}", count, self.threshold, err);
        if count >= self.threshold && self.available.swap(false, Ordering::SeqCst) {
            log::warn!(
                "Kinect marked unavailable after {} consecutive failures",
                count
            );
        }
    }
}

impl VideoSource for KinectSource {
    fn name(&self) -> &str {
        "kinect"
    }

    fn get_frame(&self, mode: CaptureMode, scale: f32) -> Option<CapturedFrame> {
        if !self.is_available() {
            return None;
        }
        match self.capture(mode) {
            Ok(img) => {
                self.failures.store(0, Ordering::SeqCst);
                Some(CapturedFrame::Raw(codec::scale(img, scale)))
            }
            Err(e) => {
                self.record_failure(&e);
                None
            }
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn start(&self, _settings: &StreamSettings) -> bool {
        self.is_available()
    }

    fn stop(&self) {
        self.device.lock().stop();
        log::debug!("Kinect released");
    }
}
