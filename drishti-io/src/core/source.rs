//! VideoSource trait definition

use crate::core::types::{CaptureMode, JpegFrame, StreamSettings};
use image::RgbImage;

/// One frame produced by a source
#[derive(Debug, Clone)]
pub enum CapturedFrame {
    /// Decoded pixels (already scaled) that still need JPEG encoding
    Raw(RgbImage),
    /// Bytes already JPEG-encoded by the device
    Jpeg(JpegFrame),
}

impl CapturedFrame {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            CapturedFrame::Raw(img) => Some(img.dimensions()),
            CapturedFrame::Jpeg(_) => None,
        }
    }
}

/// Capture backend shared by every stream that selects it.
///
/// Implementations own their hardware access and failure policy. A failed or
/// unavailable capture is reported as `None`, never as a panic or error, so
/// the capture loop degrades to "no frame this cycle".
pub trait VideoSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Capture a single frame in `mode`, scaled by `scale`
    fn get_frame(&self, mode: CaptureMode, scale: f32) -> Option<CapturedFrame>;

    /// Whether the source can currently produce frames
    fn is_available(&self) -> bool;

    /// Prepare the hardware for the given settings.
    ///
    /// Returns `false` when the source could not be started.
    fn start(&self, settings: &StreamSettings) -> bool;

    /// Release the hardware
    fn stop(&self);
}
