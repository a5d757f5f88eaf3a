//! Image conversion and JPEG encoding.
//!
//! Thin wrappers around the `image` crate used by the Kinect source
//! (sample conversion, resize, false color) and by the capture loop (encode).

use crate::core::types::{scaled_dimensions, JpegFrame};
use crate::error::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Largest valid 11-bit depth sample
pub const DEPTH_MAX: u16 = 2047;

/// Encode an RGB image as baseline JPEG.
///
/// `quality` is clamped into 1..=100.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<JpegFrame> {
    let mut out = Vec::with_capacity((img.width() * img.height() / 4) as usize);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode_image(img)?;
    Ok(out.into())
}

/// Resize by a scale factor; a factor of 1.0 returns the input untouched
pub fn scale(img: RgbImage, factor: f32) -> RgbImage {
    if (factor - 1.0).abs() < f32::EPSILON {
        return img;
    }
    let (w, h) = scaled_dimensions(img.width(), img.height(), factor);
    resize(&img, w, h)
}

pub fn resize(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    imageops::resize(img, width, height, FilterType::Triangle)
}

/// Interleaved RGB8 samples to an image
pub fn rgb_from_samples(width: u32, height: u32, samples: Vec<u8>) -> Result<RgbImage> {
    let got = samples.len();
    RgbImage::from_raw(width, height, samples).ok_or_else(|| {
        Error::Codec(format!(
            "RGB buffer of {} bytes does not fit {}x{}",
            got, width, height
        ))
    })
}

/// 8-bit gray samples expanded to RGB
pub fn gray_from_samples(width: u32, height: u32, samples: &[u8]) -> Result<RgbImage> {
    let expected = (width * height) as usize;
    if samples.len() != expected {
        return Err(Error::Codec(format!(
            "Gray buffer of {} bytes, expected {}",
            samples.len(),
            expected
        )));
    }
    let rgb = samples.iter().flat_map(|&v| [v, v, v]).collect();
    rgb_from_samples(width, height, rgb)
}

/// 11-bit depth samples clamped to 0..=2047 and quantized to 8 bits
pub fn quantize_depth(samples: &[u16]) -> Vec<u8> {
    samples
        .iter()
        .map(|&d| (d.min(DEPTH_MAX) >> 3) as u8)
        .collect()
}

/// Depth samples to a false-colored image
pub fn depth_to_image(width: u32, height: u32, samples: &[u16]) -> Result<RgbImage> {
    let expected = (width * height) as usize;
    if samples.len() != expected {
        return Err(Error::Codec(format!(
            "Depth buffer of {} samples, expected {}",
            samples.len(),
            expected
        )));
    }
    let gray = quantize_depth(samples);
    Ok(false_color_map(width, height, &gray))
}

/// Map 8-bit intensities through a jet-style palette (blue → cyan → yellow → red)
pub fn false_color_map(width: u32, height: u32, gray: &[u8]) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let v = gray
            .get((y * width + x) as usize)
            .copied()
            .unwrap_or_default();
        jet(v)
    })
}

fn jet(v: u8) -> Rgb<u8> {
    let t = v as f32 / 255.0;
    let channel = |center: f32| {
        let c = (1.5 - (4.0 * t - center).abs()).clamp(0.0, 1.0);
        (c * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}
