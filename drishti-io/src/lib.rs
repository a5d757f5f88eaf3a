//! DrishtiIO - Multi-stream video multiplexer
//!
//! Captures frames from a Kinect (RGB, IR, depth) and a Raspberry Pi camera
//! and distributes them to independently configurable named streams, each
//! exposed over HTTP MJPEG, raw length-prefixed TCP, or controlled through a
//! line-oriented text protocol.
//!
//! ## Layout
//!
//! - [`core`]: Source trait and shared types
//! - [`devices`]: Kinect and Pi camera sources, hardware registry
//! - [`codec`]: JPEG encoding, resize, false color
//! - [`streaming`]: Per-stream state, registry, capture loop
//! - [`servers`]: HTTP, raw TCP and control servers plus orchestration

pub mod codec;
pub mod config;
pub mod core;
pub mod devices;
pub mod error;
pub mod servers;
pub mod streaming;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
