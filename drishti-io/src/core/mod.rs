//! Core abstractions for video sources.
//!
//! - [`source::VideoSource`]: Trait every capture backend implements
//! - [`types`]: Source names, presets, settings and frame payloads

pub mod source;
pub mod types;
