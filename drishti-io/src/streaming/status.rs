//! Status snapshot served as JSON by the HTTP `/status` endpoint, the raw
//! TCP `0x01` command and (as text) by the control protocol.

use crate::core::types::SourceKind;
use serde::Serialize;
use std::collections::BTreeMap;

/// Whole-server status
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub kinect_available: bool,
    pub available_sources: Vec<SourceKind>,
    pub streams: BTreeMap<String, StreamStatus>,
}

/// One stream's settings, derived resolution and counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub stream_id: String,
    pub source: SourceKind,
    pub jpeg_quality: u8,
    pub scale_factor: f32,
    pub picam_preset: String,
    pub resolution: String,
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub clients_connected: u32,
    pub source_switches: u64,
    pub last_frame_time: f64,
}

impl StatusSnapshot {
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
