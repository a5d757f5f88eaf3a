//! Per-stream state and the stream registry
//!
//! A [`StreamState`] is written by one producer (the capture loop) and read
//! by any number of consumer connections. Consumers wait on a condition
//! variable for the frame sequence to move past the last one they saw:
//!
//! ```text
//! capture thread ──set_frame──▶ [Mutex<StreamInner> + Condvar] ──get_frame──▶ N client threads
//! ```
//!
//! Each stream has its own mutex and condvar; nothing ever holds two stream
//! locks at once.

use crate::core::types::{JpegFrame, SourceKind, StreamSettings};
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Valid JPEG quality range
pub const QUALITY_RANGE: std::ops::RangeInclusive<i64> = 1..=100;

/// Valid scale factor range
pub const SCALE_MIN: f32 = 0.25;
pub const SCALE_MAX: f32 = 2.0;

/// Observability counters for one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub clients_connected: u32,
    pub source_switches: u64,
}

/// Partial settings change; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub jpeg_quality: Option<i64>,
    pub scale_factor: Option<f32>,
    pub picam_preset: Option<String>,
}

struct StreamInner {
    settings: StreamSettings,
    frame: Option<JpegFrame>,
    sequence: u64,
    last_frame_time: Option<SystemTime>,
    stats: StreamStats,
}

/// One named output stream
pub struct StreamState {
    id: String,
    inner: Mutex<StreamInner>,
    frame_ready: Condvar,
    running: Arc<AtomicBool>,
}

impl StreamState {
    fn new(id: String, settings: StreamSettings, running: Arc<AtomicBool>) -> Self {
        Self {
            id,
            inner: Mutex::new(StreamInner {
                settings,
                frame: None,
                sequence: 0,
                last_frame_time: None,
                stats: StreamStats::default(),
            }),
            frame_ready: Condvar::new(),
            running,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publish a new frame and wake every waiting consumer
    pub fn set_frame(&self, frame: JpegFrame) {
        {
            let mut inner = self.inner.lock();
            inner.frame = Some(frame);
            inner.sequence += 1;
            inner.stats.frames_captured += 1;
            inner.last_frame_time = Some(SystemTime::now());
        }
        self.frame_ready.notify_all();
    }

    /// Wait for a frame newer than `last_sequence`.
    ///
    /// Returns `(Some(frame), sequence)` as soon as one is available, or
    /// `(None, last_sequence)` on timeout or shutdown.
    pub fn get_frame(&self, last_sequence: u64, timeout: Duration) -> (Option<JpegFrame>, u64) {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return (None, last_sequence);
            }
            if inner.sequence > last_sequence {
                return (inner.frame.clone(), inner.sequence);
            }
            if self.frame_ready.wait_until(&mut inner, deadline).timed_out() {
                if inner.sequence > last_sequence && self.running.load(Ordering::SeqCst) {
                    return (inner.frame.clone(), inner.sequence);
                }
                return (None, last_sequence);
            }
        }
    }

    /// Latest frame sequence
    pub fn sequence(&self) -> u64 {
        self.inner.lock().sequence
    }

    /// Select a new source, returning the previous one
    pub fn set_source(&self, source: SourceKind) -> SourceKind {
        let mut inner = self.inner.lock();
        let old = std::mem::replace(&mut inner.settings.source, source);
        inner.stats.source_switches += 1;
        old
    }

    /// Apply a partial update, clamping quality to 1..=100 and scale to 0.25..=2.0
    pub fn update_settings(&self, update: SettingsUpdate) {
        let mut inner = self.inner.lock();
        if let Some(q) = update.jpeg_quality {
            inner.settings.jpeg_quality = q.clamp(*QUALITY_RANGE.start(), *QUALITY_RANGE.end()) as u8;
        }
        if let Some(s) = update.scale_factor {
            if s.is_finite() {
                inner.settings.scale_factor = s.clamp(SCALE_MIN, SCALE_MAX);
            }
        }
        if let Some(p) = update.picam_preset {
            inner.settings.picam_preset = p;
        }
    }

    pub fn settings(&self) -> StreamSettings {
        self.inner.lock().settings.clone()
    }

    pub fn source(&self) -> SourceKind {
        self.inner.lock().settings.source
    }

    pub fn stats(&self) -> StreamStats {
        self.inner.lock().stats
    }

    /// Settings and counters read under one lock
    pub fn snapshot(&self) -> (StreamSettings, StreamStats, Option<SystemTime>) {
        let inner = self.inner.lock();
        (inner.settings.clone(), inner.stats, inner.last_frame_time)
    }

    /// Seconds since the UNIX epoch of the last frame (0 when none)
    pub fn last_frame_time(&self) -> f64 {
        epoch_seconds(self.inner.lock().last_frame_time)
    }

    pub fn increment_clients(&self) {
        self.inner.lock().stats.clients_connected += 1;
    }

    pub fn decrement_clients(&self) {
        let mut inner = self.inner.lock();
        inner.stats.clients_connected = inner.stats.clients_connected.saturating_sub(1);
    }

    pub fn increment_frames_sent(&self) {
        self.inner.lock().stats.frames_sent += 1;
    }

    /// Wake every waiter (used on shutdown)
    fn wake_all(&self) {
        let _guard = self.inner.lock();
        self.frame_ready.notify_all();
    }
}

pub(crate) fn epoch_seconds(time: Option<SystemTime>) -> f64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Client connection bookkeeping; decrements the stream's client count on drop
pub struct ClientGuard {
    stream: Arc<StreamState>,
}

impl ClientGuard {
    pub fn new(stream: Arc<StreamState>) -> Self {
        stream.increment_clients();
        Self { stream }
    }

    pub fn stream(&self) -> &Arc<StreamState> {
        &self.stream
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.stream.decrement_clients();
    }
}

/// Named streams plus the process-wide running flag
///
/// Streams keep insertion order: the first stream is the default for
/// protocol requests that do not name one.
pub struct StreamRegistry {
    streams: RwLock<Vec<Arc<StreamState>>>,
    running: Arc<AtomicBool>,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(Vec::new()),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Register a stream; ids must be unique
    pub fn insert(&self, id: &str, settings: StreamSettings) -> Result<Arc<StreamState>> {
        let mut streams = self.streams.write();
        if streams.iter().any(|s| s.id == id) {
            return Err(Error::StreamExists(id.to_string()));
        }
        let stream = Arc::new(StreamState::new(
            id.to_string(),
            settings,
            Arc::clone(&self.running),
        ));
        streams.push(Arc::clone(&stream));
        Ok(stream)
    }

    pub fn get(&self, id: &str) -> Option<Arc<StreamState>> {
        self.streams.read().iter().find(|s| s.id == id).cloned()
    }

    /// Stream ids in creation order
    pub fn ids(&self) -> Vec<String> {
        self.streams.read().iter().map(|s| s.id.clone()).collect()
    }

    pub fn all(&self) -> Vec<Arc<StreamState>> {
        self.streams.read().clone()
    }

    /// First created stream
    pub fn first(&self) -> Option<Arc<StreamState>> {
        self.streams.read().first().cloned()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared flag observed by every loop in the process
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Clear the running flag and wake every blocked consumer
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::info!("Shutdown requested");
        }
        for stream in self.streams.read().iter() {
            stream.wake_all();
        }
    }
}
