//! Stream manager and capture loop
//!
//! One dedicated `capture` thread drives every stream:
//!
//! 1. Partition streams by selected source (first-appearance order)
//! 2. Start, restart or stop the Pi camera. Its preset comes from the first
//!    stream selecting it, and it is only relaunched when that preset changes
//! 3. Capture each distinct source once, encode once, and hand the same
//!    bytes to every stream selecting it
//! 4. Sleep out the rest of the frame interval
//!
//! Hardware load therefore scales with distinct sources in use, not with
//! the number of streams or clients.

use crate::codec;
use crate::config::{AppConfig, CaptureConfig, PicamConfig};
use crate::core::source::{CapturedFrame, VideoSource};
use crate::core::types::{kinect_resolution, JpegFrame, PicamPreset, SourceKind, StreamSettings};
use crate::devices::HardwareRegistry;
use crate::error::{Error, Result};
use crate::streaming::state::{
    epoch_seconds, SettingsUpdate, StreamRegistry, StreamState, QUALITY_RANGE, SCALE_MAX,
    SCALE_MIN,
};
use crate::streaming::status::{StatusSnapshot, StreamStatus};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Back-off after a cycle with errors
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Bound on joining the capture thread at stop
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What one capture cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Sources captured this cycle, each at most once
    pub captured: Vec<SourceKind>,
    /// Stream frames published
    pub published: usize,
    /// Sources whose frame could not be encoded
    pub errors: usize,
}

/// Coordinates streams, shared hardware and the capture thread
pub struct StreamManager {
    registry: Arc<StreamRegistry>,
    hardware: Arc<HardwareRegistry>,
    capture: CaptureConfig,
    picam_config: PicamConfig,
    loop_running: AtomicBool,
    capture_thread: Mutex<Option<JoinHandle<()>>>,
    /// Preset last requested from the Pi camera (None = camera not needed)
    picam_preset: Mutex<Option<String>>,
}

impl StreamManager {
    pub fn new(
        registry: Arc<StreamRegistry>,
        hardware: Arc<HardwareRegistry>,
        config: &AppConfig,
    ) -> Self {
        Self {
            registry,
            hardware,
            capture: config.capture.clone(),
            picam_config: config.picam.clone(),
            loop_running: AtomicBool::new(false),
            capture_thread: Mutex::new(None),
            picam_preset: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn hardware(&self) -> &Arc<HardwareRegistry> {
        &self.hardware
    }

    pub fn kinect_available(&self) -> bool {
        self.hardware.kinect_available()
    }

    pub fn available_sources(&self) -> Vec<SourceKind> {
        self.hardware.available_sources()
    }

    /// Create a stream with the configured initial settings.
    ///
    /// Without an explicit source the best available one is picked
    /// (`kinect_rgb`, else `picam`); an unavailable source falls back to `picam`.
    pub fn create_stream(&self, id: &str, initial: Option<SourceKind>) -> Result<Arc<StreamState>> {
        let available = self.available_sources();
        let default = if self.kinect_available() {
            SourceKind::KinectRgb
        } else {
            SourceKind::Picam
        };
        let mut source = initial.unwrap_or(default);
        if !available.contains(&source) {
            log::warn!(
                "Requested source '{}' unavailable for stream '{}', using 'picam'",
                source,
                id
            );
            source = SourceKind::Picam;
        }

        let stream = self.registry.insert(
            id,
            StreamSettings {
                source,
                jpeg_quality: self.capture.jpeg_quality.clamp(1, 100),
                scale_factor: self.capture.scale_factor.clamp(SCALE_MIN, SCALE_MAX),
                picam_preset: self.capture.picam_preset.clone(),
            },
        )?;
        log::info!("Created stream '{}' with source {}", id, source);
        Ok(stream)
    }

    pub fn get_stream(&self, id: &str) -> Option<Arc<StreamState>> {
        self.registry.get(id)
    }

    /// Stream ids in creation order
    pub fn list_streams(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Switch a stream's source, returning a human-readable confirmation
    pub fn switch_source(&self, id: &str, source: SourceKind) -> Result<String> {
        let stream = self
            .get_stream(id)
            .ok_or_else(|| Error::StreamNotFound(id.to_string()))?;
        let available = self.available_sources();
        if !available.contains(&source) {
            let names = source_names(&available);
            return Err(Error::Protocol(if source.is_kinect() {
                format!("Kinect unavailable. Available sources: {}", names)
            } else {
                format!("Unknown source '{}'. Available: {}", source, names)
            }));
        }
        let old = stream.set_source(source);
        log::info!("Stream '{}' switched {} -> {}", id, old, source);
        Ok(format!("Switched {} from {} to {}", id, old, source))
    }

    /// [`switch_source`](Self::switch_source) for a source given by name
    pub fn switch_source_named(&self, id: &str, name: &str) -> Result<String> {
        match name.parse::<SourceKind>() {
            Ok(source) => self.switch_source(id, source),
            Err(_) => Err(Error::Protocol(format!(
                "Unknown source '{}'. Available: {}",
                name,
                source_names(&self.available_sources())
            ))),
        }
    }

    /// Parse a source name and check it can be selected now
    pub fn parse_source(&self, name: &str) -> Result<SourceKind> {
        let source: SourceKind = name.parse()?;
        if source.is_kinect() && !self.kinect_available() {
            return Err(Error::Protocol("Kinect not available".into()));
        }
        Ok(source)
    }

    /// Preset by exact name
    pub fn picam_preset(&self, name: &str) -> Option<PicamPreset> {
        self.picam_config.presets.get(name).copied()
    }

    pub fn picam_preset_names(&self) -> Vec<&str> {
        self.picam_config.preset_names()
    }

    /// Start the capture thread (no-op if already running)
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.loop_running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let manager = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || manager.capture_loop())
            .map_err(|e| {
                self.loop_running.store(false, Ordering::SeqCst);
                Error::Thread(format!("capture: {}", e))
            })?;
        *self.capture_thread.lock() = Some(handle);
        log::info!(
            "Capture loop started at {} fps",
            self.capture.target_fps
        );
        Ok(())
    }

    /// Stop the capture thread and release hardware
    pub fn stop(&self) {
        self.loop_running.store(false, Ordering::SeqCst);
        self.registry.shutdown();

        if let Some(handle) = self.capture_thread.lock().take() {
            let deadline = Instant::now() + JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    log::error!("Capture thread panicked");
                }
            } else {
                log::warn!("Capture thread did not exit within {:?}", JOIN_TIMEOUT);
            }
        }

        *self.picam_preset.lock() = None;
        self.hardware.shutdown();
        log::info!("Capture loop stopped");
    }

    pub fn is_running(&self) -> bool {
        self.loop_running.load(Ordering::SeqCst)
    }

    fn capture_loop(&self) {
        let interval = self.capture.frame_interval();
        while self.loop_running.load(Ordering::Relaxed) && self.registry.is_running() {
            let started = Instant::now();
            let report = self.run_cycle();
            if report.errors > 0 {
                thread::sleep(ERROR_BACKOFF);
                continue;
            }
            if let Some(rest) = interval.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
        log::debug!("Capture loop exiting");
    }

    /// Run one capture cycle
    pub fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        // Partition by source, keeping each group's first stream settings
        let mut groups: Vec<(SourceKind, StreamSettings, Vec<Arc<StreamState>>)> = Vec::new();
        for stream in self.registry.all() {
            let settings = stream.settings();
            match groups.iter_mut().find(|(kind, _, _)| *kind == settings.source) {
                Some((_, _, members)) => members.push(stream),
                None => groups.push((settings.source, settings, vec![stream])),
            }
        }

        let picam_settings = groups
            .iter()
            .find(|(kind, _, _)| *kind == SourceKind::Picam)
            .map(|(_, settings, _)| settings);
        self.sync_picam(picam_settings);

        for (kind, settings, members) in &groups {
            let Some(jpeg) = self.capture_source(*kind, settings, &mut report) else {
                continue;
            };
            for stream in members {
                stream.set_frame(Arc::clone(&jpeg));
                report.published += 1;
            }
        }

        report
    }

    fn capture_source(
        &self,
        kind: SourceKind,
        settings: &StreamSettings,
        report: &mut CycleReport,
    ) -> Option<JpegFrame> {
        let source = self.hardware.source_for(kind);
        report.captured.push(kind);
        match source.get_frame(kind.capture_mode(), settings.scale_factor)? {
            CapturedFrame::Jpeg(bytes) => Some(bytes),
            CapturedFrame::Raw(img) => match codec::encode_jpeg(&img, settings.jpeg_quality) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    log::warn!("Failed to encode {} frame: {}", kind, e);
                    report.errors += 1;
                    None
                }
            },
        }
    }

    /// Keep the Pi camera in line with the first stream that selects it
    fn sync_picam(&self, first: Option<&StreamSettings>) {
        let picam = self.hardware.picam();
        let mut active = self.picam_preset.lock();
        match first {
            Some(settings) => {
                if active.as_deref() != Some(settings.picam_preset.as_str()) {
                    if !picam.start(settings) {
                        log::warn!("Pi camera did not start ({})", settings.picam_preset);
                    }
                    *active = Some(settings.picam_preset.clone());
                }
            }
            None => {
                if active.take().is_some() {
                    picam.stop();
                }
            }
        }
    }

    /// Snapshot of every stream for status endpoints
    pub fn status(&self) -> StatusSnapshot {
        let streams = self
            .registry
            .all()
            .into_iter()
            .map(|stream| {
                let status = self.stream_status(&stream);
                (status.stream_id.clone(), status)
            })
            .collect::<BTreeMap<_, _>>();

        StatusSnapshot {
            running: self.is_running(),
            kinect_available: self.kinect_available(),
            available_sources: self.available_sources(),
            streams,
        }
    }

    pub fn stream_status(&self, stream: &StreamState) -> StreamStatus {
        let (settings, stats, last_frame) = stream.snapshot();
        StreamStatus {
            stream_id: stream.id().to_string(),
            source: settings.source,
            jpeg_quality: settings.jpeg_quality,
            scale_factor: settings.scale_factor,
            resolution: self.resolution(&settings),
            picam_preset: settings.picam_preset,
            frames_captured: stats.frames_captured,
            frames_sent: stats.frames_sent,
            clients_connected: stats.clients_connected,
            source_switches: stats.source_switches,
            last_frame_time: epoch_seconds(last_frame),
        }
    }

    /// Kinect output resolution at `scale`, from the device's configured geometry
    pub fn kinect_resolution(&self, scale: f32) -> String {
        let (width, height) = self.hardware.kinect().dimensions();
        kinect_resolution(width, height, scale)
    }

    /// Output resolution a stream's settings produce
    pub fn resolution(&self, settings: &StreamSettings) -> String {
        if settings.source.is_kinect() {
            self.kinect_resolution(settings.scale_factor)
        } else {
            self.picam_config
                .resolve(&settings.picam_preset)
                .map_or_else(|| "unknown".to_string(), |(_, p)| p.resolution())
        }
    }
}

/// Validate a quality value without clamping
pub fn parse_quality(value: &str) -> Result<u8> {
    match value.trim().parse::<i64>() {
        Ok(q) if QUALITY_RANGE.contains(&q) => Ok(q as u8),
        Ok(_) => Err(Error::Protocol("quality must be 1-100".into())),
        Err(_) => Err(Error::Protocol("quality must be a number 1-100".into())),
    }
}

/// Validate a scale factor without clamping
pub fn parse_scale(value: &str) -> Result<f32> {
    match value.trim().parse::<f32>() {
        Ok(s) if (SCALE_MIN..=SCALE_MAX).contains(&s) => Ok(s),
        Ok(_) => Err(Error::Protocol("scale must be 0.25-2.0".into())),
        Err(_) => Err(Error::Protocol("scale must be a number 0.25-2.0".into())),
    }
}

/// Apply a validated quality to a stream
pub fn set_quality(stream: &StreamState, quality: u8) {
    stream.update_settings(SettingsUpdate {
        jpeg_quality: Some(quality as i64),
        ..Default::default()
    });
}

/// Apply a validated scale to a stream
pub fn set_scale(stream: &StreamState, scale: f32) {
    stream.update_settings(SettingsUpdate {
        scale_factor: Some(scale),
        ..Default::default()
    });
}

/// Apply a validated preset name to a stream
pub fn set_preset(stream: &StreamState, preset: &str) {
    stream.update_settings(SettingsUpdate {
        picam_preset: Some(preset.to_string()),
        ..Default::default()
    });
}

/// Source names joined with ", "
pub fn source_names(sources: &[SourceKind]) -> String {
    sources
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
