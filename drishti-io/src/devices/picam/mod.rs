//! Raspberry Pi camera source
//!
//! Frames come from a long-lived camera subprocess writing MJPEG to stdout.
//! The camera is exclusive hardware: whichever [`PiCameraSource`] starts last
//! owns it, and any other running instance is stopped first. Ownership is
//! tracked by a shared [`PicamArbiter`] that holds the single live session,
//! so "stop the current owner, start me" happens under one lock.
//!
//! # Lock Order
//!
//! Arbiter lock, then the session's frame lock (inside [`reader::FrameSlot`]).
//! The reader thread only ever takes the frame lock.

pub mod process;
pub mod reader;

use crate::config::PicamConfig;
use crate::core::source::{CapturedFrame, VideoSource};
use crate::core::types::{CaptureMode, StreamSettings};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use process::{CameraProcess, ProcessLauncher};
use reader::FrameSlot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// The one live camera session, if any
struct Session {
    owner: u64,
    preset: String,
    process: Box<dyn CameraProcess>,
    slot: Arc<FrameSlot>,
    reader: Option<JoinHandle<()>>,
}

impl Session {
    fn shutdown(mut self, timeout: Duration) {
        self.slot.close();
        self.process.terminate(timeout);

        if let Some(handle) = self.reader.take() {
            let deadline = Instant::now() + timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::warn!("Pi camera reader did not exit, detaching");
            }
        }
    }
}

/// Owner registry for the physical camera
#[derive(Default)]
pub struct PicamArbiter {
    active: Mutex<Option<Session>>,
    next_id: AtomicU64,
}

impl PicamArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any instance currently holds the camera with a live process
    pub fn is_busy(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|s| s.slot.is_alive())
    }

    fn register(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// Pi camera capture via subprocess
pub struct PiCameraSource {
    id: u64,
    arbiter: Arc<PicamArbiter>,
    launcher: Arc<dyn ProcessLauncher>,
    command: Option<String>,
    config: PicamConfig,
}

impl PiCameraSource {
    /// Create an instance, probing for a usable camera command
    pub fn new(
        arbiter: Arc<PicamArbiter>,
        launcher: Arc<dyn ProcessLauncher>,
        config: PicamConfig,
    ) -> Self {
        let command = launcher.detect(&config.commands);
        match &command {
            Some(cmd) => log::info!("Pi camera command: {}", cmd),
            None => log::warn!(
                "No Pi camera command available (tried {})",
                config.commands.join(", ")
            ),
        }
        Self {
            id: arbiter.register(),
            arbiter,
            launcher,
            command,
            config,
        }
    }

    /// Whether this instance owns a live camera process
    pub fn is_running(&self) -> bool {
        self.arbiter
            .active
            .lock()
            .as_ref()
            .is_some_and(|s| s.owner == self.id && s.slot.is_alive())
    }

    /// Preset of this instance's session
    pub fn current_preset(&self) -> Option<String> {
        self.arbiter
            .active
            .lock()
            .as_ref()
            .filter(|s| s.owner == self.id)
            .map(|s| s.preset.clone())
    }

    fn launch(&self, command: &str, preset_name: &str) -> Result<Session> {
        let (name, preset) = self
            .config
            .resolve(preset_name)
            .ok_or_else(|| Error::Config("No Pi camera presets configured".into()))?;

        let mut process = self.launcher.launch(command, &preset)?;
        let Some(stdout) = process.take_stdout() else {
            process.terminate(self.config.stop_timeout());
            return Err(Error::ProcessFailure(format!("{} has no stdout", command)));
        };

        let slot = Arc::new(FrameSlot::new());
        let reader_slot = Arc::clone(&slot);
        let reader = thread::Builder::new()
            .name("picam-reader".to_string())
            .spawn(move || reader::reader_loop(stdout, reader_slot));
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                process.terminate(self.config.stop_timeout());
                return Err(Error::Thread(format!("picam-reader: {}", e)));
            }
        };

        log::info!(
            "Started Pi camera: {} @ {} {}fps ({})",
            command,
            preset.resolution(),
            preset.fps,
            name
        );

        Ok(Session {
            owner: self.id,
            preset: name.to_string(),
            process,
            slot,
            reader: Some(reader),
        })
    }
}

impl VideoSource for PiCameraSource {
    fn name(&self) -> &str {
        "picam"
    }

    /// Latest complete JPEG; mode and scale do not apply to the camera stream
    fn get_frame(&self, _mode: CaptureMode, _scale: f32) -> Option<CapturedFrame> {
        let active = self.arbiter.active.lock();
        let session = active.as_ref().filter(|s| s.owner == self.id)?;
        session.slot.latest().map(CapturedFrame::Jpeg)
    }

    fn is_available(&self) -> bool {
        self.command.is_some()
    }

    /// Start (or restart) with `settings.picam_preset`.
    ///
    /// A no-op when this instance already runs the same preset. Any other
    /// instance holding the camera is stopped first.
    fn start(&self, settings: &StreamSettings) -> bool {
        let Some(command) = self.command.as_deref() else {
            log::warn!("Cannot start Pi camera: no camera command");
            return false;
        };
        let requested = match self.config.resolve(&settings.picam_preset) {
            Some((name, _)) => name.to_string(),
            None => settings.picam_preset.clone(),
        };

        let mut active = self.arbiter.active.lock();
        if let Some(session) = active.as_ref() {
            if session.owner == self.id && session.preset == requested && session.slot.is_alive()
            {
                return true;
            }
        }

        if let Some(previous) = active.take() {
            if previous.owner != self.id {
                log::info!("Stopping Pi camera held by another instance");
            }
            previous.shutdown(self.config.stop_timeout());
        }

        match self.launch(command, &requested) {
            Ok(session) => {
                *active = Some(session);
                true
            }
            Err(e) => {
                log::warn!("Failed to start Pi camera: {}", e);
                false
            }
        }
    }

    fn stop(&self) {
        let mut active = self.arbiter.active.lock();
        if active.as_ref().is_some_and(|s| s.owner == self.id) {
            if let Some(session) = active.take() {
                session.shutdown(self.config.stop_timeout());
                log::info!("Stopped Pi camera");
            }
        }
    }
}

impl Drop for PiCameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}
