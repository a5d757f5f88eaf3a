//! Shared fakes for integration tests

#![allow(dead_code)]

use drishti_io::config::AppConfig;
use drishti_io::core::types::PicamPreset;
use drishti_io::devices::kinect::KinectDevice;
use drishti_io::devices::picam::process::{CameraProcess, ProcessLauncher};
use drishti_io::devices::HardwareRegistry;
use drishti_io::error::Result;
use drishti_io::streaming::{StreamManager, StreamRegistry};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 6;

/// Per-mode capture counters and a failure switch shared with a [`FakeKinect`]
#[derive(Default)]
pub struct KinectProbe {
    pub rgb: AtomicUsize,
    pub ir: AtomicUsize,
    pub depth: AtomicUsize,
    pub failing: AtomicBool,
}

impl KinectProbe {
    pub fn total(&self) -> usize {
        self.rgb.load(Ordering::SeqCst)
            + self.ir.load(Ordering::SeqCst)
            + self.depth.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.rgb.store(0, Ordering::SeqCst);
        self.ir.store(0, Ordering::SeqCst);
        self.depth.store(0, Ordering::SeqCst);
    }
}

/// Tiny Kinect producing a changing gradient
pub struct FakeKinect {
    probe: Arc<KinectProbe>,
    tick: u8,
}

impl FakeKinect {
    pub fn new(probe: Arc<KinectProbe>) -> Self {
        Self { probe, tick: 0 }
    }

    fn next(&mut self) -> u8 {
        self.tick = self.tick.wrapping_add(17);
        self.tick
    }
}

impl KinectDevice for FakeKinect {
    fn get_rgb(&mut self) -> Option<Vec<u8>> {
        self.probe.rgb.fetch_add(1, Ordering::SeqCst);
        if self.probe.failing.load(Ordering::SeqCst) {
            return None;
        }
        let t = self.next();
        Some((0..WIDTH * HEIGHT * 3).map(|i| (i as u8).wrapping_add(t)).collect())
    }

    fn get_ir(&mut self) -> Option<Vec<u8>> {
        self.probe.ir.fetch_add(1, Ordering::SeqCst);
        if self.probe.failing.load(Ordering::SeqCst) {
            return None;
        }
        let t = self.next();
        Some((0..WIDTH * HEIGHT).map(|i| (i as u8).wrapping_mul(t)).collect())
    }

    fn get_depth(&mut self) -> Option<Vec<u16>> {
        self.probe.depth.fetch_add(1, Ordering::SeqCst);
        if self.probe.failing.load(Ordering::SeqCst) {
            return None;
        }
        Some((0..WIDTH * HEIGHT).map(|i| (i * 40) as u16).collect())
    }
}

/// Process counters shared with a [`FakeLauncher`]
#[derive(Default)]
pub struct LaunchStats {
    pub spawned: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub last_width: AtomicUsize,
}

impl LaunchStats {
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

/// Launcher whose "processes" are in-process MJPEG producers
pub struct FakeLauncher {
    pub stats: Arc<LaunchStats>,
}

impl FakeLauncher {
    pub fn new() -> (Arc<Self>, Arc<LaunchStats>) {
        let stats = Arc::new(LaunchStats::default());
        (
            Arc::new(Self {
                stats: Arc::clone(&stats),
            }),
            stats,
        )
    }
}

impl ProcessLauncher for FakeLauncher {
    fn detect(&self, candidates: &[String]) -> Option<String> {
        candidates.first().cloned().or_else(|| Some("fake-cam".into()))
    }

    fn launch(&self, _command: &str, preset: &PicamPreset) -> Result<Box<dyn CameraProcess>> {
        self.stats.spawned.fetch_add(1, Ordering::SeqCst);
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_live.fetch_max(live, Ordering::SeqCst);
        self.stats
            .last_width
            .store(preset.width as usize, Ordering::SeqCst);

        let stopped = Arc::new(AtomicBool::new(false));
        Ok(Box::new(FakeProcess {
            stats: Arc::clone(&self.stats),
            stopped: Arc::clone(&stopped),
            stdout: Some(Box::new(FakeMjpeg {
                stopped,
                counter: 0,
                pending: Vec::new(),
            })),
            terminated: false,
        }))
    }
}

struct FakeProcess {
    stats: Arc<LaunchStats>,
    stopped: Arc<AtomicBool>,
    stdout: Option<Box<dyn Read + Send>>,
    terminated: bool,
}

impl CameraProcess for FakeProcess {
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stdout.take()
    }

    fn terminate(&mut self, _timeout: Duration) {
        if !self.terminated {
            self.terminated = true;
            self.stopped.store(true, Ordering::SeqCst);
            self.stats.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.terminate(Duration::ZERO);
    }
}

/// Emits `FF D8 <n> FF D9` every few milliseconds until stopped
struct FakeMjpeg {
    stopped: Arc<AtomicBool>,
    counter: u8,
    pending: Vec<u8>,
}

impl Read for FakeMjpeg {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            if self.stopped.load(Ordering::SeqCst) {
                return Ok(0);
            }
            thread::sleep(Duration::from_millis(5));
            self.counter = self.counter.wrapping_add(1) % 0xF0;
            self.pending = vec![0xFF, 0xD8, self.counter, 0xFF, 0xD9];
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Config sized for the fake devices
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.kinect.width = WIDTH;
    config.kinect.height = HEIGHT;
    config.kinect.failure_threshold = 3;
    config.picam.commands = vec!["fake-cam".into()];
    config.picam.stop_timeout_ms = 200;
    config.capture.target_fps = 50;
    config.network.bind_address = "127.0.0.1".into();
    config.network.http_port = 0;
    config.network.tcp_port = 0;
    config.network.control_port = 0;
    config.network.client_timeout_secs = 5;
    config
}

/// Everything a test needs to drive a manager
pub struct Rig {
    pub config: AppConfig,
    pub kinect: Arc<KinectProbe>,
    pub launches: Arc<LaunchStats>,
    pub registry: Arc<StreamRegistry>,
    pub manager: Arc<StreamManager>,
}

/// Build a manager over fakes. `kinect_present` decides whether the probe succeeds.
pub fn rig(kinect_present: bool) -> Rig {
    rig_with(test_config(), kinect_present)
}

pub fn rig_with(config: AppConfig, kinect_present: bool) -> Rig {
    let kinect = Arc::new(KinectProbe::default());
    kinect.failing.store(!kinect_present, Ordering::SeqCst);
    let (launcher, launches) = FakeLauncher::new();

    let hardware = Arc::new(HardwareRegistry::new(
        Box::new(FakeKinect::new(Arc::clone(&kinect))),
        launcher,
        &config,
    ));
    kinect.failing.store(false, Ordering::SeqCst);
    kinect.reset();

    let registry = Arc::new(StreamRegistry::new());
    let manager = Arc::new(StreamManager::new(
        Arc::clone(&registry),
        hardware,
        &config,
    ));
    Rig {
        config,
        kinect,
        launches,
        registry,
        manager,
    }
}

/// Poll `cond` until true or `timeout` elapses
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}
