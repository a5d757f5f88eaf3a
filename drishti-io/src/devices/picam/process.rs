//! Camera subprocess spawning
//!
//! [`ProcessLauncher`] is the seam between the Pi Camera source and the OS:
//! the real [`CommandLauncher`] runs `rpicam-vid`/`libcamera-vid`, tests plug
//! in launchers that fabricate in-process MJPEG producers.

use crate::core::types::PicamPreset;
use crate::error::{Error, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How long `--help` may take while probing for a camera command
const DETECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval while waiting for a child to exit
const WAIT_POLL: Duration = Duration::from_millis(10);

/// A running camera process producing MJPEG on its stdout
pub trait CameraProcess: Send {
    /// Hand over the stdout stream (only the first call returns it)
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Ask the process to exit, killing it if still alive after `timeout`
    fn terminate(&mut self, timeout: Duration);
}

/// Finds and launches the camera command
pub trait ProcessLauncher: Send + Sync {
    /// First usable command from `candidates`
    fn detect(&self, candidates: &[String]) -> Option<String>;

    /// Start `command` streaming MJPEG at `preset`
    fn launch(&self, command: &str, preset: &PicamPreset) -> Result<Box<dyn CameraProcess>>;
}

/// Launches real camera binaries
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

impl CommandLauncher {
    /// Arguments for continuous MJPEG to stdout without preview
    pub fn args(preset: &PicamPreset) -> Vec<String> {
        vec![
            "-t".into(),
            "0".into(),
            "-n".into(),
            "--width".into(),
            preset.width.to_string(),
            "--height".into(),
            preset.height.to_string(),
            "--framerate".into(),
            preset.fps.to_string(),
            "--codec".into(),
            "mjpeg".into(),
            "-o".into(),
            "-".into(),
        ]
    }
}

impl ProcessLauncher for CommandLauncher {
    fn detect(&self, candidates: &[String]) -> Option<String> {
        for candidate in candidates {
            let spawned = Command::new(candidate)
                .arg("--help")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
            match spawned {
                Ok(mut child) => {
                    // Exit status is irrelevant; the binary exists
                    if !wait_timeout(&mut child, DETECT_TIMEOUT) {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                    log::debug!("Camera command found: {}", candidate);
                    return Some(candidate.clone());
                }
                Err(e) => log::debug!("Camera command {} unusable: {}", candidate, e),
            }
        }
        None
    }

    fn launch(&self, command: &str, preset: &PicamPreset) -> Result<Box<dyn CameraProcess>> {
        let child = Command::new(command)
            .args(Self::args(preset))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::ProcessFailure(format!("{}: {}", command, e)))?;
        log::debug!("Spawned {} (pid {})", command, child.id());
        Ok(Box::new(ChildProcess { child }))
    }
}

/// Wait up to `timeout` for the child to exit; true if it did
fn wait_timeout(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if Instant::now() < deadline => thread::sleep(WAIT_POLL),
            Ok(None) => return false,
            Err(e) => {
                log::warn!("Failed to poll child {}: {}", child.id(), e);
                return false;
            }
        }
    }
}

/// OS child process
struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    #[cfg(unix)]
    fn request_exit(&mut self) {
        let Ok(pid) = libc::pid_t::try_from(self.child.id()) else {
            return;
        };
        // SAFETY: kill(2) with a pid we spawned and still own (not yet reaped)
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            log::debug!(
                "SIGTERM to {} failed: {}",
                pid,
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) {
        let _ = self.child.kill();
    }
}

impl CameraProcess for ChildProcess {
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stdout
            .take()
            .map(|out| Box::new(out) as Box<dyn Read + Send>)
    }

    fn terminate(&mut self, timeout: Duration) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        self.request_exit();
        if !wait_timeout(&mut self.child, timeout) {
            log::warn!("Camera process {} ignored SIGTERM, killing", self.child.id());
            if let Err(e) = self.child.kill() {
                log::warn!("Kill failed: {}", e);
            }
            let _ = self.child.wait();
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
