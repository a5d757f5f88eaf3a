//! Reader thread for the Pi Camera subprocess
//!
//! The camera writes an endless MJPEG byte stream (concatenated JPEG images,
//! no container). The reader scans for SOI (`FF D8`) / EOI (`FF D9`) markers
//! and republishes the most recently completed image.

use crate::core::types::JpegFrame;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Read size per syscall
const CHUNK_SIZE: usize = 64 * 1024;

/// A partial image larger than this is discarded
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Incremental JPEG boundary scanner
#[derive(Default)]
pub struct MjpegScanner {
    buf: Vec<u8>,
}

impl MjpegScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held waiting for the rest of an image
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed bytes, returning the newest complete image they finished (if any)
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut latest = None;

        loop {
            let Some(start) = find(&self.buf, &SOI, 0) else {
                // No image start anywhere: drop everything but a possible
                // first half of a marker split across reads
                let keep_marker_half = self.buf.last() == Some(&0xFF);
                self.buf.clear();
                if keep_marker_half {
                    self.buf.push(0xFF);
                }
                break;
            };

            let Some(end) = find(&self.buf, &EOI, start + SOI.len()) else {
                self.buf.drain(..start);
                if self.buf.len() > MAX_FRAME_BYTES {
                    log::warn!("MJPEG frame exceeds {} bytes, resyncing", MAX_FRAME_BYTES);
                    self.buf.clear();
                }
                break;
            };

            let stop = end + EOI.len();
            latest = Some(self.buf[start..stop].to_vec());
            self.buf.drain(..stop);
        }

        latest
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Latest image of one camera session
///
/// `alive` is only flipped while holding the frame lock, so a reader that
/// outlives its session can never publish after the frame was cleared.
pub(super) struct FrameSlot {
    frame: Mutex<Option<JpegFrame>>,
    alive: AtomicBool,
}

impl FrameSlot {
    pub(super) fn new() -> Self {
        Self {
            frame: Mutex::new(None),
            alive: AtomicBool::new(true),
        }
    }

    pub(super) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(super) fn latest(&self) -> Option<JpegFrame> {
        self.frame.lock().clone()
    }

    fn publish(&self, jpeg: Vec<u8>) -> bool {
        let mut frame = self.frame.lock();
        if !self.is_alive() {
            return false;
        }
        *frame = Some(jpeg.into());
        true
    }

    /// Mark the session finished and drop its frame
    pub(super) fn close(&self) {
        let mut frame = self.frame.lock();
        self.alive.store(false, Ordering::SeqCst);
        *frame = None;
    }
}

/// Reader loop - runs until the process output ends or the slot is closed
pub(super) fn reader_loop(mut stdout: Box<dyn Read + Send>, slot: Arc<FrameSlot>) {
    let mut scanner = MjpegScanner::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut frames: u64 = 0;

    while slot.is_alive() {
        match stdout.read(&mut chunk) {
            Ok(0) => {
                log::warn!("Pi camera output ended after {} frames", frames);
                break;
            }
            Ok(n) => {
                if let Some(jpeg) = scanner.push(&chunk[..n]) {
                    log::trace!("Pi camera frame {} bytes", jpeg.len());
                    if !slot.publish(jpeg) {
                        break;
                    }
                    frames += 1;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("Pi camera read error: {}", e);
                break;
            }
        }
    }

    slot.close();
    log::debug!("Pi camera reader exiting");
}
