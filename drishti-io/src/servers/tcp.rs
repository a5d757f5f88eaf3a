//! Raw TCP video server
//!
//! Streams one stream's frames as length-prefixed JPEG (see [`wire`](super::wire))
//! and answers single-byte inline commands. Before each frame wait the
//! socket is polled once for a pending command byte, so commands are served
//! between frames on a best-effort basis.

use super::listener::{ConnContext, ConnectionHandler};
use super::wire::{self, CMD_PING, CMD_STATUS};
use crate::error::Result;
use crate::streaming::{ClientGuard, StreamManager};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Frame wait per loop iteration, kept short so commands are polled often
const FRAME_WAIT: Duration = Duration::from_millis(100);

enum Poll {
    Idle,
    Command(u8),
    Closed,
}

/// Per-connection handler for the raw TCP server
pub struct RawTcpHandler {
    manager: Arc<StreamManager>,
    stream_id: String,
    write_timeout: Duration,
}

impl RawTcpHandler {
    pub fn new(manager: Arc<StreamManager>, stream_id: &str, write_timeout: Duration) -> Self {
        Self {
            manager,
            stream_id: stream_id.to_string(),
            write_timeout,
        }
    }

    /// Check for one pending command byte without blocking
    fn poll_command(socket: &mut TcpStream) -> Result<Poll> {
        socket.set_nonblocking(true)?;
        let mut byte = [0u8; 1];
        let result = socket.read(&mut byte);
        socket.set_nonblocking(false)?;

        match result {
            Ok(0) => Ok(Poll::Closed),
            Ok(_) => Ok(Poll::Command(byte[0])),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                Ok(Poll::Idle)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn handle_command(&self, socket: &mut TcpStream, cmd: u8) -> Result<()> {
        match cmd {
            CMD_PING => {
                socket.write_all(&[CMD_PING])?;
            }
            CMD_STATUS => {
                let json = self.manager.status().to_json()?;
                wire::write_frame(socket, json.as_bytes())?;
            }
            other => log::trace!("Ignoring raw TCP command byte 0x{:02X}", other),
        }
        Ok(())
    }
}

impl ConnectionHandler for RawTcpHandler {
    fn handle(&self, mut socket: TcpStream, peer: SocketAddr, ctx: &ConnContext) -> Result<()> {
        let Some(stream) = self.manager.get_stream(&self.stream_id) else {
            socket.write_all(b"ERROR: Stream not found\n")?;
            return Ok(());
        };

        socket.set_write_timeout(Some(self.write_timeout))?;
        if let Err(e) = socket.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        log::info!("Raw TCP client {} streaming '{}'", peer, self.stream_id);

        let client = ClientGuard::new(stream);
        let stream = client.stream();
        let mut last_sequence = 0;

        while ctx.is_active() {
            match Self::poll_command(&mut socket)? {
                Poll::Closed => break,
                Poll::Command(cmd) => self.handle_command(&mut socket, cmd)?,
                Poll::Idle => {}
            }

            let (frame, sequence) = stream.get_frame(last_sequence, FRAME_WAIT);
            last_sequence = sequence;
            let Some(frame) = frame else {
                continue;
            };
            wire::write_frame(&mut socket, &frame)?;
            stream.increment_frames_sent();
        }

        log::info!("Raw TCP client {} disconnected", peer);
        Ok(())
    }
}
