//! Text control server
//!
//! Line-oriented protocol for selecting streams and changing their settings.
//! Every reply ends with the prompt `> ` (except the farewell).
//!
//! | Command | Effect |
//! |---------|--------|
//! | `streams` | List streams and the current selection |
//! | `select [id]` | Select the stream later commands apply to |
//! | `kinect_rgb`, `kinect_ir`, `kinect_depth`, `picam` | Switch the selected stream's source |
//! | `quality [1-100]` | JPEG quality |
//! | `scale [0.25-2.0]` | Kinect output scale |
//! | `picam_res [preset]` | Pi camera preset |
//! | `status [all]` | Selected (or every) stream's status |
//! | `help` | Command summary |
//! | `quit`, `exit`, `q` | Disconnect |
//!
//! The socket is read with a short timeout so the worker notices shutdown
//! promptly; a client silent for the configured idle timeout is dropped.

use super::listener::{ConnContext, ConnectionHandler};
use crate::core::types::SourceKind;
use crate::error::Result;
use crate::streaming::manager::{self, source_names, StreamManager};
use std::fmt::Write as _;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const PROMPT: &str = "> ";

/// Socket poll interval
const READ_POLL: Duration = Duration::from_millis(500);

/// Longest accepted command line
const MAX_LINE: usize = 4096;

/// Per-connection state
#[derive(Debug, Clone)]
pub struct ControlSession {
    pub selected: String,
}

/// Result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Send and keep reading
    Continue(String),
    /// Send and close the connection
    Close(String),
}

impl Reply {
    fn text(&self) -> &str {
        match self {
            Reply::Continue(t) | Reply::Close(t) => t,
        }
    }
}

/// Per-connection handler for the control server
pub struct ControlHandler {
    manager: Arc<StreamManager>,
    idle_timeout: Duration,
}

impl ControlHandler {
    pub fn new(manager: Arc<StreamManager>, idle_timeout: Duration) -> Self {
        Self {
            manager,
            idle_timeout,
        }
    }

    /// Fresh session with the first stream selected
    pub fn new_session(&self) -> ControlSession {
        let selected = self
            .manager
            .list_streams()
            .into_iter()
            .next()
            .unwrap_or_else(|| "main".to_string());
        ControlSession { selected }
    }

    pub fn welcome(&self, session: &ControlSession) -> String {
        format!(
            "Drishti Control Server v{}\nStreams: {}\nSelected: {}\nAvailable sources: {}\n\
             Type 'help' for commands.\n{}",
            env!("CARGO_PKG_VERSION"),
            self.manager.list_streams().join(", "),
            session.selected,
            source_names(&self.manager.available_sources()),
            PROMPT
        )
    }

    /// Execute one command line
    pub fn execute(&self, session: &mut ControlSession, line: &str) -> Reply {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return Reply::Continue(PROMPT.to_string());
        };
        let command = command.to_lowercase();
        let arg = parts.next();

        let text = match command.as_str() {
            "quit" | "exit" | "q" => return Reply::Close("Goodbye!\n".to_string()),
            "streams" => format!(
                "Available streams: {}\nCurrently selected: {}\n",
                self.manager.list_streams().join(", "),
                session.selected
            ),
            "select" => self.select(session, arg),
            "quality" => self.quality(session, arg),
            "scale" => self.scale(session, arg),
            "picam_res" => self.picam_res(session, arg),
            "status" => {
                if arg.is_some_and(|a| a.eq_ignore_ascii_case("all")) {
                    self.status_all(session)
                } else {
                    self.status_one(session)
                }
            }
            "help" => self.help(),
            other => match other.parse::<SourceKind>() {
                Ok(source) => self.switch(session, source),
                Err(_) => format!("Unknown command: {}. Type 'help' for commands.\n", line),
            },
        };
        Reply::Continue(text + PROMPT)
    }

    fn select(&self, session: &mut ControlSession, arg: Option<&str>) -> String {
        match arg {
            Some(target) if self.manager.get_stream(target).is_some() => {
                session.selected = target.to_string();
                format!("OK: Selected stream '{}'\n", target)
            }
            Some(target) => format!("ERROR: Stream '{}' not found\n", target),
            None => format!("Current: {} (usage: select <stream_id>)\n", session.selected),
        }
    }

    fn switch(&self, session: &ControlSession, source: SourceKind) -> String {
        if source.is_kinect() && !self.manager.kinect_available() {
            return "ERROR: Kinect not available\n".to_string();
        }
        match self.manager.switch_source(&session.selected, source) {
            Ok(msg) => format!("OK: {}\n", msg),
            Err(e) => format!("ERROR: {}\n", e),
        }
    }

    fn quality(&self, session: &ControlSession, arg: Option<&str>) -> String {
        let Some(stream) = self.manager.get_stream(&session.selected) else {
            return not_found(&session.selected);
        };
        match arg {
            Some(value) => match manager::parse_quality(value) {
                Ok(q) => {
                    manager::set_quality(&stream, q);
                    format!("OK: JPEG quality set to {}\n", q)
                }
                Err(e) => format!("ERROR: {}\n", e),
            },
            None => format!(
                "Current quality: {} (usage: quality <1-100>)\n",
                stream.settings().jpeg_quality
            ),
        }
    }

    fn scale(&self, session: &ControlSession, arg: Option<&str>) -> String {
        let Some(stream) = self.manager.get_stream(&session.selected) else {
            return not_found(&session.selected);
        };
        match arg {
            Some(value) => match manager::parse_scale(value) {
                Ok(s) => {
                    manager::set_scale(&stream, s);
                    format!("OK: Scale set to {} (Kinect: {})\n", s, self.manager.kinect_resolution(s))
                }
                Err(e) => format!("ERROR: {}\n", e),
            },
            None => format!(
                "Current scale: {} (usage: scale <0.25-2.0>)\n",
                stream.settings().scale_factor
            ),
        }
    }

    fn picam_res(&self, session: &ControlSession, arg: Option<&str>) -> String {
        let Some(stream) = self.manager.get_stream(&session.selected) else {
            return not_found(&session.selected);
        };
        let options = self.manager.picam_preset_names().join(", ");
        match arg.map(str::to_lowercase) {
            Some(name) => match self.manager.picam_preset(&name) {
                Some(p) => {
                    manager::set_preset(&stream, &name);
                    format!(
                        "OK: Pi camera set to {} ({} @ {}fps)\n",
                        name,
                        p.resolution(),
                        p.fps
                    )
                }
                None => format!("ERROR: preset must be: {}\n", options),
            },
            None => format!(
                "Current preset: {} (options: {})\n",
                stream.settings().picam_preset,
                options
            ),
        }
    }

    fn status_one(&self, session: &ControlSession) -> String {
        let Some(stream) = self.manager.get_stream(&session.selected) else {
            return not_found(&session.selected);
        };
        let s = self.manager.stream_status(&stream);
        format!(
            "Stream: {}\nSource: {}\nResolution: {}\nJPEG Quality: {}\nScale Factor: {}\n\
             Pi Cam Preset: {}\nFrames: {}\nClients: {}\n",
            s.stream_id,
            s.source,
            s.resolution,
            s.jpeg_quality,
            s.scale_factor,
            s.picam_preset,
            s.frames_captured,
            s.clients_connected
        )
    }

    fn status_all(&self, session: &ControlSession) -> String {
        let status = self.manager.status();
        let mut out = format!(
            "Kinect: {}\nSources: {}\n\n",
            if status.kinect_available { "Available" } else { "N/A" },
            source_names(&status.available_sources)
        );
        for stream_id in self.manager.list_streams() {
            let Some(info) = status.streams.get(&stream_id) else {
                continue;
            };
            let marker = if stream_id == session.selected { " <-- selected" } else { "" };
            let _ = write!(
                out,
                "[{}]{}\n  Source: {}\n  Resolution: {}\n  Quality: {}\n  Frames: {}\n  Clients: {}\n",
                stream_id,
                marker,
                info.source,
                info.resolution,
                info.jpeg_quality,
                info.frames_captured,
                info.clients_connected
            );
        }
        out
    }

    fn help(&self) -> String {
        let mut out = String::from(
            "\nDrishti Control Commands\n========================\n\n\
             Stream Management:\n  streams              - List all streams\n  \
             select <stream_id>   - Select stream to control\n\nSource Selection:\n",
        );
        for source in self.manager.available_sources() {
            let _ = writeln!(out, "  {:<20} - Switch to {}", source.as_str(), source);
        }
        let _ = write!(
            out,
            "\nSettings:\n  quality <1-100>      - Set JPEG compression\n  \
             scale <0.25-2.0>     - Scale Kinect output\n  \
             picam_res <preset>   - Pi camera: {}\n\nInfo:\n  \
             status               - Show selected stream status\n  \
             status all           - Show all streams status\n  \
             help                 - This help\n  \
             quit                 - Disconnect\n\n",
            self.manager.picam_preset_names().join(", ")
        );
        out
    }
}

fn not_found(stream_id: &str) -> String {
    format!("ERROR: Stream '{}' not found\n", stream_id)
}

/// What one bounded read produced
#[derive(Debug, PartialEq, Eq)]
enum LineEvent {
    /// A complete command line (newline included)
    Line(String),
    /// An overlong line ended; its content was dropped
    TooLong,
    /// Peer closed the connection
    Closed,
}

/// Newline framing with a per-line byte cap
///
/// Input beyond [`MAX_LINE`] is discarded up to the next newline, so a
/// client can never make the buffer grow past the cap.
#[derive(Default)]
struct LineBuffer {
    line: Vec<u8>,
    overflow: bool,
}

impl LineBuffer {
    /// Read until a line completes, the peer closes, or the reader errors
    /// (read timeouts surface as errors with partial input kept).
    fn fill<R: BufRead>(&mut self, reader: &mut R) -> std::io::Result<LineEvent> {
        loop {
            let budget = (MAX_LINE + 1 - self.line.len()) as u64;
            reader.by_ref().take(budget).read_until(b'\n', &mut self.line)?;
            let complete = self.line.last() == Some(&b'\n');

            if complete {
                let line = std::mem::take(&mut self.line);
                if std::mem::take(&mut self.overflow) || line.len() > MAX_LINE {
                    return Ok(LineEvent::TooLong);
                }
                return Ok(LineEvent::Line(String::from_utf8_lossy(&line).into_owned()));
            }
            if self.line.len() > MAX_LINE {
                self.overflow = true;
                self.line.clear();
                continue;
            }
            // Short of the cap without a newline only happens at end of input
            return Ok(LineEvent::Closed);
        }
    }

    fn pending(&self) -> usize {
        self.line.len()
    }
}

impl ConnectionHandler for ControlHandler {
    fn handle(&self, socket: TcpStream, peer: SocketAddr, ctx: &ConnContext) -> Result<()> {
        socket.set_read_timeout(Some(READ_POLL))?;
        socket.set_write_timeout(Some(self.idle_timeout))?;
        log::info!("Control connection from {}", peer);

        let mut writer = socket.try_clone()?;
        let mut reader = BufReader::new(socket);
        let mut session = self.new_session();
        writer.write_all(self.welcome(&session).as_bytes())?;

        let mut buffer = LineBuffer::default();
        let mut last_input = Instant::now();
        let mut seen = 0;

        while ctx.is_active() {
            match buffer.fill(&mut reader) {
                Ok(LineEvent::Closed) => break,
                Ok(LineEvent::TooLong) => {
                    last_input = Instant::now();
                    log::debug!("Control {}: line over {} bytes dropped", peer, MAX_LINE);
                    writer.write_all(format!("ERROR: Line too long\n{}", PROMPT).as_bytes())?;
                }
                Ok(LineEvent::Line(text)) => {
                    last_input = Instant::now();
                    log::debug!("Control {}: {}", peer, text.trim());

                    let reply = self.execute(&mut session, &text);
                    writer.write_all(reply.text().as_bytes())?;
                    if let Reply::Close(_) = reply {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    if buffer.pending() != seen {
                        seen = buffer.pending();
                        last_input = Instant::now();
                    }
                    if last_input.elapsed() >= self.idle_timeout {
                        log::info!("Control client {} idle, closing", peer);
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        log::info!("Control connection from {} closed", peer);
        Ok(())
    }
}
