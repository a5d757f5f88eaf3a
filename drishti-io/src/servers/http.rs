//! HTTP server: MJPEG streams, JSON status, settings switch and viewer pages
//!
//! # Routes
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET | `/`, `/index.html` | Viewer page |
//! | GET | `/dual`, `/dual.html` | Side-by-side viewer for `main` and `secondary` |
//! | GET | `/stream.mjpg`, `/stream` | MJPEG of the server's default stream |
//! | GET | `/stream/<id>` | MJPEG of stream `<id>` |
//! | GET | `/status` | JSON status snapshot |
//! | GET, POST | `/switch?stream=&source=&quality=&scale=&picam_res=` | Apply settings |
//!
//! Every connection serves one request and is closed afterwards.

use super::listener::{ConnContext, ConnectionHandler};
use crate::core::types::SourceKind;
use crate::error::{Error, Result};
use crate::streaming::manager::{self, StreamManager};
use crate::streaming::{ClientGuard, StreamState};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Multipart boundary token
pub const BOUNDARY: &str = "frame";

/// Request line plus headers may not exceed this
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Form bodies larger than this are rejected
const MAX_BODY_BYTES: usize = 8 * 1024;

/// Frame wait per MJPEG iteration
const FRAME_WAIT: Duration = Duration::from_secs(1);

/// Parsed HTTP request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read one head line, reading at most `budget` bytes
fn read_head_line<R: BufRead>(reader: &mut R, budget: usize) -> Result<String> {
    let mut buf = Vec::new();
    reader
        .by_ref()
        .take(budget as u64 + 1)
        .read_until(b'\n', &mut buf)?;
    if buf.len() > budget {
        return Err(Error::Protocol("Request header too large".into()));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read one request; `Ok(None)` if the peer closed before sending anything
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<Option<Request>> {
    let line = read_head_line(reader, MAX_HEAD_BYTES)?;
    if line.is_empty() {
        return Ok(None);
    }
    let mut head_bytes = line.len();

    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::Protocol(format!("Malformed request line: {:?}", line.trim())));
    };
    if !version.starts_with("HTTP/") {
        return Err(Error::Protocol(format!("Unsupported protocol: {}", version)));
    }
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.to_string(), None),
    };
    let method = method.to_ascii_uppercase();

    let mut headers = Vec::new();
    loop {
        let line = read_head_line(reader, MAX_HEAD_BYTES - head_bytes)?;
        head_bytes += line.len();
        let trimmed = line.trim_end_matches(&['\r', '\n'][..]);
        if line.is_empty() || trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let mut request = Request {
        method,
        path,
        query,
        headers,
        body: Vec::new(),
    };

    let length = request
        .header("Content-Length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if length > MAX_BODY_BYTES {
        return Err(Error::Protocol(format!("Request body of {} bytes too large", length)));
    }
    if length > 0 {
        request.body.resize(length, 0);
        reader.read_exact(&mut request.body)?;
    }

    Ok(Some(request))
}

/// Outcome of a `/switch` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchResponse {
    pub status: u16,
    pub body: String,
}

impl SwitchResponse {
    fn new(status: u16, body: String) -> Self {
        Self { status, body }
    }
}

/// Per-connection handler for the HTTP server
pub struct HttpHandler {
    manager: Arc<StreamManager>,
    default_stream: String,
    client_timeout: Duration,
}

impl HttpHandler {
    pub fn new(manager: Arc<StreamManager>, default_stream: &str, client_timeout: Duration) -> Self {
        Self {
            manager,
            default_stream: default_stream.to_string(),
            client_timeout,
        }
    }

    fn route(&self, socket: &mut TcpStream, request: &Request, ctx: &ConnContext) -> Result<()> {
        let method = request.method.as_str();
        let path = request.path.as_str();
        log::debug!("HTTP {} {}", method, path);

        if path == "/switch" {
            if method != "GET" && method != "POST" {
                return write_response(socket, 405, "text/plain", b"Method Not Allowed\n");
            }
            let res = self.handle_switch(request);
            return write_response(socket, res.status, "text/plain", res.body.as_bytes());
        }
        if method != "GET" {
            return write_response(socket, 404, "text/plain", b"Not Found\n");
        }

        match path {
            "/" | "/index.html" => {
                let page = self.viewer_page();
                write_response(socket, 200, "text/html", page.as_bytes())
            }
            "/dual" | "/dual.html" => write_response(socket, 200, "text/html", DUAL_PAGE.as_bytes()),
            "/stream.mjpg" | "/stream" => self.send_mjpeg(socket, &self.default_stream, ctx),
            "/status" => {
                let json = self.manager.status().to_json()?;
                write_response(socket, 200, "application/json", json.as_bytes())
            }
            _ => match path.strip_prefix("/stream/") {
                Some(id) => self.send_mjpeg(socket, id.trim_end_matches('/'), ctx),
                None => write_response(socket, 404, "text/plain", b"Not Found\n"),
            },
        }
    }

    /// Apply `/switch` parameters.
    ///
    /// Fields are validated and applied in the order source, quality,
    /// scale, picam_res; the first invalid one ends the request with 400 and
    /// later fields are left untouched.
    pub fn handle_switch(&self, request: &Request) -> SwitchResponse {
        let is_form = request
            .header("Content-Type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        let form_body = if request.method == "POST" && is_form && !request.body.is_empty() {
            Some(String::from_utf8_lossy(&request.body).into_owned())
        } else {
            None
        };

        if request.query.is_none() && form_body.is_none() {
            return SwitchResponse::new(400, "ERROR: Missing parameters\n".into());
        }

        let mut params: HashMap<String, String> = HashMap::new();
        for raw in [form_body.as_deref(), request.query.as_deref()].into_iter().flatten() {
            match serde_urlencoded::from_str::<Vec<(String, String)>>(raw) {
                Ok(pairs) => params.extend(pairs.into_iter().filter(|(_, v)| !v.is_empty())),
                Err(e) => {
                    return SwitchResponse::new(400, format!("ERROR: Bad parameters: {}\n", e));
                }
            }
        }

        let stream_id = params
            .get("stream")
            .cloned()
            .unwrap_or_else(|| self.default_stream.clone());
        let Some(stream) = self.manager.get_stream(&stream_id) else {
            return SwitchResponse::new(404, format!("ERROR: Stream \"{}\" not found\n", stream_id));
        };

        match self.apply_switch(&stream, &stream_id, &params) {
            Ok(applied) if applied.is_empty() => SwitchResponse::new(
                400,
                "ERROR: No valid parameters. Use: source, quality, scale, picam_res\n".into(),
            ),
            Ok(applied) => SwitchResponse::new(
                200,
                format!("OK: {} (stream: {})\n", applied.join(", "), stream_id),
            ),
            Err(e) => SwitchResponse::new(400, format!("ERROR: {}\n", e)),
        }
    }

    fn apply_switch(
        &self,
        stream: &StreamState,
        stream_id: &str,
        params: &HashMap<String, String>,
    ) -> Result<Vec<String>> {
        let mut applied = Vec::new();

        if let Some(source) = params.get("source") {
            self.manager.switch_source_named(stream_id, source)?;
            applied.push(format!("source={}", source));
        }
        if let Some(quality) = params.get("quality") {
            let q = manager::parse_quality(quality)?;
            manager::set_quality(stream, q);
            applied.push(format!("quality={}", q));
        }
        if let Some(scale) = params.get("scale") {
            let s = manager::parse_scale(scale)?;
            manager::set_scale(stream, s);
            applied.push(format!("scale={}", s));
        }
        if let Some(preset) = params.get("picam_res") {
            if self.manager.picam_preset(preset).is_none() {
                return Err(Error::Protocol(format!(
                    "picam_res must be: {}",
                    self.manager.picam_preset_names().join(", ")
                )));
            }
            manager::set_preset(stream, preset);
            applied.push(format!("picam_res={}", preset));
        }

        Ok(applied)
    }

    fn send_mjpeg(&self, socket: &mut TcpStream, stream_id: &str, ctx: &ConnContext) -> Result<()> {
        let Some(stream) = self.manager.get_stream(stream_id) else {
            let body = format!("Stream '{}' not found\n", stream_id);
            return write_response(socket, 404, "text/plain", body.as_bytes());
        };

        write!(
            socket,
            "HTTP/1.1 200 OK\r\n\
             Content-Type: multipart/x-mixed-replace; boundary={}\r\n\
             Cache-Control: no-cache, private\r\n\
             Pragma: no-cache\r\n\
             Connection: close\r\n\r\n",
            BOUNDARY
        )?;
        socket.flush()?;

        let client = ClientGuard::new(stream);
        let stream = client.stream();
        let mut last_sequence = 0;
        log::info!("MJPEG client streaming '{}'", stream_id);

        while ctx.is_active() {
            let (frame, sequence) = stream.get_frame(last_sequence, FRAME_WAIT);
            last_sequence = sequence;
            let Some(frame) = frame else {
                continue;
            };
            write_part(socket, &frame)?;
            stream.increment_frames_sent();
        }
        Ok(())
    }

    fn viewer_page(&self) -> String {
        let buttons: String = self
            .manager
            .list_streams()
            .iter()
            .map(|id| {
                let class = if *id == self.default_stream { " class=\"active\"" } else { "" };
                format!(
                    "<button id=\"stream-btn-{id}\"{class} onclick=\"selectStream('{id}')\">{id}</button>\n"
                )
            })
            .collect();
        let sources: String = SourceKind::ALL
            .iter()
            .map(|s| format!("<button onclick=\"setSource('{s}')\">{s}</button>\n"))
            .collect();

        VIEWER_PAGE
            .replace("{stream_id}", &self.default_stream)
            .replace("{stream_buttons}", &buttons)
            .replace("{source_buttons}", &sources)
    }
}

impl ConnectionHandler for HttpHandler {
    fn handle(&self, socket: TcpStream, peer: SocketAddr, ctx: &ConnContext) -> Result<()> {
        socket.set_read_timeout(Some(self.client_timeout))?;
        socket.set_write_timeout(Some(self.client_timeout))?;

        let mut reader = BufReader::new(socket.try_clone()?);
        let mut socket = socket;
        let request = match read_request(&mut reader) {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(Error::Protocol(msg)) => {
                log::debug!("Bad request from {}: {}", peer, msg);
                return write_response(&mut socket, 400, "text/plain", b"Bad Request\n");
            }
            Err(e) => return Err(e),
        };
        self.route(&mut socket, &request, ctx)
    }
}

/// One multipart MJPEG part
pub fn write_part<W: Write>(writer: &mut W, jpeg: &[u8]) -> Result<()> {
    write!(
        writer,
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    )?;
    writer.write_all(jpeg)?;
    writer.write_all(b"\r\n")?;
    writer.flush()?;
    Ok(())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Internal Server Error",
    }
}

fn write_response<W: Write>(writer: &mut W, status: u16, content_type: &str, body: &[u8]) -> Result<()> {
    write!(
        writer,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason(status),
        content_type,
        body.len()
    )?;
    writer.write_all(body)?;
    writer.flush()?;
    Ok(())
}

const VIEWER_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Drishti Viewer</title>
<style>body{background:#111;color:#eee;font-family:sans-serif;text-align:center}
img{max-width:100%;border:1px solid #333}button.active{background:#2a6}</style>
</head>
<body>
<h1>Drishti Viewer</h1>
<div id="streams">
{stream_buttons}</div>
<img id="view" src="/stream/{stream_id}">
<div id="sources">
{source_buttons}</div>
<pre id="status"></pre>
<script>
var current = '{stream_id}';
function selectStream(id) {
  current = id;
  document.getElementById('view').src = '/stream/' + id;
  document.querySelectorAll('#streams button').forEach(function (b) {
    b.className = b.id === 'stream-btn-' + id ? 'active' : '';
  });
}
function setSource(src) {
  fetch('/switch?stream=' + current + '&source=' + src)
    .then(function (r) { return r.text(); })
    .then(function (t) { document.getElementById('status').textContent = t; });
}
</script>
</body>
</html>
"#;

const DUAL_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Drishti Dual Viewer</title>
<style>body{background:#111;color:#eee;font-family:sans-serif}
.pane{display:inline-block;width:49%;vertical-align:top}img{width:100%}</style>
</head>
<body>
<div class="pane"><h2>main</h2><img src="/stream/main"></div>
<div class="pane"><h2>secondary</h2><img src="/stream/secondary"></div>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(raw: &str) -> Request {
        read_request(&mut Cursor::new(raw.as_bytes().to_vec()))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_parse_get_with_query() {
        let req = parse("GET /switch?source=picam&quality=80 HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/switch");
        assert_eq!(req.query.as_deref(), Some("source=picam&quality=80"));
        assert_eq!(req.header("host"), Some("x"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_post_body() {
        let req = parse(
            "POST /switch HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: 11\r\n\r\nquality=42&",
        );
        assert_eq!(req.method, "POST");
        assert_eq!(req.query, None);
        assert_eq!(req.body, b"quality=42&");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let mut cursor = Cursor::new(b"HELLO\r\n\r\n".to_vec());
        assert!(matches!(read_request(&mut cursor), Err(Error::Protocol(_))));

        let mut empty = Cursor::new(Vec::new());
        assert!(read_request(&mut empty).unwrap().is_none());

        let mut big = format!("GET / HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "a".repeat(MAX_HEAD_BYTES));
        big.push_str("\r\n");
        let mut cursor = Cursor::new(big.into_bytes());
        assert!(read_request(&mut cursor).is_err());
    }

    #[test]
    fn test_endless_header_line_is_cut_off() {
        struct Endless(Vec<u8>);

        impl Read for Endless {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let n = buf.len().min(self.0.len());
                buf[..n].copy_from_slice(&self.0[..n]);
                Ok(n)
            }
        }

        // A request line that never ends would otherwise be buffered forever
        let mut reader = BufReader::new(Endless(vec![b'a'; 1024]));
        assert!(matches!(read_request(&mut reader), Err(Error::Protocol(_))));

        let mut reader = Cursor::new(format!("GET /{} HTTP/1.1\r\n\r\n", "p".repeat(MAX_HEAD_BYTES)));
        assert!(matches!(read_request(&mut reader), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_part_format() {
        let mut out = Vec::new();
        write_part(&mut out, &[1, 2, 3]).unwrap();
        let expected = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\n\x01\x02\x03\r\n";
        assert_eq!(out, expected.to_vec());
    }

    #[test]
    fn test_response_format() {
        let mut out = Vec::new();
        write_response(&mut out, 404, "text/plain", b"nope").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.ends_with("\r\n\r\nnope"));
    }
}
