//! End-to-end protocol tests over loopback sockets

mod common;

use common::{rig, wait_for};
use drishti_io::core::types::SourceKind;
use drishti_io::servers::listener::spawn_server;
use drishti_io::servers::tcp::RawTcpHandler;
use drishti_io::servers::wire::{self, CMD_PING, CMD_STATUS};
use drishti_io::servers::Orchestrator;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn connect(addr: SocketAddr) -> TcpStream {
    let socket = TcpStream::connect(addr).unwrap();
    socket.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
    socket
}

/// Read until the control prompt ends the reply
fn read_reply(reader: &mut BufReader<TcpStream>) -> String {
    let mut out = Vec::new();
    while !out.ends_with(b"> ") {
        let buf = reader.fill_buf().unwrap();
        assert!(!buf.is_empty(), "connection closed mid-reply");
        let n = buf.len();
        out.extend_from_slice(buf);
        reader.consume(n);
    }
    String::from_utf8(out).unwrap()
}

fn send(reader: &mut BufReader<TcpStream>, line: &str) -> String {
    reader.get_mut().write_all(format!("{}\n", line).as_bytes()).unwrap();
    read_reply(reader)
}

fn http_raw(addr: SocketAddr, request: &str) -> String {
    let mut socket = connect(addr);
    socket.write_all(request.as_bytes()).unwrap();
    let mut response = String::new();
    socket.read_to_string(&mut response).unwrap();
    response
}

fn http_get(addr: SocketAddr, target: &str) -> String {
    http_raw(
        addr,
        &format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target),
    )
}

#[test]
fn test_control_session_changes_only_selected_stream() {
    let rig = rig(false);
    let main = rig.manager.create_stream("main", None).unwrap();
    let secondary = rig.manager.create_stream("secondary", None).unwrap();
    let mut orchestrator = Orchestrator::new(Arc::clone(&rig.manager), rig.config.clone());
    orchestrator.start().unwrap();

    let mut client = BufReader::new(connect(orchestrator.addr_of("control").unwrap()));
    let welcome = read_reply(&mut client);
    assert!(welcome.contains("Streams: main, secondary"));

    assert!(send(&mut client, "select main").contains("OK: Selected stream 'main'"));
    assert!(send(&mut client, "quality 85").contains("OK: JPEG quality set to 85"));
    let status = send(&mut client, "status");
    assert!(status.contains("Stream: main"));
    assert!(status.contains("JPEG Quality: 85"));

    assert!(send(&mut client, "quality 0").contains("ERROR: quality must be 1-100"));
    assert!(send(&mut client, "kinect_depth").contains("ERROR: Kinect not available"));
    assert!(send(&mut client, "select nope").contains("ERROR: Stream 'nope' not found"));
    assert!(send(&mut client, "bogus").contains("Unknown command: bogus"));

    assert_eq!(main.settings().jpeg_quality, 85);
    assert_eq!(secondary.settings().jpeg_quality, 70);

    client.get_mut().write_all(b"quit\n").unwrap();
    let mut farewell = String::new();
    client.read_to_string(&mut farewell).unwrap();
    assert_eq!(farewell, "Goodbye!\n");

    orchestrator.shutdown();
}

#[test]
fn test_http_switch_and_status() {
    let rig = rig(false);
    let main = rig.manager.create_stream("main", None).unwrap();
    rig.manager.create_stream("secondary", None).unwrap();
    let mut orchestrator = Orchestrator::new(Arc::clone(&rig.manager), rig.config.clone());
    orchestrator.start().unwrap();
    let addr = orchestrator.addr_of("http").unwrap();

    let response = http_get(addr, "/switch?source=kinect_ir&stream=main");
    assert!(response.starts_with("HTTP/1.1 400"), "{}", response);
    assert!(response.contains("Kinect unavailable"));
    assert_eq!(main.source(), SourceKind::Picam);

    let response = http_get(addr, "/switch?quality=55&picam_res=low");
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains("OK: quality=55, picam_res=low (stream: main)"));
    assert_eq!(main.settings().jpeg_quality, 55);
    assert_eq!(main.settings().picam_preset, "low");

    let response = http_get(addr, "/switch?quality=5&stream=ghost");
    assert!(response.starts_with("HTTP/1.1 404"));

    let response = http_get(addr, "/status");
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("application/json"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["kinect_available"], false);
    assert_eq!(json["streams"]["main"]["jpeg_quality"], 55);
    assert_eq!(json["streams"]["secondary"]["source"], "picam");

    assert!(http_get(addr, "/nowhere").starts_with("HTTP/1.1 404"));
    assert!(http_get(addr, "/").contains("<img id=\"view\" src=\"/stream/main\">"));

    orchestrator.shutdown();
}

#[test]
fn test_control_rejects_overlong_line() {
    let rig = rig(false);
    let main = rig.manager.create_stream("main", None).unwrap();
    let mut orchestrator = Orchestrator::new(Arc::clone(&rig.manager), rig.config.clone());
    orchestrator.start().unwrap();

    let mut client = BufReader::new(connect(orchestrator.addr_of("control").unwrap()));
    read_reply(&mut client);

    // Sent in pieces without a newline, then terminated
    let chunk = "quality 5".to_string() + &"0".repeat(4096);
    for _ in 0..16 {
        client.get_mut().write_all(chunk.as_bytes()).unwrap();
    }
    let reply = send(&mut client, "");
    assert_eq!(reply, "ERROR: Line too long\n> ");
    assert_eq!(main.settings().jpeg_quality, 70);

    // The connection keeps working after the dropped line
    assert!(send(&mut client, "quality 60").contains("OK: JPEG quality set to 60"));

    orchestrator.shutdown();
}

#[test]
fn test_http_switch_stops_at_first_invalid_field() {
    let rig = rig(false);
    let main = rig.manager.create_stream("main", None).unwrap();
    let mut orchestrator = Orchestrator::new(Arc::clone(&rig.manager), rig.config.clone());
    orchestrator.start().unwrap();
    let addr = orchestrator.addr_of("http").unwrap();

    let response = http_get(addr, "/switch?quality=50&scale=9&picam_res=low");
    assert!(response.starts_with("HTTP/1.1 400"), "{}", response);
    assert!(response.contains("ERROR: scale must be 0.25-2.0"));
    let settings = main.settings();
    assert_eq!(settings.jpeg_quality, 50);
    assert_eq!(settings.scale_factor, 1.0);
    assert_eq!(settings.picam_preset, "high");

    orchestrator.shutdown();
}

#[test]
fn test_http_switch_merges_form_body_with_query() {
    let rig = rig(false);
    let main = rig.manager.create_stream("main", None).unwrap();
    let mut orchestrator = Orchestrator::new(Arc::clone(&rig.manager), rig.config.clone());
    orchestrator.start().unwrap();
    let addr = orchestrator.addr_of("http").unwrap();

    let body = "quality=20&picam_res=medium";
    let response = http_raw(
        addr,
        &format!(
            "POST /switch?quality=90 HTTP/1.1\r\nHost: localhost\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ),
    );
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains("quality=90"));
    assert!(response.contains("picam_res=medium"));
    assert_eq!(main.settings().jpeg_quality, 90);
    assert_eq!(main.settings().picam_preset, "medium");

    orchestrator.shutdown();
}

#[test]
fn test_http_mjpeg_stream_delivers_parts() {
    let rig = rig(true);
    rig.manager.create_stream("main", Some(SourceKind::KinectRgb)).unwrap();
    let mut orchestrator = Orchestrator::new(Arc::clone(&rig.manager), rig.config.clone());
    orchestrator.start().unwrap();

    let mut socket = connect(orchestrator.addr_of("http").unwrap());
    socket
        .write_all(b"GET /stream/main HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let mut reader = BufReader::new(socket);

    let mut header = String::new();
    reader.read_line(&mut header).unwrap();
    assert!(header.starts_with("HTTP/1.1 200"));

    let mut parts = 0;
    let mut line = String::new();
    while parts < 2 {
        line.clear();
        assert!(reader.read_line(&mut line).unwrap() > 0);
        if line.starts_with("Content-Length:") {
            let len: usize = line["Content-Length:".len()..].trim().parse().unwrap();
            line.clear();
            reader.read_line(&mut line).unwrap();
            let mut jpeg = vec![0u8; len];
            reader.read_exact(&mut jpeg).unwrap();
            assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
            parts += 1;
        }
    }

    assert!(wait_for(Duration::from_secs(2), || {
        rig.manager.status().streams["main"].clients_connected == 1
    }));
    drop(reader);
    orchestrator.shutdown();
}

#[test]
fn test_raw_tcp_streams_frames() {
    let rig = rig(true);
    rig.manager.create_stream("main", Some(SourceKind::KinectRgb)).unwrap();
    let secondary = rig
        .manager
        .create_stream("secondary", Some(SourceKind::KinectDepth))
        .unwrap();
    let mut orchestrator = Orchestrator::new(Arc::clone(&rig.manager), rig.config.clone());
    orchestrator.start().unwrap();

    let mut socket = connect(orchestrator.addr_of("tcp").unwrap());
    for _ in 0..3 {
        let frame = wire::read_frame(&mut socket).unwrap();
        assert_eq!(&frame[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame[frame.len() - 2..], &[0xFF, 0xD9]);
    }
    assert!(wait_for(Duration::from_secs(2), || secondary.stats().frames_sent >= 3));

    drop(socket);
    orchestrator.shutdown();
}

#[test]
fn test_raw_tcp_commands_without_frames() {
    let rig = rig(false);
    rig.manager.create_stream("secondary", None).unwrap();
    let handler = Arc::new(RawTcpHandler::new(
        Arc::clone(&rig.manager),
        "secondary",
        IO_TIMEOUT,
    ));
    let mut server = spawn_server("tcp", "127.0.0.1:0", rig.registry.running_flag(), handler).unwrap();

    // Capture loop is not running, so only command replies arrive
    let mut socket = connect(server.local_addr());
    socket.write_all(&[CMD_PING]).unwrap();
    let mut byte = [0xAAu8; 1];
    socket.read_exact(&mut byte).unwrap();
    assert_eq!(byte, [CMD_PING]);

    socket.write_all(&[0x7F, CMD_STATUS]).unwrap();
    let status = wire::read_frame(&mut socket).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&status).unwrap();
    assert_eq!(json["streams"]["secondary"]["clients_connected"], 1);

    server.stop();
}

#[test]
fn test_raw_tcp_unknown_stream() {
    let rig = rig(false);
    let handler = Arc::new(RawTcpHandler::new(
        Arc::clone(&rig.manager),
        "missing",
        IO_TIMEOUT,
    ));
    let server = spawn_server("tcp", "127.0.0.1:0", rig.registry.running_flag(), handler).unwrap();

    let mut reply = String::new();
    connect(server.local_addr()).read_to_string(&mut reply).unwrap();
    assert_eq!(reply, "ERROR: Stream not found\n");
}

#[test]
fn test_bind_conflict_is_reported() {
    let rig = rig(false);
    rig.manager.create_stream("main", None).unwrap();
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = rig.config.clone();
    config.network.control_port = blocker.local_addr().unwrap().port();

    let mut orchestrator = Orchestrator::new(Arc::clone(&rig.manager), config);
    let err = orchestrator.start().unwrap_err();
    assert!(err.is_fatal());
    assert!(orchestrator.server_addrs().is_empty());
}

#[test]
fn test_shutdown_releases_clients_promptly() {
    let rig = rig(false);
    rig.manager.create_stream("main", None).unwrap();
    rig.manager.create_stream("secondary", None).unwrap();
    let mut orchestrator = Orchestrator::new(Arc::clone(&rig.manager), rig.config.clone());
    orchestrator.start().unwrap();

    let mut control = BufReader::new(connect(orchestrator.addr_of("control").unwrap()));
    read_reply(&mut control);
    let mut tcp = connect(orchestrator.addr_of("tcp").unwrap());

    let started = Instant::now();
    rig.registry.shutdown();
    orchestrator.shutdown();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!rig.manager.is_running());
    assert_eq!(rig.launches.live(), 0);

    // Both workers close their sockets once they notice shutdown
    let mut rest = Vec::new();
    let _ = control.read_to_end(&mut rest);
    let mut sink = Vec::new();
    let _ = tcp.read_to_end(&mut sink);
}
