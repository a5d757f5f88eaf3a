//! Server orchestration for the DrishtiIO daemon
//!
//! Starts the capture loop and the three protocol servers, idles until the
//! registry's running flag is cleared (signal handler or tests), then tears
//! everything down in reverse order.

use super::control::ControlHandler;
use super::http::HttpHandler;
use super::listener::{spawn_server, ServerHandle};
use super::tcp::RawTcpHandler;
use crate::config::AppConfig;
use crate::error::Result;
use crate::streaming::StreamManager;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Idle-loop poll interval
const RUN_POLL: Duration = Duration::from_millis(100);

/// Interval between statistics log lines
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Owns server lifecycles
pub struct Orchestrator {
    manager: Arc<StreamManager>,
    config: AppConfig,
    servers: Vec<ServerHandle>,
}

impl Orchestrator {
    pub fn new(manager: Arc<StreamManager>, config: AppConfig) -> Self {
        Self {
            manager,
            config,
            servers: Vec::new(),
        }
    }

    /// Start capture and bind every server.
    ///
    /// Servers already started are stopped again if a later one fails to bind.
    pub fn start(&mut self) -> Result<()> {
        self.manager.start()?;
        if let Err(e) = self.start_servers() {
            self.shutdown();
            return Err(e);
        }
        Ok(())
    }

    fn start_servers(&mut self) -> Result<()> {
        let net = &self.config.network;
        let streams = &self.config.streams;
        let running = self.manager.registry().running_flag();
        let timeout = net.client_timeout();

        if self.manager.get_stream(&streams.tcp_stream).is_none() {
            warn!("Raw TCP stream '{}' does not exist", streams.tcp_stream);
        }
        let tcp = Arc::new(RawTcpHandler::new(
            Arc::clone(&self.manager),
            &streams.tcp_stream,
            timeout,
        ));
        self.servers
            .push(spawn_server("tcp", &net.endpoint(net.tcp_port), Arc::clone(&running), tcp)?);

        let control = Arc::new(ControlHandler::new(Arc::clone(&self.manager), timeout));
        self.servers.push(spawn_server(
            "control",
            &net.endpoint(net.control_port),
            Arc::clone(&running),
            control,
        )?);

        let http = Arc::new(HttpHandler::new(
            Arc::clone(&self.manager),
            &streams.http_stream,
            timeout,
        ));
        self.servers
            .push(spawn_server("http", &net.endpoint(net.http_port), running, http)?);

        Ok(())
    }

    /// Bound address of each running server
    pub fn server_addrs(&self) -> Vec<(&'static str, SocketAddr)> {
        self.servers
            .iter()
            .map(|s| (s.name(), s.local_addr()))
            .collect()
    }

    /// Address of one server by name (`http`, `tcp`, `control`)
    pub fn addr_of(&self, name: &str) -> Option<SocketAddr> {
        self.servers
            .iter()
            .find(|s| s.name() == name)
            .map(ServerHandle::local_addr)
    }

    /// Block until the registry stops running, then shut down
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        for (name, addr) in self.server_addrs() {
            info!("  {:<8} {}", name, addr);
        }
        info!("DrishtiIO running. Press Ctrl-C to stop.");

        let registry = Arc::clone(self.manager.registry());
        let mut last_stats = Instant::now();
        while registry.is_running() {
            thread::sleep(RUN_POLL);
            if last_stats.elapsed() >= STATS_INTERVAL {
                self.log_statistics();
                last_stats = Instant::now();
            }
        }

        info!("Shutting down...");
        self.shutdown();
        Ok(())
    }

    /// Stop servers, then the capture loop and hardware
    pub fn shutdown(&mut self) {
        self.manager.registry().shutdown();
        for mut server in self.servers.drain(..) {
            server.stop();
        }
        self.manager.stop();
    }

    fn log_statistics(&self) {
        for (id, s) in self.manager.status().streams {
            debug!(
                "[{}] {} q={} frames={} sent={} clients={}",
                id, s.source, s.jpeg_quality, s.frames_captured, s.frames_sent, s.clients_connected
            );
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if !self.servers.is_empty() {
            self.shutdown();
        }
    }
}
