//! DrishtiIO - Multi-stream video multiplexer daemon
//!
//! ## Ports (defaults)
//!
//! - **HTTP (5600)**: MJPEG viewer/streams, `/status`, `/switch` for the `main` stream
//! - **Raw TCP (5601)**: Length-prefixed JPEG frames of the `secondary` stream
//! - **Control (5603)**: Text protocol for switching sources and settings

use clap::Parser;
use drishti_io::config::AppConfig;
use drishti_io::core::types::SourceKind;
use drishti_io::devices::create_hardware;
use drishti_io::error::{Error, Result};
use drishti_io::servers::Orchestrator;
use drishti_io::streaming::{StreamManager, StreamRegistry};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Config file picked up from the working directory when `--config` is absent
const DEFAULT_CONFIG: &str = "drishti.toml";

#[derive(Parser, Debug)]
#[command(name = "drishti-io", version, about = "Multi-stream video multiplexer")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Initial source of the main (HTTP) stream
    #[arg(long, value_enum)]
    main_source: Option<SourceKind>,

    /// Initial source of the secondary (raw TCP) stream
    #[arg(long, value_enum)]
    secondary_source: Option<SourceKind>,

    /// HTTP port
    #[arg(long)]
    main_port: Option<u16>,

    /// Raw TCP port
    #[arg(long)]
    secondary_port: Option<u16>,

    /// Control server port
    #[arg(long)]
    control_port: Option<u16>,

    /// Initial JPEG quality (1-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// Initial Kinect scale factor (0.25-2.0)
    #[arg(long)]
    scale: Option<f32>,

    /// Initial Pi camera preset
    #[arg(long)]
    picam_res: Option<String>,
}

impl Cli {
    /// Config file to read, if any
    fn config_path(&self) -> Option<PathBuf> {
        match &self.config {
            Some(path) => Some(path.clone()),
            None => Path::new(DEFAULT_CONFIG)
                .exists()
                .then(|| PathBuf::from(DEFAULT_CONFIG)),
        }
    }

    /// Load the config file (if any) and layer flags on top
    fn load_config(&self, path: Option<&Path>) -> Result<AppConfig> {
        let mut config = match path {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };

        if self.debug {
            config.logging.level = "debug".to_string();
        }
        if let Some(source) = self.main_source {
            config.streams.main_source = Some(source);
        }
        if let Some(source) = self.secondary_source {
            config.streams.secondary_source = Some(source);
        }
        if let Some(port) = self.main_port {
            config.network.http_port = port;
        }
        if let Some(port) = self.secondary_port {
            config.network.tcp_port = port;
        }
        if let Some(port) = self.control_port {
            config.network.control_port = port;
        }
        if let Some(quality) = self.quality {
            config.capture.jpeg_quality = quality;
        }
        if let Some(scale) = self.scale {
            if !(0.25..=2.0).contains(&scale) {
                return Err(Error::Config(format!("--scale {} outside 0.25-2.0", scale)));
            }
            config.capture.scale_factor = scale;
        }
        if let Some(preset) = &self.picam_res {
            config.capture.picam_preset = preset.to_lowercase();
        }

        config.validate()?;
        Ok(config)
    }
}

fn run(cli: Cli) -> Result<()> {
    // Logger level depends on the config file, so read it before logging anything else
    let path = cli.config_path();
    let config = cli.load_config(path.as_deref());
    let level = match &config {
        Ok(c) => c.logging.level.clone(),
        Err(_) if cli.debug => "debug".to_string(),
        Err(_) => "info".to_string(),
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    let config = config?;

    log::info!("DrishtiIO v{} starting...", env!("CARGO_PKG_VERSION"));
    match &path {
        Some(path) => log::info!("Using config: {}", path.display()),
        None => log::info!("Using built-in configuration"),
    }

    let hardware = Arc::new(create_hardware(&config));
    log::info!(
        "Kinect: {}",
        if hardware.kinect_available() { "available" } else { "not available" }
    );

    let registry = Arc::new(StreamRegistry::new());
    let manager = Arc::new(StreamManager::new(
        Arc::clone(&registry),
        hardware,
        &config,
    ));
    manager.create_stream("main", config.streams.main_source)?;
    manager.create_stream("secondary", config.streams.secondary_source)?;

    let r = Arc::clone(&registry);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.shutdown();
    })
    .map_err(|e| Error::Config(format!("Error setting Ctrl-C handler: {}", e)))?;

    let mut orchestrator = Orchestrator::new(manager, config);
    orchestrator.run()?;

    log::info!("DrishtiIO stopped");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.is_fatal() {
                log::error!("Fatal: {}", e);
            } else {
                log::error!("{}", e);
            }
            eprintln!("drishti-io: {}", e);
            ExitCode::FAILURE
        }
    }
}
