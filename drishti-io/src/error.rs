//! Error types for DrishtiIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// DrishtiIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Listening socket could not be bound (fatal at startup)
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Status serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JPEG encoding failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// Source cannot currently produce frames
    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// Camera subprocess exited or failed to start
    #[error("Process failure: {0}")]
    ProcessFailure(String),

    /// Malformed or out-of-range client input
    #[error("{0}")]
    Protocol(String),

    /// Requested stream id does not exist
    #[error("Stream '{0}' not found")]
    StreamNotFound(String),

    /// Stream id registered twice
    #[error("Stream '{0}' already exists")]
    StreamExists(String),

    /// Failed to spawn a worker thread
    #[error("Thread spawn failed: {0}")]
    Thread(String),
}

impl Error {
    /// Whether this error should abort startup rather than degrade locally
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Bind { .. } | Error::Config(_))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Codec(e.to_string())
    }
}
