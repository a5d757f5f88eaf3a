//! Protocol servers built on the stream manager
//!
//! - [`http`]: MJPEG streams, JSON status, `/switch`, viewer pages
//! - [`tcp`]: Length-prefixed raw JPEG with inline command bytes
//! - [`control`]: Line-oriented text control protocol
//! - [`orchestrator`]: Starts and stops all of the above

pub mod control;
pub mod http;
pub mod listener;
pub mod orchestrator;
pub mod tcp;
pub mod wire;

pub use orchestrator::Orchestrator;
