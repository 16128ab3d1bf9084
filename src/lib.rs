//! dexft library
//!
//! Pull, push and list files matching a pattern on another host over a
//! plain TCP connection.

pub mod cli;
pub mod config;
pub mod logger;
pub mod net_async;
pub mod pattern;
pub mod protocol;
pub mod protocol_core;
pub mod transfer;

pub use config::{ClientConfig, Config, ServerConfig};
pub use net_async::SessionSummary;
pub use protocol::Command;
