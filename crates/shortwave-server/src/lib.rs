//! # shortwave-server
//!
//! Realtime click feed server for shortened links.
//!
//! Hosts the WebSocket endpoint viewers subscribe to, one channel per
//! tracked history id, and exposes the gateway the click-recording side
//! publishes through.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{app, run_server, AppState};
