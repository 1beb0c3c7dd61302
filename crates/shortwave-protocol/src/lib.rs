//! # shortwave-protocol
//!
//! Wire protocol definitions for the shortwave realtime click feed.
//!
//! This crate defines the JSON messages exchanged between viewers and the
//! server over an established WebSocket, plus the click payloads they carry.
//!
//! ## Message types
//!
//! - `ControlMessage` - subscribe/unsubscribe to a channel, heartbeat replies
//! - `ServerMessage` - click entries, acks, errors, heartbeat probes
//! - `ClickEntry` - one recorded visit with optional enrichment data
//!
//! ## Example
//!
//! ```rust
//! use shortwave_protocol::{codec, ControlMessage};
//!
//! let control = codec::decode_control(r#"{"action":"subscribe","channel":"abc123"}"#).unwrap();
//! assert_eq!(control, ControlMessage::subscribe("abc123"));
//! ```

pub mod codec;
pub mod entry;
pub mod frames;

pub use codec::ProtocolError;
pub use entry::{ClickEntry, Coordinates, DisplayDimensions, TimezoneInfo};
pub use frames::{ControlMessage, ServerMessage};
