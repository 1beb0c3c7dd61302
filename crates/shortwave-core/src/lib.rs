//! # shortwave-core
//!
//! Channel registry, heartbeat supervision, and click history for the
//! shortwave realtime click feed.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Topic** - per-channel fan-out group of connections
//! - **Gateway** - channel registry and the publish entry point
//! - **HeartbeatSupervisor** - per-connection liveness probing
//! - **IdentityGenerator** - collision-checked id minting
//! - **HistoryStore / HistoryService** - persisted click logs and the glue
//!   that appends a click and fans it out
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Gateway   │────▶│   Topic     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   ▲
//!        ▼                   │
//! ┌─────────────┐     ┌─────────────┐
//! │  Heartbeat  │     │   History   │
//! └─────────────┘     └─────────────┘
//! ```

pub mod connection;
pub mod gateway;
pub mod heartbeat;
pub mod history;
pub mod ident;
pub mod topic;

pub use connection::{ConnectionId, DeliveryError, SubscriberHandle};
pub use gateway::{Gateway, GatewayConfig, GatewayError, GatewayStats};
pub use heartbeat::{
    HeartbeatConfig, HeartbeatError, HeartbeatSupervisor, StopCallback, SupervisorState,
};
pub use history::{HistoryError, HistoryRecord, HistoryService, HistoryStore, MemoryHistoryStore};
pub use ident::{IdentityError, IdentityGenerator};
pub use topic::{ChannelId, Topic, TopicError};
