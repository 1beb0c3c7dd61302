//! Frame types exchanged over a click feed connection.
//!
//! Clients steer channel membership with control frames; the server answers
//! with acks, errors, click data, and heartbeat probes. The JSON shapes live
//! in [`crate::codec`].

use crate::entry::ClickEntry;

/// A control frame sent by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Attach the issuing connection to a channel.
    Subscribe { channel: String },
    /// Detach the issuing connection from a channel.
    Unsubscribe { channel: String },
    /// Response to a server heartbeat probe.
    Heartbeat,
}

impl ControlMessage {
    /// Create a new Subscribe frame.
    #[must_use]
    pub fn subscribe(channel: impl Into<String>) -> Self {
        ControlMessage::Subscribe {
            channel: channel.into(),
        }
    }

    /// Create a new Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        ControlMessage::Unsubscribe {
            channel: channel.into(),
        }
    }
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// A click entry fanned out to channel subscribers.
    Data(ClickEntry),
    /// A request was rejected; the connection stays open.
    Error { message: String },
    /// A control request succeeded.
    Ack,
    /// Liveness probe; the client is expected to answer in kind.
    Heartbeat,
}

impl ServerMessage {
    /// Create a new Error frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_constructors() {
        assert_eq!(
            ControlMessage::subscribe("abc123"),
            ControlMessage::Subscribe {
                channel: "abc123".to_string()
            }
        );
        assert_eq!(
            ControlMessage::unsubscribe("abc123"),
            ControlMessage::Unsubscribe {
                channel: "abc123".to_string()
            }
        );
    }

    #[test]
    fn error_constructor() {
        assert_eq!(
            ServerMessage::error("Channel not found"),
            ServerMessage::Error {
                message: "Channel not found".to_string()
            }
        );
    }
}
