//! JSON codec for click feed frames.
//!
//! Frames are single JSON texts over an established WebSocket. Decoding a
//! control frame is two-staged: a payload that is not JSON at all and a JSON
//! payload missing its required fields produce different error replies, so
//! the two cases are distinct variants here.

use serde_json::Value;
use thiserror::Error;

use crate::entry::ClickEntry;
use crate::frames::{ControlMessage, ServerMessage};

/// Tag value marking a heartbeat frame in either direction.
const HEARTBEAT_TYPE: &str = "heartbeat";

/// Message text carried by an ack frame.
const ACK_MESSAGE: &str = "OK";

/// Errors that can occur while encoding or decoding frames.
///
/// The display text of `Parse` and `Malformed` is the exact message sent
/// back to the offending connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload was not valid JSON.
    #[error("Unable to parse payload")]
    Parse,

    /// Payload was JSON but did not carry the required fields.
    #[error("Malformed payload")]
    Malformed,

    /// A frame could not be serialized.
    #[error("Unable to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Decode a client control frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Parse`] for non-JSON payloads and
/// [`ProtocolError::Malformed`] for JSON that lacks a string `action` and
/// `channel` (heartbeat replies carry a `type` tag instead). An empty
/// channel name and an unrecognized action are both malformed.
pub fn decode_control(raw: &str) -> Result<ControlMessage, ProtocolError> {
    let payload: Value = serde_json::from_str(raw).map_err(|_| ProtocolError::Parse)?;

    if payload.get("type").and_then(Value::as_str) == Some(HEARTBEAT_TYPE) {
        return Ok(ControlMessage::Heartbeat);
    }

    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::Malformed)?;
    let channel = payload
        .get("channel")
        .and_then(Value::as_str)
        .filter(|channel| !channel.is_empty())
        .ok_or(ProtocolError::Malformed)?;

    match action {
        "subscribe" => Ok(ControlMessage::subscribe(channel)),
        "unsubscribe" => Ok(ControlMessage::unsubscribe(channel)),
        _ => Err(ProtocolError::Malformed),
    }
}

/// Encode a client control frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_control(message: &ControlMessage) -> Result<String, ProtocolError> {
    let value = match message {
        ControlMessage::Subscribe { channel } => {
            serde_json::json!({ "action": "subscribe", "channel": channel })
        }
        ControlMessage::Unsubscribe { channel } => {
            serde_json::json!({ "action": "unsubscribe", "channel": channel })
        }
        ControlMessage::Heartbeat => serde_json::json!({ "type": HEARTBEAT_TYPE }),
    };

    Ok(serde_json::to_string(&value)?)
}

/// Encode a server frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_server(message: &ServerMessage) -> Result<String, ProtocolError> {
    let value = match message {
        ServerMessage::Ack => {
            serde_json::json!({ "data": { "message": ACK_MESSAGE } })
        }
        ServerMessage::Error { message } => {
            serde_json::json!({ "error": true, "data": { "message": message } })
        }
        ServerMessage::Data(entry) => {
            let entry = serde_json::to_value(entry)?;
            serde_json::json!({ "data": entry })
        }
        ServerMessage::Heartbeat => serde_json::json!({ "type": HEARTBEAT_TYPE }),
    };

    Ok(serde_json::to_string(&value)?)
}

/// Decode a server frame.
///
/// Click entries are told apart from acks by their mandatory `time` field.
///
/// # Errors
///
/// Returns [`ProtocolError::Parse`] for non-JSON payloads and
/// [`ProtocolError::Malformed`] for JSON that matches none of the four
/// server shapes.
pub fn decode_server(raw: &str) -> Result<ServerMessage, ProtocolError> {
    let payload: Value = serde_json::from_str(raw).map_err(|_| ProtocolError::Parse)?;

    if payload.get("type").and_then(Value::as_str) == Some(HEARTBEAT_TYPE) {
        return Ok(ServerMessage::Heartbeat);
    }

    let data = payload.get("data").ok_or(ProtocolError::Malformed)?;

    if payload.get("error").and_then(Value::as_bool) == Some(true) {
        let message = data
            .get("message")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::Malformed)?;
        return Ok(ServerMessage::error(message));
    }

    if data.get("time").is_some() {
        let entry: ClickEntry =
            serde_json::from_value(data.clone()).map_err(|_| ProtocolError::Malformed)?;
        return Ok(ServerMessage::Data(entry));
    }

    if data.get("message").and_then(Value::as_str) == Some(ACK_MESSAGE) {
        return Ok(ServerMessage::Ack);
    }

    Err(ProtocolError::Malformed)
}
