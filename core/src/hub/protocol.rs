/// Hub protocol types
///
/// JSON hub protocol, version 1. Every message is a JSON object terminated by
/// the ASCII record separator (0x1E); a single transport frame may carry
/// several of them.
use super::error::HubError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record separator terminating every JSON message
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Protocol name sent in the handshake
pub const PROTOCOL_NAME: &str = "json";

/// Protocol version sent in the handshake
pub const PROTOCOL_VERSION: u32 = 1;

const INVOCATION: u8 = 1;
const STREAM_ITEM: u8 = 2;
const COMPLETION: u8 = 3;
const STREAM_INVOCATION: u8 = 4;
const CANCEL_INVOCATION: u8 = 5;
const PING: u8 = 6;
const CLOSE: u8 = 7;

/// Handshake request (first message from client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION,
        }
    }
}

/// Handshake response (first message from server)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Decoded hub message
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Method call; no invocation id means no completion is expected
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    StreamItem {
        invocation_id: String,
        item: Value,
    },
    /// Result of an invocation; `error` set when the server method failed
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    StreamInvocation {
        invocation_id: String,
        target: String,
        arguments: Vec<Value>,
    },
    CancelInvocation {
        invocation_id: String,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Message type this client does not understand
    Other(u8),
}

/// Wire shape shared by every message type
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    item: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

impl From<&HubMessage> for RawMessage {
    fn from(message: &HubMessage) -> Self {
        match message {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => RawMessage {
                kind: INVOCATION,
                invocation_id: invocation_id.clone(),
                target: Some(target.clone()),
                arguments: Some(arguments.clone()),
                ..Default::default()
            },
            HubMessage::StreamItem {
                invocation_id,
                item,
            } => RawMessage {
                kind: STREAM_ITEM,
                invocation_id: Some(invocation_id.clone()),
                item: Some(item.clone()),
                ..Default::default()
            },
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => RawMessage {
                kind: COMPLETION,
                invocation_id: Some(invocation_id.clone()),
                result: result.clone(),
                error: error.clone(),
                ..Default::default()
            },
            HubMessage::StreamInvocation {
                invocation_id,
                target,
                arguments,
            } => RawMessage {
                kind: STREAM_INVOCATION,
                invocation_id: Some(invocation_id.clone()),
                target: Some(target.clone()),
                arguments: Some(arguments.clone()),
                ..Default::default()
            },
            HubMessage::CancelInvocation { invocation_id } => RawMessage {
                kind: CANCEL_INVOCATION,
                invocation_id: Some(invocation_id.clone()),
                ..Default::default()
            },
            HubMessage::Ping => RawMessage {
                kind: PING,
                ..Default::default()
            },
            HubMessage::Close {
                error,
                allow_reconnect,
            } => RawMessage {
                kind: CLOSE,
                error: error.clone(),
                allow_reconnect: Some(*allow_reconnect),
                ..Default::default()
            },
            HubMessage::Other(kind) => RawMessage {
                kind: *kind,
                ..Default::default()
            },
        }
    }
}

impl TryFrom<RawMessage> for HubMessage {
    type Error = HubError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let require_id = |id: Option<String>| {
            id.ok_or_else(|| {
                HubError::Protocol(format!("Message type {} without invocationId", raw.kind))
            })
        };

        let message = match raw.kind {
            INVOCATION => HubMessage::Invocation {
                invocation_id: raw.invocation_id,
                target: raw
                    .target
                    .ok_or_else(|| HubError::Protocol("Invocation without target".to_string()))?,
                arguments: raw.arguments.unwrap_or_default(),
            },
            STREAM_ITEM => HubMessage::StreamItem {
                invocation_id: require_id(raw.invocation_id)?,
                item: raw.item.unwrap_or(Value::Null),
            },
            COMPLETION => HubMessage::Completion {
                invocation_id: require_id(raw.invocation_id)?,
                result: raw.result,
                error: raw.error,
            },
            STREAM_INVOCATION => HubMessage::StreamInvocation {
                invocation_id: require_id(raw.invocation_id)?,
                target: raw.target.unwrap_or_default(),
                arguments: raw.arguments.unwrap_or_default(),
            },
            CANCEL_INVOCATION => HubMessage::CancelInvocation {
                invocation_id: require_id(raw.invocation_id)?,
            },
            PING => HubMessage::Ping,
            CLOSE => HubMessage::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect.unwrap_or(false),
            },
            other => HubMessage::Other(other),
        };
        Ok(message)
    }
}

/// Serialize a handshake request as a terminated record
pub fn encode_handshake(request: &HandshakeRequest) -> Result<String, HubError> {
    let mut record = serde_json::to_string(request)?;
    record.push(RECORD_SEPARATOR);
    Ok(record)
}

/// Serialize a message as a terminated record
pub fn encode(message: &HubMessage) -> Result<String, HubError> {
    let mut record = serde_json::to_string(&RawMessage::from(message))?;
    record.push(RECORD_SEPARATOR);
    Ok(record)
}

/// Split a frame into its records, rejecting a trailing unterminated record
pub fn split_records(frame: &str) -> Result<Vec<&str>, HubError> {
    if frame.is_empty() {
        return Ok(Vec::new());
    }
    if !frame.ends_with(RECORD_SEPARATOR) {
        return Err(HubError::Protocol("Message is incomplete".to_string()));
    }

    Ok(frame
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.is_empty())
        .collect())
}

/// Decode every message carried by a frame
pub fn decode(frame: &str) -> Result<Vec<HubMessage>, HubError> {
    split_records(frame)?
        .into_iter()
        .map(|record| {
            let raw: RawMessage = serde_json::from_str(record)
                .map_err(|e| HubError::Protocol(format!("Invalid message: {}", e)))?;
            HubMessage::try_from(raw)
        })
        .collect()
}

/// Decode the server's handshake response and any messages that follow it in
/// the same frame
pub fn decode_handshake(frame: &str) -> Result<Vec<HubMessage>, HubError> {
    let end = frame
        .find(RECORD_SEPARATOR)
        .ok_or_else(|| HubError::Handshake("Incomplete handshake response".to_string()))?;

    let response: HandshakeResponse = serde_json::from_str(&frame[..end])
        .map_err(|e| HubError::Handshake(format!("Invalid handshake response: {}", e)))?;

    if let Some(error) = response.error {
        return Err(HubError::Handshake(error));
    }

    decode(&frame[end + RECORD_SEPARATOR.len_utf8()..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_encoding() {
        let frame = encode_handshake(&HandshakeRequest::default()).unwrap();
        assert_eq!(frame, "{\"protocol\":\"json\",\"version\":1}\u{1e}");
    }

    #[test]
    fn test_invocation_encoding_omits_missing_id() {
        let frame = encode(&HubMessage::Invocation {
            invocation_id: None,
            target: "SubscribeToMachine".to_string(),
            arguments: vec![json!("M1")],
        })
        .unwrap();

        assert!(frame.ends_with(RECORD_SEPARATOR));
        assert!(frame.contains("\"type\":1"));
        assert!(frame.contains("\"target\":\"SubscribeToMachine\""));
        assert!(!frame.contains("invocationId"));
    }

    #[test]
    fn test_decode_multiple_records() {
        let frame = "{\"type\":6}\u{1e}{\"type\":3,\"invocationId\":\"4\",\"result\":12}\u{1e}";
        let messages = decode(frame).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], HubMessage::Ping);
        assert_eq!(
            messages[1],
            HubMessage::Completion {
                invocation_id: "4".to_string(),
                result: Some(json!(12)),
                error: None,
            }
        );
    }

    #[test]
    fn test_decode_rejects_incomplete_frame() {
        let err = decode("{\"type\":6}").unwrap_err();
        assert_eq!(err.code(), "PROTOCOL_ERROR");
    }

    #[test]
    fn test_decode_close_defaults_to_no_reconnect() {
        let messages = decode("{\"type\":7,\"error\":\"shutting down\"}\u{1e}").unwrap();
        assert_eq!(
            messages[0],
            HubMessage::Close {
                error: Some("shutting down".to_string()),
                allow_reconnect: false,
            }
        );
    }

    #[test]
    fn test_completion_without_id_is_protocol_error() {
        assert!(decode("{\"type\":3,\"result\":1}\u{1e}").is_err());
    }

    #[test]
    fn test_unknown_type_is_kept() {
        let messages = decode("{\"type\":8,\"sequenceId\":3}\u{1e}").unwrap();
        assert_eq!(messages, vec![HubMessage::Other(8)]);
    }

    #[test]
    fn test_handshake_response_with_trailing_messages() {
        let frame = "{}\u{1e}{\"type\":1,\"target\":\"MachineUpdate\",\"arguments\":[{}]}\u{1e}";
        let messages = decode_handshake(frame).unwrap();

        assert_eq!(messages.len(), 1);
        match &messages[0] {
            HubMessage::Invocation { target, .. } => assert_eq!(target, "MachineUpdate"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_handshake_error() {
        let err = decode_handshake("{\"error\":\"Requested protocol 'json' is not available.\"}\u{1e}")
            .unwrap_err();
        assert!(matches!(err, HubError::Handshake(_)));
    }
}
