//! JSON frames exchanged over the hub WebSocket.
//!
//! Every frame is one text message, internally tagged by `type`:
//!
//! ```text
//! client → relay   {"type":"publish","payload":"1,2,3"}
//! relay → client   {"type":"welcome","id":"<uuid>","vector_len":3,"separator":","}
//!                  {"type":"deliver","sender":"<uuid>","payload":"1,2,3"}
//!                  {"type":"peer_joined","id":"<uuid>"}
//!                  {"type":"peer_left","id":"<uuid>"}
//!                  {"type":"notice","message":"..."}
//! ```
//!
//! The relay treats `payload` as opaque text. Only clients decode it.

use serde::{Deserialize, Serialize};

use crate::ConnectionId;

/// Frames a client sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Broadcast this payload to every live connection
    Publish { payload: String },
}

/// Frames the relay sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// First frame on every connection: who you are and what shape poses have
    Welcome {
        id: ConnectionId,
        vector_len: usize,
        separator: char,
    },

    /// Another connection (or this one, echoed) published a payload
    Deliver { sender: ConnectionId, payload: String },

    /// A connection joined (only when the relay announces presence)
    PeerJoined { id: ConnectionId },

    /// A connection left (only when the relay announces presence)
    PeerLeft { id: ConnectionId },

    /// The relay could not make sense of something this client sent
    Notice { message: String },
}

/// Errors converting frames to and from JSON text.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientFrame {
    pub fn publish(payload: impl Into<String>) -> Self {
        ClientFrame::Publish {
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl RelayFrame {
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Short name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayFrame::Welcome { .. } => "welcome",
            RelayFrame::Deliver { .. } => "deliver",
            RelayFrame::PeerJoined { .. } => "peer_joined",
            RelayFrame::PeerLeft { .. } => "peer_left",
            RelayFrame::Notice { .. } => "notice",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_publish_wire_shape() {
        let json = ClientFrame::publish("1,2,3").encode().unwrap();
        assert_eq!(json, r#"{"type":"publish","payload":"1,2,3"}"#);
    }

    #[test]
    fn test_deliver_wire_shape() {
        let sender = ConnectionId::new();
        let frame = RelayFrame::Deliver {
            sender,
            payload: "1,2,3".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "deliver",
                "sender": sender.to_string(),
                "payload": "1,2,3",
            })
        );
    }

    #[test]
    fn test_decode_welcome() {
        let id = ConnectionId::new();
        let text = format!(r#"{{"type":"welcome","id":"{id}","vector_len":7,"separator":";"}}"#);
        assert_eq!(
            RelayFrame::decode(&text).unwrap(),
            RelayFrame::Welcome {
                id,
                vector_len: 7,
                separator: ';'
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(ClientFrame::decode(r#"{"type":"subscribe"}"#).is_err());
        assert!(ClientFrame::decode("1,2,3").is_err());
        assert!(RelayFrame::decode(r#"{"type":"deliver","payload":"1,2,3"}"#).is_err());
    }

    #[test]
    fn test_kind() {
        let id = ConnectionId::new();
        assert_eq!(RelayFrame::PeerLeft { id }.kind(), "peer_left");
        assert_eq!(
            RelayFrame::Notice {
                message: "x".into()
            }
            .kind(),
            "notice"
        );
    }
}
