//! Protocol messages for sync.

use crate::action::PlaybackAction;
use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A message sent by an endpoint to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ClientMessage {
    /// A new item was loaded locally.
    #[serde(rename_all = "camelCase")]
    SessionLoad {
        /// Item identifier (opaque to the protocol).
        item_id: String,
        /// Sender's wall clock at send time. Ignored by the relay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin_timestamp: Option<u64>,
    },
    /// A play, pause or seek happened locally.
    #[serde(rename_all = "camelCase")]
    PlaybackAction {
        /// Which action.
        action: PlaybackAction,
        /// Playback position in seconds.
        position: f64,
        /// Sender's wall clock at send time. Ignored by the relay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin_timestamp: Option<u64>,
    },
}

impl ClientMessage {
    /// Creates a session load message.
    pub fn session_load(item_id: impl Into<String>, origin_timestamp: u64) -> Self {
        ClientMessage::SessionLoad {
            item_id: item_id.into(),
            origin_timestamp: Some(origin_timestamp),
        }
    }

    /// Creates a playback action message.
    pub fn playback(action: PlaybackAction, position: f64, origin_timestamp: u64) -> Self {
        ClientMessage::PlaybackAction {
            action,
            position,
            origin_timestamp: Some(origin_timestamp),
        }
    }

    /// Returns the wire `kind` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::SessionLoad { .. } => "SessionLoad",
            ClientMessage::PlaybackAction { .. } => "PlaybackAction",
        }
    }

    /// Decodes and validates a message received from an endpoint.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let message: Self = decode_tagged(text)?;
        message.validate()?;
        Ok(message)
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Replaces the origin timestamp with the relay's, producing the
    /// broadcast form of this message.
    pub fn stamp(self, relay_timestamp: u64) -> RelayMessage {
        match self {
            ClientMessage::SessionLoad { item_id, .. } => RelayMessage::SessionLoad {
                item_id,
                relay_timestamp,
            },
            ClientMessage::PlaybackAction {
                action, position, ..
            } => RelayMessage::PlaybackAction {
                action,
                position,
                relay_timestamp,
            },
        }
    }

    fn validate(&self) -> ProtocolResult<()> {
        match self {
            ClientMessage::SessionLoad { item_id, .. } => validate_item_id(item_id),
            ClientMessage::PlaybackAction { position, .. } => validate_position(*position),
        }
    }
}

/// A message sent by the relay to an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RelayMessage {
    /// One-time acknowledgment sent when a connection is accepted.
    Handshake {
        /// Informational text.
        message: String,
    },
    /// A peer loaded a new item.
    #[serde(rename_all = "camelCase")]
    SessionLoad {
        /// Item identifier.
        item_id: String,
        /// Relay's wall clock when the message was broadcast.
        relay_timestamp: u64,
    },
    /// A peer played, paused or seeked.
    #[serde(rename_all = "camelCase")]
    PlaybackAction {
        /// Which action.
        action: PlaybackAction,
        /// Position in seconds at the sender.
        position: f64,
        /// Relay's wall clock when the message was broadcast.
        relay_timestamp: u64,
    },
}

impl RelayMessage {
    /// Creates a handshake message.
    pub fn handshake(message: impl Into<String>) -> Self {
        RelayMessage::Handshake {
            message: message.into(),
        }
    }

    /// Returns the wire `kind` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::Handshake { .. } => "Handshake",
            RelayMessage::SessionLoad { .. } => "SessionLoad",
            RelayMessage::PlaybackAction { .. } => "PlaybackAction",
        }
    }

    /// Decodes and validates a message received from the relay.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let message: Self = decode_tagged(text)?;
        match &message {
            RelayMessage::Handshake { .. } => {}
            RelayMessage::SessionLoad { item_id, .. } => validate_item_id(item_id)?,
            RelayMessage::PlaybackAction { position, .. } => validate_position(*position)?,
        }
        Ok(message)
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

/// Parses JSON first so syntax errors and unknown shapes are reported apart.
fn decode_tagged<T: DeserializeOwned>(text: &str) -> ProtocolResult<T> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| ProtocolError::Unrecognized(e.to_string()))
}

fn validate_item_id(item_id: &str) -> ProtocolResult<()> {
    if item_id.trim().is_empty() {
        return Err(ProtocolError::InvalidField {
            field: "itemId",
            reason: "must not be empty".into(),
        });
    }
    Ok(())
}

fn validate_position(position: f64) -> ProtocolResult<()> {
    if !position.is_finite() || position < 0.0 {
        return Err(ProtocolError::InvalidField {
            field: "position",
            reason: format!("must be a finite number >= 0, got {}", position),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decode_client_session_load() {
        let msg = ClientMessage::decode(
            r#"{"kind":"SessionLoad","itemId":"dQw4w9WgXcQ","originTimestamp":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(msg, ClientMessage::session_load("dQw4w9WgXcQ", 1_700_000_000_000));
    }

    #[test]
    fn decode_client_playback_without_origin_timestamp() {
        let msg =
            ClientMessage::decode(r#"{"kind":"PlaybackAction","action":"SEEK","position":12}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::PlaybackAction {
                action: PlaybackAction::Seek,
                position: 12.0,
                origin_timestamp: None,
            }
        );
    }

    #[test]
    fn malformed_and_unrecognized_are_distinct() {
        let err = ClientMessage::decode("{not json").unwrap_err();
        assert!(err.is_malformed());

        let err = ClientMessage::decode(r#"{"kind":"Handshake","message":"hi"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Unrecognized(_)));

        let err = ClientMessage::decode(r#"{"kind":"PlaybackAction","action":"STOP","position":1}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Unrecognized(_)));

        let err = ClientMessage::decode(r#"{"kind":"SessionLoad"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Unrecognized(_)));
    }

    #[test]
    fn negative_position_rejected() {
        let err = ClientMessage::decode(
            r#"{"kind":"PlaybackAction","action":"PLAY","position":-1.5,"originTimestamp":1}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidField {
                field: "position",
                ..
            }
        ));
    }

    #[test]
    fn empty_item_id_rejected() {
        let err = ClientMessage::decode(r#"{"kind":"SessionLoad","itemId":"  "}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "itemId", .. }));
    }

    #[test]
    fn stamp_replaces_origin_timestamp() {
        let stamped = ClientMessage::playback(PlaybackAction::Pause, 31.25, 5).stamp(99);
        assert_eq!(
            stamped,
            RelayMessage::PlaybackAction {
                action: PlaybackAction::Pause,
                position: 31.25,
                relay_timestamp: 99,
            }
        );

        let json = stamped.encode().unwrap();
        assert!(json.contains(r#""relayTimestamp":99"#));
        assert!(!json.contains("originTimestamp"));
    }

    #[test]
    fn relay_wire_shape() {
        let json = RelayMessage::SessionLoad {
            item_id: "abc".into(),
            relay_timestamp: 7,
        }
        .encode()
        .unwrap();
        assert_eq!(json, r#"{"kind":"SessionLoad","itemId":"abc","relayTimestamp":7}"#);

        let json = RelayMessage::handshake("welcome").encode().unwrap();
        assert_eq!(json, r#"{"kind":"Handshake","message":"welcome"}"#);
    }

    #[test]
    fn relay_decode_requires_timestamp() {
        let err = RelayMessage::decode(r#"{"kind":"PlaybackAction","action":"PLAY","position":1}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Unrecognized(_)));
    }

    proptest! {
        #[test]
        fn decode_never_panics(input in ".*") {
            let _ = ClientMessage::decode(&input);
            let _ = RelayMessage::decode(&input);
        }

        #[test]
        fn accepted_positions_are_non_negative(position in -1.0e6f64..1.0e6) {
            let text = format!(
                r#"{{"kind":"PlaybackAction","action":"PLAY","position":{}}}"#,
                position
            );
            match ClientMessage::decode(&text) {
                Ok(ClientMessage::PlaybackAction { position: p, .. }) => prop_assert!(p >= 0.0),
                Ok(other) => prop_assert!(false, "unexpected message {:?}", other),
                Err(_) => prop_assert!(position < 0.0),
            }
        }
    }
}
