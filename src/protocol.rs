// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Protocol
//!
//! Every frame is a flat JSON object tagged by a `type` string. Inbound
//! frames decode into [`ClientMessage`]; outbound frames are built from
//! [`ServerMessage`]. Encrypted fields (`key`, `iv`, `payload`, `keys`) are
//! opaque strings that the relay carries through untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Text of the `error` frame sent for unparseable input.
pub const INVALID_FORMAT_MESSAGE: &str = "Invalid message format.";

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Completes the handshake by announcing the client's public key.
    RegisterKey {
        #[serde(rename = "publicKey")]
        public_key: String,
    },
    /// Direct message for a single recipient.
    PrivateEncrypted {
        recipient: String,
        key: String,
        iv: String,
        payload: String,
    },
    /// Message for everyone, with one wrapped symmetric key per recipient name.
    PublicEncrypted {
        iv: String,
        payload: String,
        keys: BTreeMap<String, String>,
    },
    StartTyping {
        recipient: String,
    },
    StopTyping {
        recipient: String,
    },
}

impl ClientMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ClientMessage::RegisterKey { .. } => MessageKind::RegisterKey,
            ClientMessage::PrivateEncrypted { .. } => MessageKind::PrivateEncrypted,
            ClientMessage::PublicEncrypted { .. } => MessageKind::PublicEncrypted,
            ClientMessage::StartTyping { .. } => MessageKind::StartTyping,
            ClientMessage::StopTyping { .. } => MessageKind::StopTyping,
        }
    }
}

/// The `type` tags a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    RegisterKey,
    PrivateEncrypted,
    PublicEncrypted,
    StartTyping,
    StopTyping,
}

impl MessageKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "register_key" => Some(MessageKind::RegisterKey),
            "private_encrypted" => Some(MessageKind::PrivateEncrypted),
            "public_encrypted" => Some(MessageKind::PublicEncrypted),
            "start_typing" => Some(MessageKind::StartTyping),
            "stop_typing" => Some(MessageKind::StopTyping),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::RegisterKey => "register_key",
            MessageKind::PrivateEncrypted => "private_encrypted",
            MessageKind::PublicEncrypted => "public_encrypted",
            MessageKind::StartTyping => "start_typing",
            MessageKind::StopTyping => "stop_typing",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence value carried by roster entries and status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

/// One roster entry inside a `user_list` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub status: Presence,
}

/// Messages the relay sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake prompt: the client must answer with `register_key`.
    RequestKey,
    Welcome {
        username: String,
    },
    UserList {
        users: Vec<UserEntry>,
    },
    UserStatus {
        username: String,
        #[serde(rename = "publicKey")]
        public_key: String,
        status: Presence,
    },
    PrivateEncrypted {
        sender: String,
        key: String,
        iv: String,
        payload: String,
    },
    PublicEncrypted {
        sender: String,
        iv: String,
        payload: String,
        keys: BTreeMap<String, String>,
    },
    UserTyping {
        sender: String,
        recipient: String,
    },
    UserStoppedTyping {
        sender: String,
        recipient: String,
    },
    Error {
        message: String,
    },
}

/// Why an inbound frame could not be turned into a [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Not JSON, or JSON that is not an object.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// A JSON object whose `type` is absent or not one we handle.
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    /// A known `type` without the fields it requires.
    #[error("{kind} frame is missing required fields: {reason}")]
    MissingFields { kind: MessageKind, reason: String },
}

/// Decodes one inbound text frame.
///
/// Unknown extra fields are ignored. An empty `publicKey` counts as missing,
/// since an empty key would leave the sender unregistered.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let tag = match &value {
        Value::Object(fields) => fields
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => return Err(DecodeError::Malformed("expected a JSON object".to_string())),
    };
    let kind = MessageKind::from_tag(&tag).ok_or(DecodeError::UnknownType(tag))?;

    let message: ClientMessage =
        serde_json::from_value(value).map_err(|e| DecodeError::MissingFields {
            kind,
            reason: e.to_string(),
        })?;

    if let ClientMessage::RegisterKey { public_key } = &message {
        if public_key.is_empty() {
            return Err(DecodeError::MissingFields {
                kind,
                reason: "publicKey is empty".to_string(),
            });
        }
    }

    Ok(message)
}

/// Encodes an outbound message as a JSON text frame.
pub fn encode_server_message(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_register_key() {
        let msg = decode_client_message(r#"{"type":"register_key","publicKey":"PEMDATA"}"#);
        assert_eq!(
            msg,
            Ok(ClientMessage::RegisterKey {
                public_key: "PEMDATA".to_string()
            })
        );
    }

    #[test]
    fn test_decode_private_encrypted_ignores_extra_fields() {
        let text = json!({
            "type": "private_encrypted",
            "recipient": "LoneWolf1234",
            "key": "k",
            "iv": "i",
            "payload": "p",
            "sender": "spoofed"
        })
        .to_string();

        let msg = decode_client_message(&text).unwrap();
        assert_eq!(
            msg,
            ClientMessage::PrivateEncrypted {
                recipient: "LoneWolf1234".to_string(),
                key: "k".to_string(),
                iv: "i".to_string(),
                payload: "p".to_string(),
            }
        );
        assert_eq!(msg.kind(), MessageKind::PrivateEncrypted);
    }

    #[test]
    fn test_decode_public_encrypted_keys() {
        let text = json!({
            "type": "public_encrypted",
            "iv": "i",
            "payload": "p",
            "keys": {"A": "ka", "B": "kb"}
        })
        .to_string();

        match decode_client_message(&text).unwrap() {
            ClientMessage::PublicEncrypted { keys, .. } => {
                assert_eq!(keys.len(), 2);
                assert_eq!(keys["A"], "ka");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_not_json_is_malformed() {
        assert!(matches!(
            decode_client_message("not json at all"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_non_object_is_malformed() {
        assert!(matches!(
            decode_client_message(r#"["register_key"]"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_client_message("42"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_unknown_and_missing_type() {
        assert_eq!(
            decode_client_message(r#"{"type":"shout"}"#),
            Err(DecodeError::UnknownType("shout".to_string()))
        );
        assert_eq!(
            decode_client_message(r#"{"recipient":"x"}"#),
            Err(DecodeError::UnknownType(String::new()))
        );
    }

    #[test]
    fn test_decode_missing_fields() {
        let err = decode_client_message(r#"{"type":"private_encrypted","recipient":"x"}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MissingFields {
                kind: MessageKind::PrivateEncrypted,
                ..
            }
        ));

        let err = decode_client_message(r#"{"type":"start_typing"}"#).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MissingFields {
                kind: MessageKind::StartTyping,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_non_string_field_is_missing() {
        let err = decode_client_message(r#"{"type":"stop_typing","recipient":7}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingFields { .. }));
    }

    #[test]
    fn test_decode_empty_public_key_is_missing() {
        let err = decode_client_message(r#"{"type":"register_key","publicKey":""}"#).unwrap_err();
        assert_eq!(
            err,
            DecodeError::MissingFields {
                kind: MessageKind::RegisterKey,
                reason: "publicKey is empty".to_string(),
            }
        );
    }

    #[test]
    fn test_message_kind_tags() {
        for kind in [
            MessageKind::RegisterKey,
            MessageKind::PrivateEncrypted,
            MessageKind::PublicEncrypted,
            MessageKind::StartTyping,
            MessageKind::StopTyping,
        ] {
            assert_eq!(MessageKind::from_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::from_tag("welcome"), None);
    }

    #[test]
    fn test_encode_request_key() {
        let text = encode_server_message(&ServerMessage::RequestKey).unwrap();
        assert_eq!(text, r#"{"type":"request_key"}"#);
    }

    #[test]
    fn test_encode_user_list_field_names() {
        let msg = ServerMessage::UserList {
            users: vec![UserEntry {
                username: "CleverFox4242".to_string(),
                public_key: "PEM".to_string(),
                status: Presence::Online,
            }],
        };
        let value: Value = serde_json::from_str(&encode_server_message(&msg).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "user_list",
                "users": [{"username": "CleverFox4242", "publicKey": "PEM", "status": "online"}]
            })
        );
    }

    #[test]
    fn test_encode_user_status_and_typing() {
        let status = ServerMessage::UserStatus {
            username: "A".to_string(),
            public_key: String::new(),
            status: Presence::Offline,
        };
        let value: Value =
            serde_json::from_str(&encode_server_message(&status).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "user_status", "username": "A", "publicKey": "", "status": "offline"})
        );

        let typing = ServerMessage::UserStoppedTyping {
            sender: "A".to_string(),
            recipient: "B".to_string(),
        };
        let value: Value =
            serde_json::from_str(&encode_server_message(&typing).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "user_stopped_typing", "sender": "A", "recipient": "B"})
        );
    }

    #[test]
    fn test_encode_error() {
        let msg = ServerMessage::Error {
            message: INVALID_FORMAT_MESSAGE.to_string(),
        };
        let value: Value = serde_json::from_str(&encode_server_message(&msg).unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], INVALID_FORMAT_MESSAGE);
    }
}
