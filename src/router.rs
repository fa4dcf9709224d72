// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Router
//!
//! Turns each inbound frame into registry updates and outbound frames.
//!
//! A connection is either unregistered (no public key yet) or registered.
//! The state is read from the registry on every frame; the router keeps no
//! per-connection state of its own. Until a connection registers, the only
//! accepted message is `register_key` and everything else is answered with
//! a fresh `request_key` prompt.

use std::sync::Arc;

use tracing::{debug, error};

use crate::connection_registry::{
    ConnectionHandle, ConnectionId, ConnectionRegistry, OutboundFrame, Participant,
};
use crate::protocol::{
    self, ClientMessage, DecodeError, MessageKind, Presence, ServerMessage, UserEntry,
    INVALID_FORMAT_MESSAGE,
};

/// Default name of the shared room that turns typing signals into broadcasts.
pub const DEFAULT_GENERAL_ROOM: &str = "General Room";

/// Why a frame produced no outbound traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnknownType,
    MissingFields(MessageKind),
    /// No participant with that name, or its outbound queue refused the frame.
    RecipientUnavailable,
}

/// What the router did with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The sending connection is not (or no longer) in the registry.
    UnknownConnection,
    /// The frame could not be parsed; an `error` frame was sent back.
    Rejected,
    /// The sender is unregistered; a `request_key` prompt was sent back.
    Prompted,
    /// The sender completed (or repeated) the handshake.
    Registered { announced_to: usize },
    /// The frame was relayed to `delivered` recipients.
    Relayed { delivered: usize },
    Dropped(DropReason),
}

/// Dispatches protocol frames between participants of one registry.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    general_room: String,
}

impl MessageRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, general_room: impl Into<String>) -> Self {
        MessageRouter {
            registry,
            general_room: general_room.into(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn general_room(&self) -> &str {
        &self.general_room
    }

    /// Registers a new connection and prompts it for its public key.
    pub fn connection_opened(&self, handle: ConnectionHandle) -> Participant {
        let participant = self.registry.add_participant(handle);
        debug!(
            "{} joined as {}",
            participant.connection_id(),
            participant.display_name()
        );
        self.reply(&participant, &ServerMessage::RequestKey);
        participant
    }

    /// Evicts a closed connection.
    ///
    /// If it had completed the handshake, every remaining registered
    /// participant is told it went offline. Returns the evicted participant,
    /// or `None` if the connection was already gone.
    pub fn connection_closed(&self, id: ConnectionId) -> Option<Participant> {
        let participant = self.registry.take_participant(id)?;
        debug!("{} left ({})", id, participant.display_name());

        if participant.is_registered() {
            let departure = ServerMessage::UserStatus {
                username: participant.display_name().to_string(),
                public_key: String::new(),
                status: Presence::Offline,
            };
            if let Some(frame) = encode(&departure) {
                self.registry.broadcast(&frame, None);
            }
        }
        Some(participant)
    }

    /// Handles one inbound text frame from connection `id`.
    pub fn route(&self, id: ConnectionId, text: &str) -> RouteOutcome {
        let Some(sender) = self.registry.find_by_connection(id) else {
            return RouteOutcome::UnknownConnection;
        };

        let message = match protocol::decode_client_message(text) {
            Ok(message) => message,
            Err(DecodeError::Malformed(reason)) => {
                debug!("{} sent a malformed frame: {}", id, reason);
                self.reply(
                    &sender,
                    &ServerMessage::Error {
                        message: INVALID_FORMAT_MESSAGE.to_string(),
                    },
                );
                return RouteOutcome::Rejected;
            }
            Err(DecodeError::MissingFields {
                kind: MessageKind::RegisterKey,
                ..
            }) => {
                debug!("{} sent register_key without a key", id);
                return RouteOutcome::Dropped(DropReason::MissingFields(MessageKind::RegisterKey));
            }
            Err(_) if !sender.is_registered() => return self.prompt(&sender),
            Err(DecodeError::UnknownType(tag)) => {
                debug!("{} sent unknown message type {:?}", id, tag);
                return RouteOutcome::Dropped(DropReason::UnknownType);
            }
            Err(DecodeError::MissingFields { kind, reason }) => {
                debug!("{} sent incomplete {}: {}", id, kind, reason);
                return RouteOutcome::Dropped(DropReason::MissingFields(kind));
            }
        };

        match message {
            ClientMessage::RegisterKey { public_key } => self.register(&sender, &public_key),
            _ if !sender.is_registered() => self.prompt(&sender),
            ClientMessage::PrivateEncrypted {
                recipient,
                key,
                iv,
                payload,
            } => {
                let relayed = ServerMessage::PrivateEncrypted {
                    sender: sender.display_name().to_string(),
                    key,
                    iv,
                    payload,
                };
                self.unicast(&recipient, &relayed)
            }
            ClientMessage::PublicEncrypted { iv, payload, keys } => {
                let relayed = ServerMessage::PublicEncrypted {
                    sender: sender.display_name().to_string(),
                    iv,
                    payload,
                    keys,
                };
                self.broadcast_from(&sender, &relayed)
            }
            ClientMessage::StartTyping { recipient } => {
                let signal = ServerMessage::UserTyping {
                    sender: sender.display_name().to_string(),
                    recipient: recipient.clone(),
                };
                self.typing(&sender, &recipient, &signal)
            }
            ClientMessage::StopTyping { recipient } => {
                let signal = ServerMessage::UserStoppedTyping {
                    sender: sender.display_name().to_string(),
                    recipient: recipient.clone(),
                };
                self.typing(&sender, &recipient, &signal)
            }
        }
    }

    fn register(&self, sender: &Participant, public_key: &str) -> RouteOutcome {
        let id = sender.connection_id();
        if !self.registry.set_public_key(id, public_key) {
            return RouteOutcome::UnknownConnection;
        }
        let name = sender.display_name().to_string();
        debug!("{} registered as {}", id, name);

        self.reply(
            sender,
            &ServerMessage::Welcome {
                username: name.clone(),
            },
        );

        let users = self
            .registry
            .list_registered()
            .into_iter()
            .map(|entry| UserEntry {
                username: entry.display_name,
                public_key: entry.public_key,
                status: Presence::Online,
            })
            .collect();
        self.reply(sender, &ServerMessage::UserList { users });

        let arrival = ServerMessage::UserStatus {
            username: name,
            public_key: public_key.to_string(),
            status: Presence::Online,
        };
        let announced_to = match encode(&arrival) {
            Some(frame) => self.registry.broadcast(&frame, Some(id)),
            None => 0,
        };
        RouteOutcome::Registered { announced_to }
    }

    fn typing(
        &self,
        sender: &Participant,
        recipient: &str,
        signal: &ServerMessage,
    ) -> RouteOutcome {
        if recipient == self.general_room {
            self.broadcast_from(sender, signal)
        } else {
            self.unicast(recipient, signal)
        }
    }

    fn prompt(&self, sender: &Participant) -> RouteOutcome {
        debug!(
            "{} sent traffic before registering",
            sender.connection_id()
        );
        self.reply(sender, &ServerMessage::RequestKey);
        RouteOutcome::Prompted
    }

    fn unicast(&self, recipient: &str, message: &ServerMessage) -> RouteOutcome {
        let delivered = encode(message)
            .map(|frame| self.registry.unicast(recipient, frame))
            .unwrap_or(false);
        if delivered {
            RouteOutcome::Relayed { delivered: 1 }
        } else {
            RouteOutcome::Dropped(DropReason::RecipientUnavailable)
        }
    }

    fn broadcast_from(&self, sender: &Participant, message: &ServerMessage) -> RouteOutcome {
        let delivered = encode(message)
            .map(|frame| {
                self.registry
                    .broadcast(&frame, Some(sender.connection_id()))
            })
            .unwrap_or(0);
        RouteOutcome::Relayed { delivered }
    }

    fn reply(&self, participant: &Participant, message: &ServerMessage) {
        if let Some(frame) = encode(message) {
            participant.send(frame);
        }
    }
}

fn encode(message: &ServerMessage) -> Option<OutboundFrame> {
    match protocol::encode_server_message(message) {
        Ok(text) => Some(OutboundFrame::new(text)),
        Err(e) => {
            error!("Failed to encode outbound frame: {}", e);
            None
        }
    }
}
