// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Registry
//!
//! Tracks every connected participant: its generated display name, the
//! public key it announced during the handshake, and the outbound queue of
//! the connection that owns it.
//!
//! Both lookup indices (by connection and by display name) live behind a
//! single lock so that a participant is never visible in one index but not
//! the other. Delivery never happens under that lock: recipients are
//! snapshotted first, then frames are pushed onto each connection's
//! non-blocking outbound queue.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::Rng;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Theme words used as the base of generated display names.
pub const THEME_WORDS: [&str; 10] = [
    "HiddenCat",
    "StealthyDog",
    "LoneWolf",
    "BoldEagle",
    "CleverFox",
    "BraveBear",
    "MysticDragon",
    "WiseSerpent",
    "BlackPanther",
    "SwiftDeer",
];

/// Inclusive range of the numeric suffix appended to a theme word.
const SUFFIX_MIN: u16 = 1000;
const SUFFIX_MAX: u16 = 9999;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a transport-level connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw identifier. Callers must keep identifiers unique among
    /// live connections of the same registry.
    pub const fn new(raw: u64) -> Self {
        ConnectionId(raw)
    }

    /// Allocates a fresh process-unique identifier.
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A pre-encoded text frame queued for a connection.
///
/// The text is reference counted so a broadcast shares one allocation
/// across all recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub text: Arc<str>,
}

impl OutboundFrame {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        OutboundFrame { text: text.into() }
    }
}

/// Addressing information the transport hands to the registry.
///
/// The registry keeps a clone of the sender purely to enqueue frames; it
/// never closes the connection. The transport owns the receiving half and
/// the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        ConnectionHandle { id, outbound }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Snapshot of a connected participant.
///
/// Returned by value from every lookup; mutating the registry afterwards
/// does not change a snapshot already handed out.
#[derive(Debug, Clone)]
pub struct Participant {
    connection: ConnectionHandle,
    display_name: String,
    public_key: String,
}

impl Participant {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The announced public key, or an empty string before the handshake.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// A participant is registered once it has a non-empty public key.
    pub fn is_registered(&self) -> bool {
        !self.public_key.is_empty()
    }

    /// Queues a frame on this participant's connection without blocking.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        deliver(self.connection.id, &self.connection.outbound, frame)
    }
}

/// One line of the roster: a registered participant and its public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub display_name: String,
    pub public_key: String,
}

#[derive(Default)]
struct Indices {
    by_connection: HashMap<ConnectionId, Participant>,
    by_name: HashMap<String, ConnectionId>,
}

impl Indices {
    fn generate_unique_name(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let word = THEME_WORDS[rng.random_range(0..THEME_WORDS.len())];
            let suffix = rng.random_range(SUFFIX_MIN..=SUFFIX_MAX);
            let name = format!("{word}{suffix}");
            if !self.by_name.contains_key(&name) {
                return name;
            }
        }
    }
}

/// Thread-safe registry of connected participants.
///
/// Construct one per server instance and share it through an `Arc`.
pub struct ConnectionRegistry {
    indices: RwLock<Indices>,
}

impl ConnectionRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        ConnectionRegistry {
            indices: RwLock::new(Indices::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.indices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.indices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an unregistered participant for `handle` under a freshly
    /// generated display name.
    ///
    /// If the connection is already known, the existing participant is
    /// returned unchanged.
    pub fn add_participant(&self, handle: ConnectionHandle) -> Participant {
        let mut indices = self.write();
        if let Some(existing) = indices.by_connection.get(&handle.id) {
            return existing.clone();
        }

        let display_name = indices.generate_unique_name();
        let participant = Participant {
            connection: handle,
            display_name: display_name.clone(),
            public_key: String::new(),
        };
        let id = participant.connection_id();
        indices.by_name.insert(display_name, id);
        indices.by_connection.insert(id, participant.clone());
        participant
    }

    /// Removes the participant owning `id` from both indices and returns it.
    ///
    /// Returns `None` if the connection is unknown, so calling this twice is
    /// harmless.
    pub fn take_participant(&self, id: ConnectionId) -> Option<Participant> {
        let mut indices = self.write();
        let participant = indices.by_connection.remove(&id)?;
        indices.by_name.remove(&participant.display_name);
        Some(participant)
    }

    /// Removes the participant owning `id` and returns its freed display name.
    pub fn remove_participant(&self, id: ConnectionId) -> Option<String> {
        self.take_participant(id).map(|p| p.display_name)
    }

    pub fn find_by_name(&self, name: &str) -> Option<Participant> {
        let indices = self.read();
        let id = indices.by_name.get(name)?;
        indices.by_connection.get(id).cloned()
    }

    pub fn find_by_connection(&self, id: ConnectionId) -> Option<Participant> {
        self.read().by_connection.get(&id).cloned()
    }

    /// Stores the public key of the participant owning `id`.
    ///
    /// Returns false (and changes nothing) if the connection is unknown.
    pub fn set_public_key(&self, id: ConnectionId, key: &str) -> bool {
        match self.write().by_connection.get_mut(&id) {
            Some(participant) => {
                participant.public_key = key.to_string();
                true
            }
            None => false,
        }
    }

    /// Snapshot of every registered participant, in no particular order.
    pub fn list_registered(&self) -> Vec<RosterEntry> {
        self.read()
            .by_connection
            .values()
            .filter(|p| p.is_registered())
            .map(|p| RosterEntry {
                display_name: p.display_name.clone(),
                public_key: p.public_key.clone(),
            })
            .collect()
    }

    /// Queues `frame` for every registered participant except the one owning
    /// `exclude`. Returns how many queues accepted the frame.
    pub fn broadcast(&self, frame: &OutboundFrame, exclude: Option<ConnectionId>) -> usize {
        let recipients: Vec<(ConnectionId, mpsc::Sender<OutboundFrame>)> = {
            let indices = self.read();
            indices
                .by_connection
                .values()
                .filter(|p| p.is_registered() && Some(p.connection_id()) != exclude)
                .map(|p| (p.connection_id(), p.connection.outbound.clone()))
                .collect()
        };

        recipients
            .iter()
            .filter(|(id, tx)| deliver(*id, tx, frame.clone()))
            .count()
    }

    /// Queues `frame` for the participant named `name`, registered or not.
    ///
    /// Returns whether such a participant exists and its queue accepted the
    /// frame.
    pub fn unicast(&self, name: &str, frame: OutboundFrame) -> bool {
        let target = {
            let indices = self.read();
            indices
                .by_name
                .get(name)
                .and_then(|id| indices.by_connection.get(id))
                .map(|p| (p.connection_id(), p.connection.outbound.clone()))
        };

        match target {
            Some((id, tx)) => deliver(id, &tx, frame),
            None => false,
        }
    }

    /// Returns the number of currently connected participants.
    pub fn connected_count(&self) -> usize {
        self.read().by_connection.len()
    }

    /// Returns the number of participants that completed the handshake.
    pub fn registered_count(&self) -> usize {
        self.read()
            .by_connection
            .values()
            .filter(|p| p.is_registered())
            .count()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(id: ConnectionId, tx: &mpsc::Sender<OutboundFrame>, frame: OutboundFrame) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("Outbound queue full for {}, dropping frame", id);
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Outbound queue closed for {}", id);
            false
        }
    }
}
