//! JSON-Payloads der strukturierten Nachrichten
//!
//! | Typ                   | Payload                                              |
//! |-----------------------|------------------------------------------------------|
//! | `CONNECTION_REQUEST`  | `{"username": .., "room_id": ..}`                    |
//! | `CONNECTION_RESPONSE` | `{"result": "ok"}` / `{"result": "error", "reason": ..}` |
//! | `ROOM_STATE`          | `{"<username>": <spricht>, ...}`                     |
//!
//! `VOICE_DATA` ist opak, die Signal-Typen haben keinen Inhalt.

use funkraum_core::types::{RoomId, Username};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Handshake-Anfrage des Clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub username: Username,
    pub room_id: RoomId,
}

impl ConnectionRequest {
    pub fn neu(username: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            username: Username::new(username),
            room_id: RoomId::new(room_id),
        }
    }
}

/// Antwort des Servers auf eine Handshake-Anfrage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ConnectionResponse {
    Ok,
    Error { reason: String },
}

impl ConnectionResponse {
    pub fn fehler(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }

    pub fn ist_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Momentaufnahme eines Raums: Benutzername -> spricht gerade
///
/// Sortiert nach Benutzername, damit die JSON-Darstellung stabil ist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomState(pub BTreeMap<Username, bool>);

impl RoomState {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn einfuegen(&mut self, name: Username, spricht: bool) {
        self.0.insert(name, spricht);
    }

    /// `Some(spricht)` wenn der Benutzer im Raum ist
    pub fn spricht(&self, name: &str) -> Option<bool> {
        self.0.get(&Username::from(name)).copied()
    }

    pub fn enthaelt(&self, name: &str) -> bool {
        self.0.contains_key(&Username::from(name))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn namen(&self) -> impl Iterator<Item = &Username> {
        self.0.keys()
    }
}

impl FromIterator<(Username, bool)> for RoomState {
    fn from_iter<I: IntoIterator<Item = (Username, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
