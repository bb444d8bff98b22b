//! Frame und Nachrichtentypen
//!
//! Ein `Frame` ist genau eine Protokollnachricht: Typ plus opaker Payload.
//! Die Laenge wird nicht separat gespeichert, sie ergibt sich immer aus
//! dem Payload (`laenge() == payload.len()`).

use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::payload::{ConnectionRequest, ConnectionResponse, RoomState};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Groesse des Headers: Typ (u32 BE) + Laenge (u32 BE)
pub const HEADER_GROESSE: usize = 8;

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Die sieben Nachrichtentypen mit ihren festen Wire-IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    ConnectionRequest = 1,
    ConnectionResponse = 2,
    VoiceData = 3,
    StartTalking = 4,
    StopTalking = 5,
    RoomState = 6,
    Disconnect = 7,
}

impl MessageType {
    /// Alle Typen in Wire-Reihenfolge
    pub const ALLE: [MessageType; 7] = [
        MessageType::ConnectionRequest,
        MessageType::ConnectionResponse,
        MessageType::VoiceData,
        MessageType::StartTalking,
        MessageType::StopTalking,
        MessageType::RoomState,
        MessageType::Disconnect,
    ];

    /// Wire-ID des Typs
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Stabiler Name, z.B. fuer Log-Felder und Metrik-Labels
    pub fn name(self) -> &'static str {
        match self {
            MessageType::ConnectionRequest => "CONNECTION_REQUEST",
            MessageType::ConnectionResponse => "CONNECTION_RESPONSE",
            MessageType::VoiceData => "VOICE_DATA",
            MessageType::StartTalking => "START_TALKING",
            MessageType::StopTalking => "STOP_TALKING",
            MessageType::RoomState => "ROOM_STATE",
            MessageType::Disconnect => "DISCONNECT",
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = ProtocolError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        MessageType::ALLE
            .into_iter()
            .find(|typ| typ.id() == id)
            .ok_or(ProtocolError::UnknownMessageType(id))
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Eine Protokollnachricht
///
/// Der Payload ist `Bytes`, damit ein Broadcast denselben Frame ohne Kopie
/// an alle Raum-Mitglieder weitergeben kann.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub typ: MessageType,
    pub payload: Bytes,
}

impl Frame {
    /// Erstellt einen Frame aus Typ und beliebigem Payload
    pub fn neu(typ: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            typ,
            payload: payload.into(),
        }
    }

    /// Frame mit JSON-serialisiertem Payload
    pub fn json<T: Serialize>(typ: MessageType, wert: &T) -> ProtocolResult<Self> {
        let payload = serde_json::to_vec(wert)?;
        Ok(Self::neu(typ, payload))
    }

    /// Frame ohne Inhalt (START_TALKING, STOP_TALKING, DISCONNECT)
    pub fn signal(typ: MessageType) -> Self {
        Self::neu(typ, Bytes::new())
    }

    pub fn connection_request(anfrage: &ConnectionRequest) -> ProtocolResult<Self> {
        Self::json(MessageType::ConnectionRequest, anfrage)
    }

    pub fn connection_response(antwort: &ConnectionResponse) -> ProtocolResult<Self> {
        Self::json(MessageType::ConnectionResponse, antwort)
    }

    pub fn room_state(status: &RoomState) -> ProtocolResult<Self> {
        Self::json(MessageType::RoomState, status)
    }

    pub fn voice_data(daten: impl Into<Bytes>) -> Self {
        Self::neu(MessageType::VoiceData, daten)
    }

    /// Laenge des Payloads wie sie im Header steht
    pub fn laenge(&self) -> usize {
        self.payload.len()
    }

    /// Dekodiert den Payload als JSON
    pub fn payload_als<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Kodiert den Frame in das Wire-Format (Header + Payload)
    ///
    /// Schlaegt nur fehl, wenn der Payload nicht in 32 Bit darstellbar ist.
    pub fn kodieren(&self) -> ProtocolResult<Bytes> {
        let mut buf = BytesMut::with_capacity(HEADER_GROESSE + self.payload.len());
        self.kodieren_in(&mut buf)?;
        Ok(buf.freeze())
    }

    pub(crate) fn kodieren_in(&self, dst: &mut BytesMut) -> ProtocolResult<()> {
        let laenge = u32::try_from(self.payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
            laenge: self.payload.len(),
            max: u32::MAX as usize,
        })?;
        dst.reserve(HEADER_GROESSE + self.payload.len());
        dst.put_u32(self.typ.id());
        dst.put_u32(laenge);
        dst.put_slice(&self.payload);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
