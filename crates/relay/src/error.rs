//! Fehlertypen fuer das Relay

use funkraum_core::types::{RoomId, Username};
use funkraum_protocol::ProtocolError;
use thiserror::Error;

/// Ablehnungsgruende beim Eintragen in einen Raum
///
/// Beide Varianten sind behebbar: der Client bekommt den Text als
/// `reason` und darf es auf derselben Verbindung erneut versuchen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Benutzername ist im Raum bereits vergeben
    #[error("Benutzername '{username}' wird in Raum '{raum}' bereits verwendet")]
    UsernameTaken { username: Username, raum: RoomId },

    /// Leerer Benutzername oder leere Raum-ID
    #[error("Ungueltige Anfrage: {0}")]
    UngueltigerName(String),
}

/// Fehlertyp fuer Sessions und Listener
#[derive(Debug, Error)]
pub enum RelayError {
    /// Protokollfehler (ungueltiger Frame, falscher Zustand, Verbindungsabbruch)
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtocolError),

    /// IO-Fehler (Bind, Accept)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Gibt true zurueck wenn die Gegenseite einfach weg ist
    pub fn ist_verbindungsabbruch(&self) -> bool {
        match self {
            Self::Protokoll(e) => e.ist_verbindungsabbruch(),
            Self::Io(_) => false,
        }
    }
}

/// Result-Typ fuer das Relay
pub type RelayResult<T> = Result<T, RelayError>;
