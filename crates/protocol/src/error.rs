//! Fehlertypen fuer das Wire-Protokoll

use thiserror::Error;

use crate::frame::MessageType;

/// Fehler beim Lesen, Schreiben oder Interpretieren eines Frames
///
/// Alle Varianten sind fuer die betroffene Session fatal.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Stream endete bevor die erwartete Byte-Anzahl gelesen war
    #[error("Verbindung geschlossen")]
    ConnectionClosed,

    /// Typ-ID ausserhalb von 1..=7
    #[error("Unbekannter Nachrichtentyp: {0}")]
    UnknownMessageType(u32),

    /// Payload groesser als das konfigurierte Limit
    #[error("Frame zu gross: {laenge} Bytes (Maximum: {max} Bytes)")]
    FrameTooLarge { laenge: usize, max: usize },

    /// Strukturierter Payload ist kein gueltiges JSON fuer den erwarteten Typ
    #[error("Ungueltiger Payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Gueltiger Typ, aber im aktuellen Zustand nicht erlaubt
    #[error("Unerwarteter Nachrichtentyp: {0}")]
    UnexpectedMessageType(MessageType),

    /// IO-Fehler (Reset, Broken Pipe, ...)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Gibt true zurueck wenn der Fehler ein Abbruch der Verbindung ist
    /// (im Gegensatz zu einem Verstoss gegen das Protokoll)
    pub fn ist_verbindungsabbruch(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Result-Typ fuer das Protokoll
pub type ProtocolResult<T> = Result<T, ProtocolError>;
