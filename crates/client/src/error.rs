//! Fehlertypen des Clients

use funkraum_protocol::{MessageType, ProtocolError};
use thiserror::Error;

/// Fehler die bei der Server-Verbindung auftreten koennen
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP-Verbindung fehlgeschlagen
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Frame konnte nicht gelesen oder geschrieben werden
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtocolError),

    /// Server hat einen Frame geschickt, der hier nicht erwartet wird
    #[error("Unerwartete Antwort: {0}")]
    UnerwarteteAntwort(MessageType),

    /// Server hat die Verbindung geschlossen
    #[error("Verbindung vom Server getrennt")]
    VerbindungGetrennt,
}

pub type ClientResult<T> = Result<T, ClientError>;
