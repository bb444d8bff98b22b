//! funkraum-client – Client-Bibliothek fuer das Funkraum-Relay
//!
//! Baut die TCP-Verbindung auf, fuehrt den Handshake durch und teilt die
//! Verbindung danach in eine Sende- und eine Empfangshaelfte auf, damit
//! Sprachdaten gesendet werden koennen waehrend Raumstatus eintrifft.

pub mod connection;
pub mod error;

pub use connection::{BeitrittsErgebnis, ClientEmpfaenger, ClientEreignis, ClientSender, VoiceClient};
pub use error::{ClientError, ClientResult};
