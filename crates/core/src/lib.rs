//! funkraum-core – Gemeinsame Typen
//!
//! Dieses Crate stellt die Identifikationstypen bereit, die von Protokoll,
//! Relay und Client gemeinsam genutzt werden.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{RoomId, SessionId, Username};
