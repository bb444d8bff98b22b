//! funkraum-relay – Raumbasiertes Sprach-Relay
//!
//! Clients verbinden sich per TCP, treten mit Benutzername und Raum-ID
//! einem Raum bei und bekommen danach alle VOICE_DATA-Frames sowie jeden
//! Wechsel des Sprechstatus ihres Raums zugestellt.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (RelayServer)
//!     |
//!     v
//! ClientSession (pro Verbindung ein Task)
//!     |  State Machine: Verbindend -> Handshake -> Aktiv -> Getrennt
//!     |
//!     +-- RoomRegistry     (Raum -> Benutzername -> Sprechstatus, eine Sperre)
//!     +-- RoomBroadcaster  (Fan-out ueber die Sende-Sperre jedes Ziels)
//! ```
//!
//! ## Sperren
//! Die Registry-Sperre wird nie ueber ein `.await` gehalten. Beim Beitritt
//! nimmt die Session zuerst ihre eigene Sende-Sperre und dann kurz die
//! Registry-Sperre, damit die OK-Antwort vor jedem Broadcast ankommt.

pub mod broadcast;
pub mod error;
pub mod listener;
pub mod registry;
pub mod session;
pub mod state;

// Bequeme Re-Exporte
pub use broadcast::{BroadcastBericht, RoomBroadcaster, Zustellfehler};
pub use error::{RegistryError, RelayError, RelayResult};
pub use listener::RelayServer;
pub use registry::{RaumMitglied, RoomRegistry};
pub use session::{ClientSession, SessionEnde, SessionHandle, SessionZustand};
pub use state::{RelayConfig, RelayState};
