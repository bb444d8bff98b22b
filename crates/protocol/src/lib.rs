//! funkraum-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert das Frame-Format, die sieben Nachrichtentypen und
//! die JSON-Payloads, die zwischen Client und Server ausgetauscht werden.
//!
//! ```text
//! +----------------+----------------+----...----+
//! | Typ (u32 BE)   | Laenge (u32 BE)| Payload   |
//! +----------------+----------------+----...----+
//! ```

pub mod error;
pub mod frame;
pub mod payload;
pub mod wire;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{Frame, MessageType};
pub use payload::{ConnectionRequest, ConnectionResponse, RoomState};
pub use wire::FrameCodec;
