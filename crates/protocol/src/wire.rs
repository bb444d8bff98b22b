//! Wire-Format fuer TCP-Verbindungen
//!
//! Frame-basiertes Protokoll: Typ(u32 big-endian) + Laenge(u32 big-endian) + Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+--------+--------+----...----+
//! | Typ-ID (u32 BE)                   | Laenge (u32 BE)                   | Payload   |
//! +--------+--------+--------+--------+--------+--------+--------+--------+----...----+
//! ```
//!
//! TCP liefert einen Byte-Stream ohne Nachrichtengrenzen. Der Decoder
//! sammelt deshalb so lange, bis Header und Payload vollstaendig vorliegen.
//! Standardmaessig gibt es kein Groessenlimit ausser der 32-Bit-Laenge.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{Frame, MessageType, HEADER_GROESSE};

/// Obergrenze fuer die Vorbelegung anhand einer Laengenangabe im Header
pub const MAX_VORBELEGUNG: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer frame-basierte TCP-Verbindungen
///
/// Implementiert `Encoder<Frame>` und `Decoder` fuer `FramedRead`,
/// `FramedWrite` und `Framed`.
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use funkraum_protocol::wire::FrameCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, FrameCodec::new());
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Payload-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Codec ohne Limit (nur durch die 32-Bit-Laenge begrenzt)
    pub fn new() -> Self {
        Self {
            max_frame_size: u32::MAX as usize,
        }
    }

    /// Codec mit benutzerdefinierter maximaler Payload-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// `None` bedeutet kein Limit
    pub fn aus_option(max_frame_size: Option<usize>) -> Self {
        max_frame_size.map_or_else(Self::new, Self::with_max_size)
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn groesse_pruefen(&self, laenge: usize) -> ProtocolResult<()> {
        if laenge > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                laenge,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_GROESSE {
            return Ok(None);
        }

        // Header lesen ohne den Buffer zu veraendern
        let typ_id = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let laenge = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

        let typ = MessageType::try_from(typ_id)?;
        self.groesse_pruefen(laenge)?;

        let gesamt = HEADER_GROESSE + laenge;
        if src.len() < gesamt {
            // Laengenangabe ist unbestaetigt: nur begrenzt vorbelegen
            src.reserve((gesamt - src.len()).min(MAX_VORBELEGUNG));
            return Ok(None);
        }

        src.advance(HEADER_GROESSE);
        let payload = src.split_to(laenge).freeze();

        Ok(Some(Frame { typ, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            // Stream endete mitten im Frame
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.groesse_pruefen(item.laenge())?;
        item.kodieren_in(dst)
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen fuer direktes async Lesen/Schreiben
// ---------------------------------------------------------------------------

/// Liest genau einen Frame aus einem `AsyncRead`
///
/// Kurze Reads des Transports werden akkumuliert (`read_exact`).
///
/// # Fehler
/// - `ConnectionClosed` wenn der Stream vor Abschluss des Frames endet
/// - `UnknownMessageType` bei Typ-ID ausserhalb von 1..=7
/// - `FrameTooLarge` bei Ueberschreitung von `max_frame_size`
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> ProtocolResult<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_GROESSE];
    exakt_lesen(reader, &mut header).await?;

    let typ_id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let laenge = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let typ = MessageType::try_from(typ_id)?;
    if laenge > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            laenge,
            max: max_frame_size,
        });
    }

    // Waechst mit den tatsaechlich gelesenen Bytes
    let mut payload = Vec::with_capacity(laenge.min(MAX_VORBELEGUNG));
    (&mut *reader).take(laenge as u64).read_to_end(&mut payload).await?;
    if payload.len() < laenge {
        return Err(ProtocolError::ConnectionClosed);
    }

    Ok(Frame::neu(typ, payload))
}

async fn exakt_lesen<R>(reader: &mut R, buf: &mut [u8]) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

/// Schreibt einen einzelnen Frame vollstaendig in einen `AsyncWrite`
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.kodieren()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
