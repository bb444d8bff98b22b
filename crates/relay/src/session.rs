//! Client-Session – Verwaltet eine einzelne Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `ClientSession` in einem eigenen
//! tokio-Task. Der Lese-Teil gehoert exklusiv der Session, der Schreib-Teil
//! steckt im geteilten `SessionHandle`, damit auch Broadcasts anderer
//! Sessions an diese Verbindung senden koennen.
//!
//! ## State Machine
//! ```text
//! Verbindend -> Handshake -> Aktiv -> Getrennt
//!                  ^    |
//!                  +----+  (Name vergeben: Fehler-Antwort, neuer Versuch)
//! ```
//!
//! ## Sende-Sperre
//! Alle Schreibzugriffe laufen ueber die `tokio::sync::Mutex` im
//! `SessionHandle`. Ein Frame wird dadurch nie mit einem anderen Frame
//! verschraenkt. Ueber die Reihenfolge von Frames aus verschiedenen
//! Ereignissen sagt das nichts aus.

use futures_util::{SinkExt, StreamExt};
use funkraum_core::types::{RoomId, SessionId, Username};
use funkraum_protocol::{
    ConnectionRequest, ConnectionResponse, Frame, FrameCodec, MessageType, ProtocolError,
    ProtocolResult,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{RelayError, RelayResult};
use crate::state::RelayState;

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Schreib-Teil einer Verbindung, typ-geloescht damit TCP und In-Memory-
/// Streams dieselbe Registry benutzen koennen
pub type SendeStrom = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, FrameCodec>;

/// Geteilter Sende-Zugang zu einer Session
///
/// Die Registry haelt einen `Arc<SessionHandle>` pro Mitglied. Die Sende-
/// Sperre serialisiert eigene Antworten und fremde Broadcasts.
pub struct SessionHandle {
    id: SessionId,
    peer_addr: SocketAddr,
    sender: Mutex<SendeStrom>,
}

impl SessionHandle {
    pub fn neu<W>(peer_addr: SocketAddr, schreiber: W, codec: FrameCodec) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: Box<dyn AsyncWrite + Send + Unpin> = Box::new(schreiber);
        Arc::new(Self {
            id: SessionId::new(),
            peer_addr,
            sender: Mutex::new(FramedWrite::new(boxed, codec)),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Sendet einen Frame vollstaendig unter der Sende-Sperre
    pub async fn senden(&self, frame: Frame) -> ProtocolResult<()> {
        self.sender.lock().await.send(frame).await
    }

    /// Schliesst die Schreibrichtung (flush + shutdown)
    pub async fn schliessen(&self) -> ProtocolResult<()> {
        self.sender.lock().await.close().await
    }

    /// Haelt die Sende-Sperre fuer mehrere zusammengehoerige Schritte
    pub(crate) async fn sperren(&self) -> MutexGuard<'_, SendeStrom> {
        self.sender.lock().await
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Zustand
// ---------------------------------------------------------------------------

/// Zustand der Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionZustand {
    /// Verbindung angenommen, noch nichts gelesen
    Verbindend,
    /// Wartet auf eine gueltige CONNECTION_REQUEST
    Handshake,
    /// In einem Raum eingetragen
    Aktiv { raum: RoomId, username: Username },
    /// Endzustand, keine weiteren Lese- oder Schreibzugriffe
    Getrennt,
}

/// Wie eine Session regulaer geendet hat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnde {
    /// Client hat DISCONNECT gesendet
    Abgemeldet,
    /// Gegenseite hat die Verbindung an einer Frame-Grenze geschlossen
    VerbindungGeschlossen,
}

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne Verbindung vom Handshake bis zum Ende
pub struct ClientSession<R> {
    state: Arc<RelayState>,
    handle: Arc<SessionHandle>,
    leser: FramedRead<R, FrameCodec>,
    zustand: SessionZustand,
}

impl<R> ClientSession<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    /// Erstellt eine Session aus Lese- und Schreib-Teil einer Verbindung
    pub fn neu<W>(state: Arc<RelayState>, peer_addr: SocketAddr, leser: R, schreiber: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let handle = SessionHandle::neu(peer_addr, schreiber, state.codec());
        let leser = FramedRead::new(leser, state.codec());
        Self {
            state,
            handle,
            leser,
            zustand: SessionZustand::Verbindend,
        }
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    pub fn zustand(&self) -> &SessionZustand {
        &self.zustand
    }

    /// Startet die Verarbeitungsschleife
    ///
    /// Laeuft bis DISCONNECT, Verbindungsende oder Protokollfehler. Auf
    /// jedem dieser Wege wird die Session aus ihrem Raum ausgetragen.
    pub async fn verarbeiten(mut self) -> RelayResult<SessionEnde> {
        let peer = self.handle.peer_addr();
        let session = self.handle.id();
        tracing::info!(peer = %peer, session = %session, "Neue Verbindung");

        let ergebnis = self.ausfuehren().await;

        // Abmelden vor dem Schliessen: wer EOF sieht, sieht auch den Raum ohne uns
        self.austreten().await;
        if let Err(e) = self.handle.schliessen().await {
            tracing::debug!(peer = %peer, fehler = %e, "Schliessen fehlgeschlagen");
        }

        match &ergebnis {
            Ok(ende) => {
                tracing::info!(peer = %peer, session = %session, ende = ?ende, "Session beendet");
            }
            Err(e) if e.ist_verbindungsabbruch() => {
                tracing::info!(peer = %peer, session = %session, fehler = %e, "Verbindung abgebrochen");
            }
            Err(e) => {
                tracing::warn!(peer = %peer, session = %session, fehler = %e, "Session wegen Fehler beendet");
            }
        }
        ergebnis
    }

    async fn ausfuehren(&mut self) -> RelayResult<SessionEnde> {
        match self.handshake_und_dispatch().await {
            // EOF an einer Frame-Grenze ist ein regulaeres Ende
            Err(RelayError::Protokoll(ProtocolError::ConnectionClosed))
                if self.leser.read_buffer().is_empty() =>
            {
                Ok(SessionEnde::VerbindungGeschlossen)
            }
            andere => andere,
        }
    }

    async fn handshake_und_dispatch(&mut self) -> RelayResult<SessionEnde> {
        self.zustand = SessionZustand::Handshake;
        let (raum, username) = self.handshake().await?;

        // Neuer Mitgliederstand an alle, inklusive dem Neuen
        raumstatus_verteilen(&self.state, &raum).await?;

        self.dispatch_loop(&raum, &username).await
    }

    /// Liest den naechsten Frame; sauberes EOF wird zu `ConnectionClosed`
    async fn naechster_frame(&mut self) -> RelayResult<Frame> {
        match self.leser.next().await {
            Some(Ok(frame)) => {
                self.state.metriken.frame_empfangen(frame.typ.name());
                tracing::trace!(
                    session = %self.handle.id(),
                    typ = %frame.typ,
                    laenge = frame.laenge(),
                    "Frame empfangen"
                );
                Ok(frame)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(ProtocolError::ConnectionClosed.into()),
        }
    }

    /// Wiederholt CONNECTION_REQUEST bis ein Name angenommen wird
    async fn handshake(&mut self) -> RelayResult<(RoomId, Username)> {
        loop {
            let frame = self.naechster_frame().await?;
            if frame.typ != MessageType::ConnectionRequest {
                return Err(ProtocolError::UnexpectedMessageType(frame.typ).into());
            }
            let anfrage: ConnectionRequest = frame.payload_als()?;

            // Sende-Sperre vor dem Eintragen nehmen: die OK-Antwort geht
            // raus bevor ein Broadcast eines anderen Mitglieds uns erreicht.
            let handle = Arc::clone(&self.handle);
            let mut sender = handle.sperren().await;

            match self.state.registry.registrieren(
                &anfrage.room_id,
                &anfrage.username,
                Arc::clone(&self.handle),
            ) {
                Ok(()) => {
                    self.zustand = SessionZustand::Aktiv {
                        raum: anfrage.room_id.clone(),
                        username: anfrage.username.clone(),
                    };
                    self.state.gauges_aktualisieren();

                    sender
                        .send(Frame::connection_response(&ConnectionResponse::Ok)?)
                        .await?;
                    tracing::info!(
                        peer = %handle.peer_addr(),
                        session = %handle.id(),
                        raum = %anfrage.room_id,
                        benutzer = %anfrage.username,
                        "Raum betreten"
                    );
                    return Ok((anfrage.room_id, anfrage.username));
                }
                Err(fehler) => {
                    self.state.metriken.handshakes_rejected_total.inc();
                    tracing::info!(
                        peer = %handle.peer_addr(),
                        raum = %anfrage.room_id,
                        benutzer = %anfrage.username,
                        grund = %fehler,
                        "Handshake abgelehnt"
                    );
                    let antwort = ConnectionResponse::fehler(fehler.to_string());
                    sender.send(Frame::connection_response(&antwort)?).await?;
                }
            }
        }
    }

    /// Frame-Verarbeitung im Zustand `Aktiv`
    async fn dispatch_loop(&mut self, raum: &RoomId, username: &Username) -> RelayResult<SessionEnde> {
        loop {
            let frame = self.naechster_frame().await?;
            match frame.typ {
                MessageType::VoiceData => {
                    let bericht = if self.state.config.sprachdaten_echo {
                        self.state.broadcaster.an_raum_senden(raum, frame).await
                    } else {
                        self.state
                            .broadcaster
                            .an_raum_ausser_senden(raum, self.handle.id(), frame)
                            .await
                    };
                    tracing::trace!(
                        raum = %raum,
                        benutzer = %username,
                        zugestellt = bericht.zugestellt.len(),
                        fehlgeschlagen = bericht.fehlgeschlagen.len(),
                        "Sprachdaten weitergeleitet"
                    );
                }
                MessageType::StartTalking | MessageType::StopTalking => {
                    let spricht = frame.typ == MessageType::StartTalking;
                    self.state
                        .registry
                        .sprechstatus_setzen(raum, username, spricht);
                    tracing::debug!(raum = %raum, benutzer = %username, spricht, "Sprechstatus geaendert");
                    raumstatus_verteilen(&self.state, raum).await?;
                }
                MessageType::Disconnect => {
                    tracing::debug!(raum = %raum, benutzer = %username, "DISCONNECT empfangen");
                    return Ok(SessionEnde::Abgemeldet);
                }
                MessageType::ConnectionRequest
                | MessageType::ConnectionResponse
                | MessageType::RoomState => {
                    return Err(ProtocolError::UnexpectedMessageType(frame.typ).into());
                }
            }
        }
    }

    /// Traegt die Session aus ihrem Raum aus (nur einmal wirksam)
    async fn austreten(&mut self) {
        let zustand = std::mem::replace(&mut self.zustand, SessionZustand::Getrennt);
        let SessionZustand::Aktiv { raum, username } = zustand else {
            return;
        };

        let entfernt = self
            .state
            .registry
            .abmelden_session(&raum, &username, self.handle.id());
        self.state.gauges_aktualisieren();
        tracing::info!(raum = %raum, benutzer = %username, entfernt, "Raum verlassen");

        if entfernt && self.state.config.raumstatus_bei_verlassen {
            if let Err(e) = raumstatus_verteilen(&self.state, &raum).await {
                tracing::warn!(raum = %raum, fehler = %e, "Raumstatus nach Verlassen nicht verteilt");
            }
        }
    }
}

async fn raumstatus_verteilen(state: &RelayState, raum: &RoomId) -> RelayResult<()> {
    let bericht = state.broadcaster.raumstatus_senden(raum).await?;
    tracing::debug!(
        raum = %raum,
        zugestellt = bericht.zugestellt.len(),
        fehlgeschlagen = bericht.fehlgeschlagen.len(),
        "Raumstatus verteilt"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
