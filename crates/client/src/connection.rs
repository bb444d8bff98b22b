//! Client-seitige TCP-Verbindung zum Funkraum-Relay
//!
//! Nutzt den FrameCodec aus funkraum-protocol fuer das Wire-Format
//! (u32 BE Typ + u32 BE Laenge + Payload). Alle Operationen sind async.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use funkraum_protocol::{
    ConnectionRequest, ConnectionResponse, Frame, FrameCodec, MessageType, RoomState,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{ClientError, ClientResult};

type Leser = FramedRead<Box<dyn AsyncRead + Send + Unpin>, FrameCodec>;
type Schreiber = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, FrameCodec>;

/// Ergebnis eines Beitrittsversuchs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeitrittsErgebnis {
    Angenommen,
    /// Abgelehnt mit dem Grund des Servers; die Verbindung bleibt offen
    Abgelehnt(String),
}

/// Ereignis vom Server nach dem Beitritt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEreignis {
    Sprachdaten(Bytes),
    Raumstatus(RoomState),
}

// ---------------------------------------------------------------------------
// VoiceClient
// ---------------------------------------------------------------------------

/// Verbindung zum Relay vor dem Aufteilen
pub struct VoiceClient {
    leser: Leser,
    schreiber: Schreiber,
}

impl VoiceClient {
    /// Baut eine TCP-Verbindung zum Relay auf
    pub async fn verbinden<A: ToSocketAddrs>(addr: A) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::info!(peer = ?stream.peer_addr().ok(), "TCP-Verbindung hergestellt");
        let (leser, schreiber) = stream.into_split();
        Ok(Self::aus_haelften(leser, schreiber))
    }

    /// Verwendet einen beliebigen bidirektionalen Stream
    pub fn aus_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (leser, schreiber) = tokio::io::split(stream);
        Self::aus_haelften(leser, schreiber)
    }

    fn aus_haelften<R, W>(leser: R, schreiber: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let leser: Box<dyn AsyncRead + Send + Unpin> = Box::new(leser);
        let schreiber: Box<dyn AsyncWrite + Send + Unpin> = Box::new(schreiber);
        Self {
            leser: FramedRead::new(leser, FrameCodec::new()),
            schreiber: FramedWrite::new(schreiber, FrameCodec::new()),
        }
    }

    /// Sendet CONNECTION_REQUEST und wartet auf CONNECTION_RESPONSE
    ///
    /// Nach einer Ablehnung darf derselbe Client es erneut versuchen.
    pub async fn beitreten(&mut self, username: &str, raum: &str) -> ClientResult<BeitrittsErgebnis> {
        let anfrage = ConnectionRequest::neu(username, raum);
        self.frame_senden(Frame::connection_request(&anfrage)?).await?;

        let antwort = self.frame_empfangen().await?;
        if antwort.typ != MessageType::ConnectionResponse {
            return Err(ClientError::UnerwarteteAntwort(antwort.typ));
        }

        match antwort.payload_als::<ConnectionResponse>()? {
            ConnectionResponse::Ok => {
                tracing::info!(benutzer = username, raum = raum, "Raum beigetreten");
                Ok(BeitrittsErgebnis::Angenommen)
            }
            ConnectionResponse::Error { reason } => {
                tracing::warn!(benutzer = username, raum = raum, grund = %reason, "Beitritt abgelehnt");
                Ok(BeitrittsErgebnis::Abgelehnt(reason))
            }
        }
    }

    /// Sendet einen beliebigen Frame
    pub async fn frame_senden(&mut self, frame: Frame) -> ClientResult<()> {
        self.schreiber.send(frame).await?;
        Ok(())
    }

    /// Liest den naechsten Frame; Verbindungsende wird zu `VerbindungGetrennt`
    pub async fn frame_empfangen(&mut self) -> ClientResult<Frame> {
        match self.leser.next().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(e.into()),
            None => Err(ClientError::VerbindungGetrennt),
        }
    }

    /// Teilt die Verbindung in Sende- und Empfangshaelfte
    pub fn aufteilen(self) -> (ClientSender, ClientEmpfaenger) {
        (
            ClientSender {
                schreiber: Arc::new(Mutex::new(self.schreiber)),
            },
            ClientEmpfaenger { leser: self.leser },
        )
    }
}

// ---------------------------------------------------------------------------
// Sendehaelfte
// ---------------------------------------------------------------------------

/// Sendehaelfte nach dem Beitritt
///
/// Clone teilt die Verbindung; Schreibvorgaenge sind ueber eine Sperre
/// serialisiert, Frames verschiedener Aufrufer vermischen sich nicht.
#[derive(Clone)]
pub struct ClientSender {
    schreiber: Arc<Mutex<Schreiber>>,
}

impl ClientSender {
    pub async fn sprechen_starten(&self) -> ClientResult<()> {
        self.senden(Frame::signal(MessageType::StartTalking)).await
    }

    pub async fn sprechen_beenden(&self) -> ClientResult<()> {
        self.senden(Frame::signal(MessageType::StopTalking)).await
    }

    /// Sendet opake Sprachdaten an den Raum
    pub async fn sprachdaten_senden(&self, daten: impl Into<Bytes>) -> ClientResult<()> {
        self.senden(Frame::voice_data(daten)).await
    }

    /// Sendet DISCONNECT und schliesst die Schreibseite
    pub async fn trennen(&self) -> ClientResult<()> {
        let mut schreiber = self.schreiber.lock().await;
        schreiber.send(Frame::signal(MessageType::Disconnect)).await?;
        // Fehler beim Schliessen ignorieren, der Server hat bereits abgemeldet
        let _ = schreiber.close().await;
        tracing::info!("Verbindung getrennt");
        Ok(())
    }

    pub async fn senden(&self, frame: Frame) -> ClientResult<()> {
        self.schreiber.lock().await.send(frame).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Empfangshaelfte
// ---------------------------------------------------------------------------

/// Empfangshaelfte nach dem Beitritt
pub struct ClientEmpfaenger {
    leser: Leser,
}

impl ClientEmpfaenger {
    /// Naechstes Ereignis vom Server, `None` wenn der Server geschlossen hat
    pub async fn naechstes_ereignis(&mut self) -> ClientResult<Option<ClientEreignis>> {
        let frame = match self.leser.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(None),
        };

        match frame.typ {
            MessageType::VoiceData => Ok(Some(ClientEreignis::Sprachdaten(frame.payload))),
            MessageType::RoomState => Ok(Some(ClientEreignis::Raumstatus(frame.payload_als()?))),
            andere => Err(ClientError::UnerwarteteAntwort(andere)),
        }
    }

    /// Liest Ereignisse bis zum naechsten Raumstatus, Sprachdaten werden uebersprungen
    pub async fn naechster_raumstatus(&mut self) -> ClientResult<RoomState> {
        loop {
            match self.naechstes_ereignis().await? {
                Some(ClientEreignis::Raumstatus(status)) => return Ok(status),
                Some(ClientEreignis::Sprachdaten(_)) => continue,
                None => return Err(ClientError::VerbindungGetrennt),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use funkraum_core::types::Username;
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    /// Client plus Server-Seite als Framed
    fn paar() -> (VoiceClient, Framed<DuplexStream, FrameCodec>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        (
            VoiceClient::aus_stream(client_io),
            Framed::new(server_io, FrameCodec::new()),
        )
    }

    #[tokio::test]
    async fn beitritt_angenommen() {
        let (mut client, mut server) = paar();
        let server_task = tokio::spawn(async move {
            let anfrage = server.next().await.unwrap().unwrap();
            assert_eq!(anfrage.typ, MessageType::ConnectionRequest);
            let anfrage: ConnectionRequest = anfrage.payload_als().unwrap();
            assert_eq!(anfrage, ConnectionRequest::neu("A", "lobby"));
            server
                .send(Frame::connection_response(&ConnectionResponse::Ok).unwrap())
                .await
                .unwrap();
            server
        });

        let ergebnis = client.beitreten("A", "lobby").await.unwrap();
        assert_eq!(ergebnis, BeitrittsErgebnis::Angenommen);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn beitritt_abgelehnt_mit_grund() {
        let (mut client, mut server) = paar();
        tokio::spawn(async move {
            let _ = server.next().await;
            server
                .send(Frame::connection_response(&ConnectionResponse::fehler("vergeben")).unwrap())
                .await
                .unwrap();
            // Offen halten
            let _ = server.next().await;
        });

        let ergebnis = client.beitreten("A", "lobby").await.unwrap();
        assert_eq!(ergebnis, BeitrittsErgebnis::Abgelehnt("vergeben".into()));
    }

    #[tokio::test]
    async fn falsche_antwort_ist_fehler() {
        let (mut client, mut server) = paar();
        tokio::spawn(async move {
            let _ = server.next().await;
            server.send(Frame::voice_data(vec![1])).await.unwrap();
        });

        let fehler = client.beitreten("A", "lobby").await.unwrap_err();
        assert!(matches!(
            fehler,
            ClientError::UnerwarteteAntwort(MessageType::VoiceData)
        ));
    }

    #[tokio::test]
    async fn sender_und_empfaenger() {
        let (client, mut server) = paar();
        let (sender, mut empfaenger) = client.aufteilen();

        sender.sprechen_starten().await.unwrap();
        sender.sprachdaten_senden(vec![1, 2]).await.unwrap();
        sender.sprechen_beenden().await.unwrap();

        let typen: Vec<MessageType> = vec![
            server.next().await.unwrap().unwrap().typ,
            server.next().await.unwrap().unwrap().typ,
            server.next().await.unwrap().unwrap().typ,
        ];
        assert_eq!(
            typen,
            vec![
                MessageType::StartTalking,
                MessageType::VoiceData,
                MessageType::StopTalking
            ]
        );

        let mut status = RoomState::neu();
        status.einfuegen(Username::from("A"), true);
        server.send(Frame::room_state(&status).unwrap()).await.unwrap();
        server.send(Frame::voice_data(vec![7])).await.unwrap();

        assert_eq!(
            empfaenger.naechstes_ereignis().await.unwrap(),
            Some(ClientEreignis::Raumstatus(status))
        );
        assert_eq!(
            empfaenger.naechstes_ereignis().await.unwrap(),
            Some(ClientEreignis::Sprachdaten(Bytes::from_static(&[7])))
        );

        drop(server);
        assert_eq!(empfaenger.naechstes_ereignis().await.unwrap(), None);
    }

    #[tokio::test]
    async fn trennen_sendet_disconnect() {
        let (client, mut server) = paar();
        let (sender, _empfaenger) = client.aufteilen();

        sender.trennen().await.unwrap();
        let frame = server.next().await.unwrap().unwrap();
        assert_eq!(frame.typ, MessageType::Disconnect);
        assert_eq!(frame.laenge(), 0);
    }
}
