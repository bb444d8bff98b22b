//! Raum-Broadcaster – Fan-out eines Frames an alle Mitglieder eines Raums
//!
//! Die Mitgliederliste wird unter der Registry-Sperre kopiert, danach wird
//! ohne Registry-Sperre an jedes Mitglied ueber dessen Sende-Sperre
//! geschrieben. Alle Zustellungen laufen gleichzeitig.
//!
//! ## Fehlerverhalten
//! Best-effort, hoechstens einmal, kein Retry. Ein fehlgeschlagenes Ziel
//! landet im `BroadcastBericht` und im Log, die uebrigen Ziele bekommen den
//! Frame trotzdem. Das Ziel bleibt im Raum: entfernt wird es nur von seiner
//! eigenen Session (DISCONNECT oder Lesefehler).

use funkraum_core::types::{RoomId, SessionId, Username};
use funkraum_observability::RelayMetrics;
use funkraum_protocol::{Frame, ProtocolError, ProtocolResult};
use futures_util::future::join_all;
use std::sync::Arc;

use crate::registry::{RaumMitglied, RoomRegistry};

// ---------------------------------------------------------------------------
// Ergebnis
// ---------------------------------------------------------------------------

/// Eine fehlgeschlagene Zustellung
#[derive(Debug)]
pub struct Zustellfehler {
    pub username: Username,
    pub session: SessionId,
    pub fehler: ProtocolError,
}

/// Ergebnis eines Broadcasts, pro Ziel
#[derive(Debug, Default)]
pub struct BroadcastBericht {
    pub zugestellt: Vec<Username>,
    pub fehlgeschlagen: Vec<Zustellfehler>,
}

impl BroadcastBericht {
    pub fn ziele(&self) -> usize {
        self.zugestellt.len() + self.fehlgeschlagen.len()
    }

    pub fn vollstaendig(&self) -> bool {
        self.fehlgeschlagen.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RoomBroadcaster
// ---------------------------------------------------------------------------

/// Zentraler Broadcaster fuer alle Raeume
///
/// Clone teilt Registry und Metriken.
#[derive(Clone)]
pub struct RoomBroadcaster {
    registry: Arc<RoomRegistry>,
    metriken: RelayMetrics,
}

impl RoomBroadcaster {
    pub fn neu(registry: Arc<RoomRegistry>, metriken: RelayMetrics) -> Self {
        Self { registry, metriken }
    }

    /// Sendet einen Frame an alle Mitglieder des Raums
    pub async fn an_raum_senden(&self, raum: &RoomId, frame: Frame) -> BroadcastBericht {
        let ziele = self.registry.mitglieder(raum);
        self.zustellen(raum, ziele, frame).await
    }

    /// Sendet einen Frame an alle Mitglieder ausser der angegebenen Session
    pub async fn an_raum_ausser_senden(
        &self,
        raum: &RoomId,
        ausgeschlossen: SessionId,
        frame: Frame,
    ) -> BroadcastBericht {
        let ziele = self
            .registry
            .mitglieder(raum)
            .into_iter()
            .filter(|m| m.session.id() != ausgeschlossen)
            .collect();
        self.zustellen(raum, ziele, frame).await
    }

    /// Sendet die aktuelle Momentaufnahme als ROOM_STATE an alle Mitglieder
    ///
    /// Aufnahme und Empfaengerliste stammen aus demselben Sperr-Abschnitt.
    pub async fn raumstatus_senden(&self, raum: &RoomId) -> ProtocolResult<BroadcastBericht> {
        let (status, ziele) = self.registry.status_und_mitglieder(raum);
        let frame = Frame::room_state(&status)?;
        Ok(self.zustellen(raum, ziele, frame).await)
    }

    async fn zustellen(&self, raum: &RoomId, ziele: Vec<RaumMitglied>, frame: Frame) -> BroadcastBericht {
        let ergebnisse = join_all(ziele.into_iter().map(|ziel| {
            let frame = frame.clone();
            async move {
                let ergebnis = ziel.session.senden(frame).await;
                (ziel, ergebnis)
            }
        }))
        .await;

        let mut bericht = BroadcastBericht::default();
        for (ziel, ergebnis) in ergebnisse {
            match ergebnis {
                Ok(()) => bericht.zugestellt.push(ziel.username),
                Err(fehler) => {
                    tracing::warn!(
                        raum = %raum,
                        benutzer = %ziel.username,
                        session = %ziel.session.id(),
                        typ = %frame.typ,
                        fehler = %fehler,
                        "Zustellung fehlgeschlagen"
                    );
                    bericht.fehlgeschlagen.push(Zustellfehler {
                        username: ziel.username,
                        session: ziel.session.id(),
                        fehler,
                    });
                }
            }
        }

        self.metriken
            .broadcast_deliveries_total
            .inc_by(bericht.zugestellt.len() as u64);
        self.metriken
            .broadcast_failures_total
            .inc_by(bericht.fehlgeschlagen.len() as u64);
        bericht
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use futures_util::StreamExt;
    use funkraum_protocol::{FrameCodec, MessageType, RoomState};
    use tokio::io::DuplexStream;
    use tokio_util::codec::FramedRead;

    type Gegenstelle = FramedRead<DuplexStream, FrameCodec>;

    fn aufbau() -> (Arc<RoomRegistry>, RoomBroadcaster, RelayMetrics) {
        let registry = Arc::new(RoomRegistry::default());
        let metriken = RelayMetrics::neu().unwrap();
        let broadcaster = RoomBroadcaster::neu(Arc::clone(&registry), metriken.clone());
        (registry, broadcaster, metriken)
    }

    /// Traegt ein Mitglied ein und gibt die Client-Seite seiner Verbindung zurueck
    fn mitglied(registry: &RoomRegistry, raum: &str, name: &str) -> (Arc<SessionHandle>, Gegenstelle) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let handle = SessionHandle::neu("127.0.0.1:5000".parse().unwrap(), server_io, FrameCodec::new());
        registry
            .registrieren(&RoomId::from(raum), &Username::from(name), Arc::clone(&handle))
            .unwrap();
        (handle, FramedRead::new(client_io, FrameCodec::new()))
    }

    async fn empfangen(gegenstelle: &mut Gegenstelle) -> Frame {
        gegenstelle.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn an_raum_senden_erreicht_alle() {
        let (registry, broadcaster, metriken) = aufbau();
        let (_ha, mut a) = mitglied(&registry, "lobby", "A");
        let (_hb, mut b) = mitglied(&registry, "lobby", "B");

        let bericht = broadcaster
            .an_raum_senden(&RoomId::from("lobby"), Frame::voice_data(vec![1, 2]))
            .await;
        assert_eq!(bericht.zugestellt.len(), 2);
        assert!(bericht.vollstaendig());

        assert_eq!(empfangen(&mut a).await.payload.as_ref(), &[1, 2]);
        assert_eq!(empfangen(&mut b).await.payload.as_ref(), &[1, 2]);
        assert_eq!(metriken.broadcast_deliveries_total.get(), 2);
    }

    #[tokio::test]
    async fn raeume_sind_isoliert() {
        let (registry, broadcaster, _) = aufbau();
        let (_h1, mut r1) = mitglied(&registry, "r1", "A");
        let (_h2, mut r2) = mitglied(&registry, "r2", "B");

        let bericht = broadcaster
            .an_raum_senden(&RoomId::from("r1"), Frame::voice_data(vec![9]))
            .await;
        assert_eq!(bericht.ziele(), 1);
        assert_eq!(empfangen(&mut r1).await.typ, MessageType::VoiceData);

        // r2 darf nichts im Puffer haben: ein danach gesendeter Frame ist der erste
        broadcaster
            .an_raum_senden(&RoomId::from("r2"), Frame::signal(MessageType::Disconnect))
            .await;
        assert_eq!(empfangen(&mut r2).await.typ, MessageType::Disconnect);
    }

    #[tokio::test]
    async fn kaputtes_ziel_bricht_fan_out_nicht_ab() {
        let (registry, broadcaster, metriken) = aufbau();
        let (_ha, mut a) = mitglied(&registry, "lobby", "A");
        let (_hb, b) = mitglied(&registry, "lobby", "B");
        let (_hc, mut c) = mitglied(&registry, "lobby", "C");

        // Verbindung von B ist bereits weg
        drop(b);

        let bericht = broadcaster
            .an_raum_senden(&RoomId::from("lobby"), Frame::voice_data(vec![3]))
            .await;
        assert_eq!(bericht.zugestellt.len(), 2);
        assert_eq!(bericht.fehlgeschlagen.len(), 1);
        assert_eq!(bericht.fehlgeschlagen[0].username, Username::from("B"));

        assert_eq!(empfangen(&mut a).await.payload.as_ref(), &[3]);
        assert_eq!(empfangen(&mut c).await.payload.as_ref(), &[3]);

        // B bleibt eingetragen
        assert!(registry.momentaufnahme(&RoomId::from("lobby")).enthaelt("B"));
        assert_eq!(metriken.broadcast_failures_total.get(), 1);
    }

    #[tokio::test]
    async fn ausser_absender() {
        let (registry, broadcaster, _) = aufbau();
        let (ha, _a) = mitglied(&registry, "lobby", "A");
        let (_hb, mut b) = mitglied(&registry, "lobby", "B");

        let bericht = broadcaster
            .an_raum_ausser_senden(&RoomId::from("lobby"), ha.id(), Frame::voice_data(vec![4]))
            .await;
        assert_eq!(bericht.zugestellt, vec![Username::from("B")]);
        assert_eq!(empfangen(&mut b).await.payload.as_ref(), &[4]);
    }

    #[tokio::test]
    async fn raumstatus_mit_sprechstatus() {
        let (registry, broadcaster, _) = aufbau();
        let (_ha, mut a) = mitglied(&registry, "lobby", "A");
        let (_hb, mut b) = mitglied(&registry, "lobby", "B");
        let (_hc, mut c) = mitglied(&registry, "lobby", "C");
        registry.sprechstatus_setzen(&RoomId::from("lobby"), &Username::from("A"), true);

        let bericht = broadcaster
            .raumstatus_senden(&RoomId::from("lobby"))
            .await
            .unwrap();
        assert_eq!(bericht.zugestellt.len(), 3);

        for gegenstelle in [&mut a, &mut b, &mut c] {
            let frame = empfangen(gegenstelle).await;
            assert_eq!(frame.typ, MessageType::RoomState);
            let status: RoomState = frame.payload_als().unwrap();
            assert_eq!(status.spricht("A"), Some(true));
            assert_eq!(status.spricht("B"), Some(false));
            assert_eq!(status.spricht("C"), Some(false));
        }
    }

    #[tokio::test]
    async fn leerer_raum_ergibt_leeren_bericht() {
        let (_, broadcaster, _) = aufbau();
        let bericht = broadcaster
            .an_raum_senden(&RoomId::from("niemand"), Frame::voice_data(vec![1]))
            .await;
        assert_eq!(bericht.ziele(), 0);
    }
}
