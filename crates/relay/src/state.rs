//! Gemeinsamer Relay-Zustand
//!
//! Haelt Konfiguration, Registry, Broadcaster und Metriken als
//! Arc-Referenzen, die sicher zwischen tokio-Tasks geteilt werden koennen.

use funkraum_observability::RelayMetrics;
use funkraum_protocol::FrameCodec;
use std::sync::Arc;
use std::time::Instant;

use crate::broadcast::RoomBroadcaster;
use crate::registry::RoomRegistry;

/// Verhaltens-Konfiguration des Relays
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Absender bekommt seine eigenen VOICE_DATA-Frames zurueck
    pub sprachdaten_echo: bool,
    /// Nach dem Verlassen eines Mitglieds ROOM_STATE an den Rest senden
    pub raumstatus_bei_verlassen: bool,
    /// Raum entfernen, sobald das letzte Mitglied gegangen ist
    pub leere_raeume_entfernen: bool,
    /// Maximale Payload-Groesse pro Frame (None = nur 32-Bit-Limit)
    pub max_frame_groesse: Option<usize>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sprachdaten_echo: true,
            raumstatus_bei_verlassen: false,
            leere_raeume_entfernen: false,
            max_frame_groesse: None,
        }
    }
}

/// Gemeinsamer Relay-Zustand (thread-safe, Arc-geteilt)
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    /// Raum -> Mitglieder
    pub registry: Arc<RoomRegistry>,
    /// Fan-out an Raum-Mitglieder
    pub broadcaster: RoomBroadcaster,
    pub metriken: RelayMetrics,
    /// Startzeitpunkt (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl RelayState {
    pub fn neu(config: RelayConfig, metriken: RelayMetrics) -> Arc<Self> {
        let registry = Arc::new(RoomRegistry::neu(config.leere_raeume_entfernen));
        let broadcaster = RoomBroadcaster::neu(Arc::clone(&registry), metriken.clone());
        Arc::new(Self {
            config: Arc::new(config),
            registry,
            broadcaster,
            metriken,
            start_time: Instant::now(),
        })
    }

    /// Codec mit dem konfigurierten Groessenlimit
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::aus_option(self.config.max_frame_groesse)
    }

    /// Uebertraegt die Registry-Groessen in die Gauges
    pub fn gauges_aktualisieren(&self) {
        self.metriken
            .sessions_active
            .set(self.registry.session_anzahl() as i64);
        self.metriken
            .rooms_active
            .set(self.registry.raum_anzahl() as i64);
    }

    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
