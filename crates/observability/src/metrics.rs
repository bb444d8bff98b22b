//! Prometheus-kompatible Metriken fuer das Relay
//!
//! Registrierte Metriken:
//! - `funkraum_connections_total` – Counter: Angenommene TCP-Verbindungen
//! - `funkraum_sessions_active` – Gauge: Sessions nach erfolgreichem Handshake
//! - `funkraum_rooms_active` – Gauge: Raeume in der Registry
//! - `funkraum_frames_received_total` – Counter: Empfangene Frames (type)
//! - `funkraum_handshakes_rejected_total` – Counter: Abgelehnte Handshakes
//! - `funkraum_broadcast_deliveries_total` – Counter: Zugestellte Broadcast-Frames
//! - `funkraum_broadcast_failures_total` – Counter: Fehlgeschlagene Zustellungen

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Relay-Metriken
///
/// Jede Instanz hat ihre eigene Registry, damit parallele Tests sich nicht
/// gegenseitig beeinflussen. Clone teilt die Zaehler.
#[derive(Clone)]
pub struct RelayMetrics {
    pub registry: Arc<Registry>,

    pub connections_total: IntCounter,
    pub sessions_active: IntGauge,
    pub rooms_active: IntGauge,
    pub frames_received_total: IntCounterVec,
    pub handshakes_rejected_total: IntCounter,
    pub broadcast_deliveries_total: IntCounter,
    pub broadcast_failures_total: IntCounter,
}

impl RelayMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connections_total = IntCounter::with_opts(Opts::new(
            "funkraum_connections_total",
            "Anzahl angenommener TCP-Verbindungen",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let sessions_active = IntGauge::with_opts(Opts::new(
            "funkraum_sessions_active",
            "Anzahl aktiver Sessions (nach Handshake)",
        ))?;
        registry.register(Box::new(sessions_active.clone()))?;

        let rooms_active = IntGauge::with_opts(Opts::new(
            "funkraum_rooms_active",
            "Anzahl Raeume in der Registry",
        ))?;
        registry.register(Box::new(rooms_active.clone()))?;

        let frames_received_total = IntCounterVec::new(
            Opts::new(
                "funkraum_frames_received_total",
                "Empfangene Frames nach Nachrichtentyp",
            ),
            &["type"],
        )?;
        registry.register(Box::new(frames_received_total.clone()))?;

        let handshakes_rejected_total = IntCounter::with_opts(Opts::new(
            "funkraum_handshakes_rejected_total",
            "Abgelehnte Handshakes (Name vergeben oder ungueltig)",
        ))?;
        registry.register(Box::new(handshakes_rejected_total.clone()))?;

        let broadcast_deliveries_total = IntCounter::with_opts(Opts::new(
            "funkraum_broadcast_deliveries_total",
            "Erfolgreich zugestellte Broadcast-Frames",
        ))?;
        registry.register(Box::new(broadcast_deliveries_total.clone()))?;

        let broadcast_failures_total = IntCounter::with_opts(Opts::new(
            "funkraum_broadcast_failures_total",
            "Fehlgeschlagene Broadcast-Zustellungen",
        ))?;
        registry.register(Box::new(broadcast_failures_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connections_total,
            sessions_active,
            rooms_active,
            frames_received_total,
            handshakes_rejected_total,
            broadcast_deliveries_total,
            broadcast_failures_total,
        })
    }

    /// Zaehlt einen empfangenen Frame
    pub fn frame_empfangen(&self, typ: &str) {
        self.frames_received_total.with_label_values(&[typ]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: RelayMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<RelayMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = RelayMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn instanzen_sind_unabhaengig() {
        let a = RelayMetrics::neu().unwrap();
        let b = RelayMetrics::neu().unwrap();
        a.connections_total.inc();
        assert_eq!(a.connections_total.get(), 1);
        assert_eq!(b.connections_total.get(), 0);
    }

    #[test]
    fn frames_nach_typ_zaehlen() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.frame_empfangen("VOICE_DATA");
        metriken.frame_empfangen("VOICE_DATA");
        metriken.frame_empfangen("START_TALKING");
        assert_eq!(
            metriken
                .frames_received_total
                .with_label_values(&["VOICE_DATA"])
                .get(),
            2
        );
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.sessions_active.set(3);
        metriken.broadcast_failures_total.inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("funkraum_sessions_active 3"));
        assert!(output.contains("funkraum_broadcast_failures_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
