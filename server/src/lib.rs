//! funkraum-server – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Relay und Observability und stellt den
//! oeffentlichen Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use anyhow::{Context, Result};
use config::ServerConfig;
use funkraum_observability::{observability_server_starten, HealthState, RelayMetrics};
use funkraum_relay::{RelayServer, RelayState};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let gebunden = self.binden().await?;
        gebunden
            .ausfuehren(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(fehler = %e, "Ctrl-C-Handler nicht verfuegbar");
                    std::future::pending::<()>().await;
                }
            })
            .await
    }

    /// Bindet den Relay-Listener; ein Bind-Fehler ist fatal
    pub async fn binden(self) -> Result<GebundenerServer> {
        let tcp_addr = self.config.tcp_bind_adresse()?;

        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %tcp_addr,
            echo = self.config.relay.sprachdaten_echo,
            "Server startet"
        );

        let metriken = RelayMetrics::neu()?;
        let state = RelayState::neu(self.config.relay_config(), metriken.clone());
        let health = HealthState::neu(metriken);

        let relay = RelayServer::binden(Arc::clone(&state), tcp_addr)
            .await
            .with_context(|| format!("TCP-Listener konnte nicht an {tcp_addr} gebunden werden"))?;

        Ok(GebundenerServer {
            config: self.config,
            state,
            health,
            relay,
        })
    }
}

/// Server mit gebundenem Listener, noch ohne Accept-Loop
pub struct GebundenerServer {
    config: ServerConfig,
    state: Arc<RelayState>,
    health: HealthState,
    relay: RelayServer,
}

impl GebundenerServer {
    pub fn relay_adresse(&self) -> Result<SocketAddr> {
        Ok(self.relay.lokale_adresse()?)
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Laeuft bis `shutdown` fertig ist oder der Listener ausfaellt
    ///
    /// Reihenfolge:
    /// 1. Observability-Server starten (falls aktiviert)
    /// 2. Accept-Loop des Relays starten
    /// 3. Auf Shutdown warten
    pub async fn ausfuehren<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if self.config.observability.aktiviert {
            let addr = self.config.observability_bind_adresse()?;
            let health = self.health.clone();
            tokio::spawn(async move {
                if let Err(e) = observability_server_starten(addr, health).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            });
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.health.listener_status_setzen(true);
        let mut relay_task = tokio::spawn(self.relay.starten(shutdown_rx));

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");

        let ergebnis = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
                let _ = shutdown_tx.send(true);
                (&mut relay_task).await
            }
            beendet = &mut relay_task => beendet,
        };
        self.health.listener_status_setzen(false);

        ergebnis
            .context("Relay-Task abgebrochen")?
            .context("Relay-Listener fehlgeschlagen")?;

        tracing::info!(
            sessions = self.state.registry.session_anzahl(),
            uptime_sek = self.state.uptime_sek(),
            "Server gestoppt"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funkraum_client::{BeitrittsErgebnis, VoiceClient};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.netzwerk.bind_adresse = "127.0.0.1".into();
        config.netzwerk.tcp_port = 0;
        config.observability.aktiviert = false;
        config
    }

    #[tokio::test]
    async fn startet_nimmt_clients_an_und_stoppt() {
        let gebunden = Server::neu(test_config()).binden().await.unwrap();
        let addr = gebunden.relay_adresse().unwrap();
        let state = Arc::clone(gebunden.state());

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(gebunden.ausfuehren(async {
            let _ = stop_rx.await;
        }));

        let mut client = VoiceClient::verbinden(addr).await.unwrap();
        assert_eq!(
            client.beitreten("A", "lobby").await.unwrap(),
            BeitrittsErgebnis::Angenommen
        );
        assert_eq!(state.registry.session_anzahl(), 1);

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn belegter_port_ist_fatal() {
        let erster = Server::neu(test_config()).binden().await.unwrap();
        let addr = erster.relay_adresse().unwrap();

        let mut config = test_config();
        config.netzwerk.tcp_port = addr.port();
        assert!(Server::neu(config).binden().await.is_err());
    }
}
