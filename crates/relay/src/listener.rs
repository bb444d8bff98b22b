//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `RelayServer` akzeptiert Verbindungen in einer Schleife und startet
//! fuer jede einen eigenen tokio-Task mit einer `ClientSession`. Ein
//! fehlerhafter Client beendet nur seinen eigenen Task.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::session::ClientSession;
use crate::state::RelayState;

/// TCP-Relay-Server
pub struct RelayServer {
    state: Arc<RelayState>,
    listener: TcpListener,
}

impl RelayServer {
    /// Bindet den Socket
    ///
    /// Getrennt von `starten`, damit Bind-Fehler vor dem Start sichtbar
    /// werden und Port 0 aufgeloest werden kann.
    pub async fn binden(state: Arc<RelayState>, bind_addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self { state, listener })
    }

    /// Tatsaechlich gebundene Adresse
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Akzeptiert Verbindungen bis `shutdown_rx` ein `true`-Signal empfaengt
    ///
    /// Bereits laufende Sessions werden beim Shutdown nicht abgebrochen.
    pub async fn starten(self, mut shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        let lokale_addr = self.listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "TCP Relay-Server gestartet");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(peer = %peer_addr, fehler = %e, "TCP_NODELAY nicht gesetzt");
                            }
                            self.state.metriken.connections_total.inc();
                            tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");

                            let (leser, schreiber) = stream.into_split();
                            let session = ClientSession::neu(
                                Arc::clone(&self.state),
                                peer_addr,
                                leser,
                                schreiber,
                            );

                            tokio::spawn(async move {
                                // Ergebnis wird bereits in der Session geloggt
                                let _ = session.verarbeiten().await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Relay-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("TCP Relay-Server gestoppt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RelayConfig;
    use funkraum_observability::RelayMetrics;
    use std::time::Duration;

    #[tokio::test]
    async fn bindet_auf_freiem_port_und_stoppt() {
        let state = RelayState::neu(RelayConfig::default(), RelayMetrics::neu().unwrap());
        let server = RelayServer::binden(Arc::clone(&state), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.lokale_adresse().unwrap();
        assert_ne!(addr.port(), 0);

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(server.starten(rx));

        let _stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.metriken.connections_total.get(), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn belegter_port_ist_bind_fehler() {
        let state = RelayState::neu(RelayConfig::default(), RelayMetrics::neu().unwrap());
        let erster = RelayServer::binden(Arc::clone(&state), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = erster.lokale_adresse().unwrap();
        assert!(RelayServer::binden(state, addr).await.is_err());
    }
}
