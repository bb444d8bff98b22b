//! Funkraum Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Server.

use anyhow::Result;
use funkraum_observability::logging_initialisieren;
use funkraum_server::{config::ServerConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("FUNKRAUM_CONFIG").unwrap_or_else(|_| "funkraum.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let datei_vorhanden = std::path::Path::new(&config_pfad).is_file();
    let config = ServerConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    if !datei_vorhanden {
        tracing::warn!(
            pfad = %config_pfad,
            "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
        );
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Funkraum Server wird initialisiert"
    );

    Server::neu(config).starten().await
}
