//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (hat Vorrang vor der Konfigurationsdatei):
//! - `FK_LOG_LEVEL`: Log-Level oder EnvFilter-Direktive, Standard: info
//! - `FK_LOG_FORMAT`: Format (text/json), Standard: text

use tracing_subscriber::{fmt, EnvFilter};

/// Umgebungsvariable fuer den Log-Level
pub const ENV_LOG_LEVEL: &str = "FK_LOG_LEVEL";

/// Umgebungsvariable fuer das Log-Format
pub const ENV_LOG_FORMAT: &str = "FK_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// `level` und `format` stammen aus der Konfiguration und werden von
/// `FK_LOG_LEVEL` / `FK_LOG_FORMAT` ueberschrieben.
pub fn logging_initialisieren(level: &str, format: &str) {
    let aus_env = EnvFilter::try_from_env(ENV_LOG_LEVEL).ok();
    let level_verworfen = aus_env.is_none() && !filter_gueltig(level);
    let filter = aus_env
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let format = format_waehlen(std::env::var(ENV_LOG_FORMAT).ok(), format);

    match format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }

    if level_verworfen {
        tracing::warn!(level = level, "Ungueltiger Log-Level in der Konfiguration, verwende info");
    }
}

/// Prueft ob `level` als Filter taugt: einfacher Level oder EnvFilter-Direktive
pub fn filter_gueltig(level: &str) -> bool {
    log_level_gueltig(level) || EnvFilter::try_new(level).is_ok()
}

/// Waehlt das Log-Format: gueltiger Umgebungswert vor Konfigurationswert,
/// Fallback "text".
pub fn format_waehlen(aus_env: Option<String>, aus_config: &str) -> String {
    match aus_env {
        Some(f) if log_format_gueltig(&f) => f,
        _ if log_format_gueltig(aus_config) => aus_config.to_string(),
        _ => "text".to_string(),
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
