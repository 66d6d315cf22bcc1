// Archivo: config.rs
// Propósito: configuración del motor leída del entorno (`.env` incluido).
// No existe CLI: el motor corre embebido en el proceso anfitrión.
use crate::errors::{Result, SyncError};
use std::time::Duration;

/// Configuración del motor de sincronización y de sus colaboradores.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub database_url: String,
    pub event_sink_url: Option<String>,
    pub artifact_upload_url: Option<String>,
    pub artifact_folder: Option<String>,
    pub artifact_token: Option<String>,
    pub ledger_base_url: String,
    pub ledger_api_key: Option<String>,
    pub planning_sheet_id: Option<String>,
    pub planning_range: String,
    pub completion_sheet_id: Option<String>,
    pub completion_range: String,
    pub clients_range: String,
    /// Techo de reintentos automáticos por item.
    pub max_retries: u32,
    /// Base del backoff exponencial de subida de artefactos.
    pub backoff_base: Duration,
    /// Intentos en proceso por cada subida dentro de un ciclo.
    pub upload_attempts: u32,
    /// Ventana de retención de cachés locales, en días.
    pub retention_days: u32,
    /// Timeout a nivel transporte de cada request.
    pub http_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig { database_url: "entregas.db".into(),
                     event_sink_url: None,
                     artifact_upload_url: None,
                     artifact_folder: None,
                     artifact_token: None,
                     ledger_base_url: "https://sheets.googleapis.com/v4/spreadsheets".into(),
                     ledger_api_key: None,
                     planning_sheet_id: None,
                     planning_range: "BASE!A:M".into(),
                     completion_sheet_id: None,
                     completion_range: "Sistema_entregas!A:N".into(),
                     clients_range: "Clientes!A:B".into(),
                     max_retries: 5,
                     backoff_base: Duration::from_secs(2),
                     upload_attempts: 3,
                     retention_days: 7,
                     http_timeout: Duration::from_secs(30) }
    }
}

impl SyncConfig {
    /// Carga `.env` (si existe) y lee las variables `ENTREGAS_*`. Los
    /// valores ausentes toman el default; los numéricos inválidos son error.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables inyectada.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
        where F: Fn(&str) -> Option<String>
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = SyncConfig::default();

        let number = |key: &str, default: u64| -> Result<u64> {
            match get(key) {
                Some(raw) => raw.parse::<u64>()
                                .map_err(|_| SyncError::Config(format!("{} no es un entero válido: {}", key, raw))),
                None => Ok(default),
            }
        };

        Ok(SyncConfig { database_url: get("ENTREGAS_DB_URL").or_else(|| get("DATABASE_URL"))
                                                            .unwrap_or(defaults.database_url),
                        event_sink_url: get("ENTREGAS_EVENT_SINK_URL"),
                        artifact_upload_url: get("ENTREGAS_ARTIFACT_UPLOAD_URL"),
                        artifact_folder: get("ENTREGAS_ARTIFACT_FOLDER"),
                        artifact_token: get("ENTREGAS_ARTIFACT_TOKEN"),
                        ledger_base_url: get("ENTREGAS_LEDGER_BASE_URL").unwrap_or(defaults.ledger_base_url),
                        ledger_api_key: get("ENTREGAS_LEDGER_API_KEY"),
                        planning_sheet_id: get("ENTREGAS_PLANNING_SHEET_ID"),
                        planning_range: get("ENTREGAS_PLANNING_RANGE").unwrap_or(defaults.planning_range),
                        completion_sheet_id: get("ENTREGAS_COMPLETION_SHEET_ID"),
                        completion_range: get("ENTREGAS_COMPLETION_RANGE").unwrap_or(defaults.completion_range),
                        clients_range: get("ENTREGAS_CLIENTS_RANGE").unwrap_or(defaults.clients_range),
                        max_retries: number("ENTREGAS_MAX_RETRIES", defaults.max_retries as u64)? as u32,
                        backoff_base: Duration::from_millis(number("ENTREGAS_BACKOFF_BASE_MS",
                                                                   defaults.backoff_base.as_millis() as u64)?),
                        upload_attempts: number("ENTREGAS_UPLOAD_ATTEMPTS", defaults.upload_attempts as u64)?.max(1)
                                         as u32,
                        retention_days: number("ENTREGAS_RETENTION_DAYS", defaults.retention_days as u64)? as u32,
                        http_timeout: Duration::from_secs(number("ENTREGAS_HTTP_TIMEOUT_SECS",
                                                                 defaults.http_timeout.as_secs())?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = SyncConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, SyncConfig::default());
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.backoff_base, Duration::from_secs(2));
    }

    #[test]
    fn reads_overrides_and_falls_back_to_database_url() {
        let vars: HashMap<&str, &str> = [("DATABASE_URL", "/tmp/x.db"),
                                         ("ENTREGAS_MAX_RETRIES", "8"),
                                         ("ENTREGAS_BACKOFF_BASE_MS", "10"),
                                         ("ENTREGAS_EVENT_SINK_URL", " http://sink/hook "),
                                         ("ENTREGAS_ARTIFACT_FOLDER", "")].into_iter()
                                                                          .collect();
        let cfg = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.database_url, "/tmp/x.db");
        assert_eq!(cfg.max_retries, 8);
        assert_eq!(cfg.backoff_base, Duration::from_millis(10));
        assert_eq!(cfg.event_sink_url.as_deref(), Some("http://sink/hook"));
        assert_eq!(cfg.artifact_folder, None);
    }

    #[test]
    fn invalid_number_is_config_error() {
        let err = SyncConfig::from_lookup(|k| (k == "ENTREGAS_RETENTION_DAYS").then(|| "siete".to_string())).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
