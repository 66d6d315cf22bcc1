// Archivo: event_sink.rs
// Propósito: enviar eventos de completitud como JSON a un webhook.
use super::{http_client, read_success_body, transport_error};
use async_trait::async_trait;
use entregas_core::{CompletionEvent, EventSink, Result, SyncConfig, SyncError};
use std::time::Duration;

/// Sumidero de eventos sobre HTTP POST.
///
/// Fallo: error de red, respuesta no-2xx o un cuerpo no vacío que no es JSON.
pub struct HttpEventSink {
    client: reqwest::Client,
    url: String,
}

impl HttpEventSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self { client: http_client(timeout)?, url: url.into() })
    }

    /// Requiere `ENTREGAS_EVENT_SINK_URL`.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let url = config.event_sink_url
                        .clone()
                        .ok_or_else(|| SyncError::Config("ENTREGAS_EVENT_SINK_URL no configurada".into()))?;
        Self::new(url, config.http_timeout)
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn submit(&self, event: &CompletionEvent) -> Result<()> {
        let response = self.client.post(&self.url).json(event).send().await.map_err(transport_error)?;
        let body = read_success_body(response).await?;
        if !body.trim().is_empty() {
            serde_json::from_str::<serde_json::Value>(&body).map_err(|e| {
                SyncError::Malformed(format!("respuesta del sumidero no es JSON: {}", e))
            })?;
        }
        log::debug!("evento {} aceptado por el sumidero", event.key());
        Ok(())
    }
}
