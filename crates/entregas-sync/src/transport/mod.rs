// Archivo: mod.rs
// Propósito: colaboradores remotos concretos sobre HTTP (reqwest).
mod artifact_store;
mod event_sink;
mod sheets;

pub use artifact_store::HttpArtifactStore;
pub use event_sink::HttpEventSink;
pub use sheets::SheetsLedgerClient;

use entregas_core::{Result, SyncError};
use std::time::Duration;

/// Largo máximo del cuerpo de error guardado en `SyncError::Rejected`.
const MAX_ERROR_BODY: usize = 512;

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout)
                              .build()
                              .map_err(|e| SyncError::Config(format!("cliente http: {}", e)))
}

pub(crate) fn transport_error(e: reqwest::Error) -> SyncError {
    SyncError::Transport(e.to_string())
}

/// Lee el cuerpo y convierte cualquier respuesta no-2xx en `Rejected`.
pub(crate) async fn read_success_body(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    if !status.is_success() {
        let mut body = body;
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        return Err(SyncError::Rejected { status: status.as_u16(), body });
    }
    Ok(body)
}
