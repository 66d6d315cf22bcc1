use entregas_core::{DeliveryCache, SyncConfig};
use entregas_sync::{HttpArtifactStore, HttpEventSink, SyncEngine, SyncSettings};
use std::error::Error;
use std::sync::Arc;

/// Host embebido del motor de entregas.
///
/// Lee la configuración `ENTREGAS_*` (y `.env`), abre el almacén SQLite de
/// `ENTREGAS_DB_URL`, poda lo vencido según `ENTREGAS_RETENTION_DAYS` y
/// corre un ciclo de drenado del outbox. Sin argumentos.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SyncConfig::from_env()?;
    // aplica las migraciones embebidas si hace falta
    let store = Arc::new(entregas_persistence::new_from_env()?);

    match store.purge_older_than(config.retention_days) {
        Ok(purged) => log::info!("poda de {} días: {} entregas, {} artefactos, {} fotos",
                                 config.retention_days,
                                 purged.deliveries,
                                 purged.artifacts,
                                 purged.photos),
        // la poda es mantenimiento; no impide drenar
        Err(e) => log::warn!("poda fallida: {}", e),
    }

    let engine = SyncEngine::new(store,
                                 Arc::new(HttpArtifactStore::from_config(&config)?),
                                 Arc::new(HttpEventSink::from_config(&config)?),
                                 SyncSettings::from(&config));
    let report = engine.drain().await?;
    let status = engine.status();
    log::info!("ciclo terminado: {} enviados, {} fallidos, {} pendientes",
               report.succeeded,
               report.failed,
               status.pending_count);
    if let Some(error) = status.sync_error {
        log::warn!("{}", error);
    }
    Ok(())
}
