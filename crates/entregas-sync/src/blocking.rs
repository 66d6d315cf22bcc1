// Archivo: blocking.rs
// Propósito: correr las llamadas al almacén local (síncrono, SQLite con
// `fsync`) en el pool de `spawn_blocking` en vez del hilo del runtime.
use entregas_core::{LocalStore, Result, SyncError};
use std::sync::Arc;

pub(crate) async fn with_store<T, F>(store: &Arc<dyn LocalStore>, f: F) -> Result<T>
    where F: FnOnce(&dyn LocalStore) -> Result<T> + Send + 'static,
          T: Send + 'static
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref())).await
                                                          .map_err(|e| {
                                                              SyncError::Other(format!("tarea de almacenamiento: {}",
                                                                                       e))
                                                          })?
}
