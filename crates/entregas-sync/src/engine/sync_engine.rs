// Archivo: sync_engine.rs
// Propósito: drenar el outbox durable contra el almacén de artefactos y el
// sumidero de eventos, con techo de reintentos y backoff en las subidas.
//
// Un solo drenado activo a la vez: la bandera `syncing` se toma con
// compare-and-swap y se libera con un guard (también si el futuro se
// cancela). Los items se procesan en orden FIFO, uno por vez.
//
// Un evento de completitud no sale mientras su parada tenga un
// `ARTIFACT_UPLOAD` en el outbox; cada subida exitosa agrega su link al
// evento encolado y a la entrega cacheada antes de borrar el item.
use super::backoff::backoff_delay;
use crate::blocking;
use chrono::Utc;
use entregas_core::{ArtifactRef, ArtifactStore, ArtifactUpload, DrainReport, EventSink, LocalStore, OutboxItem,
                    OutboxPayload, Result, StopKey, SyncConfig, SyncError, SyncStatus};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Parámetros del motor derivados de `SyncConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Techo de reintentos automáticos (dead-letter a partir de ahí).
    pub max_retries: u32,
    pub backoff_base: Duration,
    /// Intentos en proceso por subida de artefacto dentro de un ciclo.
    pub upload_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        SyncSettings { max_retries: config.max_retries,
                       backoff_base: config.backoff_base,
                       upload_attempts: config.upload_attempts.max(1) }
    }
}

/// Resultado exitoso de un item, usado para los efectos locales posteriores.
enum Delivered {
    Artifact { stop: Option<StopKey>, filename: String, reference: ArtifactRef },
    Event(StopKey),
}

struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Motor de sincronización del outbox.
///
/// El almacén es síncrono; cada acceso corre en `spawn_blocking` para no
/// frenar el runtime mientras SQLite hace `fsync`.
pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    artifacts: Arc<dyn ArtifactStore>,
    events: Arc<dyn EventSink>,
    settings: SyncSettings,
    syncing: AtomicBool,
    status: Mutex<SyncStatus>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn LocalStore>,
               artifacts: Arc<dyn ArtifactStore>,
               events: Arc<dyn EventSink>,
               settings: SyncSettings)
               -> Self {
        Self { store,
               artifacts,
               events,
               settings,
               syncing: AtomicBool::new(false),
               status: Mutex::new(SyncStatus::default()) }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Foto del estado agregado para la UI.
    pub fn status(&self) -> SyncStatus {
        self.lock_status().clone()
    }

    /// `true` mientras hay un ciclo de drenado en curso.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Recalcula `pending_count` desde el almacén y lo devuelve.
    pub async fn refresh_pending(&self) -> Result<u64> {
        let max = self.settings.max_retries;
        let count = self.with_store(move |s| s.count_pending(max)).await?;
        let mut status = self.lock_status();
        status.pending_count = count;
        status.is_pending = count > 0;
        Ok(count)
    }

    /// Ejecuta un ciclo de drenado. Si ya hay uno en curso devuelve
    /// `DrainReport::skipped()` sin tocar el almacén.
    ///
    /// Los fallos de items se absorben (reintentos) y se resumen en
    /// `sync_error`; un fallo del almacén aborta el ciclo y se devuelve.
    pub async fn drain(&self) -> Result<DrainReport> {
        if self.syncing.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            log::debug!("drenado ya en curso; solicitud descartada");
            return Ok(DrainReport::skipped());
        }
        let _guard = SyncingGuard(&self.syncing);
        self.lock_status().is_syncing = true;

        let result = self.drain_items().await;
        let pending = match self.refresh_pending().await {
            Ok(n) => Some(n),
            Err(e) => {
                log::warn!("no se pudo recontar el outbox: {}", e);
                None
            }
        };

        let mut status = self.lock_status();
        status.is_syncing = false;
        match &result {
            Ok(report) => {
                status.last_sync = Some(Utc::now());
                status.sync_error = (report.failed > 0).then(|| format!("{} items failed to sync", report.failed));
                log::info!("drenado terminado: {} intentados, {} ok, {} fallidos, {} retenidos, {} pendientes",
                           report.attempted,
                           report.succeeded,
                           report.failed,
                           report.deferred,
                           pending.map(|n| n.to_string()).unwrap_or_else(|| "?".into()));
            }
            Err(e) => {
                status.sync_error = Some(e.to_string());
                log::error!("drenado abortado: {}", e);
            }
        }
        result
    }

    /// Acción manual: reinicia los items con algún fallo registrado
    /// (`retries > 0`, incluidos los dead-letter) y drena.
    pub async fn retry_failed(&self) -> Result<DrainReport> {
        let failed: Vec<String> = self.with_store(|s| {
                                          Ok(s.list_all()?
                                              .into_iter()
                                              .filter(|i| i.retries > 0)
                                              .map(|i| i.id)
                                              .collect())
                                      })
                                      .await?;
        let reset = self.with_store(move |s| s.reset_retries(&failed)).await?;
        log::info!("reintento manual: {} items reiniciados", reset);
        self.drain().await
    }

    async fn drain_items(&self) -> Result<DrainReport> {
        let max = self.settings.max_retries;
        let items = self.with_store(move |s| s.list_pending(max)).await?;
        // incluye dead-letters: un artefacto trabado también retiene su evento
        let mut awaiting = self.with_store(|s| s.list_all().map(|all| queued_artifacts(&all))).await?;
        let mut patched: HashSet<StopKey> = HashSet::new();
        let mut report = DrainReport::default();

        for mut item in items {
            let event_key = match &item.payload {
                OutboxPayload::CompletionEvent(event) => Some(event.key()),
                OutboxPayload::ArtifactUpload(_) => None,
            };
            if let Some(key) = event_key {
                if awaiting.get(&key).copied().unwrap_or(0) > 0 {
                    log::debug!("evento {} retenido: la parada {} tiene artefactos en cola", item.id, key);
                    report.deferred += 1;
                    continue;
                }
                if patched.contains(&key) {
                    let id = item.id.clone();
                    match self.with_store(move |s| s.get(&id)).await? {
                        Some(current) => item = current,
                        None => continue,
                    }
                }
            }

            report.attempted += 1;
            match self.dispatch(&item).await {
                Ok(Delivered::Artifact { stop, filename, reference }) => {
                    // el link se registra antes de borrar el item; si falla,
                    // la subida se repite en el próximo ciclo
                    if let Some(key) = stop {
                        let target = key.clone();
                        self.with_store(move |s| attach_artifact(s, &target, &filename, &reference)).await?;
                        if let Some(n) = awaiting.get_mut(&key) {
                            *n = n.saturating_sub(1);
                        }
                        patched.insert(key);
                    }
                    let id = item.id.clone();
                    self.with_store(move |s| s.mark_attempt(&id, true, None)).await?;
                    report.succeeded += 1;
                }
                Ok(Delivered::Event(key)) => {
                    let id = item.id.clone();
                    self.with_store(move |s| s.mark_attempt(&id, true, None)).await?;
                    report.succeeded += 1;
                    self.apply_delivered(key).await;
                }
                Err(e) => {
                    log::warn!("item {} falló (intento {}): {}", item.id, item.retries + 1, e);
                    let id = item.id.clone();
                    let message = e.to_string();
                    self.with_store(move |s| s.mark_attempt(&id, false, Some(message.as_str()))).await?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn dispatch(&self, item: &OutboxItem) -> Result<Delivered> {
        match &item.payload {
            OutboxPayload::ArtifactUpload(upload) => {
                let reference = self.upload_with_backoff(upload).await?;
                Ok(Delivered::Artifact { stop: upload.stop.clone(), filename: upload.filename.clone(), reference })
            }
            OutboxPayload::CompletionEvent(event) => {
                self.events.submit(event).await?;
                Ok(Delivered::Event(event.key()))
            }
        }
    }

    async fn upload_with_backoff(&self, upload: &ArtifactUpload) -> Result<ArtifactRef> {
        let attempts = self.settings.upload_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.artifacts.upload(upload).await {
                Ok(reference) => return Ok(reference),
                Err(e) => {
                    log::debug!("subida de {} falló ({}/{}): {}", upload.filename, attempt, attempts, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(backoff_delay(self.settings.backoff_base, attempt)).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SyncError::Other(format!("subida de {} sin intentos", upload.filename))))
    }

    /// Efectos locales de un evento entregado. El item ya salió del
    /// outbox, así que un fallo acá sólo se registra.
    async fn apply_delivered(&self, key: StopKey) {
        let outcome = self.with_store(move |s| {
                              s.mark_delivery_synced(&key)?;
                              // las fotos ya viajaron dentro de los artefactos de la parada
                              s.mark_photos_processed(&key)
                          })
                          .await;
        if let Err(e) = outcome {
            log::warn!("no se pudo actualizar la caché local tras el envío: {}", e);
        }
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T>
        where F: FnOnce(&dyn LocalStore) -> Result<T> + Send + 'static,
              T: Send + 'static
    {
        blocking::with_store(&self.store, f).await
    }

    fn lock_status(&self) -> MutexGuard<'_, SyncStatus> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cantidad de `ARTIFACT_UPLOAD` en el outbox por parada.
fn queued_artifacts(items: &[OutboxItem]) -> HashMap<StopKey, usize> {
    let mut counts = HashMap::new();
    for item in items {
        if let OutboxPayload::ArtifactUpload(ArtifactUpload { stop: Some(key), .. }) = &item.payload {
            *counts.entry(key.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// Registra el link de un artefacto subido: en su fila de la caché, en los
/// eventos encolados de la misma parada y en la entrega cacheada, que pasa
/// al estado que declara su evento.
fn attach_artifact(store: &dyn LocalStore, key: &StopKey, filename: &str, reference: &ArtifactRef) -> Result<()> {
    store.mark_artifact_uploaded(key, filename, reference)?;

    let mut declared = None;
    for item in store.list_all()? {
        if let OutboxPayload::CompletionEvent(mut event) = item.payload {
            if event.key() != *key {
                continue;
            }
            declared = Some(event.state);
            if event.attach_artifact(&reference.link) {
                store.replace_payload(&item.id, &OutboxPayload::CompletionEvent(event))?;
            }
        }
    }

    if let Some(mut record) = store.get_delivery(key)? {
        let mut changed = false;
        if !record.artifact_urls.contains(&reference.link) {
            record.artifact_urls.push(reference.link.clone());
            changed = true;
        }
        if let Some(state) = declared.filter(|s| *s != record.state) {
            record.state = state;
            changed = true;
        }
        if changed {
            record.updated_at = Utc::now();
            record.synced = false;
            store.save_delivery(&record)?;
        }
    }
    log::debug!("artefacto {} de {} registrado como {}", filename, key, reference.link);
    Ok(())
}
