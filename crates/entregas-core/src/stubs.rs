// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// Incluye un almacén local en memoria (`InMemoryOutboxStore`), libros de
// registro en memoria y colaboradores remotos programables que fallan un
// número dado de veces antes de aceptar. Nada de esto es durable.
use crate::domain::{ArtifactRef, ArtifactUpload, CompletionEntry, CompletionEvent, DeliveryRecord, OutboxItem,
                    OutboxPayload, PlanningEntry, PurgeReport, StopKey};
use crate::errors::{Result, SyncError};
use crate::repository::{ArtifactStore, CompletionLedger, DeliveryCache, EventSink, OutboxStore, PlanningLedger};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct CachedArtifact {
    key: StopKey,
    filename: String,
    uploaded: Option<ArtifactRef>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CachedPhoto {
    key: StopKey,
    processed: bool,
    created_at: DateTime<Utc>,
}

/// Almacén local en memoria (no durable).
///
/// `set_fail_writes(true)` simula un almacenamiento no disponible: todas las
/// escrituras devuelven `SyncError::Storage`.
pub struct InMemoryOutboxStore {
    items: Mutex<Vec<OutboxItem>>,
    deliveries: Mutex<BTreeMap<StopKey, DeliveryRecord>>,
    artifacts: Mutex<HashMap<String, CachedArtifact>>,
    photos: Mutex<HashMap<String, CachedPhoto>>,
    fail_writes: AtomicBool,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self { items: Mutex::new(Vec::new()),
               deliveries: Mutex::new(BTreeMap::new()),
               artifacts: Mutex::new(HashMap::new()),
               photos: Mutex::new(HashMap::new()),
               fail_writes: AtomicBool::new(false) }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Helper para mapear `Mutex::lock()` en un `Result` con
    /// `SyncError::Storage`.
    fn lock<'a, T>(&'a self, m: &'a Mutex<T>) -> Result<MutexGuard<'a, T>> {
        m.lock().map_err(|e| SyncError::Storage(format!("mutex poisoned: {:?}", e)))
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("almacenamiento en memoria no disponible".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn enqueue(&self, payload: &OutboxPayload) -> Result<String> {
        self.check_writable()?;
        let item = OutboxItem::new(payload.clone());
        let id = item.id.clone();
        self.lock(&self.items)?.push(item);
        Ok(id)
    }

    fn enqueue_all(&self, payloads: &[OutboxPayload]) -> Result<Vec<String>> {
        self.check_writable()?;
        let batch: Vec<OutboxItem> = payloads.iter().cloned().map(OutboxItem::new).collect();
        let ids = batch.iter().map(|i| i.id.clone()).collect();
        self.lock(&self.items)?.extend(batch);
        Ok(ids)
    }

    fn replace_payload(&self, id: &str, payload: &OutboxPayload) -> Result<()> {
        self.check_writable()?;
        let mut items = self.lock(&self.items)?;
        let item = items.iter_mut()
                        .find(|i| i.id == id)
                        .ok_or_else(|| SyncError::NotFound(format!("outbox item {}", id)))?;
        if item.kind != payload.kind() {
            return Err(SyncError::Validation(format!("el item {} es {}, no {}",
                                                     id,
                                                     item.kind.as_str(),
                                                     payload.kind().as_str())));
        }
        item.payload = payload.clone();
        Ok(())
    }

    fn list_pending(&self, max_retries: u32) -> Result<Vec<OutboxItem>> {
        let items = self.lock(&self.items)?;
        Ok(items.iter().filter(|i| i.retries < max_retries).cloned().collect())
    }

    fn mark_attempt(&self, id: &str, success: bool, error: Option<&str>) -> Result<()> {
        self.check_writable()?;
        let mut items = self.lock(&self.items)?;
        let pos = items.iter()
                       .position(|i| i.id == id)
                       .ok_or_else(|| SyncError::NotFound(format!("outbox item {}", id)))?;
        if success {
            items.remove(pos);
        } else {
            let item = &mut items[pos];
            item.retries = item.retries.saturating_add(1);
            item.last_attempt = Some(Utc::now());
            item.last_error = Some(error.unwrap_or("error desconocido").to_string());
        }
        Ok(())
    }

    fn reset_retries(&self, ids: &[String]) -> Result<usize> {
        self.check_writable()?;
        let mut items = self.lock(&self.items)?;
        let mut reset = 0;
        for item in items.iter_mut().filter(|i| ids.contains(&i.id)) {
            item.retries = 0;
            item.last_error = None;
            reset += 1;
        }
        Ok(reset)
    }

    fn count_pending(&self, max_retries: u32) -> Result<u64> {
        Ok(self.lock(&self.items)?.iter().filter(|i| i.retries < max_retries).count() as u64)
    }

    fn list_all(&self) -> Result<Vec<OutboxItem>> {
        Ok(self.lock(&self.items)?.clone())
    }

    fn get(&self, id: &str) -> Result<Option<OutboxItem>> {
        Ok(self.lock(&self.items)?.iter().find(|i| i.id == id).cloned())
    }
}

impl DeliveryCache for InMemoryOutboxStore {
    fn save_delivery(&self, record: &DeliveryRecord) -> Result<()> {
        self.check_writable()?;
        self.lock(&self.deliveries)?.insert(record.key(), record.clone());
        Ok(())
    }

    fn get_delivery(&self, key: &StopKey) -> Result<Option<DeliveryRecord>> {
        Ok(self.lock(&self.deliveries)?.get(key).cloned())
    }

    fn list_deliveries(&self, trip_id: &str) -> Result<Vec<DeliveryRecord>> {
        Ok(self.lock(&self.deliveries)?.values().filter(|r| r.trip_id == trip_id).cloned().collect())
    }

    fn mark_delivery_synced(&self, key: &StopKey) -> Result<bool> {
        self.check_writable()?;
        match self.lock(&self.deliveries)?.get_mut(key) {
            Some(record) => {
                record.synced = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn record_artifact(&self, key: &StopKey, filename: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::new_v4().to_string();
        self.lock(&self.artifacts)?.insert(id.clone(),
                                           CachedArtifact { key: key.clone(),
                                                            filename: filename.to_string(),
                                                            uploaded: None,
                                                            created_at: Utc::now() });
        Ok(id)
    }

    fn mark_artifact_uploaded(&self, key: &StopKey, filename: &str, reference: &ArtifactRef) -> Result<bool> {
        self.check_writable()?;
        let mut artifacts = self.lock(&self.artifacts)?;
        let mut found = false;
        for artifact in artifacts.values_mut().filter(|a| &a.key == key && a.filename == filename) {
            artifact.uploaded = Some(reference.clone());
            found = true;
        }
        Ok(found)
    }

    fn cache_photo(&self, key: &StopKey, _content: &[u8]) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::new_v4().to_string();
        self.lock(&self.photos)?.insert(id.clone(),
                                        CachedPhoto { key: key.clone(), processed: false, created_at: Utc::now() });
        Ok(id)
    }

    fn mark_photos_processed(&self, key: &StopKey) -> Result<usize> {
        self.check_writable()?;
        let mut photos = self.lock(&self.photos)?;
        let mut marked = 0;
        for photo in photos.values_mut().filter(|p| &p.key == key && !p.processed) {
            photo.processed = true;
            marked += 1;
        }
        Ok(marked)
    }

    fn purge_older_than(&self, days: u32) -> Result<PurgeReport> {
        self.check_writable()?;
        let cutoff = Utc::now() - ChronoDuration::days(days as i64);
        let mut report = PurgeReport::default();

        let mut deliveries = self.lock(&self.deliveries)?;
        let before = deliveries.len();
        deliveries.retain(|_, r| !(r.synced && r.updated_at < cutoff));
        report.deliveries = before - deliveries.len();

        let mut artifacts = self.lock(&self.artifacts)?;
        let before = artifacts.len();
        artifacts.retain(|_, a| !(a.uploaded.is_some() && a.created_at < cutoff));
        report.artifacts = before - artifacts.len();

        let mut photos = self.lock(&self.photos)?;
        let before = photos.len();
        photos.retain(|_, p| !(p.processed && p.created_at < cutoff));
        report.photos = before - photos.len();

        Ok(report)
    }
}

impl InMemoryOutboxStore {
    /// Claves de paradas con artefactos cacheados (sólo para inspección en
    /// pruebas).
    pub fn artifact_keys(&self) -> Result<Vec<(StopKey, String, bool)>> {
        Ok(self.lock(&self.artifacts)?
               .values()
               .map(|a| (a.key.clone(), a.filename.clone(), a.uploaded.is_some()))
               .collect())
    }

    /// Cantidad de fotos cacheadas para una parada.
    pub fn photo_count(&self, key: &StopKey) -> Result<usize> {
        Ok(self.lock(&self.photos)?.values().filter(|p| &p.key == key).count())
    }

    /// Fotos de la parada todavía sin procesar.
    pub fn unprocessed_photos(&self, key: &StopKey) -> Result<usize> {
        Ok(self.lock(&self.photos)?.values().filter(|p| &p.key == key && !p.processed).count())
    }
}

/// Libros de planificación y completitud en memoria.
#[derive(Default)]
pub struct InMemoryLedger {
    planning: Mutex<Vec<PlanningEntry>>,
    completion: Mutex<Vec<CompletionEntry>>,
    fail_completion: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_planning(&self, entry: PlanningEntry) {
        self.planning.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
    }

    pub fn add_completion(&self, entry: CompletionEntry) {
        self.completion.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
    }

    /// Hace que las lecturas del libro de completitud fallen.
    pub fn set_fail_completion(&self, fail: bool) {
        self.fail_completion.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlanningLedger for InMemoryLedger {
    async fn planning_entries(&self, trip_id: &str) -> Result<Vec<PlanningEntry>> {
        let rows = self.planning.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows.iter().filter(|e| e.trip_id == trip_id).cloned().collect())
    }
}

#[async_trait]
impl CompletionLedger for InMemoryLedger {
    async fn completion_entries(&self, trip_id: &str) -> Result<Vec<CompletionEntry>> {
        if self.fail_completion.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("libro de completitud no disponible".into()));
        }
        let rows = self.completion.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows.iter().filter(|e| e.trip_id == trip_id).cloned().collect())
    }
}

/// Sumidero de eventos que falla las primeras `failures` llamadas y luego
/// acepta. Registra los eventos aceptados.
pub struct ScriptedEventSink {
    failures: AtomicUsize,
    calls: AtomicUsize,
    delay: Option<Duration>,
    accepted: Mutex<Vec<CompletionEvent>>,
}

impl ScriptedEventSink {
    pub fn new(failures: usize) -> Self {
        Self { failures: AtomicUsize::new(failures),
               calls: AtomicUsize::new(0),
               delay: None,
               accepted: Mutex::new(Vec::new()) }
    }

    /// Cada llamada espera `delay` antes de responder.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> Vec<CompletionEvent> {
        self.accepted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EventSink for ScriptedEventSink {
    async fn submit(&self, event: &CompletionEvent) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::Rejected { status: 503, body: "scripted failure".into() });
        }
        self.accepted.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
        Ok(())
    }
}

/// Almacén de artefactos que falla las primeras `failures` subidas.
pub struct ScriptedArtifactStore {
    failures: AtomicUsize,
    calls: AtomicUsize,
    uploaded: Mutex<Vec<String>>,
}

impl ScriptedArtifactStore {
    pub fn new(failures: usize) -> Self {
        Self { failures: AtomicUsize::new(failures), calls: AtomicUsize::new(0), uploaded: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ArtifactStore for ScriptedArtifactStore {
    async fn upload(&self, artifact: &ArtifactUpload) -> Result<ArtifactRef> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::Transport("scripted network failure".into()));
        }
        self.uploaded.lock().unwrap_or_else(|e| e.into_inner()).push(artifact.filename.clone());
        Ok(ArtifactRef { id: format!("file-{}", n),
                         link: format!("https://drive.example/file/d/file-{}/view", n) })
    }
}
