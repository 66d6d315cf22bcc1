// Archivo: intake.rs
// Propósito: punto de entrada de los productores de capturas. Valida la
// captura terminada, intenta subir los artefactos si hay red, actualiza la
// caché local y encola artefactos pendientes y evento en un solo lote.
use crate::blocking;
use chrono::Utc;
use entregas_core::{ArtifactRef, ArtifactStore, ArtifactUpload, CompletionEvent, DeliveryRecord, DeliveryState,
                    GeoPoint, LocalStore, OutboxPayload, Result, StopKey, SyncError, TripProgress};
use std::sync::Arc;

/// Captura terminada de una parada, tal como la entrega la UI.
#[derive(Debug, Clone, Default)]
pub struct FinishedCapture {
    pub trip_id: String,
    pub stop_number: u32,
    pub client_id: String,
    pub client_name: String,
    pub destination_detail: String,
    pub state: Option<DeliveryState>,
    pub receipt_numbers: Vec<String>,
    pub receiver_name: Option<String>,
    pub driver: String,
    pub carrier: String,
    pub trip_date: Option<String>,
    pub geolocation: Option<GeoPoint>,
    /// Fotos crudas; se cachean localmente y se cuentan en el evento.
    pub photos: Vec<Vec<u8>>,
    /// Artefactos generados (PDF) todavía no subidos.
    pub artifacts: Vec<ArtifactUpload>,
    /// Links de artefactos ya subidos por otra vía.
    pub artifact_urls: Vec<String>,
}

impl FinishedCapture {
    fn key(&self) -> StopKey {
        StopKey::new(self.trip_id.trim(), self.stop_number)
    }

    fn receiver(&self) -> Option<String> {
        self.receiver_name.as_deref().map(str::trim).filter(|r| !r.is_empty()).map(str::to_string)
    }

    /// Rechaza capturas incompletas antes de tocar el outbox.
    pub fn validate(&self) -> Result<()> {
        if self.trip_id.trim().is_empty() {
            return Err(SyncError::Validation("id de viaje vacío".into()));
        }
        if self.stop_number == 0 {
            return Err(SyncError::Validation("número de parada vacío".into()));
        }
        if self.stop_number > StopKey::MAX_STOP_NUMBER {
            return Err(SyncError::Validation(format!("número de parada fuera de rango: {}", self.stop_number)));
        }
        if self.state.unwrap_or(DeliveryState::Completed) == DeliveryState::Completed
           && self.receiver().is_none()
           && self.artifact_urls.is_empty()
           && self.artifacts.is_empty()
        {
            return Err(SyncError::Validation(format!("la parada {} no tiene receptor ni comprobante",
                                                     self.key())));
        }
        Ok(())
    }
}

/// Ids generados por una captura aceptada.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntakeReceipt {
    pub event_id: String,
    /// Ids de outbox de los artefactos que quedaron pendientes de subida.
    pub queued_artifacts: Vec<String>,
    /// Links de los artefactos subidos en el momento.
    pub uploaded_urls: Vec<String>,
    pub progress: TripProgress,
}

pub struct CaptureIntake {
    store: Arc<dyn LocalStore>,
    artifacts: Arc<dyn ArtifactStore>,
    default_folder: Option<String>,
}

impl CaptureIntake {
    pub fn new(store: Arc<dyn LocalStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { store, artifacts, default_folder: None }
    }

    /// Carpeta usada para artefactos que no indican una.
    pub fn with_default_folder(mut self, folder: impl Into<String>) -> Self {
        self.default_folder = Some(folder.into());
        self
    }

    /// Registra una captura terminada.
    ///
    /// Con `online = true` intenta una subida inmediata de cada artefacto
    /// (un solo intento); lo que falla, o todo si no hay red, se encola como
    /// `ARTIFACT_UPLOAD` junto con el `COMPLETION_EVENT` en una sola
    /// escritura del outbox. Si la única evidencia son artefactos en cola,
    /// la entrega cacheada queda `InProgress` hasta que el motor registre el
    /// link. Los errores del almacén se devuelven al productor.
    pub async fn submit(&self, capture: FinishedCapture, online: bool) -> Result<IntakeReceipt> {
        capture.validate()?;
        let key = capture.key();

        let mut uploaded = Vec::new();
        let mut queued = Vec::new();
        for artifact in &capture.artifacts {
            let artifact = self.prepare(artifact, &capture, &key);
            if online {
                match self.artifacts.upload(&artifact).await {
                    Ok(reference) => {
                        uploaded.push((artifact, reference));
                        continue;
                    }
                    Err(e) => log::warn!("subida inmediata de {} falló; se encola: {}", artifact.filename, e),
                }
            }
            queued.push(artifact);
        }

        let receipt = blocking::with_store(&self.store, move |s| commit(s, capture, uploaded, queued)).await?;
        log::info!("captura {} aceptada: {} artefactos encolados, {} subidos",
                   key,
                   receipt.queued_artifacts.len(),
                   receipt.uploaded_urls.len());
        Ok(receipt)
    }

    fn prepare(&self, artifact: &ArtifactUpload, capture: &FinishedCapture, key: &StopKey) -> ArtifactUpload {
        let mut artifact = artifact.clone().for_stop(key.clone());
        if artifact.folder.is_none() {
            artifact.folder = self.default_folder.clone().or_else(|| Some(capture.client_id.clone()));
        }
        artifact
    }
}

/// Escrituras locales de una captura validada. Las cachés van primero; el
/// outbox se escribe al final con `enqueue_all`, así que o entra la captura
/// completa o no entra nada.
fn commit(store: &dyn LocalStore,
          capture: FinishedCapture,
          uploaded: Vec<(ArtifactUpload, ArtifactRef)>,
          queued: Vec<ArtifactUpload>)
          -> Result<IntakeReceipt> {
    let key = capture.key();
    let state = capture.state.unwrap_or(DeliveryState::Completed);
    let receiver_name = capture.receiver();
    let uploaded_urls: Vec<String> = uploaded.iter().map(|(_, r)| r.link.clone()).collect();
    let mut artifact_urls = capture.artifact_urls.clone();
    artifact_urls.extend(uploaded_urls.iter().cloned());

    let mut record = match store.get_delivery(&key)? {
        Some(existing) => existing,
        None => DeliveryRecord::pending(key.trip_id.clone(),
                                        key.stop_number,
                                        capture.client_id.clone(),
                                        capture.client_name.clone(),
                                        capture.destination_detail.clone(),
                                        capture.trip_date.clone()),
    };
    let evidence_pending = receiver_name.is_none() && artifact_urls.is_empty();
    record.state = if state == DeliveryState::Completed && evidence_pending {
        DeliveryState::InProgress
    } else {
        state
    };
    record.receipt_numbers = capture.receipt_numbers.join(", ");
    record.receiver_name = receiver_name.clone();
    record.artifact_urls = artifact_urls.clone();
    record.updated_at = Utc::now();
    record.synced = false;

    let mut trip_records = store.list_deliveries(&key.trip_id)?;
    match trip_records.iter_mut().find(|r| r.key() == key) {
        Some(existing) => *existing = record.clone(),
        None => {
            trip_records.push(record.clone());
            trip_records.sort_by_key(|r| r.stop_number);
        }
    }
    let progress = TripProgress::compute(&trip_records, &key, state);

    let event = CompletionEvent { trip_id: key.trip_id.clone(),
                                  stop_number: key.stop_number,
                                  receipt_numbers: capture.receipt_numbers.clone(),
                                  client_id: record.client_id.clone(),
                                  client_name: record.client_name.clone(),
                                  destination_detail: record.destination_detail.clone(),
                                  state,
                                  driver: capture.driver.clone(),
                                  carrier: capture.carrier.clone(),
                                  timestamp: record.updated_at,
                                  trip_date: record.trip_date.clone(),
                                  geolocation: capture.geolocation,
                                  artifact_urls,
                                  receiver_name,
                                  photo_count: capture.photos.len() as u32,
                                  progress: progress.clone() };

    // las fotos quedan sin procesar hasta que el evento de la parada se entrega
    for photo in &capture.photos {
        store.cache_photo(&key, photo)?;
    }
    for artifact in &queued {
        store.record_artifact(&key, &artifact.filename)?;
    }
    for (artifact, reference) in &uploaded {
        store.record_artifact(&key, &artifact.filename)?;
        store.mark_artifact_uploaded(&key, &artifact.filename, reference)?;
    }
    store.save_delivery(&record)?;

    let mut payloads: Vec<OutboxPayload> = queued.into_iter().map(OutboxPayload::ArtifactUpload).collect();
    payloads.push(OutboxPayload::CompletionEvent(event));
    let mut ids = store.enqueue_all(&payloads)?;
    let event_id = ids.pop()
                      .ok_or_else(|| SyncError::Storage(format!("lote de {} sin ids encolados", key)))?;
    Ok(IntakeReceipt { event_id, queued_artifacts: ids, uploaded_urls, progress })
}
