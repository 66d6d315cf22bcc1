// Archivo: domain.rs
// Propósito: tipos de dominio compartidos por el outbox, el motor de
// sincronización y la reconciliación de libros de registro.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Estado del ciclo de vida de una parada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    Pending,
    InProgress,
    Completed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "PENDING",
            DeliveryState::InProgress => "IN_PROGRESS",
            DeliveryState::Completed => "COMPLETED",
        }
    }

    /// Interpreta una etiqueta de estado tal como aparece en los libros
    /// (acepta las etiquetas en español usadas por las planillas).
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_uppercase().as_str() {
            "PENDING" | "PENDIENTE" => Some(DeliveryState::Pending),
            "IN_PROGRESS" | "EN_REPARTO" => Some(DeliveryState::InProgress),
            "COMPLETED" | "COMPLETADO" => Some(DeliveryState::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clave compuesta de una parada: `(trip_id, stop_number)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StopKey {
    pub trip_id: String,
    pub stop_number: u32,
}

impl StopKey {
    /// Mayor número de parada que el almacén local puede guardar.
    pub const MAX_STOP_NUMBER: u32 = i32::MAX as u32;

    pub fn new(trip_id: impl Into<String>, stop_number: u32) -> Self {
        Self { trip_id: trip_id.into(), stop_number }
    }
}

impl fmt::Display for StopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.trip_id, self.stop_number)
    }
}

/// Una parada de un viaje, tal como la ve la UI.
///
/// Invariante: `Completed` implica al menos una URL de artefacto o un
/// nombre de receptor (ver `has_completion_evidence`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub trip_id: String,
    pub stop_number: u32,
    pub client_id: String,
    pub client_name: String,
    pub destination_detail: String,
    pub state: DeliveryState,
    /// Lista de remitos unida por comas (una parada puede cubrir varios).
    pub receipt_numbers: String,
    pub receiver_name: Option<String>,
    pub artifact_urls: Vec<String>,
    pub trip_date: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub synced: bool,
}

impl DeliveryRecord {
    /// Crea un registro `Pending` derivado del libro de planificación.
    pub fn pending(trip_id: impl Into<String>,
                   stop_number: u32,
                   client_id: impl Into<String>,
                   client_name: impl Into<String>,
                   destination_detail: impl Into<String>,
                   trip_date: Option<String>)
                   -> Self {
        Self { trip_id: trip_id.into(),
               stop_number,
               client_id: client_id.into(),
               client_name: client_name.into(),
               destination_detail: destination_detail.into(),
               state: DeliveryState::Pending,
               receipt_numbers: String::new(),
               receiver_name: None,
               artifact_urls: Vec::new(),
               trip_date,
               updated_at: Utc::now(),
               synced: false }
    }

    pub fn key(&self) -> StopKey {
        StopKey::new(self.trip_id.clone(), self.stop_number)
    }

    /// Señal de completitud: al menos una URL de artefacto o un receptor.
    pub fn has_completion_evidence(&self) -> bool {
        !self.artifact_urls.is_empty() || self.receiver_name.as_deref().map(|r| !r.trim().is_empty()).unwrap_or(false)
    }

    /// Remitos individuales (separados por coma).
    pub fn receipts(&self) -> Vec<&str> {
        self.receipt_numbers.split(',').map(str::trim).filter(|r| !r.is_empty()).collect()
    }

    /// Texto que identifica el destino en listados de progreso.
    pub fn display_detail(&self) -> &str {
        if !self.destination_detail.is_empty() {
            &self.destination_detail
        } else if !self.client_name.is_empty() {
            &self.client_name
        } else {
            &self.client_id
        }
    }
}

/// Tipo de trabajo encolado en el outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxKind {
    ArtifactUpload,
    CompletionEvent,
}

impl OutboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxKind::ArtifactUpload => "ARTIFACT_UPLOAD",
            OutboxKind::CompletionEvent => "COMPLETION_EVENT",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "ARTIFACT_UPLOAD" => Some(OutboxKind::ArtifactUpload),
            "COMPLETION_EVENT" => Some(OutboxKind::CompletionEvent),
            _ => None,
        }
    }

    /// Prefijo usado al generar ids (`pdf-...`, `entrega-...`).
    pub fn id_prefix(&self) -> &'static str {
        match self {
            OutboxKind::ArtifactUpload => "pdf",
            OutboxKind::CompletionEvent => "entrega",
        }
    }
}

/// Genera un id de outbox resistente a colisiones: tiempo + sufijo
/// aleatorio. Nunca se reutiliza.
pub fn new_outbox_id(kind: OutboxKind) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", kind.id_prefix(), Utc::now().timestamp_millis(), &suffix[..16])
}

/// Artefacto binario pendiente de subir (normalmente un PDF).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactUpload {
    pub filename: String,
    /// Parada a la que pertenece; liga la subida con su evento de
    /// completitud y su fila en la caché de artefactos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopKey>,
    /// Carpeta/contenedor lógico; `None` usa la carpeta por defecto.
    pub folder: Option<String>,
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl ArtifactUpload {
    pub fn pdf(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self { filename: filename.into(),
               stop: None,
               folder: None,
               content_type: "application/pdf".into(),
               content }
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn for_stop(mut self, key: StopKey) -> Self {
        self.stop = Some(key);
        self
    }
}

/// Referencia estable devuelta por el almacén de artefactos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: String,
    pub link: String,
}

/// Posición reportada por el dispositivo al cerrar la entrega.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
}

/// Contadores agregados de progreso del viaje enviados con cada evento.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TripProgress {
    pub total: u32,
    pub completed: u32,
    pub pending: u32,
    pub percent: u32,
    pub completed_details: Vec<String>,
    pub pending_details: Vec<String>,
}

impl TripProgress {
    /// Calcula el progreso del viaje suponiendo que la parada `current`
    /// pasa al estado `new_state`.
    pub fn compute(records: &[DeliveryRecord], current: &StopKey, new_state: DeliveryState) -> Self {
        let mut progress = TripProgress { total: records.len() as u32, ..Default::default() };
        for record in records {
            let done = if record.key() == *current {
                new_state == DeliveryState::Completed
            } else {
                record.state == DeliveryState::Completed
            };
            if done {
                progress.completed += 1;
                progress.completed_details.push(record.display_detail().to_string());
            } else {
                progress.pending_details.push(record.display_detail().to_string());
            }
        }
        progress.pending = progress.total - progress.completed;
        progress.percent = if progress.total > 0 {
            ((progress.completed as f64 / progress.total as f64) * 100.0).round() as u32
        } else {
            0
        };
        progress
    }
}

/// Documento enviado al sumidero de eventos por cada parada terminada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub trip_id: String,
    pub stop_number: u32,
    pub receipt_numbers: Vec<String>,
    pub client_id: String,
    pub client_name: String,
    pub destination_detail: String,
    pub state: DeliveryState,
    pub driver: String,
    pub carrier: String,
    pub timestamp: DateTime<Utc>,
    pub trip_date: Option<String>,
    pub geolocation: Option<GeoPoint>,
    pub artifact_urls: Vec<String>,
    pub receiver_name: Option<String>,
    pub photo_count: u32,
    pub progress: TripProgress,
}

impl CompletionEvent {
    pub fn key(&self) -> StopKey {
        StopKey::new(self.trip_id.clone(), self.stop_number)
    }

    /// Agrega el link de un artefacto recién subido. `false` si ya estaba.
    pub fn attach_artifact(&mut self, link: &str) -> bool {
        if self.artifact_urls.iter().any(|u| u == link) {
            return false;
        }
        self.artifact_urls.push(link.to_string());
        true
    }
}

/// Contenido opaco de un item del outbox. El tipo (`OutboxKind`) se deriva
/// de la variante.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboxPayload {
    ArtifactUpload(ArtifactUpload),
    CompletionEvent(CompletionEvent),
}

impl OutboxPayload {
    pub fn kind(&self) -> OutboxKind {
        match self {
            OutboxPayload::ArtifactUpload(_) => OutboxKind::ArtifactUpload,
            OutboxPayload::CompletionEvent(_) => OutboxKind::CompletionEvent,
        }
    }
}

/// Unidad de trabajo durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: String,
    pub kind: OutboxKind,
    pub payload: OutboxPayload,
    pub retries: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxItem {
    pub fn new(payload: OutboxPayload) -> Self {
        let kind = payload.kind();
        Self { id: new_outbox_id(kind),
               kind,
               payload,
               retries: 0,
               last_attempt: None,
               last_error: None,
               created_at: Utc::now() }
    }

    /// `true` si superó el techo de reintentos (dead-letter).
    pub fn is_dead_letter(&self, max_retries: u32) -> bool {
        self.retries >= max_retries
    }
}

/// Fila del libro de planificación (una por cliente/destino empaquetado).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanningEntry {
    pub trip_id: String,
    /// Cantidad de paradas declarada en la planilla.
    pub declared_stops: u32,
    pub trip_date: Option<String>,
    pub client_id: String,
    pub client_name: Option<String>,
    pub carrier: String,
    pub driver: String,
    /// Texto libre con destinos empaquetados (`CARGA: X / DESCARGA: Y / Z`).
    pub destination_detail: String,
}

/// Fila del libro de completitud (una por parada reportada).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompletionEntry {
    pub trip_id: String,
    /// Número de parada tal como viene del libro (puede venir corrupto).
    pub stop_number: String,
    pub receipt_numbers: String,
    pub client_id: String,
    pub destination_detail: String,
    /// Columna de estado almacenada; no es confiable.
    pub stored_status: String,
    pub driver: String,
    pub artifact_urls: Vec<String>,
    pub receiver_name: String,
    pub timestamp: String,
}

/// Estado agregado del motor para la UI.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_pending: bool,
    pub is_syncing: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub pending_count: u64,
    pub sync_error: Option<String>,
}

/// Resumen de un ciclo de drenado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Eventos retenidos porque su parada todavía tiene artefactos en cola.
    pub deferred: usize,
    /// `true` si el ciclo se descartó porque ya había otro en curso.
    pub skipped: bool,
}

impl DrainReport {
    pub fn skipped() -> Self {
        Self { skipped: true, ..Default::default() }
    }
}

/// Filas borradas por la poda de retención.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PurgeReport {
    pub deliveries: usize,
    pub artifacts: usize,
    pub photos: usize,
}

/// Serializa binarios como base64 dentro del payload JSON.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}
