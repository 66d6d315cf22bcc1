// Archivo: repository.rs
// Propósito: definir los contratos del almacén local durable (`OutboxStore`,
// `DeliveryCache`) y de los colaboradores remotos (`ArtifactStore`,
// `EventSink`, `PlanningLedger`, `CompletionLedger`).
use crate::domain::{ArtifactRef, ArtifactUpload, CompletionEntry, CompletionEvent, DeliveryRecord, OutboxItem,
                    OutboxPayload, PlanningEntry, PurgeReport, StopKey};
use crate::errors::Result;
use async_trait::async_trait;

/// Cola durable de trabajo pendiente.
///
/// Todas las escrituras deben ser durables antes de retornar: un crash entre
/// `enqueue` y la siguiente lectura nunca pierde un item.
pub trait OutboxStore: Send + Sync {
    /// Encola un payload. Asigna un id nuevo y `retries = 0`. Sólo falla si
    /// el almacenamiento no está disponible o está lleno.
    fn enqueue(&self, payload: &OutboxPayload) -> Result<String>;

    /// Encola varios payloads como una sola escritura: o quedan todos, en
    /// el orden dado, o ninguno.
    fn enqueue_all(&self, payloads: &[OutboxPayload]) -> Result<Vec<String>>;

    /// Reemplaza el payload de un item sin tocar su posición, reintentos ni
    /// id. El tipo debe coincidir. `NotFound` si el id no existe.
    fn replace_payload(&self, id: &str, payload: &OutboxPayload) -> Result<()>;

    /// Items con `retries < max_retries`, en orden FIFO de encolado.
    fn list_pending(&self, max_retries: u32) -> Result<Vec<OutboxItem>>;

    /// Registra el resultado de un intento. Éxito: borra el item. Fallo:
    /// incrementa `retries`, guarda timestamp y error; el item se conserva.
    fn mark_attempt(&self, id: &str, success: bool, error: Option<&str>) -> Result<()>;

    /// Pone `retries = 0` y limpia el error de los ids dados. Devuelve
    /// cuántos items se reiniciaron.
    fn reset_retries(&self, ids: &[String]) -> Result<usize>;

    /// Cantidad de items elegibles para drenado automático.
    fn count_pending(&self, max_retries: u32) -> Result<u64>;

    /// Vista completa del outbox (incluye dead-letters), en orden FIFO.
    fn list_all(&self) -> Result<Vec<OutboxItem>>;

    /// Obtiene un item por id.
    fn get(&self, id: &str) -> Result<Option<OutboxItem>>;

    /// Items que superaron el techo y esperan intervención manual.
    fn list_dead_letters(&self, max_retries: u32) -> Result<Vec<OutboxItem>> {
        Ok(self.list_all()?.into_iter().filter(|i| i.is_dead_letter(max_retries)).collect())
    }
}

/// Cachés locales de entregas, artefactos y fotos, con poda por antigüedad.
pub trait DeliveryCache: Send + Sync {
    /// Inserta o reemplaza la entrega por su clave compuesta.
    fn save_delivery(&self, record: &DeliveryRecord) -> Result<()>;

    fn get_delivery(&self, key: &StopKey) -> Result<Option<DeliveryRecord>>;

    /// Entregas cacheadas de un viaje ordenadas por número de parada.
    fn list_deliveries(&self, trip_id: &str) -> Result<Vec<DeliveryRecord>>;

    /// Marca la entrega como sincronizada. `false` si no estaba cacheada.
    fn mark_delivery_synced(&self, key: &StopKey) -> Result<bool>;

    /// Registra un artefacto generado para una parada, aún no subido.
    fn record_artifact(&self, key: &StopKey, filename: &str) -> Result<String>;

    /// Marca como subido el artefacto `filename` de esa parada.
    fn mark_artifact_uploaded(&self, key: &StopKey, filename: &str, reference: &ArtifactRef) -> Result<bool>;

    /// Guarda una foto capturada sin procesar.
    fn cache_photo(&self, key: &StopKey, content: &[u8]) -> Result<String>;

    /// Marca procesadas todas las fotos de la parada. Devuelve cuántas
    /// cambiaron.
    fn mark_photos_processed(&self, key: &StopKey) -> Result<usize>;

    /// Borra entregas sincronizadas, artefactos subidos y fotos procesadas
    /// con más de `days` días.
    fn purge_older_than(&self, days: u32) -> Result<PurgeReport>;
}

/// Almacén local completo: outbox + cachés. Implementado automáticamente.
pub trait LocalStore: OutboxStore + DeliveryCache {}

impl<T: OutboxStore + DeliveryCache> LocalStore for T {}

/// Almacén remoto de artefactos (PDF de prueba de entrega).
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Sube el binario bajo la carpeta lógica pedida y devuelve id + link.
    async fn upload(&self, artifact: &ArtifactUpload) -> Result<ArtifactRef>;
}

/// Sumidero remoto de eventos de completitud.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Envía el evento. Cualquier respuesta no-2xx, error de red o
    /// respuesta mal formada es un fallo.
    async fn submit(&self, event: &CompletionEvent) -> Result<()>;
}

/// Libro de planificación (sólo lectura).
#[async_trait]
pub trait PlanningLedger: Send + Sync {
    /// Filas del viaje. Vacío si el viaje no existe.
    async fn planning_entries(&self, trip_id: &str) -> Result<Vec<PlanningEntry>>;
}

/// Libro de completitud (lectura; las escrituras llegan vía `EventSink`).
#[async_trait]
pub trait CompletionLedger: Send + Sync {
    async fn completion_entries(&self, trip_id: &str) -> Result<Vec<CompletionEntry>>;
}
