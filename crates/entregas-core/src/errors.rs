// Archivo: errors.rs
// Propósito: definir la taxonomía de errores del motor de sincronización y
// el alias Result<T> usado por las APIs del workspace.
use thiserror::Error;

/// Errores comunes del motor de sincronización.
///
/// - `Transport`: red inalcanzable, timeout, DNS (transitorio).
/// - `Rejected`: el remoto respondió con un estado no-2xx.
/// - `Malformed`: la respuesta remota no se pudo interpretar.
/// - `Storage`: fallo de lectura/escritura en el almacén local durable.
/// - `Validation`: datos de captura inválidos, nunca entran al outbox.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Entidad no encontrada (item del outbox, entrega cacheada, viaje).
    #[error("No encontrado: {0}")]
    NotFound(String),
    /// Error del almacén local (SQLite, pool, migraciones).
    #[error("Error de almacenamiento: {0}")]
    Storage(String),
    /// Error de red transitorio.
    #[error("Error de transporte: {0}")]
    Transport(String),
    /// Respuesta no-2xx del colaborador remoto.
    #[error("Rechazado por el remoto ({status}): {body}")]
    Rejected { status: u16, body: String },
    /// Respuesta remota con forma inesperada.
    #[error("Respuesta mal formada: {0}")]
    Malformed(String),
    /// Datos de entrada inválidos del productor de capturas.
    #[error("Error de validación: {0}")]
    Validation(String),
    /// Configuración ausente o inválida.
    #[error("Error de configuración: {0}")]
    Config(String),
    /// Errores de serialización/deserialización JSON.
    #[error("Error de serialización: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Otro tipo de error.
    #[error("Otro: {0}")]
    Other(String),
}

impl SyncError {
    /// Indica si el error proviene de la red o del remoto. Hoy todos los
    /// errores de un intento se reintentan igual; la clasificación sólo se
    /// usa para logging.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Rejected { .. } | SyncError::Malformed(_))
    }
}

/// Alias de resultado usado por las APIs del workspace.
pub type Result<T> = std::result::Result<T, SyncError>;
