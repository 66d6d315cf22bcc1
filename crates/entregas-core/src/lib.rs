//! Crate `entregas-core`: modelo de datos y contratos del motor de
//! sincronización de entregas.
//!
//! Este crate define los tipos de dominio (`DeliveryRecord`, `OutboxItem`,
//! `CompletionEvent`, ...), la taxonomía de errores (`SyncError`), los
//! contratos que implementan los colaboradores externos (almacén local
//! durable, almacén de artefactos, sumidero de eventos y los dos libros de
//! registro remotos) y stubs en memoria útiles para pruebas.
//!
//! Diseño resumido:
//! - Outbox durable: cada trabajo pendiente es un `OutboxItem` con id único
//!   (tiempo + sufijo aleatorio) que se borra sólo cuando el remoto lo acepta.
//! - Entrega al-menos-una-vez: los fallos incrementan `retries` hasta el
//!   techo configurado; por encima del techo el item queda como dead-letter.
//! - Las operaciones de red son asíncronas (`async_trait`); el almacén local
//!   es síncrono y cada escritura es durable antes de retornar.
//!
//! Ejemplo rápido:
//! ```rust
//! use entregas_core::stubs::InMemoryOutboxStore;
//! use entregas_core::{OutboxPayload, OutboxStore, ArtifactUpload};
//! let store = InMemoryOutboxStore::new();
//! let id = store.enqueue(&OutboxPayload::ArtifactUpload(ArtifactUpload::pdf("remito.pdf", vec![1, 2, 3]))).unwrap();
//! assert_eq!(store.count_pending(5).unwrap(), 1);
//! assert!(id.starts_with("pdf-"));
//! ```
pub mod config;
pub mod domain;
pub mod errors;
pub mod repository;
pub mod stubs;

pub use config::SyncConfig;
pub use domain::*;
pub use errors::*;
pub use repository::*;
