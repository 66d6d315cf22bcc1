//! entregas-sync: motor de sincronización, monitor de conectividad y
//! reconciliación de libros de registro.
//!
//! El motor (`SyncEngine`) drena el outbox durable de `entregas-core` de a
//! un item por vez; el monitor (`ConnectivityMonitor`) lo dispara en cada
//! transición a online; la reconciliación (`ReconciliationEngine`) arma la
//! vista unificada de un viaje a partir del libro de planificación y del de
//! completitud. Los transportes HTTP concretos viven en `transport`.
//!
//! Ejemplo rápido:
//! ```rust
//! use entregas_core::stubs::{InMemoryOutboxStore, ScriptedArtifactStore, ScriptedEventSink};
//! use entregas_sync::{SyncEngine, SyncSettings};
//! use std::sync::Arc;
//! let engine = SyncEngine::new(Arc::new(InMemoryOutboxStore::new()),
//!                              Arc::new(ScriptedArtifactStore::new(0)),
//!                              Arc::new(ScriptedEventSink::new(0)),
//!                              SyncSettings::default());
//! assert!(!engine.status().is_syncing);
//! ```
mod blocking;
pub mod connectivity;
pub mod engine;
pub mod intake;
pub mod reconcile;
pub mod transport;

pub use connectivity::ConnectivityMonitor;
pub use engine::{backoff_delay, SyncEngine, SyncSettings};
pub use intake::{CaptureIntake, FinishedCapture, IntakeReceipt};
pub use reconcile::{ReconciliationEngine, TripLookup, TripView};
pub use transport::{HttpArtifactStore, HttpEventSink, SheetsLedgerClient};
