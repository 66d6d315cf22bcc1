//! Almacén local durable sobre SQLite (Diesel + r2d2) que implementa los
//! traits `OutboxStore` y `DeliveryCache` de `entregas-core`. La
//! implementación detallada está en `outbox_persistence.rs`; las
//! migraciones van embebidas en el binario.

mod outbox_persistence;
pub mod schema;

pub use outbox_persistence::{new_from_env, DieselOutboxStore, MIGRATIONS};
