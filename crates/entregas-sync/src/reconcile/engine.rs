// Archivo: engine.rs
// Propósito: orquestar la lectura de ambos libros y devolver la vista
// unificada de un viaje.
use super::destinations::normalize_carrier;
use super::merge::{expand_planning, merge};
use entregas_core::{CompletionLedger, DeliveryCache, DeliveryRecord, DeliveryState, PlanningLedger, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Vista de un viaje lista para la UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripView {
    pub trip_id: String,
    pub driver: String,
    pub trip_date: Option<String>,
    /// Transportista normalizado (`Propio` o nombre del fletero).
    pub carrier: String,
    pub records: Vec<DeliveryRecord>,
}

/// Resultado de buscar un viaje. `NotFound` es distinto de un viaje
/// presente sin paradas (`Found` con `records` vacío).
#[derive(Debug, Clone, PartialEq)]
pub enum TripLookup {
    NotFound,
    Found(TripView),
}

impl TripLookup {
    pub fn into_view(self) -> Option<TripView> {
        match self {
            TripLookup::Found(view) => Some(view),
            TripLookup::NotFound => None,
        }
    }
}

/// Motor de reconciliación. No guarda estado: cada llamada lee ambos libros
/// y devuelve un valor nuevo.
pub struct ReconciliationEngine {
    planning: Arc<dyn PlanningLedger>,
    completion: Arc<dyn CompletionLedger>,
}

impl ReconciliationEngine {
    pub fn new(planning: Arc<dyn PlanningLedger>, completion: Arc<dyn CompletionLedger>) -> Self {
        Self { planning, completion }
    }

    /// Une planificación y completitud para `trip_id`.
    ///
    /// Un fallo al leer planificación es error; un fallo al leer completitud
    /// se registra y el viaje se devuelve como si no tuviera completitudes.
    pub async fn reconcile(&self, trip_id: &str) -> Result<TripLookup> {
        let entries = self.planning.planning_entries(trip_id).await?;
        let Some(first) = entries.first() else {
            log::debug!("viaje {} ausente del libro de planificación", trip_id);
            return Ok(TripLookup::NotFound);
        };

        let planned = expand_planning(trip_id, &entries);
        let completion = match self.completion.completion_entries(trip_id).await {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("no se pudo leer el libro de completitud para {}: {}", trip_id, e);
                Vec::new()
            }
        };
        let records = merge(planned, &completion);
        log::debug!("viaje {}: {} paradas, {} filas de completitud", trip_id, records.len(), completion.len());

        Ok(TripLookup::Found(TripView { trip_id: trip_id.to_string(),
                                        driver: first.driver.trim().to_string(),
                                        trip_date: first.trip_date.clone(),
                                        carrier: normalize_carrier(&first.carrier),
                                        records }))
    }

    /// Vuelca la vista en la caché local. Las entregas capturadas en el
    /// dispositivo que aún no se confirmaron (`synced = false` y estado
    /// distinto de pendiente) se conservan. Devuelve cuántas se escribieron.
    pub fn refresh_cache(&self, cache: &dyn DeliveryCache, view: &TripView) -> Result<usize> {
        let mut written = 0;
        for record in &view.records {
            if let Some(local) = cache.get_delivery(&record.key())? {
                if !local.synced && local.state != DeliveryState::Pending {
                    continue;
                }
            }
            cache.save_delivery(record)?;
            written += 1;
        }
        Ok(written)
    }
}
