// Archivo: sheets.rs
// Propósito: leer los libros de planificación y de completitud desde una
// API de planillas (`GET {base}/{sheet}/values/{range}`).
//
// Columnas de planificación: A paradas, C fecha, F cliente, H transportista,
// I chofer, K viaje, L detalle. Columnas de completitud: A fecha, B viaje,
// C parada, D remitos, E cliente, F detalle, G estado, H chofer,
// M receptor, N URLs de artefactos.
use super::{http_client, read_success_body, transport_error};
use crate::reconcile::{clean_json_array_value, normalize_trip_id, sanitize_artifact_urls, split_url_cell};
use async_trait::async_trait;
use entregas_core::{CompletionEntry, CompletionLedger, PlanningEntry, PlanningLedger, Result, SyncConfig, SyncError};
use serde::Deserialize;
use std::collections::HashMap;

mod planning_col {
    pub const STOPS: usize = 0;
    pub const DATE: usize = 2;
    pub const CLIENT: usize = 5;
    pub const CARRIER: usize = 7;
    pub const DRIVER: usize = 8;
    pub const TRIP: usize = 10;
    pub const DETAIL: usize = 11;
}

mod completion_col {
    pub const DATE: usize = 0;
    pub const TRIP: usize = 1;
    pub const STOP: usize = 2;
    pub const RECEIPTS: usize = 3;
    pub const CLIENT: usize = 4;
    pub const DETAIL: usize = 5;
    pub const STATUS: usize = 6;
    pub const DRIVER: usize = 7;
    pub const RECEIVER: usize = 12;
    pub const URLS: usize = 13;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

type Row = Vec<String>;

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(|c| c.trim()).unwrap_or("")
}

fn is_numeric(value: &str) -> bool {
    value.trim().parse::<f64>().is_ok()
}

/// Cliente de solo lectura de ambos libros.
pub struct SheetsLedgerClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    planning_sheet: String,
    planning_range: String,
    completion_sheet: String,
    completion_range: String,
    clients_range: String,
}

impl SheetsLedgerClient {
    /// Requiere `ENTREGAS_PLANNING_SHEET_ID` y `ENTREGAS_COMPLETION_SHEET_ID`.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let planning_sheet =
            config.planning_sheet_id
                  .clone()
                  .ok_or_else(|| SyncError::Config("ENTREGAS_PLANNING_SHEET_ID no configurada".into()))?;
        let completion_sheet =
            config.completion_sheet_id
                  .clone()
                  .ok_or_else(|| SyncError::Config("ENTREGAS_COMPLETION_SHEET_ID no configurada".into()))?;
        Ok(Self { client: http_client(config.http_timeout)?,
                  base_url: config.ledger_base_url.trim_end_matches('/').to_string(),
                  api_key: config.ledger_api_key.clone(),
                  planning_sheet,
                  planning_range: config.planning_range.clone(),
                  completion_sheet,
                  completion_range: config.completion_range.clone(),
                  clients_range: config.clients_range.clone() })
    }

    async fn fetch_values(&self, sheet: &str, range: &str) -> Result<Vec<Row>> {
        let url = format!("{}/{}/values/{}", self.base_url, sheet, range);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }
        let response = request.send().await.map_err(transport_error)?;
        let body = read_success_body(response).await?;
        let parsed: ValueRange = serde_json::from_str(&body).map_err(|e| {
                                     SyncError::Malformed(format!("rango {} ilegible: {}", range, e))
                                 })?;
        Ok(parsed.values
                 .into_iter()
                 .map(|row| {
                     row.into_iter()
                        .map(|v| match v {
                            serde_json::Value::String(s) => s,
                            serde_json::Value::Null => String::new(),
                            other => other.to_string(),
                        })
                        .collect()
                 })
                 .collect())
    }

    /// Nombres de clientes por id. Si la tabla no se puede leer se sigue
    /// con los ids.
    async fn client_names(&self) -> HashMap<String, String> {
        match self.fetch_values(&self.completion_sheet, &self.clients_range).await {
            Ok(rows) => rows.iter()
                            .skip(1)
                            .filter_map(|row| {
                                let (id, name) = (cell(row, 0), cell(row, 1));
                                (!id.is_empty() && !name.is_empty()).then(|| (id.to_string(), name.to_string()))
                            })
                            .collect(),
            Err(e) => {
                log::warn!("tabla de clientes no disponible: {}", e);
                HashMap::new()
            }
        }
    }
}

/// Convierte las filas de planificación de un viaje. La primera fila es
/// encabezado si su celda de viaje no es numérica.
pub(crate) fn planning_rows_to_entries(trip_id: &str,
                                       rows: &[Row],
                                       client_names: &HashMap<String, String>)
                                       -> Vec<PlanningEntry> {
    let has_header = rows.first()
                         .map(|r| cell(r, planning_col::TRIP))
                         .map(|trip| !trip.is_empty() && !is_numeric(trip))
                         .unwrap_or(false);
    let wanted = normalize_trip_id(trip_id);
    rows.iter()
        .skip(usize::from(has_header))
        .filter(|row| {
            let trip = cell(row, planning_col::TRIP);
            !trip.is_empty() && normalize_trip_id(trip) == wanted
        })
        .map(|row| {
            let client_id = match cell(row, planning_col::CLIENT) {
                "" => "Sin cliente".to_string(),
                id => id.to_string(),
            };
            let date = cell(row, planning_col::DATE);
            PlanningEntry { trip_id: trip_id.trim().to_string(),
                            // una fila sin cantidad legible cuenta como una parada
                            declared_stops: cell(row, planning_col::STOPS).parse().unwrap_or(1),
                            trip_date: (!date.is_empty()).then(|| date.to_string()),
                            client_name: client_names.get(&client_id).cloned(),
                            client_id,
                            carrier: cell(row, planning_col::CARRIER).to_string(),
                            driver: cell(row, planning_col::DRIVER).to_string(),
                            destination_detail: cell(row, planning_col::DETAIL).to_string() }
        })
        .collect()
}

/// Convierte las filas de completitud de un viaje (la primera fila es
/// siempre encabezado).
pub(crate) fn completion_rows_to_entries(trip_id: &str, rows: &[Row]) -> Vec<CompletionEntry> {
    let wanted = normalize_trip_id(trip_id);
    rows.iter()
        .skip(1)
        .filter(|row| {
            let trip = cell(row, completion_col::TRIP);
            !trip.is_empty() && normalize_trip_id(trip) == wanted
        })
        .map(|row| {
            let clean = |index: usize| clean_json_array_value(cell(row, index)).trim().to_string();
            CompletionEntry { trip_id: trip_id.trim().to_string(),
                              stop_number: clean(completion_col::STOP),
                              receipt_numbers: clean(completion_col::RECEIPTS),
                              client_id: clean(completion_col::CLIENT),
                              destination_detail: clean(completion_col::DETAIL),
                              stored_status: cell(row, completion_col::STATUS).to_string(),
                              driver: cell(row, completion_col::DRIVER).to_string(),
                              artifact_urls: sanitize_artifact_urls(split_url_cell(cell(row, completion_col::URLS))),
                              receiver_name: clean(completion_col::RECEIVER),
                              timestamp: cell(row, completion_col::DATE).to_string() }
        })
        .collect()
}

#[async_trait]
impl PlanningLedger for SheetsLedgerClient {
    async fn planning_entries(&self, trip_id: &str) -> Result<Vec<PlanningEntry>> {
        let rows = self.fetch_values(&self.planning_sheet, &self.planning_range).await?;
        // la tabla de clientes sólo se lee si el viaje existe
        if planning_rows_to_entries(trip_id, &rows, &HashMap::new()).is_empty() {
            return Ok(Vec::new());
        }
        let names = self.client_names().await;
        Ok(planning_rows_to_entries(trip_id, &rows, &names))
    }
}

#[async_trait]
impl CompletionLedger for SheetsLedgerClient {
    async fn completion_entries(&self, trip_id: &str) -> Result<Vec<CompletionEntry>> {
        let rows = self.fetch_values(&self.completion_sheet, &self.completion_range).await?;
        Ok(completion_rows_to_entries(trip_id, &rows))
    }
}
