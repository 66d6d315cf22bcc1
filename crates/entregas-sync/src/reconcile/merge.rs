// Archivo: merge.rs
// Propósito: unir planificación y completitud en una lista de entregas.
//
// Funciones puras: sin E/S ni estado. Los datos mal formados de los libros
// se recuperan con un fallback documentado y nunca cortan la unión.
use super::destinations::parse_destinations;
use chrono::{DateTime, Utc};
use entregas_core::{CompletionEntry, DeliveryRecord, DeliveryState, PlanningEntry};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static DATE_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}[/-]\d{1,2}[/-]\d{2,4}$").expect("regex de fecha"));

/// Si la celda es un arreglo JSON devuelve su primer elemento (o vacío);
/// cualquier otro valor, incluido un JSON inválido, se devuelve tal cual.
pub fn clean_json_array_value(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return match items.first() {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
        }
    }
    value.to_string()
}

/// Separa una celda de URLs: arreglo JSON o lista separada por comas.
pub fn split_url_cell(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if raw.starts_with('[') && raw.ends_with(']') {
        if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(raw) {
            return items.into_iter()
                        .map(|v| match v {
                            serde_json::Value::String(s) => s.trim().to_string(),
                            other => other.to_string(),
                        })
                        .collect();
        }
    }
    raw.split(',').map(|u| u.trim().to_string()).collect()
}

/// Corrige los links de Drive mal formados (`/fbs/d/` -> `/file/d/`) y
/// descarta todo lo que no sea una URL http(s) de más de 5 caracteres.
pub fn sanitize_artifact_urls<I, S>(urls: I) -> Vec<String>
    where I: IntoIterator<Item = S>,
          S: AsRef<str>
{
    urls.into_iter()
        .map(|u| u.as_ref().trim().replace("/fbs/d/", "/file/d/"))
        .filter(|u| u.len() > 5 && (u.starts_with("http://") || u.starts_with("https://")))
        .collect()
}

/// `true` si el texto tiene forma de fecha (`d/m/aa`, `dd-mm-aaaa`, ...).
pub fn looks_like_date(value: &str) -> bool {
    DATE_LIKE.is_match(value.trim())
}

/// Número de parada efectivo de una fila de completitud en la posición
/// `index` (desde 0) de las filas del viaje. Vacío o con forma de fecha cae
/// a `index + 1`; un texto no numérico no tiene parada.
pub fn resolve_stop_number(raw: &str, index: usize) -> Option<u32> {
    let raw = clean_json_array_value(raw);
    let raw = raw.trim();
    if raw.is_empty() || looks_like_date(raw) {
        return u32::try_from(index + 1).ok();
    }
    raw.parse::<u32>().ok().filter(|n| *n > 0)
}

/// Estado deducido de una fila de completitud. La columna de estado no se
/// usa: hay completitud si hay al menos un artefacto o un receptor.
pub fn effective_state(entry: &CompletionEntry) -> DeliveryState {
    let has_urls = !sanitize_artifact_urls(&entry.artifact_urls).is_empty();
    let has_receiver = !clean_json_array_value(&entry.receiver_name).trim().is_empty();
    if has_urls || has_receiver {
        DeliveryState::Completed
    } else {
        DeliveryState::Pending
    }
}

/// Expande las filas de planificación en una entrega `Pending` por parada,
/// numeradas en secuencia desde 1 a lo largo de todas las filas.
///
/// Cada fila aporta `max(paradas declaradas, destinos parseados)` paradas.
/// Si faltan destinos se repite el último; sin ningún destino se usa el
/// nombre del cliente.
pub fn expand_planning(trip_id: &str, entries: &[PlanningEntry]) -> Vec<DeliveryRecord> {
    let mut records = Vec::new();
    for entry in entries {
        let destinations = parse_destinations(&entry.destination_detail);
        let client_name = entry.client_name
                               .as_deref()
                               .map(str::trim)
                               .filter(|n| !n.is_empty())
                               .unwrap_or(entry.client_id.as_str())
                               .to_string();
        let stops = (entry.declared_stops as usize).max(destinations.len());
        if stops > destinations.len() {
            log::debug!("viaje {}: {} paradas declaradas y {} destinos; se rellena con el último",
                        trip_id,
                        stops,
                        destinations.len());
        }
        for i in 0..stops {
            let destination = destinations.get(i)
                                          .or_else(|| destinations.last())
                                          .cloned()
                                          .unwrap_or_else(|| client_name.clone());
            let stop_number = records.len() as u32 + 1;
            records.push(DeliveryRecord::pending(trip_id,
                                                 stop_number,
                                                 entry.client_id.clone(),
                                                 client_name.clone(),
                                                 destination,
                                                 entry.trip_date.clone()));
        }
    }
    records
}

/// Superpone las filas de completitud sobre las entregas planificadas.
///
/// La unión es por número de parada; si varias filas apuntan a la misma
/// parada gana la última. Las filas sin parada resoluble o fuera de las
/// paradas planificadas se ignoran. El largo del resultado es siempre el de
/// `planned`.
pub fn merge(planned: Vec<DeliveryRecord>, completion: &[CompletionEntry]) -> Vec<DeliveryRecord> {
    let mut by_stop: BTreeMap<u32, &CompletionEntry> = BTreeMap::new();
    for (index, entry) in completion.iter().enumerate() {
        match resolve_stop_number(&entry.stop_number, index) {
            Some(stop) => {
                if looks_like_date(&entry.stop_number) {
                    log::debug!("parada '{}' con forma de fecha; se usa la posición {}", entry.stop_number, stop);
                }
                by_stop.insert(stop, entry);
            }
            None => log::debug!("fila de completitud con parada ilegible '{}' ignorada", entry.stop_number),
        }
    }

    planned.into_iter()
           .map(|record| match by_stop.get(&record.stop_number) {
               Some(entry) => overlay(record, entry),
               None => record,
           })
           .collect()
}

/// Reemplaza los campos mutables de `record` con los de `entry`. Detalle de
/// destino, fecha de viaje y cliente siguen viniendo de la planificación.
fn overlay(mut record: DeliveryRecord, entry: &CompletionEntry) -> DeliveryRecord {
    let receiver = clean_json_array_value(&entry.receiver_name).trim().to_string();
    record.state = effective_state(entry);
    record.receipt_numbers = clean_json_array_value(&entry.receipt_numbers).trim().to_string();
    record.receiver_name = (!receiver.is_empty()).then_some(receiver);
    record.artifact_urls = sanitize_artifact_urls(&entry.artifact_urls);
    if let Ok(ts) = DateTime::parse_from_rfc3339(entry.timestamp.trim()) {
        record.updated_at = ts.with_timezone(&Utc);
    }
    record.synced = true;
    record
}
