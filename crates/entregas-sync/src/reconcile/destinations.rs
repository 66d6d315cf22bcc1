// Archivo: destinations.rs
// Propósito: interpretar las celdas de texto libre del libro de
// planificación (destinos empaquetados, transportista, id de viaje).
use once_cell::sync::Lazy;
use regex::Regex;

static UNLOAD_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)DESCARGA\s*:").expect("regex de DESCARGA"));

/// Transportistas externos conocidos.
pub const KNOWN_CARRIERS: [&str; 8] =
    ["BARCO", "PRODAN", "LOGZO", "DON PEDRO", "CALLTRUCK", "FALZONE", "ANDROSIUK", "ADROSLUK"];

/// Transportista asignado cuando la columna está vacía o es numérica.
pub const OWN_FLEET: &str = "Propio";

/// Separa un detalle `CARGA: X / DESCARGA: Y / Z` en destinos de descarga.
///
/// Si aparece el marcador `DESCARGA:` (con o sin espacio antes de los dos
/// puntos, sin distinguir mayúsculas) se toma sólo lo que sigue. Los
/// segmentos se separan por `/`; se descartan los vacíos y los que empiezan
/// con `CARGA`.
pub fn parse_destinations(detail: &str) -> Vec<String> {
    let unloading = match UNLOAD_MARKER.find(detail) {
        Some(m) => &detail[m.end()..],
        None => detail,
    };
    unloading.split('/')
             .map(str::trim)
             .filter(|segment| !segment.is_empty() && !segment.to_uppercase().starts_with("CARGA"))
             .map(str::to_string)
             .collect()
}

/// Normaliza la columna de transportista: vacía o numérica es flota propia,
/// un transportista conocido (coincidencia parcial en cualquier sentido) se
/// devuelve con su nombre canónico y cualquier otro texto se conserva.
pub fn normalize_carrier(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return OWN_FLEET.to_string();
    }
    let upper = raw.to_uppercase();
    if let Some(known) = KNOWN_CARRIERS.iter().find(|c| upper.contains(*c) || c.contains(upper.as_str())) {
        return known.to_string();
    }
    if raw.parse::<f64>().is_ok() {
        OWN_FLEET.to_string()
    } else {
        raw.to_string()
    }
}

/// Id de viaje comparable: sin ningún espacio en blanco.
pub fn normalize_trip_id(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unloading_marker_excludes_origin() {
        assert_eq!(parse_destinations("CARGA: X / DESCARGA: Y / Z"), vec!["Y", "Z"]);
        assert_eq!(parse_destinations("carga: Depósito / descarga : Planta 1/ Planta 2 /"),
                   vec!["Planta 1", "Planta 2"]);
    }

    #[test]
    fn legacy_format_splits_everything_but_loading() {
        assert_eq!(parse_destinations("CARGA Norte / Rosario / Funes"), vec!["Rosario", "Funes"]);
        assert_eq!(parse_destinations("Rosario"), vec!["Rosario"]);
        assert!(parse_destinations("  ").is_empty());
    }

    #[test]
    fn carrier_normalization() {
        assert_eq!(normalize_carrier(""), "Propio");
        assert_eq!(normalize_carrier("123"), "Propio");
        assert_eq!(normalize_carrier("Transportes Barco SRL"), "BARCO");
        assert_eq!(normalize_carrier("pedro"), "DON PEDRO");
        assert_eq!(normalize_carrier("Fletes Sur"), "Fletes Sur");
        assert_eq!(normalize_carrier("Propio"), "Propio");
    }

    #[test]
    fn trip_id_ignores_whitespace() {
        assert_eq!(normalize_trip_id(" 70 123\t"), "70123");
    }
}
