mod destinations;
mod engine;
mod merge;

pub use destinations::{normalize_carrier, normalize_trip_id, parse_destinations, KNOWN_CARRIERS, OWN_FLEET};
pub use engine::{ReconciliationEngine, TripLookup, TripView};
pub use merge::{clean_json_array_value, effective_state, expand_planning, looks_like_date, merge,
                resolve_stop_number, sanitize_artifact_urls, split_url_cell};
