mod backoff;
mod sync_engine;

pub use backoff::backoff_delay;
pub use sync_engine::{SyncEngine, SyncSettings};
