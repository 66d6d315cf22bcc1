// Archivo: outbox_persistence.rs
// Propósito: almacén local durable (outbox + cachés) sobre SQLite con Diesel.
//
// Cada conexión del pool se configura con WAL, `synchronous = FULL` y
// `busy_timeout`, de modo que toda escritura confirmada sobrevive a un crash
// del proceso y los escritores concurrentes esperan en vez de fallar.
use crate::schema;
use crate::schema::artifact_records::dsl as art_dsl;
use crate::schema::delivery_records::dsl as del_dsl;
use crate::schema::outbox_items::dsl as ob_dsl;
use crate::schema::photo_cache::dsl as photo_dsl;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::result::Error as DieselError;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use entregas_core::{new_outbox_id, ArtifactRef, DeliveryCache, DeliveryRecord, DeliveryState, OutboxItem, OutboxKind,
                    OutboxPayload, OutboxStore, PurgeReport, Result, StopKey, SyncConfig, SyncError};
use std::sync::Arc;
use uuid::Uuid;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

const PRAGMAS: &str = "PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;";

#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
    conn.batch_execute(PRAGMAS).map_err(diesel::r2d2::Error::QueryError)
  }
}

/// Almacén Diesel que implementa `OutboxStore` y `DeliveryCache`.
pub struct DieselOutboxStore {
  pool: Arc<DbPool>,
}

impl DieselOutboxStore {
  /// Abre (o crea) la base en `database_url` y aplica las migraciones
  /// pendientes. Falla con `SyncError::Storage` si el archivo no se puede
  /// abrir.
  pub fn open(database_url: &str) -> Result<Self> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder().max_size(4)
                              .connection_customizer(Box::new(SqlitePragmas))
                              .build(manager)
                              .map_err(|e| SyncError::Storage(format!("pool: {}", e)))?;
    let store = DieselOutboxStore { pool: Arc::new(pool) };
    let mut conn = store.conn()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| SyncError::Storage(format!("migraciones: {}", e)))?;
    log::debug!("almacén local abierto en {}", database_url);
    Ok(store)
  }

  fn conn_raw(&self) -> std::result::Result<DbConn, r2d2::Error> {
    self.pool.get()
  }

  fn conn(&self) -> Result<DbConn> {
    self.conn_raw().map_err(|e| SyncError::Storage(format!("pool: {}", e)))
  }

  fn load_items(&self, max_retries: Option<u32>) -> Result<Vec<OutboxItem>> {
    let mut conn = self.conn()?;
    let rows = match max_retries {
      Some(max) => map_db_err(ob_dsl::outbox_items.filter(ob_dsl::retries.lt(retries_ceiling(max)))
                                                  .order(ob_dsl::seq.asc())
                                                  .load::<OutboxRow>(&mut conn))?,
      None => map_db_err(ob_dsl::outbox_items.order(ob_dsl::seq.asc()).load::<OutboxRow>(&mut conn))?,
    };
    // Una fila ilegible no debe bloquear el resto de la cola.
    Ok(rows.into_iter()
           .filter_map(|row| {
             let id = row.id.clone();
             row.into_item().map_err(|e| log::error!("item de outbox {} ilegible: {}", id, e)).ok()
           })
           .collect())
  }
}

/// Abre el almacén en la ruta configurada (`ENTREGAS_DB_URL` /
/// `DATABASE_URL`, por defecto `entregas.db`).
pub fn new_from_env() -> Result<DieselOutboxStore> {
  let config = SyncConfig::from_env()?;
  DieselOutboxStore::open(&config.database_url)
}

fn map_db_err<T>(res: std::result::Result<T, DieselError>) -> Result<T> {
  res.map_err(|e| SyncError::Storage(format!("db: {}", e)))
}

fn retries_ceiling(max_retries: u32) -> i32 {
  i32::try_from(max_retries).unwrap_or(i32::MAX)
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
  Utc.timestamp_millis_opt(ms)
     .single()
     .ok_or_else(|| SyncError::Storage(format!("timestamp inválido: {}", ms)))
}

#[derive(Debug, Queryable)]
struct OutboxRow {
  #[allow(dead_code)]
  pub seq: i64,
  pub id: String,
  pub kind: String,
  pub payload: String,
  pub retries: i32,
  pub last_attempt_ts: Option<i64>,
  pub last_error: Option<String>,
  pub created_at_ts: i64,
}

impl OutboxRow {
  fn into_item(self) -> Result<OutboxItem> {
    let kind = OutboxKind::parse(&self.kind).ok_or_else(|| SyncError::Storage(format!("tipo desconocido: {}", self.kind)))?;
    let payload: OutboxPayload = serde_json::from_str(&self.payload)?;
    let last_attempt = match self.last_attempt_ts {
      Some(ms) => Some(from_millis(ms)?),
      None => None,
    };
    Ok(OutboxItem { id: self.id,
                    kind,
                    payload,
                    retries: self.retries.max(0) as u32,
                    last_attempt,
                    last_error: self.last_error,
                    created_at: from_millis(self.created_at_ts)? })
  }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::outbox_items)]
struct NewOutboxRow {
  pub id: String,
  pub kind: &'static str,
  pub payload: String,
  pub retries: i32,
  pub created_at_ts: i64,
}

impl NewOutboxRow {
  fn from_payload(payload: &OutboxPayload) -> Result<Self> {
    let kind = payload.kind();
    Ok(NewOutboxRow { id: new_outbox_id(kind),
                      kind: kind.as_str(),
                      payload: serde_json::to_string(payload)?,
                      retries: 0,
                      created_at_ts: Utc::now().timestamp_millis() })
  }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::delivery_records)]
struct DeliveryRow {
  pub stop_key: String,
  pub trip_id: String,
  pub stop_number: i32,
  pub client_id: String,
  pub client_name: String,
  pub destination_detail: String,
  pub state: String,
  pub receipt_numbers: String,
  pub receiver_name: Option<String>,
  pub artifact_urls: String,
  pub trip_date: Option<String>,
  pub updated_at_ts: i64,
  pub synced: bool,
}

impl DeliveryRow {
  fn from_record(record: &DeliveryRecord) -> Result<Self> {
    let stop_number = i32::try_from(record.stop_number).map_err(|_| {
                                                          SyncError::Validation(format!("número de parada fuera de \
                                                                                         rango: {}",
                                                                                        record.stop_number))
                                                        })?;
    Ok(DeliveryRow { stop_key: record.key().to_string(),
                     trip_id: record.trip_id.clone(),
                     stop_number,
                     client_id: record.client_id.clone(),
                     client_name: record.client_name.clone(),
                     destination_detail: record.destination_detail.clone(),
                     state: record.state.as_str().to_string(),
                     receipt_numbers: record.receipt_numbers.clone(),
                     receiver_name: record.receiver_name.clone(),
                     artifact_urls: serde_json::to_string(&record.artifact_urls)?,
                     trip_date: record.trip_date.clone(),
                     updated_at_ts: record.updated_at.timestamp_millis(),
                     synced: record.synced })
  }

  fn into_record(self) -> Result<DeliveryRecord> {
    let state = DeliveryState::parse(&self.state).ok_or_else(|| SyncError::Storage(format!("estado inválido: {}",
                                                                                            self.state)))?;
    Ok(DeliveryRecord { trip_id: self.trip_id,
                        stop_number: self.stop_number.max(0) as u32,
                        client_id: self.client_id,
                        client_name: self.client_name,
                        destination_detail: self.destination_detail,
                        state,
                        receipt_numbers: self.receipt_numbers,
                        receiver_name: self.receiver_name,
                        artifact_urls: serde_json::from_str(&self.artifact_urls)?,
                        trip_date: self.trip_date,
                        updated_at: from_millis(self.updated_at_ts)?,
                        synced: self.synced })
  }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::artifact_records)]
struct ArtifactRow {
  pub id: String,
  pub stop_key: String,
  pub filename: String,
  pub uploaded: bool,
  pub remote_id: Option<String>,
  pub remote_link: Option<String>,
  pub created_at_ts: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::photo_cache)]
struct PhotoRow<'a> {
  pub id: String,
  pub stop_key: String,
  pub content: &'a [u8],
  pub processed: bool,
  pub created_at_ts: i64,
}

impl OutboxStore for DieselOutboxStore {
  fn enqueue(&self, payload: &OutboxPayload) -> Result<String> {
    let row = NewOutboxRow::from_payload(payload)?;
    let mut conn = self.conn()?;
    map_db_err(diesel::insert_into(ob_dsl::outbox_items).values(&row).execute(&mut conn))?;
    log::debug!("encolado {} ({})", row.id, row.kind);
    Ok(row.id)
  }

  fn enqueue_all(&self, payloads: &[OutboxPayload]) -> Result<Vec<String>> {
    let rows = payloads.iter().map(NewOutboxRow::from_payload).collect::<Result<Vec<_>>>()?;
    let mut conn = self.conn()?;
    // una sola transacción: un fallo a mitad no deja items sueltos
    map_db_err(conn.immediate_transaction::<_, DieselError, _>(|c| {
                     for row in &rows {
                       diesel::insert_into(ob_dsl::outbox_items).values(row).execute(c)?;
                     }
                     Ok(())
                   }))?;
    log::debug!("encolados {} items en lote", rows.len());
    Ok(rows.into_iter().map(|r| r.id).collect())
  }

  fn replace_payload(&self, id: &str, payload: &OutboxPayload) -> Result<()> {
    let kind = payload.kind();
    let text = serde_json::to_string(payload)?;
    let mut conn = self.conn()?;
    let stored = map_db_err(ob_dsl::outbox_items.filter(ob_dsl::id.eq(id))
                                                .select(ob_dsl::kind)
                                                .first::<String>(&mut conn)
                                                .optional())?;
    match stored {
      None => Err(SyncError::NotFound(format!("outbox item {}", id))),
      Some(k) if k != kind.as_str() => {
        Err(SyncError::Validation(format!("el item {} es {}, no {}", id, k, kind.as_str())))
      }
      Some(_) => {
        map_db_err(diesel::update(ob_dsl::outbox_items.filter(ob_dsl::id.eq(id))).set(ob_dsl::payload.eq(text))
                                                                                  .execute(&mut conn))?;
        Ok(())
      }
    }
  }

  fn list_pending(&self, max_retries: u32) -> Result<Vec<OutboxItem>> {
    self.load_items(Some(max_retries))
  }

  fn mark_attempt(&self, id: &str, success: bool, error: Option<&str>) -> Result<()> {
    let mut conn = self.conn()?;
    let target = ob_dsl::outbox_items.filter(ob_dsl::id.eq(id));
    let affected = if success {
      map_db_err(diesel::delete(target).execute(&mut conn))?
    } else {
      let message = error.unwrap_or("error desconocido").to_string();
      map_db_err(diesel::update(target).set((ob_dsl::retries.eq(ob_dsl::retries + 1),
                                              ob_dsl::last_attempt_ts.eq(Some(Utc::now().timestamp_millis())),
                                              ob_dsl::last_error.eq(Some(message))))
                                         .execute(&mut conn))?
    };
    if affected == 0 {
      return Err(SyncError::NotFound(format!("outbox item {}", id)));
    }
    Ok(())
  }

  fn reset_retries(&self, ids: &[String]) -> Result<usize> {
    if ids.is_empty() {
      return Ok(0);
    }
    let mut conn = self.conn()?;
    map_db_err(diesel::update(ob_dsl::outbox_items.filter(ob_dsl::id.eq_any(ids)))
                 .set((ob_dsl::retries.eq(0), ob_dsl::last_error.eq(None::<String>)))
                 .execute(&mut conn))
  }

  fn count_pending(&self, max_retries: u32) -> Result<u64> {
    let mut conn = self.conn()?;
    let n: i64 = map_db_err(ob_dsl::outbox_items.filter(ob_dsl::retries.lt(retries_ceiling(max_retries)))
                                                .count()
                                                .get_result(&mut conn))?;
    Ok(n.max(0) as u64)
  }

  fn list_all(&self) -> Result<Vec<OutboxItem>> {
    self.load_items(None)
  }

  fn get(&self, id: &str) -> Result<Option<OutboxItem>> {
    let mut conn = self.conn()?;
    let row = map_db_err(ob_dsl::outbox_items.filter(ob_dsl::id.eq(id)).first::<OutboxRow>(&mut conn).optional())?;
    row.map(OutboxRow::into_item).transpose()
  }
}

impl DeliveryCache for DieselOutboxStore {
  fn save_delivery(&self, record: &DeliveryRecord) -> Result<()> {
    let row = DeliveryRow::from_record(record)?;
    let mut conn = self.conn()?;
    map_db_err(diesel::replace_into(del_dsl::delivery_records).values(&row).execute(&mut conn))?;
    Ok(())
  }

  fn get_delivery(&self, key: &StopKey) -> Result<Option<DeliveryRecord>> {
    let mut conn = self.conn()?;
    let row = map_db_err(del_dsl::delivery_records.filter(del_dsl::stop_key.eq(key.to_string()))
                                                  .first::<DeliveryRow>(&mut conn)
                                                  .optional())?;
    row.map(DeliveryRow::into_record).transpose()
  }

  fn list_deliveries(&self, trip_id: &str) -> Result<Vec<DeliveryRecord>> {
    let mut conn = self.conn()?;
    let rows = map_db_err(del_dsl::delivery_records.filter(del_dsl::trip_id.eq(trip_id))
                                                   .order(del_dsl::stop_number.asc())
                                                   .load::<DeliveryRow>(&mut conn))?;
    rows.into_iter().map(DeliveryRow::into_record).collect()
  }

  fn mark_delivery_synced(&self, key: &StopKey) -> Result<bool> {
    let mut conn = self.conn()?;
    let n = map_db_err(diesel::update(del_dsl::delivery_records.filter(del_dsl::stop_key.eq(key.to_string())))
                         .set(del_dsl::synced.eq(true))
                         .execute(&mut conn))?;
    Ok(n > 0)
  }

  fn record_artifact(&self, key: &StopKey, filename: &str) -> Result<String> {
    let row = ArtifactRow { id: Uuid::new_v4().to_string(),
                            stop_key: key.to_string(),
                            filename: filename.to_string(),
                            uploaded: false,
                            remote_id: None,
                            remote_link: None,
                            created_at_ts: Utc::now().timestamp_millis() };
    let mut conn = self.conn()?;
    map_db_err(diesel::insert_into(art_dsl::artifact_records).values(&row).execute(&mut conn))?;
    Ok(row.id)
  }

  fn mark_artifact_uploaded(&self, key: &StopKey, filename: &str, reference: &ArtifactRef) -> Result<bool> {
    let mut conn = self.conn()?;
    let n = map_db_err(diesel::update(art_dsl::artifact_records.filter(art_dsl::stop_key.eq(key.to_string()))
                                                               .filter(art_dsl::filename.eq(filename)))
                         .set((art_dsl::uploaded.eq(true),
                               art_dsl::remote_id.eq(Some(reference.id.clone())),
                               art_dsl::remote_link.eq(Some(reference.link.clone()))))
                         .execute(&mut conn))?;
    Ok(n > 0)
  }

  fn cache_photo(&self, key: &StopKey, content: &[u8]) -> Result<String> {
    let row = PhotoRow { id: Uuid::new_v4().to_string(),
                         stop_key: key.to_string(),
                         content,
                         processed: false,
                         created_at_ts: Utc::now().timestamp_millis() };
    let mut conn = self.conn()?;
    map_db_err(diesel::insert_into(photo_dsl::photo_cache).values(&row).execute(&mut conn))?;
    Ok(row.id)
  }

  fn mark_photos_processed(&self, key: &StopKey) -> Result<usize> {
    let mut conn = self.conn()?;
    map_db_err(diesel::update(photo_dsl::photo_cache.filter(photo_dsl::stop_key.eq(key.to_string()))
                                                    .filter(photo_dsl::processed.eq(false)))
                 .set(photo_dsl::processed.eq(true))
                 .execute(&mut conn))
  }

  fn purge_older_than(&self, days: u32) -> Result<PurgeReport> {
    let cutoff = (Utc::now() - ChronoDuration::days(days as i64)).timestamp_millis();
    let mut conn = self.conn()?;
    let report = map_db_err(conn.immediate_transaction::<_, DieselError, _>(|c| {
      let deliveries =
        diesel::delete(del_dsl::delivery_records.filter(del_dsl::synced.eq(true))
                                                .filter(del_dsl::updated_at_ts.lt(cutoff))).execute(c)?;
      let artifacts = diesel::delete(art_dsl::artifact_records.filter(art_dsl::uploaded.eq(true))
                                                              .filter(art_dsl::created_at_ts.lt(cutoff))).execute(c)?;
      let photos = diesel::delete(photo_dsl::photo_cache.filter(photo_dsl::processed.eq(true))
                                                        .filter(photo_dsl::created_at_ts.lt(cutoff))).execute(c)?;
      Ok(PurgeReport { deliveries, artifacts, photos })
    }))?;
    if report.deliveries + report.artifacts + report.photos > 0 {
      log::info!("poda de {} días: {} entregas, {} artefactos, {} fotos",
                 days,
                 report.deliveries,
                 report.artifacts,
                 report.photos);
    }
    Ok(report)
  }
}
