use chrono::{Duration as ChronoDuration, Utc};
use entregas_core::{ArtifactRef, ArtifactUpload, CompletionEvent, DeliveryCache, DeliveryRecord, DeliveryState,
                    OutboxKind, OutboxPayload, OutboxStore, StopKey, SyncError, TripProgress};
use entregas_persistence::DieselOutboxStore;
use std::collections::HashSet;
use tempfile::TempDir;

fn temp_store() -> (TempDir, String, DieselOutboxStore) {
  let dir = tempfile::tempdir().expect("tempdir");
  let path = dir.path().join("entregas_test.db").to_str().unwrap().to_string();
  let store = DieselOutboxStore::open(&path).expect("open store");
  (dir, path, store)
}

fn pdf(name: &str) -> OutboxPayload {
  OutboxPayload::ArtifactUpload(ArtifactUpload::pdf(name, vec![0x25, 0x50, 0x44, 0x46]).with_folder("ECOLAB"))
}

fn event(stop: u32) -> OutboxPayload {
  OutboxPayload::CompletionEvent(CompletionEvent { trip_id: "T100".into(),
                                                   stop_number: stop,
                                                   receipt_numbers: vec!["R-1".into()],
                                                   client_id: "ECO".into(),
                                                   client_name: "ECOLAB".into(),
                                                   destination_detail: "Planta Norte".into(),
                                                   state: DeliveryState::Completed,
                                                   driver: "Perez".into(),
                                                   carrier: "Propio".into(),
                                                   timestamp: Utc::now(),
                                                   trip_date: Some("2025-03-01".into()),
                                                   geolocation: None,
                                                   artifact_urls: vec![],
                                                   receiver_name: Some("Ana".into()),
                                                   photo_count: 2,
                                                   progress: TripProgress::default() })
}

#[test]
fn enqueued_items_survive_reopen() {
  let (_dir, path, store) = temp_store();
  let a = store.enqueue(&pdf("a.pdf")).unwrap();
  let b = store.enqueue(&event(1)).unwrap();
  store.mark_attempt(&b, false, Some("503")).unwrap();
  drop(store);

  let reopened = DieselOutboxStore::open(&path).expect("reopen");
  let all = reopened.list_all().unwrap();
  assert_eq!(all.iter().map(|i| i.id.clone()).collect::<Vec<_>>(), vec![a.clone(), b.clone()]);
  assert_eq!(all[0].kind, OutboxKind::ArtifactUpload);
  assert_eq!(all[0].payload, pdf("a.pdf"));
  assert_eq!(all[1].retries, 1);
  assert_eq!(all[1].last_error.as_deref(), Some("503"));
  assert!(all[1].last_attempt.is_some());
  assert!(a.starts_with("pdf-"));
  assert!(b.starts_with("entrega-"));
}

#[test]
fn ten_thousand_enqueues_get_distinct_ids() {
  let (_dir, _path, store) = temp_store();
  let payload = event(1);
  let mut ids = HashSet::new();
  for _ in 0..10_000 {
    ids.insert(store.enqueue(&payload).unwrap());
  }
  assert_eq!(ids.len(), 10_000);
  assert_eq!(store.count_pending(5).unwrap(), 10_000);
}

#[test]
fn ceiling_excludes_items_until_reset() {
  let (_dir, _path, store) = temp_store();
  let first = store.enqueue(&event(1)).unwrap();
  let second = store.enqueue(&event(2)).unwrap();
  for _ in 0..5 {
    store.mark_attempt(&first, false, Some("timeout")).unwrap();
  }
  let pending = store.list_pending(5).unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].id, second);
  assert_eq!(store.list_dead_letters(5).unwrap()[0].id, first);

  assert_eq!(store.reset_retries(&[first.clone(), "desconocido".into()]).unwrap(), 1);
  assert_eq!(store.reset_retries(&[]).unwrap(), 0);
  let item = store.get(&first).unwrap().expect("item");
  assert_eq!(item.retries, 0);
  assert!(item.last_error.is_none());
  // el orden FIFO se conserva tras el reinicio
  let ids: Vec<String> = store.list_pending(5).unwrap().into_iter().map(|i| i.id).collect();
  assert_eq!(ids, vec![first, second]);
}

#[test]
fn success_deletes_and_unknown_id_is_not_found() {
  let (_dir, _path, store) = temp_store();
  let id = store.enqueue(&pdf("x.pdf")).unwrap();
  store.mark_attempt(&id, true, None).unwrap();
  assert!(store.get(&id).unwrap().is_none());
  assert!(matches!(store.mark_attempt(&id, true, None), Err(SyncError::NotFound(_))));
  assert!(matches!(store.mark_attempt("nope", false, Some("e")), Err(SyncError::NotFound(_))));
}

#[test]
fn batch_enqueue_keeps_order_and_survives_reopen() {
  let (_dir, path, store) = temp_store();
  let ids = store.enqueue_all(&[pdf("a.pdf"), pdf("b.pdf"), event(1)]).unwrap();
  assert_eq!(ids.len(), 3);
  assert!(store.enqueue_all(&[]).unwrap().is_empty());
  drop(store);

  let reopened = DieselOutboxStore::open(&path).expect("reopen");
  let listed: Vec<String> = reopened.list_all().unwrap().into_iter().map(|i| i.id).collect();
  assert_eq!(listed, ids);
}

#[test]
fn replaced_payload_is_durable_and_keeps_retries() {
  let (_dir, path, store) = temp_store();
  let id = store.enqueue(&event(1)).unwrap();
  store.enqueue(&event(2)).unwrap();
  store.mark_attempt(&id, false, Some("503")).unwrap();

  let mut patched = match event(1) {
    OutboxPayload::CompletionEvent(e) => e,
    other => panic!("payload inesperado: {:?}", other),
  };
  assert!(patched.attach_artifact("https://drive.example/file/d/1/view"));
  store.replace_payload(&id, &OutboxPayload::CompletionEvent(patched.clone())).unwrap();
  assert!(matches!(store.replace_payload(&id, &pdf("x.pdf")), Err(SyncError::Validation(_))));
  assert!(matches!(store.replace_payload("nope", &event(1)), Err(SyncError::NotFound(_))));
  drop(store);

  let reopened = DieselOutboxStore::open(&path).expect("reopen");
  let all = reopened.list_all().unwrap();
  assert_eq!(all[0].id, id);
  assert_eq!(all[0].retries, 1);
  assert_eq!(all[0].payload, OutboxPayload::CompletionEvent(patched));
}

#[test]
fn same_artifact_name_on_two_stops_is_marked_separately() {
  let (_dir, _path, store) = temp_store();
  let (a, b) = (StopKey::new("T1", 1), StopKey::new("T2", 1));
  store.record_artifact(&a, "remito.pdf").unwrap();
  store.record_artifact(&b, "remito.pdf").unwrap();
  assert!(store.mark_artifact_uploaded(&a, "remito.pdf", &ArtifactRef { id: "f1".into(), link: "https://l".into() })
               .unwrap());

  std::thread::sleep(std::time::Duration::from_millis(10));
  // sólo el artefacto subido es podable
  assert_eq!(store.purge_older_than(0).unwrap().artifacts, 1);
  assert!(store.mark_artifact_uploaded(&b, "remito.pdf", &ArtifactRef { id: "f2".into(), link: "https://m".into() })
               .unwrap());
}

#[test]
fn delivery_cache_upserts_and_lists_by_stop() {
  let (_dir, _path, store) = temp_store();
  let mut second = DeliveryRecord::pending("T1", 2, "ECO", "ECOLAB", "Depósito", None);
  let first = DeliveryRecord::pending("T1", 1, "ECO", "ECOLAB", "Planta", Some("01/03/2025".into()));
  store.save_delivery(&second).unwrap();
  store.save_delivery(&first).unwrap();
  store.save_delivery(&DeliveryRecord::pending("T2", 1, "X", "X", "", None)).unwrap();

  second.state = DeliveryState::Completed;
  second.receiver_name = Some("Ana".into());
  store.save_delivery(&second).unwrap();

  let listed = store.list_deliveries("T1").unwrap();
  assert_eq!(listed.iter().map(|r| r.stop_number).collect::<Vec<_>>(), vec![1, 2]);
  assert_eq!(listed[1].state, DeliveryState::Completed);
  assert_eq!(listed[0].trip_date.as_deref(), Some("01/03/2025"));

  let key = StopKey::new("T1", 2);
  assert!(store.mark_delivery_synced(&key).unwrap());
  assert!(store.get_delivery(&key).unwrap().unwrap().synced);
  assert!(!store.mark_delivery_synced(&StopKey::new("T9", 1)).unwrap());
}

#[test]
fn purge_removes_only_old_finished_rows() {
  let (_dir, _path, store) = temp_store();
  let key = StopKey::new("T1", 1);

  let mut old = DeliveryRecord::pending("T1", 1, "ECO", "ECOLAB", "Planta", None);
  old.updated_at = Utc::now() - ChronoDuration::days(10);
  old.synced = true;
  store.save_delivery(&old).unwrap();
  let mut old_unsynced = DeliveryRecord::pending("T1", 2, "ECO", "ECOLAB", "Planta", None);
  old_unsynced.updated_at = Utc::now() - ChronoDuration::days(10);
  store.save_delivery(&old_unsynced).unwrap();

  store.record_artifact(&key, "T1-1.pdf").unwrap();
  store.record_artifact(&key, "T1-1-bis.pdf").unwrap();
  assert!(store.mark_artifact_uploaded(&key, "T1-1.pdf", &ArtifactRef { id: "f1".into(), link: "https://l".into() })
               .unwrap());
  assert!(!store.mark_artifact_uploaded(&key, "otro.pdf", &ArtifactRef { id: "f2".into(), link: "https://l".into() })
                .unwrap());
  store.cache_photo(&key, &[1, 2, 3]).unwrap();
  store.cache_photo(&StopKey::new("T1", 2), &[4]).unwrap();
  assert_eq!(store.mark_photos_processed(&key).unwrap(), 1);

  let report = store.purge_older_than(7).unwrap();
  assert_eq!(report.deliveries, 1);
  assert_eq!(report.artifacts, 0);
  assert_eq!(report.photos, 0);
  assert!(store.get_delivery(&StopKey::new("T1", 2)).unwrap().is_some());

  std::thread::sleep(std::time::Duration::from_millis(10));
  let report = store.purge_older_than(0).unwrap();
  assert_eq!(report.deliveries, 0);
  assert_eq!(report.artifacts, 1);
  assert_eq!(report.photos, 1);
}

#[test]
fn concurrent_writers_do_not_lose_items() {
  let (_dir, _path, store) = temp_store();
  let store = std::sync::Arc::new(store);
  let handles: Vec<_> = (0..4).map(|n| {
                                let store = store.clone();
                                std::thread::spawn(move || {
                                  for i in 0..50 {
                                    store.enqueue(&pdf(&format!("{}-{}.pdf", n, i))).unwrap();
                                  }
                                })
                              })
                              .collect();
  for h in handles {
    h.join().unwrap();
  }
  assert_eq!(store.list_all().unwrap().len(), 200);
}
