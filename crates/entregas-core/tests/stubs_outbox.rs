use entregas_core::stubs::{InMemoryLedger, InMemoryOutboxStore, ScriptedArtifactStore, ScriptedEventSink};
use entregas_core::{ArtifactStore, ArtifactUpload, CompletionLedger, DeliveryCache, DeliveryRecord,
                    OutboxKind, OutboxPayload, OutboxStore, PlanningEntry, PlanningLedger, StopKey, SyncError};
use std::collections::HashSet;

fn pdf(name: &str) -> OutboxPayload {
  OutboxPayload::ArtifactUpload(ArtifactUpload::pdf(name, vec![1, 2, 3]))
}

#[test]
fn enqueue_assigns_distinct_ids_in_tight_loop() {
  let store = InMemoryOutboxStore::new();
  let payload = pdf("a.pdf");
  let mut ids = HashSet::new();
  for _ in 0..10_000 {
    ids.insert(store.enqueue(&payload).unwrap());
  }
  assert_eq!(ids.len(), 10_000);
}

#[test]
fn list_pending_is_fifo_and_respects_ceiling() {
  let store = InMemoryOutboxStore::new();
  let first = store.enqueue(&pdf("1.pdf")).unwrap();
  let second = store.enqueue(&pdf("2.pdf")).unwrap();
  let third = store.enqueue(&pdf("3.pdf")).unwrap();

  for _ in 0..3 {
    store.mark_attempt(&second, false, Some("timeout")).unwrap();
  }
  let pending: Vec<String> = store.list_pending(3).unwrap().into_iter().map(|i| i.id).collect();
  assert_eq!(pending, vec![first.clone(), third.clone()]);
  assert_eq!(store.count_pending(3).unwrap(), 2);

  // sigue en el almacenamiento completo como dead-letter
  let dead = store.list_dead_letters(3).unwrap();
  assert_eq!(dead.len(), 1);
  assert_eq!(dead[0].id, second);
  assert_eq!(dead[0].retries, 3);
  assert_eq!(dead[0].last_error.as_deref(), Some("timeout"));
  assert!(dead[0].last_attempt.is_some());

  assert_eq!(store.reset_retries(&[second.clone()]).unwrap(), 1);
  let item = store.get(&second).unwrap().expect("item");
  assert_eq!(item.retries, 0);
  assert!(item.last_error.is_none());
  assert_eq!(store.count_pending(3).unwrap(), 3);
}

#[test]
fn success_removes_item_and_unknown_id_is_not_found() {
  let store = InMemoryOutboxStore::new();
  let id = store.enqueue(&pdf("x.pdf")).unwrap();
  store.mark_attempt(&id, true, None).unwrap();
  assert!(store.get(&id).unwrap().is_none());
  match store.mark_attempt(&id, false, Some("e")) {
    Err(SyncError::NotFound(_)) => {}
    other => panic!("expected NotFound, got {:?}", other),
  }
}

#[test]
fn batch_enqueue_is_all_or_nothing() {
  let store = InMemoryOutboxStore::new();
  let ids = store.enqueue_all(&[pdf("1.pdf"), pdf("2.pdf")]).unwrap();
  let listed: Vec<String> = store.list_all().unwrap().into_iter().map(|i| i.id).collect();
  assert_eq!(listed, ids);

  store.set_fail_writes(true);
  assert!(matches!(store.enqueue_all(&[pdf("3.pdf")]), Err(SyncError::Storage(_))));
  store.set_fail_writes(false);
  assert_eq!(store.list_all().unwrap().len(), 2);
}

#[test]
fn replace_payload_keeps_position_and_kind() {
  let store = InMemoryOutboxStore::new();
  let first = store.enqueue(&pdf("1.pdf")).unwrap();
  store.enqueue(&pdf("2.pdf")).unwrap();
  store.mark_attempt(&first, false, Some("timeout")).unwrap();

  store.replace_payload(&first, &pdf("1-bis.pdf")).unwrap();
  let items = store.list_all().unwrap();
  assert_eq!(items[0].id, first);
  assert_eq!(items[0].retries, 1);
  assert_eq!(items[0].payload, pdf("1-bis.pdf"));

  assert!(matches!(store.replace_payload("nope", &pdf("x.pdf")), Err(SyncError::NotFound(_))));
}

#[test]
fn artifacts_with_same_name_are_kept_per_stop() {
  let store = InMemoryOutboxStore::new();
  let (a, b) = (StopKey::new("T1", 1), StopKey::new("T2", 1));
  store.record_artifact(&a, "remito.pdf").unwrap();
  store.record_artifact(&b, "remito.pdf").unwrap();
  let reference = entregas_core::ArtifactRef { id: "f1".into(), link: "https://l".into() };
  assert!(store.mark_artifact_uploaded(&a, "remito.pdf", &reference).unwrap());
  let mut keys = store.artifact_keys().unwrap();
  keys.sort();
  assert_eq!(keys, vec![(a, "remito.pdf".to_string(), true), (b, "remito.pdf".to_string(), false)]);
}

#[test]
fn failing_storage_surfaces_storage_error() {
  let store = InMemoryOutboxStore::new();
  store.set_fail_writes(true);
  assert!(matches!(store.enqueue(&pdf("x.pdf")), Err(SyncError::Storage(_))));
}

#[test]
fn delivery_cache_roundtrip_and_purge_keeps_recent() {
  let store = InMemoryOutboxStore::new();
  let mut record = DeliveryRecord::pending("T9", 1, "ECO", "ECOLAB", "Planta Norte", None);
  store.save_delivery(&record).unwrap();
  record.receipt_numbers = "R-1, R-2".into();
  store.save_delivery(&record).unwrap();
  let key = StopKey::new("T9", 1);
  assert_eq!(store.get_delivery(&key).unwrap().unwrap().receipts(), vec!["R-1", "R-2"]);
  assert!(store.mark_delivery_synced(&key).unwrap());
  assert!(!store.mark_delivery_synced(&StopKey::new("T9", 2)).unwrap());

  store.record_artifact(&key, "T9-1.pdf").unwrap();
  store.cache_photo(&key, &[9, 9]).unwrap();
  assert_eq!(store.mark_photos_processed(&key).unwrap(), 1);
  assert_eq!(store.mark_photos_processed(&key).unwrap(), 0);

  // nada es más viejo que 1 día
  let report = store.purge_older_than(1).unwrap();
  assert_eq!(report.deliveries + report.artifacts + report.photos, 0);
  // con ventana 0 sólo se borra lo sincronizado/procesado/subido
  let report = store.purge_older_than(0).unwrap();
  assert_eq!(report.deliveries, 1);
  assert_eq!(report.photos, 1);
  assert_eq!(report.artifacts, 0);
}

#[tokio::test]
async fn scripted_collaborators_fail_then_accept() {
  let sink = ScriptedArtifactStore::new(1);
  let upload = ArtifactUpload::pdf("a.pdf", vec![1]);
  assert!(sink.upload(&upload).await.is_err());
  let reference = sink.upload(&upload).await.unwrap();
  assert!(reference.link.starts_with("https://"));
  assert_eq!(sink.calls(), 2);
  assert_eq!(sink.uploaded(), vec!["a.pdf".to_string()]);

  let events = ScriptedEventSink::new(0);
  assert_eq!(events.calls(), 0);
  assert_eq!(OutboxKind::parse("COMPLETION_EVENT"), Some(OutboxKind::CompletionEvent));
}

#[tokio::test]
async fn in_memory_ledger_filters_by_trip() {
  let ledger = InMemoryLedger::new();
  ledger.add_planning(PlanningEntry { trip_id: "T1".into(), declared_stops: 1, ..Default::default() });
  ledger.add_planning(PlanningEntry { trip_id: "T2".into(), declared_stops: 2, ..Default::default() });
  assert_eq!(ledger.planning_entries("T2").await.unwrap().len(), 1);
  assert!(ledger.planning_entries("T3").await.unwrap().is_empty());
  ledger.set_fail_completion(true);
  assert!(ledger.completion_entries("T1").await.is_err());
}
