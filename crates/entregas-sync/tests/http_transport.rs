// Transportes HTTP contra un servidor falso sobre TcpListener que responde
// respuestas enlatadas y guarda cada pedido recibido.
use chrono::Utc;
use entregas_core::{ArtifactStore, ArtifactUpload, CompletionEvent, DeliveryState, EventSink, SyncConfig, SyncError,
                    TripProgress};
use entregas_sync::{HttpArtifactStore, HttpEventSink, ReconciliationEngine, SheetsLedgerClient, TripLookup};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type Requests = Arc<Mutex<Vec<String>>>;

async fn read_request(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head.lines()
                             .find_map(|l| l.strip_prefix("content-length:"))
                             .and_then(|v| v.trim().parse::<usize>().ok())
                             .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Levanta el servidor y devuelve su URL base y el registro de pedidos.
async fn serve<F>(handler: F) -> (String, Requests)
    where F: Fn(&str) -> (u16, String) + Send + Sync + 'static
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let request = match read_request(&mut socket).await {
                Ok(r) => r,
                Err(_) => continue,
            };
            let request_line = request.lines().next().unwrap_or("").to_string();
            let (status, body) = handler(&request_line);
            log.lock().unwrap().push(request);
            let response = format!("HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: \
                                    {}\r\nConnection: close\r\n\r\n{}",
                                   status,
                                   body.len(),
                                   body);
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    (base, requests)
}

fn event() -> CompletionEvent {
    CompletionEvent { trip_id: "T1".into(),
                      stop_number: 2,
                      receipt_numbers: vec!["R-1".into()],
                      client_id: "ECO".into(),
                      client_name: "ECOLAB".into(),
                      destination_detail: "Planta".into(),
                      state: DeliveryState::Completed,
                      driver: "Perez".into(),
                      carrier: "Propio".into(),
                      timestamp: Utc::now(),
                      trip_date: None,
                      geolocation: None,
                      artifact_urls: vec![],
                      receiver_name: Some("Ana".into()),
                      photo_count: 1,
                      progress: TripProgress::default() }
}

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn event_sink_accepts_json_and_empty_bodies() {
    let (base, requests) = serve(|line| {
                               if line.contains("/vacio") {
                                   (200, String::new())
                               } else {
                                   (200, r#"{"ok":true}"#.to_string())
                               }
                           }).await;

    HttpEventSink::new(format!("{}/hook", base), TIMEOUT).unwrap().submit(&event()).await.unwrap();
    HttpEventSink::new(format!("{}/vacio", base), TIMEOUT).unwrap().submit(&event()).await.unwrap();

    let requests = requests.lock().unwrap();
    assert!(requests[0].starts_with("POST /hook HTTP/1.1"));
    assert!(requests[0].contains(r#""trip_id":"T1""#));
    assert!(requests[0].contains(r#""stop_number":2"#));
}

#[tokio::test]
async fn event_sink_maps_failures() {
    let (base, _) = serve(|line| {
                        if line.contains("/html") {
                            (200, "<html>ok</html>".to_string())
                        } else {
                            (500, "boom".to_string())
                        }
                    }).await;

    let err = HttpEventSink::new(format!("{}/hook", base), TIMEOUT).unwrap().submit(&event()).await.unwrap_err();
    match err {
        SyncError::Rejected { status, body } => assert_eq!((status, body.as_str()), (500, "boom")),
        other => panic!("error inesperado: {:?}", other),
    }
    let err = HttpEventSink::new(format!("{}/html", base), TIMEOUT).unwrap().submit(&event()).await.unwrap_err();
    assert!(matches!(err, SyncError::Malformed(_)));
}

#[tokio::test]
async fn unreachable_sink_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let sink = HttpEventSink::new(format!("http://{}/hook", addr), TIMEOUT).unwrap();
    assert!(matches!(sink.submit(&event()).await.unwrap_err(), SyncError::Transport(_)));
}

#[test]
fn missing_urls_are_config_errors() {
    let config = SyncConfig::default();
    assert!(matches!(HttpEventSink::from_config(&config), Err(SyncError::Config(_))));
    assert!(matches!(HttpArtifactStore::from_config(&config), Err(SyncError::Config(_))));
    assert!(matches!(SheetsLedgerClient::from_config(&config), Err(SyncError::Config(_))));
}

#[tokio::test]
async fn artifact_upload_parses_reference() {
    let (base, requests) = serve(|line| {
                               if line.contains("/sin-link") {
                                   (200, r#"{"id":"abc"}"#.to_string())
                               } else {
                                   (200, r#"{"id":"abc","webViewLink":"https://drive.example/abc"}"#.to_string())
                               }
                           }).await;
    let artifact = ArtifactUpload::pdf("T1-2.pdf", b"%PDF-1.4".to_vec()).with_folder("carpeta");

    let store = HttpArtifactStore::new(format!("{}/upload", base), Some("tok".into()), TIMEOUT).unwrap();
    let reference = store.upload(&artifact).await.unwrap();
    assert_eq!((reference.id.as_str(), reference.link.as_str()), ("abc", "https://drive.example/abc"));

    let store = HttpArtifactStore::new(format!("{}/sin-link", base), None, TIMEOUT).unwrap();
    let reference = store.upload(&artifact).await.unwrap();
    assert_eq!(reference.link, "https://drive.google.com/file/d/abc/view");

    let requests = requests.lock().unwrap();
    let first = requests[0].to_lowercase();
    assert!(first.contains("authorization: bearer tok"));
    assert!(first.contains("content-type: multipart/related; boundary=entregas-"));
    assert!(requests[0].contains(r#""parents":["carpeta"]"#));
    assert!(requests[0].contains("%PDF-1.4"));
    assert!(!requests[1].to_lowercase().contains("authorization:"));
}

#[tokio::test]
async fn artifact_upload_rejects_unexpected_response() {
    let (base, _) = serve(|_| (200, r#"{"name":"sin id"}"#.to_string())).await;
    let store = HttpArtifactStore::new(format!("{}/upload", base), None, TIMEOUT).unwrap();
    let err = store.upload(&ArtifactUpload::pdf("x.pdf", vec![])).await.unwrap_err();
    assert!(matches!(err, SyncError::Malformed(_)));
}

fn ledger_config(base: &str) -> SyncConfig {
    SyncConfig { ledger_base_url: format!("{}/", base),
                 ledger_api_key: Some("k".into()),
                 planning_sheet_id: Some("plan".into()),
                 completion_sheet_id: Some("done".into()),
                 ..SyncConfig::default() }
}

#[tokio::test]
async fn sheets_ledgers_feed_reconciliation() {
    let (base, requests) = serve(|line| {
        let body = if line.contains("/plan/values/") {
            json!({ "values": [
                ["Paradas", "", "Fecha", "", "", "Cliente", "", "Fletero", "Chofer", "", "HR", "Detalle"],
                ["2", "", "01/03/2025", "", "", "ECO", "", "", "Perez", "", "70 100", "CARGA: X / DESCARGA: Y / Z"],
                ["1", "", "01/03/2025", "", "", "OTRO", "", "", "Gomez", "", "70101", "W"]
            ] })
        } else if line.contains("/done/values/Clientes") {
            json!({ "values": [["Id", "Nombre"], ["ECO", "ECOLAB SA"]] })
        } else if line.contains("/done/values/") {
            json!({ "values": [
                ["Fecha", "HR", "Parada"],
                ["2025-03-01T10:00:00Z", "70100", "2", "[\"R-5\"]", "ECO", "Z", "PENDIENTE", "Perez",
                 "", "", "", "", "[\"Ana\"]", "[\"https://drive.google.com/fbs/d/q/view\"]"]
            ] })
        } else {
            return (404, "{}".to_string());
        };
        (200, body.to_string())
    }).await;

    let client = Arc::new(SheetsLedgerClient::from_config(&ledger_config(&base)).unwrap());
    let engine = ReconciliationEngine::new(client.clone(), client);

    let view = engine.reconcile("70100").await.unwrap().into_view().unwrap();
    assert_eq!(view.driver, "Perez");
    assert_eq!(view.carrier, "Propio");
    let stops: Vec<(&str, DeliveryState)> =
        view.records.iter().map(|r| (r.destination_detail.as_str(), r.state)).collect();
    assert_eq!(stops, vec![("Y", DeliveryState::Pending), ("Z", DeliveryState::Completed)]);
    assert_eq!(view.records[0].client_name, "ECOLAB SA");
    assert_eq!(view.records[1].receipt_numbers, "R-5");
    assert_eq!(view.records[1].artifact_urls, vec!["https://drive.google.com/file/d/q/view"]);

    let requests = requests.lock().unwrap();
    assert!(requests.iter().all(|r| r.lines().next().unwrap_or("").contains("key=k")));
    drop(requests);

    assert_eq!(engine.reconcile("99999").await.unwrap(), TripLookup::NotFound);
}

#[tokio::test]
async fn planning_ledger_failure_is_an_error() {
    let (base, _) = serve(|_| (503, "mantenimiento".to_string())).await;
    let client = Arc::new(SheetsLedgerClient::from_config(&ledger_config(&base)).unwrap());
    let engine = ReconciliationEngine::new(client.clone(), client);
    match engine.reconcile("70100").await.unwrap_err() {
        SyncError::Rejected { status, .. } => assert_eq!(status, 503),
        other => panic!("error inesperado: {:?}", other),
    }
}
