//! Integration tests for the REST document client and the autosave coordinator.
//!
//! These tests start a local HTTP stub and point real clients at it,
//! verifying request shapes and error classification end to end.

use std::sync::{Arc, Mutex};

use neurolink_core::{PetState, Record, StructuredValue};
use neurolink_sync::auth::{AuthError, Authenticator, Credential, IdentityToolkitClient};
use neurolink_sync::autosave::{AutosaveCoordinator, LoadOutcome, SaveRequest, SessionState};
use neurolink_sync::client::{DocumentPath, DocumentStore, ErrorKind, FirestoreClient, UNKNOWN_STORE_ERROR};
use neurolink_sync::config::{AuthConfig, AutosaveConfig, StoreConfig};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

/// One request as seen by the stub.
#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    target: String,
    authorization: Option<String>,
    body: String,
}

impl Recorded {
    fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Canned response: status code plus body.
type Reply = (u16, String);

struct Stub {
    base: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

type Responder = Arc<dyn Fn(&str, &str) -> Reply + Send + Sync>;

async fn handle(mut stream: TcpStream, responder: Responder, requests: Arc<Mutex<Vec<Recorded>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let mut content_length = 0usize;
    let mut authorization = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "authorization" => authorization = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    let (status, payload) = responder(&method, &target);
    requests.lock().unwrap().push(Recorded {
        method,
        target,
        authorization,
        body,
    });

    let response = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();
}

/// Start a stub that answers each request with `responder(method, target)`.
async fn start_stub<F>(responder: F) -> Stub
where
    F: Fn(&str, &str) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&requests);
    let responder: Responder = Arc::new(responder);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handle(stream, Arc::clone(&responder), Arc::clone(&recorded)));
        }
    });
    Stub {
        base: format!("http://127.0.0.1:{port}/v1/projects/demo/databases/(default)/documents"),
        requests,
    }
}

fn store(stub: &Stub) -> FirestoreClient {
    let config = StoreConfig::with_base_url(&stub.base)
        .unwrap()
        .request_timeout(Duration::from_secs(5));
    FirestoreClient::new(&config).unwrap()
}

fn credential() -> Credential {
    Credential::new("u1", "id-token-1")
}

fn pet_path() -> DocumentPath {
    DocumentPath::pet_document("u1").unwrap()
}

fn stored_pet_body() -> String {
    json!({
        "name": "projects/demo/databases/(default)/documents/users/u1/pet_data/current",
        "fields": {
            "name": {"stringValue": "Kit"},
            "hunger": {"doubleValue": 150.0},
            "happiness": {"integerValue": "70"},
            "energy": {"doubleValue": -5},
            "cleanliness": {"doubleValue": 42.5},
            "level": {"integerValue": "4"},
            "xp": {"integerValue": "30"},
            "last_interaction_time": {"stringValue": "2024-05-01T10:00:00.000Z"},
            "unknown": {"timestampValue": "2024-05-01T10:00:00Z"}
        },
        "createTime": "2024-05-01T10:00:00.000000Z",
        "updateTime": "2024-05-02T10:00:00.000000Z"
    })
    .to_string()
}

fn echo_write_body() -> String {
    json!({"name": "x", "fields": {}, "updateTime": "2024-05-02T10:00:00Z"}).to_string()
}

#[tokio::test]
async fn test_fetch_decodes_document() {
    let stub = start_stub(|_, _| (200, stored_pet_body())).await;
    let client = store(&stub);

    let document = client.fetch(&pet_path(), &credential()).await.unwrap();
    assert_eq!(document.update_time.as_deref(), Some("2024-05-02T10:00:00.000000Z"));
    assert_eq!(document.fields.get("name"), Some(&StructuredValue::String("Kit".into())));
    assert_eq!(document.fields.get("level"), Some(&StructuredValue::Integer(4)));
    assert!(!document.fields.contains_key("unknown"));

    let pet = PetState::from_record(&document.fields);
    assert_eq!(pet.hunger, 100.0);
    assert_eq!(pet.happiness, 70.0);
    assert_eq!(pet.energy, 0.0);
    assert_eq!(pet.cleanliness, 42.5);

    let requests = stub.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(
        requests[0].target,
        "/v1/projects/demo/databases/(default)/documents/users/u1/pet_data/current"
    );
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer id-token-1"));
}

#[tokio::test]
async fn test_fetch_missing_is_not_found() {
    let body = json!({"error": {"code": 404, "message": "Document \"x\" not found.", "status": "NOT_FOUND"}});
    let stub = start_stub(move |_, _| (404, body.to_string())).await;

    let err = store(&stub).fetch(&pet_path(), &credential()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(err.message, "Document \"x\" not found.");
}

#[tokio::test]
async fn test_http_error_uses_envelope_message() {
    let body = json!({"error": {"code": 403, "message": "Missing or insufficient permissions.", "status": "PERMISSION_DENIED"}});
    let stub = start_stub(move |_, _| (403, body.to_string())).await;

    let err = store(&stub).fetch(&pet_path(), &credential()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Http);
    assert_eq!(err.status, Some(403));
    assert_eq!(err.message, "Missing or insufficient permissions.");
}

#[tokio::test]
async fn test_http_error_without_envelope() {
    let stub = start_stub(|_, _| (500, "internal".to_string())).await;

    let err = store(&stub)
        .create_or_replace(&pet_path(), &PetState::default().to_record(), &credential())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Http);
    assert_eq!(err.status, Some(500));
    assert_eq!(err.message, UNKNOWN_STORE_ERROR);
}

#[tokio::test]
async fn test_create_or_replace_sends_full_document() {
    let stub = start_stub(|_, _| (200, echo_write_body())).await;
    let mut pet = PetState::named("Kit");
    pet.level = 2;

    store(&stub)
        .create_or_replace(&pet_path(), &pet.to_record(), &credential())
        .await
        .unwrap();

    let requests = stub.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "PATCH");
    assert!(!request.target.contains("updateMask"));
    assert_eq!(request.authorization.as_deref(), Some("Bearer id-token-1"));

    let body = request.json();
    let fields = body["fields"].as_object().unwrap();
    assert_eq!(fields.len(), 8);
    assert_eq!(fields["name"], json!({"stringValue": "Kit"}));
    assert_eq!(fields["level"], json!({"integerValue": "2"}));
    assert_eq!(fields["hunger"], json!({"doubleValue": 50.0}));
}

#[tokio::test]
async fn test_patch_sends_update_mask() {
    let stub = start_stub(|_, _| (200, echo_write_body())).await;
    let mut fields = Record::new();
    fields.insert("xp".into(), StructuredValue::Integer(40));
    fields.insert("nick name".into(), StructuredValue::String("Z".into()));

    store(&stub).patch(&pet_path(), &fields, &credential()).await.unwrap();

    let requests = stub.requests.lock().unwrap().clone();
    let request = &requests[0];
    assert_eq!(request.method, "PATCH");
    assert!(request.target.contains("updateMask.fieldPaths=xp"));
    assert!(request.target.contains("updateMask.fieldPaths=%60nick+name%60"));
    assert_eq!(
        request.json()["fields"],
        json!({"nick name": {"stringValue": "Z"}, "xp": {"integerValue": "40"}})
    );
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let port = free_port().await;
    let config = StoreConfig::with_base_url(&format!("http://127.0.0.1:{port}/v1/documents")).unwrap();
    let client = FirestoreClient::new(&config).unwrap();

    let err = client.fetch(&pet_path(), &credential()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Network);
    assert_eq!(err.status, None);
    assert!(!err.message.is_empty());
}

#[tokio::test]
async fn test_sign_in_and_rejection() {
    let stub = start_stub(|_, target| {
        if target.contains("accounts:signInWithPassword") {
            (200, json!({"localId": "u1", "idToken": "tok", "expiresIn": "3600"}).to_string())
        } else {
            (400, json!({"error": {"code": 400, "message": "EMAIL_EXISTS"}}).to_string())
        }
    })
    .await;
    let endpoint = stub.base.replace("/v1/projects/demo/databases/(default)/documents", "/v1/");
    let auth = IdentityToolkitClient::new(&AuthConfig::with_endpoint(&endpoint, "key-1").unwrap()).unwrap();

    let credential = auth.sign_in("pet@example.com", "hunter22").await.unwrap();
    assert_eq!(credential, Credential::new("u1", "tok"));

    let err = auth.sign_up("pet@example.com", "hunter22").await.unwrap_err();
    assert_eq!(err, AuthError::Rejected("EMAIL_EXISTS".into()));

    let requests = stub.requests.lock().unwrap().clone();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].target, "/v1/accounts:signInWithPassword?key=key-1");
    assert_eq!(
        requests[0].json(),
        json!({"email": "pet@example.com", "password": "hunter22", "returnSecureToken": true})
    );
}

#[tokio::test]
async fn test_autosave_session_against_store() {
    let stub = start_stub(|method, _| match method {
        "GET" => (200, stored_pet_body()),
        _ => (200, echo_write_body()),
    })
    .await;
    let mut coordinator = AutosaveCoordinator::new(Arc::new(store(&stub)), AutosaveConfig::manual());
    let _events = coordinator.take_event_rx().unwrap();

    let outcome = coordinator.start_session(credential()).await.unwrap();
    assert_eq!(outcome, LoadOutcome::Restored);
    assert_eq!(coordinator.pet().await.unwrap().level, 4);

    coordinator.update_pet(|pet| pet.feed()).await;
    let result = timeout(Duration::from_secs(5), coordinator.save_now()).await.unwrap();
    assert_eq!(result.unwrap(), SaveRequest::Dispatched);

    timeout(Duration::from_secs(5), coordinator.end_session())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coordinator.state(), SessionState::Unbound);

    let requests = stub.requests.lock().unwrap().clone();
    let writes: Vec<_> = requests.iter().filter(|r| r.method == "PATCH").collect();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].json()["fields"]["hunger"], json!({"doubleValue": 70.0}));
    assert_eq!(writes[0].json()["fields"]["xp"], json!({"integerValue": "35"}));
}
