//! Tests for the REST backend against a one-shot local HTTP responder.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use chatsync::backend::http::HttpBackend;
use chatsync::backend::{BackendError, ChatBackend};
use chatsync::config::BackendConfig;
use chatsync::types::{ConversationId, LocalId, MessageId, NewMessage, ParticipantId};

/// Request line and body seen by the responder.
struct Seen {
    request_line: String,
    body: String,
}

fn config(base_url: &str) -> BackendConfig {
    BackendConfig {
        base_url: base_url.to_owned(),
        request_timeout_secs: 5,
        connect_timeout_secs: 1,
    }
}

fn backend(base_url: &str) -> HttpBackend {
    match HttpBackend::new(&config(base_url)) {
        Ok(backend) => backend,
        Err(err) => panic!("backend should build for {base_url}: {err}"),
    }
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p.saturating_add(4))
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Serve exactly one request with `status` and a JSON `body`.
async fn serve_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<Seen>) {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) => panic!("listener should bind: {err}"),
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => panic!("listener should have an address: {err}"),
    };
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut buf = Vec::new();
        let mut chunk = [0_u8; 4096];
        let (head, body_start) = loop {
            let Ok(n) = socket.read(&mut chunk).await else {
                return;
            };
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = header_end(&buf) {
                break (String::from_utf8_lossy(&buf[..end]).into_owned(), end);
            }
        };
        let wanted = content_length(&head);
        while buf.len().saturating_sub(body_start) < wanted {
            let Ok(n) = socket.read(&mut chunk).await else {
                return;
            };
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
        let _ = tx.send(Seen {
            request_line: head.lines().next().unwrap_or_default().to_owned(),
            body: String::from_utf8_lossy(&buf[body_start..]).into_owned(),
        });
    });

    (format!("http://{addr}/api"), rx)
}

#[test]
fn base_url_gains_trailing_slash() {
    let backend = backend("http://chat.example.com/api");
    assert_eq!(backend.base_url().as_str(), "http://chat.example.com/api/");
}

#[test]
fn endpoints_escape_conversation_ids() {
    let backend = backend("http://chat.example.com/api/");
    let url = match backend.endpoint(&ConversationId::new("coach 1/client 7"), "messages") {
        Ok(url) => url,
        Err(err) => panic!("endpoint should resolve: {err}"),
    };
    assert_eq!(
        url.as_str(),
        "http://chat.example.com/api/conversations/coach%201%2Fclient%207/messages"
    );
}

#[test]
fn invalid_base_url_is_rejected() {
    assert!(matches!(
        HttpBackend::new(&config("not a url")),
        Err(BackendError::Url(_))
    ));
}

#[tokio::test]
async fn fetch_history_decodes_records() {
    let (base, seen) = serve_once(
        "200 OK",
        r#"[{"id":"m1","conversationId":"conv-42","senderId":"client-7","recipientId":"coach-1","content":"hello","timestamp":"2024-05-01T10:00:00Z","read":true}]"#,
    )
    .await;

    let records = match backend(&base).fetch_history(&ConversationId::new("conv-42")).await {
        Ok(records) => records,
        Err(err) => panic!("history should load: {err}"),
    };
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, MessageId::new("m1"));
    assert!(records[0].read);
    assert!(records[0].local_id.is_none());

    let seen = match tokio::time::timeout(Duration::from_secs(5), seen).await {
        Ok(Ok(seen)) => seen,
        _ => panic!("responder should report the request"),
    };
    assert!(seen
        .request_line
        .starts_with("GET /api/conversations/conv-42/messages"));
}

#[tokio::test]
async fn create_message_sends_local_id_and_returns_record() {
    let (base, seen) = serve_once(
        "201 Created",
        r#"{"id":"srv-1","localId":"local-abc","conversationId":"conv-42","senderId":"coach-1","recipientId":"client-7","content":"hi","timestamp":"2024-05-01T10:00:01Z"}"#,
    )
    .await;

    let new_message = NewMessage {
        local_id: match serde_json::from_str::<LocalId>("\"local-abc\"") {
            Ok(local_id) => local_id,
            Err(err) => panic!("local id should decode: {err}"),
        },
        conversation_id: ConversationId::new("conv-42"),
        sender_id: ParticipantId::new("coach-1"),
        recipient_id: ParticipantId::new("client-7"),
        content: Some("hi".to_owned()),
        attachments: Vec::new(),
        timestamp: chrono::Utc::now(),
    };
    let record = match backend(&base).create_message(new_message).await {
        Ok(record) => record,
        Err(err) => panic!("create should succeed: {err}"),
    };
    assert_eq!(record.id, MessageId::new("srv-1"));
    assert_eq!(record.local_id.as_ref().map(LocalId::as_str), Some("local-abc"));

    let seen = match tokio::time::timeout(Duration::from_secs(5), seen).await {
        Ok(Ok(seen)) => seen,
        _ => panic!("responder should report the request"),
    };
    assert!(seen
        .request_line
        .starts_with("POST /api/conversations/conv-42/messages"));
    assert!(seen.body.contains("\"localId\":\"local-abc\""));
}

#[tokio::test]
async fn not_found_maps_to_typed_error() {
    let (base, _seen) = serve_once("404 Not Found", r#"{"error":"no such conversation"}"#).await;
    let result = backend(&base)
        .mark_as_read(&ConversationId::new("conv-404"), &[MessageId::new("m1")])
        .await;
    assert!(matches!(result, Err(BackendError::NotFound(id)) if id == "conv-404"));
}

#[tokio::test]
async fn server_error_keeps_status_and_body() {
    let (base, _seen) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
    let result = backend(&base).fetch_history(&ConversationId::new("conv-42")).await;
    match result {
        Err(BackendError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert!(body.contains("boom"));
        }
        other => panic!("expected Status error, got {other:?}"),
    }
}
