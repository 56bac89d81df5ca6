//! Panel client behavior against a scripted HTTP responder.

use pa_panel::{PanelClient, PanelError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve one canned response per accepted connection, recording each
/// request head for later assertions.
async fn spawn_server(responses: Vec<String>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    tokio::spawn(async move {
        for response in responses {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            let mut buf = vec![0u8; 16 * 1024];
            let mut head = String::new();
            loop {
                match sock.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        head.push_str(&String::from_utf8_lossy(&buf[..n]));
                        if head.contains("\r\n\r\n") {
                            break;
                        }
                    }
                }
            }
            record.lock().push(head);
            let _ = sock.write_all(response.as_bytes()).await;
            let _ = sock.shutdown().await;
        }
    });
    (format!("http://{addr}"), seen)
}

fn ok_json(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn empty_status(line: &str) -> String {
    format!("HTTP/1.1 {line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
}

fn client(base: &str, retry_count: u32) -> PanelClient {
    PanelClient::new(base, "/api", "tok-123", Duration::from_secs(5), retry_count).unwrap()
}

#[tokio::test]
async fn config_fetch_caches_and_echoes_etag() {
    let envelope = r#"{"config":{"version":"v1","inbounds":[],"outbounds":[]},"etag":"e1"}"#;
    let (base, seen) = spawn_server(vec![ok_json(envelope), empty_status("304 Not Modified")]).await;
    let client = client(&base, 0);

    let first = client.get_config().await.unwrap();
    let config = first.expect("first fetch returns a payload");
    assert_eq!(config.version, "v1");
    assert_eq!(config.etag, "e1");

    let second = client.get_config().await.unwrap();
    assert!(second.is_none(), "304 must surface as unchanged");

    let seen = seen.lock();
    assert!(seen[0].contains("X-Node-Token: tok-123"));
    assert!(!seen[0].contains("If-None-Match"), "no etag on the first fetch");
    assert!(seen[1].contains("If-None-Match: e1"));
}

#[tokio::test]
async fn server_errors_are_retried() {
    let envelope = r#"{"config":{"version":"v2","inbounds":[],"outbounds":[]},"etag":"e2"}"#;
    let (base, seen) = spawn_server(vec![
        empty_status("503 Service Unavailable"),
        ok_json(envelope),
    ])
    .await;
    let client = client(&base, 2);

    let config = client.get_config().await.unwrap().expect("changed");
    assert_eq!(config.version, "v2");
    assert_eq!(seen.lock().len(), 2);
}

#[tokio::test]
async fn client_errors_are_terminal() {
    let (base, seen) = spawn_server(vec![empty_status("404 Not Found")]).await;
    let client = client(&base, 3);

    let err = client.get_config().await.unwrap_err();
    match err {
        PanelError::Status { status, .. } => assert_eq!(status, 404),
        other => panic!("expected terminal status error, got {other}"),
    }
    assert_eq!(seen.lock().len(), 1, "4xx must not be retried");
}

#[tokio::test]
async fn alive_report_returns_kick_list() {
    let (base, seen) = spawn_server(vec![ok_json(r#"{"success":true,"kickUsers":["a@x"]}"#)]).await;
    let client = client(&base, 0);

    let resp = client.report_alive(&[]).await.unwrap();
    assert!(resp.success);
    assert_eq!(resp.kick_users, vec!["a@x".to_string()]);

    let seen = seen.lock();
    assert!(seen[0].starts_with("POST /api/agent/alive"));
    assert!(seen[0].contains("aliveUsers"));
}
