//! Scripted HTTP responder standing in for the Admin API in tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::AdminClientConfig;

/// Client timeout used against the responder.
pub(crate) const CLIENT_TIMEOUT: Duration = Duration::from_millis(300);

/// Scripted reply to one request, consumed in order.
pub(crate) enum Reply {
    /// 200 with this JSON body.
    Json(Value),
    /// Read the request, then hold the connection without answering.
    Stall(Duration),
}

/// A request as received.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub query: String,
    pub variables: Value,
    pub access_token: Option<String>,
}

pub(crate) struct TestServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestServer {
    pub(crate) async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let replies = Arc::new(Mutex::new(VecDeque::from(replies)));

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let replies = replies.clone();
                tokio::spawn(async move {
                    serve(socket, recorded, replies).await;
                });
            }
        });

        Self { base_url, requests }
    }

    /// Client settings pointing at this responder with short timeouts.
    pub(crate) fn client_config(&self) -> AdminClientConfig {
        AdminClientConfig::default()
            .with_shop_domain(self.base_url.clone())
            .with_access_token("shpat_test")
            .with_timeout(CLIENT_TIMEOUT)
            .with_max_retries(2)
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(
    mut socket: TcpStream,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
    replies: Arc<Mutex<VecDeque<Reply>>>,
) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    let reply = {
        recorded.lock().unwrap().push(request);
        replies.lock().unwrap().pop_front()
    };

    match reply {
        Some(Reply::Json(body)) => write_json(&mut socket, &body).await,
        Some(Reply::Stall(duration)) => tokio::time::sleep(duration).await,
        None => {
            let body = json!({"errors": [{"message": "no scripted reply"}]});
            write_json(&mut socket, &body).await;
        }
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let header = |name: &str| {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    };
    let length: usize = header("content-length")?.parse().ok()?;
    let access_token = header("x-shopify-access-token");

    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body: Value = serde_json::from_slice(&buf[header_end..header_end + length]).ok()?;
    Some(RecordedRequest {
        query: body["query"].as_str().unwrap_or_default().to_string(),
        variables: body["variables"].clone(),
        access_token,
    })
}

async fn write_json(socket: &mut TcpStream, body: &Value) {
    let body = body.to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}
