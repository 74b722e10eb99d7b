#![allow(dead_code)]

use ase_sdk::{AseClient, AseClientBuilder, Credentials, Endpoint, FrameStatus, Request};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HsRequest, Response as HsResponse,
};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const APP_ID: &str = "app-test";
pub const API_KEY: &str = "key-test";
pub const API_SECRET: &str = "secret-test";
pub const PATH: &str = "/v1/private/test";

/// What the in-process server does with each connection.
#[derive(Debug, Clone)]
pub enum Mode {
    /// Answer every frame; the answer to a `LastFrame` is a `LastFrame`.
    Echo,
    /// Answer every frame; the answer to the n-th frame is a `LastFrame`.
    CompleteAfter(usize),
    /// Record frames, never answer.
    Silent,
    /// Complete the handshake, then close straight away.
    CloseImmediately,
    /// Refuse the upgrade with a plain HTTP 403.
    Reject(&'static str),
    /// Accept TCP but never answer the upgrade request.
    Stall,
    /// Complete the handshake, then never read.
    Deaf,
    /// Answer the upgrade after a delay, then record `{"closed": true}`
    /// once the client closes.
    SlowHandshake(Duration),
}

pub struct WsServer {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Value>>>,
    uris: Arc<Mutex<Vec<String>>>,
}

impl WsServer {
    pub async fn start(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let uris = Arc::new(Mutex::new(Vec::new()));

        let (count, frames, seen_uris) = (accepted.clone(), received.clone(), uris.clone());
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                count.fetch_add(1, Ordering::SeqCst);
                let mode = mode.clone();
                let frames = frames.clone();
                let seen_uris = seen_uris.clone();
                tokio::spawn(async move {
                    match mode {
                        Mode::Reject(body) => return reject(tcp, body).await,
                        Mode::Stall => return stall(tcp).await,
                        Mode::SlowHandshake(delay) => tokio::time::sleep(delay).await,
                        _ => {}
                    }

                    let callback = move |req: &HsRequest,
                                          resp: HsResponse|
                          -> Result<HsResponse, ErrorResponse> {
                        seen_uris.lock().unwrap().push(req.uri().to_string());
                        Ok(resp)
                    };
                    if let Ok(ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await {
                        serve(ws, mode, frames).await;
                    }
                });
            }
        });

        Self {
            addr,
            accepted,
            received,
            uris,
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn uris(&self) -> Vec<String> {
        self.uris.lock().unwrap().clone()
    }

    pub fn builder(&self) -> AseClientBuilder {
        AseClient::builder(
            Credentials::new(
                APP_ID.to_string(),
                API_KEY.to_string(),
                API_SECRET.to_string(),
            ),
            Endpoint::new(self.addr.to_string(), PATH),
        )
    }

    pub fn client(&self) -> AseClient {
        self.builder().build().unwrap()
    }
}

async fn serve(ws: WebSocketStream<TcpStream>, mode: Mode, received: Arc<Mutex<Vec<Value>>>) {
    let (mut sink, mut stream) = ws.split();
    match mode {
        Mode::CloseImmediately => {
            let _ = sink.close().await;
            return;
        }
        Mode::Deaf => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return;
        }
        Mode::SlowHandshake(_) => {
            while let Some(Ok(message)) = stream.next().await {
                if message.is_close() {
                    break;
                }
            }
            received.lock().unwrap().push(json!({"closed": true}));
            return;
        }
        _ => {}
    }

    let mut count = 0usize;
    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        received.lock().unwrap().push(frame.clone());
        count += 1;

        let last = match mode {
            Mode::Echo => frame["header"]["status"] == 2,
            Mode::CompleteAfter(n) => count >= n,
            _ => continue,
        };
        let reply = json!({
            "header": {
                "code": 0,
                "message": "success",
                "sid": "sid-test",
                "status": if last { 2 } else { 1 }
            },
            "payload": {"result": {"seq": count}}
        });
        if sink.send(Message::Text(reply.to_string())).await.is_err() {
            break;
        }
    }
}

async fn stall(mut tcp: TcpStream) {
    let mut buf = [0u8; 4096];
    while tcp.read(&mut buf).await.map_or(false, |n| n > 0) {}
}

async fn reject(mut tcp: TcpStream, body: &str) {
    let mut buf = [0u8; 4096];
    let mut seen = Vec::new();
    loop {
        let n = tcp.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        seen.extend_from_slice(&buf[..n]);
        if seen.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let response = format!(
        "HTTP/1.1 403 Forbidden\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = tcp.write_all(response.as_bytes()).await;
    let _ = tcp.shutdown().await;
}

pub fn frame(status: FrameStatus) -> Request {
    let mut request = Request::new(status).with_app_id(APP_ID);
    request.set_parameter("trace", json!(true));
    request
}
