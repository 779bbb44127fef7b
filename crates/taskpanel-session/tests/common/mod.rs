/*
[INPUT]:  Test scenarios needing a live router
[OUTPUT]: Shared test utilities: in-process WAMP router, recv helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new router behaviours or fixtures
*/

//! Common test utilities for taskpanel-session tests

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;

pub const SUBSCRIPTION_ID: u64 = 77;

/// Router that accepts one client and answers from a fixed script:
///
/// - `test.echo` returns its first argument
/// - `test.fail` returns an ERROR carrying "Not enough GNT available"
/// - `test.silent` never answers
/// - `test.close` closes the socket
/// - SUBSCRIBE answers SUBSCRIBED then publishes one EVENT `[{"topic": topic}]`
pub struct TestRouter {
    pub url: String,
    /// Every frame the client sent after HELLO.
    pub frames: mpsc::UnboundedReceiver<Value>,
}

pub async fn spawn_router() -> TestRouter {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind router");
    let addr = listener.local_addr().expect("router addr");
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept client");
        let callback = |_req: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
            response
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("wamp.2.json"));
            Ok(response)
        };
        let mut ws = accept_hdr_async(stream, callback).await.expect("handshake");

        let hello = next_frame(&mut ws).await.expect("hello frame");
        assert_eq!(hello[0], json!(1));
        send(&mut ws, json!([2, 9001, {}])).await;

        while let Some(frame) = next_frame(&mut ws).await {
            let _ = frames_tx.send(frame.clone());
            match frame[0].as_u64() {
                Some(48) => {
                    let request = frame[1].clone();
                    match frame[3].as_str() {
                        Some("test.echo") => {
                            let first = frame[4].get(0).cloned().unwrap_or(Value::Null);
                            send(&mut ws, json!([50, request, {}, [first]])).await;
                        }
                        Some("test.fail") => {
                            send(
                                &mut ws,
                                json!([8, 48, request, {}, "wamp.error.runtime_error", ["Not enough GNT available"]]),
                            )
                            .await;
                        }
                        Some("test.close") => {
                            let _ = ws.close(None).await;
                            return;
                        }
                        _ => {}
                    }
                }
                Some(32) => {
                    let request = frame[1].clone();
                    let topic = frame[3].clone();
                    send(&mut ws, json!([33, request, SUBSCRIPTION_ID])).await;
                    send(&mut ws, json!([36, SUBSCRIPTION_ID, 1, {}, [{"topic": topic}]])).await;
                }
                Some(34) => {
                    let request = frame[1].clone();
                    send(&mut ws, json!([35, request])).await;
                }
                _ => {}
            }
        }
    });

    TestRouter {
        url: format!("ws://{addr}/ws"),
        frames: frames_rx,
    }
}

async fn next_frame<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>) -> Option<Value>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

async fn send<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>, frame: Value)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("router send");
}

/// Receive with a one second ceiling.
pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Option<T> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Next client frame with the given message code.
pub async fn frame_with_code(router: &mut TestRouter, code: u64) -> Option<Value> {
    loop {
        let frame = recv_within(&mut router.frames).await?;
        if frame[0].as_u64() == Some(code) {
            return Some(frame);
        }
    }
}
