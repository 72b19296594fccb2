//! Integration tests for the mutclip server: HTTP routes and full
//! WebSocket flows.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mutclip::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Starts a server on a random port and returns the address.
async fn start_server(builder: MutclipServerBuilder) -> String {
    let server = builder
        .bind("127.0.0.1:0")
        .build()
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    addr
}

/// Minimal HTTP/1.1 GET. Returns the status code and body.
async fn http_get(addr: &str, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.expect("tcp connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("write");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read");
    let response = String::from_utf8_lossy(&raw).into_owned();

    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status code");
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

async fn new_clip(addr: &str) -> String {
    let (status, body) = http_get(addr, "/newclip").await;
    assert_eq!(status, 200);
    body
}

async fn connect(addr: &str, id: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/{id}"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, message: &Message) {
    let bytes = BincodeCodec.encode(message).expect("encode");
    ws.send(tungstenite::Message::Binary(bytes.into()))
        .await
        .expect("send");
}

/// Reads the next binary frame and decodes it.
async fn recv(ws: &mut ClientWs) -> Message {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        if let tungstenite::Message::Binary(bytes) = frame {
            return BincodeCodec.decode(&bytes).expect("decode");
        }
    }
}

fn text(data: &str) -> Message {
    Message::Text { data: data.into() }
}

// =========================================================================
// HTTP routes
// =========================================================================

#[tokio::test]
async fn test_newclip_then_check() {
    let addr = start_server(MutclipServer::builder()).await;

    let id = new_clip(&addr).await;
    assert_eq!(id.len(), 8, "ids look like xx-xx-xx, got {id:?}");
    assert_eq!(id.matches('-').count(), 2);

    let (status, _) = http_get(&addr, &format!("/check/{id}")).await;
    assert_eq!(status, 200);

    let (status, _) = http_get(&addr, "/check/nope").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_unknown_clip_gets_fatal_error() {
    let addr = start_server(MutclipServer::builder()).await;
    let mut ws = connect(&addr, "nope").await;

    match recv(&mut ws).await {
        Message::Error { fatal, desc } => {
            assert!(fatal);
            assert!(desc.contains("nope"));
        }
        other => panic!("expected a fatal error, got {other:?}"),
    }

    // Then the server closes the socket.
    let rest = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(frame)) = ws.next().await {
            if let tungstenite::Message::Binary(_) = frame {
                return false;
            }
        }
        true
    })
    .await
    .expect("socket should close");
    assert!(rest, "no further data frames after the fatal error");
}

// =========================================================================
// WebSocket flows
// =========================================================================

#[tokio::test]
async fn test_text_roundtrip_between_two_sockets() {
    let addr = start_server(MutclipServer::builder()).await;
    let id = new_clip(&addr).await;

    let mut a = connect(&addr, &id).await;
    let mut b = connect(&addr, &id).await;
    assert_eq!(recv(&mut a).await, text(""));
    assert_eq!(recv(&mut b).await, text(""));

    send(&mut b, &text("hello, world")).await;

    assert_eq!(recv(&mut a).await, text("hello, world"));
    assert_eq!(recv(&mut b).await, Message::Ack);
}

#[tokio::test]
async fn test_file_transfer_between_two_sockets() {
    let addr = start_server(MutclipServer::builder()).await;
    let id = new_clip(&addr).await;

    let mut a = connect(&addr, &id).await;
    let mut b = connect(&addr, &id).await;
    recv(&mut a).await;
    recv(&mut b).await;

    let chunks = [b"first".to_vec(), b"second".to_vec()];
    send(
        &mut a,
        &Message::FileHeader {
            filename: "notes.txt".into(),
            content_type: "text/plain".into(),
            num_chunks: 2,
        },
    )
    .await;
    for (i, data) in chunks.iter().enumerate() {
        assert_eq!(recv(&mut a).await, Message::NextChunk);
        send(
            &mut a,
            &Message::Chunk {
                index: i as i32,
                data: data.clone(),
            },
        )
        .await;
    }

    match recv(&mut b).await {
        Message::FileHeader {
            filename,
            num_chunks,
            ..
        } => {
            assert_eq!(filename, "notes.txt");
            assert_eq!(num_chunks, 2);
        }
        other => panic!("expected a file header, got {other:?}"),
    }
    for (i, data) in chunks.iter().enumerate() {
        send(&mut b, &Message::NextChunk).await;
        assert_eq!(
            recv(&mut b).await,
            Message::Chunk {
                index: i as i32,
                data: data.clone()
            }
        );
    }

    assert_eq!(recv(&mut a).await, Message::Ack);
}

#[tokio::test]
async fn test_garbage_frames_get_soft_errors() {
    let addr = start_server(MutclipServer::builder()).await;
    let id = new_clip(&addr).await;
    let mut ws = connect(&addr, &id).await;
    recv(&mut ws).await;

    ws.send(tungstenite::Message::Binary(vec![0xFF, 0x00].into()))
        .await
        .unwrap();
    assert_eq!(recv(&mut ws).await, Message::error("unexpected message"));

    ws.send(tungstenite::Message::Text("hi".into())).await.unwrap();
    assert_eq!(recv(&mut ws).await, Message::error("unexpected message"));

    // The connection is still usable.
    send(&mut ws, &text("ok")).await;
    assert_eq!(recv(&mut ws).await, Message::Ack);
}

#[tokio::test]
async fn test_foreign_origin_is_forbidden() {
    let addr =
        start_server(MutclipServer::builder().allowed_origins(["mutclip.example"])).await;
    let id = new_clip(&addr).await;

    let mut request = format!("ws://{addr}/ws/{id}").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("https://evil.example"));
    match tokio_tungstenite::connect_async(request).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 403),
        Err(e) => panic!("expected a 403, got {e}"),
        Ok(_) => panic!("foreign origin was accepted"),
    }

    let mut request = format!("ws://{addr}/ws/{id}").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("https://mutclip.example"));
    let (mut ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("listed origin should connect");
    assert_eq!(recv(&mut ws).await, text(""));
}

#[tokio::test]
async fn test_shutdown_stops_the_server() {
    let server = MutclipServer::builder()
        .bind("127.0.0.1:0")
        .build()
        .await
        .unwrap();
    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(server.run());

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server should stop")
        .unwrap();
    assert!(result.is_ok());
}
