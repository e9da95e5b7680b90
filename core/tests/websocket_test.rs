/*
 * websocket_test.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * WebSocket integration tests: RFC 6455 echo (text and binary), close
 * notification, and a raw hixie-76 handshake exchange.
 */

use std::cell::Cell;
use std::rc::Rc;

use async_trait::async_trait;
use bytes::Bytes;
use md5::Md5;
use sha1::Digest;

use squall_core::error::Result;
use squall_core::stream::Stream;
use squall_core::testing::AsyncHttpTestCase;
use squall_core::web::{Application, Settings, UrlSpec};
use squall_core::websocket::{websocket_connect, Message, WebSocketConnection, WebSocketHandler};

struct EchoHandler {
    closed: Rc<Cell<bool>>,
}

#[async_trait(?Send)]
impl WebSocketHandler for EchoHandler {
    async fn on_message(
        &mut self,
        conn: &mut WebSocketConnection,
        message: Message,
    ) -> Result<()> {
        match message {
            Message::Text(text) => conn.write_message(text.as_bytes(), false).await,
            Message::Binary(data) => conn.write_message(&data, true).await,
        }
    }

    fn on_close(&mut self) {
        self.closed.set(true);
    }
}

fn echo_app(closed: Rc<Cell<bool>>) -> Application {
    Application::new(
        vec![UrlSpec::websocket("/echo", move || EchoHandler {
            closed: closed.clone(),
        })],
        Settings::default(),
    )
}

#[test]
fn websocket_echo_text() {
    let closed = Rc::new(Cell::new(false));
    let t = AsyncHttpTestCase::new(echo_app(closed));
    let url = format!("ws://127.0.0.1:{}/echo", t.port());
    t.run(async move {
        let mut client = websocket_connect(&url).await.unwrap();
        client.write_message(b"Hello", false).await.unwrap();
        let message = client.read_message().await.unwrap().unwrap();
        assert_eq!(message, Message::Text("Hello".to_string()));
    });
}

#[test]
fn websocket_echo_binary_all_byte_values() {
    let closed = Rc::new(Cell::new(false));
    let t = AsyncHttpTestCase::new(echo_app(closed));
    let url = format!("ws://127.0.0.1:{}/echo", t.port());
    t.run(async move {
        let payload: Vec<u8> = (0..=255u8).collect();
        let mut client = websocket_connect(&url).await.unwrap();
        client.write_message(&payload, true).await.unwrap();
        let message = client.read_message().await.unwrap().unwrap();
        assert_eq!(message, Message::Binary(Bytes::from(payload)));
    });
}

#[test]
fn closing_client_delivers_on_close() {
    let closed = Rc::new(Cell::new(false));
    let t = AsyncHttpTestCase::new(echo_app(closed.clone()));
    let url = format!("ws://127.0.0.1:{}/echo", t.port());
    t.run(async move {
        let mut client = websocket_connect(&url).await.unwrap();
        client.write_message(b"ping me", false).await.unwrap();
        client.read_message().await.unwrap().unwrap();
        client.abort().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    });
    assert!(closed.get());
}

#[test]
fn close_handshake_delivers_on_close() {
    let closed = Rc::new(Cell::new(false));
    let t = AsyncHttpTestCase::new(echo_app(closed.clone()));
    let url = format!("ws://127.0.0.1:{}/echo", t.port());
    t.run(async move {
        let mut client = websocket_connect(&url).await.unwrap();
        client.close().await.unwrap();
        // The server echoes the close frame; read_message drains it.
        assert!(client.read_message().await.unwrap().is_none());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    });
    assert!(closed.get());
}

#[test]
fn ping_is_answered_transparently() {
    let closed = Rc::new(Cell::new(false));
    let t = AsyncHttpTestCase::new(echo_app(closed));
    let url = format!("ws://127.0.0.1:{}/echo", t.port());
    t.run(async move {
        let mut client = websocket_connect(&url).await.unwrap();
        client.ping(b"alive?").await.unwrap();
        client.write_message(b"after ping", false).await.unwrap();
        let message = client.read_message().await.unwrap().unwrap();
        assert_eq!(message, Message::Text("after ping".to_string()));
    });
}

#[test]
fn hixie76_handshake_and_echo() {
    let closed = Rc::new(Cell::new(false));
    let t = AsyncHttpTestCase::new(echo_app(closed));
    let port = t.port();
    t.run(async move {
        let mut stream = Stream::connect("127.0.0.1", port).await.unwrap();
        let request = format!(
            "GET /echo HTTP/1.1\r\n\
             Upgrade: WebSocket\r\n\
             Connection: Upgrade\r\n\
             Origin: http://127.0.0.1:{port}\r\n\
             Host: 127.0.0.1:{port}\r\n\
             Sec-WebSocket-Key1: 1  2\r\n\
             Sec-WebSocket-Key2: 3 4 5\r\n\r\n",
            port = port
        );
        stream.write_all(Bytes::from(request)).await.unwrap();
        stream
            .write_all(Bytes::from_static(b"12345678"))
            .await
            .unwrap();

        let head = stream.read_until(b"\r\n\r\n").await.unwrap();
        let head = String::from_utf8_lossy(&head).into_owned();
        assert!(head.starts_with("HTTP/1.1 101 Web Socket Protocol Handshake"));
        assert!(head.contains("Sec-WebSocket-Origin:"));
        assert!(head.contains("Sec-WebSocket-Location: ws://"));

        // key1: digits 12, two spaces -> 6; key2: digits 345, two spaces -> 172
        let mut hasher = Md5::new();
        hasher.update(6u32.to_be_bytes());
        hasher.update(172u32.to_be_bytes());
        hasher.update(b"12345678");
        let expected = hasher.finalize();
        let digest = stream.read_bytes(16).await.unwrap();
        assert_eq!(&digest[..], expected.as_slice());

        let mut frame = vec![0x00];
        frame.extend_from_slice(b"hello legacy");
        frame.push(0xff);
        stream.write_all(Bytes::from(frame)).await.unwrap();
        let first = stream.read_bytes(1).await.unwrap();
        assert_eq!(first[0], 0x00);
        let echoed = stream.read_until(&[0xff]).await.unwrap();
        assert_eq!(&echoed[..echoed.len() - 1], b"hello legacy");
    });
}
