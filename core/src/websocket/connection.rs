/*
 * connection.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Squall, an asynchronous web server and client library.
 *
 * Squall is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Squall is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Squall.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Server-side WebSocket connection: owns the stream after the HTTP
//! handshake, runs the framing loop for either dialect, and dispatches to
//! the application's WebSocketHandler.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::http::request::HttpRequest;
use crate::stream::Stream;
use crate::websocket::frame::{
    encode_frame, read_frame, MessageAssembler, Message, OP_BINARY, OP_CLOSE, OP_PING, OP_PONG,
    OP_TEXT,
};
use crate::websocket::handshake::{
    build_hixie76_response, build_rfc6455_response, compute_accept_value, detect_dialect,
    hixie_challenge_response, validate_hixie76, validate_rfc6455, Dialect,
};
use crate::websocket::WebSocketHandler;

/// Grace period between sending our close frame and hard-closing the
/// socket when the peer never answers.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// An established WebSocket connection. Handlers write through this; the
/// run loop reads.
pub struct WebSocketConnection {
    stream: Stream,
    dialect: Dialect,
    mask_outgoing: bool,
    pub(crate) client_terminated: bool,
    pub(crate) server_terminated: bool,
    _count: Option<crate::watcher::CountGuard>,
}

impl WebSocketConnection {
    pub(crate) fn new(stream: Stream, dialect: Dialect, mask_outgoing: bool) -> Self {
        Self {
            stream,
            dialect,
            mask_outgoing,
            client_terminated: false,
            server_terminated: false,
            _count: crate::watcher::debug_count(crate::watcher::WEBSOCKET_COUNT),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub(crate) fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    fn fresh_mask(&self) -> Result<Option<[u8; 4]>> {
        if !self.mask_outgoing {
            return Ok(None);
        }
        let mut mask = [0u8; 4];
        getrandom::getrandom(&mut mask)
            .map_err(|e| Error::value(format!("cannot generate mask: {}", e)))?;
        Ok(Some(mask))
    }

    async fn write_frame(&mut self, fin: bool, opcode: u8, payload: &[u8]) -> Result<()> {
        let mask = self.fresh_mask()?;
        let data = encode_frame(fin, opcode, payload, mask);
        self.stream.write_all(data).await
    }

    /// Send a message. Text is the default; the legacy dialect cannot carry
    /// binary payloads.
    pub async fn write_message(&mut self, payload: &[u8], binary: bool) -> Result<()> {
        match self.dialect {
            Dialect::Hixie76 => {
                if binary {
                    return Err(Error::protocol(
                        "binary messages not supported by draft-76 peers",
                    ));
                }
                let mut data = Vec::with_capacity(payload.len() + 2);
                data.push(0x00);
                data.extend_from_slice(payload);
                data.push(0xff);
                self.stream.write_all(Bytes::from(data)).await
            }
            Dialect::Rfc6455 => {
                let opcode = if binary { OP_BINARY } else { OP_TEXT };
                self.write_frame(true, opcode, payload).await
            }
        }
    }

    /// Serialise a JSON value and send it as a text message.
    pub async fn write_json(&mut self, value: &serde_json::Value) -> Result<()> {
        let text = serde_json::to_string(value)
            .map_err(|e| Error::value(format!("JSON encode failed: {}", e)))?;
        self.write_message(text.as_bytes(), false).await
    }

    /// Send a ping (RFC 6455 only); the reply arrives via `on_pong`.
    pub async fn ping(&mut self, payload: &[u8]) -> Result<()> {
        match self.dialect {
            Dialect::Hixie76 => Err(Error::protocol("ping not supported by draft-76 peers")),
            Dialect::Rfc6455 => self.write_frame(true, OP_PING, payload).await,
        }
    }

    pub(crate) async fn write_pong(&mut self, payload: &[u8]) -> Result<()> {
        self.write_frame(true, OP_PONG, payload).await
    }

    /// Begin the closing handshake. If the peer already closed, tear the
    /// stream down now; otherwise the run loop waits up to five seconds for
    /// the peer's close before hard-closing.
    pub async fn close(&mut self) -> Result<()> {
        if self.server_terminated {
            return Ok(());
        }
        self.server_terminated = true;
        if self.client_terminated {
            self.stream.close().await;
            return Ok(());
        }
        match self.dialect {
            Dialect::Hixie76 => {
                self.stream
                    .write_all(Bytes::from_static(&[0xff, 0x00]))
                    .await
            }
            Dialect::Rfc6455 => self.write_frame(true, OP_CLOSE, &[]).await,
        }
    }

    pub(crate) async fn abort(&mut self) {
        self.client_terminated = true;
        self.server_terminated = true;
        self.stream.close().await;
    }
}

/// Accept an upgraded connection and run it to completion. Called by the
/// application once a WebSocket route matched; the stream has been
/// detached from the HTTP connection.
pub(crate) async fn run_server(
    stream: Stream,
    request: HttpRequest,
    mut handler: Box<dyn WebSocketHandler>,
    open_args: Vec<String>,
) {
    let dialect = detect_dialect(&request.headers);
    let mut conn = WebSocketConnection::new(stream, dialect, false);
    let result = match dialect {
        Dialect::Rfc6455 => {
            serve_rfc6455(&mut conn, &request, handler.as_mut(), &open_args).await
        }
        Dialect::Hixie76 => {
            serve_hixie76(&mut conn, &request, handler.as_mut(), &open_args).await
        }
    };
    match result {
        Ok(()) | Err(Error::StreamClosed) => {}
        Err(e) => {
            log::error!("Uncaught exception {} in {}", e, request.path);
        }
    }
    conn.abort().await;
    handler.on_close();
}

async fn serve_rfc6455(
    conn: &mut WebSocketConnection,
    request: &HttpRequest,
    handler: &mut dyn WebSocketHandler,
    open_args: &[String],
) -> Result<()> {
    if let Err(e) = validate_rfc6455(&request.headers) {
        log::debug!("Malformed WebSocket request received: {}", e);
        return Ok(());
    }
    let key = request.headers.get_or("Sec-Websocket-Key", "").into_owned();
    let accept = compute_accept_value(&key);
    let offered = request
        .headers
        .get_or("Sec-Websocket-Protocol", "")
        .into_owned();
    let offered: Vec<&str> = offered
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let subprotocol = if offered.is_empty() {
        None
    } else {
        handler.select_subprotocol(&offered)
    };
    let response = build_rfc6455_response(&accept, subprotocol.as_deref());
    conn.stream_mut().write_all(Bytes::from(response)).await?;

    handler.on_open(conn, open_args).await?;

    let mut assembler = MessageAssembler::new();
    loop {
        let frame = if conn.server_terminated {
            // We sent our close; give the peer five seconds to answer.
            match timeout(CLOSE_GRACE, read_frame(conn.stream_mut())).await {
                Ok(frame) => frame?,
                Err(_) => return Ok(()),
            }
        } else {
            match read_frame(conn.stream_mut()).await {
                Ok(frame) => frame,
                Err(Error::StreamClosed) => {
                    conn.client_terminated = true;
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        };
        match frame.opcode {
            OP_CLOSE => {
                conn.client_terminated = true;
                if !conn.server_terminated {
                    conn.write_frame(true, OP_CLOSE, &[]).await.ok();
                }
                return Ok(());
            }
            OP_PING => {
                let payload = frame.payload.clone();
                conn.write_pong(&payload).await?;
            }
            OP_PONG => handler.on_pong(&frame.payload),
            _ => {
                if let Some(message) = assembler.feed(frame)? {
                    handler.on_message(conn, message).await?;
                }
            }
        }
    }
}

async fn serve_hixie76(
    conn: &mut WebSocketConnection,
    request: &HttpRequest,
    handler: &mut dyn WebSocketHandler,
    open_args: &[String],
) -> Result<()> {
    if !handler.allow_draft76() {
        log::debug!("draft-76 WebSocket request refused");
        return Ok(());
    }
    if let Err(e) = validate_hixie76(&request.headers) {
        log::debug!("Malformed WebSocket request received: {}", e);
        return Ok(());
    }
    let scheme = if request.protocol == "https" {
        "wss"
    } else {
        "ws"
    };
    let origin = request.headers.get_or("Origin", "").into_owned();
    let initial = build_hixie76_response(&origin, scheme, &request.host, &request.uri);
    conn.stream_mut().write_all(Bytes::from(initial)).await?;

    let challenge = conn.stream_mut().read_bytes(8).await?;
    let key1 = request
        .headers
        .get_or("Sec-Websocket-Key1", "")
        .into_owned();
    let key2 = request
        .headers
        .get_or("Sec-Websocket-Key2", "")
        .into_owned();
    let response = match hixie_challenge_response(&key1, &key2, &challenge) {
        Ok(digest) => digest,
        Err(e) => {
            log::debug!("Malformed key data in WebSocket request: {}", e);
            return Ok(());
        }
    };
    conn.stream_mut()
        .write_all(Bytes::copy_from_slice(&response))
        .await?;

    handler.on_open(conn, open_args).await?;

    loop {
        let frame_type = if conn.server_terminated {
            // We sent our close; give the peer five seconds to answer.
            match timeout(CLOSE_GRACE, conn.stream_mut().read_bytes(1)).await {
                Ok(byte) => byte?[0],
                Err(_) => return Ok(()),
            }
        } else {
            match conn.stream_mut().read_bytes(1).await {
                Ok(byte) => byte[0],
                Err(Error::StreamClosed) => {
                    conn.client_terminated = true;
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        };
        match frame_type {
            0x00 => {
                let data = conn.stream_mut().read_until(&[0xff]).await?;
                let payload = data.slice(0..data.len() - 1);
                let text = String::from_utf8(payload.to_vec())
                    .map_err(|_| Error::protocol("invalid UTF-8 in text message"))?;
                if !conn.client_terminated {
                    handler.on_message(conn, Message::Text(text)).await?;
                }
            }
            0xff => {
                let indicator = conn.stream_mut().read_bytes(1).await?;
                if indicator[0] != 0x00 {
                    return Err(Error::protocol("invalid close frame"));
                }
                conn.client_terminated = true;
                if !conn.server_terminated {
                    conn.stream_mut()
                        .write_all(Bytes::from_static(&[0xff, 0x00]))
                        .await
                        .ok();
                }
                return Ok(());
            }
            _ => return Err(Error::protocol("invalid frame type")),
        }
    }
}
