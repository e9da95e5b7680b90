/*
 * client.rs
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

//! WebSocket client: connect to ws:// or wss://, perform the RFC 6455
//! handshake, then read and write messages. Outgoing frames are masked.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::httputil::HeaderStore;
use crate::net;
use crate::stream::Stream;
use crate::websocket::frame::{read_frame, MessageAssembler, Message, OP_CLOSE, OP_PING, OP_PONG};
use crate::websocket::handshake::{
    build_client_request, make_client_key, verify_accept, Dialect,
};
use crate::websocket::WebSocketConnection;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

struct WsUrl {
    host: String,
    port: u16,
    path: String,
    secure: bool,
}

fn parse_ws_url(url: &str) -> Result<WsUrl> {
    let (secure, rest) = if let Some(rest) = url.strip_prefix("wss://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        (false, rest)
    } else {
        return Err(Error::value("URL scheme must be ws or wss"));
    };
    let default_port = if secure { 443 } else { 80 };
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        match bracketed.find(']') {
            Some(end) => {
                let host = &bracketed[..end];
                let after = &bracketed[end + 1..];
                let port = match after.strip_prefix(':') {
                    Some(p) => p.parse().map_err(|_| Error::value("invalid port"))?,
                    None => default_port,
                };
                (host.to_string(), port)
            }
            None => return Err(Error::value("unterminated IPv6 bracket")),
        }
    } else {
        match authority.rfind(':') {
            Some(i) => {
                let port = authority[i + 1..]
                    .parse()
                    .map_err(|_| Error::value("invalid port"))?;
                (authority[..i].to_string(), port)
            }
            None => (authority.to_string(), default_port),
        }
    };
    if host.is_empty() {
        return Err(Error::value("URL has no host"));
    }
    Ok(WsUrl {
        host,
        port,
        path: path.to_string(),
        secure,
    })
}

/// A connected client endpoint: pull messages with `read_message`, send
/// with `write_message`.
pub struct WebSocketClientConnection {
    conn: WebSocketConnection,
    assembler: MessageAssembler,
    closed: bool,
}

impl WebSocketClientConnection {
    pub async fn write_message(&mut self, payload: &[u8], binary: bool) -> Result<()> {
        self.conn.write_message(payload, binary).await
    }

    pub async fn ping(&mut self, payload: &[u8]) -> Result<()> {
        self.conn.ping(payload).await
    }

    /// Start the closing handshake.
    pub async fn close(&mut self) -> Result<()> {
        self.conn.close().await
    }

    /// Tear the stream down without a closing handshake.
    pub async fn abort(&mut self) {
        self.conn.abort().await;
        self.closed = true;
    }

    /// Next complete message; None once the connection has closed. Pings
    /// are answered automatically, pongs are skipped.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        if self.closed {
            return Ok(None);
        }
        loop {
            let frame = match read_frame(self.conn.stream_mut()).await {
                Ok(frame) => frame,
                Err(Error::StreamClosed) => {
                    self.closed = true;
                    return Ok(None);
                }
                Err(e) => {
                    self.conn.abort().await;
                    self.closed = true;
                    return Err(e);
                }
            };
            match frame.opcode {
                OP_CLOSE => {
                    self.closed = true;
                    if !self.conn.server_terminated {
                        self.conn.close().await.ok();
                    }
                    self.conn.abort().await;
                    return Ok(None);
                }
                OP_PING => {
                    let payload = frame.payload.clone();
                    self.conn.write_pong(&payload).await?;
                }
                OP_PONG => {}
                _ => {
                    if let Some(message) = self.assembler.feed(frame)? {
                        return Ok(Some(message));
                    }
                }
            }
        }
    }
}

/// Connect and perform the opening handshake with the default timeout.
pub async fn websocket_connect(url: &str) -> Result<WebSocketClientConnection> {
    websocket_connect_timeout(url, DEFAULT_CONNECT_TIMEOUT).await
}

/// Connect and perform the opening handshake within `connect_timeout`.
pub async fn websocket_connect_timeout(
    url: &str,
    connect_timeout: Duration,
) -> Result<WebSocketClientConnection> {
    timeout(connect_timeout, connect_inner(url))
        .await
        .map_err(|_| Error::timeout("Timeout"))?
}

async fn connect_inner(url: &str) -> Result<WebSocketClientConnection> {
    let parsed = parse_ws_url(url)?;
    let mut stream = if parsed.secure {
        Stream::connect_tls(&parsed.host, parsed.port, net::default_connector()).await?
    } else {
        Stream::connect(&parsed.host, parsed.port).await?
    };

    let key = make_client_key()?;
    let request = build_client_request(&parsed.host, parsed.port, &parsed.path, &key);
    stream.write_all(Bytes::from(request)).await?;

    let head = stream.read_until(b"\r\n\r\n").await?;
    let head_text = std::str::from_utf8(&head)
        .map_err(|_| Error::protocol("invalid handshake response"))?;
    let (first_line, header_text) = head_text
        .split_once("\r\n")
        .unwrap_or((head_text, ""));
    if !first_line.starts_with("HTTP/1.1 101") {
        return Err(Error::protocol(format!(
            "expected 101 Switching Protocols, got: {}",
            first_line
        )));
    }
    let headers = HeaderStore::parse(header_text)?;
    let accept = headers.get("Sec-Websocket-Accept");
    verify_accept(accept.as_deref(), &key)?;

    Ok(WebSocketClientConnection {
        conn: WebSocketConnection::new(stream, Dialect::Rfc6455, true),
        assembler: MessageAssembler::new(),
        closed: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_url() {
        let parsed = parse_ws_url("ws://example.com/chat").unwrap();
        assert!(!parsed.secure);
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, 80);
        assert_eq!(parsed.path, "/chat");
    }

    #[test]
    fn parses_secure_url_with_port() {
        let parsed = parse_ws_url("wss://example.com:9443/x/y").unwrap();
        assert!(parsed.secure);
        assert_eq!(parsed.port, 9443);
        assert_eq!(parsed.path, "/x/y");
    }

    #[test]
    fn parses_ipv6_literal() {
        let parsed = parse_ws_url("ws://[::1]:8080/echo").unwrap();
        assert_eq!(parsed.host, "::1");
        assert_eq!(parsed.port, 8080);
    }

    #[test]
    fn rejects_http_scheme() {
        assert!(parse_ws_url("http://example.com/").is_err());
    }
}
