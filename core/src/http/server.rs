/*
 * server.rs
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

//! HTTP server: accept loop plus the per-connection state machine (request
//! line, headers, optional body, dispatch, keep-alive).

use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use tokio_rustls::rustls::server::ServerConfig;

use crate::acceptor::{Acceptor, AcceptorStop};
use crate::error::{Error, Result};
use crate::http::request::HttpRequest;
use crate::httputil::parse_body_arguments;
use crate::stream::Stream;
use crate::web::{Application, Served};

/// Accepts connections for an Application. Configure with the builder
/// methods, then `listen`.
pub struct HttpServer {
    app: Rc<Application>,
    no_keep_alive: bool,
    xheaders: bool,
    ssl: Option<Arc<ServerConfig>>,
}

/// Running server: the bound address and a stop handle.
pub struct ServerHandle {
    pub local_addr: SocketAddr,
    stop: AcceptorStop,
}

impl ServerHandle {
    /// Close the listener and cancel the pending accept. Established
    /// connections run to completion.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl HttpServer {
    pub fn new(app: Rc<Application>) -> Self {
        Self {
            app,
            no_keep_alive: false,
            xheaders: false,
            ssl: None,
        }
    }

    /// Force-close every connection after one response.
    pub fn no_keep_alive(mut self, value: bool) -> Self {
        self.no_keep_alive = value;
        self
    }

    /// Trust X-Forwarded-For / X-Forwarded-Proto style headers.
    pub fn xheaders(mut self, value: bool) -> Self {
        self.xheaders = value;
        self
    }

    /// Serve TLS with the given server configuration.
    pub fn ssl(mut self, config: Arc<ServerConfig>) -> Self {
        self.ssl = Some(config);
        self
    }

    /// Bind and start accepting. Must be awaited on the reactor; the accept
    /// loop and each connection run as local tasks.
    pub async fn listen(&self, address: &str, port: u16) -> Result<ServerHandle> {
        let acceptor = Acceptor::bind(address, port, self.ssl.clone()).await?;
        let local_addr = acceptor.local_addr()?;
        let stop = acceptor.stop_handle();
        let app = self.app.clone();
        let no_keep_alive = self.no_keep_alive;
        let xheaders = self.xheaders;
        tokio::task::spawn_local(async move {
            accept_loop(acceptor, app, no_keep_alive, xheaders).await;
        });
        Ok(ServerHandle { local_addr, stop })
    }
}

async fn accept_loop(acceptor: Acceptor, app: Rc<Application>, no_keep_alive: bool, xheaders: bool) {
    loop {
        match acceptor.accept().await {
            Ok((stream, peer)) => {
                let app = app.clone();
                tokio::task::spawn_local(async move {
                    let conn = HttpConnection::new(stream, peer, no_keep_alive, xheaders);
                    if let Err(e) = conn.run(app).await {
                        log::error!("Error in connection callback: {}", e);
                    }
                });
            }
            Err(Error::StreamClosed) => break,
            Err(e) => {
                // TLS handshake failures land here; keep accepting.
                log::error!("Error in connection callback: {}", e);
            }
        }
    }
}

/// One accepted stream. Serves requests sequentially until keep-alive ends,
/// the peer disconnects, or a WebSocket handler detaches the stream.
pub struct HttpConnection {
    stream: Option<Stream>,
    address: SocketAddr,
    no_keep_alive: bool,
    xheaders: bool,
    _count: Option<crate::watcher::CountGuard>,
}

impl HttpConnection {
    pub fn new(stream: Stream, address: SocketAddr, no_keep_alive: bool, xheaders: bool) -> Self {
        Self {
            stream: Some(stream),
            address,
            no_keep_alive,
            xheaders,
            _count: crate::watcher::debug_count(crate::watcher::HTTP_CONNECTION_COUNT),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn stream_mut(&mut self) -> &mut Stream {
        self.stream
            .as_mut()
            .expect("stream detached from connection")
    }

    /// Hand the stream to a protocol that takes over the socket (WebSocket
    /// upgrade). The connection is finished afterwards.
    pub(crate) fn take_stream(&mut self) -> Stream {
        self.stream
            .take()
            .expect("stream already detached from connection")
    }

    /// Write one response fragment and wait for the write queue to drain.
    pub async fn write_chunk(&mut self, data: Bytes) -> Result<()> {
        let stream = self.stream_mut();
        stream.write(data)?;
        stream.flush().await
    }

    pub(crate) async fn run(mut self, app: Rc<Application>) -> Result<()> {
        loop {
            let head = match self.stream_mut().read_until(b"\r\n\r\n").await {
                Ok(head) => head,
                Err(Error::StreamClosed) => return Ok(()),
                Err(e) => return Err(e),
            };
            let request = match self.read_request(&head).await {
                Ok(request) => request,
                Err(Error::StreamClosed) => return Ok(()),
                Err(e) => {
                    log::info!("Malformed HTTP request from {}: {}", self.address, e);
                    self.stream_mut().close().await;
                    return Ok(());
                }
            };
            let disconnect = self.decide_disconnect(&request);
            match app.clone().dispatch(&mut self, request).await? {
                Served::Detached => return Ok(()),
                Served::Completed => {}
            }
            if self.stream.as_ref().map(|s| s.is_closed()).unwrap_or(true) {
                return Ok(());
            }
            if disconnect {
                self.stream_mut().close().await;
                return Ok(());
            }
        }
    }

    /// Parse the request line and headers from `head`, then read and decode
    /// the body if Content-Length says there is one.
    async fn read_request(&mut self, head: &[u8]) -> Result<HttpRequest> {
        let head = std::str::from_utf8(head)
            .map_err(|_| Error::bad_request("Malformed HTTP request line"))?;
        let (start_line, rest) = match head.split_once("\r\n") {
            Some((line, rest)) => (line, rest),
            None => (head, ""),
        };
        let parts: Vec<&str> = start_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(Error::bad_request("Malformed HTTP request line"));
        }
        let (method, uri, version) = (parts[0], parts[1], parts[2]);
        if !version.starts_with("HTTP/") {
            return Err(Error::bad_request(
                "Malformed HTTP version in HTTP Request-Line",
            ));
        }
        let headers = crate::httputil::HeaderStore::parse(rest)
            .map_err(|e| Error::bad_request(e.to_string()))?;
        let mut request = HttpRequest::new(
            method.to_string(),
            uri.to_string(),
            version.to_string(),
            headers,
            self.address.ip().to_string(),
            self.stream.as_ref().map(|s| s.is_secure()).unwrap_or(false),
            self.xheaders,
        );

        if let Some(value) = request.headers.get("Content-Length") {
            let content_length: usize = value
                .trim()
                .parse()
                .map_err(|_| Error::bad_request("Malformed Content-Length"))?;
            if content_length > self.stream_mut().max_buffer_size() {
                return Err(Error::bad_request("Content-Length too long"));
            }
            if request.headers.get_or("Expect", "") == "100-continue" {
                self.stream_mut()
                    .write_all(Bytes::from_static(b"HTTP/1.1 100 (Continue)\r\n\r\n"))
                    .await?;
            }
            request.body = self.stream_mut().read_bytes(content_length).await?;
            if request.method == "POST" || request.method == "PUT" {
                let content_type = request.headers.get_or("Content-Type", "").into_owned();
                let body = request.body.clone();
                parse_body_arguments(
                    &content_type,
                    &body,
                    &mut request.arguments,
                    &mut request.files,
                );
            }
        }
        Ok(request)
    }

    /// Keep-alive decision, made from the request before dispatch:
    /// HTTP/1.1 stays open unless `Connection: close`; HTTP/1.0 stays open
    /// only for framed requests (Content-Length, HEAD, or GET) that ask for
    /// `Connection: Keep-Alive`.
    fn decide_disconnect(&self, request: &HttpRequest) -> bool {
        if self.no_keep_alive {
            return true;
        }
        let connection = request.headers.get_or("Connection", "");
        if request.supports_http_1_1() {
            connection == "close"
        } else if request.headers.has("Content-Length")
            || request.method == "HEAD"
            || request.method == "GET"
        {
            connection != "Keep-Alive"
        } else {
            true
        }
    }
}
