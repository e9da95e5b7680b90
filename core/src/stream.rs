/*
 * stream.rs
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

//! Buffered non-blocking byte stream over TCP or TLS.
//!
//! Reads terminate on a delimiter, a byte count, a regex match, or peer
//! close; writes are queued and drained FIFO by `flush`. At most one read is
//! pending at a time (the `&mut self` receivers make a second concurrent
//! read unrepresentable). The read buffer's live region is bounded by
//! `max_buffer_size`; exceeding it closes the stream.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};
use crate::net;

/// Live read-buffer bound; beyond this the stream is closed (100 MiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 100 * 1024 * 1024;
/// Bytes requested from the socket per read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Unified transport: plain TCP, client-side TLS, or server-side TLS.
pub enum Socket {
    Plain(TcpStream),
    ClientTls(Box<ClientTlsStream<TcpStream>>),
    ServerTls(Box<ServerTlsStream<TcpStream>>),
}

impl Socket {
    fn tcp(&self) -> &TcpStream {
        match self {
            Socket::Plain(s) => s,
            Socket::ClientTls(s) => s.get_ref().0,
            Socket::ServerTls(s) => s.get_ref().0,
        }
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Socket::Plain(_))
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            Socket::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Socket::ClientTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Socket::ServerTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            Socket::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Socket::ClientTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Socket::ServerTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Socket::Plain(s) => Pin::new(s).poll_flush(cx),
            Socket::ClientTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Socket::ServerTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Socket::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Socket::ClientTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Socket::ServerTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Locate `needle` in `haystack`; index of the first occurrence.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A buffered stream. Owned by whatever is currently operating on it: the
/// server connection, a client transaction, or a WebSocket connection.
pub struct Stream {
    socket: Socket,
    read_buf: BytesMut,
    max_buffer_size: usize,
    read_chunk_size: usize,
    write_queue: VecDeque<Bytes>,
    close_callback: Option<Box<dyn FnOnce()>>,
    closed: bool,
    eof: bool,
    _count: Option<crate::watcher::CountGuard>,
}

impl Stream {
    pub fn new(socket: Socket) -> Self {
        Self::with_limits(socket, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_READ_CHUNK_SIZE)
    }

    pub fn with_limits(socket: Socket, max_buffer_size: usize, read_chunk_size: usize) -> Self {
        Self {
            socket,
            read_buf: BytesMut::with_capacity(read_chunk_size),
            max_buffer_size,
            read_chunk_size,
            write_queue: VecDeque::new(),
            close_callback: None,
            closed: false,
            eof: false,
            _count: crate::watcher::debug_count(crate::watcher::STREAM_COUNT),
        }
    }

    /// Resolve and connect over plain TCP.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let tcp = TcpStream::connect((host, port)).await?;
        Ok(Self::new(Socket::Plain(tcp)))
    }

    /// Connect and complete a client TLS handshake with the given connector.
    pub async fn connect_tls(host: &str, port: u16, connector: &TlsConnector) -> Result<Self> {
        let tcp = TcpStream::connect((host, port)).await?;
        let name = net::server_name(host)?;
        let tls = connector
            .connect(name, tcp)
            .await
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, e)))?;
        Ok(Self::new(Socket::ClientTls(Box::new(tls))))
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    pub fn is_secure(&self) -> bool {
        self.socket.is_tls()
    }

    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.socket.tcp().peer_addr()
    }

    /// Register the close notification; invoked exactly once when the stream
    /// transitions to closed. If the stream is already closed it fires now.
    pub fn set_close_callback(&mut self, callback: impl FnOnce() + 'static) {
        if self.closed {
            callback();
        } else {
            self.close_callback = Some(Box::new(callback));
        }
    }

    /// Drop a previously registered close callback.
    pub fn clear_close_callback(&mut self) {
        self.close_callback = None;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.write_queue.clear();
            if let Some(callback) = self.close_callback.take() {
                callback();
            }
        }
    }

    /// Close the stream: cancel queued writes, shut the transport down
    /// (sending close_notify on TLS), and fire the close callback once.
    /// Buffered unread bytes are discarded; an `until-close` read must be
    /// issued before closing to collect them.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.write_queue.clear();
        let _ = self.socket.shutdown().await;
        self.mark_closed();
    }

    /// Read until `delimiter` appears; the returned bytes include it. Fails
    /// with `StreamClosed` if the peer closes first.
    pub async fn read_until(&mut self, delimiter: &[u8]) -> Result<Bytes> {
        loop {
            if let Some(pos) = find_subsequence(&self.read_buf, delimiter) {
                let n = pos + delimiter.len();
                return Ok(self.read_buf.split_to(n).freeze());
            }
            if self.fill().await? == 0 {
                self.mark_closed();
                return Err(Error::StreamClosed);
            }
        }
    }

    /// Read until `pattern` matches; the returned bytes run through the end
    /// of the match.
    pub async fn read_until_regex(&mut self, pattern: &regex::bytes::Regex) -> Result<Bytes> {
        loop {
            if let Some(m) = pattern.find(&self.read_buf) {
                let n = m.end();
                return Ok(self.read_buf.split_to(n).freeze());
            }
            if self.fill().await? == 0 {
                self.mark_closed();
                return Err(Error::StreamClosed);
            }
        }
    }

    /// Read exactly `n` bytes. `n == 0` succeeds immediately.
    pub async fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        while self.read_buf.len() < n {
            if self.fill().await? == 0 {
                self.mark_closed();
                return Err(Error::StreamClosed);
            }
        }
        Ok(self.read_buf.split_to(n).freeze())
    }

    /// Read exactly `n` bytes, delivering each chunk to `streaming` as it is
    /// consumed from the socket. The returned final buffer is empty (the
    /// streaming callback has already seen everything). If the stream closes
    /// early the error is returned and no final buffer is produced.
    pub async fn read_bytes_streaming(
        &mut self,
        n: usize,
        mut streaming: impl FnMut(Bytes),
    ) -> Result<Bytes> {
        let mut remaining = n;
        loop {
            if !self.read_buf.is_empty() && remaining > 0 {
                let take = remaining.min(self.read_buf.len());
                remaining -= take;
                streaming(self.read_buf.split_to(take).freeze());
            }
            if remaining == 0 {
                return Ok(Bytes::new());
            }
            if self.fill().await? == 0 {
                self.mark_closed();
                return Err(Error::StreamClosed);
            }
        }
    }

    /// Read everything until the peer closes; returns the residual buffer.
    pub async fn read_until_close(&mut self) -> Result<Bytes> {
        if self.closed {
            return Ok(self.read_buf.split().freeze());
        }
        while self.fill().await? != 0 {}
        self.mark_closed();
        Ok(self.read_buf.split().freeze())
    }

    /// Streaming variant of `read_until_close`; the final result is empty.
    pub async fn read_until_close_streaming(
        &mut self,
        mut streaming: impl FnMut(Bytes),
    ) -> Result<Bytes> {
        loop {
            if !self.read_buf.is_empty() {
                streaming(self.read_buf.split().freeze());
            }
            if self.closed || self.fill().await? == 0 {
                self.mark_closed();
                if !self.read_buf.is_empty() {
                    streaming(self.read_buf.split().freeze());
                }
                return Ok(Bytes::new());
            }
        }
    }

    /// Queue bytes for writing. Empty chunks are ignored. `flush` drains the
    /// queue FIFO.
    pub fn write(&mut self, data: impl Into<Bytes>) -> Result<()> {
        if self.closed {
            return Err(Error::StreamClosed);
        }
        let data = data.into();
        if !data.is_empty() {
            self.write_queue.push_back(data);
        }
        Ok(())
    }

    /// Drain the write queue. Completion of this future is the write
    /// callback: the queue is empty again.
    pub async fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::StreamClosed);
        }
        while let Some(chunk) = self.write_queue.front() {
            let chunk = chunk.clone();
            if let Err(e) = self.socket.write_all(&chunk).await {
                log::warn!("Write error: {}", e);
                self.mark_closed();
                return Err(e.into());
            }
            self.write_queue.pop_front();
        }
        if let Err(e) = self.socket.flush().await {
            self.mark_closed();
            return Err(e.into());
        }
        Ok(())
    }

    /// Queue and immediately drain.
    pub async fn write_all(&mut self, data: impl Into<Bytes>) -> Result<()> {
        self.write(data)?;
        self.flush().await
    }

    /// Pull one chunk from the socket into the read buffer. Returns the byte
    /// count; 0 means the peer closed. The buffer is compacted (live bytes
    /// shifted to the front) before growth, and growth past max_buffer_size
    /// closes the stream.
    async fn fill(&mut self) -> Result<usize> {
        if self.eof || self.closed {
            return Ok(0);
        }
        if self.read_buf.len() + self.read_chunk_size > self.max_buffer_size {
            log::error!("Reached maximum read buffer size");
            self.mark_closed();
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "Reached maximum read buffer size",
            )));
        }
        self.read_buf.reserve(self.read_chunk_size);
        match self.socket.read_buf(&mut self.read_buf).await {
            Ok(0) => {
                self.eof = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                if e.kind() != io::ErrorKind::ConnectionReset {
                    log::warn!("Read error: {}", e);
                }
                self.mark_closed();
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use tokio::net::TcpListener;

    async fn pair() -> (Stream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Stream::new(Socket::Plain(server)), client)
    }

    #[tokio::test]
    async fn read_until_includes_delimiter() {
        let (mut stream, mut peer) = pair().await;
        peer.write_all(b"GET / HTTP/1.0\r\n\r\ntrailing").await.unwrap();
        let data = stream.read_until(b"\r\n\r\n").await.unwrap();
        assert_eq!(&data[..], b"GET / HTTP/1.0\r\n\r\n");
        // Bytes after the delimiter stay buffered.
        let rest = stream.read_bytes(8).await.unwrap();
        assert_eq!(&rest[..], b"trailing");
    }

    #[tokio::test]
    async fn read_until_stops_at_first_occurrence() {
        let (mut stream, mut peer) = pair().await;
        peer.write_all(b"a|b|c").await.unwrap();
        let first = stream.read_until(b"|").await.unwrap();
        assert_eq!(&first[..], b"a|");
        let second = stream.read_until(b"|").await.unwrap();
        assert_eq!(&second[..], b"b|");
    }

    #[tokio::test]
    async fn read_bytes_exact_count() {
        let (mut stream, mut peer) = pair().await;
        peer.write_all(b"0123456789").await.unwrap();
        let data = stream.read_bytes(4).await.unwrap();
        assert_eq!(&data[..], b"0123");
        let zero = stream.read_bytes(0).await.unwrap();
        assert!(zero.is_empty());
        let rest = stream.read_bytes(6).await.unwrap();
        assert_eq!(&rest[..], b"456789");
    }

    #[tokio::test]
    async fn read_bytes_streaming_chunks_sum_to_n() {
        let (mut stream, mut peer) = pair().await;
        tokio::spawn(async move {
            for chunk in [b"abc".as_ref(), b"defg", b"hij"] {
                peer.write_all(chunk).await.unwrap();
                peer.flush().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            }
        });
        let mut collected = Vec::new();
        let fin = stream
            .read_bytes_streaming(10, |chunk| collected.extend_from_slice(&chunk))
            .await
            .unwrap();
        assert!(fin.is_empty());
        assert_eq!(collected, b"abcdefghij");
    }

    #[tokio::test]
    async fn read_bytes_streaming_early_close_reports_error() {
        let (mut stream, mut peer) = pair().await;
        peer.write_all(b"only four").await.unwrap();
        drop(peer);
        let mut collected = Vec::new();
        let result = stream
            .read_bytes_streaming(64, |chunk| collected.extend_from_slice(&chunk))
            .await;
        // The streamed prefix arrived, but the final completion did not.
        assert!(matches!(result, Err(Error::StreamClosed)));
        assert_eq!(collected, b"only four");
    }

    #[tokio::test]
    async fn read_until_regex_returns_through_match() {
        let (mut stream, mut peer) = pair().await;
        peer.write_all(b"header: value\r\nrest").await.unwrap();
        let re = regex::bytes::Regex::new(r"\r\n").unwrap();
        let data = stream.read_until_regex(&re).await.unwrap();
        assert_eq!(&data[..], b"header: value\r\n");
    }

    #[tokio::test]
    async fn read_until_close_returns_residual() {
        let (mut stream, mut peer) = pair().await;
        peer.write_all(b"all of it").await.unwrap();
        drop(peer);
        let data = stream.read_until_close().await.unwrap();
        assert_eq!(&data[..], b"all of it");
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn close_callback_fires_exactly_once() {
        let (mut stream, peer) = pair().await;
        let count = Rc::new(Cell::new(0));
        {
            let count = count.clone();
            stream.set_close_callback(move || count.set(count.get() + 1));
        }
        drop(peer);
        assert!(stream.read_until(b"\n").await.is_err());
        stream.close().await;
        stream.close().await;
        assert_eq!(count.get(), 1);
    }

    #[tokio::test]
    async fn peer_close_surfaces_stream_closed() {
        let (mut stream, mut peer) = pair().await;
        peer.write_all(b"partial").await.unwrap();
        drop(peer);
        match stream.read_until(b"\r\n").await {
            Err(Error::StreamClosed) => {}
            other => panic!("expected StreamClosed, got {:?}", other.map(|b| b.len())),
        }
    }

    #[tokio::test]
    async fn max_buffer_size_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let mut stream = Stream::with_limits(Socket::Plain(server), 64, 16);
        tokio::spawn(async move {
            let blob = vec![b'x'; 256];
            let _ = client.write_all(&blob).await;
            let _ = client.flush().await;
            // Hold the socket open so EOF is not the failure cause.
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        });
        let err = stream.read_until(b"never").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn writes_drain_fifo() {
        let (mut stream, mut peer) = pair().await;
        stream.write(Bytes::from_static(b"one ")).unwrap();
        stream.write(Bytes::from_static(b"two ")).unwrap();
        stream.write(Bytes::from_static(b"three")).unwrap();
        stream.flush().await.unwrap();
        let mut buf = vec![0u8; 13];
        tokio::io::AsyncReadExt::read_exact(&mut peer, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf, b"one two three");
    }
}
