/*
 * acceptor.rs
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

//! TCP listener: accepts connections one at a time and hands each off as a
//! Stream (TLS-wrapped when a server config is present) plus peer address.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_rustls::rustls::server::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};
use crate::stream::{Socket, Stream};

pub struct Acceptor {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    stopped: Arc<Notify>,
}

impl Acceptor {
    /// Bind to `address:port`. Port 0 picks an ephemeral port; read it back
    /// with `local_addr`.
    pub async fn bind(address: &str, port: u16, ssl: Option<Arc<ServerConfig>>) -> Result<Self> {
        let listener = TcpListener::bind((address, port)).await?;
        Ok(Self {
            listener,
            tls: ssl.map(TlsAcceptor::from),
            stopped: Arc::new(Notify::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle that unblocks a pending `accept` with `StreamClosed`.
    pub fn stop_handle(&self) -> AcceptorStop {
        AcceptorStop {
            stopped: self.stopped.clone(),
        }
    }

    /// Accept the next connection. On TLS endpoints the handshake completes
    /// before the stream is returned; a handshake failure is reported as an
    /// error but leaves the acceptor usable.
    pub async fn accept(&self) -> Result<(Stream, SocketAddr)> {
        let (tcp, peer) = tokio::select! {
            accepted = self.listener.accept() => accepted?,
            _ = self.stopped.notified() => return Err(Error::StreamClosed),
        };
        let socket = match &self.tls {
            Some(acceptor) => {
                let tls = acceptor
                    .accept(tcp)
                    .await
                    .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
                Socket::ServerTls(Box::new(tls))
            }
            None => Socket::Plain(tcp),
        };
        Ok((Stream::new(socket), peer))
    }
}

/// Cancels the accept loop; dropping the Acceptor afterwards closes the
/// listening socket.
#[derive(Clone)]
pub struct AcceptorStop {
    stopped: Arc<Notify>,
}

impl AcceptorStop {
    pub fn stop(&self) {
        self.stopped.notify_waiters();
        self.stopped.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn accepts_plain_connection() {
        let acceptor = Acceptor::bind("127.0.0.1", 0, None).await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut c = TcpStream::connect(addr).await.unwrap();
            c.write_all(b"ping").await.unwrap();
        });
        let (mut stream, peer) = acceptor.accept().await.unwrap();
        assert_eq!(peer.ip(), addr.ip());
        let data = stream.read_bytes(4).await.unwrap();
        assert_eq!(&data[..], b"ping");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn stop_unblocks_pending_accept() {
        let acceptor = Acceptor::bind("127.0.0.1", 0, None).await.unwrap();
        let stop = acceptor.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            stop.stop();
        });
        assert!(acceptor.accept().await.is_err());
    }
}
