/*
 * mod.rs
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

//! WebSocket protocol, both dialects: RFC 6455 (Sec-WebSocket-Key +
//! SHA-1 accept, masked binary frames) and the legacy hixie-76 draft
//! (MD5 challenge keys, sentinel-delimited text frames).

pub mod client;
pub mod connection;
pub mod frame;
pub mod handshake;

pub use client::{websocket_connect, websocket_connect_timeout, WebSocketClientConnection};
pub use connection::WebSocketConnection;
pub use frame::Message;
pub use handshake::Dialect;

pub(crate) use connection::run_server;

use async_trait::async_trait;

use crate::error::Result;

/// Application WebSocket endpoint. The connection drives these callbacks
/// from its framing loop; send through the `WebSocketConnection`.
#[async_trait(?Send)]
pub trait WebSocketHandler {
    /// The handshake completed; path arguments come from the route's
    /// capture groups.
    async fn on_open(
        &mut self,
        _conn: &mut WebSocketConnection,
        _args: &[String],
    ) -> Result<()> {
        Ok(())
    }

    /// A complete message arrived.
    async fn on_message(
        &mut self,
        conn: &mut WebSocketConnection,
        message: Message,
    ) -> Result<()>;

    /// A pong answered one of our pings.
    fn on_pong(&mut self, _data: &[u8]) {}

    /// The connection is gone (close handshake or peer disconnect).
    fn on_close(&mut self) {}

    /// Choose among the subprotocols the client offered; None selects none.
    fn select_subprotocol(&self, _offered: &[&str]) -> Option<String> {
        None
    }

    /// Whether legacy hixie-76 clients are accepted.
    fn allow_draft76(&self) -> bool {
        true
    }
}
