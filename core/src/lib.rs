/*
 * lib.rs
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

//! Squall: an asynchronous HTTP/1.1 and WebSocket server and client.
//!
//! A single-threaded reactor multiplexes buffered TCP/TLS streams and
//! carries an HTTP server (routed applications, output transforms), an
//! HTTP client (redirects, gzip, timeouts), and WebSocket support for both
//! the RFC 6455 and legacy hixie-76 dialects.

pub mod acceptor;
pub mod error;
pub mod http;
pub mod httputil;
pub mod net;
pub mod reactor;
pub mod stack_context;
pub mod stream;
pub mod testing;
pub mod watcher;
pub mod web;
pub mod websocket;

pub use error::{Error, HttpError, Result};
pub use http::{ClientRequest, HttpClient, HttpRequest, HttpServer, Response};
pub use httputil::{HeaderStore, HttpFile};
pub use reactor::{PeriodicCallback, Reactor};
pub use stream::Stream;
pub use web::{
    Application, ErrorHandler, Handler, RedirectHandler, RequestContext, Settings, UrlSpec,
};
pub use websocket::{websocket_connect, Message, WebSocketConnection, WebSocketHandler};
