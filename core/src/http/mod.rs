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

//! HTTP/1.x server and client.
//!
//! - Server: `HttpServer` accepts streams, a connection state machine parses
//!   the request line, headers, and body, then dispatches to the
//!   application; keep-alive loops back to the next request.
//! - Client: `HttpClient::fetch` resolves the URL, opens a (TLS) stream,
//!   writes the request, parses the response (fixed-length or chunked,
//!   optionally gzip-decoded), and follows redirects.

pub mod client;
pub mod request;
pub mod response;
pub mod server;

pub use client::HttpClient;
pub use request::HttpRequest;
pub use response::{ClientRequest, Response};
pub use server::{HttpServer, ServerHandle};
