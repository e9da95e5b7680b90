/*
 * error.rs
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

//! Error types shared across the reactor, stream, server, and client layers.

use std::fmt;
use std::io;

use crate::httputil::response_reason;

/// Errors from reactor, stream, or protocol operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed request line, oversized Content-Length, invalid headers.
    BadRequest(String),
    /// Operation attempted on (or interrupted by) a closed stream.
    StreamClosed,
    /// Connect or request deadline elapsed.
    Timeout(String),
    /// WebSocket framing or handshake violation.
    Protocol(String),
    /// Application-level HTTP failure; rendered as a response by the server,
    /// rethrown from Response on the client.
    Http(HttpError),
    /// Bad header value, bad cookie, unsafe content.
    Value(String),
    /// Declared but unsupported option (proxy, network interface).
    NotImplemented(&'static str),
    /// Socket-level failure.
    Io(io::Error),
    /// Sentinel that breaks the reactor loop instead of being logged.
    SystemExit,
}

impl Error {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::BadRequest(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn value(msg: impl Into<String>) -> Self {
        Error::Value(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadRequest(m) => write!(f, "bad request: {}", m),
            Error::StreamClosed => write!(f, "stream is closed"),
            Error::Timeout(m) => write!(f, "timeout: {}", m),
            Error::Protocol(m) => write!(f, "protocol error: {}", m),
            Error::Http(e) => write!(f, "{}", e),
            Error::Value(m) => write!(f, "{}", m),
            Error::NotImplemented(m) => write!(f, "{} not supported", m),
            Error::Io(e) => write!(f, "{}", e),
            Error::SystemExit => write!(f, "system exit"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => Error::StreamClosed,
            _ => Error::Io(e),
        }
    }
}

impl From<HttpError> for Error {
    fn from(e: HttpError) -> Self {
        Error::Http(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// HTTP failure signalled by application code. The server renders the
/// canonical reason phrase for `code` unless a custom reason is supplied.
#[derive(Debug, Clone)]
pub struct HttpError {
    pub code: u16,
    pub reason: Option<String>,
    pub log_message: Option<String>,
}

impl HttpError {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            reason: None,
            log_message: None,
        }
    }

    pub fn with_message(code: u16, log_message: impl Into<String>) -> Self {
        Self {
            code,
            reason: None,
            log_message: Some(log_message.into()),
        }
    }

    pub fn reason(&self) -> &str {
        if let Some(reason) = &self.reason {
            reason
        } else {
            response_reason(self.code).unwrap_or("Unknown")
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}: {}", self.code, self.reason())?;
        if let Some(msg) = &self.log_message {
            write!(f, " ({})", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpError {}
