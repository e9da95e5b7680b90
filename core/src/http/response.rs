/*
 * response.rs
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

//! Client-side request options and the fetched response.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{Error, HttpError, Result};
use crate::httputil::HeaderStore;

/// Per-chunk delivery for streaming fetches.
pub type StreamingCallback = Box<dyn FnMut(Bytes)>;
/// Per-line delivery of the status line, each header line, and the blank
/// terminator.
pub type HeaderCallback = Box<dyn FnMut(&str)>;

/// Everything `fetch` needs to know about one request. All fields are
/// public; the builder methods exist for call-site brevity.
pub struct ClientRequest {
    pub url: String,
    pub method: String,
    pub headers: HeaderStore,
    pub body: Option<Bytes>,
    pub auth_username: Option<String>,
    pub auth_password: String,
    /// Only "basic" is implemented.
    pub auth_mode: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub user_agent: Option<String>,
    pub use_gzip: bool,
    pub network_interface: Option<String>,
    pub streaming_callback: Option<StreamingCallback>,
    pub header_callback: Option<HeaderCallback>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub allow_nonstandard_methods: bool,
    pub validate_cert: bool,
    pub ca_certs: Option<String>,
}

impl ClientRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: HeaderStore::new(),
            body: None,
            auth_username: None,
            auth_password: String::new(),
            auth_mode: None,
            connect_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(20),
            if_modified_since: None,
            follow_redirects: true,
            max_redirects: 5,
            user_agent: None,
            use_gzip: true,
            network_interface: None,
            streaming_callback: None,
            header_callback: None,
            proxy_host: None,
            proxy_port: None,
            proxy_username: None,
            proxy_password: None,
            allow_nonstandard_methods: false,
            validate_cert: true,
            ca_certs: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let mut request = Self::new(url);
        request.method = "POST".to_string();
        request.body = Some(body.into());
        request
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth_username = Some(username.into());
        self.auth_password = password.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn if_modified_since(mut self, when: DateTime<Utc>) -> Self {
        self.if_modified_since = Some(when);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn use_gzip(mut self, use_gzip: bool) -> Self {
        self.use_gzip = use_gzip;
        self
    }

    pub fn streaming_callback(mut self, callback: impl FnMut(Bytes) + 'static) -> Self {
        self.streaming_callback = Some(Box::new(callback));
        self
    }

    pub fn header_callback(mut self, callback: impl FnMut(&str) + 'static) -> Self {
        self.header_callback = Some(Box::new(callback));
        self
    }

    pub fn allow_nonstandard_methods(mut self, allow: bool) -> Self {
        self.allow_nonstandard_methods = allow;
        self
    }

    pub fn validate_cert(mut self, validate: bool) -> Self {
        self.validate_cert = validate;
        self
    }

    pub fn ca_certs(mut self, path: impl Into<String>) -> Self {
        self.ca_certs = Some(path.into());
        self
    }

    /// Copy of the request without its callbacks, kept in the Response as
    /// the caller's record of what was originally asked for.
    pub fn snapshot(&self) -> ClientRequest {
        ClientRequest {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            auth_username: self.auth_username.clone(),
            auth_password: self.auth_password.clone(),
            auth_mode: self.auth_mode.clone(),
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            if_modified_since: self.if_modified_since,
            follow_redirects: self.follow_redirects,
            max_redirects: self.max_redirects,
            user_agent: self.user_agent.clone(),
            use_gzip: self.use_gzip,
            network_interface: self.network_interface.clone(),
            streaming_callback: None,
            header_callback: None,
            proxy_host: self.proxy_host.clone(),
            proxy_port: self.proxy_port,
            proxy_username: self.proxy_username.clone(),
            proxy_password: self.proxy_password.clone(),
            allow_nonstandard_methods: self.allow_nonstandard_methods,
            validate_cert: self.validate_cert,
            ca_certs: self.ca_certs.clone(),
        }
    }
}

/// The outcome of a fetch. `error` is synthesised from the status code when
/// the code is outside [200, 300) and no transport error occurred first.
pub struct Response {
    /// The originating request (without callbacks).
    pub request: ClientRequest,
    pub code: u16,
    pub headers: HeaderStore,
    pub body: Option<Bytes>,
    /// URL after any redirects were followed.
    pub effective_url: String,
    pub error: Option<String>,
    pub request_time: Duration,
}

impl Response {
    pub fn new(
        request: ClientRequest,
        code: u16,
        headers: HeaderStore,
        body: Option<Bytes>,
        effective_url: String,
        error: Option<String>,
        request_time: Duration,
    ) -> Self {
        let error = error.or_else(|| {
            if (200..300).contains(&code) {
                None
            } else {
                Some(
                    HttpError::new(code).to_string(),
                )
            }
        });
        Self {
            request,
            code,
            headers,
            body,
            effective_url,
            error,
            request_time,
        }
    }

    /// Body bytes, empty when absent.
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or(&[])
    }

    /// Surface the stored error as a Result.
    pub fn rethrow(&self) -> Result<()> {
        match &self.error {
            Some(message) => Err(Error::Http(HttpError {
                code: self.code,
                reason: None,
                log_message: Some(message.clone()),
            })),
            None => Ok(()),
        }
    }
}
