/*
 * request.rs
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

//! Inbound server-side request: parsed request line, headers, body, and the
//! arguments/files collected from the query string and form bodies.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::httputil::{parse_qs, HeaderStore, HttpFile};

/// An HTTP request as received by the server. Immutable after parsing
/// except for the body and the collected arguments/files.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: HeaderStore,
    pub body: Bytes,
    pub remote_ip: String,
    /// `http` or `https`.
    pub protocol: String,
    pub host: String,
    pub path: String,
    pub query: String,
    pub arguments: HashMap<String, Vec<String>>,
    pub files: HashMap<String, Vec<HttpFile>>,
    start_time: Instant,
    finish_time: Option<Instant>,
}

impl HttpRequest {
    /// Build a request from the parsed request line and headers. When
    /// `xheaders` is set, the effective remote IP and protocol come from
    /// X-Forwarded-For / X-Real-Ip / X-Forwarded-Proto / X-Scheme.
    pub fn new(
        method: String,
        uri: String,
        version: String,
        headers: HeaderStore,
        remote_ip: String,
        secure: bool,
        xheaders: bool,
    ) -> Self {
        let (remote_ip, protocol) = if xheaders {
            let ip = headers.get_or("X-Forwarded-For", &remote_ip).into_owned();
            let ip = headers.get_or("X-Real-Ip", &ip).into_owned();
            let proto_default = if secure { "https" } else { "http" };
            let proto = headers
                .get_or("X-Forwarded-Proto", proto_default)
                .into_owned();
            let proto = headers.get_or("X-Scheme", &proto).into_owned();
            let proto = if proto == "http" || proto == "https" {
                proto
            } else {
                "http".to_string()
            };
            (ip, proto)
        } else {
            let proto = if secure { "https" } else { "http" };
            (remote_ip, proto.to_string())
        };
        let host = headers.get_or("Host", "127.0.0.1").into_owned();
        let (path, query) = match uri.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (uri.clone(), String::new()),
        };
        let arguments = parse_qs(&query, false);
        Self {
            method,
            uri,
            version,
            headers,
            body: Bytes::new(),
            remote_ip,
            protocol,
            host,
            path,
            query,
            arguments,
            files: HashMap::new(),
            start_time: Instant::now(),
            finish_time: None,
        }
    }

    pub fn supports_http_1_1(&self) -> bool {
        self.version == "HTTP/1.1"
    }

    pub fn full_url(&self) -> String {
        format!("{}://{}{}", self.protocol, self.host, self.uri)
    }

    pub fn add_argument(&mut self, name: &str, value: String) {
        self.arguments
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    pub fn add_file(&mut self, name: &str, file: HttpFile) {
        self.files.entry(name.to_string()).or_default().push(file);
    }

    /// Mark request processing complete; freezes `request_time`.
    pub fn set_finished(&mut self) {
        self.finish_time = Some(Instant::now());
    }

    /// Elapsed time since the request line was parsed, or the total handling
    /// time once finished.
    pub fn request_time(&self) -> Duration {
        match self.finish_time {
            Some(end) => end - self.start_time,
            None => self.start_time.elapsed(),
        }
    }

    /// One-line description for request logging.
    pub fn summary(&self) -> String {
        format!("{} {} ({})", self.method, self.uri, self.remote_ip)
    }

    /// Verbose form used when logging uncaught handler errors.
    pub fn dump(&self) -> String {
        let headers: Vec<String> = self
            .headers
            .iter()
            .map(|(n, v)| format!("\"{}\": \"{}\"", n, v))
            .collect();
        format!(
            "HttpRequest(protocol={}, host={}, method={}, uri={}, version={}, remote_ip={}, headers={{{}}})",
            self.protocol,
            self.host,
            self.method,
            self.uri,
            self.version,
            self.remote_ip,
            headers.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_headers() -> HeaderStore {
        HeaderStore::parse("Host: example.com\r\n").unwrap()
    }

    #[test]
    fn splits_path_and_query_arguments() {
        let req = HttpRequest::new(
            "GET".into(),
            "/search?q=rust&q=async&page=2".into(),
            "HTTP/1.1".into(),
            basic_headers(),
            "10.0.0.1".into(),
            false,
            false,
        );
        assert_eq!(req.path, "/search");
        assert_eq!(req.query, "q=rust&q=async&page=2");
        assert_eq!(req.arguments["q"], vec!["rust", "async"]);
        assert_eq!(req.host, "example.com");
        assert_eq!(req.protocol, "http");
        assert!(req.supports_http_1_1());
    }

    #[test]
    fn xheaders_override_ip_and_protocol() {
        let headers =
            HeaderStore::parse("Host: h\r\nX-Real-Ip: 1.2.3.4\r\nX-Scheme: https\r\n").unwrap();
        let req = HttpRequest::new(
            "GET".into(),
            "/".into(),
            "HTTP/1.0".into(),
            headers,
            "127.0.0.1".into(),
            false,
            true,
        );
        assert_eq!(req.remote_ip, "1.2.3.4");
        assert_eq!(req.protocol, "https");
        assert!(!req.supports_http_1_1());
    }

    #[test]
    fn bogus_forwarded_proto_falls_back_to_http() {
        let headers = HeaderStore::parse("X-Forwarded-Proto: gopher\r\n").unwrap();
        let req = HttpRequest::new(
            "GET".into(),
            "/".into(),
            "HTTP/1.1".into(),
            headers,
            "127.0.0.1".into(),
            false,
            true,
        );
        assert_eq!(req.protocol, "http");
    }
}
