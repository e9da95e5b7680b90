/*
 * handler.rs
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

//! Per-request lifecycle: status and headers, the buffered response body,
//! etags, cookies, redirects, flush/finish through the transform pipeline,
//! and the error surface that turns handler failures into HTTP responses.

use std::rc::Rc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha1::{Digest, Sha1};

use crate::error::{Error, HttpError, Result};
use crate::http::request::HttpRequest;
use crate::http::server::HttpConnection;
use crate::httputil::{format_http_date, response_reason, HeaderStore};
use crate::web::transform::OutputTransform;
use crate::web::{Application, SERVER_VERSION};

const SUPPORTED_METHODS: [&str; 7] =
    ["GET", "HEAD", "POST", "DELETE", "PUT", "OPTIONS", "PATCH"];

/// Request handler implemented by application code. Method handlers default
/// to 405; `write_error` renders the default error page.
#[async_trait(?Send)]
pub trait Handler {
    /// Runs before `prepare`, with the context already constructed.
    fn initialize(&mut self, _ctx: &mut RequestContext<'_>) {}

    /// Runs before the method handler. Finishing here skips the method
    /// handler entirely.
    async fn prepare(&mut self, _ctx: &mut RequestContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn head(&mut self, _ctx: &mut RequestContext<'_>, _args: Vec<String>) -> Result<()> {
        Err(Error::Http(HttpError::new(405)))
    }

    async fn get(&mut self, _ctx: &mut RequestContext<'_>, _args: Vec<String>) -> Result<()> {
        Err(Error::Http(HttpError::new(405)))
    }

    async fn post(&mut self, _ctx: &mut RequestContext<'_>, _args: Vec<String>) -> Result<()> {
        Err(Error::Http(HttpError::new(405)))
    }

    async fn delete(&mut self, _ctx: &mut RequestContext<'_>, _args: Vec<String>) -> Result<()> {
        Err(Error::Http(HttpError::new(405)))
    }

    async fn put(&mut self, _ctx: &mut RequestContext<'_>, _args: Vec<String>) -> Result<()> {
        Err(Error::Http(HttpError::new(405)))
    }

    async fn options(&mut self, _ctx: &mut RequestContext<'_>, _args: Vec<String>) -> Result<()> {
        Err(Error::Http(HttpError::new(405)))
    }

    async fn patch(&mut self, _ctx: &mut RequestContext<'_>, _args: Vec<String>) -> Result<()> {
        Err(Error::Http(HttpError::new(405)))
    }

    /// The client went away while the response was being produced.
    fn on_connection_close(&mut self) {}

    /// Render an error response; the context has already been cleared and
    /// the status set.
    async fn write_error(
        &mut self,
        ctx: &mut RequestContext<'_>,
        code: u16,
        _error: Option<&Error>,
    ) -> Result<()> {
        ctx.finish_with(default_error_body(code).into_bytes()).await
    }
}

pub(crate) fn default_error_body(code: u16) -> String {
    let message = response_reason(code).unwrap_or("Unknown");
    format!(
        "<html><title>{code}: {message}</title><body>{code}: {message}</body></html>",
        code = code,
        message = message
    )
}

/// Cookie attributes for `set_cookie`.
#[derive(Default, Clone)]
pub struct CookieOptions {
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    /// Resolved against UTC now when `expires` is not given.
    pub expires_days: Option<i64>,
}

/// Concrete per-request state. Handlers receive `&mut RequestContext` and
/// drive the response through it; the context borrows the connection for
/// the duration of one request.
pub struct RequestContext<'a> {
    conn: &'a mut HttpConnection,
    pub request: HttpRequest,
    app: Rc<Application>,
    status_code: u16,
    reason: Option<String>,
    headers: HeaderStore,
    write_buffer: BytesMut,
    headers_written: bool,
    finished: bool,
    auto_finish: bool,
    transforms: Vec<Box<dyn OutputTransform>>,
    new_cookies: Vec<String>,
    _count: Option<crate::watcher::CountGuard>,
}

impl<'a> RequestContext<'a> {
    pub(crate) fn new(
        conn: &'a mut HttpConnection,
        request: HttpRequest,
        app: Rc<Application>,
        transforms: Vec<Box<dyn OutputTransform>>,
    ) -> Self {
        let mut ctx = Self {
            conn,
            request,
            app,
            status_code: 200,
            reason: None,
            headers: HeaderStore::new(),
            write_buffer: BytesMut::new(),
            headers_written: false,
            finished: false,
            auto_finish: true,
            transforms,
            new_cookies: Vec::new(),
            _count: crate::watcher::debug_count(crate::watcher::REQUEST_CONTEXT_COUNT),
        };
        ctx.clear();
        ctx
    }

    /// Reset status, headers, and buffered output to their defaults.
    pub fn clear(&mut self) {
        self.headers = HeaderStore::new();
        self.headers.set("Server", SERVER_VERSION);
        self.headers.set("Content-Type", "text/html; charset=UTF-8");
        if !self.request.supports_http_1_1()
            && self.request.headers.get_or("Connection", "") == "Keep-Alive"
        {
            self.headers.set("Connection", "Keep-Alive");
        }
        self.write_buffer.clear();
        self.status_code = 200;
        self.reason = None;
    }

    pub fn application(&self) -> &Rc<Application> {
        &self.app
    }

    pub fn status(&self) -> u16 {
        self.status_code
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Leave the response open after the method handler returns; the
    /// handler must call `finish` itself later.
    pub fn set_auto_finish(&mut self, auto_finish: bool) {
        self.auto_finish = auto_finish;
    }

    pub(crate) fn auto_finish(&self) -> bool {
        self.auto_finish
    }

    /// Set the response status. The code must be in the standard response
    /// table; use `set_status_reason` for non-standard codes.
    pub fn set_status(&mut self, code: u16) -> Result<()> {
        if response_reason(code).is_none() {
            return Err(Error::value(format!("unknown status code {}", code)));
        }
        self.status_code = code;
        self.reason = None;
        Ok(())
    }

    /// Set a status with an explicit reason phrase.
    pub fn set_status_reason(&mut self, code: u16, reason: impl Into<String>) {
        self.status_code = code;
        self.reason = Some(reason.into());
    }

    pub(crate) fn set_status_force(&mut self, code: u16) {
        self.status_code = code;
        self.reason = None;
    }

    fn check_header_value(value: &str) -> Result<()> {
        if value.len() > 4000 {
            return Err(Error::value(format!("Unsafe header value {:?}", value)));
        }
        if value.bytes().any(|b| b < 0x20 || b == 0x7f) {
            return Err(Error::value(format!("Unsafe header value {:?}", value)));
        }
        Ok(())
    }

    /// Set an outgoing header, replacing previous values. Values are capped
    /// at 4000 bytes and must not contain control characters.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        Self::check_header_value(value)?;
        self.headers.set(name, value);
        Ok(())
    }

    /// Append an outgoing header value.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<()> {
        Self::check_header_value(value)?;
        self.headers.add(name, value);
        Ok(())
    }

    /// Set a header to an RFC 1123 UTC timestamp.
    pub fn set_header_date(&mut self, name: &str, value: DateTime<Utc>) -> Result<()> {
        self.set_header(name, &format_http_date(value))
    }

    pub fn clear_header(&mut self, name: &str) {
        self.headers.remove(name);
    }

    fn scrub_argument(value: &str, strip: bool) -> String {
        let cleaned: String = value
            .chars()
            .map(|c| match c {
                '\x00'..='\x08' | '\x0e'..='\x1f' => ' ',
                other => other,
            })
            .collect();
        if strip {
            cleaned.trim().to_string()
        } else {
            cleaned
        }
    }

    /// The last value for `name` from the union of query and body
    /// arguments, whitespace-stripped. Missing argument is a 400.
    pub fn get_argument(&self, name: &str) -> Result<String> {
        self.get_argument_strip(name, true)
    }

    /// `get_argument` with explicit control over whitespace stripping.
    pub fn get_argument_strip(&self, name: &str, strip: bool) -> Result<String> {
        match self.request.arguments.get(name).and_then(|v| v.last()) {
            Some(value) => Ok(Self::scrub_argument(value, strip)),
            None => Err(Error::Http(HttpError::with_message(
                400,
                format!("Missing argument {}", name),
            ))),
        }
    }

    /// Like `get_argument` but with a fallback instead of a 400.
    pub fn get_argument_or(&self, name: &str, default: &str) -> String {
        self.get_argument_or_strip(name, default, true)
    }

    /// `get_argument_or` with explicit control over whitespace stripping.
    pub fn get_argument_or_strip(&self, name: &str, default: &str, strip: bool) -> String {
        match self.request.arguments.get(name).and_then(|v| v.last()) {
            Some(value) => Self::scrub_argument(value, strip),
            None => default.to_string(),
        }
    }

    /// All values for `name`, scrubbed of control characters and
    /// whitespace-stripped.
    pub fn get_arguments(&self, name: &str) -> Vec<String> {
        self.get_arguments_strip(name, true)
    }

    /// `get_arguments` with explicit control over whitespace stripping.
    pub fn get_arguments_strip(&self, name: &str, strip: bool) -> Vec<String> {
        self.request
            .arguments
            .get(name)
            .map(|values| {
                values
                    .iter()
                    .map(|v| Self::scrub_argument(v, strip))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Value of a request cookie.
    pub fn get_cookie(&self, name: &str) -> Option<String> {
        let header = self.request.headers.get("Cookie")?;
        for piece in header.split(';') {
            let piece = piece.trim();
            if let Some((k, v)) = piece.split_once('=') {
                if k == name {
                    return Some(v.to_string());
                }
            }
        }
        None
    }

    pub fn get_cookie_or(&self, name: &str, default: &str) -> String {
        self.get_cookie(name).unwrap_or_else(|| default.to_string())
    }

    /// Queue a Set-Cookie header. Name and value must be free of control
    /// characters and spaces.
    pub fn set_cookie(&mut self, name: &str, value: &str, options: CookieOptions) -> Result<()> {
        let combined = format!("{}{}", name, value);
        if combined.bytes().any(|b| b <= 0x20) {
            return Err(Error::value(format!("Invalid cookie {}: {}", name, value)));
        }
        let mut cookie = format!("{}={}", name, value);
        let expires = options.expires.or_else(|| {
            options
                .expires_days
                .map(|days| Utc::now() + ChronoDuration::days(days))
        });
        if let Some(when) = expires {
            cookie.push_str("; expires=");
            cookie.push_str(&format_http_date(when));
        }
        if let Some(domain) = &options.domain {
            cookie.push_str("; domain=");
            cookie.push_str(domain);
        }
        if let Some(path) = &options.path {
            cookie.push_str("; path=");
            cookie.push_str(path);
        }
        self.new_cookies.push(cookie);
        Ok(())
    }

    /// Expire a cookie on the client.
    pub fn clear_cookie(&mut self, name: &str) -> Result<()> {
        let past = Utc::now() - ChronoDuration::days(365);
        self.set_cookie(
            name,
            "",
            CookieOptions {
                expires: Some(past),
                path: Some("/".to_string()),
                ..Default::default()
            },
        )
    }

    /// Append a chunk to the response body. Forbidden once finished.
    pub fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if self.finished {
            return Err(Error::value("Cannot write() after finish()"));
        }
        self.write_buffer.extend_from_slice(chunk);
        Ok(())
    }

    /// Serialise a JSON value into the body and set the JSON content type.
    pub fn write_json(&mut self, value: &serde_json::Value) -> Result<()> {
        self.set_header("Content-Type", "application/json; charset=UTF-8")?;
        let text = serde_json::to_string(value)
            .map_err(|e| Error::value(format!("JSON encode failed: {}", e)))?;
        self.write(text.as_bytes())
    }

    /// Send a 301/302 to `url` (scrubbed of control characters) and finish.
    pub async fn redirect(&mut self, url: &str, permanent: bool) -> Result<()> {
        if self.headers_written {
            return Err(Error::value(
                "Cannot redirect after headers have been written",
            ));
        }
        self.set_status(if permanent { 301 } else { 302 })?;
        let scrubbed: String = url.chars().filter(|c| *c > '\x20').collect();
        let location = resolve_location(&self.request.uri, &scrubbed);
        self.set_header("Location", &location)?;
        self.finish().await
    }

    fn generate_headers(&self) -> Bytes {
        let reason = self
            .reason
            .clone()
            .or_else(|| response_reason(self.status_code).map(str::to_string))
            .unwrap_or_else(|| "Unknown".to_string());
        let mut out = BytesMut::new();
        out.extend_from_slice(
            format!("{} {} {}\r\n", self.request.version, self.status_code, reason).as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        for cookie in &self.new_cookies {
            out.extend_from_slice(format!("Set-Cookie: {}\r\n", cookie).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.freeze()
    }

    /// Emit buffered output. The first flush writes the status line and
    /// headers after running `transform_first_chunk`; later flushes run
    /// `transform_chunk` only. HEAD responses carry headers, never a body.
    pub async fn flush(&mut self, include_footers: bool) -> Result<()> {
        let mut chunk = std::mem::take(&mut self.write_buffer);
        let header_bytes = if !self.headers_written {
            self.headers_written = true;
            let mut headers = std::mem::take(&mut self.headers);
            for transform in &mut self.transforms {
                transform.transform_first_chunk(&mut headers, &mut chunk, include_footers);
            }
            self.headers = headers;
            Some(self.generate_headers())
        } else {
            for transform in &mut self.transforms {
                transform.transform_chunk(&mut chunk, include_footers);
            }
            None
        };
        if self.request.method == "HEAD" {
            if let Some(headers) = header_bytes {
                self.conn.write_chunk(headers).await?;
            }
            return Ok(());
        }
        let mut out = BytesMut::new();
        if let Some(headers) = header_bytes {
            out.extend_from_slice(&headers);
        }
        out.extend_from_slice(&chunk);
        if !out.is_empty() {
            self.conn.write_chunk(out.freeze()).await?;
        }
        Ok(())
    }

    fn compute_etag(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(&self.write_buffer);
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        format!("\"{}\"", hex)
    }

    /// Complete the response: auto-etag for plain 200 GET/HEAD, implicit
    /// Content-Length, final flush with footers, request log.
    pub async fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::value("finish() called twice"));
        }
        if !self.headers_written {
            if self.status_code == 200
                && (self.request.method == "GET" || self.request.method == "HEAD")
                && !self.headers.has("Etag")
            {
                let etag = self.compute_etag();
                let inm = self.request.headers.get_or("If-None-Match", "").into_owned();
                if inm.contains(&etag) {
                    self.write_buffer.clear();
                    self.set_status_force(304);
                } else {
                    self.headers.set("Etag", etag);
                }
            }
            if !self.headers.has("Content-Length") {
                let length = self.write_buffer.len();
                self.headers.set("Content-Length", length.to_string());
            }
        }
        self.flush(true).await?;
        self.finished = true;
        self.request.set_finished();
        let summary = self.request.summary();
        self.app
            .log_request(self.status_code, &summary, self.request.request_time());
        Ok(())
    }

    /// Final write then finish.
    pub async fn finish_with(&mut self, chunk: impl AsRef<[u8]>) -> Result<()> {
        self.write(chunk.as_ref())?;
        self.finish().await
    }

    /// Replace whatever has been buffered with a default error response.
    /// After headers have gone out the best we can do is force-finish.
    pub async fn send_error(&mut self, code: u16) -> Result<()> {
        if self.headers_written {
            log::error!("Cannot send error response after headers written");
            if !self.finished {
                self.finish().await?;
            }
            return Ok(());
        }
        self.clear();
        self.set_status_force(code);
        self.finish_with(default_error_body(code).into_bytes())
            .await
    }

    pub(crate) fn headers_written(&self) -> bool {
        self.headers_written
    }
}

/// Resolve a redirect target against the request URI: absolute URLs and
/// absolute paths pass through, relative paths resolve against the
/// request's directory.
fn resolve_location(base_uri: &str, target: &str) -> String {
    if target.contains("://") || target.starts_with('/') {
        return target.to_string();
    }
    let base_path = base_uri.split('?').next().unwrap_or(base_uri);
    match base_path.rfind('/') {
        Some(slash) => format!("{}/{}", &base_path[..slash], target),
        None => format!("/{}", target),
    }
}

/// Run a handler through its lifecycle: initialize, prepare, method
/// dispatch, auto-finish, exception conversion.
pub(crate) async fn execute_handler(
    mut handler: Box<dyn Handler>,
    ctx: &mut RequestContext<'_>,
    args: Vec<String>,
) -> Result<()> {
    handler.initialize(ctx);
    let outcome = run_handler(handler.as_mut(), ctx, args).await;
    if let Err(error) = outcome {
        match error {
            Error::StreamClosed => {
                handler.on_connection_close();
            }
            error => {
                if let Err(e) = handle_request_exception(handler.as_mut(), ctx, error).await {
                    match e {
                        Error::StreamClosed => handler.on_connection_close(),
                        e => log::error!("Error sending error response: {}", e),
                    }
                }
            }
        }
    }
    Ok(())
}

async fn run_handler(
    handler: &mut dyn Handler,
    ctx: &mut RequestContext<'_>,
    args: Vec<String>,
) -> Result<()> {
    let method = ctx.request.method.clone();
    if !SUPPORTED_METHODS.contains(&method.as_str()) {
        return Err(Error::Http(HttpError::new(405)));
    }
    handler.prepare(ctx).await?;
    if !ctx.finished() {
        match method.as_str() {
            "HEAD" => handler.head(ctx, args).await?,
            "GET" => handler.get(ctx, args).await?,
            "POST" => handler.post(ctx, args).await?,
            "DELETE" => handler.delete(ctx, args).await?,
            "PUT" => handler.put(ctx, args).await?,
            "OPTIONS" => handler.options(ctx, args).await?,
            _ => handler.patch(ctx, args).await?,
        }
        if ctx.auto_finish() && !ctx.finished() {
            ctx.finish().await?;
        }
    }
    Ok(())
}

/// Convert a handler error into an HTTP response: HTTPError renders its
/// status, everything else is logged and becomes a 500.
async fn handle_request_exception(
    handler: &mut dyn Handler,
    ctx: &mut RequestContext<'_>,
    error: Error,
) -> Result<()> {
    let code = match &error {
        Error::Http(http_error) => {
            log::warn!(
                "{} {}: {}",
                http_error.code,
                ctx.request.summary(),
                http_error
            );
            if response_reason(http_error.code).is_none() {
                log::error!("Bad HTTP status code: {}", http_error.code);
                500
            } else {
                http_error.code
            }
        }
        other => {
            log::error!(
                "Uncaught exception {}\n{}\n{}",
                other,
                ctx.request.summary(),
                ctx.request.dump()
            );
            500
        }
    };
    if ctx.headers_written() {
        log::error!("Cannot send error response after headers written");
        if !ctx.finished() {
            ctx.finish().await?;
        }
        return Ok(());
    }
    ctx.clear();
    ctx.set_status_force(code);
    if let Err(e) = handler.write_error(ctx, code, Some(&error)).await {
        log::error!("Uncaught exception in write_error: {}", e);
    }
    if !ctx.finished() {
        ctx.finish().await?;
    }
    Ok(())
}

/// Responds with a fixed error status; backs the 404 fallback route.
pub struct ErrorHandler {
    code: u16,
}

impl ErrorHandler {
    pub fn new(code: u16) -> Self {
        Self { code }
    }
}

#[async_trait(?Send)]
impl Handler for ErrorHandler {
    async fn prepare(&mut self, _ctx: &mut RequestContext<'_>) -> Result<()> {
        Err(Error::Http(HttpError::new(self.code)))
    }
}

/// Redirects GET requests to a fixed URL.
pub struct RedirectHandler {
    url: String,
    permanent: bool,
}

impl RedirectHandler {
    pub fn new(url: impl Into<String>, permanent: bool) -> Self {
        Self {
            url: url.into(),
            permanent,
        }
    }
}

#[async_trait(?Send)]
impl Handler for RedirectHandler {
    async fn get(&mut self, ctx: &mut RequestContext<'_>, _args: Vec<String>) -> Result<()> {
        ctx.redirect(&self.url.clone(), self.permanent).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_error_body_names_the_reason() {
        let body = default_error_body(404);
        assert!(body.contains("404: Not Found"));
    }

    #[test]
    fn scrub_replaces_control_chars_and_optionally_strips() {
        let raw = "  a\x01b\x0fc  ";
        assert_eq!(RequestContext::scrub_argument(raw, true), "a b c");
        assert_eq!(RequestContext::scrub_argument(raw, false), "  a b c  ");
        // \x0a-\x0d are whitespace, not scrubbed away.
        assert_eq!(RequestContext::scrub_argument("a\nb", false), "a\nb");
    }

    #[test]
    fn resolve_location_handles_the_three_shapes() {
        assert_eq!(
            resolve_location("/a/b", "http://other/x"),
            "http://other/x"
        );
        assert_eq!(resolve_location("/a/b", "/c"), "/c");
        assert_eq!(resolve_location("/a/b", "c"), "/a/c");
        assert_eq!(resolve_location("/a/b?x=1", "c"), "/a/c");
    }
}
