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

//! Web application layer: the routing table (host pattern + anchored path
//! regex), typed settings, reverse URL generation, the output transform
//! pipeline, and request dispatch.

pub mod handler;
pub mod transform;

pub use handler::{CookieOptions, ErrorHandler, Handler, RedirectHandler, RequestContext};
pub use transform::{ChunkedTransform, GzipTransform, OutputTransform};

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use regex::Regex;

use crate::error::{Error, Result};
use crate::http::request::HttpRequest;
use crate::http::server::HttpConnection;
use crate::httputil::{url_escape, url_unescape_plus};
use crate::websocket::WebSocketHandler;

/// Version string advertised in the Server header.
pub const SERVER_VERSION: &str = concat!("Squall/", env!("CARGO_PKG_VERSION"));

/// What happened to the connection during dispatch.
pub enum Served {
    /// The response is complete; the connection may serve another request.
    Completed,
    /// The stream was taken over (WebSocket); the connection is done.
    Detached,
}

/// Builds one transform instance per request.
pub type TransformFactory = Rc<dyn Fn(&HttpRequest) -> Box<dyn OutputTransform>>;

/// Application-wide configuration. Unknown settings do not exist: this is
/// the whole set.
#[derive(Clone, Default)]
pub struct Settings {
    /// Enable the gzip output transform.
    pub gzip: bool,
    /// Verbose request logging.
    pub debug: bool,
    /// Host used when no host group matches and for host-less redirects.
    pub default_host: Option<String>,
    /// Replaces the built-in `<status> <summary> <ms>ms` request log line.
    #[allow(clippy::type_complexity)]
    pub log_function: Option<Rc<dyn Fn(u16, &str, Duration)>>,
    /// Replaces the default transform pipeline (gzip when enabled, then
    /// chunked transfer framing).
    pub transforms: Option<Vec<TransformFactory>>,
}

pub type HandlerFactory = Rc<dyn Fn() -> Box<dyn Handler>>;
pub type WebSocketHandlerFactory = Rc<dyn Fn() -> Box<dyn WebSocketHandler>>;

/// The two kinds of route endpoint.
#[derive(Clone)]
pub enum RouteTarget {
    Http(HandlerFactory),
    WebSocket(WebSocketHandlerFactory),
}

/// One route: anchored pattern, handler factory, optional name for reverse
/// URL generation.
pub struct UrlSpec {
    pattern: String,
    regex: Regex,
    target: RouteTarget,
    name: Option<String>,
    path_template: Option<String>,
    group_count: usize,
}

impl UrlSpec {
    /// Route to a request handler. Panics on an invalid pattern; routes are
    /// constructed once at startup.
    pub fn new<F, H>(pattern: &str, factory: F) -> Self
    where
        F: Fn() -> H + 'static,
        H: Handler + 'static,
    {
        Self::with_target(
            pattern,
            RouteTarget::Http(Rc::new(move || Box::new(factory()) as Box<dyn Handler>)),
            None,
        )
    }

    /// Route with a name usable in `Application::reverse_url`.
    pub fn named<F, H>(pattern: &str, factory: F, name: &str) -> Self
    where
        F: Fn() -> H + 'static,
        H: Handler + 'static,
    {
        Self::with_target(
            pattern,
            RouteTarget::Http(Rc::new(move || Box::new(factory()) as Box<dyn Handler>)),
            Some(name.to_string()),
        )
    }

    /// Route to a WebSocket handler.
    pub fn websocket<F, H>(pattern: &str, factory: F) -> Self
    where
        F: Fn() -> H + 'static,
        H: WebSocketHandler + 'static,
    {
        Self::with_target(
            pattern,
            RouteTarget::WebSocket(Rc::new(move || {
                Box::new(factory()) as Box<dyn WebSocketHandler>
            })),
            None,
        )
    }

    fn with_target(pattern: &str, target: RouteTarget, name: Option<String>) -> Self {
        let mut pattern = pattern.to_string();
        if !pattern.ends_with('$') {
            pattern.push('$');
        }
        let regex = Regex::new(&format!("^{}", pattern.trim_start_matches('^')))
            .unwrap_or_else(|e| panic!("invalid route pattern {}: {}", pattern, e));
        let (path_template, group_count) = Self::find_groups(&pattern, &regex);
        Self {
            pattern,
            regex,
            target,
            name,
            path_template,
            group_count,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Derive the reverse template: every capturing group becomes a `%s`
    /// slot. Patterns whose parenthesis count disagrees with the capture
    /// count (nested or non-capturing groups) get no template.
    fn find_groups(pattern: &str, regex: &Regex) -> (Option<String>, usize) {
        let trimmed = pattern
            .strip_prefix('^')
            .unwrap_or(pattern)
            .strip_suffix('$')
            .unwrap_or_else(|| pattern.strip_prefix('^').unwrap_or(pattern));
        let group_count = regex.captures_len() - 1;
        let paren_count = trimmed.matches('(').count();
        if group_count != paren_count {
            return (None, group_count);
        }
        let mut pieces = Vec::new();
        for (i, fragment) in trimmed.split('(').enumerate() {
            if i == 0 {
                pieces.push(fragment.to_string());
            } else {
                match fragment.find(')') {
                    Some(paren) => pieces.push(format!("%s{}", &fragment[paren + 1..])),
                    None => pieces.push(fragment.to_string()),
                }
            }
        }
        (Some(pieces.concat()), group_count)
    }

    /// Substitute percent-quoted arguments into the path template.
    pub fn reverse(&self, args: &[&str]) -> Result<String> {
        let template = self.path_template.as_ref().ok_or_else(|| {
            Error::value(format!("Cannot reverse url regex {}", self.pattern))
        })?;
        if args.len() != self.group_count {
            return Err(Error::value(format!(
                "required number of arguments for {} not found",
                self.pattern
            )));
        }
        let mut out = String::new();
        let mut pieces = template.split("%s");
        if let Some(first) = pieces.next() {
            out.push_str(first);
        }
        for (arg, rest) in args.iter().zip(pieces) {
            out.push_str(&url_escape(arg));
            out.push_str(rest);
        }
        Ok(out)
    }
}

struct HostGroup {
    pattern: String,
    regex: Regex,
    specs: Vec<Rc<UrlSpec>>,
}

/// Routing table plus settings. Construct, register extra host groups, then
/// wrap in `Rc` and hand to an `HttpServer`; the table is read-only from
/// then on.
pub struct Application {
    groups: Vec<HostGroup>,
    named: HashMap<String, Rc<UrlSpec>>,
    default_host: String,
    pub settings: Settings,
}

impl Application {
    pub fn new(handlers: Vec<UrlSpec>, settings: Settings) -> Self {
        let default_host = settings
            .default_host
            .clone()
            .unwrap_or_else(|| "localhost".to_string());
        let mut app = Self {
            groups: Vec::new(),
            named: HashMap::new(),
            default_host,
            settings,
        };
        if !handlers.is_empty() {
            app.add_handlers(".*$", handlers);
        }
        app
    }

    /// Register a host group. Groups are matched in registration order,
    /// except that new groups land before a trailing catch-all.
    pub fn add_handlers(&mut self, host_pattern: &str, handlers: Vec<UrlSpec>) {
        let mut pattern = host_pattern.to_string();
        if !pattern.ends_with('$') {
            pattern.push('$');
        }
        let regex = Regex::new(&format!("^{}", pattern.trim_start_matches('^')))
            .unwrap_or_else(|e| panic!("invalid host pattern {}: {}", pattern, e));
        let specs: Vec<Rc<UrlSpec>> = handlers.into_iter().map(Rc::new).collect();
        for spec in &specs {
            if let Some(name) = spec.name() {
                if self.named.contains_key(name) {
                    log::warn!("Multiple handlers named {}; replacing previous value", name);
                }
                self.named.insert(name.to_string(), spec.clone());
            }
        }
        let group = HostGroup {
            pattern,
            regex,
            specs,
        };
        let insert_before_catch_all = self
            .groups
            .last()
            .map(|g| g.pattern == ".*$")
            .unwrap_or(false);
        if insert_before_catch_all {
            let index = self.groups.len() - 1;
            self.groups.insert(index, group);
        } else {
            self.groups.push(group);
        }
    }

    /// Reverse URL generation for a named route.
    pub fn reverse_url(&self, name: &str, args: &[&str]) -> Result<String> {
        match self.named.get(name) {
            Some(spec) => spec.reverse(args),
            None => Err(Error::value(format!("{} not found in named urls", name))),
        }
    }

    fn host_specs(&self, request: &HttpRequest) -> Option<&[Rc<UrlSpec>]> {
        let mut host = request.host.to_lowercase();
        if let Some(colon) = host.find(':') {
            host.truncate(colon);
        }
        for group in &self.groups {
            if group.regex.is_match(&host) {
                return Some(&group.specs);
            }
        }
        if !request.headers.has("X-Real-Ip") {
            for group in &self.groups {
                if group.regex.is_match(&self.default_host) {
                    return Some(&group.specs);
                }
            }
        }
        None
    }

    /// Resolve the route and run the handler. WebSocket routes detach the
    /// stream from the connection and run their own framing loop.
    pub(crate) async fn dispatch(
        self: Rc<Self>,
        conn: &mut HttpConnection,
        request: HttpRequest,
    ) -> Result<Served> {
        let mut args: Vec<String> = Vec::new();
        let target = match self.host_specs(&request) {
            None => {
                let url = format!("http://{}/", self.default_host);
                RouteTarget::Http(Rc::new(move || {
                    Box::new(RedirectHandler::new(url.clone(), false)) as Box<dyn Handler>
                }))
            }
            Some(specs) => {
                let mut found = None;
                for spec in specs {
                    if let Some(caps) = spec.regex.captures(&request.path) {
                        for group in caps.iter().skip(1) {
                            let raw = group.map(|m| m.as_str()).unwrap_or("");
                            args.push(url_unescape_plus(raw));
                        }
                        found = Some(spec.target.clone());
                        break;
                    }
                }
                found.unwrap_or_else(|| {
                    RouteTarget::Http(Rc::new(|| {
                        Box::new(ErrorHandler::new(404)) as Box<dyn Handler>
                    }))
                })
            }
        };
        match target {
            RouteTarget::Http(factory) => {
                let handler = factory();
                let transforms = self.build_transforms(&request);
                let mut ctx = RequestContext::new(conn, request, self.clone(), transforms);
                handler::execute_handler(handler, &mut ctx, args).await?;
                Ok(Served::Completed)
            }
            RouteTarget::WebSocket(factory) => {
                let handler = factory();
                let stream = conn.take_stream();
                crate::websocket::run_server(stream, request, handler, args).await;
                Ok(Served::Detached)
            }
        }
    }

    fn build_transforms(&self, request: &HttpRequest) -> Vec<Box<dyn OutputTransform>> {
        if let Some(factories) = &self.settings.transforms {
            return factories.iter().map(|f| f(request)).collect();
        }
        let mut transforms: Vec<Box<dyn OutputTransform>> = Vec::new();
        if self.settings.gzip {
            transforms.push(Box::new(GzipTransform::new(request)));
        }
        transforms.push(Box::new(ChunkedTransform::new(request)));
        transforms
    }

    /// Called by the handler on finish: `<status> <summary> <ms>ms` with
    /// severity by status class.
    pub(crate) fn log_request(&self, code: u16, summary: &str, elapsed: Duration) {
        if let Some(log_function) = &self.settings.log_function {
            log_function(code, summary, elapsed);
            return;
        }
        let millis = elapsed.as_secs_f64() * 1000.0;
        if code < 400 {
            log::info!("{} {} {:.2}ms", code, summary, millis);
        } else if code < 500 {
            log::warn!("{} {} {:.2}ms", code, summary, millis);
        } else {
            log::error!("{} {} {:.2}ms", code, summary, millis);
        }
    }
}
