/*
 * httputil.rs
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

//! HTTP plumbing shared by server and client: the case-normalising header
//! container, the status reason table, RFC 1123 dates, query-string and
//! request-body (urlencoded / multipart) parsing.

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// True when `name` is already in canonical form: dash-separated tokens,
/// each starting with an uppercase letter or digit followed by lowercase
/// letters or digits.
fn is_normalized(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    for token in name.split('-') {
        let mut chars = token.chars();
        match chars.next() {
            Some(c) if c.is_ascii_uppercase() || c.is_ascii_digit() => {}
            _ => return false,
        }
        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return false;
        }
    }
    true
}

/// Canonicalise a header name (`content-length` -> `Content-Length`).
/// Allocation-free when the name is already canonical.
pub fn normalize_name(name: &str) -> Cow<'_, str> {
    if is_normalized(name) {
        return Cow::Borrowed(name);
    }
    let mut out = String::with_capacity(name.len());
    let mut first = true;
    for token in name.split('-') {
        if !first {
            out.push('-');
        }
        first = false;
        let mut chars = token.chars();
        if let Some(c) = chars.next() {
            out.extend(c.to_uppercase());
        }
        for c in chars {
            out.extend(c.to_lowercase());
        }
    }
    Cow::Owned(out)
}

/// Case-normalised multimap of HTTP header fields. Iteration preserves
/// addition order, one pair per raw value.
#[derive(Debug, Clone, Default)]
pub struct HeaderStore {
    items: Vec<(String, String)>,
}

impl HeaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value; `get` joins multiple values with a comma.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.items
            .push((normalize_name(name).into_owned(), value.into()));
    }

    /// Replace every value under `name`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let norm = normalize_name(name).into_owned();
        self.items.retain(|(n, _)| *n != norm);
        self.items.push((norm, value.into()));
    }

    pub fn has(&self, name: &str) -> bool {
        let norm = normalize_name(name);
        self.items.iter().any(|(n, _)| *n == norm.as_ref())
    }

    /// The joined value for `name`, comma-separating multiple entries.
    pub fn get(&self, name: &str) -> Option<String> {
        let norm = normalize_name(name);
        let mut joined: Option<String> = None;
        for (n, v) in &self.items {
            if *n == norm.as_ref() {
                match &mut joined {
                    Some(j) => {
                        j.push(',');
                        j.push_str(v);
                    }
                    None => joined = Some(v.clone()),
                }
            }
        }
        joined
    }

    pub fn get_or<'a>(&self, name: &str, default: &'a str) -> Cow<'a, str> {
        match self.get(name) {
            Some(v) => Cow::Owned(v),
            None => Cow::Borrowed(default),
        }
    }

    /// All raw values for `name`, possibly empty.
    pub fn get_list(&self, name: &str) -> Vec<&str> {
        let norm = normalize_name(name);
        self.items
            .iter()
            .filter(|(n, _)| *n == norm.as_ref())
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Remove all values for `name`; true if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let norm = normalize_name(name).into_owned();
        let before = self.items.len();
        self.items.retain(|(n, _)| *n != norm);
        self.items.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Parse one `Name: value` line.
    pub fn parse_line(&mut self, line: &str) -> Result<()> {
        match line.find(':') {
            Some(0) | None => Err(Error::value("Need more than 1 value to unpack")),
            Some(pos) => {
                let name = &line[..pos];
                let value = line[pos + 1..].trim();
                self.add(name, value);
                Ok(())
            }
        }
    }

    /// Parse a header block (lines separated by CRLF or LF; blank lines are
    /// skipped).
    pub fn parse_lines(&mut self, text: &str) -> Result<()> {
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if !line.is_empty() {
                self.parse_line(line)?;
            }
        }
        Ok(())
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut headers = Self::new();
        headers.parse_lines(text)?;
        Ok(headers)
    }
}

/// One uploaded file from a multipart/form-data body.
#[derive(Debug, Clone)]
pub struct HttpFile {
    pub filename: String,
    pub content_type: String,
    pub body: Bytes,
}

/// Canonical reason phrase for an HTTP status code.
pub fn response_reason(code: u16) -> Option<&'static str> {
    Some(match code {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        507 => "Insufficient Storage",
        _ => return None,
    })
}

/// RFC 1123 date in UTC, as required for Date, Expires, If-Modified-Since.
pub fn format_http_date(when: DateTime<Utc>) -> String {
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse a query string into name -> values. Empty values are dropped
/// unless `keep_blank_values` is set.
pub fn parse_qs(query: &str, keep_blank_values: bool) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if value.is_empty() && !keep_blank_values {
            continue;
        }
        out.entry(name.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    out
}

/// Percent-decode one path-segment capture (plus means space).
pub fn url_unescape_plus(s: &str) -> String {
    let replaced = s.replace('+', " ");
    percent_encoding::percent_decode_str(&replaced)
        .decode_utf8_lossy()
        .into_owned()
}

/// Percent-quote an argument for URL substitution (quote_plus rules).
pub fn url_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Decode a request body into arguments/files based on its content type.
/// Only form content types contribute; anything else leaves the body raw.
pub fn parse_body_arguments(
    content_type: &str,
    body: &Bytes,
    arguments: &mut HashMap<String, Vec<String>>,
    files: &mut HashMap<String, Vec<HttpFile>>,
) {
    if content_type.starts_with("application/x-www-form-urlencoded") {
        let text = String::from_utf8_lossy(body);
        for (name, values) in parse_qs(&text, false) {
            arguments.entry(name).or_default().extend(values);
        }
    } else if content_type.starts_with("multipart/form-data") {
        let mut found = false;
        for field in content_type.split(';') {
            let field = field.trim();
            if let Some((k, v)) = field.split_once('=') {
                if k == "boundary" && !v.is_empty() {
                    parse_multipart_form_data(v, body, arguments, files);
                    found = true;
                    break;
                }
            }
        }
        if !found {
            log::warn!("Invalid multipart/form-data");
        }
    }
}

/// Split a multipart body at `--boundary\r\n` separators and collect each
/// part into arguments (no filename) or files (filename present). Invalid
/// parts are skipped with a warning.
pub fn parse_multipart_form_data(
    boundary: &str,
    data: &Bytes,
    arguments: &mut HashMap<String, Vec<String>>,
    files: &mut HashMap<String, Vec<HttpFile>>,
) {
    let boundary = boundary
        .strip_prefix('"')
        .and_then(|b| b.strip_suffix('"'))
        .unwrap_or(boundary);
    // The terminator is --boundary-- with optional trailing CRLF.
    let footer_length = if data.ends_with(b"\r\n") {
        boundary.len() + 6
    } else {
        boundary.len() + 4
    };
    if data.len() <= footer_length {
        return;
    }
    let sep = format!("--{}\r\n", boundary);
    let sep = sep.as_bytes();
    let end = data.len() - footer_length;
    let mut beg = 0usize;
    while beg < end {
        let cur = match find(&data[beg..end], sep) {
            Some(offset) => beg + offset,
            None => break,
        };
        if cur != beg {
            parse_multipart_part(&data.slice(beg..cur), arguments, files);
        }
        beg = cur + sep.len();
    }
    if beg < end {
        parse_multipart_part(&data.slice(beg..end), arguments, files);
    }
}

fn parse_multipart_part(
    part: &Bytes,
    arguments: &mut HashMap<String, Vec<String>>,
    files: &mut HashMap<String, Vec<HttpFile>>,
) {
    let eoh = match find(part, b"\r\n\r\n") {
        Some(i) => i,
        None => {
            log::warn!("multipart/form-data missing headers");
            return;
        }
    };
    let header_text = String::from_utf8_lossy(&part[..eoh]);
    let headers = match HeaderStore::parse(&header_text) {
        Ok(h) => h,
        Err(_) => {
            log::warn!("Invalid multipart/form-data");
            return;
        }
    };
    let disposition = headers.get_or("Content-Disposition", "");
    if !disposition.starts_with("form-data;") || !part.ends_with(b"\r\n") {
        log::warn!("Invalid multipart/form-data");
        return;
    }
    let value = if part.len() <= eoh + 6 {
        part.slice(0..0)
    } else {
        part.slice(eoh + 4..part.len() - 2)
    };
    let mut params: HashMap<String, String> = HashMap::new();
    for piece in disposition["form-data;".len()..].split(';') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let Some((k, v)) = piece.split_once('=') else {
            log::warn!("Invalid multipart/form-data");
            return;
        };
        let v = v.trim();
        let v = v
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(v);
        params.insert(k.to_string(), v.to_string());
    }
    let Some(name) = params.get("name") else {
        log::warn!("multipart/form-data value missing name");
        return;
    };
    if let Some(filename) = params.get("filename") {
        let content_type = headers.get_or("Content-Type", "application/unknown");
        files.entry(name.clone()).or_default().push(HttpFile {
            filename: filename.clone(),
            content_type: content_type.into_owned(),
            body: value,
        });
    } else {
        arguments
            .entry(name.clone())
            .or_default()
            .push(String::from_utf8_lossy(&value).into_owned());
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalization_canonicalises_and_is_idempotent() {
        assert_eq!(normalize_name("content-length"), "Content-Length");
        assert_eq!(normalize_name("CONTENT-TYPE"), "Content-Type");
        let once = normalize_name("x-forwarded-for").into_owned();
        assert_eq!(normalize_name(&once), once);
        assert!(matches!(normalize_name("Etag"), Cow::Borrowed(_)));
    }

    #[test]
    fn add_joins_and_get_list_splits() {
        let mut h = HeaderStore::new();
        h.add("set-cookie", "a=1");
        h.add("Set-Cookie", "b=2");
        assert_eq!(h.get("set-cookie").unwrap(), "a=1,b=2");
        assert_eq!(h.get_list("Set-Cookie"), vec!["a=1", "b=2"]);
        h.set("Set-Cookie", "c=3");
        assert_eq!(h.get_list("set-cookie"), vec!["c=3"]);
    }

    #[test]
    fn iteration_preserves_addition_order() {
        let mut h = HeaderStore::new();
        h.add("B-Header", "1");
        h.add("A-Header", "2");
        h.add("B-Header", "3");
        let pairs: Vec<_> = h.iter().collect();
        assert_eq!(
            pairs,
            vec![("B-Header", "1"), ("A-Header", "2"), ("B-Header", "3")]
        );
    }

    #[test]
    fn parse_lines_round_trip() {
        let h = HeaderStore::parse("Content-Type: text/html\r\nContent-Length: 42\r\n").unwrap();
        assert_eq!(h.get("content-type").unwrap(), "text/html");
        assert_eq!(h.get("content-length").unwrap(), "42");
        assert!(HeaderStore::parse(": nothing").is_err());
        assert!(HeaderStore::parse("no colon here").is_err());
    }

    #[test]
    fn http_date_is_rfc1123() {
        let when = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(format_http_date(when), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn parse_qs_collects_repeats() {
        let args = parse_qs("a=1&b=2&a=3&empty=", false);
        assert_eq!(args["a"], vec!["1", "3"]);
        assert_eq!(args["b"], vec!["2"]);
        assert!(!args.contains_key("empty"));
        let kept = parse_qs("empty=", true);
        assert_eq!(kept["empty"], vec![""]);
    }

    #[test]
    fn url_escape_quote_plus_rules() {
        assert_eq!(url_escape("a b/c"), "a+b%2Fc");
        assert_eq!(url_unescape_plus("a+b%2Fc"), "a b/c");
    }

    #[test]
    fn multipart_single_file() {
        let body = Bytes::from_static(
            b"--1234\r\nContent-Disposition: form-data; name=\"files\"; filename=\"ab.txt\"\r\n\r\nFoo\r\n--1234--",
        );
        let mut args = HashMap::new();
        let mut files = HashMap::new();
        parse_multipart_form_data("1234", &body, &mut args, &mut files);
        assert!(args.is_empty());
        let f = &files["files"][0];
        assert_eq!(f.filename, "ab.txt");
        assert_eq!(&f.body[..], b"Foo");
        assert_eq!(f.content_type, "application/unknown");
    }

    #[test]
    fn multipart_quoted_boundary_and_field() {
        let body = Bytes::from_static(
            b"--xy\r\nContent-Disposition: form-data; name=\"greeting\"\r\n\r\nhello\r\n--xy--\r\n",
        );
        let mut args = HashMap::new();
        let mut files = HashMap::new();
        parse_multipart_form_data("\"xy\"", &body, &mut args, &mut files);
        assert_eq!(args["greeting"], vec!["hello"]);
        assert!(files.is_empty());
    }

    #[test]
    fn multipart_missing_headers_is_skipped() {
        let body = Bytes::from_static(b"--b\r\nno header block here\r\n--b--");
        let mut args = HashMap::new();
        let mut files = HashMap::new();
        parse_multipart_form_data("b", &body, &mut args, &mut files);
        assert!(args.is_empty());
        assert!(files.is_empty());
    }

    #[test]
    fn urlencoded_body_arguments() {
        let body = Bytes::from_static(b"name=alpha&name=beta&other=x");
        let mut args = HashMap::new();
        let mut files = HashMap::new();
        parse_body_arguments(
            "application/x-www-form-urlencoded",
            &body,
            &mut args,
            &mut files,
        );
        assert_eq!(args["name"], vec!["alpha", "beta"]);
        assert_eq!(args["other"], vec!["x"]);
    }
}
