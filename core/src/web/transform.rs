/*
 * transform.rs
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

//! Response-encoding pipeline: each transform rewrites the first chunk
//! (with access to the headers) and every subsequent chunk. Applied in
//! order: gzip first when enabled, then chunked transfer framing.

use std::io::Write as _;

use bytes::BytesMut;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::http::request::HttpRequest;
use crate::httputil::HeaderStore;

/// One stage of the response-encoding pipeline.
pub trait OutputTransform {
    /// Invoked for the first flush, before the header block is generated.
    fn transform_first_chunk(
        &mut self,
        headers: &mut HeaderStore,
        chunk: &mut BytesMut,
        finishing: bool,
    );

    /// Invoked for every later flush.
    fn transform_chunk(&mut self, chunk: &mut BytesMut, finishing: bool);
}

const GZIP_MIN_LENGTH: usize = 5;

const GZIP_CONTENT_TYPES: [&str; 11] = [
    "text/plain",
    "text/html",
    "text/css",
    "text/xml",
    "application/javascript",
    "application/x-javascript",
    "application/xml",
    "application/atom+xml",
    "text/javascript",
    "application/json",
    "application/xhtml+xml",
];

/// Content-Encoding: gzip for compressible content types when the client
/// advertised gzip support.
pub struct GzipTransform {
    gzipping: bool,
    encoder: Option<GzEncoder<Vec<u8>>>,
}

impl GzipTransform {
    pub fn new(request: &HttpRequest) -> Self {
        let gzipping = request.supports_http_1_1()
            && request
                .headers
                .get_or("Accept-Encoding", "")
                .contains("gzip");
        Self {
            gzipping,
            encoder: None,
        }
    }
}

impl OutputTransform for GzipTransform {
    fn transform_first_chunk(
        &mut self,
        headers: &mut HeaderStore,
        chunk: &mut BytesMut,
        finishing: bool,
    ) {
        if self.gzipping {
            let ctype = headers.get_or("Content-Type", "").into_owned();
            let ctype = ctype.split(';').next().unwrap_or("").trim().to_string();
            self.gzipping = GZIP_CONTENT_TYPES.contains(&ctype.as_str())
                && (!finishing || chunk.len() >= GZIP_MIN_LENGTH)
                && (finishing || !headers.has("Content-Length"))
                && !headers.has("Content-Encoding");
        }
        if self.gzipping {
            headers.set("Content-Encoding", "gzip");
            self.encoder = Some(GzEncoder::new(Vec::new(), Compression::default()));
            self.transform_chunk(chunk, finishing);
            if headers.has("Content-Length") {
                headers.set("Content-Length", chunk.len().to_string());
            }
        }
    }

    fn transform_chunk(&mut self, chunk: &mut BytesMut, finishing: bool) {
        if !self.gzipping {
            return;
        }
        // Writing to an in-memory Vec cannot fail.
        if finishing {
            let mut encoder = self.encoder.take().expect("gzip encoder present");
            encoder.write_all(chunk).expect("in-memory gzip write");
            let out = encoder.finish().expect("in-memory gzip finish");
            chunk.clear();
            chunk.extend_from_slice(&out);
        } else {
            let encoder = self.encoder.as_mut().expect("gzip encoder present");
            encoder.write_all(chunk).expect("in-memory gzip write");
            encoder.flush().expect("in-memory gzip flush");
            let out = std::mem::take(encoder.get_mut());
            chunk.clear();
            chunk.extend_from_slice(&out);
        }
    }
}

/// Transfer-Encoding: chunked for HTTP/1.1 responses without an explicit
/// length. Each non-empty chunk becomes `<hex-len>\r\n<data>\r\n`; the final
/// flush appends the `0\r\n\r\n` terminator.
pub struct ChunkedTransform {
    chunking: bool,
}

impl ChunkedTransform {
    pub fn new(request: &HttpRequest) -> Self {
        Self {
            chunking: request.supports_http_1_1(),
        }
    }
}

impl OutputTransform for ChunkedTransform {
    fn transform_first_chunk(
        &mut self,
        headers: &mut HeaderStore,
        chunk: &mut BytesMut,
        finishing: bool,
    ) {
        if self.chunking {
            if headers.has("Content-Length") || headers.has("Transfer-Encoding") {
                self.chunking = false;
            } else {
                headers.set("Transfer-Encoding", "chunked");
                self.transform_chunk(chunk, finishing);
            }
        }
    }

    fn transform_chunk(&mut self, chunk: &mut BytesMut, finishing: bool) {
        if self.chunking {
            if !chunk.is_empty() {
                let framed_len = chunk.len();
                let mut framed = BytesMut::with_capacity(framed_len + 16);
                framed.extend_from_slice(format!("{:x}\r\n", framed_len).as_bytes());
                framed.extend_from_slice(chunk);
                framed.extend_from_slice(b"\r\n");
                *chunk = framed;
            }
            if finishing {
                chunk.extend_from_slice(b"0\r\n\r\n");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::httputil::HeaderStore;
    use bytes::BytesMut;

    fn request(version: &str, accept_encoding: Option<&str>) -> HttpRequest {
        let mut headers = HeaderStore::new();
        if let Some(ae) = accept_encoding {
            headers.add("Accept-Encoding", ae);
        }
        HttpRequest::new(
            "GET".into(),
            "/".into(),
            version.into(),
            headers,
            "127.0.0.1".into(),
            false,
            false,
        )
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn gzip_round_trip_on_finishing_chunk() {
        let req = request("HTTP/1.1", Some("gzip"));
        let mut transform = GzipTransform::new(&req);
        let mut headers = HeaderStore::new();
        headers.set("Content-Type", "text/plain");
        let mut chunk = BytesMut::from(&b"hello gzip world"[..]);
        transform.transform_first_chunk(&mut headers, &mut chunk, true);
        assert_eq!(headers.get("Content-Encoding").unwrap(), "gzip");
        assert_eq!(gunzip(&chunk), b"hello gzip world");
    }

    #[test]
    fn gzip_skips_small_final_bodies() {
        let req = request("HTTP/1.1", Some("gzip"));
        let mut transform = GzipTransform::new(&req);
        let mut headers = HeaderStore::new();
        headers.set("Content-Type", "text/plain");
        let mut chunk = BytesMut::from(&b"tiny"[..]);
        transform.transform_first_chunk(&mut headers, &mut chunk, true);
        assert!(!headers.has("Content-Encoding"));
        assert_eq!(&chunk[..], b"tiny");
    }

    #[test]
    fn gzip_requires_whitelisted_content_type() {
        let req = request("HTTP/1.1", Some("gzip"));
        let mut transform = GzipTransform::new(&req);
        let mut headers = HeaderStore::new();
        headers.set("Content-Type", "image/png");
        let mut chunk = BytesMut::from(&b"not an actual png"[..]);
        transform.transform_first_chunk(&mut headers, &mut chunk, true);
        assert!(!headers.has("Content-Encoding"));
    }

    #[test]
    fn gzip_updates_content_length() {
        let req = request("HTTP/1.1", Some("gzip"));
        let mut transform = GzipTransform::new(&req);
        let mut headers = HeaderStore::new();
        headers.set("Content-Type", "text/html; charset=UTF-8");
        headers.set("Content-Length", "26");
        let mut chunk = BytesMut::from(&b"abcdefghijklmnopqrstuvwxyz"[..]);
        transform.transform_first_chunk(&mut headers, &mut chunk, true);
        assert_eq!(
            headers.get("Content-Length").unwrap(),
            chunk.len().to_string()
        );
    }

    #[test]
    fn gzip_disabled_for_http_1_0() {
        let req = request("HTTP/1.0", Some("gzip"));
        let mut transform = GzipTransform::new(&req);
        let mut headers = HeaderStore::new();
        headers.set("Content-Type", "text/plain");
        let mut chunk = BytesMut::from(&b"plenty long enough"[..]);
        transform.transform_first_chunk(&mut headers, &mut chunk, true);
        assert!(!headers.has("Content-Encoding"));
    }

    #[test]
    fn chunked_frames_and_terminates() {
        let req = request("HTTP/1.1", None);
        let mut transform = ChunkedTransform::new(&req);
        let mut headers = HeaderStore::new();
        let mut first = BytesMut::from(&b"asdf"[..]);
        transform.transform_first_chunk(&mut headers, &mut first, false);
        assert_eq!(headers.get("Transfer-Encoding").unwrap(), "chunked");
        assert_eq!(&first[..], b"4\r\nasdf\r\n");
        let mut last = BytesMut::from(&b"qwer"[..]);
        transform.transform_chunk(&mut last, true);
        assert_eq!(&last[..], b"4\r\nqwer\r\n0\r\n\r\n");
    }

    #[test]
    fn chunked_respects_content_length() {
        let req = request("HTTP/1.1", None);
        let mut transform = ChunkedTransform::new(&req);
        let mut headers = HeaderStore::new();
        headers.set("Content-Length", "4");
        let mut chunk = BytesMut::from(&b"asdf"[..]);
        transform.transform_first_chunk(&mut headers, &mut chunk, true);
        assert!(!headers.has("Transfer-Encoding"));
        assert_eq!(&chunk[..], b"asdf");
    }

    #[test]
    fn chunked_zero_length_write_emits_only_terminator() {
        let req = request("HTTP/1.1", None);
        let mut transform = ChunkedTransform::new(&req);
        let mut headers = HeaderStore::new();
        let mut chunk = BytesMut::new();
        transform.transform_first_chunk(&mut headers, &mut chunk, true);
        assert_eq!(&chunk[..], b"0\r\n\r\n");
    }
}
