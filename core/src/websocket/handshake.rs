/*
 * handshake.rs
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

//! WebSocket opening handshakes. Two dialects: RFC 6455 (SHA-1 accept
//! value) and the legacy hixie-76 draft (MD5 over challenge keys).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::Md5;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::httputil::HeaderStore;
use crate::web::SERVER_VERSION;

/// Magic GUID for Sec-WebSocket-Accept (RFC 6455 §4.2.2).
const WS_ACCEPT_MAGIC: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The two supported handshake dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Rfc6455,
    Hixie76,
}

/// Pick the dialect from the request headers: any Sec-WebSocket-Version or
/// Sec-WebSocket-Key means RFC 6455; the challenge-key pair means hixie-76.
pub fn detect_dialect(headers: &HeaderStore) -> Dialect {
    if headers.has("Sec-Websocket-Version") || headers.has("Sec-Websocket-Key") {
        Dialect::Rfc6455
    } else {
        Dialect::Hixie76
    }
}

fn check_upgrade(headers: &HeaderStore) -> Result<()> {
    let upgrade = headers.get_or("Upgrade", "").to_lowercase();
    let connection = headers.get_or("Connection", "").to_lowercase();
    if upgrade != "websocket" || !connection.contains("upgrade") {
        return Err(Error::value("Missing/Invalid WebSocket headers"));
    }
    Ok(())
}

/// Header validation for the RFC 6455 path.
pub fn validate_rfc6455(headers: &HeaderStore) -> Result<()> {
    check_upgrade(headers)?;
    for field in ["Host", "Sec-Websocket-Key", "Sec-Websocket-Version"] {
        if headers.get_or(field, "").is_empty() {
            return Err(Error::value("Missing/Invalid WebSocket headers"));
        }
    }
    Ok(())
}

/// Header validation for the hixie-76 path.
pub fn validate_hixie76(headers: &HeaderStore) -> Result<()> {
    check_upgrade(headers)?;
    for field in ["Origin", "Host", "Sec-Websocket-Key1", "Sec-Websocket-Key2"] {
        if headers.get_or(field, "").is_empty() {
            return Err(Error::value("Missing/Invalid WebSocket headers"));
        }
    }
    Ok(())
}

/// `base64(sha1(key ‖ magic))` for Sec-WebSocket-Accept.
pub fn compute_accept_value(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_ACCEPT_MAGIC);
    BASE64.encode(hasher.finalize())
}

/// 101 Switching Protocols envelope for RFC 6455.
pub fn build_rfc6455_response(accept: &str, subprotocol: Option<&str>) -> String {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Server: {}\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        SERVER_VERSION, accept
    );
    if let Some(subprotocol) = subprotocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", subprotocol));
    }
    response.push_str("\r\n");
    response
}

/// 101 envelope for hixie-76; the 16-byte challenge reply follows after
/// the challenge bytes arrive.
pub fn build_hixie76_response(origin: &str, scheme: &str, host: &str, uri: &str) -> String {
    format!(
        "HTTP/1.1 101 Web Socket Protocol Handshake\r\n\
         Upgrade: WebSocket\r\n\
         Connection: Upgrade\r\n\
         Server: {}\r\n\
         Sec-WebSocket-Origin: {}\r\n\
         Sec-WebSocket-Location: {}://{}{}\r\n\r\n",
        SERVER_VERSION, origin, scheme, host, uri
    )
}

/// Extract a hixie-76 key part: the digit characters as a decimal integer
/// divided by the count of space characters, big-endian.
pub fn hixie_key_part(key: &str) -> Result<[u8; 4]> {
    let number: String = key.chars().filter(|c| c.is_ascii_digit()).collect();
    let spaces = key.chars().filter(|c| *c == ' ').count() as u64;
    if number.is_empty() || spaces == 0 {
        return Err(Error::value("Invalid Keys/Challenge"));
    }
    let number: u64 = number
        .parse()
        .map_err(|_| Error::value("Invalid Keys/Challenge"))?;
    let part = (number / spaces) as u32;
    Ok(part.to_be_bytes())
}

/// MD5 over `part1 ‖ part2 ‖ challenge`; the raw 16-byte digest is written
/// back to the client.
pub fn hixie_challenge_response(key1: &str, key2: &str, challenge: &[u8]) -> Result<[u8; 16]> {
    let part1 = hixie_key_part(key1)?;
    let part2 = hixie_key_part(key2)?;
    let mut hasher = Md5::new();
    hasher.update(part1);
    hasher.update(part2);
    hasher.update(challenge);
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Random Sec-WebSocket-Key for the client handshake.
pub fn make_client_key() -> Result<String> {
    let mut raw = [0u8; 16];
    getrandom::getrandom(&mut raw)
        .map_err(|e| Error::value(format!("cannot generate key: {}", e)))?;
    Ok(BASE64.encode(raw))
}

/// Client-side GET request for the RFC 6455 handshake.
pub fn build_client_request(host: &str, port: u16, path: &str, key: &str) -> String {
    let host_header = if port == 80 || port == 443 {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    };
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        path, host_header, key
    )
}

/// Check the server's Sec-WebSocket-Accept against our key.
pub fn verify_accept(accept: Option<&str>, key: &str) -> Result<()> {
    let expected = compute_accept_value(key);
    match accept {
        Some(value) if value.trim() == expected => Ok(()),
        Some(_) => Err(Error::protocol("Sec-WebSocket-Accept mismatch")),
        None => Err(Error::protocol("missing Sec-WebSocket-Accept")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_value_matches_rfc_example() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(
            compute_accept_value("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pAPLC1BMFi7CaQ84moGjQikxQ="
        );
    }

    #[test]
    fn hixie_part_divides_digits_by_spaces() {
        // digits "12", two spaces -> 12 / 2 = 6
        let part = hixie_key_part("1  2").unwrap();
        assert_eq!(part, 6u32.to_be_bytes());
    }

    #[test]
    fn hixie_part_requires_digits_and_spaces() {
        assert!(hixie_key_part("nodigits here").is_err());
        assert!(hixie_key_part("123").is_err());
    }

    #[test]
    fn hixie_challenge_is_md5_of_parts() {
        let response = hixie_challenge_response("1 2", "3 4", b"01234567").unwrap();
        let mut hasher = Md5::new();
        hasher.update(12u32.to_be_bytes());
        hasher.update(34u32.to_be_bytes());
        hasher.update(b"01234567");
        assert_eq!(response, hasher.finalize().as_slice());
    }

    #[test]
    fn dialect_detection() {
        let rfc = HeaderStore::parse("Sec-WebSocket-Key: abc\r\n").unwrap();
        assert_eq!(detect_dialect(&rfc), Dialect::Rfc6455);
        let hixie =
            HeaderStore::parse("Sec-WebSocket-Key1: 1 2\r\nSec-WebSocket-Key2: 3 4\r\n").unwrap();
        assert_eq!(detect_dialect(&hixie), Dialect::Hixie76);
    }

    #[test]
    fn validate_requires_upgrade_headers() {
        let headers = HeaderStore::parse(
            "Host: h\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: k\r\nSec-WebSocket-Version: 13\r\n",
        )
        .unwrap();
        assert!(validate_rfc6455(&headers).is_ok());
        let missing = HeaderStore::parse("Host: h\r\nSec-WebSocket-Key: k\r\n").unwrap();
        assert!(validate_rfc6455(&missing).is_err());
    }

    #[test]
    fn verify_accept_round_trip() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let accept = compute_accept_value(key);
        assert!(verify_accept(Some(&accept), key).is_ok());
        assert!(verify_accept(Some("wrong"), key).is_err());
        assert!(verify_accept(None, key).is_err());
    }
}
