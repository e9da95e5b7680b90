/*
 * watcher.rs
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

//! Process-wide object counters for leak hunting in debug builds. The only
//! mutex-guarded shared state in the library; connections, streams, and
//! request contexts bump their counter on construction and drop.

use std::collections::BTreeMap;
use std::sync::Mutex;

pub const STREAM_COUNT: &str = "sys.stream.count";
pub const HTTP_CONNECTION_COUNT: &str = "sys.httpconnection.count";
pub const REQUEST_CONTEXT_COUNT: &str = "sys.requestcontext.count";
pub const WEBSOCKET_COUNT: &str = "sys.websocket.count";

static COUNTERS: Mutex<BTreeMap<&'static str, i64>> = Mutex::new(BTreeMap::new());

pub fn set(key: &'static str, value: i64) {
    let mut counters = COUNTERS.lock().expect("watcher lock");
    counters.insert(key, value);
}

pub fn inc(key: &'static str) {
    inc_by(key, 1);
}

pub fn inc_by(key: &'static str, increment: i64) {
    let mut counters = COUNTERS.lock().expect("watcher lock");
    *counters.entry(key).or_insert(0) += increment;
}

pub fn dec(key: &'static str) {
    dec_by(key, 1);
}

pub fn dec_by(key: &'static str, decrement: i64) {
    let mut counters = COUNTERS.lock().expect("watcher lock");
    *counters.entry(key).or_insert(0) -= decrement;
}

pub fn del(key: &'static str) {
    let mut counters = COUNTERS.lock().expect("watcher lock");
    counters.remove(key);
}

pub fn get(key: &'static str) -> i64 {
    let counters = COUNTERS.lock().expect("watcher lock");
    counters.get(key).copied().unwrap_or(0)
}

/// Log every counter matching `filter`.
pub fn dump(filter: impl Fn(&str, i64) -> bool) {
    let counters = COUNTERS.lock().expect("watcher lock");
    log::info!("+{:-<40}|{:-<20}+", "", "");
    log::info!("|{:<40}|{:<20}|", "ObjectKey", "CurrentValue");
    for (key, value) in counters.iter() {
        if filter(key, *value) {
            log::info!("|{:<40}|{:<20}|", key, value);
        }
    }
    log::info!("+{:-<40}|{:-<20}+", "", "");
}

pub fn dump_all() {
    dump(|_, _| true);
}

/// Log only counters that have not returned to zero; non-empty output
/// after shutdown usually means a leak.
pub fn dump_non_zero() {
    dump(|_, value| value != 0);
}

/// Guard that increments `key` for its lifetime. Construct in debug builds
/// only; release builds keep the counters at zero.
pub struct CountGuard {
    key: &'static str,
}

impl CountGuard {
    pub fn new(key: &'static str) -> Self {
        inc(key);
        Self { key }
    }
}

impl Drop for CountGuard {
    fn drop(&mut self) {
        dec(self.key);
    }
}

/// Counter guard in debug builds, nothing in release builds.
#[cfg(debug_assertions)]
pub(crate) fn debug_count(key: &'static str) -> Option<CountGuard> {
    Some(CountGuard::new(key))
}

#[cfg(not(debug_assertions))]
pub(crate) fn debug_count(_key: &'static str) -> Option<CountGuard> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inc_dec_roundtrip() {
        const KEY: &str = "test.watcher.roundtrip";
        assert_eq!(get(KEY), 0);
        inc(KEY);
        inc_by(KEY, 2);
        assert_eq!(get(KEY), 3);
        dec_by(KEY, 3);
        assert_eq!(get(KEY), 0);
        del(KEY);
    }

    #[test]
    fn guard_restores_count_on_drop() {
        const KEY: &str = "test.watcher.guard";
        {
            let _guard = CountGuard::new(KEY);
            assert_eq!(get(KEY), 1);
        }
        assert_eq!(get(KEY), 0);
        del(KEY);
    }

    #[test]
    fn set_overwrites() {
        const KEY: &str = "test.watcher.set";
        set(KEY, 41);
        inc(KEY);
        assert_eq!(get(KEY), 42);
        del(KEY);
        assert_eq!(get(KEY), 0);
    }
}
