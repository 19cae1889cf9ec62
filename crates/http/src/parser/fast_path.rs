//! Optimistic single-pass parse of the dominant request shape.
//!
//! When the request line starts with exactly `GET `, this attempts to
//! take the whole line in one forward pass: abs_path, optional query,
//! optional single-digit `HTTP/x.y`, EOL. Anything else (asterisk or
//! absolute-URI targets, multi-digit versions, stray whitespace,
//! incomplete data) returns `None` and the caller rewinds to just after
//! `GET ` and runs the general algorithm, which is the sole source of
//! truth whenever the fast path does not fully succeed.

use crate::protocol::VERSION_09;
use crate::span::Span;

use super::scan;

#[derive(Debug)]
pub(crate) struct FastLine {
    pub abs_path: Span,
    pub query: Option<Span>,
    /// End of the request-URI (abs_path plus query).
    pub uri_end: usize,
    pub version: u32,
    /// One past the LF terminating the request line.
    pub end: usize,
}

/// `start` points at the `G` of a verified `GET ` prefix.
pub(crate) fn try_fast_get(data: &[u8], start: usize) -> Option<FastLine> {
    let path_start = start + 4;
    let mut i = path_start;
    if i >= data.len() || data[i] != b'/' {
        return None;
    }

    while i < data.len() {
        match data[i] {
            b' ' | b'?' | b'\r' | b'\n' => break,
            b if scan::is_ctl(b) => return None,
            _ => i += 1,
        }
    }
    if i >= data.len() {
        return None;
    }
    let abs_path = Span::new(path_start, i);

    let mut query = None;
    if data[i] == b'?' {
        i += 1;
        let query_start = i;
        while i < data.len() {
            match data[i] {
                b' ' | b'\r' | b'\n' => break,
                b if scan::is_ctl(b) => return None,
                _ => i += 1,
            }
        }
        if i >= data.len() {
            return None;
        }
        query = Some(Span::new(query_start, i));
    }
    let uri_end = i;

    match data[i] {
        b'\r' | b'\n' => {
            let end = eol(data, i)?;
            Some(FastLine { abs_path, query, uri_end, version: VERSION_09, end })
        }
        b' ' => {
            i += 1;
            let rest = data.get(i..i + 8)?;
            if &rest[..5] != b"HTTP/" || !rest[5].is_ascii_digit() || rest[6] != b'.' || !rest[7].is_ascii_digit() {
                return None;
            }
            let version = u32::from(rest[5] - b'0') * 100 + u32::from(rest[7] - b'0');
            let end = eol(data, i + 8)?;
            Some(FastLine { abs_path, query, uri_end, version, end })
        }
        _ => None,
    }
}

fn eol(data: &[u8], i: usize) -> Option<usize> {
    match *data.get(i)? {
        b'\n' => Some(i + 1),
        b'\r' if *data.get(i + 1)? == b'\n' => Some(i + 2),
        _ => None,
    }
}
