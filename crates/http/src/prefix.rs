//! Response-prefix encoding for replayed (cached) responses.
//!
//! A cached response carries its headers pre-formatted; only two headers
//! must be regenerated per hit: `Date` (the moment of this response, not
//! the cached one) and `Connection` (the live negotiated keep-alive
//! state, not the cached peer's). This module serializes the status
//! line plus those two headers and then appends the cached header block
//! byte-for-byte.

use bytes::{BufMut, BytesMut};
use http::StatusCode;
use std::io::{self, Write};

/// Initial buffer size reserved for a response prefix.
const INIT_PREFIX_SIZE: usize = 512;

/// Serializes the replay prefix into `dst`.
///
/// `reason` is the cached status text; `date` is the current formatted
/// HTTP date (see `strand-accel`'s date service); `tail` is the cached
/// pre-formatted header block, which must include its terminating blank
/// line.
pub fn encode_prefix(dst: &mut BytesMut, status: StatusCode, reason: &str, date: &[u8], keep_alive: bool, tail: &[u8]) {
    dst.reserve(INIT_PREFIX_SIZE + tail.len());

    let mut w = FastWrite(dst);
    write!(w, "HTTP/1.1 {} {}\r\n", status.as_str(), reason).expect("writes to BytesMut cannot fail");

    dst.put_slice(b"Date: ");
    dst.put_slice(date);
    dst.put_slice(b"\r\n");

    dst.put_slice(b"Connection: ");
    dst.put_slice(if keep_alive { b"keep-alive".as_slice() } else { b"close".as_slice() });
    dst.put_slice(b"\r\n");

    dst.put_slice(tail);
}

/// Write adapter over `BytesMut`; space is reserved up front, so these
/// writes never fail.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
