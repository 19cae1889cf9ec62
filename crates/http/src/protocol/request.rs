//! The parsed request head: zero-copy views plus derived fields.
//!
//! A [`Request`] owns the frozen [`HeaderBlock`] its parse produced and
//! resolves every field lazily from spans into that block. Nothing is
//! copied out of the original socket bytes; cloning the request is cheap.

use crate::protocol::header_name::HeaderId;
use crate::span::{HeaderBlock, Span};

/// Sentinel protocol version for requests with no protocol token.
pub const VERSION_09: u32 = 9;
/// HTTP/1.0 encoded as `major * 100 + minor`.
pub const VERSION_10: u32 = 100;
/// HTTP/1.1 encoded as `major * 100 + minor`.
pub const VERSION_11: u32 = 101;

/// One header line: field name, folded/trimmed value, and its resolved
/// id when the name is one the core classifies.
#[derive(Debug, Clone, Copy)]
pub struct HeaderEntry {
    pub(crate) name: Span,
    pub(crate) value: Span,
    pub(crate) id: Option<HeaderId>,
}

/// Ordered header collection with O(1) first-occurrence slots for known
/// headers.
///
/// Duplicates of a known header are kept in insertion order and reachable
/// via [`Request::header_values`]; the first occurrence alone feeds the
/// named shortcut accessors and all conditional logic built on them.
#[derive(Debug, Clone, Default)]
pub struct HeaderList {
    entries: Vec<HeaderEntry>,
    first: [Option<u16>; HeaderId::COUNT],
}

impl HeaderList {
    pub(crate) fn push(&mut self, entry: HeaderEntry) {
        if let Some(id) = entry.id {
            let slot = &mut self.first[id.slot()];
            if slot.is_none() {
                *slot = Some(self.entries.len() as u16);
            }
        }
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn first_of(&self, id: HeaderId) -> Option<&HeaderEntry> {
        self.first[id.slot()].map(|i| &self.entries[i as usize])
    }
}

/// A fully parsed request head.
#[derive(Debug, Clone)]
pub struct Request {
    block: HeaderBlock,
    line: Span,
    method: Span,
    method_index: Option<u32>,
    uri: Span,
    abs_path: Span,
    query: Option<Span>,
    host: Option<Span>,
    version: u32,
    headers: HeaderList,
    keep_alive: bool,
}

/// Raw parse output; assembled by the parser, finished into a [`Request`].
#[derive(Debug, Default)]
pub(crate) struct RequestParts {
    pub line: Span,
    pub method: Span,
    pub method_index: Option<u32>,
    pub uri: Span,
    pub abs_path: Span,
    pub query: Option<Span>,
    pub host: Option<Span>,
    pub version: u32,
    pub headers: HeaderList,
}

impl Request {
    pub(crate) fn from_parts(block: HeaderBlock, parts: RequestParts) -> Self {
        let connection = parts
            .headers
            .first_of(HeaderId::Connection)
            .map(|e| block.get(e.value));
        let keep_alive = derive_keep_alive(parts.version, connection);
        Self {
            block,
            line: parts.line,
            method: parts.method,
            method_index: parts.method_index,
            uri: parts.uri,
            abs_path: parts.abs_path,
            query: parts.query,
            host: parts.host,
            version: parts.version,
            headers: parts.headers,
            keep_alive,
        }
    }

    /// The entire `METHOD URI PROTOCOL\r\n` text.
    pub fn request_line(&self) -> &[u8] {
        self.block.get(self.line)
    }

    pub fn method(&self) -> &[u8] {
        self.block.get(self.method)
    }

    /// Interned method code from the method namespace, or `None` when
    /// the method is syntactically valid but unregistered. See
    /// [`register_method`](crate::keyword::register_method).
    pub fn method_index(&self) -> Option<u32> {
        self.method_index
    }

    /// The request-URI exactly as sent (absolute-URI requests include
    /// scheme and host).
    pub fn uri(&self) -> &[u8] {
        self.block.get(self.uri)
    }

    /// The abs_path component; empty for authority-form targets.
    pub fn path(&self) -> &[u8] {
        self.block.get(self.abs_path)
    }

    pub fn query(&self) -> Option<&[u8]> {
        self.query.map(|s| self.block.get(s))
    }

    /// Host from an absolute-URI or authority-form target; `None` for
    /// origin-form requests (use the `Host` header instead).
    pub fn host(&self) -> Option<&[u8]> {
        self.host.map(|s| self.block.get(s))
    }

    /// Protocol version encoded as `major * 100 + minor`; [`VERSION_09`]
    /// when the request carried no protocol token.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether the client asked to keep the connection open, derived from
    /// the protocol version and the first `Connection` header.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    pub fn header_list(&self) -> &HeaderList {
        &self.headers
    }

    /// First occurrence of a known header, if present.
    pub fn header(&self, id: HeaderId) -> Option<&[u8]> {
        self.headers.first_of(id).map(|e| self.block.get(e.value))
    }

    /// Every occurrence of a known header, in insertion order.
    pub fn header_values(&self, id: HeaderId) -> impl Iterator<Item = &[u8]> {
        self.headers.entries.iter().filter(move |e| e.id == Some(id)).map(|e| self.block.get(e.value))
    }

    /// Linear case-insensitive lookup by field name; first match wins.
    pub fn header_named(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .entries
            .iter()
            .find(|e| self.block.get(e.name).eq_ignore_ascii_case(name.as_bytes()))
            .map(|e| self.block.get(e.value))
    }

    /// All header lines as `(name, value)` pairs, in insertion order.
    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers.entries.iter().map(|e| (self.block.get(e.name), self.block.get(e.value)))
    }
}

/// Keep-alive negotiation: HTTP/1.1+ defaults on unless `close` appears;
/// HTTP/1.0 defaults off unless `keep-alive` appears; HTTP/0.9 is always
/// one-shot.
fn derive_keep_alive(version: u32, connection: Option<&[u8]>) -> bool {
    match version {
        VERSION_09 => false,
        v if v >= VERSION_11 => !connection_has_token(connection, b"close"),
        _ => connection_has_token(connection, b"keep-alive"),
    }
}

/// Scans the (possibly comma-separated) Connection value for a token.
/// The whole-value comparison covers the overwhelmingly common single
/// token form without tokenizing.
fn connection_has_token(connection: Option<&[u8]>, token: &[u8]) -> bool {
    let Some(value) = connection else { return false };
    if value.eq_ignore_ascii_case(token) {
        return true;
    }
    value.split(|&b| b == b',').any(|t| t.trim_ascii().eq_ignore_ascii_case(token))
}
