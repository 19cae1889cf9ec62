//! Known request-header classification.
//!
//! Header field names are interned through the same keyword machinery as
//! methods; the headers the server core actually consults get a dense
//! [`HeaderId`] so the parsed request can keep an O(1) first-occurrence
//! slot per name.

use once_cell::sync::Lazy;

use crate::keyword::KeywordSet;

/// Headers with a dedicated first-occurrence slot in the parsed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderId {
    CacheControl = 0,
    Connection,
    ContentLength,
    Cookie,
    Host,
    IfMatch,
    IfModifiedSince,
    IfNoneMatch,
    IfRange,
    IfUnmodifiedSince,
    Pragma,
    Range,
    Referer,
    TransferEncoding,
    UserAgent,
}

impl HeaderId {
    pub const COUNT: usize = 15;

    const ALL: [HeaderId; Self::COUNT] = [
        HeaderId::CacheControl,
        HeaderId::Connection,
        HeaderId::ContentLength,
        HeaderId::Cookie,
        HeaderId::Host,
        HeaderId::IfMatch,
        HeaderId::IfModifiedSince,
        HeaderId::IfNoneMatch,
        HeaderId::IfRange,
        HeaderId::IfUnmodifiedSince,
        HeaderId::Pragma,
        HeaderId::Range,
        HeaderId::Referer,
        HeaderId::TransferEncoding,
        HeaderId::UserAgent,
    ];

    /// Canonical field name text.
    pub fn name(&self) -> &'static str {
        match self {
            HeaderId::CacheControl => "Cache-Control",
            HeaderId::Connection => "Connection",
            HeaderId::ContentLength => "Content-Length",
            HeaderId::Cookie => "Cookie",
            HeaderId::Host => "Host",
            HeaderId::IfMatch => "If-Match",
            HeaderId::IfModifiedSince => "If-Modified-Since",
            HeaderId::IfNoneMatch => "If-None-Match",
            HeaderId::IfRange => "If-Range",
            HeaderId::IfUnmodifiedSince => "If-Unmodified-Since",
            HeaderId::Pragma => "Pragma",
            HeaderId::Range => "Range",
            HeaderId::Referer => "Referer",
            HeaderId::TransferEncoding => "Transfer-Encoding",
            HeaderId::UserAgent => "User-Agent",
        }
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }

    /// Maps a keyword-namespace index (as defined by [`known_headers`])
    /// back to its id.
    pub(crate) fn from_keyword_index(index: u32) -> Option<Self> {
        Self::ALL.get(index.checked_sub(1)? as usize).copied()
    }

    fn keyword_index(self) -> u32 {
        self as u32 + 1
    }
}

static KNOWN_HEADERS: Lazy<KeywordSet> = Lazy::new(|| {
    let set = KeywordSet::with_capacity(HeaderId::COUNT);
    for id in HeaderId::ALL {
        set.define(id.name(), Some(id.keyword_index())).expect("fresh namespace");
    }
    set.optimize();
    set
});

/// The process-wide namespace of header names the core classifies.
pub fn known_headers() -> &'static KeywordSet {
    &KNOWN_HEADERS
}
