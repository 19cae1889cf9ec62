use http::StatusCode;
use std::io;
use thiserror::Error;

/// Terminal outcome of a failed request-head parse.
///
/// Every scanning step returns one of these immediately; the parser never
/// panics and never throws through a request. The variants split into two
/// classes (see [`ParseError::is_syntax`] and [`ParseError::is_transport`]):
/// syntax failures, where the caller may still send an HTTP error
/// response, and transport failures, where the connection is simply
/// closed.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Malformed request syntax. `offset` is the byte position within the
    /// read buffer at which scanning stopped; partially parsed views are
    /// meaningful only up to that offset (diagnostic logging).
    #[error("malformed request head at byte {offset}")]
    BadRequest { offset: usize },

    /// The head did not complete within the buffer's configured maximum.
    #[error("request head exceeds the {max_bytes} byte limit")]
    TooLarge { max_bytes: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    /// Protocol version above the configured ceiling.
    #[error("http version {major}.{minor} not supported")]
    VersionNotSupported { major: u32, minor: u32 },

    /// The refill timeout budget ran out before the head completed.
    #[error("timed out reading request head")]
    Timeout,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Clean peer close before the head completed.
    #[error("connection closed before request head completed")]
    Eof,
}

impl ParseError {
    pub fn bad_request(offset: usize) -> Self {
        Self::BadRequest { offset }
    }

    pub fn too_large(max_bytes: usize) -> Self {
        Self::TooLarge { max_bytes }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn version_not_supported(major: u32, minor: u32) -> Self {
        Self::VersionNotSupported { major, minor }
    }

    /// Syntax-class failure: the peer spoke, but spoke wrongly. The
    /// caller may answer with [`response_status`](Self::response_status).
    pub fn is_syntax(&self) -> bool {
        matches!(
            self,
            Self::BadRequest { .. } | Self::TooLarge { .. } | Self::TooManyHeaders { .. } | Self::VersionNotSupported { .. }
        )
    }

    /// Transport-class failure: no HTTP response is attempted, the
    /// connection is closed.
    pub fn is_transport(&self) -> bool {
        !self.is_syntax()
    }

    /// The HTTP status a surrounding request processor should answer
    /// with, when one applies.
    pub fn response_status(&self) -> Option<StatusCode> {
        match self {
            Self::BadRequest { .. } => Some(StatusCode::BAD_REQUEST),
            Self::TooLarge { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            Self::TooManyHeaders { .. } => Some(StatusCode::BAD_REQUEST),
            Self::VersionNotSupported { .. } => Some(StatusCode::HTTP_VERSION_NOT_SUPPORTED),
            _ => None,
        }
    }
}
