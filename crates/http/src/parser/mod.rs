//! Incremental HTTP/1.x request-head parser.
//!
//! The parser converts raw bytes in a connection's [`SourceBuf`] into a
//! [`Request`] (method, URI components, protocol version and the
//! ordered header list) in a single forward pass per byte, without
//! copying header text out of the buffer.
//!
//! # Incremental operation
//!
//! Scanning is restartable at any byte boundary. The async driver
//! ([`RequestParser::parse`]) refills the buffer from the socket
//! whenever the scanner runs dry, charging each refill against one
//! overall timeout budget; the scan then resumes exactly where it
//! stopped, so a request split across arbitrarily many TCP segments
//! parses identically to one that arrives whole.
//!
//! # Fast path
//!
//! A request line beginning with exactly `GET ` is first attempted by an
//! optimistic single-pass scanner covering the dominant
//! `GET /path?query HTTP/x.y` shape. If the line turns out to be
//! anything else (asterisk form, absolute URI, multi-digit version,
//! incomplete data), the parser rewinds to just after `GET ` and the
//! general algorithm takes over as the sole source of truth.
//!
//! # Outcomes
//!
//! Every failure is a [`ParseError`] value, never a panic: malformed
//! syntax, the head outgrowing the buffer, too many headers, an
//! unsupported protocol version, and the three transport outcomes
//! (timeout, I/O error, EOF) are all distinct.

use std::time::Duration;

use tokio::io::AsyncRead;

use crate::buffer::{SourceBuf, TimeoutBudget};
use crate::protocol::{ParseError, Request, VERSION_11};

mod fast_path;
mod machine;
mod scan;

use machine::{Machine, Step};

/// Tunables for one parser instance.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Hard cap on header lines; exceeding it is a parse failure, not a
    /// silent truncation.
    pub max_headers: usize,
    /// Highest accepted protocol version, encoded `major * 100 + minor`.
    pub max_version: u32,
    /// Discard any Cookie header containing an unbalanced double quote.
    /// Heuristic and lossy; kept for compatibility, off by default.
    pub strip_quoted_cookies: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { max_headers: 64, max_version: VERSION_11, strip_quoted_cookies: false }
    }
}

/// The request-head parser. Stateless between requests; one instance can
/// serve any number of connections.
#[derive(Debug, Default)]
pub struct RequestParser {
    config: ParserConfig,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parses one request head from `buf`, refilling from `io` as needed
    /// within `timeout`.
    ///
    /// On success the parsed head has been consumed from `buf`; any
    /// pipelined bytes of a following request remain buffered. On
    /// failure the buffer is left as-is for diagnostic inspection.
    pub async fn parse<R>(&self, io: &mut R, buf: &mut SourceBuf, timeout: Duration) -> Result<Request, ParseError>
    where
        R: AsyncRead + Unpin,
    {
        let mut budget = TimeoutBudget::new(timeout);
        let mut machine = Machine::new(&self.config);
        loop {
            match machine.advance(buf.as_mut_slice())? {
                Step::Complete(end) => {
                    let block = buf.split_headers(end);
                    return Ok(machine.finish(block));
                }
                Step::More => {
                    buf.refill(io, &mut budget).await?;
                }
            }
        }
    }

    /// Parses from already-buffered bytes only. Returns `Ok(None)` when
    /// the head is incomplete and the buffer can still grow.
    pub fn parse_buffered(&self, buf: &mut SourceBuf) -> Result<Option<Request>, ParseError> {
        let mut machine = Machine::new(&self.config);
        match machine.advance(buf.as_mut_slice())? {
            Step::Complete(end) => {
                let block = buf.split_headers(end);
                Ok(Some(machine.finish(block)))
            }
            Step::More => {
                if buf.len() >= buf.max_size() {
                    return Err(ParseError::too_large(buf.max_size()));
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyword::method;
    use crate::protocol::{HeaderId, VERSION_09};
    use indoc::indoc;

    fn parse(input: &str) -> Request {
        try_parse(input).expect("request must parse")
    }

    fn try_parse(input: &str) -> Result<Request, ParseError> {
        let mut buf = SourceBuf::new();
        buf.push_bytes(input.as_bytes());
        RequestParser::new().parse_buffered(&mut buf).map(|r| r.expect("head must be complete"))
    }

    #[test]
    fn fast_path_get_with_query() {
        let req = parse("GET /a/b?q=1 HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(req.method(), b"GET");
        assert_eq!(req.method_index(), Some(method::GET));
        assert_eq!(req.path(), b"/a/b");
        assert_eq!(req.query(), Some(&b"q=1"[..]));
        assert_eq!(req.uri(), b"/a/b?q=1");
        assert_eq!(req.version(), 101);
        assert_eq!(req.header_count(), 1);
        assert_eq!(req.header(HeaderId::Host), Some(&b"x"[..]));
        assert!(req.keep_alive());
        assert_eq!(req.request_line(), b"GET /a/b?q=1 HTTP/1.1\r\n");
    }

    #[test]
    fn http_09_bare_lf() {
        let mut buf = SourceBuf::new();
        buf.push_bytes(b"GET /\n\n");
        let req = RequestParser::new().parse_buffered(&mut buf).unwrap().unwrap();
        assert_eq!(req.version(), VERSION_09);
        assert_eq!(req.path(), b"/");
        assert_eq!(req.header_count(), 0);
        assert!(!req.keep_alive());
        // The stray second LF is not part of an HTTP/0.9 request.
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn from_curl() {
        let req = parse(indoc! {"
            GET /index.html HTTP/1.1\r
            Host: 127.0.0.1:8080\r
            User-Agent: curl/7.79.1\r
            Accept: */*\r
            \r
        "});
        assert_eq!(req.method_index(), Some(method::GET));
        assert_eq!(req.path(), b"/index.html");
        assert_eq!(req.query(), None);
        assert_eq!(req.host(), None);
        assert_eq!(req.header_count(), 3);
        assert_eq!(req.header(HeaderId::Host), Some(&b"127.0.0.1:8080"[..]));
        assert_eq!(req.header(HeaderId::UserAgent), Some(&b"curl/7.79.1"[..]));
        assert_eq!(req.header_named("accept"), Some(&b"*/*"[..]));
    }

    #[test]
    fn general_path_post() {
        let req = parse("POST /submit HTTP/1.0\r\nContent-Length: 5\r\n\r\n");
        assert_eq!(req.method(), b"POST");
        assert_eq!(req.method_index(), Some(method::POST));
        assert_eq!(req.version(), 100);
        assert_eq!(req.header(HeaderId::ContentLength), Some(&b"5"[..]));
        assert!(!req.keep_alive());
    }

    #[test]
    fn unknown_method_is_unregistered() {
        let req = parse("FROBNICATE / HTTP/1.1\r\n\r\n");
        assert_eq!(req.method(), b"FROBNICATE");
        assert_eq!(req.method_index(), None);
    }

    #[test]
    fn asterisk_form() {
        let req = parse("OPTIONS * HTTP/1.1\r\n\r\n");
        assert_eq!(req.method_index(), Some(method::OPTIONS));
        assert_eq!(req.uri(), b"*");
        assert_eq!(req.path(), b"*");
    }

    #[test]
    fn asterisk_with_trailing_garbage_is_rejected() {
        assert!(matches!(try_parse("GET *x HTTP/1.1\r\n\r\n"), Err(ParseError::BadRequest { .. })));
    }

    #[test]
    fn absolute_uri_form() {
        let req = parse("GET http://example.com:8080/dir/page?x=1 HTTP/1.1\r\n\r\n");
        assert_eq!(req.host(), Some(&b"example.com:8080"[..]));
        assert_eq!(req.path(), b"/dir/page");
        assert_eq!(req.query(), Some(&b"x=1"[..]));
        assert_eq!(req.uri(), b"http://example.com:8080/dir/page?x=1");
    }

    #[test]
    fn absolute_uri_https_without_path() {
        let req = parse("GET https://example.com HTTP/1.1\r\n\r\n");
        assert_eq!(req.host(), Some(&b"example.com"[..]));
        assert_eq!(req.path(), b"");
        assert_eq!(req.uri(), b"https://example.com");
    }

    #[test]
    fn connect_authority_form() {
        let req = parse("CONNECT example.com:443 HTTP/1.1\r\n\r\n");
        assert_eq!(req.method_index(), Some(method::CONNECT));
        assert_eq!(req.host(), Some(&b"example.com:443"[..]));
        assert_eq!(req.path(), b"");
    }

    #[test]
    fn continuation_folds_to_single_space() {
        let req = parse("GET / HTTP/1.1\r\nFoo: bar\r\n baz\r\n\r\n");
        assert_eq!(req.header_named("Foo"), Some(&b"bar baz"[..]));
    }

    #[test]
    fn continuation_with_deep_indent() {
        let req = parse("GET / HTTP/1.1\r\nFoo: bar\r\n\t   baz\r\n qux\r\n\r\n");
        assert_eq!(req.header_named("Foo"), Some(&b"bar baz qux"[..]));
    }

    #[test]
    fn continuation_of_an_empty_first_line() {
        let req = parse("GET / HTTP/1.1\r\nFoo:\r\n bar\r\n\r\n");
        assert_eq!(req.header_named("Foo"), Some(&b"bar"[..]));
    }

    #[test]
    fn trailing_whitespace_is_trimmed() {
        let req = parse("GET / HTTP/1.1\r\nFoo: bar   \r\n\r\n");
        assert_eq!(req.header_named("Foo"), Some(&b"bar"[..]));
    }

    #[test]
    fn empty_value() {
        let req = parse("GET / HTTP/1.1\r\nX-Empty:\r\nX-Blank: \r\n\r\n");
        assert_eq!(req.header_named("X-Empty"), Some(&b""[..]));
        assert_eq!(req.header_named("X-Blank"), Some(&b""[..]));
    }

    #[test]
    fn quoted_value_keeps_interior_whitespace() {
        let req = parse("GET / HTTP/1.1\r\nX-Q: \"a  b\\\" c\"  \r\n\r\n");
        assert_eq!(req.header_named("X-Q"), Some(&b"\"a  b\\\" c\""[..]));
    }

    #[test]
    fn comment_value_with_parens() {
        let req = parse("GET / HTTP/1.1\r\nUser-Agent: Mozilla/5.0 (Macintosh; Intel)\r\n\r\n");
        assert_eq!(req.header(HeaderId::UserAgent), Some(&b"Mozilla/5.0 (Macintosh; Intel)"[..]));
    }

    #[test]
    fn too_many_headers_is_not_a_silent_drop() {
        let mut text = String::from("GET / HTTP/1.1\r\n");
        for i in 0..65 {
            text.push_str(&format!("X-H{i}: v\r\n"));
        }
        text.push_str("\r\n");
        let mut buf = SourceBuf::with_max_size(64 * 1024);
        buf.push_bytes(text.as_bytes());
        let err = RequestParser::new().parse_buffered(&mut buf).unwrap_err();
        assert!(matches!(err, ParseError::TooManyHeaders { max_num: 64 }));
    }

    #[test]
    fn version_ceiling() {
        let err = try_parse("GET / HTTP/2.0\r\n\r\n").unwrap_err();
        assert!(matches!(err, ParseError::VersionNotSupported { major: 2, minor: 0 }));
    }

    #[test]
    fn multi_digit_version_general_path() {
        let req = parse("GET / HTTP/1.01\r\n\r\n");
        assert_eq!(req.version(), 101);
    }

    #[test]
    fn preamble_tolerance_is_bounded() {
        let req = parse("\r\n\r\nGET / HTTP/1.1\r\n\r\n");
        assert_eq!(req.path(), b"/");

        let err = try_parse("\r\n\r\n\nGET / HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, ParseError::BadRequest { .. }));
    }

    #[test]
    fn duplicate_header_first_occurrence_wins() {
        let req = parse("GET / HTTP/1.1\r\nHost: first\r\nHost: second\r\n\r\n");
        assert_eq!(req.header(HeaderId::Host), Some(&b"first"[..]));
        let all: Vec<_> = req.header_values(HeaderId::Host).collect();
        assert_eq!(all, vec![&b"first"[..], &b"second"[..]]);
    }

    #[test]
    fn pipelined_requests_parse_in_sequence() {
        let mut buf = SourceBuf::new();
        buf.push_bytes(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\nHost: b\r\n\r\n");
        let parser = RequestParser::new();
        let first = parser.parse_buffered(&mut buf).unwrap().unwrap();
        assert_eq!(first.path(), b"/one");
        let second = parser.parse_buffered(&mut buf).unwrap().unwrap();
        assert_eq!(second.path(), b"/two");
        assert_eq!(second.header(HeaderId::Host), Some(&b"b"[..]));
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_head_needs_more() {
        let mut buf = SourceBuf::new();
        buf.push_bytes(b"GET / HTTP/1.1\r\nHost: unfini");
        assert!(RequestParser::new().parse_buffered(&mut buf).unwrap().is_none());
    }

    #[test]
    fn whitespace_before_colon_is_rejected() {
        assert!(matches!(try_parse("GET / HTTP/1.1\r\nBad : v\r\n\r\n"), Err(ParseError::BadRequest { .. })));
    }

    #[test]
    fn continuation_without_prior_header_is_rejected() {
        assert!(matches!(try_parse("GET / HTTP/1.1\r\n folded\r\n\r\n"), Err(ParseError::BadRequest { .. })));
    }

    #[test]
    fn missing_uri_is_rejected() {
        assert!(matches!(try_parse("GET\r\n\r\n"), Err(ParseError::BadRequest { .. })));
        assert!(matches!(try_parse("HEAD  \r\n\r\n"), Err(ParseError::BadRequest { .. })));
    }

    #[test]
    fn cookie_quote_heuristic_is_config_gated() {
        let raw = "GET / HTTP/1.1\r\nCookie: name=\"broken\r\nHost: x\r\n\r\n";

        let permissive = parse(raw);
        assert_eq!(permissive.header(HeaderId::Cookie), Some(&b"name=\"broken"[..]));

        let config = ParserConfig { strip_quoted_cookies: true, ..ParserConfig::default() };
        let mut buf = SourceBuf::new();
        buf.push_bytes(raw.as_bytes());
        let req = RequestParser::with_config(config).parse_buffered(&mut buf).unwrap().unwrap();
        assert_eq!(req.header(HeaderId::Cookie), None);
        assert_eq!(req.header(HeaderId::Host), Some(&b"x"[..]));
    }

    #[test]
    fn head_larger_than_buffer_is_too_large() {
        let mut buf = SourceBuf::with_max_size(32);
        buf.push_bytes(b"GET / HTTP/1.1\r\nX-Fill: aaaaaaaaaaaaaaaa");
        let err = RequestParser::new().parse_buffered(&mut buf).unwrap_err();
        assert!(matches!(err, ParseError::TooLarge { max_bytes: 32 }));
    }
}
