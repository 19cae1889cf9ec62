//! The incremental, restartable scan over the read buffer.
//!
//! [`Machine`] consumes bytes one forward pass at a time and can stop at
//! any byte boundary: when the buffer runs dry it reports
//! [`Step::More`], keeping every intermediate offset, rolling hash and
//! value sub-state, so the driver can refill the buffer and resume
//! exactly where scanning stopped. Header continuation lines are folded
//! in place inside the buffer (a single-space join compacted by a write
//! cursor), which is why the machine scans over `&mut [u8]`.

use tracing::trace;

use crate::ensure;
use crate::keyword::{hash_byte, methods};
use crate::protocol::{HeaderEntry, HeaderId, ParseError, RequestParts, VERSION_09, known_headers};
use crate::span::{HeaderBlock, Span};

use super::ParserConfig;
use super::fast_path;
use super::scan::{is_ctl, is_token, is_ws};

/// Stray `\r`/`\n` bytes tolerated ahead of the method, for pipelined or
/// broken clients. Bounded so garbage can not spin the scanner.
const MAX_PREAMBLE_BYTES: usize = 4;

/// Cap on accumulated version components; anything larger is over every
/// supportable ceiling anyway.
const VERSION_COMPONENT_CAP: u32 = 9999;

pub(crate) enum Step {
    /// Head complete; the value is one past the final LF.
    Complete(usize),
    /// Out of bytes; refill and call `advance` again.
    More,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    Probe,
    Method,
    AfterMethod,
    UriStart,
    UriScheme,
    UriHost,
    UriPath,
    UriQuery,
    UriStar,
    AfterUri,
    ProtoName,
    ProtoMajor,
    ProtoMinor,
    ProtoTrail,
    LineCr,
    FieldStart,
    FieldName,
    ValueLeadingWs,
    Value,
    ValueCr,
    Continuation,
    FoldWs,
    HeadersCr,
    Done(usize),
}

/// Sub-state of one header value scan, including the in-place fold
/// compaction cursor.
#[derive(Debug, Default, Clone, Copy)]
struct ValueScan {
    start: usize,
    /// Next write position; trails the read position once a fold
    /// occurred and bytes are being compacted left.
    write: usize,
    /// Exclusive end of the last non-whitespace byte written; the value
    /// span ends here, which trims trailing whitespace without touching
    /// the bytes.
    last: usize,
    quote: bool,
    comment: u32,
    escape: bool,
    folded: bool,
    quotes_seen: u32,
}

impl ValueScan {
    fn start_at(pos: usize) -> Self {
        Self { start: pos, write: pos, last: pos, ..Self::default() }
    }

    fn emit(&mut self, data: &mut [u8], b: u8) {
        if self.folded {
            data[self.write] = b;
        }
        self.write += 1;
        if !is_ws(b) {
            self.last = self.write;
        }
    }
}

pub(crate) struct Machine<'c> {
    cfg: &'c ParserConfig,
    state: State,
    pos: usize,
    hash: u32,
    tok_start: usize,
    line_start: usize,
    preamble: usize,
    uri_start: usize,
    path_start: usize,
    query_start: usize,
    host_start: usize,
    scheme_https: Option<bool>,
    major: u32,
    minor: u32,
    proto_digits: bool,
    cur: ValueScan,
    cur_name: Span,
    cur_id: Option<HeaderId>,
    parts: RequestParts,
}

impl<'c> Machine<'c> {
    pub(crate) fn new(cfg: &'c ParserConfig) -> Self {
        Self {
            cfg,
            state: State::Preamble,
            pos: 0,
            hash: 0,
            tok_start: 0,
            line_start: 0,
            preamble: 0,
            uri_start: 0,
            path_start: 0,
            query_start: 0,
            host_start: 0,
            scheme_https: None,
            major: 0,
            minor: 0,
            proto_digits: false,
            cur: ValueScan::default(),
            cur_name: Span::default(),
            cur_id: None,
            parts: RequestParts::default(),
        }
    }

    /// Runs the scan forward until the head completes or the buffer runs
    /// dry. Resumable: call again with the same (possibly longer) buffer.
    pub(crate) fn advance(&mut self, data: &mut [u8]) -> Result<Step, ParseError> {
        loop {
            if let State::Done(end) = self.state {
                return Ok(Step::Complete(end));
            }
            if self.pos >= data.len() {
                return Ok(Step::More);
            }
            let b = data[self.pos];

            match self.state {
                State::Preamble => {
                    if b == b'\r' || b == b'\n' {
                        self.preamble += 1;
                        ensure!(self.preamble <= MAX_PREAMBLE_BYTES, self.bad_request());
                        self.pos += 1;
                    } else {
                        self.line_start = self.pos;
                        self.state = State::Probe;
                    }
                }

                State::Probe => {
                    if data.len() - self.pos < 4 {
                        return Ok(Step::More);
                    }
                    if &data[self.pos..self.pos + 4] == b"GET " {
                        match fast_path::try_fast_get(data, self.pos) {
                            Some(line) => self.accept_fast_line(line)?,
                            None => {
                                // Rewind to just after "GET "; the general
                                // algorithm takes over from the URI.
                                self.parts.method = Span::new(self.pos, self.pos + 3);
                                self.parts.method_index = Some(crate::keyword::method::GET);
                                self.pos += 4;
                                self.state = State::AfterMethod;
                            }
                        }
                    } else {
                        self.tok_start = self.pos;
                        self.hash = 0;
                        self.state = State::Method;
                    }
                }

                State::Method => {
                    if is_token(b) {
                        self.hash = hash_byte(self.hash, b);
                        self.pos += 1;
                    } else if is_ws(b) {
                        ensure!(self.pos > self.tok_start, self.bad_request());
                        self.parts.method = Span::new(self.tok_start, self.pos);
                        self.parts.method_index = methods().lookup(&data[self.tok_start..self.pos], true, self.hash);
                        self.state = State::AfterMethod;
                    } else {
                        return Err(self.bad_request());
                    }
                }

                State::AfterMethod => {
                    if is_ws(b) {
                        self.pos += 1;
                    } else if b == b'\r' || b == b'\n' {
                        return Err(self.bad_request());
                    } else {
                        self.uri_start = self.pos;
                        self.state = State::UriStart;
                    }
                }

                State::UriStart => match b {
                    b'/' => {
                        self.path_start = self.pos;
                        self.state = State::UriPath;
                    }
                    b'*' => self.state = State::UriStar,
                    b if b.is_ascii_alphanumeric() => {
                        self.scheme_https = None;
                        self.state = State::UriScheme;
                    }
                    _ => return Err(self.bad_request()),
                },

                State::UriStar => {
                    if data.len() - self.pos < 2 {
                        return Ok(Step::More);
                    }
                    let next = data[self.pos + 1];
                    ensure!(is_ws(next) || next == b'\r' || next == b'\n', self.bad_request());
                    self.parts.abs_path = Span::new(self.pos, self.pos + 1);
                    self.parts.uri = Span::new(self.pos, self.pos + 1);
                    self.pos += 1;
                    self.state = State::AfterUri;
                }

                State::UriScheme => {
                    // Incremental match against "http://" / "https://";
                    // the first mismatch reinterprets the run as an
                    // authority-form host, without rescanning.
                    let idx = self.pos - self.uri_start;
                    let expected = match (idx, self.scheme_https) {
                        (0..=3, _) => Some(b"http"[idx]),
                        (4, None) => None,
                        (5..=6, Some(false)) => Some(b"//"[idx - 5]),
                        (5, Some(true)) => Some(b':'),
                        (6..=7, Some(true)) => Some(b'/'),
                        _ => None,
                    };
                    match (idx, expected) {
                        (4, None) => {
                            if b == b':' {
                                self.scheme_https = Some(false);
                                self.pos += 1;
                            } else if b | 0x20 == b's' {
                                self.scheme_https = Some(true);
                                self.pos += 1;
                            } else {
                                self.host_start = self.uri_start;
                                self.state = State::UriHost;
                            }
                        }
                        (_, Some(expected)) if b | 0x20 == expected | 0x20 => {
                            self.pos += 1;
                            let done = match self.scheme_https {
                                Some(false) => idx == 6,
                                Some(true) => idx == 7,
                                None => false,
                            };
                            if done {
                                self.host_start = self.pos;
                                self.state = State::UriHost;
                            }
                        }
                        _ => {
                            self.host_start = self.uri_start;
                            self.state = State::UriHost;
                        }
                    }
                }

                State::UriHost => match b {
                    b'/' => {
                        self.parts.host = Some(Span::new(self.host_start, self.pos));
                        self.path_start = self.pos;
                        self.state = State::UriPath;
                    }
                    b'?' => {
                        self.parts.host = Some(Span::new(self.host_start, self.pos));
                        self.parts.abs_path = Span::empty_at(self.pos);
                        self.query_start = self.pos + 1;
                        self.pos += 1;
                        self.state = State::UriQuery;
                    }
                    b if is_ws(b) => {
                        self.parts.host = Some(Span::new(self.host_start, self.pos));
                        self.parts.abs_path = Span::empty_at(self.pos);
                        self.finish_uri();
                        self.state = State::AfterUri;
                    }
                    b'\r' | b'\n' => {
                        self.parts.host = Some(Span::new(self.host_start, self.pos));
                        self.parts.abs_path = Span::empty_at(self.pos);
                        self.finish_uri();
                        self.line_eol_without_protocol(b)?;
                    }
                    b if is_ctl(b) => return Err(self.bad_request()),
                    _ => self.pos += 1,
                },

                State::UriPath => match b {
                    b'?' => {
                        self.parts.abs_path = Span::new(self.path_start, self.pos);
                        self.query_start = self.pos + 1;
                        self.pos += 1;
                        self.state = State::UriQuery;
                    }
                    b if is_ws(b) => {
                        self.parts.abs_path = Span::new(self.path_start, self.pos);
                        self.finish_uri();
                        self.state = State::AfterUri;
                    }
                    b'\r' | b'\n' => {
                        self.parts.abs_path = Span::new(self.path_start, self.pos);
                        self.finish_uri();
                        self.line_eol_without_protocol(b)?;
                    }
                    b if is_ctl(b) => return Err(self.bad_request()),
                    _ => self.pos += 1,
                },

                State::UriQuery => match b {
                    b if is_ws(b) => {
                        self.parts.query = Some(Span::new(self.query_start, self.pos));
                        self.finish_uri();
                        self.state = State::AfterUri;
                    }
                    b'\r' | b'\n' => {
                        self.parts.query = Some(Span::new(self.query_start, self.pos));
                        self.finish_uri();
                        self.line_eol_without_protocol(b)?;
                    }
                    b if is_ctl(b) => return Err(self.bad_request()),
                    _ => self.pos += 1,
                },

                State::AfterUri => {
                    if is_ws(b) {
                        self.pos += 1;
                    } else if b == b'\r' || b == b'\n' {
                        self.line_eol_without_protocol(b)?;
                    } else {
                        self.tok_start = self.pos;
                        self.state = State::ProtoName;
                    }
                }

                State::ProtoName => {
                    let idx = self.pos - self.tok_start;
                    ensure!(b == b"HTTP/"[idx], self.bad_request());
                    self.pos += 1;
                    if idx == 4 {
                        self.major = 0;
                        self.minor = 0;
                        self.proto_digits = false;
                        self.state = State::ProtoMajor;
                    }
                }

                State::ProtoMajor => match b {
                    b'0'..=b'9' => {
                        self.major = (self.major * 10 + u32::from(b - b'0')).min(VERSION_COMPONENT_CAP);
                        self.proto_digits = true;
                        self.pos += 1;
                    }
                    b'.' => {
                        ensure!(self.proto_digits, self.bad_request());
                        self.proto_digits = false;
                        self.pos += 1;
                        self.state = State::ProtoMinor;
                    }
                    _ => return Err(self.bad_request()),
                },

                State::ProtoMinor => match b {
                    b'0'..=b'9' => {
                        self.minor = (self.minor * 10 + u32::from(b - b'0')).min(VERSION_COMPONENT_CAP);
                        self.proto_digits = true;
                        self.pos += 1;
                    }
                    b if is_ws(b) => {
                        ensure!(self.proto_digits, self.bad_request());
                        self.set_version()?;
                        self.state = State::ProtoTrail;
                    }
                    b'\r' => {
                        ensure!(self.proto_digits, self.bad_request());
                        self.set_version()?;
                        self.pos += 1;
                        self.state = State::LineCr;
                    }
                    b'\n' => {
                        ensure!(self.proto_digits, self.bad_request());
                        self.set_version()?;
                        self.complete_line(self.pos + 1);
                    }
                    _ => return Err(self.bad_request()),
                },

                State::ProtoTrail => match b {
                    b if is_ws(b) => self.pos += 1,
                    b'\r' => {
                        self.pos += 1;
                        self.state = State::LineCr;
                    }
                    b'\n' => self.complete_line(self.pos + 1),
                    _ => return Err(self.bad_request()),
                },

                State::LineCr => {
                    ensure!(b == b'\n', self.bad_request());
                    self.complete_line(self.pos + 1);
                }

                State::FieldStart => match b {
                    b'\r' => {
                        self.pos += 1;
                        self.state = State::HeadersCr;
                    }
                    b'\n' => self.complete_headers(self.pos + 1),
                    b if is_ws(b) => return Err(self.bad_request()),
                    b if is_token(b) => {
                        ensure!(
                            self.parts.headers.len() < self.cfg.max_headers,
                            ParseError::too_many_headers(self.cfg.max_headers)
                        );
                        self.tok_start = self.pos;
                        self.hash = 0;
                        self.state = State::FieldName;
                    }
                    _ => return Err(self.bad_request()),
                },

                State::FieldName => {
                    if is_token(b) {
                        self.hash = hash_byte(self.hash, b);
                        self.pos += 1;
                    } else if b == b':' {
                        self.cur_name = Span::new(self.tok_start, self.pos);
                        self.cur_id = known_headers()
                            .lookup(&data[self.tok_start..self.pos], false, self.hash)
                            .and_then(HeaderId::from_keyword_index);
                        self.pos += 1;
                        self.state = State::ValueLeadingWs;
                    } else {
                        return Err(self.bad_request());
                    }
                }

                State::ValueLeadingWs => {
                    if is_ws(b) {
                        self.pos += 1;
                    } else if b == b'\r' {
                        self.cur = ValueScan::start_at(self.pos);
                        self.pos += 1;
                        self.state = State::ValueCr;
                    } else if b == b'\n' {
                        self.cur = ValueScan::start_at(self.pos);
                        self.pos += 1;
                        self.state = State::Continuation;
                    } else {
                        self.cur = ValueScan::start_at(self.pos);
                        self.state = State::Value;
                    }
                }

                State::Value => {
                    if self.cur.escape {
                        self.cur.escape = false;
                        self.cur.emit(data, b);
                        self.pos += 1;
                    } else {
                        match b {
                            b'\r' => {
                                self.pos += 1;
                                self.state = State::ValueCr;
                            }
                            b'\n' => {
                                self.pos += 1;
                                self.state = State::Continuation;
                            }
                            b'\\' if self.cur.quote || self.cur.comment > 0 => {
                                self.cur.escape = true;
                                self.cur.emit(data, b);
                                self.pos += 1;
                            }
                            b'"' if self.cur.comment == 0 => {
                                self.cur.quote = !self.cur.quote;
                                self.cur.quotes_seen += 1;
                                self.cur.emit(data, b);
                                self.pos += 1;
                            }
                            b'(' if !self.cur.quote => {
                                self.cur.comment += 1;
                                self.cur.emit(data, b);
                                self.pos += 1;
                            }
                            b')' if !self.cur.quote && self.cur.comment > 0 => {
                                self.cur.comment -= 1;
                                self.cur.emit(data, b);
                                self.pos += 1;
                            }
                            b'\t' | b' ' => {
                                self.cur.emit(data, b);
                                self.pos += 1;
                            }
                            b if is_ctl(b) => return Err(self.bad_request()),
                            _ => {
                                self.cur.emit(data, b);
                                self.pos += 1;
                            }
                        }
                    }
                }

                State::ValueCr => {
                    ensure!(b == b'\n', self.bad_request());
                    self.pos += 1;
                    self.state = State::Continuation;
                }

                State::Continuation => {
                    if is_ws(b) {
                        // Folded line: join with a single blank and
                        // compact the rest of the value left over the
                        // CRLF, keeping the view contiguous without
                        // reallocating. Compaction must also cover the
                        // value that was empty before its continuation.
                        self.cur.folded = true;
                        if self.cur.write > self.cur.start {
                            data[self.cur.write] = b' ';
                            self.cur.write += 1;
                        }
                        self.state = State::FoldWs;
                    } else {
                        self.commit_header();
                        self.state = State::FieldStart;
                    }
                }

                State::FoldWs => {
                    if is_ws(b) {
                        self.pos += 1;
                    } else {
                        self.state = State::Value;
                    }
                }

                State::HeadersCr => {
                    ensure!(b == b'\n', self.bad_request());
                    self.complete_headers(self.pos + 1);
                }

                State::Done(_) => unreachable!("handled at loop head"),
            }
        }
    }

    /// Consumes the machine once `advance` reported completion.
    pub(crate) fn finish(self, block: HeaderBlock) -> crate::protocol::Request {
        crate::protocol::Request::from_parts(block, self.parts)
    }

    fn bad_request(&self) -> ParseError {
        trace!(offset = self.pos, state = ?self.state, "request head rejected");
        ParseError::bad_request(self.pos)
    }

    fn accept_fast_line(&mut self, line: fast_path::FastLine) -> Result<(), ParseError> {
        self.parts.method = Span::new(self.line_start, self.line_start + 3);
        self.parts.method_index = Some(crate::keyword::method::GET);
        self.parts.abs_path = line.abs_path;
        self.parts.query = line.query;
        self.parts.uri = Span::new(line.abs_path.start(), line.uri_end);
        self.parts.version = line.version;
        if line.version != VERSION_09 {
            ensure!(
                line.version <= self.cfg.max_version,
                ParseError::version_not_supported(line.version / 100, line.version % 100)
            );
        }
        self.parts.line = Span::new(self.line_start, line.end);
        self.pos = line.end;
        self.state = if line.version == VERSION_09 { State::Done(line.end) } else { State::FieldStart };
        Ok(())
    }

    fn finish_uri(&mut self) {
        self.parts.uri = Span::new(self.uri_start, self.pos);
    }

    /// Request line ended before any protocol token: HTTP/0.9.
    fn line_eol_without_protocol(&mut self, b: u8) -> Result<(), ParseError> {
        self.parts.version = VERSION_09;
        self.pos += 1;
        if b == b'\r' {
            self.state = State::LineCr;
        } else {
            self.complete_line(self.pos);
        }
        Ok(())
    }

    fn set_version(&mut self) -> Result<(), ParseError> {
        let version = self.major * 100 + self.minor;
        ensure!(
            self.minor <= 99 && version <= self.cfg.max_version,
            ParseError::version_not_supported(self.major, self.minor)
        );
        self.parts.version = version;
        Ok(())
    }

    fn complete_line(&mut self, end: usize) {
        self.parts.line = Span::new(self.line_start, end);
        self.pos = end;
        if self.parts.version == VERSION_09 {
            // No header section in HTTP/0.9.
            self.state = State::Done(end);
        } else {
            self.state = State::FieldStart;
        }
    }

    fn complete_headers(&mut self, end: usize) {
        self.pos = end;
        self.state = State::Done(end);
    }

    fn commit_header(&mut self) {
        let value = Span::new(self.cur.start, self.cur.last.max(self.cur.start));
        if self.cfg.strip_quoted_cookies && self.cur_id == Some(HeaderId::Cookie) && self.cur.quotes_seen % 2 == 1 {
            // Mismatched double quote: discard the whole Cookie header.
            trace!(offset = self.cur.start, "dropping cookie header with unbalanced quote");
        } else {
            self.parts.headers.push(HeaderEntry { name: self.cur_name, value, id: self.cur_id });
        }
        self.cur = ValueScan::default();
        self.cur_name = Span::default();
        self.cur_id = None;
    }
}
