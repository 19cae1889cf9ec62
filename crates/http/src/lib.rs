//! Zero-copy incremental HTTP/1.x request parsing.
//!
//! This crate is the front half of the strand server core: it turns raw
//! bytes read from a socket into a structured request head without
//! copying header text, and it serializes the regenerated prefix of a
//! replayed response. The back half, the accelerator response cache,
//! lives in `strand-accel` and consumes the types defined here.
//!
//! # Features
//!
//! - Incremental, restartable request-line and header scanning: a head
//!   split across any number of TCP segments parses identically to one
//!   received whole
//! - Zero-copy field access through spans over a frozen header block
//! - Origin-form, absolute-URI, authority-form and `*` request targets
//! - HTTP/0.9 fallback and bare-LF line endings
//! - Header continuation folding, quoted strings and comments
//! - Keyword interning for O(1) method and header-name classification
//! - Pipelining: bytes of a follow-up request stay buffered
//! - Timeout budgets shared across every refill of one parse
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use strand_http::buffer::SourceBuf;
//! use strand_http::parser::RequestParser;
//! use strand_http::protocol::HeaderId;
//! use tokio::net::TcpStream;
//!
//! async fn handle(mut stream: TcpStream) {
//!     let parser = RequestParser::new();
//!     let mut buf = SourceBuf::new();
//!     match parser.parse(&mut stream, &mut buf, Duration::from_secs(30)).await {
//!         Ok(request) => {
//!             let path = request.path();
//!             let host = request.header(HeaderId::Host);
//!             // dispatch on `path`, consult the accelerator, ...
//!         }
//!         Err(e) if e.is_syntax() => {
//!             // answer with e.response_status(), then close
//!         }
//!         Err(_) => {
//!             // transport failure: close without answering
//!         }
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`buffer`]: the growable socket read buffer with budgeted refill
//! - [`span`]: byte-range views and the frozen header block
//! - [`keyword`]: string→integer interning for methods and header names
//! - [`parser`]: the incremental scanning state machine
//! - [`protocol`]: the parsed request head and error taxonomy
//! - [`prefix`]: serialization of replayed response prefixes
//!
//! # Limits
//!
//! - HTTP/1.x only; protocol versions above a configured ceiling are
//!   rejected with a distinct outcome
//! - Maximum head size: 8KB by default (configurable per buffer)
//! - Maximum number of headers: 64 by default (configurable)

pub mod buffer;
pub mod keyword;
pub mod parser;
pub mod prefix;
pub mod protocol;
pub mod span;

mod utils;
pub(crate) use utils::ensure;
