//! Protocol types shared by the parser and its consumers.
//!
//! - [`Request`]: the parsed request head; zero-copy spans over the
//!   frozen header block, named-header shortcuts, derived keep-alive.
//! - [`HeaderId`]: dense ids for the request headers the core classifies.
//! - [`ParseError`]: the parser's terminal failure outcomes, split into
//!   syntax-class (answerable with an HTTP error) and transport-class
//!   (connection is closed) failures.

mod error;
pub use error::ParseError;

mod header_name;
pub use header_name::HeaderId;
pub use header_name::known_headers;

mod request;
pub use request::{HeaderEntry, HeaderList, Request, VERSION_09, VERSION_10, VERSION_11};
pub(crate) use request::RequestParts;
