//! Decoding of raw RFC 5322 / MIME messages into [`ParsedMessage`] records.
//!
//! Decoding never fails: anything that cannot be decoded is left empty (or
//! lossy) and listed in [`ParsedMessage::degradations`].

mod decode;
pub mod header;

pub use decode::parse;
pub use header::{decode_header, decode_text, Decoded};

pub use mailscope_domain::{Attachment, DecodeIssue, DecodedField, Degradation, ParsedMessage};
