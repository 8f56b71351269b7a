//! Protocol module for framing and decoding telemetry records.
//!
//! This module contains the implementations for:
//! - the tolerant decimal grammar shared by both wire formats
//! - the delimited (`$...&`) and JSON-per-line record decoders
//! - streaming framing across arbitrary chunk boundaries

pub mod decoder;
pub mod fields;
pub mod number;
pub mod parser;

pub use decoder::{decode_record, FrameDecoder};
pub use fields::Field;
pub use number::parse_decimal;
pub use parser::{parse_chunk, FrameParser, ParseOutput, ParsedChunk, ParserOptions};
