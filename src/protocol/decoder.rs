//! Record decoders.
//!
//! The firmware may emit either of two grammars:
//!
//! | Decoder | Record shape |
//! |---|---|
//! | [`FrameDecoder::Delimited`] | `$gyroX:1.5,gyroY:-2.0,...,temperature:24.7&` |
//! | [`FrameDecoder::JsonLine`] | `{"gyroX":1.5,"gyroY":-2.0,...,"temperature":24.7}` |
//!
//! Complete records are offered to the decoders in [`FrameDecoder::ORDER`];
//! the first full decode wins.

use serde_json::Value;
use tracing::trace;

use crate::data::SensorFrame;
use crate::error::{Error, Result};
use crate::protocol::fields::{Field, FieldSet};
use crate::protocol::number::parse_decimal;

/// Leading sentinel of a delimited record.
pub const FRAME_START: u8 = b'$';

/// Trailing sentinel of a delimited record.
pub const FRAME_END: u8 = b'&';

/// The closed set of record decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDecoder {
    /// `$key:value,...&` records.
    Delimited,
    /// One JSON object per line.
    JsonLine,
}

impl FrameDecoder {
    /// Order in which decoders are tried.
    pub const ORDER: [FrameDecoder; 2] = [FrameDecoder::Delimited, FrameDecoder::JsonLine];

    /// Whether the record is shaped like this decoder's grammar.
    pub fn claims(&self, record: &str) -> bool {
        match self {
            Self::Delimited => record.starts_with(FRAME_START as char),
            Self::JsonLine => record.starts_with('{'),
        }
    }

    /// Decode one complete record.
    pub fn decode(&self, record: &str) -> Result<SensorFrame> {
        match self {
            Self::Delimited => decode_delimited(record),
            Self::JsonLine => decode_json_line(record),
        }
    }
}

/// Decode a complete record with the first decoder that accepts it.
///
/// When every decoder fails, the error from the decoder whose grammar the
/// record resembles is returned.
pub fn decode_record(record: &str) -> Result<SensorFrame> {
    let record = record.trim();
    let mut claimed_error = None;

    for decoder in FrameDecoder::ORDER {
        match decoder.decode(record) {
            Ok(frame) => return Ok(frame),
            Err(e) => {
                trace!("{:?} decoder rejected record: {}", decoder, e);
                if claimed_error.is_none() && decoder.claims(record) {
                    claimed_error = Some(e);
                }
            }
        }
    }

    Err(claimed_error.unwrap_or_else(|| Error::decode(format!("unrecognized record {record:?}"))))
}

/// Decode `$gyroX:<f>,...,temperature:<f>&`.
pub fn decode_delimited(record: &str) -> Result<SensorFrame> {
    let body = record
        .trim()
        .strip_prefix(FRAME_START as char)
        .and_then(|r| r.strip_suffix(FRAME_END as char))
        .ok_or_else(|| Error::decode("delimited record must be wrapped in '$' and '&'"))?;

    let mut fields = FieldSet::default();
    for pair in body.split(',') {
        let (key, value) = pair
            .split_once(':')
            .ok_or_else(|| Error::decode(format!("field without ':' in {pair:?}")))?;

        let Some(field) = Field::from_key(key) else {
            trace!("Ignoring unknown field {:?}", key);
            continue;
        };

        let value = parse_decimal(value)
            .ok_or_else(|| Error::decode(format!("bad number {value:?} for {}", field.name())))?;
        fields.set(field, value)?;
    }

    fields.into_frame()
}

/// Decode a JSON object whose values are numbers or numeric strings.
pub fn decode_json_line(record: &str) -> Result<SensorFrame> {
    let value: Value = serde_json::from_str(record.trim())
        .map_err(|e| Error::decode(format!("invalid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| Error::decode("JSON record is not an object"))?;

    let mut fields = FieldSet::default();
    for (key, value) in object {
        let Some(field) = Field::from_key(key) else {
            trace!("Ignoring unknown field {:?}", key);
            continue;
        };

        let number = match value {
            Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
            Value::String(s) => parse_decimal(s),
            _ => None,
        };
        let number = number
            .ok_or_else(|| Error::decode(format!("bad value {value} for {}", field.name())))?;
        fields.set(field, number)?;
    }

    fields.into_frame()
}
