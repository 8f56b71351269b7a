//! Streaming record framing.
//!
//! Bytes arrive in arbitrary chunks. [`parse_chunk`] frames as many complete
//! records as it can and hands back the unconsumed tail; [`FrameParser`] keeps
//! that tail between calls.
//!
//! Framing rules:
//! - a record starting with `$` is complete at the next `&`;
//! - a record starting with `{` is complete at the line delimiter;
//! - any other record is complete at the line delimiter or at the next `$`;
//! - whitespace and delimiters between records are skipped.
//!
//! A `$` record interrupted by the start of another record (`$` or `{`) or
//! by a line break before its `&` is dropped, and parsing resumes at the
//! interruption.
//!
//! A record longer than `max_record_len` is dropped however the stream is
//! split: a complete one is rejected outright, and an incomplete one is
//! discarded along with the rest of it as it arrives.

use bytes::{Buf, BytesMut};

use crate::config::{LinkConfig, DEFAULT_MAX_RECORD_LEN};
use crate::data::SensorFrame;
use crate::error::{Error, Result};
use crate::protocol::decoder::{decode_record, FRAME_END, FRAME_START};
use crate::transport::TextEncoding;

/// Options controlling framing and text decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserOptions {
    /// Line delimiter (a `\n` always terminates a line as well).
    pub delimiter: u8,
    /// Text encoding of records.
    pub encoding: TextEncoding,
    /// Longest record accepted, terminator included.
    pub max_record_len: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            delimiter: b'\n',
            encoding: TextEncoding::Utf8,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }
}

impl From<&LinkConfig> for ParserOptions {
    fn from(config: &LinkConfig) -> Self {
        Self {
            delimiter: config.delimiter,
            encoding: config.encoding,
            max_record_len: config.max_record_len,
        }
    }
}

/// Result of framing one input buffer.
#[derive(Debug)]
pub struct ParsedChunk<'a> {
    /// Decoded frames, in arrival order.
    pub frames: Vec<SensorFrame>,
    /// One [`Error::DecodeError`] per dropped record.
    pub errors: Vec<Error>,
    /// Bytes of an incomplete trailing record.
    pub remainder: &'a [u8],
    /// Set when an oversize incomplete record was dropped instead of kept.
    pub(crate) overflowed: Option<RecordKind>,
}

/// How a record is terminated, decided by its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordKind {
    /// `$...&`
    Delimited,
    /// `{...}` up to the line end.
    Json,
    /// Anything else, up to the line end or the next `$`.
    Bare,
}

impl RecordKind {
    fn of(first: u8) -> Self {
        match first {
            FRAME_START => Self::Delimited,
            b'{' => Self::Json,
            _ => Self::Bare,
        }
    }
}

/// Where a record stops, as an index into the bytes after its first byte.
enum Stop {
    /// `&` closing a delimited record.
    Terminator(usize),
    /// Line end closing a JSON or bare record.
    LineEnd(usize),
    /// Start of the next record, or a line break inside a delimited record.
    Interruption(usize),
}

enum Scan<'a> {
    Record { body: &'a [u8], consumed: usize },
    Interrupted { consumed: usize },
    Incomplete,
}

/// Frame and decode every complete record in `input`.
pub fn parse_chunk<'a>(input: &'a [u8], options: &ParserOptions) -> ParsedChunk<'a> {
    let mut frames = Vec::new();
    let mut errors = Vec::new();
    let mut pos = 0;

    loop {
        while pos < input.len() && is_separator(input[pos], options.delimiter) {
            pos += 1;
        }
        if pos >= input.len() {
            break;
        }

        match next_record(&input[pos..], options.delimiter) {
            Scan::Record { body, consumed } => {
                if body.len() > options.max_record_len {
                    errors.push(oversize(options.max_record_len));
                } else {
                    match decode_text(body, options.encoding).and_then(decode_record) {
                        Ok(frame) => frames.push(frame),
                        Err(e) => errors.push(e),
                    }
                }
                pos += consumed;
            }
            Scan::Interrupted { consumed } => {
                errors.push(Error::decode(format!(
                    "record interrupted after {consumed} bytes before '&'"
                )));
                pos += consumed;
            }
            Scan::Incomplete => break,
        }
    }

    let mut remainder = &input[pos..];
    let mut overflowed = None;
    if remainder.len() > options.max_record_len {
        errors.push(oversize(options.max_record_len));
        overflowed = Some(RecordKind::of(remainder[0]));
        remainder = &input[input.len()..];
    }

    ParsedChunk {
        frames,
        errors,
        remainder,
        overflowed,
    }
}

fn oversize(max_record_len: usize) -> Error {
    Error::decode(format!("record exceeds {max_record_len} bytes"))
}

fn is_separator(byte: u8, delimiter: u8) -> bool {
    byte == delimiter || byte.is_ascii_whitespace()
}

fn is_record_start(byte: u8) -> bool {
    byte == FRAME_START || byte == b'{'
}

fn is_line_end(byte: u8, delimiter: u8) -> bool {
    byte == delimiter || byte == b'\n'
}

/// Find where a record of `kind` stops in `bytes`, which excludes its first byte.
fn find_stop(bytes: &[u8], kind: RecordKind, delimiter: u8) -> Option<Stop> {
    bytes.iter().enumerate().find_map(|(i, &b)| match kind {
        RecordKind::Delimited if b == FRAME_END => Some(Stop::Terminator(i)),
        RecordKind::Delimited if is_record_start(b) || is_line_end(b, delimiter) => {
            Some(Stop::Interruption(i))
        }
        RecordKind::Json | RecordKind::Bare if is_line_end(b, delimiter) => Some(Stop::LineEnd(i)),
        RecordKind::Bare if b == FRAME_START => Some(Stop::Interruption(i)),
        _ => None,
    })
}

/// Length of a dropped record's tail at the start of `bytes`.
fn discard_len(bytes: &[u8], kind: RecordKind, delimiter: u8) -> Option<usize> {
    find_stop(bytes, kind, delimiter).map(|stop| match stop {
        Stop::Terminator(i) | Stop::LineEnd(i) => i + 1,
        Stop::Interruption(i) => i,
    })
}

fn next_record(rest: &[u8], delimiter: u8) -> Scan<'_> {
    let kind = RecordKind::of(rest[0]);
    let Some(stop) = find_stop(&rest[1..], kind, delimiter) else {
        return Scan::Incomplete;
    };

    // indices below are shifted past the first byte
    match (kind, stop) {
        (_, Stop::Terminator(i)) => Scan::Record {
            body: &rest[..i + 2],
            consumed: i + 2,
        },
        (RecordKind::Delimited, Stop::Interruption(i)) => Scan::Interrupted { consumed: i + 1 },
        (_, Stop::Interruption(i)) => Scan::Record {
            body: &rest[..i + 1],
            consumed: i + 1,
        },
        (_, Stop::LineEnd(i)) => Scan::Record {
            body: &rest[..i + 1],
            consumed: i + 2,
        },
    }
}

fn decode_text(bytes: &[u8], encoding: TextEncoding) -> Result<&str> {
    if encoding == TextEncoding::Ascii && !bytes.is_ascii() {
        return Err(Error::decode("non-ASCII byte in record"));
    }
    std::str::from_utf8(bytes).map_err(|e| Error::decode(format!("invalid UTF-8: {e}")))
}

/// Output of one [`FrameParser::feed`] call.
#[derive(Debug, Default)]
pub struct ParseOutput {
    /// Decoded frames, in arrival order.
    pub frames: Vec<SensorFrame>,
    /// Records that were dropped.
    pub errors: Vec<Error>,
}

/// Stateful wrapper around [`parse_chunk`] that buffers the incomplete tail.
#[derive(Debug)]
pub struct FrameParser {
    options: ParserOptions,
    buffer: BytesMut,
    /// Kind of an oversize record whose tail is still being discarded.
    discarding: Option<RecordKind>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(ParserOptions::default())
    }
}

impl FrameParser {
    /// Create a parser.
    pub fn new(options: ParserOptions) -> Self {
        Self {
            options,
            buffer: BytesMut::with_capacity(options.max_record_len),
            discarding: None,
        }
    }

    /// Append a chunk and decode every record it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> ParseOutput {
        let chunk = match self.discarding {
            Some(kind) => match discard_len(chunk, kind, self.options.delimiter) {
                Some(skip) => {
                    self.discarding = None;
                    &chunk[skip..]
                }
                None => return ParseOutput::default(),
            },
            None => chunk,
        };
        self.buffer.extend_from_slice(chunk);

        let ParsedChunk {
            frames,
            errors,
            remainder,
            overflowed,
        } = parse_chunk(&self.buffer, &self.options);
        let consumed = self.buffer.len() - remainder.len();
        self.buffer.advance(consumed);
        self.discarding = overflowed;

        ParseOutput { frames, errors }
    }

    /// Bytes held back waiting for a terminator.
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any buffered bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Vector3;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const EXAMPLE: &str = "$gyroX:1.5,gyroY:-2.0,gyroZ:0.3,accX:0.01,accY:-0.02,accZ:0.98,\
tiltX(degree):1.1,tiltY(degree):-0.4,zStroke(m):0.002,temperature:24.7&";

    const JSON_EXAMPLE: &str = r#"{"gyroX":4,"gyroY":5,"gyroZ":6,"accX":0,"accY":0,"accZ":1,"tiltX":0,"tiltY":0,"distance":0.1,"temperature":21.5}"#;

    fn delimited(gyro_x: f64, temperature: f64) -> String {
        format!(
            "$gyroX:{gyro_x},gyroY:0,gyroZ:0,accX:0,accY:0,accZ:1,tiltX(degree):0,\
             tiltY(degree):0,zStroke(m):0,temperature:{temperature}&"
        )
    }

    #[test]
    fn test_single_delimited_record() {
        let parsed = parse_chunk(EXAMPLE.as_bytes(), &ParserOptions::default());
        assert_eq!(parsed.frames.len(), 1);
        assert!(parsed.errors.is_empty());
        assert!(parsed.remainder.is_empty());
        assert_eq!(parsed.frames[0].gyro(), Vector3::new(1.5, -2.0, 0.3));
        assert_eq!(parsed.frames[0].temperature(), 24.7);
    }

    #[test]
    fn test_mixed_grammars_in_order() {
        let input = format!("{EXAMPLE}\r\n{JSON_EXAMPLE}\n{}", delimited(9.0, 30.0));
        let parsed = parse_chunk(input.as_bytes(), &ParserOptions::default());

        let gyro_x: Vec<f64> = parsed.frames.iter().map(|f| f.gyro().x).collect();
        assert_eq!(gyro_x, vec![1.5, 4.0, 9.0]);
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn test_partial_record_is_remainder() {
        let (head, tail) = EXAMPLE.split_at(40);
        let parsed = parse_chunk(head.as_bytes(), &ParserOptions::default());
        assert!(parsed.frames.is_empty());
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.remainder, head.as_bytes());

        let mut parser = FrameParser::default();
        assert!(parser.feed(head.as_bytes()).frames.is_empty());
        assert_eq!(parser.remainder(), head.as_bytes());
        let out = parser.feed(tail.as_bytes());
        assert_eq!(out.frames.len(), 1);
        assert!(parser.remainder().is_empty());
    }

    #[test]
    fn test_json_needs_line_end() {
        let mut parser = FrameParser::default();
        assert!(parser.feed(JSON_EXAMPLE.as_bytes()).frames.is_empty());
        assert_eq!(parser.feed(b"\n").frames.len(), 1);
    }

    #[test]
    fn test_resync_after_garbage() {
        let input = format!("#!garbage{EXAMPLE}");
        let parsed = parse_chunk(input.as_bytes(), &ParserOptions::default());
        assert_eq!(parsed.frames.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
        assert!(matches!(parsed.errors[0], Error::DecodeError { .. }));
    }

    #[test]
    fn test_resync_after_interrupted_record() {
        let truncated = &EXAMPLE[..30];
        let input = format!("{truncated}{EXAMPLE}");
        let parsed = parse_chunk(input.as_bytes(), &ParserOptions::default());
        assert_eq!(parsed.frames.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
        assert!(parsed.errors[0].to_string().contains("interrupted"));

        let input = format!("{truncated}\n{EXAMPLE}");
        let parsed = parse_chunk(input.as_bytes(), &ParserOptions::default());
        assert_eq!(parsed.frames.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
    }

    #[test]
    fn test_bad_record_then_good_record() {
        let bad = EXAMPLE.replace("accZ:0.98", "accZ:0.9.8");
        let mut parser = FrameParser::default();

        let out = parser.feed(bad.as_bytes());
        assert!(out.frames.is_empty());
        assert_eq!(out.errors.len(), 1);

        let out = parser.feed(EXAMPLE.as_bytes());
        assert_eq!(out.frames.len(), 1);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn test_non_finite_never_emitted() {
        for bad in ["nan", "inf", "-inf", "1e999", ""] {
            let record = EXAMPLE.replace("gyroY:-2.0", &format!("gyroY:{bad}"));
            let parsed = parse_chunk(record.as_bytes(), &ParserOptions::default());
            assert!(parsed.frames.is_empty(), "emitted frame for {bad:?}");
            assert_eq!(parsed.errors.len(), 1);
        }
    }

    #[test]
    fn test_oversized_remainder_dropped() {
        let options = ParserOptions {
            max_record_len: 16,
            ..ParserOptions::default()
        };
        let mut parser = FrameParser::new(options);

        let out = parser.feed(b"$gyroX:1,gyroY:2,gyroZ:3");
        assert_eq!(out.errors.len(), 1);
        assert!(parser.remainder().is_empty());

        // the tail of the dropped record is discarded through its '&'
        let out = parser.feed(b",temperature:2&$gyroX:1&");
        assert!(out.frames.is_empty());
        assert_eq!(out.errors.len(), 1);
        assert!(!out.errors[0].to_string().contains("exceeds"));
    }

    #[test]
    fn test_oversized_record_dropped_however_split() {
        let note = "x".repeat(1200);
        let long = JSON_EXAMPLE.replacen('{', &format!("{{\"note\":\"{note}\","), 1);
        let input = format!("{long}\n{EXAMPLE}");
        let bytes = input.as_bytes();

        let parsed = parse_chunk(bytes, &ParserOptions::default());
        assert_eq!(parsed.frames.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
        assert!(parsed.errors[0].to_string().contains("exceeds 1024"));

        for cut in [1, 1024, 1100, long.len(), long.len() + 1] {
            let (frames, errors, remainder) =
                feed_split(bytes, &[0, cut, bytes.len()], ParserOptions::default());
            assert_eq!(frames, parsed.frames, "cut at {cut}");
            assert_eq!(errors, 1, "cut at {cut}");
            assert!(remainder.is_empty());
        }
    }

    #[test]
    fn test_dollar_inside_json_string() {
        let record = JSON_EXAMPLE.replacen('}', r#","unit":"$"}"#, 1);
        let input = format!("{record}\n");
        let parsed = parse_chunk(input.as_bytes(), &ParserOptions::default());
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        assert_eq!(parsed.frames.len(), 1);
        assert_eq!(parsed.frames[0].temperature(), 21.5);
    }

    #[test]
    fn test_ascii_encoding_rejects_high_bytes() {
        let options = ParserOptions {
            encoding: TextEncoding::Ascii,
            ..ParserOptions::default()
        };
        let record = EXAMPLE.replace("temperature", "temperatüre");
        let parsed = parse_chunk(record.as_bytes(), &options);
        assert!(parsed.frames.is_empty());
        assert!(parsed.errors[0].to_string().contains("non-ASCII"));

        let parsed = parse_chunk(EXAMPLE.as_bytes(), &options);
        assert_eq!(parsed.frames.len(), 1);
    }

    #[test]
    fn test_invalid_utf8_dropped() {
        let mut input = vec![0xff, 0xfe, b'\n'];
        input.extend_from_slice(EXAMPLE.as_bytes());
        let parsed = parse_chunk(&input, &ParserOptions::default());
        assert_eq!(parsed.frames.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
    }

    #[test]
    fn test_custom_delimiter() {
        let options = ParserOptions {
            delimiter: b';',
            ..ParserOptions::default()
        };
        let input = format!("{JSON_EXAMPLE};{JSON_EXAMPLE};");
        let parsed = parse_chunk(input.as_bytes(), &options);
        assert_eq!(parsed.frames.len(), 2);
    }

    #[test]
    fn test_reset() {
        let mut parser = FrameParser::default();
        parser.feed(&EXAMPLE.as_bytes()[..10]);
        assert!(!parser.remainder().is_empty());
        parser.reset();
        assert!(parser.remainder().is_empty());
    }

    /// Feed `bytes` in the windows between sorted `points`.
    fn feed_split(
        bytes: &[u8],
        points: &[usize],
        options: ParserOptions,
    ) -> (Vec<SensorFrame>, usize, Vec<u8>) {
        let mut parser = FrameParser::new(options);
        let mut frames = Vec::new();
        let mut errors = 0;
        for window in points.windows(2) {
            let out = parser.feed(&bytes[window[0]..window[1]]);
            frames.extend(out.frames);
            errors += out.errors.len();
        }
        (frames, errors, parser.remainder().to_vec())
    }

    fn cut_points(cuts: &[prop::sample::Index], len: usize) -> Vec<usize> {
        let mut points: Vec<usize> = cuts.iter().map(|i| i.index(len + 1)).collect();
        points.push(0);
        points.push(len);
        points.sort_unstable();
        points.dedup();
        points
    }

    fn record_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            (-1000.0f64..1000.0, -40.0f64..85.0).prop_map(|(g, t)| delimited(g, t)),
            (-1000.0f64..1000.0).prop_map(|g| format!(
                "{{\"gyroX\":{g},\"gyroY\":1,\"gyroZ\":2,\"accX\":0,\"accY\":0,\"accZ\":1,\
                 \"tiltX\":0,\"tiltY\":0,\"distance\":0.5,\"temperature\":\"20.5\"}}\n"
            )),
            "[a-z#%]{1,12}\n",
            Just("$gyroX:1,gyroY:".to_string()),
            Just("\r\n".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn prop_chunk_boundary_independence(
            records in prop::collection::vec(record_strategy(), 0..12),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            let stream = records.concat();
            let bytes = stream.as_bytes();
            let options = ParserOptions::default();

            let whole = feed_split(bytes, &[0, bytes.len()], options);
            let split = feed_split(bytes, &cut_points(&cuts, bytes.len()), options);

            prop_assert_eq!(split, whole);
        }

        #[test]
        fn prop_record_cap_independent_of_boundaries(
            records in prop::collection::vec(record_strategy(), 0..12),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
            max_record_len in 16usize..160,
        ) {
            let stream = records.concat();
            let bytes = stream.as_bytes();
            let options = ParserOptions {
                max_record_len,
                ..ParserOptions::default()
            };

            let whole = feed_split(bytes, &[0, bytes.len()], options);
            let split = feed_split(bytes, &cut_points(&cuts, bytes.len()), options);

            prop_assert_eq!(split, whole);
        }
    }
}
