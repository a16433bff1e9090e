//! Single-line decoding of container log records.
//!
//! Two wire shapes are recognized, chosen by the first non-whitespace byte:
//!
//! - `{...}`: a JSON object such as Docker's `{"log":"..","stream":"stdout","time":".."}`
//! - anything else: the CRI layout `TIMESTAMP STREAM [LOGTAG] MESSAGE`
//!
//! Parsing never panics on arbitrary bytes. Invalid UTF-8 in a message is
//! replaced lossily rather than rejected.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::ParseError;
use crate::types::{LogRecord, StreamKind};

/// JSON keys tried, in order, for the record timestamp.
const TIMESTAMP_KEYS: [&str; 3] = ["time", "timestamp", "ts"];

/// JSON keys tried, in order, for the record body.
const MESSAGE_KEYS: [&str; 4] = ["log", "message", "msg", "text"];

/// Decodes one line (without its trailing newline) that started at `source_offset`.
pub fn parse(line: &[u8], source_offset: u64) -> Result<LogRecord, ParseError> {
    let line = line.trim_ascii_start();
    match line.first() {
        None => Err(ParseError::Empty),
        Some(b'{') => parse_json(line, source_offset),
        Some(_) => parse_tagged(line, source_offset),
    }
}

/// Parses an RFC3339 timestamp with any fractional precision up to nanoseconds.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| ParseError::BadTimestamp(raw.to_string()))
}

fn parse_json(line: &[u8], source_offset: u64) -> Result<LogRecord, ParseError> {
    let text = String::from_utf8_lossy(line);
    let obj: Map<String, Value> =
        serde_json::from_str(&text).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let timestamp = extract_timestamp(&obj)?;
    let (key, message) = extract_message(&obj)?;

    // Docker's json-file driver keeps the newline the container wrote.
    let message = if key == "log" {
        message.strip_suffix('\n').unwrap_or(message)
    } else {
        message
    };

    let stream = obj
        .get("stream")
        .and_then(Value::as_str)
        .map_or(StreamKind::Unknown, |s| StreamKind::from_tag(s.as_bytes()));

    Ok(LogRecord {
        timestamp,
        message: message.to_string(),
        stream,
        partial: false,
        source_offset,
    })
}

fn extract_timestamp(obj: &Map<String, Value>) -> Result<DateTime<Utc>, ParseError> {
    for key in TIMESTAMP_KEYS {
        if let Some(value) = obj.get(key) {
            return match value.as_str() {
                Some(s) => parse_timestamp(s),
                None => Err(ParseError::BadTimestamp(value.to_string())),
            };
        }
    }
    Err(ParseError::Malformed("missing timestamp field".to_string()))
}

fn extract_message(obj: &Map<String, Value>) -> Result<(&'static str, &str), ParseError> {
    for key in MESSAGE_KEYS {
        if let Some(s) = obj.get(key).and_then(Value::as_str) {
            return Ok((key, s));
        }
    }
    Err(ParseError::Malformed("missing message field".to_string()))
}

fn parse_tagged(line: &[u8], source_offset: u64) -> Result<LogRecord, ParseError> {
    let (ts_raw, rest) = split_token(line);
    let ts_str = std::str::from_utf8(ts_raw)
        .map_err(|_| ParseError::BadTimestamp(String::from_utf8_lossy(ts_raw).into_owned()))?;
    let timestamp = parse_timestamp(ts_str)?;

    let Some(rest) = rest else {
        return Err(ParseError::Malformed("missing message".to_string()));
    };

    let (tag, after_tag) = split_token(rest);
    let stream = StreamKind::from_tag(tag);

    // Without a recognized stream tag, everything after the timestamp is the body.
    let (body, partial) = if stream == StreamKind::Unknown {
        (rest, false)
    } else {
        match after_tag.map(split_token) {
            Some((b"F", body)) => (body.unwrap_or_default(), false),
            Some((b"P", body)) => (body.unwrap_or_default(), true),
            Some(_) => (after_tag.unwrap_or_default(), false),
            None => (&[][..], false),
        }
    };

    Ok(LogRecord {
        timestamp,
        message: String::from_utf8_lossy(body).into_owned(),
        stream,
        partial,
        source_offset,
    })
}

/// Splits off the bytes up to the first space. The remainder excludes that
/// single space and is `None` when the line has no space at all.
fn split_token(bytes: &[u8]) -> (&[u8], Option<&[u8]>) {
    match memchr::memchr(b' ', bytes) {
        Some(idx) => (&bytes[..idx], Some(&bytes[idx + 1..])),
        None => (bytes, None),
    }
}
