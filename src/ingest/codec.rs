//! NDJSON metric line decoding
//!
//! One JSON object per line:
//!
//! ```text
//! {"producer_id":"srv-1","metric_name":"cpu","value":42.5,"ts":1700000000000,"labels":{"core":"0"}}
//! ```
//!
//! `server_id` is accepted for `producer_id`, `tags` for `labels`, and
//! `timestamp` for `ts`. Blank lines and lines starting with `:` or `#` are
//! skipped without producing anything.

use crate::clock::Clock;
use crate::error::DecodeError;
use crate::event::{LabelSet, MetricEvent};
use bytes::{Buf, BytesMut};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::codec::Decoder;

/// Lines longer than this are discarded as malformed
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Result of decoding one complete line
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Event(MetricEvent),
    Rejected(DecodeError),
}

pub struct MetricLineCodec {
    clock: Arc<dyn Clock>,
    /// Bytes of the pending partial line already scanned for a newline
    next_index: usize,
    max_line_length: usize,
    /// Inside an overlong line; drop bytes up to the next newline
    discarding: bool,
}

impl MetricLineCodec {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_max_line_length(clock, DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(clock: Arc<dyn Clock>, max_line_length: usize) -> Self {
        MetricLineCodec {
            clock,
            next_index: 0,
            max_line_length,
            discarding: false,
        }
    }

    /// Decode a complete line, or `None` for blank and comment lines
    fn decode_line(&self, line: &[u8]) -> Option<LineOutcome> {
        let line = trim_ascii(line);
        if line.is_empty() || line[0] == b':' || line[0] == b'#' {
            return None;
        }
        Some(match decode_event(line, self.clock.now_ms()) {
            Ok(event) => LineOutcome::Event(event),
            Err(e) => LineOutcome::Rejected(e),
        })
    }
}

impl Decoder for MetricLineCodec {
    type Item = LineOutcome;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<LineOutcome>, std::io::Error> {
        loop {
            let newline = memchr::memchr(b'\n', &buf[self.next_index..]).map(|i| self.next_index + i);

            match (self.discarding, newline) {
                (true, Some(pos)) => {
                    buf.advance(pos + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                (true, None) => {
                    buf.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(pos)) => {
                    let line = buf.split_to(pos + 1);
                    self.next_index = 0;
                    if line.len() - 1 > self.max_line_length {
                        return Ok(Some(overlong()));
                    }
                    if let Some(outcome) = self.decode_line(&line[..pos]) {
                        return Ok(Some(outcome));
                    }
                }
                (false, None) => {
                    if buf.len() > self.max_line_length {
                        buf.clear();
                        self.next_index = 0;
                        self.discarding = true;
                        return Ok(Some(overlong()));
                    }
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    /// A trailing line without a newline is decoded once the stream ends
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<LineOutcome>, std::io::Error> {
        if let Some(outcome) = self.decode(buf)? {
            return Ok(Some(outcome));
        }
        let rest = buf.split();
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            return Ok(None);
        }
        Ok(self.decode_line(&rest))
    }
}

fn overlong() -> LineOutcome {
    LineOutcome::Rejected(DecodeError::Malformed("line exceeds maximum length".into()))
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

/// Decode one JSON line into a validated event
///
/// `receipt_ms` is used when the payload carries no usable timestamp.
pub fn decode_event(line: &[u8], receipt_ms: u64) -> Result<MetricEvent, DecodeError> {
    let value: Value = serde_json::from_slice(line).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(DecodeError::Malformed("expected a JSON object".into()));
    };

    let producer_id = required_string(&obj, "producer_id", &["producer_id", "server_id"])?;
    let metric_name = required_string(&obj, "metric_name", &["metric_name"])?;
    let value = metric_value(&obj)?;
    let labels = labels(&obj)?;
    let timestamp_ms = timestamp(&obj).unwrap_or(receipt_ms);

    Ok(MetricEvent::new(producer_id, metric_name, value, timestamp_ms).with_labels(labels))
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .find(|v| !v.is_null())
}

fn required_string(
    obj: &Map<String, Value>,
    canonical: &'static str,
    names: &[&str],
) -> Result<String, DecodeError> {
    match field(obj, names) {
        None => Err(DecodeError::MissingField(canonical)),
        Some(Value::String(s)) if s.is_empty() => Err(DecodeError::MissingField(canonical)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(DecodeError::InvalidValue {
            field: canonical,
            reason: format!("expected string, got {}", type_name(other)),
        }),
    }
}

fn metric_value(obj: &Map<String, Value>) -> Result<f64, DecodeError> {
    let parsed = match field(obj, &["value"]) {
        None => return Err(DecodeError::MissingField("value")),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(other) => {
            return Err(DecodeError::InvalidValue {
                field: "value",
                reason: format!("expected number, got {}", type_name(other)),
            })
        }
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(DecodeError::InvalidValue {
            field: "value",
            reason: "not a finite number".into(),
        }),
    }
}

fn labels(obj: &Map<String, Value>) -> Result<LabelSet, DecodeError> {
    match field(obj, &["labels", "tags"]) {
        None => Ok(LabelSet::empty()),
        Some(Value::Object(map)) => {
            let labels: BTreeMap<String, String> = map
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect();
            Ok(LabelSet::new(labels))
        }
        Some(other) => Err(DecodeError::InvalidValue {
            field: "labels",
            reason: format!("expected object, got {}", type_name(other)),
        }),
    }
}

/// Epoch milliseconds from `ts`/`timestamp`, if present and numeric
fn timestamp(obj: &Map<String, Value>) -> Option<u64> {
    let ms = match field(obj, &["ts", "timestamp"])? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (ms.is_finite() && ms >= 0.0).then_some(ms as u64)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
