//! Newline-delimited JSON event capsules.
//!
//! Each line is one capsule:
//!
//! ```text
//! {"token":"5a1f","event":"click","client":"web","meta":{"schema":"ClickTracking","timestamp":1357000000}}
//! ```
//!
//! Only capsules whose `meta.schema` equals the requested schema are kept.
//! Lines that cannot be decoded surface as record-level errors so the caller
//! can count them without aborting the run.

use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

use crate::constants::ingest::{
    GZIP_EXTENSION, META_FIELD, SCHEMA_FIELD, TIMESTAMP_FIELD, TOKEN_FIELD,
};
use crate::data::EventRecord;
use crate::errors::FunnelError;
use crate::types::{SchemaName, Token};

/// Open `path` for line reading, decompressing when it ends in `.gz`.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>, FunnelError> {
    let file = File::open(path)?;
    let gzipped = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(GZIP_EXTENSION));
    if gzipped {
        debug!(path = %path.display(), "reading gzip capsules");
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Filters and decodes capsules of one schema.
#[derive(Clone, Debug)]
pub struct CapsuleReader {
    schema: SchemaName,
}

impl CapsuleReader {
    /// Reader keeping only capsules of `schema`.
    pub fn new(schema: impl Into<SchemaName>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    /// Schema being kept.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Decode one line.
    ///
    /// Returns `None` for blank lines and capsules of another schema.
    pub fn parse_line(&self, line_no: usize, line: &str) -> Option<Result<EventRecord, FunnelError>> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let value = match serde_json::from_str::<Value>(line) {
            Ok(value) => value,
            Err(err) => return Some(Err(malformed("", line_no, format!("invalid JSON: {err}")))),
        };
        let Some(capsule) = value.as_object() else {
            return Some(Err(malformed("", line_no, "capsule is not a JSON object")));
        };
        let meta = capsule.get(META_FIELD).and_then(Value::as_object);
        let schema = meta
            .and_then(|meta| meta.get(SCHEMA_FIELD))
            .and_then(Value::as_str);
        if schema != Some(self.schema.as_str()) {
            return None;
        }
        Some(decode_capsule(line_no, capsule, meta))
    }

    /// Stream records from any line reader.
    pub fn records<R: BufRead>(&self, reader: R) -> CapsuleRecords<R> {
        CapsuleRecords {
            source: reader,
            reader: self.clone(),
            buffer: Vec::new(),
            line_no: 0,
        }
    }

    /// Stream records from a plain or gzip file.
    pub fn open(&self, path: &Path) -> Result<CapsuleRecords<Box<dyn BufRead>>, FunnelError> {
        Ok(self.records(open_input(path)?))
    }
}

/// Iterator over the capsules of one schema in a line stream.
///
/// IO failures are yielded as [`FunnelError::Io`]; undecodable lines
/// (including ones that are not UTF-8) as [`FunnelError::MalformedInput`].
pub struct CapsuleRecords<R> {
    source: R,
    reader: CapsuleReader,
    buffer: Vec<u8>,
    line_no: usize,
}

impl<R: BufRead> Iterator for CapsuleRecords<R> {
    type Item = Result<EventRecord, FunnelError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buffer.clear();
            match self.source.read_until(b'\n', &mut self.buffer) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(err.into())),
            }
            self.line_no += 1;
            let line = match std::str::from_utf8(&self.buffer) {
                Ok(line) => line,
                Err(err) => {
                    return Some(Err(malformed("", self.line_no, format!("invalid UTF-8: {err}"))));
                }
            };
            if let Some(record) = self.reader.parse_line(self.line_no, line) {
                return Some(record);
            }
        }
    }
}

fn decode_capsule(
    line_no: usize,
    capsule: &Map<String, Value>,
    meta: Option<&Map<String, Value>>,
) -> Result<EventRecord, FunnelError> {
    let token = capsule
        .get(TOKEN_FIELD)
        .and_then(value_to_text)
        .ok_or_else(|| malformed("", line_no, "missing token"))?;
    let raw_timestamp = meta
        .and_then(|meta| meta.get(TIMESTAMP_FIELD))
        .ok_or_else(|| malformed(&token, line_no, "missing meta.timestamp"))?;
    let timestamp = parse_timestamp(raw_timestamp)
        .ok_or_else(|| malformed(&token, line_no, format!("unreadable timestamp {raw_timestamp}")))?;

    let fields: BTreeMap<String, String> = capsule
        .iter()
        .filter(|(key, _)| key.as_str() != TOKEN_FIELD && key.as_str() != META_FIELD)
        .filter_map(|(key, value)| primitive_text(value).map(|text| (key.clone(), text)))
        .collect();

    Ok(EventRecord {
        token,
        timestamp,
        fields,
    })
}

/// Integer Unix seconds, a numeric string, or RFC 3339.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => Utc.timestamp_opt(number.as_i64()?, 0).single(),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(secs) = text.parse::<i64>() {
                return Utc.timestamp_opt(secs, 0).single();
            }
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc))
        }
        _ => None,
    }
}

fn value_to_text(value: &Value) -> Option<Token> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn primitive_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn malformed(token: &str, line_no: usize, reason: impl Into<String>) -> FunnelError {
    FunnelError::MalformedInput {
        token: token.to_string(),
        reason: format!("line {line_no}: {}", reason.into()),
    }
}
