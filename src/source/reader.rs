//! Format stream readers.
//!
//! A `FormatReader` is a lazy, forward-only sequence of decoded records
//! over one fetched object, tracking the line index of the record most
//! recently returned so offsets can be committed and replayed. Readers are
//! restartable: construction skips to a given start line.
//!
//! The closed set of formats (text lines, JSON lines, whole-object bytes)
//! hangs off `FormatKind`; the rest of the pipeline depends only on the
//! trait.

use bytes::Bytes;
use serde_json::Value;

use crate::config::FormatKind;
use crate::error::StorageError;
use crate::location::PathLocation;

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceData {
    Text(String),
    Json(Value),
    Bytes(Bytes),
}

/// Lazy, forward-only record sequence over one object.
pub trait FormatReader: Send {
    /// The object this reader consumes.
    fn location(&self) -> &PathLocation;

    /// 0-based line index of the record most recently returned, or -1
    /// before the first.
    fn current_line(&self) -> i64;

    /// Whether another record remains. Decode failures surface from
    /// `next_record`, not here.
    fn has_next(&self) -> bool;

    /// Decode and return the next record. Only defined when `has_next`.
    fn next_record(&mut self) -> Result<SourceData, StorageError>;
}

impl FormatKind {
    /// Open a reader over `bytes`, positioned so the first record returned
    /// is the one at `start_line`.
    pub fn open(
        &self,
        bytes: Bytes,
        location: PathLocation,
        start_line: i64,
    ) -> Box<dyn FormatReader> {
        match self {
            FormatKind::Text => Box::new(LineReader::new(bytes, location, start_line, false)),
            FormatKind::Json => Box::new(LineReader::new(bytes, location, start_line, true)),
            FormatKind::Bytes => Box::new(BytesReader::new(bytes, location, start_line)),
        }
    }
}

/// Reader over newline-delimited records, decoding each line as UTF-8 text
/// or as one JSON document.
struct LineReader {
    location: PathLocation,
    data: Bytes,
    /// Byte offset of the next unread line.
    pos: usize,
    line: i64,
    json: bool,
}

impl LineReader {
    fn new(bytes: Bytes, location: PathLocation, start_line: i64, json: bool) -> Self {
        let mut reader = Self {
            location,
            data: bytes,
            pos: 0,
            line: -1,
            json,
        };
        // Skip lines already committed; they stay counted in `line`.
        for _ in 0..start_line {
            if reader.advance_raw().is_none() {
                break;
            }
        }
        reader
    }

    /// Consume the next raw line, advancing position and line counter.
    fn advance_raw(&mut self) -> Option<&[u8]> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let (line_end, next_pos) = match rest.iter().position(|&b| b == b'\n') {
            Some(nl) => (nl, self.pos + nl + 1),
            None => (rest.len(), self.data.len()),
        };
        let start = self.pos;
        self.pos = next_pos;
        self.line += 1;
        Some(&self.data[start..start + line_end])
    }
}

impl FormatReader for LineReader {
    fn location(&self) -> &PathLocation {
        &self.location
    }

    fn current_line(&self) -> i64 {
        self.line
    }

    fn has_next(&self) -> bool {
        self.pos < self.data.len()
    }

    fn next_record(&mut self) -> Result<SourceData, StorageError> {
        let location = self.location.clone();
        let line_no = self.line + 1;
        let json = self.json;

        let raw = self
            .advance_raw()
            .ok_or_else(|| StorageError::Malformed {
                path: location.to_string(),
                line: line_no,
                message: "read past end of object".to_string(),
            })?;

        if json {
            let value: Value =
                serde_json::from_slice(raw).map_err(|e| StorageError::Malformed {
                    path: location.to_string(),
                    line: line_no,
                    message: e.to_string(),
                })?;
            Ok(SourceData::Json(value))
        } else {
            let text = std::str::from_utf8(raw).map_err(|e| StorageError::Malformed {
                path: location.to_string(),
                line: line_no,
                message: e.to_string(),
            })?;
            Ok(SourceData::Text(text.to_string()))
        }
    }
}

/// Reader that yields the whole object as one record at line 0.
struct BytesReader {
    location: PathLocation,
    data: Option<Bytes>,
    line: i64,
}

impl BytesReader {
    fn new(bytes: Bytes, location: PathLocation, start_line: i64) -> Self {
        // A committed line means the single record was already emitted.
        let data = if start_line > 0 { None } else { Some(bytes) };
        Self {
            location,
            data,
            line: if start_line > 0 { 0 } else { -1 },
        }
    }
}

impl FormatReader for BytesReader {
    fn location(&self) -> &PathLocation {
        &self.location
    }

    fn current_line(&self) -> i64 {
        self.line
    }

    fn has_next(&self) -> bool {
        self.data.is_some()
    }

    fn next_record(&mut self) -> Result<SourceData, StorageError> {
        let bytes = self.data.take().ok_or_else(|| StorageError::Malformed {
            path: self.location.to_string(),
            line: 0,
            message: "read past end of object".to_string(),
        })?;
        self.line = 0;
        Ok(SourceData::Bytes(bytes))
    }
}

/// Bounds a single poll's records from one format reader.
///
/// Pulls up to a limit per call; a decode failure after at least one good
/// record is held back and re-surfaced on the next call so no record is
/// dropped.
pub struct ResultReader {
    reader: Box<dyn FormatReader>,
    pending_error: Option<StorageError>,
}

impl ResultReader {
    pub fn new(reader: Box<dyn FormatReader>) -> Self {
        Self {
            reader,
            pending_error: None,
        }
    }

    pub fn location(&self) -> &PathLocation {
        self.reader.location()
    }

    pub fn current_line(&self) -> i64 {
        self.reader.current_line()
    }

    /// Whether the underlying reader has records (or a held-back error)
    /// left to surface.
    pub fn has_next(&self) -> bool {
        self.pending_error.is_some() || self.reader.has_next()
    }

    /// Pull up to `limit` records. `None` means the reader was exhausted
    /// before any record was read.
    pub fn retrieve_results(
        &mut self,
        limit: usize,
    ) -> Result<Option<Vec<(i64, SourceData)>>, StorageError> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        let mut records = Vec::new();
        while records.len() < limit && self.reader.has_next() {
            match self.reader.next_record() {
                Ok(data) => records.push((self.reader.current_line(), data)),
                Err(e) if records.is_empty() => return Err(e),
                Err(e) => {
                    self.pending_error = Some(e);
                    break;
                }
            }
        }

        if records.is_empty() {
            Ok(None)
        } else {
            Ok(Some(records))
        }
    }
}
