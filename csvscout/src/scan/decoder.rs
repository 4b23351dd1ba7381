use std::borrow::Cow;
use std::sync::Arc;
use tracing::warn;

use crate::config::EncodingMode;
use crate::errors::{ScanError, ScanResult};

/// Longest byte run the decoder will buffer while waiting for a line
/// terminator. Lines are short in practice; hitting this means the input
/// is not line-delimited text.
pub(crate) const MAX_RECORD_BYTES: usize = 1024 * 1024;

/// One parsed data line. Column names come from the header and are assigned
/// positionally; a line with fewer fields than the header simply has no
/// value for the trailing columns.
#[derive(Debug, Clone)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<String>,
}

impl Record {
    /// The value for a named column, if the line reached that column.
    pub fn get(&self, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.get(index).map(String::as_str)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Incremental parser turning raw byte chunks into complete records.
///
/// Chunk boundaries are arbitrary: a trailing partial line is buffered and
/// completed by the next chunk, or by `finish` when the input ends without
/// a final newline. The first complete line of the stream is the header and
/// defines the column names; it is not counted as a record. Empty lines are
/// skipped without being counted.
#[derive(Debug)]
pub struct RecordDecoder {
    delimiter: u8,
    encoding: EncodingMode,
    columns: Option<Arc<[String]>>,
    remainder: Vec<u8>,
    lines_seen: u64,
    records_seen: u64,
}

impl RecordDecoder {
    pub fn new(delimiter: u8, encoding: EncodingMode) -> Self {
        Self {
            delimiter,
            encoding,
            columns: None,
            remainder: Vec::new(),
            lines_seen: 0,
            records_seen: 0,
        }
    }

    /// Number of complete records produced so far.
    pub fn records_seen(&self) -> u64 {
        self.records_seen
    }

    /// Column names decided from the header, once the header line is complete.
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Consumes one chunk and returns every record it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> ScanResult<Vec<Record>> {
        let mut buf = std::mem::take(&mut self.remainder);
        buf.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut start = 0;
        while let Some(offset) = buf[start..].iter().position(|&b| b == b'\n') {
            let line = &buf[start..start + offset];
            if let Some(record) = self.consume_line(line)? {
                records.push(record);
            }
            start += offset + 1;
        }
        buf.drain(..start);

        if buf.len() > MAX_RECORD_BYTES {
            return Err(ScanError::RecordTooLong {
                limit: MAX_RECORD_BYTES,
            });
        }
        self.remainder = buf;
        Ok(records)
    }

    /// Signals end of input. A buffered partial line becomes the final
    /// record, so a file without a trailing newline loses nothing.
    pub fn finish(&mut self) -> ScanResult<Option<Record>> {
        if self.remainder.is_empty() {
            return Ok(None);
        }
        let buf = std::mem::take(&mut self.remainder);
        self.consume_line(&buf)
    }

    fn consume_line(&mut self, raw: &[u8]) -> ScanResult<Option<Record>> {
        // Tolerate CRLF input.
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        self.lines_seen += 1;
        let line = self.decode_line(raw)?;

        let columns = match &self.columns {
            None => {
                // The first complete line is the header, not a record.
                let columns: Arc<[String]> = line
                    .split(self.delimiter as char)
                    .map(str::to_string)
                    .collect();
                self.columns = Some(columns);
                return Ok(None);
            }
            Some(columns) => columns,
        };

        if line.is_empty() {
            return Ok(None);
        }

        let values = line
            .split(self.delimiter as char)
            .take(columns.len())
            .map(|value| value.trim_end().to_string())
            .collect();
        self.records_seen += 1;
        Ok(Some(Record {
            columns: columns.clone(),
            values,
        }))
    }

    fn decode_line<'a>(&self, raw: &'a [u8]) -> ScanResult<Cow<'a, str>> {
        match self.encoding {
            EncodingMode::FailFast => match std::str::from_utf8(raw) {
                Ok(line) => Ok(Cow::Borrowed(line)),
                Err(source) => Err(ScanError::EncodingError {
                    line: self.lines_seen,
                    source,
                }),
            },
            EncodingMode::Lossy => {
                let cow = String::from_utf8_lossy(raw);
                if let Cow::Owned(_) = cow {
                    warn!("Invalid UTF-8 replaced on line {}", self.lines_seen);
                }
                Ok(cow)
            }
        }
    }
}
