use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use super::decoder::RecordDecoder;
use super::matcher::{OccurrenceMatcher, Query};
use super::progress::ProgressTracker;
use crate::config::EncodingMode;
use crate::errors::{ScanError, ScanResult};
use crate::results::{LaneSummary, MatchTally};

pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

/// Non-terminal events of one lane. The terminal outcome is the return
/// value of [`LaneProcessor::process`]: a summary on completion, an error
/// on failure. Nothing is emitted after a failure.
#[derive(Debug, Clone)]
pub enum LaneEvent {
    /// Fraction of this lane's input consumed, 0 to 100
    Progress { percent: f64 },
    /// Some pattern's count increased
    Occurrences {
        tally: MatchTally,
        records: u64,
        elapsed: Duration,
    },
}

/// One decoder → matcher pipeline, with progress tracked off the same chunk
/// stream, over a single input source: the whole file, or one shard of it.
///
/// Runs cooperatively on the caller's thread; chunk reads are the only
/// blocking points. The cancel flag is checked between chunks.
#[derive(Debug, Clone)]
pub struct LaneProcessor {
    query: Query,
    delimiter: u8,
    encoding: EncodingMode,
}

impl LaneProcessor {
    pub fn new(query: Query, delimiter: u8, encoding: EncodingMode) -> Self {
        Self {
            query,
            delimiter,
            encoding,
        }
    }

    /// Drains `source`, pushing events into `sink` as chunks are consumed.
    ///
    /// Event order per chunk: one progress emission, then one occurrence
    /// update per tally increment the chunk produced. An initial 0% is
    /// emitted before the first read.
    pub fn process<R: Read>(
        &self,
        mut source: R,
        total_bytes: u64,
        cancel: &AtomicBool,
        mut sink: impl FnMut(LaneEvent),
    ) -> ScanResult<LaneSummary> {
        let started = Instant::now();
        let mut decoder = RecordDecoder::new(self.delimiter, self.encoding);
        let mut matcher = OccurrenceMatcher::new(self.query.clone());
        let mut tracker = ProgressTracker::new(total_bytes);
        let mut buf = vec![0u8; CHUNK_SIZE];

        sink(LaneEvent::Progress {
            percent: tracker.begin(),
        });

        loop {
            if cancel.load(Ordering::Relaxed) {
                debug!(
                    "lane cancelled after {} records",
                    decoder.records_seen()
                );
                return Err(ScanError::Cancelled);
            }
            let read = match source.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if read == 0 {
                break;
            }
            sink(LaneEvent::Progress {
                percent: tracker.advance(read as u64),
            });
            let records = decoder.feed(&buf[..read])?;
            for record in &records {
                matcher.observe(record, |tally| {
                    sink(LaneEvent::Occurrences {
                        tally: tally.clone(),
                        records: decoder.records_seen(),
                        elapsed: started.elapsed(),
                    });
                });
            }
        }

        // A trailing line without a newline is still one record.
        if let Some(record) = decoder.finish()? {
            matcher.observe(&record, |tally| {
                sink(LaneEvent::Occurrences {
                    tally: tally.clone(),
                    records: decoder.records_seen(),
                    elapsed: started.elapsed(),
                });
            });
        }
        if !tracker.is_complete() {
            sink(LaneEvent::Progress {
                percent: tracker.finish(),
            });
        }

        debug!(
            "lane complete: {} records, {} matches",
            decoder.records_seen(),
            matcher.tally().total()
        );
        Ok(LaneSummary {
            records: decoder.records_seen(),
            tally: matcher.into_tally(),
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldPattern;
    use std::io::{self, Cursor};

    /// Yields at most `step` bytes per read, to force chunk boundaries that
    /// fall mid-line.
    struct SlowReader {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for SlowReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let end = (self.pos + self.step).min(self.data.len());
            let n = (end - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// Fails with an I/O error once the good bytes run out.
    struct FailingReader {
        good: Cursor<Vec<u8>>,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.good.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::Other, "stream broke")),
                n => Ok(n),
            }
        }
    }

    fn lane(field: &str, pattern: &str) -> LaneProcessor {
        let query = Query::compile(&[FieldPattern::regex(field, pattern)]).unwrap();
        LaneProcessor::new(query, b',', crate::config::EncodingMode::FailFast)
    }

    fn not_cancelled() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn test_hello_world_scenario() {
        let input = b"id,call description\n1,hello world\n2,goodbye\n".to_vec();
        let total = input.len() as u64;
        let mut events = Vec::new();

        let summary = lane("call description", "hello")
            .process(Cursor::new(input), total, &not_cancelled(), |e| {
                events.push(e)
            })
            .unwrap();

        assert_eq!(summary.records, 2);
        assert_eq!(summary.tally.count("hello"), 1);
        assert_eq!(summary.tally.total(), 1);

        // Initial 0% precedes everything else.
        assert!(matches!(events[0], LaneEvent::Progress { percent } if percent == 0.0));

        let updates: Vec<(u64, u64)> = events
            .iter()
            .filter_map(|e| match e {
                LaneEvent::Occurrences { tally, records, .. } => {
                    Some((tally.count("hello"), *records))
                }
                _ => None,
            })
            .collect();
        assert_eq!(updates, vec![(1, 2)]);
    }

    #[test]
    fn test_progress_is_monotonic_and_reaches_100() {
        let mut data = b"id,name\n".to_vec();
        for i in 0..500 {
            data.extend_from_slice(format!("{},person-{}\n", i, i).as_bytes());
        }
        let total = data.len() as u64;
        let reader = SlowReader {
            data,
            pos: 0,
            step: 37,
        };

        let mut last = -1.0f64;
        let mut final_percent = 0.0;
        lane("name", "person")
            .process(reader, total, &not_cancelled(), |e| {
                if let LaneEvent::Progress { percent } = e {
                    assert!(percent >= last, "progress regressed: {} < {}", percent, last);
                    last = percent;
                    final_percent = percent;
                }
            })
            .unwrap();
        assert_eq!(final_percent, 100.0);
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_tally() {
        let mut data = b"id,call description\n".to_vec();
        for i in 0..100 {
            let text = if i % 3 == 0 { "hello there" } else { "nothing" };
            data.extend_from_slice(format!("{},{}\n", i, text).as_bytes());
        }
        let total = data.len() as u64;

        let baseline = lane("call description", "hello")
            .process(Cursor::new(data.clone()), total, &not_cancelled(), |_| {})
            .unwrap();

        for step in [1, 7, 64, 1000] {
            let reader = SlowReader {
                data: data.clone(),
                pos: 0,
                step,
            };
            let summary = lane("call description", "hello")
                .process(reader, total, &not_cancelled(), |_| {})
                .unwrap();
            assert_eq!(summary.records, baseline.records, "step {}", step);
            assert_eq!(summary.tally, baseline.tally, "step {}", step);
        }
    }

    #[test]
    fn test_trailing_line_without_newline_is_counted() {
        let input = b"id,name\n1,alice\n2,bob".to_vec();
        let total = input.len() as u64;
        let summary = lane("name", "bob")
            .process(Cursor::new(input), total, &not_cancelled(), |_| {})
            .unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.tally.total(), 1);
    }

    #[test]
    fn test_empty_input_completes_with_zero_records() {
        let mut events = Vec::new();
        let summary = lane("name", "x")
            .process(Cursor::new(Vec::new()), 0, &not_cancelled(), |e| {
                events.push(e)
            })
            .unwrap();
        assert_eq!(summary.records, 0);
        assert!(summary.tally.is_empty());
        assert!(matches!(events[0], LaneEvent::Progress { percent } if percent == 0.0));
        assert!(
            matches!(events.last(), Some(LaneEvent::Progress { percent }) if *percent == 100.0)
        );
    }

    #[test]
    fn test_read_failure_short_circuits() {
        let reader = FailingReader {
            good: Cursor::new(b"id,name\n1,alice\n".to_vec()),
        };
        let mut events = Vec::new();
        let result = lane("name", "alice").process(reader, 1000, &not_cancelled(), |e| {
            events.push(e)
        });
        assert!(matches!(result, Err(ScanError::IoError(_))));
        // The lane got partway: progress was reported for the good bytes,
        // but no final 100% emission followed the failure.
        assert!(!events
            .iter()
            .any(|e| matches!(e, LaneEvent::Progress { percent } if *percent == 100.0)));
    }

    #[test]
    fn test_cancel_stops_before_next_chunk() {
        let cancelled = AtomicBool::new(true);
        let input = b"id,name\n1,alice\n".to_vec();
        let result = lane("name", "alice").process(Cursor::new(input), 16, &cancelled, |_| {});
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }
}
