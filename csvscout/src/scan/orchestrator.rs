use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::lane::{LaneEvent, LaneProcessor};
use super::matcher::Query;
use crate::config::{EncodingMode, ScanConfig};
use crate::errors::{ScanError, ScanResult};
use crate::events::ScanEvent;
use crate::results::{MatchTally, RunOutcome, RunSummary};

// Constants for input loading
const BUFFER_CAPACITY: usize = 65536;
pub(crate) const SMALL_FILE_THRESHOLD: u64 = 32 * 1024; // 32KB
pub(crate) const LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024; // 10MB

/// Contiguous assignment of a file's data lines to workers.
///
/// Shards partition the data lines exactly once, in original order; the
/// header is replayed at the front of every shard so each worker decodes
/// against the same column names. With fewer data lines than requested
/// workers, the worker count drops to the line count, down to zero for a
/// file with no data lines at all.
#[derive(Debug)]
pub struct ShardPlan {
    header: String,
    lines: Vec<String>,
    workers: usize,
    chunk_size: usize,
}

impl ShardPlan {
    /// Splits `text` into a header and non-empty data lines and sizes the
    /// shards as `ceil(lines / requested)`.
    pub fn build(text: &str, requested: NonZeroUsize) -> Self {
        let mut pieces = text.split('\n');
        let header = pieces.next().unwrap_or("").to_string();
        let lines: Vec<String> = pieces
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        let workers = requested.get().min(lines.len());
        let chunk_size = if workers == 0 {
            0
        } else {
            lines.len().div_ceil(workers)
        };
        Self {
            header,
            lines,
            workers,
            chunk_size,
        }
    }

    /// Effective worker count: never more than there are data lines.
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Number of data lines being distributed.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// The data lines assigned to one shard.
    pub fn shard_lines(&self, index: usize) -> &[String] {
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.lines.len());
        &self.lines[start..end]
    }

    /// The byte stream handed to one worker: header plus the shard's lines.
    pub fn shard_text(&self, index: usize) -> String {
        let mut text = self.header.clone();
        for line in self.shard_lines(index) {
            text.push('\n');
            text.push_str(line);
        }
        text
    }
}

/// Owning handle for an in-flight run: the merged event stream, the
/// cooperative stop signal, and the execution units behind it.
///
/// Dropping the handle requests cancellation, so starting a new run after
/// discarding an old handle never leaves stray workers feeding anyone.
#[derive(Debug)]
pub struct RunHandle {
    events: Receiver<ScanEvent>,
    cancel: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl RunHandle {
    /// The run's event stream. Iterating it to the `Done` event (or until
    /// it disconnects) consumes the whole run.
    pub fn events(&self) -> &Receiver<ScanEvent> {
        &self.events
    }

    /// Requests cooperative termination of every worker. Idempotent, and
    /// safe to call after the run has already finished. Events produced
    /// after cancellation are dropped, not queued.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Waits for every execution unit to exit.
    pub fn join(mut self) {
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

/// What a worker sends the aggregator. Senders are per-worker clones of one
/// channel, so delivery for a single worker is serialized.
struct WorkerMessage {
    index: usize,
    payload: WorkerPayload,
}

enum WorkerPayload {
    Event(LaneEvent),
    Finished(crate::results::LaneSummary),
    Failed(ScanError),
    Cancelled,
}

/// Per-worker slot owned by the aggregator. Written only from that
/// worker's messages; aggregation reads across all slots.
#[derive(Default)]
struct WorkerState {
    progress: f64,
    tally: MatchTally,
    records: u64,
    done: bool,
    failed: bool,
}

/// Runs the whole file through one lane on the caller's thread.
///
/// This is the cooperative single-lane path: the sink sees the lane's
/// events as the file streams through, and the summary is the terminal
/// result. Configuration problems surface before the file is opened.
pub fn scan_file(config: &ScanConfig, sink: impl FnMut(LaneEvent)) -> ScanResult<RunSummary> {
    let query = Query::compile(&config.patterns)?;
    let started = Instant::now();

    let file = open_input(&config.file_path)?;
    let total_bytes = file.metadata()?.len();
    info!(
        "scanning {} ({} bytes) on the caller's thread",
        config.file_path.display(),
        total_bytes
    );

    let lane = LaneProcessor::new(query, config.delimiter_byte(), config.encoding_mode);
    let reader = BufReader::with_capacity(BUFFER_CAPACITY, file);
    let summary = lane.process(reader, total_bytes, &AtomicBool::new(false), sink)?;

    info!(
        "scan complete: {} records, {} matches",
        summary.records,
        summary.tally.total()
    );
    Ok(RunSummary {
        records: summary.records,
        tally: summary.tally,
        elapsed: started.elapsed(),
        outcome: RunOutcome::Completed,
    })
}

/// Shards the file across worker threads and returns a handle to the
/// merged event stream.
///
/// Planning happens on the caller's thread: query validation, loading the
/// file, and building the shard plan all fail synchronously. A plan with
/// zero workers short-circuits to a `NoData` terminal event. Otherwise one
/// thread per shard runs a lane over the shard's synthesized byte stream,
/// and an aggregator thread merges the per-worker messages into the
/// handle's events.
pub fn run(config: &ScanConfig) -> ScanResult<RunHandle> {
    let query = Query::compile(&config.patterns)?;
    let started = Instant::now();

    let text = read_source(&config.file_path, config.encoding_mode)?;
    let plan = ShardPlan::build(&text, config.thread_count);
    drop(text);

    let (event_tx, event_rx) = mpsc::channel();
    let cancel = Arc::new(AtomicBool::new(false));

    if plan.worker_count() == 0 {
        info!("no data lines in {}", config.file_path.display());
        let _ = event_tx.send(ScanEvent::Done(RunSummary {
            records: 0,
            tally: MatchTally::new(),
            elapsed: started.elapsed(),
            outcome: RunOutcome::NoData,
        }));
        return Ok(RunHandle {
            events: event_rx,
            cancel,
            threads: Vec::new(),
        });
    }

    info!(
        "distributing {} lines across {} worker(s)",
        plan.line_count(),
        plan.worker_count()
    );

    let (worker_tx, worker_rx) = mpsc::channel::<WorkerMessage>();
    let lane = LaneProcessor::new(query, config.delimiter_byte(), config.encoding_mode);
    let mut threads = Vec::with_capacity(plan.worker_count() + 1);

    for index in 0..plan.worker_count() {
        let shard = plan.shard_text(index);
        let lane = lane.clone();
        let tx = worker_tx.clone();
        let cancel = Arc::clone(&cancel);
        let handle = std::thread::Builder::new()
            .name(format!("csvscout-worker-{index}"))
            .spawn(move || {
                let total = shard.len() as u64;
                let result = lane.process(Cursor::new(shard), total, &cancel, |event| {
                    let _ = tx.send(WorkerMessage {
                        index,
                        payload: WorkerPayload::Event(event),
                    });
                });
                let payload = match result {
                    Ok(summary) => WorkerPayload::Finished(summary),
                    Err(ScanError::Cancelled) => WorkerPayload::Cancelled,
                    Err(error) => WorkerPayload::Failed(error),
                };
                let _ = tx.send(WorkerMessage { index, payload });
            })?;
        threads.push(handle);
    }
    drop(worker_tx);

    let worker_count = plan.worker_count();
    let aggregator_cancel = Arc::clone(&cancel);
    let aggregator = std::thread::Builder::new()
        .name("csvscout-aggregate".to_string())
        .spawn(move || {
            aggregate(
                worker_rx,
                event_tx,
                worker_count,
                started,
                aggregator_cancel,
            )
        })?;
    threads.push(aggregator);

    Ok(RunHandle {
        events: event_rx,
        cancel,
        threads,
    })
}

/// Merges per-worker messages into the public event stream.
///
/// All per-worker state lives here, written only from the owning worker's
/// messages. Progress is re-averaged over the latest value per worker on
/// every progress message; tallies are kept per worker and summed at
/// reporting time, so aggregation stays idempotent regardless of how the
/// workers interleave.
fn aggregate(
    rx: Receiver<WorkerMessage>,
    events: Sender<ScanEvent>,
    worker_count: usize,
    started: Instant,
    cancel: Arc<AtomicBool>,
) {
    let mut states: Vec<WorkerState> = (0..worker_count).map(|_| WorkerState::default()).collect();
    let mut terminals = 0usize;

    while let Ok(WorkerMessage { index, payload }) = rx.recv() {
        if cancel.load(Ordering::Relaxed) {
            // Cancelled: stop forwarding; in-flight worker events are
            // dropped, never queued for a dead run.
            break;
        }
        match payload {
            WorkerPayload::Event(LaneEvent::Progress { percent }) => {
                states[index].progress = percent;
                let average =
                    states.iter().map(|s| s.progress).sum::<f64>() / worker_count as f64;
                let _ = events.send(ScanEvent::Progress { percent: average });
            }
            WorkerPayload::Event(LaneEvent::Occurrences { tally, records, .. }) => {
                states[index].tally = tally;
                states[index].records = records;
                let _ = events.send(ScanEvent::Occurrences {
                    tally: merged_tally(&states, false),
                    records: states.iter().map(|s| s.records).sum(),
                    elapsed: started.elapsed(),
                });
            }
            WorkerPayload::Finished(summary) => {
                states[index].tally = summary.tally.clone();
                states[index].records = summary.records;
                states[index].done = true;
                terminals += 1;
                debug!(
                    "worker {} done ({}/{})",
                    index, terminals, worker_count
                );
                let _ = events.send(ScanEvent::WorkerDone {
                    index,
                    tally: summary.tally,
                    records: summary.records,
                    elapsed: summary.elapsed,
                });
            }
            WorkerPayload::Failed(error) => {
                states[index].done = true;
                states[index].failed = true;
                terminals += 1;
                warn!("worker {} failed: {}", index, error);
                let _ = events.send(ScanEvent::WorkerFailed { index, error });
            }
            WorkerPayload::Cancelled => {
                states[index].done = true;
                terminals += 1;
            }
        }
        if terminals == worker_count {
            break;
        }
    }

    if cancel.load(Ordering::Relaxed) {
        debug!("run cancelled; discarding aggregate state");
        return;
    }

    // A worker whose sender dropped without a terminal message escaped the
    // event protocol; charge the failure to its index.
    for (index, state) in states.iter_mut().enumerate() {
        if !state.done {
            state.done = true;
            state.failed = true;
            warn!("worker {} vanished without a terminal message", index);
            let _ = events.send(ScanEvent::WorkerFailed {
                index,
                error: ScanError::WorkerFault { index },
            });
        }
    }

    let failed: Vec<usize> = states
        .iter()
        .enumerate()
        .filter(|(_, s)| s.failed)
        .map(|(i, _)| i)
        .collect();
    let summary = RunSummary {
        records: states
            .iter()
            .filter(|s| !s.failed)
            .map(|s| s.records)
            .sum(),
        tally: merged_tally(&states, true),
        elapsed: started.elapsed(),
        outcome: if failed.is_empty() {
            RunOutcome::Completed
        } else {
            RunOutcome::PartiallyFailed { failed }
        },
    };
    let _ = events.send(ScanEvent::Progress { percent: 100.0 });
    let _ = events.send(ScanEvent::Done(summary));
}

/// Sum of the latest per-worker tallies. The final report excludes failed
/// workers; running updates include every worker's last known counts.
fn merged_tally(states: &[WorkerState], exclude_failed: bool) -> MatchTally {
    let mut merged = MatchTally::new();
    for state in states {
        if exclude_failed && state.failed {
            continue;
        }
        merged.merge(&state.tally);
    }
    merged
}

fn open_input(path: &Path) -> ScanResult<File> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ScanError::file_not_found(path),
        std::io::ErrorKind::PermissionDenied => ScanError::permission_denied(path),
        _ => ScanError::IoError(e),
    })
}

/// Loads the whole input for shard planning, choosing the read strategy by
/// file size.
fn read_source(path: &Path, encoding: EncodingMode) -> ScanResult<String> {
    let file = open_input(path)?;
    let size = file.metadata()?.len();

    if size >= LARGE_FILE_THRESHOLD {
        debug!("memory-mapping {} ({} bytes)", path.display(), size);
        let mmap = unsafe { Mmap::map(&file) }.map_err(ScanError::IoError)?;
        decode_source(&mmap, encoding)
    } else if size < SMALL_FILE_THRESHOLD {
        drop(file);
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ScanError::file_not_found(path),
            std::io::ErrorKind::PermissionDenied => ScanError::permission_denied(path),
            _ => ScanError::IoError(e),
        })?;
        decode_source(&bytes, encoding)
    } else {
        let mut reader = BufReader::with_capacity(BUFFER_CAPACITY, file);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(ScanError::IoError)?;
        decode_source(&bytes, encoding)
    }
}

fn decode_source(bytes: &[u8], encoding: EncodingMode) -> ScanResult<String> {
    match encoding {
        EncodingMode::FailFast => match std::str::from_utf8(bytes) {
            Ok(text) => Ok(text.to_owned()),
            Err(source) => {
                let line = bytes[..source.valid_up_to()]
                    .iter()
                    .filter(|&&b| b == b'\n')
                    .count() as u64
                    + 1;
                Err(ScanError::EncodingError { line, source })
            }
        },
        EncodingMode::Lossy => {
            let cow = String::from_utf8_lossy(bytes);
            if let Cow::Owned(_) = cow {
                warn!("Invalid UTF-8 replaced in input");
            }
            Ok(cow.into_owned())
        }
    }
}
