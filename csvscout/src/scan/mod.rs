/// The scan pipeline: file bytes flow strictly downward through
/// decoder → matcher, with progress tracked off the same chunk stream.
///
/// One [`LaneProcessor`] handles a single input source. The orchestrator
/// shards a file's data lines across worker threads, each running its own
/// lane over a synthesized header-plus-shard stream, and merges the
/// per-worker messages into one event channel. Workers never share mutable
/// state; everything crosses the boundary as a message.
pub mod decoder;
pub mod lane;
pub mod matcher;
pub mod orchestrator;
pub mod progress;

pub use decoder::{Record, RecordDecoder};
pub use lane::{LaneEvent, LaneProcessor};
pub use matcher::{OccurrenceMatcher, Query};
pub use orchestrator::{run, scan_file, RunHandle, ShardPlan};
pub use progress::ProgressTracker;
