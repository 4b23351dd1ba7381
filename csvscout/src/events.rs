use std::time::Duration;

use crate::errors::ScanError;
use crate::results::{MatchTally, RunSummary};

/// Events emitted over the run's channel, in the order the aggregator
/// produced them. Within one worker the order follows the order its chunks
/// were read; across workers no order is guaranteed, so every event carries
/// the full aggregate state rather than a delta.
#[derive(Debug)]
pub enum ScanEvent {
    /// Fraction of the input consumed so far, 0 to 100. For parallel runs
    /// this is the unweighted mean of the workers' own fractions.
    Progress { percent: f64 },
    /// Some pattern's count increased; `tally` is the full current snapshot.
    Occurrences {
        tally: MatchTally,
        records: u64,
        elapsed: Duration,
    },
    /// One worker finished its shard.
    WorkerDone {
        index: usize,
        tally: MatchTally,
        records: u64,
        elapsed: Duration,
    },
    /// One worker failed; the run continues on the remaining shards.
    WorkerFailed { index: usize, error: ScanError },
    /// Terminal: the run is over. Emitted exactly once, after every other
    /// event for the run.
    Done(RunSummary),
}
