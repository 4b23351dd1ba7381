use std::collections::BTreeMap;
use std::time::Duration;

/// Running count of matches per query pattern.
///
/// Keys are the pattern's source text, so tallies computed in isolated
/// workers can be summed without sharing any compiled state. Counts only
/// ever grow for the lifetime of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchTally {
    counts: BTreeMap<String, u64>,
}

impl MatchTally {
    /// Creates a new empty tally
    pub fn new() -> Self {
        Default::default()
    }

    /// Increments the count for a pattern label, returning the new count
    pub fn record(&mut self, label: &str) -> u64 {
        let count = self.counts.entry(label.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// The count recorded for one pattern label
    pub fn count(&self, label: &str) -> u64 {
        self.counts.get(label).copied().unwrap_or(0)
    }

    /// Sum of all per-pattern counts
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Iterates (label, count) pairs in label order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(label, count)| (label.as_str(), *count))
    }

    /// Adds another tally's counts into this one
    pub fn merge(&mut self, other: &MatchTally) {
        for (label, count) in &other.counts {
            *self.counts.entry(label.clone()).or_insert(0) += count;
        }
    }
}

/// Final accounting of one lane: either the whole file or one shard.
#[derive(Debug, Clone)]
pub struct LaneSummary {
    /// Number of records the lane decoded
    pub records: u64,
    /// Final per-pattern counts for the lane
    pub tally: MatchTally,
    /// Wall-clock time the lane ran for
    pub elapsed: Duration,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every lane finished normally
    Completed,
    /// The input had no data lines; nothing to do
    NoData,
    /// At least one worker failed; counts reflect the survivors only
    PartiallyFailed { failed: Vec<usize> },
}

/// Final accounting of one run, produced exactly once after all progress
/// and match events for the run have been emitted.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Total records decoded across all lanes
    pub records: u64,
    /// Aggregate per-pattern counts
    pub tally: MatchTally,
    /// Wall-clock time from planning start to the last terminal event
    pub elapsed: Duration,
    pub outcome: RunOutcome,
}

impl RunSummary {
    pub fn is_partial(&self) -> bool {
        matches!(self.outcome, RunOutcome::PartiallyFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_record() {
        let mut tally = MatchTally::new();
        assert_eq!(tally.count("hello"), 0);
        assert!(tally.is_empty());

        assert_eq!(tally.record("hello"), 1);
        assert_eq!(tally.record("hello"), 2);
        assert_eq!(tally.record("world"), 1);

        assert_eq!(tally.count("hello"), 2);
        assert_eq!(tally.count("world"), 1);
        assert_eq!(tally.total(), 3);
        assert!(!tally.is_empty());
    }

    #[test]
    fn test_tally_merge() {
        let mut left = MatchTally::new();
        left.record("hello");
        left.record("hello");

        let mut right = MatchTally::new();
        right.record("hello");
        right.record("goodbye");

        left.merge(&right);
        assert_eq!(left.count("hello"), 3);
        assert_eq!(left.count("goodbye"), 1);
        assert_eq!(left.total(), 4);
    }

    #[test]
    fn test_tally_merge_empty() {
        let mut tally = MatchTally::new();
        tally.record("hello");

        tally.merge(&MatchTally::new());
        assert_eq!(tally.count("hello"), 1);
        assert_eq!(tally.total(), 1);
    }

    #[test]
    fn test_tally_iter_order() {
        let mut tally = MatchTally::new();
        tally.record("zeta");
        tally.record("alpha");

        let labels: Vec<&str> = tally.iter().map(|(label, _)| label).collect();
        assert_eq!(labels, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_summary_outcome() {
        let summary = RunSummary {
            records: 10,
            tally: MatchTally::new(),
            elapsed: Duration::from_secs(1),
            outcome: RunOutcome::Completed,
        };
        assert!(!summary.is_partial());

        let summary = RunSummary {
            records: 5,
            tally: MatchTally::new(),
            elapsed: Duration::from_secs(1),
            outcome: RunOutcome::PartiallyFailed { failed: vec![1] },
        };
        assert!(summary.is_partial());
    }
}
