/// Converts cumulative bytes consumed into a 0-100 percentage against a
/// total size known up front.
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    consumed: u64,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self { total, consumed: 0 }
    }

    /// Percentage before any input has been read. Emitting this lets a
    /// consumer distinguish "not started" from "no data received yet".
    pub fn begin(&self) -> f64 {
        0.0
    }

    /// Records one chunk and returns the updated percentage.
    pub fn advance(&mut self, bytes: u64) -> f64 {
        self.consumed += bytes;
        self.percent()
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.consumed as f64 / self.total as f64 * 100.0).min(100.0)
    }

    /// Whether the declared total has been consumed.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.consumed >= self.total
    }

    /// Forces the tracker to 100, for the end-of-input emission when the
    /// declared total overstated the stream.
    pub fn finish(&mut self) -> f64 {
        self.consumed = self.consumed.max(self.total);
        100.0
    }
}
