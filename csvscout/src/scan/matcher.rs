use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;

use super::decoder::Record;
use crate::config::FieldPattern;
use crate::errors::{ScanError, ScanResult};
use crate::results::MatchTally;

static PATTERN_CACHE: Lazy<DashMap<String, Arc<Regex>>> = Lazy::new(DashMap::new);

/// A validated set of field/pattern pairs.
///
/// Every pattern is compiled case-insensitively up front, so an invalid
/// pattern surfaces before any input is read. Tally keys are the pattern's
/// source text, which stays stable across isolated workers.
#[derive(Debug, Clone)]
pub struct Query {
    entries: Vec<QueryEntry>,
}

#[derive(Debug, Clone)]
struct QueryEntry {
    field: String,
    label: String,
    regex: Arc<Regex>,
}

impl Query {
    /// Compiles a query from field/pattern pairs. Fails on the first invalid
    /// pattern, or when no pairs are given.
    pub fn compile(patterns: &[FieldPattern]) -> ScanResult<Self> {
        if patterns.is_empty() {
            return Err(ScanError::EmptyQuery);
        }

        let mut entries = Vec::with_capacity(patterns.len());
        for spec in patterns {
            let regex = Self::compile_pattern(&spec.pattern)
                .map_err(|e| ScanError::invalid_pattern(&spec.field, e.to_string()))?;
            entries.push(QueryEntry {
                field: spec.field.clone(),
                label: spec.pattern.clone(),
                regex,
            });
        }
        Ok(Self { entries })
    }

    fn compile_pattern(source: &str) -> Result<Arc<Regex>, regex::Error> {
        if let Some(entry) = PATTERN_CACHE.get(source) {
            return Ok(entry.clone());
        }
        let regex = Arc::new(
            RegexBuilder::new(source)
                .case_insensitive(true)
                .build()?,
        );
        // Only successful compiles are cached; failures always re-surface.
        PATTERN_CACHE.insert(source.to_string(), regex.clone());
        Ok(regex)
    }

    /// Pattern labels in query order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Consumes records one at a time and keeps the running per-pattern tally.
///
/// `on_update` fires once per increment with the full tally snapshot, not
/// once per record: consumers treat the last update received as the
/// authoritative running total.
#[derive(Debug)]
pub struct OccurrenceMatcher {
    query: Query,
    tally: MatchTally,
}

impl OccurrenceMatcher {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            tally: MatchTally::new(),
        }
    }

    /// Tests a record against every query entry. A field absent from the
    /// header never matches. Returns how many entries matched.
    pub fn observe(&mut self, record: &Record, mut on_update: impl FnMut(&MatchTally)) -> usize {
        let mut hits = 0;
        for entry in &self.query.entries {
            if let Some(value) = record.get(&entry.field) {
                if entry.regex.is_match(value) {
                    self.tally.record(&entry.label);
                    hits += 1;
                    on_update(&self.tally);
                }
            }
        }
        hits
    }

    pub fn tally(&self) -> &MatchTally {
        &self.tally
    }

    pub fn into_tally(self) -> MatchTally {
        self.tally
    }
}
