//! Per-issue thrash tracking across adjudication iterations.
//!
//! An issue "thrashes" when it reappears in the pursuing set after a
//! refinement attempt. Counters survive restarts by round-tripping through
//! the run checkpoint.

use std::collections::{BTreeMap, BTreeSet};

/// Default number of overlaps after which an issue is chronic.
pub const DEFAULT_THRASH_THRESHOLD: u32 = 2;

/// Result of recording one adjudication's pursuing set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThrashReport {
    /// Issue ids pursued both this iteration and the previous one.
    pub overlapping: BTreeSet<String>,
    /// (issue id, overlap count) pairs at or past the threshold.
    pub chronic: Vec<(String, u32)>,
}

impl ThrashReport {
    pub fn has_chronic(&self) -> bool {
        !self.chronic.is_empty()
    }
}

/// Tracks per-issue overlap counters against a configured threshold.
#[derive(Debug, Clone)]
pub struct ThrashTracker {
    counts: BTreeMap<String, u32>,
    threshold: u32,
}

impl ThrashTracker {
    /// Rebuild a tracker from persisted counters.
    pub fn new(threshold: u32, counts: BTreeMap<String, u32>) -> Self {
        Self { counts, threshold }
    }

    /// Record one iteration's pursuing set against the previous one.
    ///
    /// Every id present in both sets has its counter incremented; ids at or
    /// past the threshold are reported chronic. A first overlap (counter
    /// below threshold) shows up in `overlapping` only.
    pub fn record(&mut self, previous: &BTreeSet<String>, current: &BTreeSet<String>) -> ThrashReport {
        let overlapping: BTreeSet<String> = previous.intersection(current).cloned().collect();
        let mut chronic = Vec::new();
        for id in &overlapping {
            let count = self.counts.entry(id.clone()).or_insert(0);
            *count += 1;
            if *count >= self.threshold {
                chronic.push((id.clone(), *count));
            }
        }
        ThrashReport { overlapping, chronic }
    }

    /// Counters for persistence in the run checkpoint.
    pub fn counts(&self) -> &BTreeMap<String, u32> {
        &self.counts
    }

    pub fn into_counts(self) -> BTreeMap<String, u32> {
        self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn first_overlap_is_logged_but_not_chronic() {
        let mut tracker = ThrashTracker::new(2, BTreeMap::new());
        let report = tracker.record(&ids(&["tone-001"]), &ids(&["tone-001", "tone-002"]));
        assert!(report.overlapping.contains("tone-001"));
        assert!(!report.has_chronic());
    }

    #[test]
    fn issue_pursued_three_iterations_escalates_on_third() {
        let mut tracker = ThrashTracker::new(2, BTreeMap::new());

        // Iteration 2: overlap with iteration 1 -> count 1, below threshold.
        let report = tracker.record(&ids(&["tone-001"]), &ids(&["tone-001"]));
        assert!(!report.has_chronic());

        // Iteration 3: second overlap -> count 2, chronic.
        let report = tracker.record(&ids(&["tone-001"]), &ids(&["tone-001"]));
        assert_eq!(report.chronic, vec![("tone-001".to_string(), 2)]);
    }

    #[test]
    fn disjoint_sets_leave_counters_untouched() {
        let mut tracker = ThrashTracker::new(2, BTreeMap::new());
        let report = tracker.record(&ids(&["a"]), &ids(&["b"]));
        assert!(report.overlapping.is_empty());
        assert!(tracker.counts().is_empty());
    }

    #[test]
    fn counters_resume_from_persisted_state() {
        let mut persisted = BTreeMap::new();
        persisted.insert("tone-001".to_string(), 1);
        let mut tracker = ThrashTracker::new(2, persisted);

        let report = tracker.record(&ids(&["tone-001"]), &ids(&["tone-001"]));
        assert_eq!(report.chronic, vec![("tone-001".to_string(), 2)]);
    }
}
