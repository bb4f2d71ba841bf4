//! Decoded execution results.

use std::collections::HashMap;

use alsvid_api::RawResultResource;
use serde::{Deserialize, Serialize};

/// Measured bitstring counts for one circuit execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts(HashMap<String, u64>);

impl Counts {
    /// Empty counts.
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Add `count` observations of `bitstring`.
    pub fn add(&mut self, bitstring: impl Into<String>, count: u64) {
        *self.0.entry(bitstring.into()).or_insert(0) += count;
    }

    /// Observations of `bitstring`; 0 when never measured.
    pub fn get(&self, bitstring: &str) -> u64 {
        self.0.get(bitstring).copied().unwrap_or(0)
    }

    /// Total number of observed shots.
    pub fn total_shots(&self) -> u64 {
        self.0.values().sum()
    }

    /// The most frequently observed bitstring.
    pub fn most_frequent(&self) -> Option<(&str, u64)> {
        self.0
            .iter()
            .max_by_key(|&(_, &count)| count)
            .map(|(bits, &count)| (bits.as_str(), count))
    }

    /// Iterate over `(bitstring, count)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(bits, &count)| (bits.as_str(), count))
    }

    /// Number of distinct bitstrings observed.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no shots were observed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, u64>> for Counts {
    fn from(map: HashMap<String, u64>) -> Self {
        Self(map)
    }
}

/// Decoded results for one circuit execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Measured bitstring counts.
    pub counts: Counts,
    /// Shots the submission asked for.
    pub shots_requested: u32,
    /// Shots the device actually completed.
    pub shots_done: u32,
}

impl ExecutionResult {
    /// Merge the raw result records of one circuit into a decoded result.
    ///
    /// The server emits no records for a failed circuit, so an empty slice
    /// decodes to empty counts with zero shots.
    pub fn from_raw(records: &[RawResultResource]) -> Self {
        let mut counts = Counts::new();
        let mut shots_requested = 0;
        let mut shots_done = 0;

        for record in records {
            for (bitstring, &count) in &record.results {
                counts.add(bitstring.clone(), count);
            }
            shots_requested += record.shots_requested;
            shots_done += record.shots_done;
        }

        Self {
            counts,
            shots_requested,
            shots_done,
        }
    }

    /// Whether the execution produced usable shots.
    pub fn is_success(&self) -> bool {
        self.shots_done > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, results: &[(&str, u64)], shots: u32) -> RawResultResource {
        RawResultResource {
            id: id.into(),
            job_id: "j1".into(),
            shots_requested: shots,
            shots_done: shots,
            results: results
                .iter()
                .map(|(bits, count)| (bits.to_string(), *count))
                .collect(),
        }
    }

    #[test]
    fn test_from_raw_single_record() {
        let decoded = ExecutionResult::from_raw(&[record("r1", &[("00", 600), ("11", 424)], 1024)]);

        assert_eq!(decoded.counts.get("00"), 600);
        assert_eq!(decoded.counts.get("11"), 424);
        assert_eq!(decoded.counts.get("01"), 0);
        assert_eq!(decoded.counts.total_shots(), 1024);
        assert_eq!(decoded.shots_done, 1024);
        assert!(decoded.is_success());
    }

    #[test]
    fn test_from_raw_merges_records() {
        let decoded = ExecutionResult::from_raw(&[
            record("r1", &[("00", 300), ("11", 212)], 512),
            record("r2", &[("00", 280), ("11", 232)], 512),
        ]);

        assert_eq!(decoded.counts.get("00"), 580);
        assert_eq!(decoded.counts.get("11"), 444);
        assert_eq!(decoded.shots_requested, 1024);
        assert_eq!(decoded.shots_done, 1024);
    }

    #[test]
    fn test_from_raw_empty_means_failed_circuit() {
        let decoded = ExecutionResult::from_raw(&[]);
        assert!(decoded.counts.is_empty());
        assert_eq!(decoded.shots_done, 0);
        assert!(!decoded.is_success());
    }

    #[test]
    fn test_most_frequent() {
        let mut counts = Counts::new();
        counts.add("00", 10);
        counts.add("11", 30);
        counts.add("01", 5);
        assert_eq!(counts.most_frequent(), Some(("11", 30)));
        assert!(Counts::new().most_frequent().is_none());
    }

    #[test]
    fn test_serde_round_trip() {
        let decoded = ExecutionResult::from_raw(&[record("r1", &[("0", 7)], 7)]);
        let json = serde_json::to_string(&decoded).unwrap();
        let back: ExecutionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, decoded);
    }
}
