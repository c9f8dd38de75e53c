//! Counters reported by the cycle runner.

use std::collections::BTreeMap;

use crate::types::{CorrectionResult, CorrectionStatus};

/// Aggregate counters for one run. Each worker keeps its own copy; the
/// runner merges them at shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerStats {
    /// Batches consumed from the source
    pub batches: u64,
    /// Device cycles processed across all workers
    pub device_cycles: u64,
    pub readings: u64,
    pub by_status: BTreeMap<CorrectionStatus, u64>,
    pub escalations: u64,
    pub escalations_failed: u64,
    pub payloads_delivered: u64,
    pub payloads_dropped: u64,
    pub provisioning_failures: u64,
    pub devices: u64,
}

impl RunnerStats {
    pub fn record(&mut self, result: &CorrectionResult) {
        self.readings += 1;
        *self.by_status.entry(result.status).or_insert(0) += 1;
        if result.escalation.is_some() {
            self.escalations += 1;
        }
    }

    pub fn count(&self, status: CorrectionStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    /// Readings whose value was altered or replaced.
    pub fn corrections(&self) -> u64 {
        self.by_status
            .iter()
            .filter(|(s, _)| s.is_correction())
            .map(|(_, n)| n)
            .sum()
    }

    pub fn merge(&mut self, other: &RunnerStats) {
        self.batches += other.batches;
        self.device_cycles += other.device_cycles;
        self.readings += other.readings;
        for (status, n) in &other.by_status {
            *self.by_status.entry(*status).or_insert(0) += n;
        }
        self.escalations += other.escalations;
        self.escalations_failed += other.escalations_failed;
        self.payloads_delivered += other.payloads_delivered;
        self.payloads_dropped += other.payloads_dropped;
        self.provisioning_failures += other.provisioning_failures;
        self.devices += other.devices;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_adds_counts() {
        let mut a = RunnerStats::default();
        a.record(&CorrectionResult::new(1.0, CorrectionStatus::Ok));
        a.record(&CorrectionResult::new(2.0, CorrectionStatus::Clipped));

        let mut b = RunnerStats::default();
        b.record(&CorrectionResult::new(3.0, CorrectionStatus::Clipped));
        b.payloads_dropped = 2;

        a.merge(&b);
        assert_eq!(a.readings, 3);
        assert_eq!(a.count(CorrectionStatus::Clipped), 2);
        assert_eq!(a.corrections(), 2);
        assert_eq!(a.payloads_dropped, 2);
    }
}
