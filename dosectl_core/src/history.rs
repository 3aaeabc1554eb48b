//! Bounded record of completed doses.

use std::collections::VecDeque;

use serde::Serialize;

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DoseKind {
    Manual,
    Automatic,
    Scheduled,
}

/// One successful actuation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoseRecord {
    pub timestamp: f64,
    pub kind: DoseKind,
    pub duration_s: f64,
    /// ml/h
    pub flow_rate: f64,
    pub measurement_before: Option<f64>,
}

impl DoseRecord {
    /// Delivered volume in ml.
    pub fn volume_ml(&self) -> f64 {
        self.flow_rate * self.duration_s / 3600.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistorySummary {
    pub count: usize,
    pub manual: usize,
    pub automatic: usize,
    pub scheduled: usize,
    pub total_volume_ml: f64,
}

/// Ring buffer; the oldest record is evicted once `capacity` is reached.
#[derive(Debug)]
pub struct DoseHistory {
    records: VecDeque<DoseRecord>,
    capacity: usize,
}

impl Default for DoseHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl DoseHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, record: DoseRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DoseRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&DoseRecord> {
        self.records.back()
    }

    /// Up to `n` most recent records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<DoseRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    /// Aggregate records with `timestamp >= since` (all records when `None`).
    pub fn summary(&self, since: Option<f64>) -> HistorySummary {
        let mut out = HistorySummary::default();
        for r in self
            .records
            .iter()
            .filter(|r| since.is_none_or(|s| r.timestamp >= s))
        {
            out.count += 1;
            match r.kind {
                DoseKind::Manual => out.manual += 1,
                DoseKind::Automatic => out.automatic += 1,
                DoseKind::Scheduled => out.scheduled += 1,
            }
            out.total_volume_ml += r.volume_ml();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(ts: f64, kind: DoseKind) -> DoseRecord {
        DoseRecord {
            timestamp: ts,
            kind,
            duration_s: 36.0,
            flow_rate: 100.0,
            measurement_before: Some(0.3),
        }
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut h = DoseHistory::with_capacity(3);
        for i in 0..5 {
            h.push(rec(f64::from(i), DoseKind::Automatic));
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.iter().next().map(|r| r.timestamp), Some(2.0));
        assert_eq!(h.last().map(|r| r.timestamp), Some(4.0));
        let recent: Vec<f64> = h.recent(2).iter().map(|r| r.timestamp).collect();
        assert_eq!(recent, vec![3.0, 4.0]);
    }

    #[test]
    fn summary_counts_by_kind_and_volume() {
        let mut h = DoseHistory::default();
        h.push(rec(1.0, DoseKind::Manual));
        h.push(rec(2.0, DoseKind::Automatic));
        h.push(rec(3.0, DoseKind::Scheduled));
        let all = h.summary(None);
        assert_eq!((all.count, all.manual, all.automatic, all.scheduled), (3, 1, 1, 1));
        // 100 ml/h for 36 s = 1 ml each
        assert!((all.total_volume_ml - 3.0).abs() < 1e-9);
        assert_eq!(h.summary(Some(2.0)).count, 2);
    }
}
