//! Time-ordered queue of one-shot doses.
//!
//! Entries are kept sorted by due time; entries with equal due times keep
//! their insertion order. An entry is marked executed the moment it is handed
//! out by `check_due`, so it runs at most once even if actuation then fails.

use serde::Serialize;

use crate::config::ControllerConfig;
use crate::error::ControlError;
use crate::util::SECS_PER_DAY;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledDose {
    pub id: u64,
    pub due_timestamp: f64,
    pub duration_s: f64,
    /// `None` means the configured default flow rate.
    pub flow_rate: Option<f64>,
    pub executed: bool,
    pub executed_at: Option<f64>,
}

#[derive(Debug, Default)]
pub struct DoseScheduler {
    entries: Vec<ScheduledDose>,
    next_id: u64,
}

impl DoseScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a dose. Past due times are accepted and run on the next check.
    pub fn schedule(
        &mut self,
        due_timestamp: f64,
        duration_s: f64,
        flow_rate: Option<f64>,
        cfg: &ControllerConfig,
    ) -> Result<ScheduledDose, ControlError> {
        if !due_timestamp.is_finite() {
            return Err(ControlError::validation(format!(
                "due timestamp must be finite, got {due_timestamp}"
            )));
        }
        cfg.check_duration(duration_s)?;
        if let Some(rate) = flow_rate {
            cfg.check_flow_rate(rate)?;
        }
        self.next_id += 1;
        let entry = ScheduledDose {
            id: self.next_id,
            due_timestamp,
            duration_s,
            flow_rate,
            executed: false,
            executed_at: None,
        };
        let at = self
            .entries
            .partition_point(|e| e.due_timestamp <= due_timestamp);
        self.entries.insert(at, entry.clone());
        Ok(entry)
    }

    /// Mark every pending entry with `due_timestamp <= now` executed and return them in due order.
    pub fn check_due(&mut self, now: f64) -> Vec<ScheduledDose> {
        let mut due = Vec::new();
        for e in &mut self.entries {
            if e.due_timestamp > now {
                break;
            }
            if !e.executed {
                e.executed = true;
                e.executed_at = Some(now);
                due.push(e.clone());
            }
        }
        due
    }

    /// Drop executed entries older than a day.
    pub fn prune(&mut self, now: f64) {
        let horizon = now - SECS_PER_DAY;
        self.entries
            .retain(|e| !e.executed || e.due_timestamp > horizon);
    }

    /// Prune, then return what remains.
    pub fn list_pending(&mut self, now: f64) -> Vec<ScheduledDose> {
        self.prune(now);
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove a not-yet-executed entry. Returns whether one was removed.
    pub fn cancel(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|e| e.id == id && !e.executed) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.executed).count()
    }

    pub fn next_due(&self) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| !e.executed)
            .map(|e| e.due_timestamp)
    }
}
