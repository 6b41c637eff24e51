//! High-resolution timing utilities
//!
//! A [`HighResTimer`] wraps one long computation (a simulation, a solve). Checkpoints
//! are logged at trace level under the `timing` target, the final duration at debug.
//! Every stopped timer is folded into a process-wide table that binaries can read
//! with [`timer_stats`] before exiting.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::correlation_id;

static TIMER_TABLE: Lazy<Mutex<BTreeMap<String, Accumulator>>> = Lazy::new(|| Mutex::new(BTreeMap::new()));

/// Timer for one named computation
pub struct HighResTimer {
    name: String,
    start: Instant,
    /// Checkpoint names with their offset from `start`
    checkpoints: Vec<(String, Duration)>,
    fields: BTreeMap<String, String>,
}

impl HighResTimer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
            checkpoints: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Attach a field logged with every checkpoint and the final duration
    pub fn with_context(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Mark the end of a phase
    pub fn checkpoint(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        let offset = self.start.elapsed();
        let previous = self.checkpoints.last().map_or(Duration::ZERO, |(_, at)| *at);

        trace!(
            target: "timing",
            timer = %self.name,
            phase = %name,
            phase_us = (offset - previous).as_micros() as u64,
            elapsed_us = offset.as_micros() as u64,
            correlation_id = correlation_id().unwrap_or_default(),
            fields = ?self.fields,
            "phase finished"
        );

        self.checkpoints.push((name, offset));
        self
    }

    /// Checkpoint names in the order they were recorded
    pub fn checkpoint_names(&self) -> impl Iterator<Item = &str> {
        self.checkpoints.iter().map(|(name, _)| name.as_str())
    }

    /// Time since the timer was created
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Log the total, fold it into the process-wide table and return it
    pub fn stop(self) -> Duration {
        let total = self.start.elapsed();

        debug!(
            target: "timing",
            timer = %self.name,
            total_us = total.as_micros() as u64,
            phases = self.checkpoints.len(),
            correlation_id = correlation_id().unwrap_or_default(),
            fields = ?self.fields,
            "timer stopped"
        );

        record(&self.name, total);
        total
    }
}

/// Running totals for one timer name
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: u64,
    total: Duration,
    min: Duration,
    max: Duration,
    last: Duration,
}

impl Accumulator {
    fn first(sample: Duration) -> Self {
        Self {
            count: 1,
            total: sample,
            min: sample,
            max: sample,
            last: sample,
        }
    }

    fn add(&mut self, sample: Duration) {
        self.count += 1;
        self.total += sample;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        self.last = sample;
    }
}

fn record(name: &str, sample: Duration) {
    let mut table = TIMER_TABLE.lock();
    match table.get_mut(name) {
        Some(acc) => acc.add(sample),
        None => {
            table.insert(name.to_string(), Accumulator::first(sample));
        }
    }
}

/// Aggregated durations of every stopped timer with one name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerStatsSnapshot {
    pub name: String,
    pub count: u64,
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    /// Most recent measurement
    pub last: Duration,
}

impl TimerStatsSnapshot {
    fn new(name: &str, acc: &Accumulator) -> Self {
        let avg = acc.total / acc.count.max(1) as u32;
        Self {
            name: name.to_string(),
            count: acc.count,
            min: acc.min,
            max: acc.max,
            avg,
            last: acc.last,
        }
    }
}

/// Statistics for one timer, or every timer by name when `name` is `None`
pub fn timer_stats(name: Option<&str>) -> Vec<TimerStatsSnapshot> {
    let table = TIMER_TABLE.lock();
    match name {
        Some(name) => table
            .get(name)
            .map(|acc| TimerStatsSnapshot::new(name, acc))
            .into_iter()
            .collect(),
        None => table.iter().map(|(name, acc)| TimerStatsSnapshot::new(name, acc)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_checkpoints_and_stop() {
        let mut timer = HighResTimer::new("timing_test_checkpoints");
        timer.with_context("portfolio", "pf-1");
        sleep(Duration::from_millis(1));
        timer.checkpoint("load");
        sleep(Duration::from_millis(1));
        timer.checkpoint("solve");

        assert_eq!(timer.checkpoint_names().collect::<Vec<_>>(), vec!["load", "solve"]);
        assert!(timer.elapsed() >= Duration::from_millis(2));

        let total = timer.stop();
        assert!(total >= Duration::from_millis(2));

        let stats = timer_stats(Some("timing_test_checkpoints"));
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].count, 1);
        assert_eq!(stats[0].last, total);
    }

    #[test]
    fn test_table_aggregates_by_name() {
        let name = "timing_test_aggregate";
        for ms in 1..=5 {
            record(name, Duration::from_millis(ms));
        }

        let stats = &timer_stats(Some(name))[0];
        assert_eq!(stats.count, 5);
        assert_eq!(stats.min, Duration::from_millis(1));
        assert_eq!(stats.max, Duration::from_millis(5));
        assert_eq!(stats.avg, Duration::from_millis(3));
        assert_eq!(stats.last, Duration::from_millis(5));

        let all = timer_stats(None);
        assert!(all.iter().any(|s| s.name == name));
        assert!(all.windows(2).all(|w| w[0].name <= w[1].name));
    }

    #[test]
    fn test_unknown_timer_has_no_stats() {
        assert!(timer_stats(Some("timing_test_never_started")).is_empty());
    }
}
