//! Flow Summaries
//!
//! Watches the readings of numeric fields (volume counters, totals) and
//! turns them into deliveries: a delivery starts when the value moves and
//! finishes once the value has stayed put for the settle time, or when the
//! caller interrupts the wait.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::device::DeviceStatus;

/// Default time a value must stay unchanged before a delivery is finished
pub const DEFAULT_SETTLE_MS: u64 = 1000;

/// Per-field summarization state
#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    /// Most recent reading
    pub last_value: f64,
    /// True while the value is changing
    pub on_process: bool,
    /// When `last_value` was first seen
    pub same_value_since: DateTime<Utc>,
    /// Reading before the value started moving
    pub value_start: Option<f64>,
    /// Reading the delivery settled on
    pub value_finish: Option<f64>,
    /// When the value started moving
    pub time_start: Option<DateTime<Utc>>,
    /// When the value settled
    pub time_finish: Option<DateTime<Utc>>,
}

impl FlowState {
    fn new(value: f64, now: DateTime<Utc>) -> Self {
        Self {
            last_value: value,
            on_process: false,
            same_value_since: now,
            value_start: None,
            value_finish: None,
            time_start: None,
            time_finish: None,
        }
    }

    /// Delivered quantity, once a delivery has finished
    pub fn total(&self) -> Option<f64> {
        Some((self.value_finish? - self.value_start?).abs())
    }

    /// Delivery duration, once a delivery has finished
    pub fn duration(&self) -> Option<Duration> {
        Some(self.time_finish? - self.time_start?)
    }
}

/// Meter readings of a finished delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterSummary {
    /// Reading before the delivery
    pub start: f64,
    /// Reading after the delivery
    pub finish: f64,
    /// Absolute difference
    pub total: f64,
}

/// Time span of a finished delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSummary {
    /// First change seen
    pub start: DateTime<Utc>,
    /// Settle point
    pub finish: DateTime<Utc>,
    /// `finish - start`
    pub duration_ms: i64,
}

/// A finished delivery on one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSummary {
    /// Field the delivery was measured on
    pub name: String,
    /// Readings
    pub meter: MeterSummary,
    /// Timing
    pub time: TimeSummary,
    /// Device status of the reading that finished the delivery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
}

/// Debounce state machine for every numeric field seen so far
#[derive(Debug, Clone)]
pub struct FlowSummarizer {
    states: HashMap<String, FlowState>,
    interrupts: HashSet<String>,
    settle_ms: u64,
}

impl FlowSummarizer {
    /// Empty summarizer finishing deliveries after `settle_ms` of no change
    pub fn new(settle_ms: u64) -> Self {
        Self {
            states: HashMap::new(),
            interrupts: HashSet::new(),
            settle_ms,
        }
    }

    /// Current settle time
    pub fn settle_ms(&self) -> u64 {
        self.settle_ms
    }

    /// Change how long a value must hold before a delivery is finished
    pub fn set_settle_ms(&mut self, settle_ms: u64) {
        self.settle_ms = settle_ms;
    }

    /// State of `name`, once it has been observed
    pub fn state(&self, name: &str) -> Option<&FlowState> {
        self.states.get(name)
    }

    /// Whether a delivery is in progress on `name`
    pub fn is_changing(&self, name: &str) -> bool {
        self.states.get(name).is_some_and(|s| s.on_process)
    }

    /// Ask the next reading of `name` to finish the delivery without waiting
    /// out the settle time. Rejected unless a delivery is in progress.
    pub fn interrupt(&mut self, name: &str) -> bool {
        if !self.is_changing(name) {
            return false;
        }
        self.interrupts.insert(name.to_string());
        true
    }

    /// Start over on `name` from `value`. Rejected if the field was never seen.
    pub fn reset(&mut self, name: &str, value: f64, now: DateTime<Utc>) -> bool {
        match self.states.get_mut(name) {
            Some(state) => {
                *state = FlowState::new(value, now);
                self.interrupts.remove(name);
                true
            }
            None => false,
        }
    }

    /// Feed one reading. Returns true when this reading finished a delivery.
    pub fn observe(&mut self, name: &str, value: f64, now: DateTime<Utc>) -> bool {
        let settle = Duration::milliseconds(self.settle_ms as i64);
        let interrupted = self.interrupts.contains(name);
        let state = self
            .states
            .entry(name.to_string())
            .or_insert_with(|| FlowState::new(value, now));

        if value != state.last_value {
            if !state.on_process {
                // start from the previous reading so consecutive deliveries leave no gap
                state.value_start = Some(state.last_value);
                state.time_start = Some(now);
                state.on_process = true;
                state.value_finish = None;
                state.time_finish = None;
            }
            state.same_value_since = now;
        }

        let mut finished = false;
        if state.on_process
            && value == state.last_value
            && (now - state.same_value_since > settle || interrupted)
        {
            state.value_finish = Some(value);
            state.time_finish = Some(if interrupted { now } else { now - settle });
            state.on_process = false;
            state.same_value_since = now;
            finished = true;
        }

        state.last_value = value;

        if finished && interrupted {
            self.interrupts.remove(name);
        }
        finished
    }

    /// Summary of the last finished delivery on `name`
    pub fn summary(&self, name: &str) -> Option<FlowSummary> {
        let state = self.states.get(name)?;
        let start = state.time_start?;
        let finish = state.time_finish?;
        Some(FlowSummary {
            name: name.to_string(),
            meter: MeterSummary {
                start: state.value_start?,
                finish: state.value_finish?,
                total: state.total()?,
            },
            time: TimeSummary {
                start,
                finish,
                duration_ms: (finish - start).num_milliseconds(),
            },
            status: None,
        })
    }
}

impl Default for FlowSummarizer {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn feed(summarizer: &mut FlowSummarizer, readings: &[(f64, i64)]) -> Vec<bool> {
        readings
            .iter()
            .map(|(value, ms)| summarizer.observe("GrossQty_NE", *value, at(*ms)))
            .collect()
    }

    #[test]
    fn test_delivery_settles_after_limit() {
        let mut summarizer = FlowSummarizer::new(1000);
        let finished = feed(
            &mut summarizer,
            &[(100.0, 0), (100.0, 1), (150.0, 2), (150.0, 3), (150.0, 1004)],
        );
        assert_eq!(finished, vec![false, false, false, false, true]);

        let summary = summarizer.summary("GrossQty_NE").unwrap();
        assert_eq!(
            summary.meter,
            MeterSummary {
                start: 100.0,
                finish: 150.0,
                total: 50.0
            }
        );
        // finish time is compensated by the settle time
        assert_eq!(summary.time.start, at(2));
        assert_eq!(summary.time.finish, at(4));
        assert_eq!(summary.time.duration_ms, 2);
    }

    // With a zero limit the first repeated reading already exceeds it, so the
    // delivery finishes on the 4th call rather than the last one.
    // See "Settle with `msLimit = 0`" in DESIGN.md.
    #[test]
    fn test_zero_limit_settles_on_first_repeat() {
        let mut summarizer = FlowSummarizer::new(0);
        let finished = feed(
            &mut summarizer,
            &[(100.0, 0), (100.0, 1), (150.0, 2), (150.0, 3), (150.0, 1004)],
        );
        assert_eq!(finished, vec![false, false, false, true, false]);
        assert_eq!(summarizer.summary("GrossQty_NE").unwrap().meter.total, 50.0);
    }

    #[test]
    fn test_settled_value_does_not_refire() {
        let mut summarizer = FlowSummarizer::new(10);
        feed(&mut summarizer, &[(0.0, 0), (5.0, 1), (5.0, 20)]);
        let again = feed(&mut summarizer, &[(5.0, 40), (5.0, 100), (5.0, 5000)]);
        assert_eq!(again, vec![false, false, false]);

        // a new delivery starts from the settled value
        let next = feed(&mut summarizer, &[(8.0, 5001), (8.0, 5100)]);
        assert_eq!(next, vec![false, true]);
        let summary = summarizer.summary("GrossQty_NE").unwrap();
        assert_eq!(summary.meter.start, 5.0);
        assert_eq!(summary.meter.finish, 8.0);
    }

    #[test]
    fn test_decreasing_total_is_absolute() {
        let mut summarizer = FlowSummarizer::new(10);
        feed(&mut summarizer, &[(40.0, 0), (25.0, 1), (25.0, 50)]);
        assert_eq!(summarizer.summary("GrossQty_NE").unwrap().meter.total, 15.0);
    }

    #[test]
    fn test_jitter_keeps_delivery_open() {
        let mut summarizer = FlowSummarizer::new(100);
        let finished = feed(
            &mut summarizer,
            &[(0.0, 0), (1.0, 10), (2.0, 60), (3.0, 150), (3.0, 200), (3.0, 251)],
        );
        assert_eq!(finished, vec![false, false, false, false, false, true]);
        assert_eq!(summarizer.summary("GrossQty_NE").unwrap().meter.start, 0.0);
    }

    #[test]
    fn test_interrupt() {
        let mut summarizer = FlowSummarizer::new(60_000);
        assert!(!summarizer.interrupt("GrossQty_NE"));

        feed(&mut summarizer, &[(0.0, 0), (3.0, 10)]);
        assert!(summarizer.is_changing("GrossQty_NE"));
        assert!(summarizer.interrupt("GrossQty_NE"));

        assert!(summarizer.observe("GrossQty_NE", 3.0, at(20)));
        let summary = summarizer.summary("GrossQty_NE").unwrap();
        // no settle-time compensation when interrupted
        assert_eq!(summary.time.finish, at(20));
        assert!(!summarizer.is_changing("GrossQty_NE"));
        assert!(!summarizer.interrupt("GrossQty_NE"));
    }

    #[test]
    fn test_interrupt_waits_for_a_repeat() {
        let mut summarizer = FlowSummarizer::new(60_000);
        feed(&mut summarizer, &[(0.0, 0), (3.0, 10)]);
        summarizer.interrupt("GrossQty_NE");

        // value still moving: the interrupt stays pending
        assert!(!summarizer.observe("GrossQty_NE", 4.0, at(20)));
        assert!(summarizer.observe("GrossQty_NE", 4.0, at(30)));
    }

    #[test]
    fn test_fields_are_independent() {
        let mut summarizer = FlowSummarizer::new(10);
        summarizer.observe("A", 1.0, at(0));
        summarizer.observe("B", 1.0, at(0));
        summarizer.observe("A", 2.0, at(1));
        assert!(summarizer.is_changing("A"));
        assert!(!summarizer.is_changing("B"));
        assert!(summarizer.summary("B").is_none());
    }

    #[test]
    fn test_reset() {
        let mut summarizer = FlowSummarizer::new(10);
        assert!(!summarizer.reset("A", 0.0, at(0)));

        summarizer.observe("A", 1.0, at(0));
        summarizer.observe("A", 2.0, at(1));
        assert!(summarizer.reset("A", 7.0, at(2)));
        let state = summarizer.state("A").unwrap();
        assert_eq!(state.last_value, 7.0);
        assert!(!state.on_process);
        assert_eq!(state.total(), None);
    }
}
