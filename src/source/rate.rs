use std::time::Instant;

use crate::monitor::InterfaceCounters;

use super::stats::{RunningStats, Stats};

/// Inbound and outbound byte rates in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rates {
    pub inbound: f64,
    pub outbound: f64,
}

impl Rates {
    pub fn combined(&self) -> f64 {
        self.inbound + self.outbound
    }
}

/// Counter differencing shared by the interface throughput sources.
///
/// The first update only stores a baseline and reports zero rates. Later
/// updates divide the counter deltas by the elapsed time; when no time has
/// passed the previous rates are returned unchanged. Deltas use wrapping
/// 32-bit subtraction, so a counter reset shows up as one large spike.
#[derive(Debug, Default)]
pub struct RateTracker {
    baseline: Option<(InterfaceCounters, Instant)>,
    last: Rates,
    inbound: RunningStats,
    outbound: RunningStats,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, counters: InterfaceCounters, now: Instant) -> Rates {
        let Some((prev, prev_time)) = self.baseline else {
            self.baseline = Some((counters, now));
            self.last = Rates::default();
            return self.last;
        };

        let elapsed = now.saturating_duration_since(prev_time).as_secs_f64();
        if elapsed <= 0.0 {
            return self.last;
        }

        let in_diff = counters.in_octets.wrapping_sub(prev.in_octets);
        let out_diff = counters.out_octets.wrapping_sub(prev.out_octets);
        self.last = Rates {
            inbound: f64::from(in_diff) / elapsed,
            outbound: f64::from(out_diff) / elapsed,
        };
        self.inbound.record(self.last.inbound);
        self.outbound.record(self.last.outbound);
        self.baseline = Some((counters, now));
        self.last
    }

    pub fn is_primed(&self) -> bool {
        self.baseline.is_some()
    }

    /// Inbound rate as the primary channel, outbound as the secondary.
    pub fn stats(&self) -> Stats {
        if self.inbound.is_empty() {
            return Stats::default();
        }
        Stats::dual(&self.inbound, &self.outbound)
    }
}
