use chrono::{Local, Timelike};

use crate::monitor::MetricsProvider;

use super::stats::{RunningStats, Stats};
use super::{format, HandlerDescriptor, SourceError, SourceHandler};

pub(super) static DESCRIPTOR: HandlerDescriptor = HandlerDescriptor {
    name: "clock",
    unit: "",
    is_dual: true,
    max_scale: 24.0,
    init,
    format: format::two_decimals,
    format_dual: None,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Twelve,
    TwentyFour,
}

impl Mode {
    fn hours(self) -> f64 {
        match self {
            Mode::Twelve => 12.0,
            Mode::TwentyFour => 24.0,
        }
    }

    fn display_hour(self, hour: u32) -> f64 {
        match (self, hour) {
            (Mode::Twelve, 0) => 12.0,
            (Mode::Twelve, h) if h > 12 => f64::from(h - 12),
            (_, h) => f64::from(h),
        }
    }
}

/// Local time of day. Hours and minutes are plotted as two channels, with
/// minutes scaled onto the hour axis.
struct ClockSource {
    mode: Mode,
    hours: RunningStats,
    minutes: RunningStats,
}

fn init(target: &str, _provider: Box<dyn MetricsProvider>) -> Result<Box<dyn SourceHandler>, SourceError> {
    let mode = if target.trim() == "12" { Mode::Twelve } else { Mode::TwentyFour };
    Ok(Box::new(ClockSource {
        mode,
        hours: RunningStats::new(),
        minutes: RunningStats::new(),
    }))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Reading {
    /// `hours + minutes / 100`, i.e. 9:30 reads 9.30
    display: f64,
    hours: f64,
    scaled_minutes: f64,
}

fn reading(mode: Mode, hour: u32, minute: u32) -> Reading {
    let hours = mode.display_hour(hour);
    let minutes = f64::from(minute);
    Reading {
        display: hours + minutes / 100.0,
        hours,
        scaled_minutes: minutes * mode.hours() / 60.0,
    }
}

impl ClockSource {
    fn now(&self) -> Reading {
        let now = Local::now();
        reading(self.mode, now.hour(), now.minute())
    }

    fn record(&mut self, reading: Reading) {
        self.hours.record(reading.hours);
        self.minutes.record(reading.scaled_minutes);
    }
}

impl SourceHandler for ClockSource {
    fn collect(&mut self) -> Result<f64, SourceError> {
        let reading = self.now();
        self.record(reading);
        Ok(reading.display)
    }

    fn collect_dual(&mut self) -> Result<(f64, f64), SourceError> {
        let reading = self.now();
        self.record(reading);
        Ok((reading.hours, reading.scaled_minutes))
    }

    /// `last` shows the current wall-clock time rather than the last sample.
    fn stats(&self) -> Stats {
        if self.hours.is_empty() {
            return Stats::default();
        }
        Stats {
            last: self.now().display,
            ..Stats::dual(&self.hours, &self.minutes)
        }
    }

    fn max_scale(&self) -> Option<f64> {
        Some(self.mode.hours())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::testing::ScriptedProvider;

    #[test]
    fn twelve_hour_mapping() {
        assert_eq!(Mode::Twelve.display_hour(0), 12.0);
        assert_eq!(Mode::Twelve.display_hour(12), 12.0);
        assert_eq!(Mode::Twelve.display_hour(13), 1.0);
        assert_eq!(Mode::Twelve.display_hour(23), 11.0);
        assert_eq!(Mode::TwentyFour.display_hour(0), 0.0);
        assert_eq!(Mode::TwentyFour.display_hour(23), 23.0);
    }

    #[test]
    fn readings() {
        let r = reading(Mode::TwentyFour, 9, 30);
        assert!((r.display - 9.30).abs() < 1e-9);
        assert_eq!(r.hours, 9.0);
        assert_eq!(r.scaled_minutes, 12.0);

        let r = reading(Mode::Twelve, 15, 45);
        assert_eq!(r.hours, 3.0);
        assert_eq!(r.scaled_minutes, 9.0);
    }

    #[test]
    fn mode_sets_scale() {
        let twelve = init("12", Box::new(ScriptedProvider::default())).unwrap();
        assert_eq!(twelve.max_scale(), Some(12.0));
        let other = init("", Box::new(ScriptedProvider::default())).unwrap();
        assert_eq!(other.max_scale(), Some(24.0));
    }

    #[test]
    fn collect_records_both_channels() {
        let mut source = init("24", Box::new(ScriptedProvider::default())).unwrap();
        assert_eq!(source.stats(), Stats::default());
        let (hours, minutes) = source.collect_dual().unwrap();
        assert!((0.0..24.0).contains(&hours));
        assert!((0.0..24.0).contains(&minutes));
        let stats = source.stats();
        assert_eq!(stats.max, hours);
        assert_eq!(stats.last_secondary, minutes);
    }
}
