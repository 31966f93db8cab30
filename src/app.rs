use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::collector::{Collector, CollectorError, SourceEntry};
use crate::config::{Config, ConfigError};
use crate::source::SENTINEL;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Collector(#[from] CollectorError),
    #[error("cannot write report: {0}")]
    Output(#[from] io::Error),
}

/// Headless runner: samples every configured source and prints a summary
/// of each one at a fixed interval.
pub struct App {
    collector: Collector,
    report_interval: Duration,
}

impl App {
    pub fn new(config: &Config, report_interval: Duration) -> Result<Self, AppError> {
        Ok(Self::with_collector(Collector::new(config)?, report_interval))
    }

    pub fn with_collector(collector: Collector, report_interval: Duration) -> Self {
        Self {
            collector,
            report_interval,
        }
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Sample until `stop` is set, reporting to stdout.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), AppError> {
        self.collector.start()?;
        tracing::info!(sources = self.collector.entries().len(), "sampling started");

        let mut next_report = Instant::now() + self.report_interval;
        while !stop.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= next_report {
                let stdout = io::stdout();
                self.write_report(&mut stdout.lock())?;
                next_report = now + self.report_interval;
            }
            thread::sleep(Duration::from_millis(100).min(next_report.saturating_duration_since(now)));
        }

        self.shutdown();
        Ok(())
    }

    pub fn write_report(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "--- {} ---", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        for entry in self.collector.entries() {
            writeln!(out, "{}", report_line(entry))?;
        }
        out.flush()
    }

    pub fn shutdown(&mut self) {
        self.collector.shutdown();
    }
}

fn newest(samples: Option<Vec<f64>>) -> Option<f64> {
    samples?.last().copied().filter(|&v| v != SENTINEL && v >= 0.0)
}

/// `name: last [min .. avg .. max]`, with `--` when the newest sample
/// is missing.
pub fn report_line(entry: &SourceEntry) -> String {
    if !entry.is_active() {
        return format!("{}: inactive", entry.name());
    }

    let stats = entry.stats();
    let last_primary = newest(entry.snapshot(usize::MAX).ok());
    let (last, min, avg, max) = match entry.snapshot_secondary(usize::MAX) {
        Some(secondary) => {
            let last_secondary = newest(secondary.ok());
            let last = match (last_primary, last_secondary) {
                (Some(p), Some(s)) => entry.format_pair(p, s),
                _ => "--".to_string(),
            };
            (
                last,
                entry.format_pair(stats.min, stats.min_secondary),
                entry.format_pair(stats.avg, stats.avg_secondary),
                entry.format_pair(stats.max, stats.max_secondary),
            )
        }
        None => (
            last_primary.map_or_else(|| "--".to_string(), |v| entry.format_value(v)),
            entry.format_value(stats.min),
            entry.format_value(stats.avg),
            entry.format_value(stats.max),
        ),
    };

    format!("{}: {} [min {} avg {} max {}]", entry.name(), last, min, avg, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use crate::source::testing::ScriptedProvider;
    use crate::source::DataSource;

    fn app_with(kind: &str, target: &str, provider: ScriptedProvider) -> App {
        let config = TargetConfig::from_pair(kind, target);
        let source = DataSource::create_with_provider(kind, target, Box::new(provider));
        let collector = Collector::with_sources(vec![(config, source)], 16, Duration::from_millis(5)).unwrap();
        App::with_collector(collector, Duration::from_secs(1))
    }

    #[test]
    fn report_before_any_sample() {
        let app = app_with("memory", "local", ScriptedProvider::default());
        assert_eq!(
            report_line(&app.collector().entries()[0]),
            "MEMORY - local: -- [min 0.0% avg 0.0% max 0.0%]"
        );
    }

    #[test]
    fn report_shows_latest_value() {
        let provider = ScriptedProvider {
            memory: [42.0].into(),
            ..Default::default()
        };
        let mut app = app_with("memory", "local", provider);
        app.collector.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while app.collector().entries()[0].primary().is_empty() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
        app.shutdown();

        // one successful tick, then sentinels once the script runs dry
        let line = report_line(&app.collector().entries()[0]);
        assert!(line.ends_with("[min 42.0% avg 42.0% max 42.0%]"), "{line}");

        let mut out = Vec::new();
        app.write_report(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("--- "));
        assert!(text.contains("MEMORY - local: "));
    }

    #[test]
    fn inactive_sources_are_marked() {
        let app = app_with("nope", "x", ScriptedProvider::default());
        assert_eq!(report_line(&app.collector().entries()[0]), "NOPE - x: inactive");
    }

    #[test]
    fn run_returns_once_stopped() {
        let mut app = app_with("loadavg", "local", ScriptedProvider::default());
        let stop = AtomicBool::new(true);
        app.run(&stop).unwrap();
    }
}
