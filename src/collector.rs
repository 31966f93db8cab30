//! One sampling thread per configured source, each feeding its own ring
//! buffer(s).
//!
//! A tick that fails still pushes [`SENTINEL`] so every channel advances once
//! per interval. Sources that could not be created (unknown type, bad target)
//! keep their channel and push the sentinel on every tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{self, Config, TargetConfig};
use crate::ringbuf::{RingBuffer, RingBufferError};
use crate::source::{format, DataSource, HandlerDescriptor, SourceError, Stats, SENTINEL};

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    Buffer(#[from] RingBufferError),
    #[error("cannot start sampling thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Channels and published statistics shared with a sampling thread.
#[derive(Clone)]
struct Shared {
    primary: Arc<RingBuffer>,
    secondary: Option<Arc<RingBuffer>>,
    stats: Arc<Mutex<Stats>>,
}

impl Shared {
    fn push(&self, primary: f64, secondary: f64) {
        self.primary.push(primary);
        if let Some(buffer) = &self.secondary {
            buffer.push(secondary);
        }
    }
}

/// A configured source together with its sample channels.
pub struct SourceEntry {
    config: TargetConfig,
    descriptor: Option<&'static HandlerDescriptor>,
    max_scale: f64,
    interval: Duration,
    shared: Shared,
    source: Option<DataSource>,
    handle: Option<JoinHandle<()>>,
}

impl SourceEntry {
    fn new(
        config: TargetConfig,
        source: Result<DataSource, SourceError>,
        capacity: usize,
        default_interval: Duration,
    ) -> Result<Self, RingBufferError> {
        let mut source = match source {
            Ok(source) => Some(source),
            Err(e) => {
                tracing::warn!(source = %config.name, error = %e, "source disabled");
                None
            }
        };

        let interval = config.refresh_interval.unwrap_or(default_interval);
        if let Some(source) = source.as_mut() {
            source.set_refresh_interval(interval);
        }

        let is_dual = source.as_ref().is_some_and(DataSource::is_dual);
        let shared = Shared {
            primary: Arc::new(RingBuffer::new(capacity)?),
            secondary: if is_dual {
                Some(Arc::new(RingBuffer::new(capacity)?))
            } else {
                None
            },
            stats: Arc::new(Mutex::new(Stats::default())),
        };

        Ok(Self {
            descriptor: source.as_ref().map(DataSource::descriptor),
            max_scale: source.as_ref().map_or(0.0, DataSource::max_scale),
            config,
            interval,
            shared,
            source,
            handle: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn kind(&self) -> &str {
        &self.config.kind
    }

    pub fn target(&self) -> &str {
        &self.config.target
    }

    /// Effective sampling interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a data source exists behind this entry.
    pub fn is_active(&self) -> bool {
        self.descriptor.is_some()
    }

    pub fn is_dual(&self) -> bool {
        self.shared.secondary.is_some()
    }

    pub fn unit(&self) -> &'static str {
        self.descriptor.map_or("", |d| d.unit)
    }

    /// Fixed vertical scale, 0 for auto-scaling.
    pub fn max_scale(&self) -> f64 {
        self.max_scale
    }

    pub fn format_value(&self, value: f64) -> String {
        match self.descriptor {
            Some(descriptor) => descriptor.format_value(value),
            None => format::one_decimal(value),
        }
    }

    pub fn format_pair(&self, primary: f64, secondary: f64) -> String {
        match self.descriptor {
            Some(descriptor) => descriptor.format_pair(primary, secondary),
            None => format!("{}/{}", format::one_decimal(primary), format::one_decimal(secondary)),
        }
    }

    /// Statistics as last published by the sampling thread.
    pub fn stats(&self) -> Stats {
        *self.shared.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn primary(&self) -> &RingBuffer {
        &self.shared.primary
    }

    pub fn secondary(&self) -> Option<&RingBuffer> {
        self.shared.secondary.as_deref()
    }

    pub fn snapshot(&self, max_elems: usize) -> Result<Vec<f64>, RingBufferError> {
        self.shared.primary.read_snapshot(max_elems)
    }

    pub fn snapshot_secondary(&self, max_elems: usize) -> Option<Result<Vec<f64>, RingBufferError>> {
        self.shared.secondary.as_ref().map(|b| b.read_snapshot(max_elems))
    }

    fn resize(&self, capacity: usize) -> Result<(), RingBufferError> {
        self.shared.primary.resize(capacity)?;
        if let Some(buffer) = &self.shared.secondary {
            buffer.resize(capacity)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceEntry")
            .field("name", &self.config.name)
            .field("active", &self.is_active())
            .field("interval", &self.interval)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

pub struct Collector {
    entries: Vec<SourceEntry>,
    stop: Arc<AtomicBool>,
}

impl Collector {
    /// Create every configured source. Nothing is sampled until [`start`].
    ///
    /// [`start`]: Collector::start
    pub fn new(config: &Config) -> Result<Self, CollectorError> {
        let sources = config
            .targets
            .iter()
            .map(|t| (t.clone(), DataSource::create(&t.kind, &t.target)))
            .collect();
        Self::with_sources(sources, config.buffer_capacity(), config.refresh_interval)
    }

    /// Build from already created sources, one buffer set of `capacity` each.
    pub fn with_sources(
        sources: Vec<(TargetConfig, Result<DataSource, SourceError>)>,
        capacity: usize,
        default_interval: Duration,
    ) -> Result<Self, CollectorError> {
        let entries = sources
            .into_iter()
            .map(|(config, source)| SourceEntry::new(config, source, capacity, default_interval))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            entries,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    /// Spawn one sampling thread per entry that is not running yet.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.handle.is_some() {
                continue;
            }
            let source = entry.source.take();
            let shared = entry.shared.clone();
            let stop = Arc::clone(&self.stop);
            let interval = entry.interval;
            let name = entry.config.name.clone();

            tracing::info!(
                source = %name,
                kind = entry.kind(),
                target = entry.target(),
                interval_ms = interval.as_millis() as u64,
                "starting sampler"
            );
            let handle = thread::Builder::new()
                .name(format!("sampler-{index}"))
                .spawn(move || sample_loop(&name, source, &shared, interval, &stop))?;
            entry.handle = Some(handle);
        }
        Ok(())
    }

    /// Resize every channel for a new plot width.
    pub fn resize(&self, width: u32) -> Result<(), RingBufferError> {
        let capacity = config::buffer_capacity(width);
        for entry in &self.entries {
            entry.resize(capacity)?;
        }
        tracing::debug!(width, capacity, "channels resized");
        Ok(())
    }

    /// Flag shared with the sampling threads; setting it stops them.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Stop all sampling threads and wait for them to exit.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        let handles: Vec<_> = self.entries.iter_mut().filter_map(|e| e.handle.take()).collect();
        if handles.is_empty() {
            return;
        }
        for handle in &handles {
            handle.thread().unpark();
        }
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("sampling thread panicked");
            }
        }
        tracing::info!("collector stopped");
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sample_loop(name: &str, mut source: Option<DataSource>, shared: &Shared, interval: Duration, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        if let Some(source) = source.as_mut() {
            let result = if shared.secondary.is_some() {
                source.collect_dual()
            } else {
                source.collect().map(|v| (v, SENTINEL))
            };
            match result {
                Ok((primary, secondary)) => shared.push(primary, secondary),
                Err(e) => {
                    if e.is_transient() {
                        tracing::debug!(source = name, error = %e, "no sample this tick");
                    } else {
                        tracing::warn!(source = name, error = %e, "collection failed");
                    }
                    shared.push(SENTINEL, SENTINEL);
                }
            }
            *shared.stats.lock().unwrap_or_else(PoisonError::into_inner) = source.stats();
        } else {
            shared.push(SENTINEL, SENTINEL);
        }

        sleep_unless_stopped(interval, stop);
    }
    tracing::debug!(source = name, "sampler exiting");
}

/// Sleep for `interval`, returning early once `stop` is set and the thread
/// is unparked.
fn sleep_unless_stopped(interval: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + interval;
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{CpuUsage, InterfaceCounters};
    use crate::source::testing::ScriptedProvider;

    const TICK: Duration = Duration::from_millis(5);
    /// Large enough that no test run wraps the channel.
    const CAPACITY: usize = 1000;

    fn target(kind: &str, target: &str) -> TargetConfig {
        TargetConfig::from_pair(kind, target)
    }

    fn scripted(kind: &str, target_str: &str, provider: ScriptedProvider) -> (TargetConfig, Result<DataSource, SourceError>) {
        (
            target(kind, target_str),
            DataSource::create_with_provider(kind, target_str, Box::new(provider)),
        )
    }

    fn wait_for_len(buffer: &RingBuffer, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while buffer.len() < len {
            assert!(Instant::now() < deadline, "buffer never reached {len} samples");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn samples_flow_into_buffers_then_sentinels() {
        let provider = ScriptedProvider {
            memory: [10.0, 20.0, 30.0].into(),
            ..Default::default()
        };
        let mut collector = Collector::with_sources(vec![scripted("memory", "local", provider)], CAPACITY, TICK).unwrap();
        collector.start().unwrap();

        let entry = &collector.entries()[0];
        wait_for_len(entry.primary(), 5);
        collector.shutdown();

        let entry = &collector.entries()[0];
        assert!(!entry.is_dual());
        let values = entry.snapshot(CAPACITY).unwrap();
        assert_eq!(&values[..3], &[10.0, 20.0, 30.0][..]);
        assert!(values[3..].len() >= 2);
        assert!(values[3..].iter().all(|&v| v == SENTINEL));

        let stats = entry.stats();
        assert_eq!((stats.min, stats.max, stats.avg, stats.last), (10.0, 30.0, 20.0, 30.0));
    }

    #[test]
    fn dual_sources_feed_both_channels() {
        let provider = ScriptedProvider {
            cpu: [CpuUsage { total: 50.0, system: 5.0 }].into(),
            ..Default::default()
        };
        let mut collector = Collector::with_sources(vec![scripted("cpu", "local", provider)], CAPACITY, TICK).unwrap();
        collector.start().unwrap();
        let entry = &collector.entries()[0];
        wait_for_len(entry.secondary().unwrap(), 2);
        collector.shutdown();

        let entry = &collector.entries()[0];
        let primary = entry.snapshot(2).unwrap();
        let secondary = entry.snapshot_secondary(2).unwrap().unwrap();
        assert_eq!(primary, [50.0, SENTINEL]);
        assert_eq!(secondary, [5.0, SENTINEL]);
        assert_eq!(entry.unit(), "%");
        assert_eq!(entry.max_scale(), 100.0);
    }

    #[test]
    fn unknown_type_still_ticks() {
        let (config, source) = (target("disk", "/"), DataSource::create("disk", "/"));
        let mut collector = Collector::with_sources(vec![(config, source)], CAPACITY, TICK).unwrap();
        assert!(!collector.entries()[0].is_active());
        collector.start().unwrap();
        wait_for_len(collector.entries()[0].primary(), 3);
        collector.shutdown();

        let entry = &collector.entries()[0];
        assert!(entry.snapshot(CAPACITY).unwrap().iter().all(|&v| v == SENTINEL));
        assert_eq!(entry.stats(), Stats::default());
        assert_eq!(entry.name(), "DISK - /");
        assert_eq!((entry.kind(), entry.target()), ("disk", "/"));
    }

    #[test]
    fn rate_source_primes_then_reports() {
        let unchanged = InterfaceCounters { in_octets: 0, out_octets: 0 };
        let provider = ScriptedProvider {
            counters: [unchanged, unchanged].into(),
            ..Default::default()
        };
        // `bw=local,eth0` expands to an if_thr source
        let config = target("bw", "local,eth0");
        let source = DataSource::create_with_provider(&config.kind, &config.target, Box::new(provider));
        let mut collector = Collector::with_sources(vec![(config, source)], CAPACITY, TICK).unwrap();
        collector.start().unwrap();
        wait_for_len(collector.entries()[0].primary(), 3);
        collector.shutdown();

        let entry = &collector.entries()[0];
        assert!(entry.is_dual());
        assert_eq!(entry.name(), "BW - local,eth0");
        // primed (0), unchanged counters (0), provider exhausted (sentinel)
        assert_eq!(entry.snapshot(3).unwrap(), vec![0.0, 0.0, SENTINEL]);
        assert_eq!(entry.format_value(2048.0), "2.0 KB/s");
    }

    #[test]
    fn per_source_interval_overrides_global() {
        let mut slow = target("memory", "local");
        slow.refresh_interval = Some(Duration::from_secs(30));
        let source = DataSource::create_with_provider("memory", "local", Box::new(ScriptedProvider::default()));
        let collector =
            Collector::with_sources(vec![(slow, source), scripted("memory", "local", ScriptedProvider::default())], 4, TICK)
                .unwrap();
        assert_eq!(collector.entries()[0].interval(), Duration::from_secs(30));
        assert_eq!(collector.entries()[1].interval(), TICK);
    }

    #[test]
    fn shutdown_interrupts_long_sleeps() {
        let mut collector = Collector::with_sources(
            vec![scripted("loadavg", "local", ScriptedProvider::default())],
            4,
            Duration::from_secs(3600),
        )
        .unwrap();
        collector.start().unwrap();
        wait_for_len(collector.entries()[0].primary(), 1);

        let started = Instant::now();
        collector.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(collector.entries()[0].primary().len(), 1);
    }

    #[test]
    fn second_shutdown_is_a_no_op() {
        let mut collector =
            Collector::with_sources(vec![scripted("loadavg", "local", ScriptedProvider::default())], 4, TICK).unwrap();
        collector.start().unwrap();
        wait_for_len(collector.entries()[0].primary(), 1);
        collector.shutdown();
        let len = collector.entries()[0].primary().len();

        collector.shutdown();
        assert!(collector.entries().iter().all(|e| e.handle.is_none()));
        assert_eq!(collector.entries()[0].primary().len(), len);
    }

    #[test]
    fn resize_applies_to_every_channel() {
        let collector = Collector::with_sources(
            vec![scripted("cpu", "local", ScriptedProvider::default())],
            10,
            TICK,
        )
        .unwrap();
        collector.resize(50).unwrap();
        let entry = &collector.entries()[0];
        assert_eq!(entry.primary().capacity(), 48);
        assert_eq!(entry.secondary().unwrap().capacity(), 48);
    }
}
