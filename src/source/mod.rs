//! Data sources: one handler per source type, looked up by type name.
//!
//! A [`DataSource`] couples an immutable [`HandlerDescriptor`] with the
//! handler instance that owns the per-source state (provider, protocol
//! session, running statistics). Instances are owned by exactly one sampling
//! thread.

mod clock;
mod cpu;
pub mod format;
mod if_thr;
mod loadavg;
mod memory;
mod ping;
pub mod rate;
mod shell;
mod snmp;
pub mod stats;

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::monitor::{MetricsProvider, ProviderError, SystemMonitor};
use crate::net::{PingError, SnmpError};

pub use stats::{RunningStats, Stats};

/// Sample value recorded when a tick produced no data.
pub const SENTINEL: f64 = -1.0;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unknown source type '{0}'")]
    UnknownType(String),
    #[error("invalid {kind} target '{target}': {reason}")]
    InvalidTarget {
        kind: &'static str,
        target: String,
        reason: &'static str,
    },
    #[error("cannot start command: {0}")]
    Spawn(#[source] io::Error),
    #[error("{0} source has no second channel")]
    NotDual(&'static str),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Ping(#[from] PingError),
    #[error(transparent)]
    Snmp(#[from] SnmpError),
    #[error("host {0} unresolved, waiting for the next lookup")]
    Unresolved(String),
    #[error("command output ended")]
    CommandEnded,
    #[error("no new value this tick")]
    NoData,
}

impl SourceError {
    /// Whether the next tick may succeed. Configuration errors never recover.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            SourceError::UnknownType(_)
                | SourceError::InvalidTarget { .. }
                | SourceError::Spawn(_)
                | SourceError::NotDual(_)
        )
    }

    fn invalid(kind: &'static str, target: &str, reason: &'static str) -> Self {
        SourceError::InvalidTarget {
            kind,
            target: target.to_string(),
            reason,
        }
    }
}

/// Per-instance behaviour of one source type.
pub trait SourceHandler: Send {
    /// Take one sample.
    fn collect(&mut self) -> Result<f64, SourceError>;

    /// Take one sample of both channels. Only dual sources implement this.
    fn collect_dual(&mut self) -> Result<(f64, f64), SourceError> {
        Err(SourceError::NotDual("single-channel"))
    }

    fn stats(&self) -> Stats;

    /// Instance-specific vertical scale, overriding the descriptor's.
    fn max_scale(&self) -> Option<f64> {
        None
    }

    fn set_refresh_interval(&mut self, _interval: Duration) {}
}

type InitFn = fn(&str, Box<dyn MetricsProvider>) -> Result<Box<dyn SourceHandler>, SourceError>;

/// Static description of a source type.
pub struct HandlerDescriptor {
    pub name: &'static str,
    pub unit: &'static str,
    pub is_dual: bool,
    /// Fixed vertical scale, 0 for auto-scaling
    pub max_scale: f64,
    init: InitFn,
    format: fn(f64) -> String,
    format_dual: Option<fn(f64, f64) -> String>,
}

impl HandlerDescriptor {
    pub fn format_value(&self, value: f64) -> String {
        (self.format)(value)
    }

    /// Format a primary/secondary pair, `in/out` style for rate sources.
    pub fn format_pair(&self, primary: f64, secondary: f64) -> String {
        match self.format_dual {
            Some(format_dual) => format_dual(primary, secondary),
            None => format!("{}/{}", self.format_value(primary), self.format_value(secondary)),
        }
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("is_dual", &self.is_dual)
            .field("max_scale", &self.max_scale)
            .finish()
    }
}

static REGISTRY: &[&HandlerDescriptor] = &[
    &ping::DESCRIPTOR,
    &cpu::DESCRIPTOR,
    &memory::DESCRIPTOR,
    &snmp::DESCRIPTOR,
    &if_thr::DESCRIPTOR,
    &loadavg::DESCRIPTOR,
    &shell::DESCRIPTOR,
    &clock::DESCRIPTOR,
];

/// Look up a source type by exact name.
pub fn lookup(name: &str) -> Option<&'static HandlerDescriptor> {
    REGISTRY.iter().copied().find(|d| d.name == name)
}

/// Names of all registered source types, in registry order.
pub fn type_names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|d| d.name)
}

/// A configured source: its type description, live handler and target.
pub struct DataSource {
    descriptor: &'static HandlerDescriptor,
    handler: Box<dyn SourceHandler>,
    target: String,
}

impl DataSource {
    /// Create a source of type `kind` reading the real system.
    pub fn create(kind: &str, target: &str) -> Result<Self, SourceError> {
        Self::create_with_provider(kind, target, Box::new(SystemMonitor::new()))
    }

    /// Create a source with an explicit metrics provider.
    pub fn create_with_provider(
        kind: &str,
        target: &str,
        provider: Box<dyn MetricsProvider>,
    ) -> Result<Self, SourceError> {
        let descriptor = lookup(kind).ok_or_else(|| SourceError::UnknownType(kind.to_string()))?;
        let handler = (descriptor.init)(target, provider)?;
        Ok(Self {
            descriptor,
            handler,
            target: target.to_string(),
        })
    }

    pub fn collect(&mut self) -> Result<f64, SourceError> {
        self.handler.collect()
    }

    pub fn collect_dual(&mut self) -> Result<(f64, f64), SourceError> {
        if !self.descriptor.is_dual {
            return Err(SourceError::NotDual(self.descriptor.name));
        }
        self.handler.collect_dual()
    }

    pub fn stats(&self) -> Stats {
        self.handler.stats()
    }

    pub fn format_value(&self, value: f64) -> String {
        self.descriptor.format_value(value)
    }

    pub fn format_pair(&self, primary: f64, secondary: f64) -> String {
        self.descriptor.format_pair(primary, secondary)
    }

    pub fn descriptor(&self) -> &'static HandlerDescriptor {
        self.descriptor
    }

    pub fn set_refresh_interval(&mut self, interval: Duration) {
        self.handler.set_refresh_interval(interval);
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn unit(&self) -> &'static str {
        self.descriptor.unit
    }

    pub fn is_dual(&self) -> bool {
        self.descriptor.is_dual
    }

    pub fn max_scale(&self) -> f64 {
        self.handler.max_scale().unwrap_or(self.descriptor.max_scale)
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("type", &self.descriptor.name)
            .field("target", &self.target)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use crate::monitor::{CpuUsage, InterfaceCounters, MetricsProvider, ProviderError};

    /// Provider that replays scripted readings and fails once a script runs dry.
    #[derive(Default)]
    pub struct ScriptedProvider {
        pub cpu: VecDeque<CpuUsage>,
        pub memory: VecDeque<f64>,
        pub load: VecDeque<f64>,
        pub counters: VecDeque<InterfaceCounters>,
    }

    impl MetricsProvider for ScriptedProvider {
        fn cpu_percent(&mut self) -> Result<CpuUsage, ProviderError> {
            self.cpu.pop_front().ok_or(ProviderError::Unavailable("cpu"))
        }

        fn memory_percent(&mut self) -> Result<f64, ProviderError> {
            self.memory.pop_front().ok_or(ProviderError::Unavailable("memory"))
        }

        fn load_average(&mut self) -> Result<f64, ProviderError> {
            self.load.pop_front().ok_or(ProviderError::Unavailable("load average"))
        }

        fn interface_counters(&mut self, name: &str) -> Result<InterfaceCounters, ProviderError> {
            self.counters
                .pop_front()
                .ok_or_else(|| ProviderError::UnknownInterface(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;
    use crate::monitor::CpuUsage;

    #[test]
    fn registry_order_and_metadata() {
        let names: Vec<_> = type_names().collect();
        assert_eq!(
            names,
            ["ping", "cpu", "memory", "snmp", "if_thr", "loadavg", "shell", "clock"]
        );

        let cpu = lookup("cpu").unwrap();
        assert!(cpu.is_dual);
        assert_eq!(cpu.unit, "%");
        assert_eq!(cpu.max_scale, 100.0);

        let ping = lookup("ping").unwrap();
        assert!(!ping.is_dual);
        assert_eq!(ping.unit, "ms");

        assert!(lookup("CPU").is_none());
        assert!(lookup("disk").is_none());
    }

    #[test]
    fn unknown_type_is_permanent() {
        let err = DataSource::create("bogus", "local").unwrap_err();
        assert!(matches!(err, SourceError::UnknownType(ref t) if t == "bogus"));
        assert!(!err.is_transient());
        assert!(SourceError::NoData.is_transient());
    }

    #[test]
    fn cpu_source_end_to_end() {
        let provider = ScriptedProvider {
            cpu: [10.0, 20.0, 30.0]
                .into_iter()
                .map(|total| CpuUsage { total, system: 1.0 })
                .collect(),
            ..Default::default()
        };
        let mut source = DataSource::create_with_provider("cpu", "local", Box::new(provider)).unwrap();
        for _ in 0..3 {
            source.collect().unwrap();
        }

        let stats = source.stats();
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.avg, 20.0);
        assert_eq!(stats.last, 30.0);
        assert_eq!(source.format_value(stats.last), "30.0%");

        // provider exhausted: failure, stats untouched
        assert!(source.collect().is_err());
        assert_eq!(source.stats().last, 30.0);
    }

    #[test]
    fn single_channel_rejects_dual_collect() {
        let provider = ScriptedProvider {
            memory: [50.0].into(),
            ..Default::default()
        };
        let mut source = DataSource::create_with_provider("memory", "local", Box::new(provider)).unwrap();
        assert!(matches!(source.collect_dual(), Err(SourceError::NotDual("memory"))));
        assert_eq!(source.collect().unwrap(), 50.0);
    }

    #[test]
    fn rate_sources_format_pairs_as_in_out() {
        let source =
            DataSource::create_with_provider("if_thr", "local,eth0", Box::new(ScriptedProvider::default())).unwrap();
        assert_eq!(source.format_pair(2048.0, 0.0), "2.0 KB/s/0.0 B/s");
        assert_eq!(source.unit(), "B/s");
        assert_eq!(source.target(), "local,eth0");
    }
}
