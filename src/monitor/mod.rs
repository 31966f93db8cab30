//! OS metrics provider.
//!
//! Raw CPU, memory, load average and interface counter readings consumed by the
//! data source handlers. Every handler owns its own provider so that tick-delta
//! state (CPU jiffies) is private to the source that samples it.

mod cpu;
mod memory;
mod network;

use thiserror::Error;

pub use cpu::{CpuMonitor, CpuUsage};
pub use memory::MemoryMonitor;
pub use network::{InterfaceCounters, NetworkMonitor};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected format in {0}")]
    Parse(&'static str),
    #[error("no such interface: {0}")]
    UnknownInterface(String),
    #[error("{0} is not available on this platform")]
    Unavailable(&'static str),
}

/// Readings the data sources need from the operating system.
pub trait MetricsProvider: Send {
    /// Total and system CPU utilisation in percent.
    fn cpu_percent(&mut self) -> Result<CpuUsage, ProviderError>;

    /// Used memory in percent of total.
    fn memory_percent(&mut self) -> Result<f64, ProviderError>;

    /// One-minute load average.
    fn load_average(&mut self) -> Result<f64, ProviderError>;

    /// Cumulative byte counters of a network interface.
    fn interface_counters(&mut self, name: &str) -> Result<InterfaceCounters, ProviderError>;
}

/// Default provider backed by procfs and `sysinfo`.
///
/// Sub-monitors are created on first use; a memory source never pays for the
/// interface list and vice versa.
#[derive(Default)]
pub struct SystemMonitor {
    cpu: Option<CpuMonitor>,
    memory: Option<MemoryMonitor>,
    network: Option<NetworkMonitor>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsProvider for SystemMonitor {
    fn cpu_percent(&mut self) -> Result<CpuUsage, ProviderError> {
        self.cpu.get_or_insert_with(CpuMonitor::new).usage()
    }

    fn memory_percent(&mut self) -> Result<f64, ProviderError> {
        self.memory.get_or_insert_with(MemoryMonitor::new).usage_percent()
    }

    fn load_average(&mut self) -> Result<f64, ProviderError> {
        let load = sysinfo::System::load_average().one;
        if load.is_nan() {
            return Err(ProviderError::Unavailable("load average"));
        }
        Ok(load.max(0.0))
    }

    fn interface_counters(&mut self, name: &str) -> Result<InterfaceCounters, ProviderError> {
        self.network.get_or_insert_with(NetworkMonitor::new).counters(name)
    }
}
