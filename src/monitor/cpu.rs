#[cfg(target_os = "linux")]
use std::fs;

#[cfg(not(target_os = "linux"))]
use sysinfo::System;

use super::ProviderError;

#[cfg(target_os = "linux")]
const PROC_STAT: &str = "/proc/stat";

/// CPU utilisation over the interval since the previous reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuUsage {
    /// Busy share of all CPU time, in percent
    pub total: f64,
    /// Kernel share (system + irq + softirq), in percent
    pub system: f64,
}

/// Aggregate jiffy counters from the first line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuTicks {
    idle: u64,
    system: u64,
    total: u64,
}

impl CpuTicks {
    fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().next()?;
        let mut fields = line.split_whitespace();
        if fields.next()? != "cpu" {
            return None;
        }

        let values = fields
            .take(8)
            .map(|f| f.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        let &[user, nice, system, idle, iowait, irq, softirq, steal] = values.as_slice() else {
            return None;
        };

        Some(Self {
            idle,
            system: system + irq + softirq,
            total: user + nice + system + idle + iowait + irq + softirq + steal,
        })
    }
}

pub struct CpuMonitor {
    prev: Option<CpuTicks>,
    #[cfg(not(target_os = "linux"))]
    system: System,
}

impl CpuMonitor {
    pub fn new() -> Self {
        #[cfg(target_os = "linux")]
        {
            // Initial read to get baseline
            let prev = fs::read_to_string(PROC_STAT)
                .ok()
                .and_then(|stat| CpuTicks::parse(&stat));
            Self { prev }
        }

        #[cfg(not(target_os = "linux"))]
        {
            let mut system = System::new();
            system.refresh_cpu_usage();
            Self { prev: None, system }
        }
    }

    /// Returns CPU usage since the previous call (or since construction).
    #[cfg(target_os = "linux")]
    pub fn usage(&mut self) -> Result<CpuUsage, ProviderError> {
        let stat = fs::read_to_string(PROC_STAT).map_err(|source| ProviderError::Read {
            path: PROC_STAT,
            source,
        })?;
        self.update(&stat)
    }

    /// Returns CPU usage since the previous call. The kernel share is not
    /// exposed by `sysinfo` and reads as zero.
    #[cfg(not(target_os = "linux"))]
    pub fn usage(&mut self) -> Result<CpuUsage, ProviderError> {
        self.system.refresh_cpu_usage();
        Ok(CpuUsage {
            total: self.system.global_cpu_usage() as f64,
            system: 0.0,
        })
    }

    /// Feed one `/proc/stat` dump and compute usage against the previous one.
    /// Without a previous reading the result is zero.
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    fn update(&mut self, stat: &str) -> Result<CpuUsage, ProviderError> {
        let ticks = CpuTicks::parse(stat).ok_or(ProviderError::Parse("/proc/stat"))?;
        let usage = match self.prev {
            Some(prev) => {
                let total_diff = ticks.total.saturating_sub(prev.total);
                if total_diff > 0 {
                    let idle_diff = ticks.idle.saturating_sub(prev.idle);
                    let system_diff = ticks.system.saturating_sub(prev.system);
                    CpuUsage {
                        total: 100.0 * (1.0 - idle_diff as f64 / total_diff as f64),
                        system: 100.0 * system_diff as f64 / total_diff as f64,
                    }
                } else {
                    CpuUsage::default()
                }
            }
            None => CpuUsage::default(),
        };
        self.prev = Some(ticks);
        Ok(usage)
    }
}

impl Default for CpuMonitor {
    fn default() -> Self {
        Self::new()
    }
}
