use crate::monitor::MetricsProvider;

use super::stats::{RunningStats, Stats};
use super::{format, HandlerDescriptor, SourceError, SourceHandler};

pub(super) static DESCRIPTOR: HandlerDescriptor = HandlerDescriptor {
    name: "cpu",
    unit: "%",
    is_dual: true,
    max_scale: 100.0,
    init,
    format: format::percent,
    format_dual: None,
};

/// Total CPU utilisation, with the kernel share as second channel.
struct CpuSource {
    provider: Box<dyn MetricsProvider>,
    total: RunningStats,
    system: RunningStats,
}

fn init(_target: &str, provider: Box<dyn MetricsProvider>) -> Result<Box<dyn SourceHandler>, SourceError> {
    Ok(Box::new(CpuSource {
        provider,
        total: RunningStats::new(),
        system: RunningStats::new(),
    }))
}

impl CpuSource {
    fn sample(&mut self) -> Result<(f64, f64), SourceError> {
        let usage = self.provider.cpu_percent()?;
        self.total.record(usage.total);
        self.system.record(usage.system);
        Ok((usage.total, usage.system))
    }
}

impl SourceHandler for CpuSource {
    fn collect(&mut self) -> Result<f64, SourceError> {
        self.sample().map(|(total, _)| total)
    }

    fn collect_dual(&mut self) -> Result<(f64, f64), SourceError> {
        self.sample()
    }

    fn stats(&self) -> Stats {
        Stats::dual(&self.total, &self.system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::CpuUsage;
    use crate::source::testing::ScriptedProvider;

    #[test]
    fn dual_collect_reports_system_share() {
        let provider = ScriptedProvider {
            cpu: [CpuUsage { total: 80.0, system: 30.0 }, CpuUsage { total: 40.0, system: 10.0 }].into(),
            ..Default::default()
        };
        let mut source = init("local", Box::new(provider)).unwrap();
        assert_eq!(source.collect_dual().unwrap(), (80.0, 30.0));
        assert_eq!(source.collect_dual().unwrap(), (40.0, 10.0));

        let stats = source.stats();
        assert_eq!((stats.min, stats.max, stats.avg), (40.0, 80.0, 60.0));
        assert_eq!((stats.min_secondary, stats.max_secondary, stats.avg_secondary), (10.0, 30.0, 20.0));
    }
}
