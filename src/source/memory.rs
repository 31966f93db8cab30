use crate::monitor::MetricsProvider;

use super::stats::{RunningStats, Stats};
use super::{format, HandlerDescriptor, SourceError, SourceHandler};

pub(super) static DESCRIPTOR: HandlerDescriptor = HandlerDescriptor {
    name: "memory",
    unit: "%",
    is_dual: false,
    max_scale: 100.0,
    init,
    format: format::percent,
    format_dual: None,
};

struct MemorySource {
    provider: Box<dyn MetricsProvider>,
    stats: RunningStats,
}

fn init(_target: &str, provider: Box<dyn MetricsProvider>) -> Result<Box<dyn SourceHandler>, SourceError> {
    Ok(Box::new(MemorySource {
        provider,
        stats: RunningStats::new(),
    }))
}

impl SourceHandler for MemorySource {
    fn collect(&mut self) -> Result<f64, SourceError> {
        let used = self.provider.memory_percent()?;
        self.stats.record(used);
        Ok(used)
    }

    fn stats(&self) -> Stats {
        Stats::single(&self.stats)
    }
}
