use crate::monitor::MetricsProvider;

use super::stats::{RunningStats, Stats};
use super::{format, HandlerDescriptor, SourceError, SourceHandler};

pub(super) static DESCRIPTOR: HandlerDescriptor = HandlerDescriptor {
    name: "loadavg",
    unit: "",
    is_dual: false,
    max_scale: 0.0,
    init,
    format: format::one_decimal,
    format_dual: None,
};

/// One-minute load average.
struct LoadSource {
    provider: Box<dyn MetricsProvider>,
    stats: RunningStats,
}

fn init(_target: &str, provider: Box<dyn MetricsProvider>) -> Result<Box<dyn SourceHandler>, SourceError> {
    Ok(Box::new(LoadSource {
        provider,
        stats: RunningStats::new(),
    }))
}

impl SourceHandler for LoadSource {
    fn collect(&mut self) -> Result<f64, SourceError> {
        let load = self.provider.load_average()?;
        self.stats.record(load);
        Ok(load)
    }

    fn stats(&self) -> Stats {
        Stats::single(&self.stats)
    }
}
