use std::time::Instant;

use crate::monitor::MetricsProvider;

use super::rate::{RateTracker, Rates};
use super::stats::Stats;
use super::{format, HandlerDescriptor, SourceError, SourceHandler};

pub(super) static DESCRIPTOR: HandlerDescriptor = HandlerDescriptor {
    name: "if_thr",
    unit: "B/s",
    is_dual: true,
    max_scale: 0.0,
    init,
    format: format::rate,
    format_dual: Some(format::rate_pair),
};

/// Throughput of a local interface, from the OS byte counters.
struct InterfaceSource {
    provider: Box<dyn MetricsProvider>,
    interface: String,
    tracker: RateTracker,
}

/// Parse `local,<iface>`.
fn parse_target(target: &str) -> Result<String, SourceError> {
    let mut parts = target.split(',').filter(|p| !p.is_empty());
    match (parts.next(), parts.next()) {
        (Some("local"), Some(iface)) => Ok(iface.trim().to_string()),
        (Some("local"), None) => Err(SourceError::invalid("if_thr", target, "missing interface name")),
        _ => Err(SourceError::invalid("if_thr", target, "expected local,<interface>")),
    }
}

fn init(target: &str, provider: Box<dyn MetricsProvider>) -> Result<Box<dyn SourceHandler>, SourceError> {
    Ok(Box::new(InterfaceSource {
        provider,
        interface: parse_target(target)?,
        tracker: RateTracker::new(),
    }))
}

impl InterfaceSource {
    fn sample(&mut self) -> Result<Rates, SourceError> {
        let counters = self.provider.interface_counters(&self.interface)?;
        Ok(self.tracker.update(counters, Instant::now()))
    }
}

impl SourceHandler for InterfaceSource {
    fn collect(&mut self) -> Result<f64, SourceError> {
        self.sample().map(|rates| rates.combined())
    }

    fn collect_dual(&mut self) -> Result<(f64, f64), SourceError> {
        self.sample().map(|rates| (rates.inbound, rates.outbound))
    }

    fn stats(&self) -> Stats {
        self.tracker.stats()
    }
}
